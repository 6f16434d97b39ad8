//!
//! strand-core - Shared Types
//!
//! Provides the types every strand crate agrees on.
//!
//! ## Misuse
//!
//! Programming defects such as sending on a closed channel or unlocking a
//! mutex that is not held are fatal. They are raised through [`misuse`],
//! which logs the defect and panics the offending task.
//!
//! ## Recoverable Signals
//!
//! Non-blocking and timed channel operations report "would block", "timed
//! out" and "closed" as ordinary values:
//! - [`TrySendError`] - the value handed back when a send would block
//! - [`TryRecvError`] - `Empty` or `Closed`
//! - [`RecvTimeoutError`] - `Timeout` or `Closed`
//!
//! ## Configuration
//!
//! [`SchedulerConfig`] sizes the worker pool behind `spawn`. It is read from
//! TOML (the file named by `STRAND_CONFIG`) with environment overrides.
//!

pub mod config;
pub mod errors;

pub use config::*;
pub use errors::*;

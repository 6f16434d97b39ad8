//!
//! strand-threads - Concurrency Primitives
//!
//! Provides tasks and the primitives tasks use to coordinate.
//!
//! ## Task Scheduling
//!
//! Tasks run on a pool of worker threads that grows on demand. Features:
//! - `spawn(f)` - run a closure concurrently, fire-and-forget
//! - Core workers kept alive, extra workers retire when idle
//! - Panicking tasks are logged and isolated from their worker
//!
//! ## Channels
//!
//! Typed channels for inter-task communication:
//! - `Channel::new(capacity)` - bounded channel, `0` for rendezvous
//! - `send(value)` - blocks while the channel cannot accept the value
//! - `recv() -> Option<T>` - blocks while empty, `None` once closed and drained
//! - `close()` - one-way; sending afterwards is a fatal misuse
//! - `Select` - wait on several channel operations at once
//!
//! ## Wait Groups and Mutexes
//!
//! - `WaitGroup` - wait until a counted set of tasks is done
//! - `Mutex<T>` - FIFO lock with a scoped guard
//! - `RawMutex` - the explicit lock/unlock protocol with owner checks
//!
//! ## Cancellation
//!
//! There is no way to stop a task from outside. Close a shared stop channel
//! instead and have tasks select on it next to their normal work; a closed
//! channel is ready for every receiver at once.
//!

pub mod scheduler;
pub mod channel;
pub mod select;
pub mod wait_group;
pub mod mutex;

mod waiter;

pub use scheduler::*;
pub use channel::*;
pub use select::*;
pub use wait_group::*;
pub use mutex::*;

pub use strand_core::{Misuse, RecvTimeoutError, SchedulerConfig, TryRecvError, TrySendError};

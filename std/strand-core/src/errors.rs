///
/// Error types shared by the strand crates.
///
/// `Misuse` covers defects that terminate the offending task. The remaining
/// types are recoverable and returned through `Result`.
///

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Misuse {
    #[error("send on closed channel")]
    SendOnClosed,

    #[error("close of closed channel")]
    CloseOfClosed,

    #[error("negative wait group counter: {count}")]
    NegativeCounter { count: i64 },

    #[error("wait group reused before previous wait returned")]
    WaitGroupReused,

    #[error("unlock of unlocked mutex")]
    UnlockNotHeld,

    #[error("unlock of mutex held by another thread")]
    UnlockByNonOwner,

    #[error("mutex locked twice by its owner")]
    Relock,
}

/// Report a fatal misuse: logs the defect and panics the current task.
///
/// Callers must release any internal lock before calling this so other
/// tasks can keep using the primitive.
#[track_caller]
pub fn misuse(kind: Misuse) -> ! {
    let location = std::panic::Location::caller();
    tracing::error!(%kind, %location, "fatal misuse");
    panic!("{kind}");
}

/// Returned by `try_send` when the value could not be delivered without
/// blocking. The value is handed back.
#[derive(PartialEq, Eq, Clone, Copy, Error)]
#[error("sending on a full channel")]
pub struct TrySendError<T>(pub T);

impl<T> TrySendError<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TrySendError(..)")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TryRecvError {
    #[error("receiving on an empty channel")]
    Empty,

    #[error("receiving on a closed channel")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RecvTimeoutError {
    #[error("timed out waiting on channel")]
    Timeout,

    #[error("receiving on a closed channel")]
    Closed,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

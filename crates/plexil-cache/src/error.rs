//! Error type for the state cache, timebase and boot-record collaborator.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors raised below the exec driver: cache and timebase misuse, and
/// boot-record I/O. Plan-level failures never appear here — those are
/// values on a node, handled entirely in `plexil-exec`.
#[derive(Error, Debug)]
pub enum CacheError {
    /// A `StateCacheEntry`'s type changed between two unrelated concrete
    /// types (e.g. `String` then `Boolean`). A runtime assertion per the
    /// kernel's error taxonomy.
    #[error("state cache entry type mismatch for {state}: {existing:?} cannot become {incoming:?}")]
    TypeMismatch {
        state: String,
        existing: plexil_value::ValueType,
        incoming: plexil_value::ValueType,
    },

    /// `setTimer` called before `start` or after `stop`.
    #[error("timebase usage error: {0}")]
    TimebaseUsage(String),

    /// Boot-record collaborator I/O failure.
    #[error("boot record I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Custom(String),
}

//! State store error types.

/// Errors produced by [`JobStore`](crate::JobStore) operations.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// File-system I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Job record could not be serialized or parsed.
    #[error("job record encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// Atomic replace of the record file failed.
    #[error("atomic replace failed: {0}")]
    Replace(String),

    /// Internal mutex was poisoned by a panicked thread.
    #[error("job store lock poisoned")]
    LockPoisoned,
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, StateError>;

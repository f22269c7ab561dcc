use std::io;

/// Errors surfaced by the btree engine.
///
/// `KeyNotFound` and `DuplicateOid` are the two "logging hole" conditions documented in
/// the design notes: during crash recovery replay they are warnings, not failures.
#[derive(Debug, thiserror::Error)]
pub enum QSError {
    #[error("insert would duplicate key {0:?} in a unique index")]
    UniqueViolation(Vec<u8>),

    #[error("key not found")]
    KeyNotFound { during_recovery: bool },

    #[error("oid already present for this key")]
    DuplicateOid { during_recovery: bool },

    #[error("lock not granted: {0}")]
    LockNotGranted(LockFailure),

    #[error("page corruption: {0}")]
    PageCorruption(String),

    #[error("allocation failed")]
    Oom,

    #[error("file system error: {0}")]
    FileSystem(#[from] io::Error),

    #[error("page {0:?} is not resident and could not be pinned")]
    PinFailed(crate::types::Vpid),

    #[error("key exceeds the maximum supported length")]
    KeyTooLarge,

    #[error("btree is full: no room left in the inner node slab")]
    TreeFull,

    #[error("optimistic retry budget exceeded")]
    RetriesExceeded,

    #[error("operation attempted on a closed overflow-key file")]
    OverflowFileClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockFailure {
    /// The lock could not be granted immediately (conditional request).
    Timeout,
    /// The lock manager chose this transaction as a deadlock victim.
    DeadlockAbort,
}

impl std::fmt::Display for LockFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockFailure::Timeout => write!(f, "timeout"),
            LockFailure::DeadlockAbort => write!(f, "deadlock victim abort"),
        }
    }
}

pub type Result<T> = std::result::Result<T, QSError>;

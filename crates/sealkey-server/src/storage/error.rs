use thiserror::Error;

/// Errors from storage operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Underlying I/O or database failure.
    #[error("storage I/O error: {0}")]
    Io(String),

    /// Stored bytes could not be encoded or decoded.
    #[error("storage serialization error: {0}")]
    Serialization(String),

    /// The referenced credential does not exist.
    #[error("credential not found")]
    NotFound,

    /// A credential with this ID is already stored.
    #[error("credential already exists")]
    AlreadyExists,

    /// Compare-and-swap lost a race with a concurrent writer.
    #[error("counter conflict: expected {expected}, found {found}")]
    Conflict {
        /// Counter value the caller read before verifying.
        expected: u32,
        /// Counter value actually stored.
        found: u32,
    },
}

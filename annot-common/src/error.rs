//! Common error types for the annotation service

use thiserror::Error;

/// Common result type for annotation operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy shared by the library and the HTTP service
#[derive(Error, Debug)]
pub enum Error {
    /// Sentence source missing, malformed or empty
    #[error("Load error: {0}")]
    Load(String),

    /// Empty annotator name or out-of-range score
    #[error("Validation error: {0}")]
    Validation(String),

    /// Local annotation log could not be written
    #[error("Write error: {0}")]
    Write(String),

    /// Remote append failed; buffered records were kept
    #[error("Flush error: {0}")]
    Flush(String),

    /// Remote credentials could not be loaded or exchanged
    #[error("Credential error: {0}")]
    Credential(String),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Operation not allowed in the current flow state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the annotation flow can continue after this error.
    ///
    /// Load, credential and configuration failures are fatal at startup.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Error::Load(_) | Error::Credential(_) | Error::Config(_))
    }
}

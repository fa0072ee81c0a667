//! Error types for coursedrop.
//!
//! `CourseDropError` covers everything outside the admission core: loading
//! configuration, provisioning the credential store and starting the server.
//! Request-time failures are expressed as [`crate::admission::Denial`].

use thiserror::Error;

/// Common error type for coursedrop.
#[derive(Error, Debug)]
pub enum CourseDropError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Validation error for user or operator input.
    #[error("validation error: {0}")]
    Validation(String),

    /// The credential store could not be read or written.
    #[error("token store error: {0}")]
    TokenStore(String),

    /// Resource not found.
    #[error("{0} not found")]
    NotFound(String),
}

impl From<serde_json::Error> for CourseDropError {
    fn from(e: serde_json::Error) -> Self {
        CourseDropError::TokenStore(e.to_string())
    }
}

/// Result type alias for coursedrop operations.
pub type Result<T> = std::result::Result<T, CourseDropError>;

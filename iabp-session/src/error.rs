use std::time::Duration;
use thiserror::Error;

/// Errors raised by session state operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Please wait {:.1}s before sending another request", .retry_after.as_secs_f64())]
    RateLimited { retry_after: Duration },

    #[error("Password required")]
    Locked,

    #[error("Incorrect password")]
    IncorrectPassword,

    #[error("Invalid parameter {field}: {reason}")]
    InvalidParameter { field: String, reason: String },

    #[error("Storage error: {0}")]
    StorageError(String),
}

pub type Result<T> = std::result::Result<T, SessionError>;

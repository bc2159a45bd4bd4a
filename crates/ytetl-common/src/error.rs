//! Error types shared across ytetl crates

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, CommonError>;

/// Errors raised by the shared types
#[derive(Error, Debug)]
pub enum CommonError {
    #[error("Invalid query list: {0}")]
    InvalidQueryList(String),

    #[error("Malformed item: {0}")]
    MalformedItem(String),
}

//! Error types for the Timewalk core collaborators.

use thiserror::Error;

/// Result type alias for core operations
pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("World Labs API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("World generation failed: {0}")]
    GenerationFailed(String),

    #[error("World generation timed out after {0}s")]
    Timeout(u64),
}

//! Shared error type for the crate.
//!
//! Every fallible operation returns [`Result`]. Search backends have their own
//! recoverable error type, [`crate::search::ProviderError`], which the research
//! loop folds into its output instead of failing the job.

use crate::search::ProviderError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("LLM error: {0}")]
    LLM(String),

    #[error("Search error: {0}")]
    Search(#[from] ProviderError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),

    /// The run was cancelled by delete or shutdown
    #[error("Research run cancelled")]
    Cancelled,
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(format!("JSON error: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

//! CLI-specific error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Service error: {0}")]
    Service(#[from] fastskill_moderation::ServiceError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Server error: {0}")]
    Server(String),

    /// The document failed the quality gate
    #[error("Quality check failed: {0}")]
    QualityRejected(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Config(_) | CliError::Validation(_) => 2,
            CliError::QualityRejected(_) => 3,
            _ => 1,
        }
    }
}

pub type CliResult<T> = Result<T, CliError>;

//! Error types for the deployment engine

use thiserror::Error;

/// Main error type for deployd
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// The referenced deployment is not tracked
    #[error("Deployment not found: {0}")]
    NotFound(String),

    /// Malformed input, rejected before any state changed
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Deployment already tracked: {0}")]
    AlreadyTracked(String),

    /// A single failed status probe call
    #[error("Status probe error: {0}")]
    Probe(String),

    #[error("Remote command error: {0}")]
    Command(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeployError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DeployError::NotFound(_))
    }
}

impl From<anyhow::Error> for DeployError {
    fn from(err: anyhow::Error) -> Self {
        DeployError::Internal(err.to_string())
    }
}

use thiserror::Error;

use crate::queue::{ConfigValidationError, PersistenceError};

/// Errors surfaced to host code through the public API.
///
/// Delivery failures never show up here; they are handled inside the
/// processor and only logged.
#[derive(Error, Debug)]
pub enum SdkError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid queue configuration: {0}")]
    InvalidConfig(#[from] ConfigValidationError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

pub type Result<T> = std::result::Result<T, SdkError>;

//! Crate-level error type.

use thiserror::Error;

use crate::erp::ErpError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Erp(#[from] ErpError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("validation failed: {message}")]
    Validation { message: String, details: Vec<String> },

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} sync is already running")]
    AlreadyRunning(&'static str),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Internal(String),
}

impl SyncError {
    pub fn validation(message: impl Into<String>, details: Vec<String>) -> Self {
        Self::Validation { message: message.into(), details }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

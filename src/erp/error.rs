//! ERP client error types
//!
//! Callers branch on the variant: authentication and transport problems are
//! about the connection, remote faults are about one record.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ErpError {
    /// Credentials rejected or session no longer valid.
    #[error("could not authenticate with the ERP: {0}")]
    Auth(String),

    /// Network failure, timeout, or an unusable response.
    #[error("ERP transport error: {0}")]
    Transport(String),

    /// The ERP answered with a structured business-rule fault.
    #[error("ERP fault {code}: {message}")]
    Remote { code: i64, message: String },
}

impl ErpError {
    pub fn remote(code: i64, message: impl Into<String>) -> Self {
        Self::Remote { code, message: message.into() }
    }

    /// Retried once before being surfaced.
    pub fn is_transient(&self) -> bool { matches!(self, Self::Transport(_)) }

    /// Stops a reconciliation run instead of failing a single record.
    pub fn is_run_fatal(&self) -> bool { matches!(self, Self::Auth(_)) }
}

impl From<reqwest::Error> for ErpError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Transport(format!("request timed out: {e}"))
        } else if e.is_decode() {
            Self::Transport(format!("invalid response body: {e}"))
        } else {
            Self::Transport(e.to_string())
        }
    }
}

pub type ErpResult<T> = std::result::Result<T, ErpError>;

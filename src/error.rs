//! Unified core error taxonomy.
//!
//! Every fallible operation in this crate returns `Result<T, CoreError>`.
//! `CoreError` carries the behavioral kind (Validation / Conflict /
//! Infrastructure / Pipeline / Canceled) described in the design; a
//! hypothetical RPC layer maps these to status codes without depending on
//! any web framework from this crate.

use thiserror::Error;

/// Behavioral error kinds the rest of the system reasons about.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Bad input; never retried.
    #[error("validation: {0}")]
    Validation(String),

    /// Attempted to create a project that already exists.
    #[error("conflict: {0}")]
    Conflict(String),

    /// DB/FS/credentials/misconfiguration; not retried automatically.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),

    /// A step failure carrying its step name and a retryable flag.
    #[error("pipeline error in step '{step}': {message}")]
    Pipeline {
        step: String,
        message: String,
        retryable: bool,
    },

    /// Not an error from the user's perspective; terminal cancellation.
    #[error("canceled")]
    Canceled,

    /// The referenced row does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

impl CoreError {
    pub fn pipeline(step: impl Into<String>, message: impl Into<String>, retryable: bool) -> Self {
        CoreError::Pipeline {
            step: step.into(),
            message: message.into(),
            retryable,
        }
    }

    pub fn infrastructure(message: impl std::fmt::Display) -> Self {
        CoreError::Infrastructure(message.to_string())
    }
}

/// Error classification used by [`crate::retry::retry_backoff`].
///
/// 429 and 5xx-class network failures are retryable; 4xx-other and
/// structural errors are not.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for CoreError {
    fn is_retryable(&self) -> bool {
        match self {
            CoreError::Pipeline { retryable, .. } => *retryable,
            _ => false,
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(e: rusqlite::Error) -> Self {
        CoreError::Infrastructure(format!("sqlite: {e}"))
    }
}

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        CoreError::Infrastructure(format!("io: {e}"))
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Infrastructure(format!("json: {e}"))
    }
}

/// Classifies an HTTP status code per the network-retry discipline used by
/// both `retry_backoff` callers and the provider adapters: 429 and 5xx are
/// retryable, other 4xx are not.
pub fn http_status_retryable(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

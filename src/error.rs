//! Chainer error abstractions.

use std::time::Duration;

use thiserror::Error;

// Error messages.
pub const ERR_ITER_FAILURE: &str = "error returned during key/value iteration from database";
pub const ERR_DB_FLUSH: &str = "error flushing database state";

/// Application error variants.
#[derive(Debug, Error)]
pub enum AppError {
    /// The given input was invalid.
    #[error("validation error: {0}")]
    InvalidInput(String),
    /// An operation was invoked while its target was in a state which does not permit it.
    #[error("illegal state: {0}")]
    IllegalState(String),
    /// The streaming engine did not report a running state within the configured start timeout.
    #[error("streaming engine did not reach a running state within {0:?}")]
    StartTimeout(Duration),
}

/// The error type used to indicate that a processing task must stop.
#[derive(Debug, Error)]
#[error("fatal error: {0}")]
pub struct ShutdownError(#[from] pub anyhow::Error);

/// A result type where the error is a `ShutdownError`.
pub type ShutdownResult<T> = ::std::result::Result<T, ShutdownError>;

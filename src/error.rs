// Licensed under the Open Software License version 3.0
use thiserror::Error;

/// Uniform outcome-error type crossing every component boundary.
///
/// No collaborator error is allowed to propagate past more than one
/// component boundary as its native type; it is converted into one of
/// these variants first.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("transient I/O error: {0}")]
    TransientIo(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("cancelled")]
    Cancelled,

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("fatal error: {0}")]
    Fatal(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

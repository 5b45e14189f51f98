use slotbook_storage::StoreError;
use thiserror::Error;

/// Stable classification of engine failures, for callers that map to transport codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    InvalidRequest,
    Forbidden,
    Unavailable,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::Conflict(_) => ErrorKind::Conflict,
            EngineError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            EngineError::Forbidden(_) => ErrorKind::Forbidden,
            EngineError::Unavailable(_) => ErrorKind::Unavailable,
        }
    }

    pub fn not_found<T: Into<String>>(msg: T) -> Self {
        EngineError::NotFound(msg.into())
    }

    pub fn conflict<T: Into<String>>(msg: T) -> Self {
        EngineError::Conflict(msg.into())
    }

    pub fn invalid<T: Into<String>>(msg: T) -> Self {
        EngineError::InvalidRequest(msg.into())
    }

    pub fn forbidden<T: Into<String>>(msg: T) -> Self {
        EngineError::Forbidden(msg.into())
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(msg) => EngineError::Conflict(msg),
            StoreError::NotFound(msg) => EngineError::NotFound(msg),
            other => EngineError::Unavailable(other.to_string()),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

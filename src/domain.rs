use thiserror::Error;

use crate::permissions::Permission;

pub type DomainResult<T> = Result<T, DomainError>;

/// Failure taxonomy shared by every core operation. Cross-tenant access and
/// genuinely missing records are both `NotFound` so that existence of another
/// tenant's data is never confirmed to an unauthorized caller.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("resource not found")]
    NotFound,
    #[error("permission '{}' required", .0.slug())]
    Forbidden(Permission),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Validation(String),
    #[error("client link has expired")]
    TokenExpired,
    #[error("client link has been revoked")]
    TokenRevoked,
    #[error("database error: {0}")]
    Database(diesel::result::Error),
}

impl DomainError {
    pub fn conflict(message: impl Into<String>) -> Self {
        DomainError::Conflict(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        DomainError::Validation(message.into())
    }
}

impl From<diesel::result::Error> for DomainError {
    fn from(value: diesel::result::Error) -> Self {
        match value {
            diesel::result::Error::NotFound => DomainError::NotFound,
            other => DomainError::Database(other),
        }
    }
}

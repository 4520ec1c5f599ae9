use std::path::Path;
use thiserror::Error;

/// Result alias for envelope, identifier and retrieval operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Result alias for calls into a [`crate::KmsClient`].
pub type KmsResult<T> = std::result::Result<T, KmsError>;

/// Canonical error surface of the core crate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("malformed identifier `{value}`: {reason}")]
    MalformedIdentifier { value: String, reason: String },
    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),
    #[error("unknown download uri `{0}`; expected keyvault+secret:// or keyvault+file://")]
    UnknownScheme(String),
    #[error("key vault error: {0}")]
    Kms(#[from] KmsError),
    #[error("i/o error on {path}: {message}")]
    Io { path: String, message: String },
}

impl Error {
    pub(crate) fn malformed(value: &str, reason: impl Into<String>) -> Self {
        Error::MalformedIdentifier {
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn io(path: &Path, err: std::io::Error) -> Self {
        Error::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }
}

/// Failures reported by a key vault client.
///
/// The pipeline never retries; whatever a client returns here is handed
/// back to the caller unchanged inside [`Error::Kms`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KmsError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("{entity} not found")]
    NotFound { entity: String },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("unexpected response: {0}")]
    Response(String),
}

impl KmsError {
    pub fn not_found(entity: impl Into<String>) -> Self {
        KmsError::NotFound {
            entity: entity.into(),
        }
    }
}

//! Error types for fedbox
//!
//! All errors raised by the processing core are variants of `Error`.
//! Embedding servers can use [`Error::http_status`] to map a variant to a
//! protocol-level response code.

use thiserror::Error;

/// Library-wide error type
///
/// Validation and signature errors abort processing of the single
/// activity/request that raised them; they never block unrelated
/// activities. Partial failures during resolution and delivery are
/// collected by the caller-facing APIs instead of escalating here.
#[derive(Debug, Error)]
pub enum Error {
    /// Structural or required-field failure (400, non-retryable)
    #[error("malformed object: missing or invalid `{field}`")]
    MalformedObject { field: &'static str },

    /// An object had a different type than the operation expected (400)
    #[error("unexpected object type: expected {expected}, got {got}")]
    UnexpectedKind { expected: String, got: String },

    /// A referenced actor or key could not be resolved (404/410)
    #[error("unknown actor: {0}")]
    UnknownActor(String),

    /// Referenced entity does not exist remotely (404)
    #[error("not found: {0}")]
    NotFound(String),

    /// Referenced entity was deleted remotely (410)
    #[error("gone: {0}")]
    Gone(String),

    /// Transient network failure, retryable by the caller (502/503)
    #[error("unreachable: {0}")]
    Unreachable(String),

    /// The fetched resource is not an ActivityPub object (400)
    #[error("not an ActivityPub object: {0}")]
    NotAnObject(String),

    /// Signature verification failed (401)
    #[error("invalid signature")]
    InvalidSignature,

    /// Request could not be authenticated by any accepted scheme (401)
    #[error("unauthorized")]
    Unauthorized,

    /// Signature date outside the configured tolerance window (401)
    #[error("stale signature")]
    StaleSignature,

    /// An outbox activity referenced an object this instance does not own (403)
    #[error("not from outbox: {0}")]
    NotFromOutbox(String),

    /// Collection expansion exceeded the configured page budget (400)
    #[error("collection expansion limit exceeded: {0}")]
    CollectionLimit(String),

    /// Configuration error (500)
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal error (500)
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

impl Error {
    /// Suggested HTTP status code for this error.
    ///
    /// Mirrors the mapping an embedding server is expected to apply:
    /// malformed input is a client error, authentication failures are 401,
    /// transient fetch failures are gateway errors.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::MalformedObject { .. }
            | Error::UnexpectedKind { .. }
            | Error::NotAnObject(_)
            | Error::CollectionLimit(_) => 400,
            Error::InvalidSignature | Error::Unauthorized | Error::StaleSignature => 401,
            Error::NotFromOutbox(_) => 403,
            Error::NotFound(_) | Error::UnknownActor(_) => 404,
            Error::Gone(_) => 410,
            Error::Unreachable(_) => 502,
            Error::Config(_) | Error::Internal(_) => 500,
        }
    }

    /// Whether the caller may reasonably retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Unreachable(_) | Error::UnknownActor(_) | Error::NotFound(_)
        )
    }
}

/// Result type alias using Error
pub type Result<T> = std::result::Result<T, Error>;

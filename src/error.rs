//! Error types for catalog-harvest
//!
//! Errors are split by the layer that produces them:
//! - [`FetchError`]: a single outbound API call (transport, quota, shape, HTTP status)
//! - [`PersistenceError`]: checkpoint and output writes
//! - [`Error`]: the session-level error surfaced to the caller and the CLI

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for catalog-harvest operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for catalog-harvest
///
/// Only a handful of these terminate a run: configuration problems, a rejected
/// credential, and I/O failures while opening the session's files. Everything
/// that happens per page or per record is handled inside the session.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "api.api_key")
        key: Option<String>,
    },

    /// The upstream API rejected the credential
    #[error("authentication failed (HTTP {status}): {message}")]
    Authentication {
        /// HTTP status returned by the API (401 or 403)
        status: u16,
        /// Message extracted from the error body
        message: String,
    },

    /// Outbound API call failed
    #[error("fetch error: {0}")]
    Fetch(FetchError),

    /// Checkpoint or output persistence failed
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV read/write error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build a configuration error for a specific key
    pub fn config(message: impl Into<String>, key: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Whether this error means the credential was rejected
    pub fn is_authentication(&self) -> bool {
        matches!(
            self,
            Error::Authentication { .. } | Error::Fetch(FetchError::Authentication { .. })
        )
    }
}

/// Failure of a single outbound API call
#[derive(Debug, Error)]
pub enum FetchError {
    /// Timeout, refused connection, or a body that could not be read
    #[error("transport error for {context}: {message}")]
    Transport {
        /// Label describing the request (e.g., "year 2021, page 4")
        context: String,
        /// Underlying error message
        message: String,
        /// Whether the request timed out
        timed_out: bool,
    },

    /// The API signalled that the request quota is exhausted (HTTP 429)
    #[error("rate limited while fetching {context}: {message}")]
    QuotaExceeded {
        /// Label describing the request
        context: String,
        /// Message extracted from the error body
        message: String,
    },

    /// The payload did not have the expected top-level shape
    #[error("unexpected response shape for {context} (keys: {observed})")]
    MalformedResponse {
        /// Label describing the request
        context: String,
        /// Top-level keys (or JSON type) actually observed
        observed: String,
    },

    /// The credential was rejected (HTTP 401/403)
    #[error("authentication failed for {context} (HTTP {status}): {message}")]
    Authentication {
        /// Label describing the request
        context: String,
        /// HTTP status code
        status: u16,
        /// Message extracted from the error body
        message: String,
    },

    /// Any other non-success HTTP status
    #[error("HTTP {status} for {context}: {message}")]
    Http {
        /// Label describing the request
        context: String,
        /// HTTP status code
        status: u16,
        /// Message extracted from the error body
        message: String,
    },

    /// The automatic retry budget ran out
    #[error("giving up on {context} after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Label describing the request
        context: String,
        /// Number of attempts made (rate-limit cooldowns excluded)
        attempts: u32,
        /// The last error observed
        last: Box<FetchError>,
    },
}

impl FetchError {
    /// Label of the request that failed
    pub fn context(&self) -> &str {
        match self {
            FetchError::Transport { context, .. }
            | FetchError::QuotaExceeded { context, .. }
            | FetchError::MalformedResponse { context, .. }
            | FetchError::Authentication { context, .. }
            | FetchError::Http { context, .. }
            | FetchError::RetriesExhausted { context, .. } => context,
        }
    }

    /// Whether the credential was rejected
    pub fn is_authentication(&self) -> bool {
        matches!(self, FetchError::Authentication { .. })
    }
}

impl From<FetchError> for Error {
    fn from(error: FetchError) -> Self {
        match error {
            FetchError::Authentication {
                status, message, ..
            } => Error::Authentication { status, message },
            other => Error::Fetch(other),
        }
    }
}

/// Checkpoint or output write failures
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Writing the checkpoint document failed
    #[error("failed to write checkpoint {path}: {reason}")]
    CheckpointWrite {
        /// Checkpoint file path
        path: PathBuf,
        /// The reason the write failed
        reason: String,
    },

    /// Removing the checkpoint document failed
    #[error("failed to remove checkpoint {path}: {reason}")]
    CheckpointRemove {
        /// Checkpoint file path
        path: PathBuf,
        /// The reason the removal failed
        reason: String,
    },

    /// Appending a record to the output failed
    #[error("failed to write record {id} to {path}: {reason}")]
    RecordWrite {
        /// Identifier of the record that was not written
        id: u64,
        /// Output file path
        path: PathBuf,
        /// The reason the write failed
        reason: String,
    },
}

//! Error types for the REST client.
//!
//! # Design
//! `TooManyRequests` gets a dedicated variant because callers need the
//! `Retry-After` value to schedule their own retry. Every other non-2xx
//! response without a registered handler lands in `HttpError` with the raw
//! status code and body. Argument problems are reported synchronously as
//! `InvalidArgument` and are never retried.

use thiserror::Error;

/// Errors returned by `BaseClient` and the helper modules.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The caller supplied missing or contradictory arguments.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The server returned 429. `retry_after` is the `Retry-After` header in
    /// seconds, when the server sent one.
    #[error("too many requests, retry after {}", fmt_retry_after(.retry_after))]
    TooManyRequests { retry_after: Option<u64> },

    /// The server returned a non-2xx status with no registered handler.
    #[error("HTTP {status}: {body}")]
    HttpError { status: u16, body: String },

    /// The request never produced a response.
    #[error("transport failed: {0}")]
    Transport(String),

    /// A successful response body could not be decoded.
    #[error("deserialization failed: {0}")]
    DeserializationError(String),
}

fn fmt_retry_after(retry_after: &Option<u64>) -> String {
    match retry_after {
        Some(secs) => format!("{secs} seconds"),
        None => "unknown".to_string(),
    }
}

impl ApiError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        ApiError::InvalidArgument(msg.into())
    }
}

pub type Result<T, E = ApiError> = std::result::Result<T, E>;

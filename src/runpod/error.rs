//! Error type for the RunPod registry client.

use thiserror::Error;

/// Errors raised by the RunPod registry client.
///
/// The client performs no retries; transient failures propagate to the
/// caller unchanged.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RunpodError {
    /// Raised when the HTTP request itself fails (connect, TLS, timeout).
    #[error("provider request failed: {message}")]
    Http {
        /// Message reported by the HTTP client.
        message: String,
    },
    /// Raised when the API answers with a non-success status.
    #[error("provider API error (status {status}): {message}")]
    Api {
        /// HTTP status code returned by the API.
        status: u16,
        /// Response body, usually a JSON error document.
        message: String,
    },
    /// Raised when a response body cannot be interpreted.
    #[error("malformed provider response: {message}")]
    MalformedResponse {
        /// Description of the field or value that failed to parse.
        message: String,
    },
}

impl From<reqwest::Error> for RunpodError {
    fn from(value: reqwest::Error) -> Self {
        Self::Http {
            message: value.to_string(),
        }
    }
}

//! Retry classification for failed upload attempts.
//!
//! [`classify`] is the only place that decides whether a frame is retried.

use thiserror::Error;

/// Why an upload attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadFailure {
    /// The endpoint could not be reached (connection refused, DNS, connect timeout)
    #[error("Endpoint unreachable: {0}")]
    Connect(String),

    /// The request did not complete within its timeout
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// The connection failed while the request was in progress
    #[error("Transport error: {0}")]
    Transport(String),

    /// The endpoint answered with a non-success status
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The request could not be built or its payload could not be read
    #[error("Local error: {0}")]
    Local(String),
}

/// Whether a failed frame should be attempted again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retryable,
    Terminal,
}

/// Outcome of one upload attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadAttemptResult {
    Success,
    RetryableFailure(String),
    TerminalFailure(String),
}

impl UploadAttemptResult {
    pub fn from_result(result: Result<(), UploadFailure>) -> Self {
        match result {
            Ok(()) => Self::Success,
            Err(failure) => match classify(&failure) {
                RetryDecision::Retryable => Self::RetryableFailure(failure.to_string()),
                RetryDecision::Terminal => Self::TerminalFailure(failure.to_string()),
            },
        }
    }
}

/// Classify a failed attempt.
///
/// Unreachable endpoints, timeouts and 5xx responses are retryable. 4xx
/// responses and local errors are terminal.
pub fn classify(failure: &UploadFailure) -> RetryDecision {
    match failure {
        UploadFailure::Connect(_) | UploadFailure::Timeout(_) | UploadFailure::Transport(_) => {
            RetryDecision::Retryable
        }
        UploadFailure::Status { status, .. } if (500..600).contains(status) => {
            RetryDecision::Retryable
        }
        UploadFailure::Status { status, .. } if (400..500).contains(status) => {
            RetryDecision::Terminal
        }
        // unexpected 1xx/3xx
        UploadFailure::Status { .. } | UploadFailure::Local(_) => RetryDecision::Terminal,
    }
}

impl From<reqwest::Error> for UploadFailure {
    fn from(err: reqwest::Error) -> Self {
        let message = err.to_string();
        if err.is_timeout() {
            UploadFailure::Timeout(message)
        } else if err.is_connect() {
            UploadFailure::Connect(message)
        } else if err.is_builder() {
            UploadFailure::Local(message)
        } else if err.is_request() {
            UploadFailure::Transport(message)
        } else {
            UploadFailure::Local(message)
        }
    }
}

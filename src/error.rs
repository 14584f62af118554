//! Typed errors for a submission attempt.
//!
//! Outcomes ([`crate::submit::SubmissionOutcome`]) are verdicts: the attempt
//! ran to completion and the target told us something. `SubmitError` is the
//! other case — the attempt itself never got far enough to produce a verdict.
//! The distinction matters because the pipeline retries errors, never
//! verdicts, and only the error kinds where a retry can plausibly help.

use thiserror::Error;

/// A failure that prevented a submission attempt from producing an outcome.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// The request timed out before a response arrived.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// TCP/TLS connection could not be established (refused, reset, DNS).
    #[error("connection failed: {0}")]
    Connect(String),

    /// The target answered with a non-success status on the initial page
    /// fetch, so there was no page to work with.
    #[error("HTTP status {status} from {url}")]
    Status { status: u16, url: String },

    /// Any other transport-level fault (protocol error, body decode, ...).
    /// Retrying will not produce a different answer.
    #[error("transport error: {0}")]
    Transport(String),

    /// Browser navigation failed or timed out before the page rendered.
    #[error("navigation failed: {0}")]
    Navigation(String),

    /// A live element the extracted schema promised could not be re-found.
    #[error("element not found: {0}")]
    ElementNotFound(String),
}

impl SubmitError {
    /// Classify a `reqwest` error into the retry taxonomy.
    pub fn from_reqwest(err: &reqwest::Error, url: &str) -> Self {
        if err.is_timeout() {
            Self::Timeout(format!("{url}: {err}"))
        } else if err.is_connect() {
            Self::Connect(format!("{url}: {err}"))
        } else if let Some(status) = err.status() {
            Self::Status {
                status: status.as_u16(),
                url: url.to_string(),
            }
        } else {
            Self::Transport(format!("{url}: {err}"))
        }
    }

    /// Returns `true` for errors that are worth retrying after a back-off
    /// delay.
    ///
    /// **Retriable:** timeouts, connection failures, 5xx responses, and
    /// browser navigation faults — all transient infrastructure trouble.
    ///
    /// **Not retriable:** 4xx responses (the request is wrong, not the
    /// network), decode/protocol errors, and missing elements (the page
    /// will not grow the element on a second visit).
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Connect(_) | Self::Navigation(_) => true,
            Self::Status { status, .. } => *status >= 500,
            Self::Transport(_) | Self::ElementNotFound(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_retriable() {
        assert!(SubmitError::Status {
            status: 503,
            url: "https://a.example".into()
        }
        .is_retriable());
    }

    #[test]
    fn client_errors_are_not_retriable() {
        assert!(!SubmitError::Status {
            status: 404,
            url: "https://a.example".into()
        }
        .is_retriable());
        assert!(!SubmitError::Status {
            status: 403,
            url: "https://a.example".into()
        }
        .is_retriable());
    }

    #[test]
    fn timeouts_and_connect_failures_are_retriable() {
        assert!(SubmitError::Timeout("t".into()).is_retriable());
        assert!(SubmitError::Connect("c".into()).is_retriable());
        assert!(SubmitError::Navigation("n".into()).is_retriable());
    }

    #[test]
    fn terminal_faults_are_not_retriable() {
        assert!(!SubmitError::Transport("decode".into()).is_retriable());
        assert!(!SubmitError::ElementNotFound("input[name=q]".into()).is_retriable());
    }
}

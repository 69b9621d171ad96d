use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LlmError>;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("rate limited by completion service")]
    RateLimited { retry_after: Option<Duration> },

    #[error("completion api error: status={status} body={body}")]
    Api { status: u16, body: String },

    #[error("completion attempt timed out")]
    Timeout,

    #[error("http error: {0}")]
    Http(String),

    #[error("unexpected response format: {0}")]
    ResponseFormat(String),

    #[error("completion succeeded with no usable content")]
    EmptyCompletion,
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return Self::Timeout;
        }
        Self::Http(e.to_string())
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(e: serde_json::Error) -> Self {
        Self::ResponseFormat(e.to_string())
    }
}

/// Retry-relevant classification of a failed completion attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    RateLimited(Option<Duration>),
    Transient,
    NonRetryable,
    Timeout,
    Empty,
}

/// Pure mapping from an error to its retry class. Kept separate from the retry
/// driver so each branch is testable on its own.
pub fn classify(error: &LlmError) -> ErrorClass {
    match error {
        LlmError::RateLimited { retry_after } => ErrorClass::RateLimited(*retry_after),
        LlmError::Api { status: 429, .. } => ErrorClass::RateLimited(None),
        LlmError::Api { status, .. } if (400..500).contains(status) => ErrorClass::NonRetryable,
        LlmError::Api { .. } => ErrorClass::Transient,
        LlmError::Timeout => ErrorClass::Timeout,
        LlmError::Http(_) | LlmError::ResponseFormat(_) => ErrorClass::Transient,
        LlmError::EmptyCompletion => ErrorClass::Empty,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_classifies_with_server_wait() {
        let class = classify(&LlmError::RateLimited {
            retry_after: Some(Duration::from_secs(2)),
        });
        assert_eq!(class, ErrorClass::RateLimited(Some(Duration::from_secs(2))));
    }

    #[test]
    fn bare_429_status_still_counts_as_rate_limited() {
        let class = classify(&LlmError::Api {
            status: 429,
            body: "too many requests".to_string(),
        });
        assert_eq!(class, ErrorClass::RateLimited(None));
    }

    #[test]
    fn client_errors_are_non_retryable() {
        let class = classify(&LlmError::Api {
            status: 401,
            body: "invalid api key".to_string(),
        });
        assert_eq!(class, ErrorClass::NonRetryable);
    }

    #[test]
    fn server_errors_are_transient() {
        let class = classify(&LlmError::Api {
            status: 503,
            body: "overloaded".to_string(),
        });
        assert_eq!(class, ErrorClass::Transient);
    }

    #[test]
    fn network_and_decode_failures_are_transient() {
        assert_eq!(
            classify(&LlmError::Http("connection reset".to_string())),
            ErrorClass::Transient
        );
        assert_eq!(
            classify(&LlmError::ResponseFormat("missing choices".to_string())),
            ErrorClass::Transient
        );
    }

    #[test]
    fn timeout_and_empty_have_their_own_classes() {
        assert_eq!(classify(&LlmError::Timeout), ErrorClass::Timeout);
        assert_eq!(classify(&LlmError::EmptyCompletion), ErrorClass::Empty);
    }
}

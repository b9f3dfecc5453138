//! Error types for the faucet service

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

/// Why a dispense request did not produce a transfer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FaucetError {
    /// Missing or malformed wallet address or amount. Raised before any
    /// ledger or network interaction.
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    RateLimitExceeded(String),

    #[error("Failed to resolve token account: {0}")]
    AccountResolution(String),

    #[error("{0}")]
    Submission(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Machine-readable error classification carried on every failure response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    ValidationError,
    RateLimitExceeded,
    AccountResolutionError,
    SubmissionError,
    InternalError,
}

impl ErrorKind {
    /// Stable label used for metrics and logs.
    pub const fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::RateLimitExceeded => "rate_limit_exceeded",
            ErrorKind::AccountResolutionError => "account_resolution_error",
            ErrorKind::SubmissionError => "submission_error",
            ErrorKind::InternalError => "internal_error",
        }
    }
}

impl FaucetError {
    /// Per-identity quota used up for the current window.
    pub fn quota_exhausted(max_requests: u32, window: Duration) -> Self {
        FaucetError::RateLimitExceeded(format!(
            "Rate limit exceeded. Maximum {} requests per {} per wallet/IP combination.",
            max_requests,
            describe_window(window)
        ))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            FaucetError::Validation(_) => ErrorKind::ValidationError,
            FaucetError::RateLimitExceeded(_) => ErrorKind::RateLimitExceeded,
            FaucetError::AccountResolution(_) => ErrorKind::AccountResolutionError,
            FaucetError::Submission(_) => ErrorKind::SubmissionError,
            FaucetError::Internal(_) => ErrorKind::InternalError,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            FaucetError::Validation(_) => StatusCode::BAD_REQUEST,
            FaucetError::RateLimitExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            FaucetError::AccountResolution(_) | FaucetError::Submission(_) => StatusCode::BAD_GATEWAY,
            FaucetError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Only internal failures are unexpected; everything else is an
    /// ordinary operational outcome.
    pub fn is_unexpected(&self) -> bool {
        matches!(self, FaucetError::Internal(_))
    }
}

impl IntoResponse for FaucetError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "success": false,
            "error": self.to_string(),
            "errorKind": self.kind(),
            "timestamp": chrono::Utc::now().to_rfc3339()
        }));

        (self.status_code(), body).into_response()
    }
}

pub type FaucetResult<T> = Result<T, FaucetError>;

/// Window length in the largest unit that divides it exactly.
fn describe_window(window: Duration) -> String {
    let secs = window.as_secs();
    let (count, unit) = if secs > 0 && secs % 3600 == 0 {
        (secs / 3600, "hour")
    } else if secs > 0 && secs % 60 == 0 {
        (secs / 60, "minute")
    } else {
        (secs, "second")
    };
    if count == 1 {
        format!("1 {}", unit)
    } else {
        format!("{} {}s", count, unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_message() {
        let err = FaucetError::quota_exhausted(1, Duration::from_secs(24 * 3600));
        assert_eq!(
            err.to_string(),
            "Rate limit exceeded. Maximum 1 requests per 24 hours per wallet/IP combination."
        );
        assert_eq!(err.kind(), ErrorKind::RateLimitExceeded);
        assert_eq!(err.status_code(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn test_window_is_described_without_rounding() {
        assert_eq!(describe_window(Duration::from_secs(3600)), "1 hour");
        assert_eq!(describe_window(Duration::from_secs(30 * 60)), "30 minutes");
        assert_eq!(describe_window(Duration::from_secs(90 * 60)), "90 minutes");
        assert_eq!(describe_window(Duration::from_secs(45)), "45 seconds");

        let err = FaucetError::quota_exhausted(3, Duration::from_secs(90 * 60));
        assert_eq!(
            err.to_string(),
            "Rate limit exceeded. Maximum 3 requests per 90 minutes per wallet/IP combination."
        );
    }

    #[test]
    fn test_submission_passes_message_through() {
        let err = FaucetError::Submission("insufficient funds".to_string());
        assert_eq!(err.to_string(), "insufficient funds");
        assert!(!err.is_unexpected());
    }

    #[test]
    fn test_kind_serialization() {
        let value = serde_json::to_value(ErrorKind::AccountResolutionError).unwrap();
        assert_eq!(value, "ACCOUNT_RESOLUTION_ERROR");
        assert!(FaucetError::Internal("boom".into()).is_unexpected());
    }
}

//! Error taxonomy for API calls.

use serde::Deserialize;
use thiserror::Error;

/// Optional `{ "error": "..." }` body some endpoints attach to failures.
#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Why an API call did not produce its expected result.
///
/// `Display` is the user-facing reason shown in the notification popup.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Input rejected before any request was sent.
    #[error("{0}")]
    Validation(String),

    /// The server answered with a non-success status.
    #[error("{message}")]
    Http { status: u16, message: String },

    /// A success status whose body did not have the expected shape.
    #[error("{message}")]
    Protocol { message: String, detail: String },

    /// The request never produced a status (connection refused, timeout...).
    #[error("{message} ({detail})")]
    Transport { message: String, detail: String },
}

impl ApiError {
    /// Build a status failure, preferring the server's `error` message.
    pub fn from_status(status: u16, body: &[u8], fallback: &str) -> Self {
        let message = serde_json::from_slice::<ErrorBody>(body)
            .ok()
            .map(|b| b.error)
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| fallback.to_string());
        ApiError::Http { status, message }
    }

    /// Status failure that ignores any body (the history GET never enriches errors).
    pub fn fixed_status(status: u16, message: &str) -> Self {
        ApiError::Http {
            status,
            message: message.to_string(),
        }
    }

    pub fn protocol(message: &str, detail: impl ToString) -> Self {
        ApiError::Protocol {
            message: message.to_string(),
            detail: detail.to_string(),
        }
    }

    pub fn transport(message: &str, err: &anyhow::Error) -> Self {
        ApiError::Transport {
            message: message.to_string(),
            detail: format!("{err:#}"),
        }
    }

    /// True when no request was sent.
    pub fn is_validation(&self) -> bool {
        matches!(self, ApiError::Validation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_message_preferred() {
        let err = ApiError::from_status(400, br#"{"error":"Need 9 integers"}"#, "Upload failed");
        assert_eq!(err.to_string(), "Need 9 integers");
    }

    #[test]
    fn test_fallback_when_body_is_not_json() {
        let err = ApiError::from_status(504, b"<html>gateway</html>", "Upload failed");
        assert_eq!(err.to_string(), "Upload failed");
        let err = ApiError::from_status(500, br#"{"error":"  "}"#, "Upload failed");
        assert_eq!(err.to_string(), "Upload failed");
    }
}

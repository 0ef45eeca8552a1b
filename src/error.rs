//! Error types shared by the API client, settings and history stores
//!
//! The cache store never returns these: its failures are logged and treated
//! as misses. Everything else surfaces a `VWorldError` for the caller to turn
//! into a user-facing message.

use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, VWorldError>;

/// Errors that can occur when talking to VWorld or handling local input
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VWorldError {
    /// No API key is configured
    #[error("API key is not configured")]
    Unauthenticated,

    /// TLS handshake or certificate validation failed
    #[error("TLS certificate validation failed: {0}")]
    TransportFailure(String),

    /// The request did not complete within the configured timeout
    #[error("request timed out")]
    Timeout,

    /// Any other transport error or non-2xx response
    #[error("API request failed{}: {}", .status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default(), .message)]
    RequestFailure {
        /// HTTP status code, when the server answered
        status: Option<u16>,
        /// Underlying error message
        message: String,
    },

    /// The service answered with `status: ERROR` in its response envelope
    #[error("VWorld returned an error{}: {}", .code.as_ref().map(|c| format!(" [{}]", c)).unwrap_or_default(), .text)]
    ServiceError {
        /// Service error code, e.g. `INVALID_KEY`
        code: Option<String>,
        /// Human-readable error text from the service
        text: String,
    },

    /// The response body did not match the expected envelope
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Malformed user input
    #[error("invalid input: {0}")]
    ValidationFailure(String),

    /// Local file I/O failed
    #[error("file error: {0}")]
    ResourceFailure(String),
}

impl VWorldError {
    /// Suggested remedy to show next to the error, if there is one
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::Unauthenticated => Some(
                "set an API key with `vworld config set-key <KEY>`, --api-key or VWORLD_API_KEY",
            ),
            Self::TransportFailure(_) => Some(
                "switch the call method with `vworld config set-protocol http` or `https-insecure`",
            ),
            Self::Timeout => Some("the service is slow to respond; try again later"),
            Self::ServiceError { code: Some(code), .. } if code == "INVALID_KEY" => {
                Some("the configured API key is not valid")
            }
            _ => None,
        }
    }

    /// Builds a `ResourceFailure` from an I/O error with the path involved
    pub(crate) fn resource(path: &std::path::Path, err: impl std::fmt::Display) -> Self {
        Self::ResourceFailure(format!("{}: {}", path.display(), err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_failure_message_includes_status() {
        let err = VWorldError::RequestFailure {
            status: Some(502),
            message: "bad gateway".to_string(),
        };
        assert_eq!(err.to_string(), "API request failed (HTTP 502): bad gateway");
    }

    #[test]
    fn test_request_failure_message_without_status() {
        let err = VWorldError::RequestFailure {
            status: None,
            message: "connection refused".to_string(),
        };
        assert_eq!(err.to_string(), "API request failed: connection refused");
    }

    #[test]
    fn test_service_error_message_includes_code() {
        let err = VWorldError::ServiceError {
            code: Some("INVALID_KEY".to_string()),
            text: "등록되지 않은 인증키입니다.".to_string(),
        };
        assert!(err.to_string().contains("[INVALID_KEY]"));
        assert_eq!(err.hint(), Some("the configured API key is not valid"));
    }

    #[test]
    fn test_hints_for_authentication_and_tls() {
        assert!(VWorldError::Unauthenticated.hint().unwrap().contains("set-key"));
        assert!(VWorldError::TransportFailure("x".into())
            .hint()
            .unwrap()
            .contains("https-insecure"));
        assert!(VWorldError::ValidationFailure("x".into()).hint().is_none());
    }
}

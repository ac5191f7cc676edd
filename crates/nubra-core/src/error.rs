//! Error types for Nubra.

use thiserror::Error;

/// Core error type for all Nubra operations.
#[derive(Error, Debug)]
pub enum NubraError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unsafe input: {0}")]
    UnsafeInput(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Request too large: {0}")]
    TooLarge(String),

    #[error("Provider error: {0}")]
    Provider(String),

    /// Backend answered with an error envelope.
    #[error("Backend error ({code}): {message}")]
    Backend { code: String, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Backend unreachable: {0}")]
    Unreachable(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Another request is still running")]
    Busy,

    #[error("No recent assistant response available")]
    NoRegenerateAction,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl NubraError {
    /// Short, actionable text that is safe to show in a chat transcript.
    ///
    /// Never includes upstream provider detail or internal codes.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(msg) => msg.clone(),
            Self::UnsafeInput(_) => "Input appears to contain prompt-injection style instructions. \
                 Please remove such content and try again."
                .to_string(),
            Self::RateLimited(_) => "Too many requests. Please slow down.".to_string(),
            Self::TooLarge(_) => "Request is too large. Please trim your input.".to_string(),
            Self::Provider(_) => {
                "The assistant service is not available. Please try again later.".to_string()
            }
            Self::Backend { message, .. } => message.clone(),
            Self::Network(e) => {
                if e.is_timeout() {
                    "Request timed out.".to_string()
                } else {
                    "Could not reach the backend.".to_string()
                }
            }
            Self::Unreachable(msg) => msg.clone(),
            Self::StorageUnavailable(_) => {
                "Storage is not available; this session will not be saved.".to_string()
            }
            Self::SessionNotFound(_) => "Session not found.".to_string(),
            Self::Busy => "Please wait for current action to finish.".to_string(),
            Self::NoRegenerateAction => "No recent assistant response available.".to_string(),
            Self::Config(msg) => msg.clone(),
            Self::Json(_) => "Received an unexpected response.".to_string(),
            Self::Io(_) => "A local file operation failed.".to_string(),
            Self::Other(msg) => msg.clone(),
        }
    }

    /// True for transport-level failures (as opposed to a backend refusal).
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Unreachable(_))
    }

    /// Map a backend error envelope back into the taxonomy.
    pub fn from_envelope(status: u16, code: &str, message: &str) -> Self {
        let message = if message.trim().is_empty() {
            format!("HTTP {}", status)
        } else {
            message.to_string()
        };
        match code {
            "VALIDATION_ERROR" | "INVALID_JSON" | "BAD_REQUEST" => Self::Validation(message),
            "UNSAFE_INPUT" => Self::UnsafeInput(message),
            "RATE_LIMIT_EXCEEDED" => Self::RateLimited(message),
            "REQUEST_TOO_LARGE" => Self::TooLarge(message),
            _ => Self::Backend {
                code: if code.is_empty() {
                    format!("HTTP_{}", status)
                } else {
                    code.to_string()
                },
                message,
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, NubraError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_envelope_maps_known_codes() {
        assert!(matches!(
            NubraError::from_envelope(400, "UNSAFE_INPUT", "nope"),
            NubraError::UnsafeInput(_)
        ));
        assert!(matches!(
            NubraError::from_envelope(429, "RATE_LIMIT_EXCEEDED", "slow"),
            NubraError::RateLimited(_)
        ));
        match NubraError::from_envelope(500, "", "") {
            NubraError::Backend { code, message } => {
                assert_eq!(code, "HTTP_500");
                assert_eq!(message, "HTTP 500");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_user_message_hides_provider_detail() {
        let err = NubraError::Provider("openai 401: invalid key sk-123".into());
        assert!(!err.user_message().contains("sk-123"));
    }
}

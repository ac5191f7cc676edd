//! Wire protocol between the assistant and its backend relay, plus the
//! [`AssistantBackend`] trait the controller talks through.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Longest `code` / `prompt` the backend accepts, in characters.
pub const MAX_INPUT_CHARS: usize = 20_000;

/// Languages the convert endpoint accepts.
pub const SUPPORTED_LANGUAGES: &[&str] = &["python", "javascript", "pinescript", "other"];

/// Option keys the convert endpoint accepts.
pub const CONVERT_OPTION_KEYS: &[&str] = &["strictSemantics", "addRiskChecks", "explainChanges"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConvertOptions {
    pub strict_semantics: bool,
    pub add_risk_checks: bool,
    pub explain_changes: bool,
}

impl ConvertOptions {
    /// Every option on; what the assistant sends.
    pub fn all() -> Self {
        Self {
            strict_semantics: true,
            add_risk_checks: true,
            explain_changes: true,
        }
    }
}

/// `POST /convert` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvertRequest {
    pub broker: String,
    pub language: String,
    pub code: String,
    #[serde(default)]
    pub options: ConvertOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvertMetadata {
    pub broker: String,
    pub language: String,
}

/// `POST /convert` success body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertResponse {
    pub converted_code: String,
    pub metadata: ConvertMetadata,
}

/// `POST /chat` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub prompt: String,
}

/// `POST /chat` success body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub answer: String,
}

/// Body of every non-2xx backend response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    pub error_code: String,
    pub message: String,
}

impl ErrorEnvelope {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            error_code: code.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

/// Anything that can answer convert and chat requests.
///
/// The HTTP client in `nubra-hub` implements this; tests use scripted mocks.
#[async_trait]
pub trait AssistantBackend: Send + Sync {
    async fn convert(&self, request: ConvertRequest) -> Result<ConvertResponse>;

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse>;

    /// Liveness probe.
    async fn health(&self) -> Result<HealthResponse>;
}

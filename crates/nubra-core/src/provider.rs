//! LLM Provider trait: the abstraction over the chat-completion APIs the
//! relay forwards framed prompts to.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Provider trait: implement this to add support for new completion APIs.
///
/// # Example
///
/// ```rust,ignore
/// struct EchoProvider;
///
/// #[async_trait]
/// impl LlmProvider for EchoProvider {
///     fn name(&self) -> &str { "echo" }
///     fn default_model(&self) -> &str { "echo-1" }
///
///     async fn complete(&self, prompt: &str) -> Result<String> {
///         Ok(prompt.to_string())
///     }
/// }
/// ```
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name (e.g., "openai", "chatbase").
    fn name(&self) -> &str;

    /// Default model for this provider.
    fn default_model(&self) -> &str;

    /// Send one framed user message and return the reply text.
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub provider: String,
    pub model: String,
    pub api_key: Option<String>,
    pub api_base: Option<String>,
    /// Chatbase bot id; unused by OpenAI-compatible providers.
    #[serde(default)]
    pub chatbot_id: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_temperature() -> f32 {
    0.7
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider: "chatbase".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            api_base: None,
            chatbot_id: None,
            max_tokens: 4096,
            temperature: 0.7,
        }
    }
}

//! OpenAI-compatible provider: works with OpenAI, Ollama, OpenRouter, Groq, etc.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use nubra_core::error::{NubraError, Result};
use nubra_core::provider::{LlmProvider, ProviderConfig};

/// OpenAI-compatible provider.
///
/// Works with any API that follows the OpenAI chat completions format:
/// - OpenAI (api.openai.com)
/// - Ollama (localhost:11434)
/// - OpenRouter (openrouter.ai)
/// - Groq, Together, Fireworks, etc.
pub struct OpenAiProvider {
    client: Client,
    config: ProviderConfig,
    api_url: String,
}

impl OpenAiProvider {
    pub fn new(config: ProviderConfig) -> Self {
        let api_base = config
            .api_base
            .clone()
            .unwrap_or_else(|| default_api_base(&config.provider).to_string());

        let api_url = format!("{}/chat/completions", api_base.trim_end_matches('/'));

        Self {
            client: Client::new(),
            config,
            api_url,
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }
}

/// Well-known endpoints by provider name.
fn default_api_base(provider: &str) -> &'static str {
    match provider {
        "ollama" => "http://localhost:11434/v1",
        "openrouter" => "https://openrouter.ai/api/v1",
        "groq" => "https://api.groq.com/openai/v1",
        "gemini" => "https://generativelanguage.googleapis.com/v1beta/openai",
        _ => "https://api.openai.com/v1",
    }
}

/// Internal request body.
#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessageOut<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ApiMessageOut<'a> {
    role: &'a str,
    content: &'a str,
}

/// Internal response body.
#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
    model: String,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Deserialize)]
struct ApiMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

fn clip(text: &str) -> &str {
    nubra_core::message::truncate_chars(text, 200)
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.config.provider
    }

    fn default_model(&self) -> &str {
        &self.config.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        info!("Calling {} model: {}", self.config.provider, self.config.model);

        let mut max_tokens = self.config.max_tokens;
        if self.config.provider == "groq" {
            // Groq's free tier counts max_tokens against a tight per-minute budget.
            max_tokens = max_tokens.min(1024);
        }

        let body = ApiRequest {
            model: &self.config.model,
            messages: vec![ApiMessageOut {
                role: "user",
                content: prompt,
            }],
            max_tokens,
            temperature: self.config.temperature,
        };

        let api_key = self.config.api_key.as_deref().unwrap_or("");

        let resp = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        let body_text = resp.text().await?;

        debug!("API response status: {}, body length: {}", status, body_text.len());

        if !status.is_success() {
            let detail = serde_json::from_str::<ApiError>(&body_text)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| clip(&body_text).to_string());
            return Err(NubraError::Provider(format!(
                "{} API error ({}): {}",
                self.config.provider, status, detail
            )));
        }

        let api_resp: ApiResponse = serde_json::from_str(&body_text).map_err(|e| {
            NubraError::Provider(format!(
                "Failed to parse response: {} (body: {})",
                e,
                clip(&body_text)
            ))
        })?;
        debug!("Answered by model {}", api_resp.model);

        api_resp
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| NubraError::Provider("No content in response".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_url_resolution() {
        let p = OpenAiProvider::new(ProviderConfig {
            provider: "ollama".into(),
            ..Default::default()
        });
        assert_eq!(p.api_url(), "http://localhost:11434/v1/chat/completions");

        let p = OpenAiProvider::new(ProviderConfig {
            provider: "openai".into(),
            api_base: Some("http://proxy.local/v1/".into()),
            ..Default::default()
        });
        assert_eq!(p.api_url(), "http://proxy.local/v1/chat/completions");
    }
}

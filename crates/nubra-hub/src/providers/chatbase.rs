//! Chatbase provider: one user message in, the bot's text out.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use nubra_core::error::{NubraError, Result};
use nubra_core::provider::{LlmProvider, ProviderConfig};

pub const DEFAULT_CHATBASE_BASE: &str = "https://www.chatbase.co";

pub struct ChatbaseProvider {
    client: Client,
    api_key: String,
    chatbot_id: String,
    model: String,
    api_url: String,
}

impl ChatbaseProvider {
    /// Fails with the names of every missing setting.
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let present = |v: &Option<String>| v.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);
        let api_key = present(&config.api_key);
        let chatbot_id = present(&config.chatbot_id);

        let mut missing = Vec::new();
        if api_key.is_none() {
            missing.push("CHATBASE_API_KEY");
        }
        if chatbot_id.is_none() {
            missing.push("CHATBASE_CHATBOT_ID");
        }
        let (Some(api_key), Some(chatbot_id)) = (api_key, chatbot_id) else {
            return Err(NubraError::Config(format!(
                "Chatbase is not configured. Missing: {}",
                missing.join(", ")
            )));
        };

        let base = present(&config.api_base).unwrap_or_else(|| DEFAULT_CHATBASE_BASE.to_string());
        Ok(Self {
            client: Client::new(),
            api_key,
            chatbot_id,
            model: config.model.clone(),
            api_url: format!("{}/api/v1/chat", base.trim_end_matches('/')),
        })
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatbaseRequest<'a> {
    chatbot_id: &'a str,
    messages: [ChatbaseMessage<'a>; 1],
}

#[derive(Serialize)]
struct ChatbaseMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatbaseReply {
    text: Option<String>,
}

#[derive(Deserialize)]
struct ChatbaseError {
    message: Option<String>,
}

#[async_trait]
impl LlmProvider for ChatbaseProvider {
    fn name(&self) -> &str {
        "chatbase"
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        info!("Calling chatbase bot {}", self.chatbot_id);

        let body = ChatbaseRequest {
            chatbot_id: &self.chatbot_id,
            messages: [ChatbaseMessage {
                role: "user",
                content: prompt,
            }],
        };

        let resp = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        let body_text = resp.text().await?;
        debug!("Chatbase status: {}, body length: {}", status, body_text.len());

        if !status.is_success() {
            let detail = serde_json::from_str::<ChatbaseError>(&body_text)
                .ok()
                .and_then(|e| e.message)
                .unwrap_or_default();
            return Err(NubraError::Provider(format!(
                "Chatbase request failed ({}): {}",
                status, detail
            )));
        }

        serde_json::from_str::<ChatbaseReply>(&body_text)
            .ok()
            .and_then(|r| r.text)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                NubraError::Provider("Chatbase returned an unexpected response.".to_string())
            })
    }
}

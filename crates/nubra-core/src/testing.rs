//! Scripted backend shared by the unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::error::{NubraError, Result};
use crate::protocol::{
    AssistantBackend, ChatRequest, ChatResponse, ConvertMetadata, ConvertRequest,
    ConvertResponse, HealthResponse,
};

/// Replays queued replies in order; records every request it sees.
#[derive(Default)]
pub struct ScriptedBackend {
    chat_replies: Mutex<VecDeque<Result<String>>>,
    convert_replies: Mutex<VecDeque<Result<String>>>,
    pub chat_prompts: Mutex<Vec<String>>,
    pub convert_requests: Mutex<Vec<ConvertRequest>>,
    /// When set, chat calls wait for a permit before answering.
    gate: Option<Arc<Notify>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn push_chat(&self, reply: Result<String>) {
        self.chat_replies.lock().unwrap().push_back(reply);
    }

    pub fn push_convert(&self, reply: Result<String>) {
        self.convert_replies.lock().unwrap().push_back(reply);
    }

    pub fn chat_calls(&self) -> usize {
        self.chat_prompts.lock().unwrap().len()
    }

    pub fn last_chat_prompt(&self) -> Option<String> {
        self.chat_prompts.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl AssistantBackend for ScriptedBackend {
    async fn convert(&self, request: ConvertRequest) -> Result<ConvertResponse> {
        self.convert_requests.lock().unwrap().push(request.clone());
        let reply = self
            .convert_replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("converted".to_string()))?;
        Ok(ConvertResponse {
            converted_code: reply,
            metadata: ConvertMetadata {
                broker: request.broker,
                language: request.language,
            },
        })
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        self.chat_prompts.lock().unwrap().push(request.prompt);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        let answer = self
            .chat_replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("ok".to_string()))?;
        Ok(ChatResponse { answer })
    }

    async fn health(&self) -> Result<HealthResponse> {
        Ok(HealthResponse {
            status: "ok".to_string(),
        })
    }
}

/// Error of the kind a backend envelope produces.
pub fn backend_error(message: &str) -> NubraError {
    NubraError::Backend {
        code: "CHAT_FAILED".into(),
        message: message.into(),
    }
}

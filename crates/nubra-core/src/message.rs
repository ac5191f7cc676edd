//! Message types: the transcript entries stored inside a session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role in a conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "System"),
            Self::User => write!(f, "User"),
            Self::Assistant => write!(f, "Assistant"),
        }
    }
}

/// Rendering tag attached to a transcript message.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageKind {
    UserCode,
    UserText,
    ConvertedOutput,
    #[default]
    Normal,
    Warning,
    Explanation,
    Error,
    /// Tag written by another client version; kept verbatim.
    Other(String),
}

impl MessageKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::UserCode => "user_code",
            Self::UserText => "user_text",
            Self::ConvertedOutput => "converted_output",
            Self::Normal => "normal",
            Self::Warning => "warning",
            Self::Explanation => "explanation",
            Self::Error => "error",
            Self::Other(tag) => tag,
        }
    }
}

impl From<String> for MessageKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "user_code" => Self::UserCode,
            "user_text" => Self::UserText,
            "converted_output" => Self::ConvertedOutput,
            "normal" | "" => Self::Normal,
            "warning" => Self::Warning,
            "explanation" => Self::Explanation,
            "error" => Self::Error,
            _ => Self::Other(value),
        }
    }
}

impl From<MessageKind> for String {
    fn from(value: MessageKind) -> Self {
        value.as_str().to_string()
    }
}

/// A single entry in a session transcript.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, content: &str, kind: MessageKind) -> Self {
        Self {
            role,
            content: content.to_string(),
            kind,
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: &str, kind: MessageKind) -> Self {
        Self::new(Role::User, content, kind)
    }

    pub fn assistant(content: &str, kind: MessageKind) -> Self {
        Self::new(Role::Assistant, content, kind)
    }

    pub fn is_error(&self) -> bool {
        self.kind == MessageKind::Error
    }

    /// One transcript line, content trimmed and cut to `limit` characters.
    pub fn snapshot_line(&self, limit: usize) -> String {
        format!("{}: {}", self.role, truncate_chars(self.content.trim(), limit))
    }
}

/// Cut `text` to at most `limit` characters (not bytes).
pub fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Heuristic rendering tag for a chat reply.
pub fn classify_reply(text: &str) -> MessageKind {
    static WARNING: std::sync::LazyLock<regex::Regex> = std::sync::LazyLock::new(|| {
        regex::Regex::new(r"(?i)(warning|mandatory|must update|constraint|risk)")
            .expect("valid warning regex")
    });

    if WARNING.is_match(text) {
        MessageKind::Warning
    } else if text.chars().count() > 700 {
        MessageKind::Explanation
    } else {
        MessageKind::Normal
    }
}

//! Session model: one persisted conversation thread and its derived metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::classifier::SessionMetadata;
use crate::message::{Message, MessageKind, Role};

/// Maximum number of context chunks retained per session.
pub const MAX_CONTEXT_CHUNKS: usize = 4;

/// Maximum length of a user-chosen session name.
pub const MAX_NAME_CHARS: usize = 80;

/// Session category shown in the history list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "String")]
pub enum Category {
    #[default]
    GeneralQuestion,
    OrderPlacement,
    StrategyConversion,
    OrderDebug,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GeneralQuestion => "General Question",
            Self::OrderPlacement => "Order Placement",
            Self::StrategyConversion => "Strategy Conversion",
            Self::OrderDebug => "Order Debug",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Option<String>> for Category {
    fn from(value: Option<String>) -> Self {
        match value.as_deref().unwrap_or_default() {
            "Order Placement" => Self::OrderPlacement,
            "Strategy Conversion" => Self::StrategyConversion,
            "Order Debug" => Self::OrderDebug,
            _ => Self::GeneralQuestion,
        }
    }
}

impl From<Category> for String {
    fn from(value: Category) -> Self {
        value.as_str().to_string()
    }
}

/// Which backend endpoint a turn goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Chat,
    #[default]
    Convert,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Chat => write!(f, "chat"),
            Self::Convert => write!(f, "convert"),
        }
    }
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "chat" => Ok(Self::Chat),
            "convert" => Ok(Self::Convert),
            other => Err(format!("unknown mode '{}', expected chat or convert", other)),
        }
    }
}

/// A bounded synthetic summary of a slice of session history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextChunk {
    pub title: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// Inputs of the most recent successful assistant turn, kept for regenerate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantAction {
    pub mode: Mode,
    #[serde(default)]
    pub request_payload: serde_json::Value,
    #[serde(default)]
    pub user_input: String,
    #[serde(default)]
    pub response_text: String,
}

/// One conversation thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Session {
    pub id: String,
    #[serde(alias = "name")]
    pub display_name: String,
    pub title: String,
    pub category: Category,
    pub broker_hint: String,
    pub pinned: bool,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "lenient_messages")]
    pub messages: Vec<Message>,
    pub user_prompt_count: usize,
    pub last_summarized_user_count: usize,
    pub last_summarized_message_index: usize,
    pub context_summary: String,
    pub context_chunks: Vec<ContextChunk>,
    #[serde(deserialize_with = "lenient_action")]
    pub last_assistant_action: Option<AssistantAction>,
}

impl Default for Session {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            display_name: format!("Session {}", now.format("%Y-%m-%d %H:%M:%S")),
            title: "New Session".to_string(),
            category: Category::GeneralQuestion,
            broker_hint: "Generic".to_string(),
            pinned: false,
            created_at: now,
            updated_at: None,
            messages: Vec::new(),
            user_prompt_count: 0,
            last_summarized_user_count: 0,
            last_summarized_message_index: 0,
            context_summary: String::new(),
            context_chunks: Vec::new(),
            last_assistant_action: None,
        }
    }
}

impl Session {
    /// Fresh session with a time-ordered id.
    pub fn new() -> Self {
        Self {
            id: new_session_id(),
            ..Self::default()
        }
    }

    /// Parse one stored record, backfilling anything older versions omitted.
    ///
    /// Records written before the prompt counter existed get it rebuilt from
    /// their chat messages; a stored counter is always kept as written.
    pub fn from_stored(value: serde_json::Value) -> Option<Self> {
        let has_prompt_count = value
            .get("userPromptCount")
            .is_some_and(|count| !count.is_null());
        match serde_json::from_value::<Session>(value) {
            Ok(mut session) => {
                if !has_prompt_count {
                    session.user_prompt_count = session.count_chat_prompts();
                }
                Some(session.normalize())
            }
            Err(e) => {
                tracing::warn!("Dropping unreadable stored session: {}", e);
                None
            }
        }
    }

    /// Backfill defaults and re-establish the counter invariants.
    pub fn normalize(mut self) -> Self {
        if self.id.trim().is_empty() {
            self.id = new_session_id();
        }
        if self.title.trim().is_empty() {
            self.title = "New Session".to_string();
        }
        if self.display_name.trim().is_empty() {
            self.display_name = self.title.clone();
        }
        if self.broker_hint.trim().is_empty() {
            self.broker_hint = "Generic".to_string();
        }
        self.last_summarized_user_count = self.last_summarized_user_count.min(self.user_prompt_count);
        self.last_summarized_message_index =
            self.last_summarized_message_index.min(self.messages.len());
        if self.context_chunks.len() > MAX_CONTEXT_CHUNKS {
            let excess = self.context_chunks.len() - MAX_CONTEXT_CHUNKS;
            self.context_chunks.drain(..excess);
            self.context_summary = join_chunks(&self.context_chunks);
        }
        self
    }

    /// Chat prompts in the transcript; convert turns are not counted.
    fn count_chat_prompts(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.role == Role::User && m.kind == MessageKind::UserText)
            .count()
    }

    /// Invariants that must hold after every mutation.
    pub fn invariants_hold(&self) -> bool {
        self.last_summarized_user_count <= self.user_prompt_count
            && self.last_summarized_message_index <= self.messages.len()
            && self.context_chunks.len() <= MAX_CONTEXT_CHUNKS
    }

    /// Append a message and bump `updated_at`.
    pub fn push_message(&mut self, msg: Message) {
        self.messages.push(msg);
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = Some(Utc::now());
    }

    /// Timestamp used for recency ordering.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.updated_at.unwrap_or(self.created_at)
    }

    /// Overwrite title, category, broker hint and display name.
    pub fn apply_metadata(&mut self, meta: SessionMetadata) {
        self.display_name = meta.title.clone();
        self.title = meta.title;
        self.category = meta.category;
        self.broker_hint = meta.broker_hint;
    }

    /// Rename; returns false (and leaves the session untouched) for blank names.
    pub fn rename(&mut self, raw: &str) -> bool {
        let name = raw.trim();
        if name.is_empty() {
            return false;
        }
        let name: String = name.chars().take(MAX_NAME_CHARS).collect();
        self.display_name = name.clone();
        self.title = name;
        self.touch();
        true
    }

    pub fn last_assistant_message(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == Role::Assistant)
    }

    /// Append a chunk, keep at most `max_chunks` (never more than
    /// [`MAX_CONTEXT_CHUNKS`]) and recompute the running summary.
    pub fn push_context_chunk(&mut self, chunk: ContextChunk, max_chunks: usize) {
        let cap = max_chunks.clamp(1, MAX_CONTEXT_CHUNKS);
        self.context_chunks.push(chunk);
        if self.context_chunks.len() > cap {
            let excess = self.context_chunks.len() - cap;
            self.context_chunks.drain(..excess);
        }
        self.context_summary = join_chunks(&self.context_chunks);
    }

    /// Case-insensitive match over title, category and broker.
    pub fn matches_query(&self, query: &str) -> bool {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return true;
        }
        let title = if self.title.is_empty() {
            &self.display_name
        } else {
            &self.title
        };
        let haystack = format!("{} {} {}", title, self.category, self.broker_hint).to_lowercase();
        haystack.contains(&query)
    }
}

/// Running summary text built from the retained chunks.
pub fn join_chunks(chunks: &[ContextChunk]) -> String {
    chunks
        .iter()
        .map(|c| format!("{}\n{}", c.title, c.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Opaque, creation-time-derived identifier.
pub fn new_session_id() -> String {
    Uuid::now_v7().to_string()
}

/// Display ordering: pinned first, then most recent activity first. Stable.
pub fn sort_for_display(sessions: &[Session]) -> Vec<&Session> {
    let mut ordered: Vec<&Session> = sessions.iter().collect();
    ordered.sort_by(|a, b| {
        b.pinned
            .cmp(&a.pinned)
            .then_with(|| b.last_activity().cmp(&a.last_activity()))
    });
    ordered
}

fn lenient_messages<'de, D>(deserializer: D) -> Result<Vec<Message>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Vec<serde_json::Value>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .filter_map(|v| serde_json::from_value(v).ok())
        .collect())
}

fn lenient_action<'de, D>(deserializer: D) -> Result<Option<AssistantAction>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|v| serde_json::from_value(v).ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn chunk(n: usize) -> ContextChunk {
        ContextChunk {
            title: format!("Session context ({}-{})", n * 15 - 14, n * 15),
            text: format!("summary {}", n),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_new_session_defaults() {
        let s = Session::new();
        assert!(!s.id.is_empty());
        assert_eq!(s.title, "New Session");
        assert_eq!(s.broker_hint, "Generic");
        assert_eq!(s.category, Category::GeneralQuestion);
        assert!(s.invariants_hold());
    }

    #[test]
    fn test_session_ids_are_unique() {
        let a = Session::new();
        let b = Session::new();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_from_stored_backfills_old_record() {
        let raw = serde_json::json!({
            "id": "1700000000000",
            "name": "Session old",
            "messages": [
                {"role": "user", "content": "buy NIFTY", "type": "user_text", "timestamp": "2024-01-01T00:00:00Z"},
                {"role": "assistant", "content": "ok", "type": "normal", "timestamp": "2024-01-01T00:00:01Z"},
                {"role": "robot", "content": "dropped"}
            ],
            "createdAt": "2024-01-01T00:00:00Z"
        });
        let s = Session::from_stored(raw).unwrap();
        assert_eq!(s.id, "1700000000000");
        assert_eq!(s.display_name, "Session old");
        assert_eq!(s.title, "New Session");
        assert_eq!(s.broker_hint, "Generic");
        assert_eq!(s.messages.len(), 2);
        assert_eq!(s.user_prompt_count, 1);
        assert!(s.context_chunks.is_empty());
        assert!(s.last_assistant_action.is_none());
    }

    #[test]
    fn test_stored_prompt_count_is_kept() {
        let raw = serde_json::json!({
            "id": "convert-only",
            "userPromptCount": 0,
            "messages": [
                {"role": "user", "content": "kite.place_order()", "type": "user_code", "timestamp": "2024-01-01T00:00:00Z"},
                {"role": "assistant", "content": "nubra.place()", "type": "converted_output", "timestamp": "2024-01-01T00:00:01Z"}
            ]
        });
        let s = Session::from_stored(raw).unwrap();
        assert_eq!(s.user_prompt_count, 0);
    }

    #[test]
    fn test_missing_prompt_count_ignores_convert_turns() {
        let raw = serde_json::json!({
            "id": "legacy-mixed",
            "messages": [
                {"role": "user", "content": "kite.place_order()", "type": "user_code", "timestamp": "2024-01-01T00:00:00Z"},
                {"role": "user", "content": "what is a bracket order", "type": "user_text", "timestamp": "2024-01-01T00:00:02Z"}
            ]
        });
        let s = Session::from_stored(raw).unwrap();
        assert_eq!(s.user_prompt_count, 1);
    }

    #[test]
    fn test_null_category_falls_back_to_general() {
        let raw = serde_json::json!({"id": "old", "category": null});
        let s = Session::from_stored(raw).unwrap();
        assert_eq!(s.category, Category::GeneralQuestion);

        let raw = serde_json::json!({"id": "debug", "category": "Order Debug"});
        assert_eq!(Session::from_stored(raw).unwrap().category, Category::OrderDebug);
    }

    #[test]
    fn test_normalize_clamps_markers() {
        let mut s = Session::new();
        s.user_prompt_count = 3;
        s.last_summarized_user_count = 9;
        s.last_summarized_message_index = 50;
        s.context_chunks = (1..=6).map(chunk).collect();
        let s = s.normalize();
        assert!(s.invariants_hold());
        assert_eq!(s.context_chunks.len(), MAX_CONTEXT_CHUNKS);
        assert_eq!(s.context_chunks[0].text, "summary 3");
        assert!(s.context_summary.starts_with("Session context (31-45)\nsummary 3"));
    }

    #[test]
    fn test_invalid_action_is_dropped() {
        let raw = serde_json::json!({"id": "x", "lastAssistantAction": "garbage"});
        let s = Session::from_stored(raw).unwrap();
        assert!(s.last_assistant_action.is_none());
    }

    #[test]
    fn test_push_context_chunk_evicts_oldest() {
        let mut s = Session::new();
        for n in 1..=5 {
            s.push_context_chunk(chunk(n), MAX_CONTEXT_CHUNKS);
        }
        assert_eq!(s.context_chunks.len(), 4);
        assert_eq!(s.context_chunks[0].text, "summary 2");
        assert_eq!(
            s.context_summary.split("\n\n").count(),
            4,
            "one paragraph per retained chunk"
        );
    }

    #[test]
    fn test_rename_rejects_blank_and_truncates() {
        let mut s = Session::new();
        assert!(!s.rename("   "));
        assert_eq!(s.title, "New Session");
        assert!(s.rename(&"x".repeat(120)));
        assert_eq!(s.title.chars().count(), MAX_NAME_CHARS);
        assert_eq!(s.display_name, s.title);
    }

    #[test]
    fn test_sort_pinned_first_then_recent() {
        let base = Utc::now();
        let mut old_pinned = Session::new();
        old_pinned.pinned = true;
        old_pinned.created_at = base - Duration::days(10);
        let mut recent = Session::new();
        recent.created_at = base - Duration::days(5);
        recent.updated_at = Some(base);
        let mut older = Session::new();
        older.created_at = base - Duration::days(3);

        let sessions = vec![older.clone(), recent.clone(), old_pinned.clone()];
        let ordered: Vec<&str> = sort_for_display(&sessions)
            .iter()
            .map(|s| s.id.as_str())
            .collect();
        assert_eq!(ordered, vec![old_pinned.id.as_str(), recent.id.as_str(), older.id.as_str()]);
    }

    #[test]
    fn test_matches_query() {
        let mut s = Session::new();
        s.apply_metadata(SessionMetadata::infer("kite rsi strategy"));
        assert!(s.matches_query("zerodha"));
        assert!(s.matches_query("STRATEGY"));
        assert!(!s.matches_query("binance"));
        assert!(s.matches_query(""));
    }

    #[test]
    fn test_last_assistant_message() {
        let mut s = Session::new();
        s.push_message(Message::user("hi", MessageKind::UserText));
        assert!(s.last_assistant_message().is_none());
        s.push_message(Message::assistant("Error: down", MessageKind::Error));
        assert!(s.last_assistant_message().unwrap().is_error());
    }
}

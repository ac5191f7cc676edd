//! Context compactor: folds older session history into bounded summary
//! chunks once enough new user prompts have piled up.
//!
//! The work is split into a pure [`Compactor::plan`] step, the remote
//! summarization call, and [`Compactor::apply`]. Only `apply` mutates the
//! session, and it advances the markers to the values captured by the plan,
//! so messages appended while the call was in flight stay un-summarized.

use std::collections::HashSet;
use std::sync::Mutex as StdMutex;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::Result;
use crate::message::{Message, Role};
use crate::protocol::{AssistantBackend, ChatRequest};
use crate::session::{ContextChunk, MAX_CONTEXT_CHUNKS, Session};
use crate::store::SessionStore;

/// Compaction tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactorConfig {
    /// New user prompts required before a compaction runs.
    #[serde(default = "default_threshold")]
    pub threshold: usize,
    #[serde(default = "default_max_chunks")]
    pub max_chunks: usize,
    /// Per-message cut applied to the summarized transcript.
    #[serde(default = "default_message_char_limit")]
    pub message_char_limit: usize,
}

fn default_threshold() -> usize {
    15
}

fn default_max_chunks() -> usize {
    MAX_CONTEXT_CHUNKS
}

fn default_message_char_limit() -> usize {
    700
}

impl Default for CompactorConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            max_chunks: default_max_chunks(),
            message_char_limit: default_message_char_limit(),
        }
    }
}

/// Everything captured from a session at the moment compaction was decided.
#[derive(Debug, Clone, PartialEq)]
pub struct CompactionPlan {
    pub session_id: String,
    /// First user prompt covered (1-based).
    pub from: usize,
    /// Last user prompt covered.
    pub to: usize,
    /// Message index the tail ran up to (exclusive).
    pub message_end: usize,
    pub prompt: String,
}

impl CompactionPlan {
    pub fn chunk_title(&self) -> String {
        format!("Session context ({}-{})", self.from, self.to)
    }
}

/// Decides when and how to compact; tracks sessions with a call in flight.
pub struct Compactor {
    config: CompactorConfig,
    in_flight: StdMutex<HashSet<String>>,
}

impl Compactor {
    pub fn new(config: CompactorConfig) -> Self {
        Self {
            config,
            in_flight: StdMutex::new(HashSet::new()),
        }
    }

    pub fn config(&self) -> &CompactorConfig {
        &self.config
    }

    pub fn should_compact(&self, session: &Session) -> bool {
        let threshold = self.config.threshold;
        session.user_prompt_count >= threshold
            && session.user_prompt_count - session.last_summarized_user_count.min(session.user_prompt_count)
                >= threshold
    }

    /// Capture a compaction of the un-summarized tail, if one is due.
    pub fn plan(&self, session: &Session) -> Option<CompactionPlan> {
        if !self.should_compact(session) {
            return None;
        }
        let start = session.last_summarized_message_index.min(session.messages.len());
        let tail = &session.messages[start..];
        if tail.is_empty() {
            return None;
        }

        let transcript = tail
            .iter()
            .map(|m| m.snapshot_line(self.config.message_char_limit))
            .collect::<Vec<_>>()
            .join("\n");

        Some(CompactionPlan {
            session_id: session.id.clone(),
            from: session.last_summarized_user_count + 1,
            to: session.user_prompt_count,
            message_end: session.messages.len(),
            prompt: summarization_prompt(&transcript),
        })
    }

    /// Write a summary produced for `plan` back into the session.
    ///
    /// Returns `false` without touching the session when the summary is blank
    /// or the session has already moved past this plan.
    pub fn apply(&self, session: &mut Session, plan: &CompactionPlan, summary: &str) -> bool {
        let text = summary.trim();
        if text.is_empty()
            || session.id != plan.session_id
            || session.last_summarized_user_count >= plan.to
            || plan.message_end > session.messages.len()
            || plan.to > session.user_prompt_count
        {
            return false;
        }

        session.push_context_chunk(
            ContextChunk {
                title: plan.chunk_title(),
                text: text.to_string(),
                created_at: Utc::now(),
            },
            self.config.max_chunks,
        );
        session.last_summarized_user_count = plan.to;
        session.last_summarized_message_index = plan.message_end;
        session.touch();
        true
    }

    /// Plan, summarize remotely and apply for one session.
    ///
    /// `Ok(false)` means nothing was due, another compaction for the same
    /// session is running, or the summary could not be applied. The store lock
    /// is released for the duration of the remote call.
    pub async fn compact(
        &self,
        store: &Mutex<SessionStore>,
        backend: &dyn AssistantBackend,
        session_id: &str,
    ) -> Result<bool> {
        let plan = {
            let store = store.lock().await;
            match store.session(session_id).and_then(|s| self.plan(s)) {
                Some(plan) => plan,
                None => return Ok(false),
            }
        };

        let Some(_claim) = self.claim(session_id) else {
            tracing::debug!("Compaction already running for session {}", session_id);
            return Ok(false);
        };

        tracing::info!(
            "Compacting session {} prompts {}-{}",
            session_id,
            plan.from,
            plan.to
        );
        let reply = backend
            .chat(ChatRequest {
                prompt: plan.prompt.clone(),
            })
            .await?;

        let mut store = store.lock().await;
        store
            .update_session(session_id, |session| {
                self.apply(session, &plan, &reply.answer)
            })
            .await
    }

    fn claim(&self, session_id: &str) -> Option<InFlightClaim<'_>> {
        let mut set = self.in_flight.lock().ok()?;
        if !set.insert(session_id.to_string()) {
            return None;
        }
        Some(InFlightClaim {
            set: &self.in_flight,
            session_id: session_id.to_string(),
        })
    }
}

impl Default for Compactor {
    fn default() -> Self {
        Self::new(CompactorConfig::default())
    }
}

/// Releases the in-flight marker for a session when dropped.
struct InFlightClaim<'a> {
    set: &'a StdMutex<HashSet<String>>,
    session_id: String,
}

impl Drop for InFlightClaim<'_> {
    fn drop(&mut self) {
        if let Ok(mut set) = self.set.lock() {
            set.remove(&self.session_id);
        }
    }
}

fn summarization_prompt(transcript: &str) -> String {
    [
        "Summarize the following conversation chunk as persistent context for future replies.",
        "Use short numbered steps.",
        "Include:",
        "1) what user asked,",
        "2) what was answered,",
        "3) corrections/changes made,",
        "4) unresolved items.",
        "Keep it compact and factual.",
        "",
        "CONVERSATION CHUNK START",
        transcript,
        "CONVERSATION CHUNK END",
    ]
    .join("\n")
}

/// Recent transcript lines, oldest first, for the contextual chat prompt.
pub fn recent_snapshot(messages: &[Message], count: usize, char_limit: usize) -> String {
    let turns: Vec<&Message> = messages
        .iter()
        .filter(|m| m.role != Role::System)
        .collect();
    let start = turns.len().saturating_sub(count);
    turns[start..]
        .iter()
        .map(|m| m.snapshot_line(char_limit))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageKind;
    use crate::store::MemoryStorage;
    use crate::testing::{ScriptedBackend, backend_error};
    use std::sync::Arc;

    /// Session with `n` chat turns (user + assistant each).
    fn session_with_turns(n: usize) -> Session {
        let mut s = Session::new();
        for i in 1..=n {
            s.push_message(Message::user(&format!("question {}", i), MessageKind::UserText));
            s.push_message(Message::assistant(&format!("answer {}", i), MessageKind::Normal));
        }
        s.user_prompt_count = n;
        s
    }

    #[test]
    fn test_should_compact_threshold() {
        let c = Compactor::default();
        assert!(!c.should_compact(&session_with_turns(14)));
        assert!(c.should_compact(&session_with_turns(15)));

        let mut s = session_with_turns(29);
        s.last_summarized_user_count = 15;
        assert!(!c.should_compact(&s));
        s.user_prompt_count = 30;
        assert!(c.should_compact(&s));
    }

    #[test]
    fn test_plan_truncates_and_frames_transcript() {
        let c = Compactor::default();
        let mut s = session_with_turns(15);
        s.messages[0].content = "x".repeat(900);
        let plan = c.plan(&s).unwrap();
        assert_eq!((plan.from, plan.to, plan.message_end), (1, 15, 30));
        assert!(plan.prompt.starts_with(
            "Summarize the following conversation chunk as persistent context for future replies."
        ));
        assert!(plan.prompt.contains("CONVERSATION CHUNK START\nUser: "));
        assert!(plan.prompt.ends_with("Assistant: answer 15\nCONVERSATION CHUNK END"));
        assert!(plan.prompt.contains(&format!("User: {}\n", "x".repeat(700))));
        assert!(!plan.prompt.contains(&"x".repeat(701)));
    }

    #[test]
    fn test_plan_skips_empty_tail() {
        let c = Compactor::default();
        let mut s = session_with_turns(15);
        s.last_summarized_message_index = s.messages.len();
        assert!(c.plan(&s).is_none());
    }

    #[test]
    fn test_apply_keeps_messages_added_in_flight() {
        let c = Compactor::default();
        let mut s = session_with_turns(15);
        let plan = c.plan(&s).unwrap();

        s.push_message(Message::user("question 16", MessageKind::UserText));
        s.user_prompt_count = 16;

        assert!(c.apply(&mut s, &plan, "1) asked about orders"));
        assert_eq!(s.last_summarized_user_count, 15);
        assert_eq!(s.last_summarized_message_index, 30);
        assert_eq!(s.context_chunks[0].title, "Session context (1-15)");
        assert_eq!(s.context_summary, "Session context (1-15)\n1) asked about orders");
        assert!(s.invariants_hold());

        // A stale replay of the same plan is refused.
        assert!(!c.apply(&mut s, &plan, "again"));
        assert_eq!(s.context_chunks.len(), 1);
    }

    #[test]
    fn test_apply_rejects_blank_summary() {
        let c = Compactor::default();
        let mut s = session_with_turns(15);
        let before = s.clone();
        let plan = c.plan(&s).unwrap();
        assert!(!c.apply(&mut s, &plan, "   "));
        assert_eq!(s, before);
    }

    #[test]
    fn test_rolling_window_of_four_chunks() {
        let c = Compactor::default();
        let mut s = Session::new();
        for round in 1..=5 {
            for i in 0..15 {
                s.push_message(Message::user(&format!("q{}-{}", round, i), MessageKind::UserText));
                s.user_prompt_count += 1;
            }
            let plan = c.plan(&s).unwrap();
            assert!(c.apply(&mut s, &plan, &format!("summary {}", round)));
        }
        assert_eq!(s.context_chunks.len(), 4);
        assert_eq!(s.context_chunks[0].title, "Session context (16-30)");
        assert_eq!(s.context_chunks[3].title, "Session context (61-75)");
        assert_eq!(s.last_summarized_user_count, 75);
        assert!(s.invariants_hold());
    }

    #[tokio::test]
    async fn test_compact_end_to_end() {
        let storage = Arc::new(MemoryStorage::new());
        let mut store = SessionStore::new(storage);
        store.load().await.unwrap();
        let id = store.active_id().to_string();
        store
            .update_session(&id, |s| *s = Session { id: s.id.clone(), ..session_with_turns(15) })
            .await
            .unwrap();
        let store = Mutex::new(store);

        let backend = ScriptedBackend::new();
        backend.push_chat(Ok("1) user asked about RSI".into()));
        let c = Compactor::default();

        assert!(c.compact(&store, &backend, &id).await.unwrap());
        assert_eq!(backend.chat_calls(), 1);
        let store = store.lock().await;
        let s = store.session(&id).unwrap();
        assert_eq!(s.last_summarized_user_count, 15);
        assert_eq!(s.context_chunks.len(), 1);
    }

    #[tokio::test]
    async fn test_compact_failure_leaves_session_untouched() {
        let mut store = SessionStore::new(Arc::new(MemoryStorage::new()));
        store.load().await.unwrap();
        let id = store.active_id().to_string();
        store
            .update_session(&id, |s| *s = Session { id: s.id.clone(), ..session_with_turns(15) })
            .await
            .unwrap();
        let before = store.current().clone();
        let store = Mutex::new(store);

        let backend = ScriptedBackend::new();
        backend.push_chat(Err(backend_error("down")));
        let c = Compactor::default();

        assert!(c.compact(&store, &backend, &id).await.is_err());
        assert_eq!(store.lock().await.current(), &before);
        // The in-flight claim was released.
        assert!(c.claim(&id).is_some());
    }

    #[test]
    fn test_claim_prevents_overlap() {
        let c = Compactor::default();
        let first = c.claim("s1");
        assert!(first.is_some());
        assert!(c.claim("s1").is_none());
        assert!(c.claim("s2").is_some());
        drop(first);
        assert!(c.claim("s1").is_some());
    }

    #[test]
    fn test_recent_snapshot_limits() {
        let s = session_with_turns(6);
        let snap = recent_snapshot(&s.messages, 8, 360);
        assert_eq!(snap.lines().count(), 8);
        assert!(snap.starts_with("User: question 3"));
    }
}

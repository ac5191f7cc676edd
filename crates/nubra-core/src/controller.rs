//! Conversation controller: turn-taking between the user, the session store
//! and the backend.
//!
//! Exactly one primary request (submit or regenerate) runs at a time. The
//! store lock is only held while reading or mutating the session, never
//! across a backend call. Compaction runs on its own task after a successful
//! chat turn and does not hold the busy flag.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::json;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::bus::{AssistantEvent, EventBus};
use crate::classifier::{SessionMetadata, detect_broker, guess_language};
use crate::compactor::{Compactor, recent_snapshot};
use crate::error::{NubraError, Result};
use crate::message::{Message, MessageKind, classify_reply};
use crate::protocol::{AssistantBackend, ChatRequest, ConvertOptions, ConvertRequest};
use crate::session::{AssistantAction, Mode, Session};
use crate::store::SessionStore;

/// Messages included in the contextual prompt snapshot.
pub const RECENT_MESSAGES: usize = 8;
/// Per-message cut in the snapshot.
pub const RECENT_CHARS: usize = 360;

const COMPACTION_NOTICE: &str = "15 prompts reached. Session memory is now compacted automatically.";
const BUSY_NOTICE: &str = "Please wait for current action to finish.";

/// Request about to go out, with the JSON recorded for regenerate.
enum Outbound {
    Convert(ConvertRequest),
    Chat(ChatRequest),
}

impl Outbound {
    fn payload(&self) -> serde_json::Value {
        match self {
            Self::Convert(req) => serde_json::to_value(req).unwrap_or_default(),
            Self::Chat(req) => serde_json::to_value(req).unwrap_or_default(),
        }
    }
}

pub struct ConversationController {
    store: Arc<Mutex<SessionStore>>,
    backend: Arc<dyn AssistantBackend>,
    compactor: Arc<Compactor>,
    bus: Arc<EventBus>,
    busy: AtomicBool,
    compaction: StdMutex<Option<JoinHandle<()>>>,
}

impl ConversationController {
    pub fn new(
        store: Arc<Mutex<SessionStore>>,
        backend: Arc<dyn AssistantBackend>,
        compactor: Arc<Compactor>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            store,
            backend,
            compactor,
            bus,
            busy: AtomicBool::new(false),
            compaction: StdMutex::new(None),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Send one user turn and append the reply (or an error turn).
    ///
    /// Returns the assistant message that was appended. Backend failures are
    /// not errors here: they come back as an `error`-typed message.
    pub async fn submit(&self, mode: Mode, text: &str) -> Result<Message> {
        let input = text.trim();
        if input.is_empty() {
            let notice = match mode {
                Mode::Chat => "Please enter a question.",
                Mode::Convert => "Please paste some code to convert.",
            };
            self.bus.publish(AssistantEvent::error(notice));
            return Err(NubraError::Validation(notice.to_string()));
        }
        let _busy = self.claim()?;

        let (session_id, outbound, prompt_count) = {
            let mut store = self.store.lock().await;
            let session_id = store.active_id().to_string();
            let (outbound, prompt_count) = store
                .update_session(&session_id, |s| {
                    let outbound = match mode {
                        Mode::Chat => {
                            s.user_prompt_count += 1;
                            Outbound::Chat(ChatRequest {
                                prompt: build_contextual_prompt(s, input),
                            })
                        }
                        Mode::Convert => Outbound::Convert(convert_request(input)),
                    };
                    let kind = match mode {
                        Mode::Chat => MessageKind::UserText,
                        Mode::Convert => MessageKind::UserCode,
                    };
                    s.push_message(Message::user(input, kind));
                    s.apply_metadata(SessionMetadata::infer(input));
                    (outbound, s.user_prompt_count)
                })
                .await?;
            (session_id, outbound, prompt_count)
        };
        self.bus.publish(AssistantEvent::SessionUpdated {
            id: session_id.clone(),
        });
        if mode == Mode::Chat && prompt_count == 15 {
            self.bus.publish(AssistantEvent::info(COMPACTION_NOTICE));
        }

        let label = match mode {
            Mode::Chat => "Nubra AI is thinking...",
            Mode::Convert => "Converting code...",
        };
        tracing::debug!("Submitting {} turn ({} chars)", mode, input.len());
        self.bus.publish(AssistantEvent::Typing {
            label: label.to_string(),
        });
        let payload = outbound.payload();
        let result = match outbound {
            Outbound::Convert(req) => self.backend.convert(req).await.map(|r| r.converted_code),
            Outbound::Chat(req) => self.backend.chat(req).await.map(|r| r.answer),
        };
        self.bus.publish(AssistantEvent::TypingDone);

        let reply = non_empty(result).map(|text| {
            let kind = match mode {
                Mode::Chat => classify_reply(&text),
                Mode::Convert => MessageKind::ConvertedOutput,
            };
            let action = AssistantAction {
                mode,
                request_payload: payload,
                user_input: input.to_string(),
                response_text: text.clone(),
            };
            (Message::assistant(&text, kind), action)
        });

        let message = self.record_reply(&session_id, reply).await?;
        if mode == Mode::Chat && !message.is_error() {
            self.maybe_compact(&session_id).await;
        }
        Ok(message)
    }

    /// Re-issue the last request asking for an alternative answer.
    ///
    /// Never appends a user turn and never touches the prompt counter.
    pub async fn regenerate(&self) -> Result<Message> {
        let (session_id, action) = {
            let store = self.store.lock().await;
            let session = store.current();
            match regenerable_action(session) {
                Some(action) => (session.id.clone(), action.clone()),
                None => {
                    self.bus
                        .publish(AssistantEvent::info("No recent assistant response available."));
                    return Err(NubraError::NoRegenerateAction);
                }
            }
        };
        let _busy = self.claim()?;

        self.bus.publish(AssistantEvent::Typing {
            label: "Regenerating response...".to_string(),
        });
        let (prompt, payload) = match action.mode {
            Mode::Convert => (
                alternative_conversion_prompt(&action.user_input),
                action.request_payload.clone(),
            ),
            Mode::Chat => (
                format!(
                    "{}\n\nPlease provide an alternative version with a different structure while keeping correctness.",
                    action.user_input
                ),
                json!({ "prompt": action.user_input }),
            ),
        };
        let result = self.backend.chat(ChatRequest { prompt }).await.map(|r| r.answer);
        self.bus.publish(AssistantEvent::TypingDone);

        let reply = non_empty(result).map(|text| {
            let kind = match action.mode {
                Mode::Convert => MessageKind::ConvertedOutput,
                Mode::Chat => classify_reply(&text),
            };
            let next = AssistantAction {
                mode: action.mode,
                request_payload: payload,
                user_input: action.user_input.clone(),
                response_text: text.clone(),
            };
            (Message::assistant(&text, kind), next)
        });
        self.record_reply(&session_id, reply).await
    }

    /// Whether regenerate would be accepted right now.
    pub async fn can_regenerate(&self) -> bool {
        if self.is_busy() {
            return false;
        }
        let store = self.store.lock().await;
        regenerable_action(store.current()).is_some()
    }

    /// Wait for the most recently scheduled compaction, if any.
    pub async fn wait_for_compaction(&self) {
        let handle = self.compaction.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!("Compaction task ended abnormally: {}", e);
            }
        }
    }

    fn claim(&self) -> Result<BusyGuard<'_>> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            self.bus.publish(AssistantEvent::info(BUSY_NOTICE));
            return Err(NubraError::Busy);
        }
        Ok(BusyGuard(&self.busy))
    }

    /// Append the assistant turn; on success also remember the action.
    async fn record_reply(
        &self,
        session_id: &str,
        reply: Result<(Message, AssistantAction)>,
    ) -> Result<Message> {
        let (message, action) = match reply {
            Ok((message, action)) => (message, Some(action)),
            Err(e) => {
                tracing::warn!("Assistant request failed: {}", e);
                (Message::assistant(&failure_text(&e), MessageKind::Error), None)
            }
        };

        let recorded = {
            let mut store = self.store.lock().await;
            store
                .update_session(session_id, |s| {
                    if let Some(action) = action {
                        s.last_assistant_action = Some(action);
                    }
                    s.push_message(message.clone());
                })
                .await
        };
        match recorded {
            Ok(()) => {
                self.bus.publish(AssistantEvent::SessionUpdated {
                    id: session_id.to_string(),
                });
            }
            // Deleted while the request was in flight
            Err(NubraError::SessionNotFound(_)) => {
                tracing::debug!("Dropping reply for deleted session {}", session_id);
            }
            Err(e) => return Err(e),
        }
        Ok(message)
    }

    async fn maybe_compact(&self, session_id: &str) {
        let due = {
            let store = self.store.lock().await;
            store
                .session(session_id)
                .is_some_and(|s| self.compactor.should_compact(s))
        };
        if !due {
            return;
        }

        let store = self.store.clone();
        let backend = self.backend.clone();
        let compactor = self.compactor.clone();
        let bus = self.bus.clone();
        let id = session_id.to_string();
        let handle = tokio::spawn(async move {
            match compactor.compact(&store, backend.as_ref(), &id).await {
                Ok(true) => {
                    bus.publish(AssistantEvent::info(
                        "Session context updated from last 15 prompts.",
                    ));
                    bus.publish(AssistantEvent::SessionUpdated { id });
                }
                Ok(false) => {}
                Err(e) => tracing::warn!("Context summarization failed: {}", e),
            }
        });
        if let Ok(mut slot) = self.compaction.lock() {
            *slot = Some(handle);
        }
    }
}

/// Clears the busy flag when the primary request finishes.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// The action regenerate would replay, if the session allows it.
fn regenerable_action(session: &Session) -> Option<&AssistantAction> {
    let last_ok = session
        .last_assistant_message()
        .is_some_and(|m| !m.is_error());
    if last_ok {
        session.last_assistant_action.as_ref()
    } else {
        None
    }
}

/// Wrap a chat prompt with the session's running context.
///
/// The snapshot covers messages already in the session, so call this before
/// the new user turn is appended.
pub fn build_contextual_prompt(session: &Session, prompt: &str) -> String {
    let summary = session.context_summary.trim();
    let summary_block = if summary.is_empty() {
        "Summary so far:\n- Session started. No summary yet.".to_string()
    } else {
        format!("Summary so far:\n{}", summary)
    };

    let recent = recent_snapshot(&session.messages, RECENT_MESSAGES, RECENT_CHARS);
    let recent_block = if recent.is_empty() {
        "Recent exchange snapshot:\n- No recent messages.".to_string()
    } else {
        format!("Recent exchange snapshot:\n{}", recent)
    };

    [
        "SESSION PREPROMPT (FOR CONTEXT ONLY):".to_string(),
        format!("Prompt count in this session: {}", session.user_prompt_count),
        summary_block,
        recent_block,
        String::new(),
        "Now answer the user query using this context without repeating full history.".to_string(),
        "USER QUERY START".to_string(),
        prompt.to_string(),
        "USER QUERY END".to_string(),
    ]
    .join("\n")
}

/// Convert payload for pasted source code.
pub fn convert_request(code: &str) -> ConvertRequest {
    ConvertRequest {
        broker: detect_broker(code)
            .map(|b| b.code.to_string())
            .unwrap_or_else(|| "OTHER".to_string()),
        language: guess_language(code).to_string(),
        code: code.to_string(),
        options: ConvertOptions::all(),
    }
}

fn alternative_conversion_prompt(source: &str) -> String {
    [
        "Regenerate an alternative Nubra SDK conversion for the same source code.",
        "Keep trading logic identical, but present a different clean structure.",
        "",
        "SOURCE CODE START",
        source,
        "SOURCE CODE END",
    ]
    .join("\n")
}

fn non_empty(result: Result<String>) -> Result<String> {
    match result {
        Ok(text) if text.trim().is_empty() => Err(NubraError::Backend {
            code: "EMPTY_RESPONSE".into(),
            message: "The assistant returned an empty response.".into(),
        }),
        other => other,
    }
}

/// Transcript text for a failed request.
pub fn failure_text(err: &NubraError) -> String {
    if err.is_network() {
        format!("Network error: {}", err.user_message())
    } else {
        format!("Error: {}", err.user_message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;
    use crate::store::MemoryStorage;
    use crate::testing::{ScriptedBackend, backend_error};
    use tokio::sync::Notify;

    struct Harness {
        controller: Arc<ConversationController>,
        store: Arc<Mutex<SessionStore>>,
        backend: Arc<ScriptedBackend>,
        events: tokio::sync::broadcast::Receiver<AssistantEvent>,
    }

    async fn harness_with(backend: ScriptedBackend) -> Harness {
        let mut store = SessionStore::new(Arc::new(MemoryStorage::new()));
        store.load().await.unwrap();
        let store = Arc::new(Mutex::new(store));
        let backend = Arc::new(backend);
        let bus = Arc::new(EventBus::default());
        let events = bus.subscribe();
        let controller = Arc::new(ConversationController::new(
            store.clone(),
            backend.clone(),
            Arc::new(Compactor::default()),
            bus,
        ));
        Harness {
            controller,
            store,
            backend,
            events,
        }
    }

    async fn harness() -> Harness {
        harness_with(ScriptedBackend::new()).await
    }

    fn notices(rx: &mut tokio::sync::broadcast::Receiver<AssistantEvent>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let AssistantEvent::Notice { text, .. } = event {
                out.push(text);
            }
        }
        out
    }

    #[tokio::test]
    async fn test_blank_input_rejected() {
        let mut h = harness().await;
        let err = h.controller.submit(Mode::Chat, "   ").await.unwrap_err();
        assert!(matches!(err, NubraError::Validation(_)));
        assert!(h.store.lock().await.current().messages.is_empty());
        assert_eq!(notices(&mut h.events), vec!["Please enter a question."]);
    }

    #[tokio::test]
    async fn test_convert_turn() {
        let h = harness().await;
        h.backend.push_convert(Ok("```python\nnubra.place()\n```".into()));
        let code = "from kiteconnect import KiteConnect\nkite.place_order(tradingsymbol='INFY')";
        let reply = h.controller.submit(Mode::Convert, code).await.unwrap();
        assert_eq!(reply.kind, MessageKind::ConvertedOutput);

        let sent = h.backend.convert_requests.lock().unwrap()[0].clone();
        assert_eq!(sent.broker, "ZERODHA");
        assert_eq!(sent.language, "python");
        assert_eq!(sent.options, ConvertOptions::all());

        let store = h.store.lock().await;
        let s = store.current();
        assert_eq!(s.messages.len(), 2);
        assert_eq!(s.messages[0].kind, MessageKind::UserCode);
        assert_eq!(s.user_prompt_count, 0, "convert turns are not chat prompts");
        assert_eq!(s.category.as_str(), "Order Placement");
        assert_eq!(s.broker_hint, "Zerodha Kite");
        let action = s.last_assistant_action.as_ref().unwrap();
        assert_eq!(action.mode, Mode::Convert);
        assert_eq!(action.request_payload["broker"], "ZERODHA");
    }

    #[tokio::test]
    async fn test_chat_turn_sends_contextual_prompt() {
        let h = harness().await;
        h.controller.submit(Mode::Chat, "what is a bracket order").await.unwrap();
        h.backend.push_chat(Ok("Warning: set a stop loss first.".into()));
        let reply = h.controller.submit(Mode::Chat, "and on binance?").await.unwrap();
        assert_eq!(reply.kind, MessageKind::Warning);

        let prompt = h.backend.last_chat_prompt().unwrap();
        assert!(prompt.starts_with("SESSION PREPROMPT (FOR CONTEXT ONLY):\nPrompt count in this session: 2\n"));
        assert!(prompt.contains("Summary so far:\n- Session started. No summary yet."));
        assert!(prompt.contains("Recent exchange snapshot:\nUser: what is a bracket order\nAssistant: ok\n"));
        assert!(prompt.ends_with("USER QUERY START\nand on binance?\nUSER QUERY END"));

        let store = h.store.lock().await;
        assert_eq!(store.current().user_prompt_count, 2);
        assert_eq!(store.current().broker_hint, "Binance");
    }

    #[test]
    fn test_contextual_prompt_limits_snapshot() {
        let mut s = Session::new();
        for i in 0..12 {
            s.push_message(Message::user(&format!("{}{}", i, "y".repeat(500)), MessageKind::UserText));
        }
        s.user_prompt_count = 12;
        s.context_summary = "Session context (1-15)\nearlier".into();
        let prompt = build_contextual_prompt(&s, "next");
        let snapshot: Vec<&str> = prompt.lines().filter(|l| l.starts_with("User: ")).collect();
        assert_eq!(snapshot.len(), 8);
        assert!(snapshot[0].starts_with("User: 4"));
        assert!(snapshot.iter().all(|l| l.chars().count() == "User: ".len() + 360));
        assert!(prompt.contains("Summary so far:\nSession context (1-15)\nearlier"));
    }

    #[tokio::test]
    async fn test_backend_error_becomes_error_turn() {
        let h = harness().await;
        h.controller.submit(Mode::Chat, "first").await.unwrap();
        let action_before = h.store.lock().await.current().last_assistant_action.clone();

        h.backend.push_chat(Err(backend_error("Chat service is not available.")));
        let reply = h.controller.submit(Mode::Chat, "second").await.unwrap();
        assert!(reply.is_error());
        assert_eq!(reply.content, "Error: Chat service is not available.");
        let store = h.store.lock().await;
        assert_eq!(store.current().last_assistant_action, action_before);
    }

    #[tokio::test]
    async fn test_network_error_text() {
        let h = harness().await;
        h.backend
            .push_convert(Err(NubraError::Unreachable("Could not reach local backend on port 3000.".into())));
        let reply = h.controller.submit(Mode::Convert, "x = 1").await.unwrap();
        assert_eq!(
            reply.content,
            "Network error: Could not reach local backend on port 3000."
        );
    }

    #[tokio::test]
    async fn test_empty_reply_is_an_error() {
        let h = harness().await;
        h.backend.push_chat(Ok("   ".into()));
        let reply = h.controller.submit(Mode::Chat, "hello").await.unwrap();
        assert!(reply.is_error());
        assert!(h.store.lock().await.current().last_assistant_action.is_none());
    }

    #[tokio::test]
    async fn test_second_submit_while_busy_is_rejected() {
        let gate = Arc::new(Notify::new());
        let mut h = harness_with(ScriptedBackend::gated(gate.clone())).await;

        let controller = h.controller.clone();
        let first = tokio::spawn(async move { controller.submit(Mode::Chat, "slow one").await });
        while h.backend.chat_calls() == 0 {
            tokio::task::yield_now().await;
        }
        assert!(h.controller.is_busy());
        assert!(!h.controller.can_regenerate().await);

        let err = h.controller.submit(Mode::Chat, "impatient").await.unwrap_err();
        assert!(matches!(err, NubraError::Busy));
        assert!(notices(&mut h.events).contains(&BUSY_NOTICE.to_string()));

        gate.notify_one();
        first.await.unwrap().unwrap();
        assert!(!h.controller.is_busy());
        let store = h.store.lock().await;
        let users = store
            .current()
            .messages
            .iter()
            .filter(|m| m.role == Role::User)
            .count();
        assert_eq!(users, 1, "rejected submission is not queued");
    }

    #[tokio::test]
    async fn test_reply_for_deleted_session_is_dropped() {
        let gate = Arc::new(Notify::new());
        let h = harness_with(ScriptedBackend::gated(gate.clone())).await;
        let original = h.store.lock().await.active_id().to_string();

        let controller = h.controller.clone();
        let pending = tokio::spawn(async move { controller.submit(Mode::Chat, "still there?").await });
        while h.backend.chat_calls() == 0 {
            tokio::task::yield_now().await;
        }
        h.store.lock().await.delete_session(&original).await.unwrap();

        gate.notify_one();
        let reply = pending.await.unwrap().unwrap();
        assert_eq!(reply.content, "ok");
        assert!(!h.controller.is_busy());

        let store = h.store.lock().await;
        assert!(store.session(&original).is_none());
        assert!(store.current().messages.is_empty());
    }

    #[tokio::test]
    async fn test_fifteenth_prompt_notifies_and_compacts() {
        let mut h = harness().await;
        {
            let mut store = h.store.lock().await;
            let id = store.active_id().to_string();
            store
                .update_session(&id, |s| {
                    for i in 0..14 {
                        s.push_message(Message::user(&format!("q{}", i), MessageKind::UserText));
                        s.push_message(Message::assistant(&format!("a{}", i), MessageKind::Normal));
                    }
                    s.user_prompt_count = 14;
                })
                .await
                .unwrap();
        }
        h.backend.push_chat(Ok("fifteenth answer".into()));
        h.backend.push_chat(Ok("1) asked things".into()));

        h.controller.submit(Mode::Chat, "q14").await.unwrap();
        h.controller.wait_for_compaction().await;

        assert_eq!(h.backend.chat_calls(), 2);
        assert!(
            h.backend
                .last_chat_prompt()
                .unwrap()
                .starts_with("Summarize the following conversation chunk")
        );
        let texts = notices(&mut h.events);
        assert_eq!(texts.iter().filter(|t| *t == COMPACTION_NOTICE).count(), 1);
        assert!(texts.contains(&"Session context updated from last 15 prompts.".to_string()));

        let store = h.store.lock().await;
        let s = store.current();
        assert_eq!(s.last_summarized_user_count, 15);
        assert_eq!(s.last_summarized_message_index, 30);
        assert_eq!(s.context_chunks[0].title, "Session context (1-15)");

        // A 16th prompt does not repeat the notice.
        drop(store);
        h.controller.submit(Mode::Chat, "q15").await.unwrap();
        assert!(!notices(&mut h.events).contains(&COMPACTION_NOTICE.to_string()));
    }

    #[tokio::test]
    async fn test_regenerate_chat_appends_without_user_turn() {
        let h = harness().await;
        h.controller.submit(Mode::Chat, "explain ema").await.unwrap();
        assert!(h.controller.can_regenerate().await);

        h.backend.push_chat(Ok("alternative".into()));
        let reply = h.controller.regenerate().await.unwrap();
        assert_eq!(reply.content, "alternative");
        assert_eq!(
            h.backend.last_chat_prompt().unwrap(),
            "explain ema\n\nPlease provide an alternative version with a different structure while keeping correctness."
        );

        let store = h.store.lock().await;
        let s = store.current();
        assert_eq!(s.messages.len(), 3);
        assert_eq!(s.user_prompt_count, 1);
        assert_eq!(s.last_assistant_action.as_ref().unwrap().response_text, "alternative");
    }

    #[tokio::test]
    async fn test_regenerate_convert_goes_through_chat() {
        let h = harness().await;
        h.controller.submit(Mode::Convert, "buy(10)").await.unwrap();
        h.backend.push_chat(Ok("```python\nalt()\n```".into()));
        let reply = h.controller.regenerate().await.unwrap();
        assert_eq!(reply.kind, MessageKind::ConvertedOutput);

        let prompt = h.backend.last_chat_prompt().unwrap();
        assert!(prompt.starts_with("Regenerate an alternative Nubra SDK conversion for the same source code."));
        assert!(prompt.ends_with("SOURCE CODE START\nbuy(10)\nSOURCE CODE END"));
        assert_eq!(h.backend.convert_requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_regenerate_unavailable_without_action_or_after_error() {
        let mut h = harness().await;
        assert!(matches!(
            h.controller.regenerate().await,
            Err(NubraError::NoRegenerateAction)
        ));
        assert_eq!(notices(&mut h.events), vec!["No recent assistant response available."]);

        h.controller.submit(Mode::Chat, "hi").await.unwrap();
        h.backend.push_chat(Err(backend_error("down")));
        h.controller.submit(Mode::Chat, "again").await.unwrap();
        assert!(!h.controller.can_regenerate().await);
        assert!(matches!(
            h.controller.regenerate().await,
            Err(NubraError::NoRegenerateAction)
        ));
    }

    #[test]
    fn test_convert_request_defaults_to_other() {
        let req = convert_request("just words");
        assert_eq!(req.broker, "OTHER");
        assert_eq!(req.language, "other");
    }
}

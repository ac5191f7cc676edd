//! Event Bus: async pub/sub between the assistant core and its front end.
//!
//! Commands flow in over an mpsc queue (front end → dispatcher); events flow
//! out over a broadcast channel (core → any number of views).

use std::sync::Arc;
use tokio::sync::{Mutex, broadcast, mpsc};

use crate::assistant::AssistantCommand;

/// Severity of a transient notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Success,
    Error,
}

/// Something the front end should reflect.
#[derive(Debug, Clone, PartialEq)]
pub enum AssistantEvent {
    /// A request is in flight; show a typing indicator with this label.
    Typing { label: String },
    /// The in-flight request finished (either way).
    TypingDone,
    /// Transient toast-style message.
    Notice { level: NoticeLevel, text: String },
    /// A session's persisted state changed; re-render it.
    SessionUpdated { id: String },
}

impl AssistantEvent {
    pub fn info(text: impl Into<String>) -> Self {
        Self::Notice {
            level: NoticeLevel::Info,
            text: text.into(),
        }
    }

    pub fn success(text: impl Into<String>) -> Self {
        Self::Notice {
            level: NoticeLevel::Success,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::Notice {
            level: NoticeLevel::Error,
            text: text.into(),
        }
    }

    /// One-line status for terminal front ends; `None` for events with no text.
    pub fn format_status(&self) -> Option<String> {
        match self {
            Self::Typing { label } => Some(format!("⏳ {}", label)),
            Self::Notice { level, text } => {
                let icon = match level {
                    NoticeLevel::Info => "ℹ️ ",
                    NoticeLevel::Success => "✅",
                    NoticeLevel::Error => "❌",
                };
                Some(format!("{} {}", icon, text))
            }
            Self::TypingDone | Self::SessionUpdated { .. } => None,
        }
    }
}

/// The event bus shared by the assistant and its views.
pub struct EventBus {
    command_tx: mpsc::Sender<AssistantCommand>,
    command_rx: Arc<Mutex<mpsc::Receiver<AssistantCommand>>>,
    event_tx: broadcast::Sender<AssistantEvent>,
}

impl EventBus {
    pub fn new(buffer_size: usize) -> Self {
        let (command_tx, command_rx) = mpsc::channel(buffer_size);
        let (event_tx, _) = broadcast::channel(buffer_size);

        Self {
            command_tx,
            command_rx: Arc::new(Mutex::new(command_rx)),
            event_tx,
        }
    }

    /// Queue a command for the dispatcher.
    pub async fn send_command(&self, command: AssistantCommand) {
        if let Err(e) = self.command_tx.send(command).await {
            tracing::error!("Failed to queue command: {}", e);
        }
    }

    /// Next queued command (dispatcher consumes).
    pub async fn recv_command(&self) -> Option<AssistantCommand> {
        let mut rx = self.command_rx.lock().await;
        rx.recv().await
    }

    /// Clone of the command sender, for front ends running on their own task.
    pub fn command_sender(&self) -> mpsc::Sender<AssistantCommand> {
        self.command_tx.clone()
    }

    /// Publish an event. Dropped silently when nobody is listening.
    pub fn publish(&self, event: AssistantEvent) {
        let _ = self.event_tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AssistantEvent> {
        self.event_tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

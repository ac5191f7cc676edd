//! Assistant: owns the store, compactor, controller and bus for one front
//! end, and routes every [`AssistantCommand`] through a single dispatcher.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::bus::{AssistantEvent, EventBus};
use crate::compactor::{Compactor, CompactorConfig};
use crate::controller::ConversationController;
use crate::error::{NubraError, Result};
use crate::message::Message;
use crate::protocol::AssistantBackend;
use crate::renderer::{Block, Renderer};
use crate::session::Mode;
use crate::store::{SessionStore, StorageArea, Theme, View};

/// Everything a front end can ask the assistant to do.
#[derive(Debug, Clone, PartialEq)]
pub enum AssistantCommand {
    /// Send text in the current mode.
    Submit { text: String },
    SetMode(Mode),
    Regenerate,
    NewSession,
    LoadSession(String),
    DeleteSession(String),
    RenameSession { id: String, name: String },
    TogglePin(String),
    ShowHistory,
    ShowChat,
    SetTheme(Theme),
}

pub struct Assistant {
    store: Arc<Mutex<SessionStore>>,
    controller: Arc<ConversationController>,
    bus: Arc<EventBus>,
    sync_task: JoinHandle<()>,
}

impl Assistant {
    /// Load persisted state and start following external storage changes.
    ///
    /// An unreachable storage area is reported as a notice; the assistant
    /// still starts with a fresh in-memory session.
    pub async fn start(
        storage: Arc<dyn StorageArea>,
        backend: Arc<dyn AssistantBackend>,
        compactor: CompactorConfig,
    ) -> Self {
        let bus = Arc::new(EventBus::default());
        let mut store = SessionStore::new(storage.clone());
        if let Err(e) = store.load().await {
            bus.publish(AssistantEvent::error(e.user_message()));
        }
        tracing::info!(
            "Assistant ready with {} sessions ({} storage)",
            store.sessions().len(),
            storage.name()
        );

        let store = Arc::new(Mutex::new(store));
        let controller = Arc::new(ConversationController::new(
            store.clone(),
            backend,
            Arc::new(Compactor::new(compactor)),
            bus.clone(),
        ));
        let sync_task = spawn_storage_sync(storage, store.clone(), bus.clone());

        Self {
            store,
            controller,
            bus,
            sync_task,
        }
    }

    pub fn store(&self) -> Arc<Mutex<SessionStore>> {
        self.store.clone()
    }

    pub fn bus(&self) -> Arc<EventBus> {
        self.bus.clone()
    }

    pub fn controller(&self) -> Arc<ConversationController> {
        self.controller.clone()
    }

    /// Handle one command. Returns the assistant message for turn commands.
    pub async fn dispatch(&self, command: AssistantCommand) -> Result<Option<Message>> {
        tracing::debug!("Dispatching {:?}", command);
        match command {
            AssistantCommand::Submit { text } => {
                let mode = self.store.lock().await.ui_state().mode;
                self.controller.submit(mode, &text).await.map(Some)
            }
            AssistantCommand::Regenerate => self.controller.regenerate().await.map(Some),
            other => {
                if let Err(e) = self.apply_store_command(other).await {
                    self.bus.publish(AssistantEvent::error(e.user_message()));
                    return Err(e);
                }
                Ok(None)
            }
        }
    }

    /// Consume commands from the bus until every sender is gone.
    pub async fn run(&self) {
        while let Some(command) = self.bus.recv_command().await {
            if let Err(e) = self.dispatch(command).await {
                tracing::debug!("Command rejected: {}", e);
            }
        }
    }

    /// Render a message with the current session's title as naming fallback.
    pub async fn render(&self, message: &Message) -> Vec<Block> {
        let title = self.store.lock().await.current().title.clone();
        Renderer::with_session_title(title).render(&message.content)
    }

    /// Let a pending compaction finish before the process exits.
    pub async fn shutdown(&self) {
        self.controller.wait_for_compaction().await;
        self.sync_task.abort();
    }

    async fn apply_store_command(&self, command: AssistantCommand) -> Result<()> {
        let mut store = self.store.lock().await;
        match command {
            AssistantCommand::SetMode(mode) => {
                let mut ui = store.ui_state();
                ui.mode = mode;
                store.set_ui_state(ui).await;
            }
            AssistantCommand::NewSession => {
                let id = store.create_session().await;
                let mut ui = store.ui_state();
                ui.view = View::Chat;
                store.set_ui_state(ui).await;
                self.bus.publish(AssistantEvent::SessionUpdated { id });
            }
            AssistantCommand::LoadSession(id) => {
                store.load_session(&id).await?;
                let mut ui = store.ui_state();
                ui.view = View::Chat;
                store.set_ui_state(ui).await;
                let name = store.current().display_name.clone();
                self.bus
                    .publish(AssistantEvent::success(format!("Loaded session: {}", name)));
                self.bus.publish(AssistantEvent::SessionUpdated { id });
            }
            AssistantCommand::DeleteSession(id) => {
                store.delete_session(&id).await?;
                self.bus.publish(AssistantEvent::info("Session deleted"));
                self.bus.publish(AssistantEvent::SessionUpdated {
                    id: store.active_id().to_string(),
                });
            }
            AssistantCommand::RenameSession { id, name } => {
                store.rename_session(&id, &name).await?;
                self.bus.publish(AssistantEvent::success("Session renamed."));
                self.bus.publish(AssistantEvent::SessionUpdated { id });
            }
            AssistantCommand::TogglePin(id) => {
                store.toggle_pin(&id).await?;
                self.bus.publish(AssistantEvent::SessionUpdated { id });
            }
            AssistantCommand::ShowHistory | AssistantCommand::ShowChat => {
                let mut ui = store.ui_state();
                ui.view = if command == AssistantCommand::ShowHistory {
                    View::History
                } else {
                    View::Chat
                };
                store.set_ui_state(ui).await;
            }
            AssistantCommand::SetTheme(theme) => store.set_theme(theme).await,
            AssistantCommand::Submit { .. } | AssistantCommand::Regenerate => {
                return Err(NubraError::Other("not a store command".into()));
            }
        }
        Ok(())
    }
}

impl Drop for Assistant {
    fn drop(&mut self) {
        self.sync_task.abort();
    }
}

fn spawn_storage_sync(
    storage: Arc<dyn StorageArea>,
    store: Arc<Mutex<SessionStore>>,
    bus: Arc<EventBus>,
) -> JoinHandle<()> {
    let mut rx = storage.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(change) => {
                    let mut store = store.lock().await;
                    if store.apply_change(&change) {
                        bus.publish(AssistantEvent::SessionUpdated {
                            id: store.active_id().to_string(),
                        });
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Storage sync lagged, skipped {} changes", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

//! Session store: the session collection, the active pointer and their
//! write-through persistence in a key-value [`StorageArea`].
//!
//! Every mutation persists the whole collection (last writer wins). Changes
//! written by another store instance arrive through [`StorageArea::subscribe`]
//! and are folded back in with [`SessionStore::apply_change`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::{NubraError, Result};
use crate::session::{Mode, Session, sort_for_display};

pub const KEY_SESSIONS: &str = "nubraAllSessions";
pub const KEY_ACTIVE_SESSION: &str = "nubraActiveSessionId";
pub const KEY_UI_STATE: &str = "nubraUiState";
pub const KEY_THEME: &str = "nubraTheme";

/// One key written to a storage area.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageChange {
    pub key: String,
    pub new_value: Value,
    /// Identifier of the writer, so a store can skip its own echoes.
    pub origin: String,
}

/// An async key-value area with change notification.
#[async_trait]
pub trait StorageArea: Send + Sync {
    fn name(&self) -> &str;

    /// Fetch the given keys. Missing keys are simply absent from the map.
    async fn get(&self, keys: &[&str]) -> Result<HashMap<String, Value>>;

    /// Write entries and broadcast one [`StorageChange`] per key.
    async fn set(&self, origin: &str, entries: Vec<(String, Value)>) -> Result<()>;

    fn subscribe(&self) -> broadcast::Receiver<StorageChange>;
}

/// In-process storage area, used in tests and when nothing persistent exists.
pub struct MemoryStorage {
    entries: std::sync::Mutex<HashMap<String, Value>>,
    changes: broadcast::Sender<StorageChange>,
    available: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            entries: std::sync::Mutex::new(HashMap::new()),
            changes,
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the area going away (every call fails while unavailable).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(NubraError::StorageUnavailable("memory area disabled".into()))
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageArea for MemoryStorage {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, keys: &[&str]) -> Result<HashMap<String, Value>> {
        self.check()?;
        let entries = self
            .entries
            .lock()
            .map_err(|_| NubraError::StorageUnavailable("memory area poisoned".into()))?;
        Ok(keys
            .iter()
            .filter_map(|k| entries.get(*k).map(|v| (k.to_string(), v.clone())))
            .collect())
    }

    async fn set(&self, origin: &str, entries: Vec<(String, Value)>) -> Result<()> {
        self.check()?;
        {
            let mut store = self
                .entries
                .lock()
                .map_err(|_| NubraError::StorageUnavailable("memory area poisoned".into()))?;
            for (key, value) in &entries {
                store.insert(key.clone(), value.clone());
            }
        }
        for (key, new_value) in entries {
            let _ = self.changes.send(StorageChange {
                key,
                new_value,
                origin: origin.to_string(),
            });
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}

/// Which panel the front end shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum View {
    #[default]
    Chat,
    History,
}

/// Persisted UI record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UiState {
    pub view: View,
    pub mode: Mode,
}

impl UiState {
    /// Lenient parse: anything unrecognised falls back to chat view / convert mode.
    pub fn from_value(value: &Value) -> Self {
        let view = match value.get("view").and_then(Value::as_str) {
            Some("history") => View::History,
            _ => View::Chat,
        };
        let mode = match value.get("mode").and_then(Value::as_str) {
            Some("chat") => Mode::Chat,
            _ => Mode::Convert,
        };
        Self { view, mode }
    }
}

/// Colour scheme preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Night,
    Glass,
}

impl Theme {
    pub fn from_value(value: &Value) -> Self {
        match value.as_str() {
            Some("glass") => Self::Glass,
            _ => Self::Night,
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Self::Night => Self::Glass,
            Self::Glass => Self::Night,
        }
    }
}

/// Callback invoked with the current session after an external change.
pub type StoreObserver = Box<dyn Fn(&Session) + Send + Sync>;

/// Owns every session plus the active pointer. Never empty.
pub struct SessionStore {
    storage: Arc<dyn StorageArea>,
    origin: String,
    sessions: Vec<Session>,
    active_id: String,
    ui_state: UiState,
    theme: Theme,
    observers: Vec<StoreObserver>,
}

impl SessionStore {
    /// Store holding one fresh, unsaved session. Call [`load`](Self::load) next.
    pub fn new(storage: Arc<dyn StorageArea>) -> Self {
        let session = Session::new();
        Self {
            storage,
            origin: uuid::Uuid::now_v7().to_string(),
            active_id: session.id.clone(),
            sessions: vec![session],
            ui_state: UiState::default(),
            theme: Theme::default(),
            observers: Vec::new(),
        }
    }

    pub fn storage(&self) -> Arc<dyn StorageArea> {
        self.storage.clone()
    }

    /// Read everything from storage and normalize it.
    ///
    /// When the area is unreachable the store keeps a fresh in-memory session
    /// and returns [`NubraError::StorageUnavailable`] so the caller can warn.
    pub async fn load(&mut self) -> Result<()> {
        let keys = [KEY_SESSIONS, KEY_ACTIVE_SESSION, KEY_UI_STATE, KEY_THEME];
        let stored = match self.storage.get(&keys).await {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!("Storage not available, using an empty session: {}", e);
                let session = Session::new();
                self.active_id = session.id.clone();
                self.sessions = vec![session];
                return Err(NubraError::StorageUnavailable(e.to_string()));
            }
        };

        self.sessions = stored
            .get(KEY_SESSIONS)
            .map(parse_sessions)
            .unwrap_or_default();
        if let Some(id) = stored.get(KEY_ACTIVE_SESSION).and_then(Value::as_str) {
            self.active_id = id.to_string();
        }
        if let Some(ui) = stored.get(KEY_UI_STATE) {
            self.ui_state = UiState::from_value(ui);
        }
        if let Some(theme) = stored.get(KEY_THEME) {
            self.theme = Theme::from_value(theme);
        }

        tracing::debug!(
            "Loaded {} sessions from {} storage",
            self.sessions.len(),
            self.storage.name()
        );

        if self.sessions.is_empty() {
            self.create_session().await;
        } else {
            self.reconcile();
        }
        Ok(())
    }

    /// Persist the collection and active pointer. Failures are logged only.
    pub async fn save(&self) {
        let sessions = match serde_json::to_value(&self.sessions) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("Could not serialize sessions: {}", e);
                return;
            }
        };
        let entries = vec![
            (KEY_SESSIONS.to_string(), sessions),
            (KEY_ACTIVE_SESSION.to_string(), Value::String(self.active_id.clone())),
        ];
        if let Err(e) = self.storage.set(&self.origin, entries).await {
            tracing::warn!("Could not save sessions: {}", e);
        }
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn active_id(&self) -> &str {
        &self.active_id
    }

    pub fn current(&self) -> &Session {
        &self.sessions[self.current_index()]
    }

    pub fn session(&self, id: &str) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == id)
    }

    /// Sessions in display order: pinned first, then most recent.
    pub fn ordered(&self) -> Vec<&Session> {
        sort_for_display(&self.sessions)
    }

    /// Display-ordered sessions matching `query`.
    pub fn search(&self, query: &str) -> Vec<&Session> {
        self.ordered()
            .into_iter()
            .filter(|s| s.matches_query(query))
            .collect()
    }

    /// Prepend a fresh session, make it active and persist. Returns its id.
    pub async fn create_session(&mut self) -> String {
        let session = Session::new();
        let id = session.id.clone();
        self.sessions.insert(0, session);
        self.active_id = id.clone();
        self.save().await;
        id
    }

    /// Remove a session. Deleting the active one creates a replacement.
    pub async fn delete_session(&mut self, id: &str) -> Result<()> {
        let before = self.sessions.len();
        self.sessions.retain(|s| s.id != id);
        if self.sessions.len() == before {
            return Err(NubraError::SessionNotFound(id.to_string()));
        }

        if self.active_id == id || self.sessions.is_empty() {
            // create_session persists
            self.create_session().await;
        } else {
            self.save().await;
        }
        Ok(())
    }

    pub async fn rename_session(&mut self, id: &str, name: &str) -> Result<()> {
        let session = self
            .sessions
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| NubraError::SessionNotFound(id.to_string()))?;
        if !session.rename(name) {
            return Err(NubraError::Validation("Session name cannot be empty.".into()));
        }
        self.save().await;
        Ok(())
    }

    /// Flip the pin flag; returns the new value.
    pub async fn toggle_pin(&mut self, id: &str) -> Result<bool> {
        let session = self
            .sessions
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| NubraError::SessionNotFound(id.to_string()))?;
        session.pinned = !session.pinned;
        let pinned = session.pinned;
        self.save().await;
        Ok(pinned)
    }

    /// Make `id` the active session.
    pub async fn load_session(&mut self, id: &str) -> Result<()> {
        if self.session(id).is_none() {
            return Err(NubraError::SessionNotFound(id.to_string()));
        }
        self.active_id = id.to_string();
        self.save().await;
        Ok(())
    }

    /// Mutate one session in place and persist. Returns whatever `f` returns.
    pub async fn update_session<F, R>(&mut self, id: &str, f: F) -> Result<R>
    where
        F: FnOnce(&mut Session) -> R,
    {
        let session = self
            .sessions
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| NubraError::SessionNotFound(id.to_string()))?;
        let out = f(session);
        debug_assert!(session.invariants_hold());
        self.save().await;
        Ok(out)
    }

    pub fn ui_state(&self) -> UiState {
        self.ui_state
    }

    pub async fn set_ui_state(&mut self, ui_state: UiState) {
        self.ui_state = ui_state;
        let value = match serde_json::to_value(ui_state) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("Could not serialize UI state: {}", e);
                return;
            }
        };
        if let Err(e) = self
            .storage
            .set(&self.origin, vec![(KEY_UI_STATE.to_string(), value)])
            .await
        {
            tracing::warn!("Could not save UI state: {}", e);
        }
    }

    pub fn theme(&self) -> Theme {
        self.theme
    }

    pub async fn set_theme(&mut self, theme: Theme) {
        self.theme = theme;
        let value = match serde_json::to_value(theme) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("Could not serialize theme: {}", e);
                return;
            }
        };
        if let Err(e) = self
            .storage
            .set(&self.origin, vec![(KEY_THEME.to_string(), value)])
            .await
        {
            tracing::warn!("Could not save theme: {}", e);
        }
    }

    /// Register a callback run after each reconciled external change.
    pub fn on_change<F>(&mut self, observer: F)
    where
        F: Fn(&Session) + Send + Sync + 'static,
    {
        self.observers.push(Box::new(observer));
    }

    /// Fold a change written by another store into this one.
    ///
    /// Returns `false` for echoes of our own writes and for keys we do not own.
    /// Applying the same change twice leaves the store unchanged.
    pub fn apply_change(&mut self, change: &StorageChange) -> bool {
        if change.origin == self.origin {
            return false;
        }
        match change.key.as_str() {
            KEY_SESSIONS => self.sessions = parse_sessions(&change.new_value),
            KEY_ACTIVE_SESSION => {
                if let Some(id) = change.new_value.as_str() {
                    self.active_id = id.to_string();
                }
            }
            KEY_UI_STATE => self.ui_state = UiState::from_value(&change.new_value),
            KEY_THEME => self.theme = Theme::from_value(&change.new_value),
            _ => return false,
        }

        self.reconcile();
        tracing::debug!("Applied external change to {}", change.key);
        let current = self.current();
        for observer in &self.observers {
            observer(current);
        }
        true
    }

    /// Point the active id at an existing session, creating one if none exist.
    fn reconcile(&mut self) {
        if self.sessions.is_empty() {
            let session = Session::new();
            self.active_id = session.id.clone();
            self.sessions.push(session);
            return;
        }
        if self.session(&self.active_id).is_none() {
            self.active_id = self.sessions[0].id.clone();
        }
    }

    fn current_index(&self) -> usize {
        self.sessions
            .iter()
            .position(|s| s.id == self.active_id)
            .unwrap_or(0)
    }
}

fn parse_sessions(value: &Value) -> Vec<Session> {
    match value.as_array() {
        Some(items) => items
            .iter()
            .cloned()
            .filter_map(Session::from_stored)
            .collect(),
        None => Vec::new(),
    }
}

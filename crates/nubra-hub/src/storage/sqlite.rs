//! SQLite-backed storage area: the persistent home of sessions, the active
//! pointer, UI state and theme.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use nubra_core::error::{NubraError, Result};
use nubra_core::store::{StorageArea, StorageChange};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS kv (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        version INTEGER NOT NULL DEFAULT 0,
        origin TEXT NOT NULL DEFAULT '',
        updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
    );";

const UPSERT: &str = "INSERT INTO kv (key, value, version, origin, updated_at)
        VALUES (?1, ?2, 1, ?3, CURRENT_TIMESTAMP)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                                       version = kv.version + 1,
                                       origin = excluded.origin,
                                       updated_at = excluded.updated_at
        RETURNING version";

/// Key-value storage area in a single SQLite table.
///
/// Writes made through this handle are broadcast immediately. Writes made by
/// other handles on the same file (another `nubra` process) are picked up by
/// [`SqliteStorage::poll_changes`], which [`SqliteStorage::watch`] runs
/// periodically.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
    changes: broadcast::Sender<StorageChange>,
    /// Last row version this handle has seen, per key.
    seen: Mutex<HashMap<String, i64>>,
}

fn storage_err(e: impl std::fmt::Display) -> NubraError {
    NubraError::StorageUnavailable(e.to_string())
}

impl SqliteStorage {
    /// Open or create a SQLite database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(storage_err)?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(storage_err)?;
        Self::with_connection(conn)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(storage_err)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA).map_err(storage_err)?;
        // Databases from before change tracking lack these columns
        let _ = conn.execute(
            "ALTER TABLE kv ADD COLUMN version INTEGER NOT NULL DEFAULT 0",
            [],
        );
        let _ = conn.execute("ALTER TABLE kv ADD COLUMN origin TEXT NOT NULL DEFAULT ''", []);

        let seen = {
            let mut stmt = conn
                .prepare("SELECT key, version FROM kv")
                .map_err(storage_err)?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
                .map_err(storage_err)?;
            rows.collect::<std::result::Result<HashMap<_, _>, _>>()
                .map_err(storage_err)?
        };

        let (changes, _) = broadcast::channel(64);
        Ok(Self {
            conn: Mutex::new(conn),
            changes,
            seen: Mutex::new(seen),
        })
    }

    /// Number of stored keys.
    pub fn len(&self) -> Result<usize> {
        let conn = self.conn.lock().map_err(storage_err)?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM kv", [], |row| row.get(0))
            .map_err(storage_err)?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Broadcast rows written by other handles since the last look.
    ///
    /// Returns how many changes were published.
    pub fn poll_changes(&self) -> Result<usize> {
        let conn = self.conn.lock().map_err(storage_err)?;
        let mut stmt = conn
            .prepare("SELECT key, value, version, origin FROM kv")
            .map_err(storage_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(storage_err)?;

        let mut seen = self.seen.lock().map_err(storage_err)?;
        let mut published = 0;
        for row in rows {
            let (key, raw, version, origin) = row.map_err(storage_err)?;
            if seen.get(&key).is_some_and(|known| *known >= version) {
                continue;
            }
            seen.insert(key.clone(), version);
            let new_value = match serde_json::from_str(&raw) {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!("Ignoring unreadable external value for {}: {}", key, e);
                    continue;
                }
            };
            tracing::debug!("External change to {} (version {})", key, version);
            let _ = self.changes.send(StorageChange {
                key,
                new_value,
                origin,
            });
            published += 1;
        }
        Ok(published)
    }

    /// Poll for external changes every `every` until the storage is dropped.
    pub fn watch(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let storage: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(every).await;
                let Some(storage) = storage.upgrade() else {
                    break;
                };
                if let Err(e) = storage.poll_changes() {
                    tracing::warn!("Could not check for external session changes: {}", e);
                }
            }
        })
    }
}

#[async_trait]
impl StorageArea for SqliteStorage {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn get(&self, keys: &[&str]) -> Result<HashMap<String, Value>> {
        let conn = self.conn.lock().map_err(storage_err)?;
        let mut stmt = conn
            .prepare("SELECT value FROM kv WHERE key = ?1")
            .map_err(storage_err)?;

        let mut found = HashMap::new();
        for key in keys {
            let raw: Option<String> = stmt
                .query_row(params![key], |row| row.get(0))
                .optional()
                .map_err(storage_err)?;
            let Some(raw) = raw else { continue };
            match serde_json::from_str(&raw) {
                Ok(value) => {
                    found.insert(key.to_string(), value);
                }
                Err(e) => tracing::warn!("Ignoring unreadable value for {}: {}", key, e),
            }
        }
        Ok(found)
    }

    async fn set(&self, origin: &str, entries: Vec<(String, Value)>) -> Result<()> {
        {
            let mut conn = self.conn.lock().map_err(storage_err)?;
            let tx = conn.transaction().map_err(storage_err)?;
            let mut versions = Vec::with_capacity(entries.len());
            for (key, value) in &entries {
                let version: i64 = tx
                    .query_row(UPSERT, params![key, value.to_string(), origin], |row| {
                        row.get(0)
                    })
                    .map_err(storage_err)?;
                versions.push((key.clone(), version));
            }
            tx.commit().map_err(storage_err)?;

            // Still under the connection lock so a poll cannot re-announce these
            let mut seen = self.seen.lock().map_err(storage_err)?;
            seen.extend(versions);
        }
        tracing::debug!("Stored {} keys", entries.len());

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

#[cfg(test)]
mod tests {
    use super::*;
    use nubra_core::session::Session;
    use nubra_core::store::{KEY_ACTIVE_SESSION, KEY_SESSIONS, SessionStore};
    use serde_json::json;

    #[tokio::test]
    async fn test_set_get_and_overwrite() {
        let storage = SqliteStorage::in_memory().unwrap();
        storage
            .set("a", vec![("k".into(), json!({"x": 1}))])
            .await
            .unwrap();
        storage.set("a", vec![("k".into(), json!([1, 2]))]).await.unwrap();

        let got = storage.get(&["k", "missing"]).await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got["k"], json!([1, 2]));
        assert_eq!(storage.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_changes_are_broadcast_with_origin() {
        let storage = SqliteStorage::in_memory().unwrap();
        let mut rx = storage.subscribe();
        storage
            .set("writer-1", vec![("theme".into(), json!("glass"))])
            .await
            .unwrap();
        let change = rx.recv().await.unwrap();
        assert_eq!(change.key, "theme");
        assert_eq!(change.origin, "writer-1");
        assert_eq!(change.new_value, json!("glass"));
    }

    #[tokio::test]
    async fn test_sessions_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("nubra.db");

        let (id, name) = {
            let storage = Arc::new(SqliteStorage::open(&path).unwrap());
            let mut store = SessionStore::new(storage);
            store.load().await.unwrap();
            let id = store.active_id().to_string();
            store.rename_session(&id, "My NIFTY work").await.unwrap();
            (id, store.current().display_name.clone())
        };

        let storage = Arc::new(SqliteStorage::open(&path).unwrap());
        let raw = storage.get(&[KEY_SESSIONS, KEY_ACTIVE_SESSION]).await.unwrap();
        assert_eq!(raw[KEY_ACTIVE_SESSION], json!(id));

        let mut store = SessionStore::new(storage);
        store.load().await.unwrap();
        assert_eq!(store.active_id(), id);
        assert_eq!(store.current().display_name, name);
    }

    #[tokio::test]
    async fn test_legacy_records_are_normalized() {
        let storage = Arc::new(SqliteStorage::in_memory().unwrap());
        storage
            .set(
                "legacy",
                vec![(
                    KEY_SESSIONS.into(),
                    json!([{
                        "id": "old-1",
                        "name": "Old chat",
                        "messages": [
                            {"role": "user", "content": "hi", "type": "user_text", "timestamp": "2025-01-01T00:00:00Z"},
                            {"garbage": true}
                        ],
                        "lastSummarizedUserCount": 9
                    }]),
                )],
            )
            .await
            .unwrap();

        let mut store = SessionStore::new(storage);
        store.load().await.unwrap();
        let session: &Session = store.current();
        assert_eq!(session.id, "old-1");
        assert_eq!(session.display_name, "Old chat");
        assert_eq!(session.messages.len(), 1);
        assert!(session.invariants_hold());
    }

    #[tokio::test]
    async fn test_second_handle_sees_external_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.db");
        let writer = SqliteStorage::open(&path).unwrap();
        let reader = SqliteStorage::open(&path).unwrap();
        let mut rx = reader.subscribe();

        writer
            .set("store-a", vec![("nubraTheme".into(), json!("glass"))])
            .await
            .unwrap();
        assert_eq!(reader.poll_changes().unwrap(), 1);
        let change = rx.try_recv().unwrap();
        assert_eq!(change.key, "nubraTheme");
        assert_eq!(change.origin, "store-a");
        assert_eq!(change.new_value, json!("glass"));

        // Nothing new, and the reader's own writes are not re-announced
        assert_eq!(reader.poll_changes().unwrap(), 0);
        reader
            .set("store-b", vec![("nubraTheme".into(), json!("night"))])
            .await
            .unwrap();
        let _ = rx.try_recv();
        assert_eq!(reader.poll_changes().unwrap(), 0);
        assert_eq!(writer.poll_changes().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_stores_on_separate_handles_stay_in_sync() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.db");
        let a = Arc::new(SqliteStorage::open(&path).unwrap());
        let b = Arc::new(SqliteStorage::open(&path).unwrap());

        let mut store_a = SessionStore::new(a.clone());
        store_a.load().await.unwrap();
        let mut store_b = SessionStore::new(b.clone());
        store_b.load().await.unwrap();
        let mut rx = b.subscribe();

        let created = store_a.create_session().await;
        let _watcher = b.watch(Duration::from_millis(10));

        let mut applied = false;
        while let Ok(Ok(change)) =
            tokio::time::timeout(Duration::from_secs(2), rx.recv()).await
        {
            applied |= store_b.apply_change(&change);
            if store_b.active_id() == created {
                break;
            }
        }
        assert!(applied);
        assert_eq!(store_b.active_id(), created);
        assert_eq!(store_b.sessions().len(), 2);
    }

    #[test]
    fn test_old_schema_is_migrated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE kv (key TEXT PRIMARY KEY, value TEXT NOT NULL,
                     updated_at DATETIME DEFAULT CURRENT_TIMESTAMP);
                 INSERT INTO kv (key, value) VALUES ('nubraTheme', '\"night\"');",
            )
            .unwrap();
        }
        let storage = SqliteStorage::open(&path).unwrap();
        assert_eq!(storage.len().unwrap(), 1);
        assert_eq!(storage.poll_changes().unwrap(), 0);
    }
}

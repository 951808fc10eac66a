use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use super::StateStore;
use crate::error::{Result, SyncError};
use crate::state::{admit, StateDocument};

const BACKEND: &str = "sqlite";

/// Durable local store: one row holding the JSON document.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(|e| SyncError::persistence(BACKEND, e))?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| SyncError::persistence(BACKEND, e))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.initialize()?;
        Ok(store)
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS state_document (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                body TEXT NOT NULL,
                last_updated INTEGER NOT NULL,
                last_updated_by TEXT NOT NULL,
                written_at TEXT NOT NULL
            )",
            [],
        )
        .map_err(|e| SyncError::persistence(BACKEND, e))?;

        Ok(())
    }

    fn load(conn: &Connection) -> Result<Option<StateDocument>> {
        let body: Option<String> = conn
            .query_row("SELECT body FROM state_document WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()
            .map_err(|e| SyncError::persistence(BACKEND, e))?;

        body.map(|json| {
            serde_json::from_str(&json)
                .map_err(|e| SyncError::persistence(BACKEND, format!("corrupt stored document: {e}")))
        })
        .transpose()
    }

    fn store(conn: &Connection, doc: &StateDocument) -> Result<()> {
        let body = serde_json::to_string(doc)?;

        conn.execute(
            "INSERT INTO state_document (id, body, last_updated, last_updated_by, written_at)
             VALUES (1, ?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                body = excluded.body,
                last_updated = excluded.last_updated,
                last_updated_by = excluded.last_updated_by,
                written_at = excluded.written_at",
            params![
                body,
                doc.last_updated,
                doc.last_updated_by,
                chrono::Utc::now().to_rfc3339(),
            ],
        )
        .map_err(|e| SyncError::persistence(BACKEND, e))?;

        Ok(())
    }

    /// Read, compare and write inside one immediate transaction, so a second
    /// process sharing the file cannot interleave between the read and the
    /// write.
    fn admit_and_store(conn: &mut Connection, doc: &StateDocument) -> Result<StateDocument> {
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| SyncError::persistence(BACKEND, e))?;

        let winner = match Self::load(&tx)? {
            Some(current) if !admit(doc, Some(&current)).is_accepted() => current,
            _ => {
                Self::store(&tx, doc)?;
                doc.clone()
            }
        };

        tx.commit().map_err(|e| SyncError::persistence(BACKEND, e))?;
        Ok(winner)
    }
}

#[async_trait]
impl StateStore for SqliteStore {
    fn name(&self) -> &'static str {
        BACKEND
    }

    async fn get_state(&self) -> Result<Option<StateDocument>> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || Self::load(&conn.lock()))
            .await
            .map_err(|err| SyncError::persistence(BACKEND, format!("failed to join database task: {err}")))?
    }

    async fn save_state(&self, doc: &StateDocument) -> Result<StateDocument> {
        let conn = self.conn.clone();
        let doc = doc.clone();

        tokio::task::spawn_blocking(move || Self::admit_and_store(&mut conn.lock(), &doc))
            .await
            .map_err(|err| SyncError::persistence(BACKEND, format!("failed to join database task: {err}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ControlMode;
    use tempfile::TempDir;

    #[tokio::test]
    async fn empty_database_has_no_state() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.get_state().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/state.db");

        let mut doc = StateDocument::default();
        doc.control_mode = ControlMode::Manual;
        doc.stamp("client-a", 1234);

        {
            let store = SqliteStore::open(&path).unwrap();
            store.save_state(&doc).await.unwrap();
        }

        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(reopened.get_state().await.unwrap(), Some(doc));
    }

    #[tokio::test]
    async fn save_replaces_the_single_row() {
        let store = SqliteStore::in_memory().unwrap();

        let mut first = StateDocument::default();
        first.last_updated = 1;
        store.save_state(&first).await.unwrap();

        let mut second = first.clone();
        second.control_mode = ControlMode::Semi;
        second.last_updated = 2;
        store.save_state(&second).await.unwrap();

        let count: i64 = store
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM state_document", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(store.get_state().await.unwrap(), Some(second));
    }

    #[tokio::test]
    async fn save_of_get_is_a_no_op() {
        let store = SqliteStore::in_memory().unwrap();
        let mut doc = StateDocument::default();
        doc.last_updated = 99;
        store.save_state(&doc).await.unwrap();

        let current = store.get_state().await.unwrap().unwrap();
        store.save_state(&current).await.unwrap();
        assert_eq!(store.get_state().await.unwrap(), Some(doc));
    }

    #[tokio::test]
    async fn older_write_keeps_newer_document() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.db");
        let first = SqliteStore::open(&path).unwrap();
        let second = SqliteStore::open(&path).unwrap();

        let mut newer = StateDocument::default();
        newer.control_mode = ControlMode::Manual;
        newer.stamp("fast-clock", 2_000);
        first.save_state(&newer).await.unwrap();

        let mut older = StateDocument::default();
        older.control_mode = ControlMode::Semi;
        older.stamp("slow-clock", 1_500);

        assert_eq!(second.save_state(&older).await.unwrap(), newer);
        assert_eq!(first.get_state().await.unwrap(), Some(newer));
    }
}

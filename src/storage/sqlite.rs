use super::Storage;
use crate::error::{BridgeError, Result};
use crate::types::{to_iso, Message};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

pub(crate) const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS seen (
        id TEXT PRIMARY KEY
    );
    CREATE TABLE IF NOT EXISTS checkpoints (
        name  TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS outbox (
        id        TEXT PRIMARY KEY,
        body      TEXT NOT NULL,
        queued_at TEXT NOT NULL
    );
"#;

/// Embedded single-file backend.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| BridgeError::storage(format!("connection lock poisoned: {}", e)))
    }
}

fn insert_outbox(conn: &Connection, msg: &Message) -> Result<()> {
    let body = serde_json::to_string(msg)?;
    conn.execute(
        "INSERT OR IGNORE INTO outbox (id, body, queued_at) VALUES (?1, ?2, ?3)",
        params![msg.id, body, to_iso(Utc::now())],
    )?;
    Ok(())
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn is_seen(&self, id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let hit: Option<i64> = conn
            .query_row("SELECT 1 FROM seen WHERE id = ?1", params![id], |row| row.get(0))
            .optional()?;
        Ok(hit.is_some())
    }

    async fn set_seen(&self, id: &str) -> Result<()> {
        self.conn()?
            .execute("INSERT OR IGNORE INTO seen (id) VALUES (?1)", params![id])?;
        Ok(())
    }

    async fn get_checkpoint(&self, name: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM checkpoints WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    async fn set_checkpoint(&self, name: &str, value: &str) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO checkpoints (name, value) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET value=excluded.value",
            params![name, value],
        )?;
        Ok(())
    }

    async fn enqueue(&self, msg: &Message) -> Result<()> {
        let conn = self.conn()?;
        insert_outbox(&conn, msg)
    }

    async fn dequeue(&self, id: &str) -> Result<()> {
        self.conn()?
            .execute("DELETE FROM outbox WHERE id = ?1", params![id])?;
        Ok(())
    }

    async fn list_queued(&self) -> Result<Vec<Message>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT body FROM outbox ORDER BY queued_at, id")?;
        let bodies = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        bodies
            .iter()
            .map(|b| serde_json::from_str(b).map_err(BridgeError::from))
            .collect()
    }

    async fn admit(&self, msg: &Message) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let inserted = tx.execute("INSERT OR IGNORE INTO seen (id) VALUES (?1)", params![msg.id])?;
        if inserted == 0 {
            return Ok(false);
        }
        insert_outbox(&tx, msg)?;
        tx.commit()?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn message(id: &str) -> Message {
        Message {
            id: id.to_string(),
            eui: "70b3d57ed0001234".into(),
            timestamp: "2024-03-01T10:00:00.000Z".into(),
            received: "2024-03-01T10:00:01.000Z".into(),
            data: "AQI=".into(),
            encrypted: false,
            origin: json!({"fcnt": 1}),
        }
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("bridge.db");
        {
            let store = SqliteStorage::open(&path).unwrap();
            assert!(store.admit(&message("net:1:1")).await.unwrap());
            store.set_checkpoint("pull:net:cursor", "2024-03-01T00:00:00Z").await.unwrap();
        }
        let store = SqliteStorage::open(&path).unwrap();
        assert!(store.is_seen("net:1:1").await.unwrap());
        assert_eq!(
            store.get_checkpoint("pull:net:cursor").await.unwrap().as_deref(),
            Some("2024-03-01T00:00:00Z")
        );
        let queued = store.list_queued().await.unwrap();
        assert_eq!(queued, vec![message("net:1:1")]);
    }

    #[tokio::test]
    async fn test_duplicate_enqueue_is_noop() {
        let dir = tempdir().unwrap();
        let store = SqliteStorage::open(dir.path().join("bridge.db")).unwrap();
        store.enqueue(&message("net:1:1")).await.unwrap();
        let mut changed = message("net:1:1");
        changed.data = "BBBB".into();
        store.enqueue(&changed).await.unwrap();
        let queued = store.list_queued().await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].data, "AQI=");
    }

    #[tokio::test]
    async fn test_admit_rejects_seen_ids() {
        let dir = tempdir().unwrap();
        let store = SqliteStorage::open(dir.path().join("bridge.db")).unwrap();
        store.set_seen("net:1:1").await.unwrap();
        assert!(!store.admit(&message("net:1:1")).await.unwrap());
        assert!(store.list_queued().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dequeue_removes_only_target() {
        let dir = tempdir().unwrap();
        let store = SqliteStorage::open(dir.path().join("bridge.db")).unwrap();
        store.admit(&message("net:1:1")).await.unwrap();
        store.admit(&message("net:1:2")).await.unwrap();
        store.dequeue("net:1:1").await.unwrap();
        let ids: Vec<String> = store.list_queued().await.unwrap().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["net:1:2".to_string()]);
        // seen set is append-only
        assert!(store.is_seen("net:1:1").await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_checkpoint_is_none() {
        let dir = tempdir().unwrap();
        let store = SqliteStorage::open(dir.path().join("bridge.db")).unwrap();
        assert_eq!(store.get_checkpoint("pull:other:cursor").await.unwrap(), None);
    }
}

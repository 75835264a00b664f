use super::sqlite::SCHEMA;
use super::Storage;
use crate::error::{BridgeError, Result};
use crate::types::{to_iso, Message};
use async_trait::async_trait;
use chrono::Utc;
use libsql::{Builder, Connection, Database};
use tracing::info;

/// Client/server backend: a libSQL (Turso) database reached over the network.
pub struct LibsqlStorage {
    db: Database,
}

impl LibsqlStorage {
    /// Connect to the remote database and make sure the schema exists
    pub async fn connect(url: &str, auth_token: Option<String>) -> Result<Self> {
        let token = auth_token.ok_or_else(|| {
            BridgeError::Config("libSQL storage needs an auth token (LIBSQL_AUTH_TOKEN)".into())
        })?;

        info!("Connecting to libSQL database at {}", url);

        let db = Builder::new_remote(url.to_string(), token)
            .build()
            .await
            .map_err(|e| BridgeError::Storage {
                message: format!("Failed to connect to database: {e}"),
            })?;

        let storage = Self { db };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Get a connection to the database
    fn get_connection(&self) -> Result<Connection> {
        self.db.connect().map_err(|e| BridgeError::Storage {
            message: format!("Failed to get database connection: {e}"),
        })
    }

    async fn run_migrations(&self) -> Result<()> {
        let conn = self.get_connection()?;
        conn.execute_batch(SCHEMA)
            .await
            .map_err(|e| BridgeError::Storage {
                message: format!("Failed to run migrations: {e}"),
            })?;
        info!("libSQL schema ready");
        Ok(())
    }
}

async fn insert_outbox(conn: &Connection, msg: &Message) -> Result<()> {
    let body = serde_json::to_string(msg)?;
    conn.execute(
        "INSERT OR IGNORE INTO outbox (id, body, queued_at) VALUES (?1, ?2, ?3)",
        libsql::params![msg.id.as_str(), body, to_iso(Utc::now())],
    )
    .await?;
    Ok(())
}

#[async_trait]
impl Storage for LibsqlStorage {
    async fn is_seen(&self, id: &str) -> Result<bool> {
        let conn = self.get_connection()?;
        let mut rows = conn
            .query("SELECT 1 FROM seen WHERE id = ?1", libsql::params![id])
            .await?;
        Ok(rows.next().await?.is_some())
    }

    async fn set_seen(&self, id: &str) -> Result<()> {
        let conn = self.get_connection()?;
        conn.execute("INSERT OR IGNORE INTO seen (id) VALUES (?1)", libsql::params![id])
            .await?;
        Ok(())
    }

    async fn get_checkpoint(&self, name: &str) -> Result<Option<String>> {
        let conn = self.get_connection()?;
        let mut rows = conn
            .query(
                "SELECT value FROM checkpoints WHERE name = ?1",
                libsql::params![name],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row.get::<String>(0)?)),
            None => Ok(None),
        }
    }

    async fn set_checkpoint(&self, name: &str, value: &str) -> Result<()> {
        let conn = self.get_connection()?;
        conn.execute(
            "INSERT INTO checkpoints (name, value) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET value=excluded.value",
            libsql::params![name, value],
        )
        .await?;
        Ok(())
    }

    async fn enqueue(&self, msg: &Message) -> Result<()> {
        let conn = self.get_connection()?;
        insert_outbox(&conn, msg).await
    }

    async fn dequeue(&self, id: &str) -> Result<()> {
        let conn = self.get_connection()?;
        conn.execute("DELETE FROM outbox WHERE id = ?1", libsql::params![id])
            .await?;
        Ok(())
    }

    async fn list_queued(&self) -> Result<Vec<Message>> {
        let conn = self.get_connection()?;
        let mut rows = conn.query("SELECT body FROM outbox ORDER BY queued_at, id", ()).await?;
        let mut results = Vec::new();
        while let Some(row) = rows.next().await? {
            let body: String = row.get(0)?;
            results.push(serde_json::from_str(&body)?);
        }
        Ok(results)
    }

    async fn admit(&self, msg: &Message) -> Result<bool> {
        let conn = self.get_connection()?;
        let tx = conn.transaction().await?;
        let inserted = tx
            .execute(
                "INSERT OR IGNORE INTO seen (id) VALUES (?1)",
                libsql::params![msg.id.as_str()],
            )
            .await?;
        if inserted == 0 {
            tx.rollback().await?;
            return Ok(false);
        }
        insert_outbox(&tx, msg).await?;
        tx.commit().await?;
        Ok(true)
    }
}

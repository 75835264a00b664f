use crate::error::{BridgeError, Result};
use crate::types::Message;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

pub mod in_memory;
#[cfg(feature = "db")]
pub mod remote;
pub mod sqlite;

pub use in_memory::InMemoryStorage;
pub use sqlite::SqliteStorage;

/// Durable state shared by the queue manager and the pull adapters:
/// the seen-id set, adapter checkpoints and the outbox.
#[async_trait]
pub trait Storage: Send + Sync {
    // Seen set (append-only)
    async fn is_seen(&self, id: &str) -> Result<bool>;
    async fn set_seen(&self, id: &str) -> Result<()>;

    // Checkpoints
    async fn get_checkpoint(&self, name: &str) -> Result<Option<String>>;
    async fn set_checkpoint(&self, name: &str, value: &str) -> Result<()>;

    // Outbox; enqueue of an existing id is a no-op
    async fn enqueue(&self, msg: &Message) -> Result<()>;
    async fn dequeue(&self, id: &str) -> Result<()>;
    async fn list_queued(&self) -> Result<Vec<Message>>;

    /// Marks `msg.id` seen and enqueues it in one transaction.
    /// Returns `false` without writing anything when the id was already seen.
    async fn admit(&self, msg: &Message) -> Result<bool>;
}

/// Backend named by a connection descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageDescriptor {
    Sqlite(PathBuf),
    Libsql { url: String, auth_token: Option<String> },
    Memory,
}

impl StorageDescriptor {
    pub fn parse(descriptor: &str) -> Result<Self> {
        let d = descriptor.trim();
        if let Some(path) = d.strip_prefix("sqlite://").or_else(|| d.strip_prefix("file:")) {
            if path.is_empty() {
                return Err(BridgeError::Config(format!(
                    "storage descriptor '{}' has no path",
                    descriptor
                )));
            }
            return Ok(StorageDescriptor::Sqlite(PathBuf::from(path)));
        }
        if d.starts_with("libsql://") || d.starts_with("https://") || d.starts_with("http://") {
            let (url, token) = split_auth_token(d);
            let auth_token = token.or_else(|| std::env::var("LIBSQL_AUTH_TOKEN").ok());
            return Ok(StorageDescriptor::Libsql { url, auth_token });
        }
        if d == "memory:" || d == "memory" {
            return Ok(StorageDescriptor::Memory);
        }
        Err(BridgeError::Config(format!(
            "unsupported storage descriptor '{}' (expected sqlite://, file:, libsql://, https:// or memory:)",
            descriptor
        )))
    }
}

fn split_auth_token(url: &str) -> (String, Option<String>) {
    let Some((base, query)) = url.split_once('?') else {
        return (url.to_string(), None);
    };
    let mut token = None;
    let rest: Vec<&str> = query
        .split('&')
        .filter(|kv| match kv.strip_prefix("authToken=") {
            Some(t) => {
                token = Some(t.to_string());
                false
            }
            None => !kv.is_empty(),
        })
        .collect();
    if rest.is_empty() {
        (base.to_string(), token)
    } else {
        (format!("{}?{}", base, rest.join("&")), token)
    }
}

/// Opens the backend a descriptor names.
pub async fn open_storage(descriptor: &str) -> Result<Arc<dyn Storage>> {
    match StorageDescriptor::parse(descriptor)? {
        StorageDescriptor::Sqlite(path) => {
            info!("Opening SQLite storage at {}", path.display());
            Ok(Arc::new(SqliteStorage::open(&path)?))
        }
        StorageDescriptor::Memory => {
            info!("Using in-memory storage; state will not survive a restart");
            Ok(Arc::new(InMemoryStorage::new()))
        }
        #[cfg(feature = "db")]
        StorageDescriptor::Libsql { url, auth_token } => {
            info!("Connecting to libSQL storage at {}", url);
            Ok(Arc::new(remote::LibsqlStorage::connect(&url, auth_token).await?))
        }
        #[cfg(not(feature = "db"))]
        StorageDescriptor::Libsql { url, .. } => Err(BridgeError::Config(format!(
            "storage '{}' needs the `db` feature",
            url
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sqlite_descriptors() {
        assert_eq!(
            StorageDescriptor::parse("sqlite://data/bridge.db").unwrap(),
            StorageDescriptor::Sqlite(PathBuf::from("data/bridge.db"))
        );
        assert_eq!(
            StorageDescriptor::parse("file:/var/lib/bridge.db").unwrap(),
            StorageDescriptor::Sqlite(PathBuf::from("/var/lib/bridge.db"))
        );
    }

    #[test]
    fn test_parse_libsql_with_token() {
        assert_eq!(
            StorageDescriptor::parse("libsql://bridge.turso.io?authToken=abc").unwrap(),
            StorageDescriptor::Libsql {
                url: "libsql://bridge.turso.io".into(),
                auth_token: Some("abc".into())
            }
        );
    }

    #[test]
    fn test_parse_memory_and_unknown() {
        assert_eq!(StorageDescriptor::parse("memory:").unwrap(), StorageDescriptor::Memory);
        assert!(StorageDescriptor::parse("postgres://localhost/db").is_err());
        assert!(StorageDescriptor::parse("sqlite://").is_err());
    }

    #[test]
    fn test_split_auth_token_keeps_other_params() {
        let (url, token) = split_auth_token("https://db.example?tls=1&authToken=t");
        assert_eq!(url, "https://db.example?tls=1");
        assert_eq!(token.as_deref(), Some("t"));
    }
}

use super::Storage;
use crate::error::{BridgeError, Result};
use crate::types::Message;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// In-memory storage for development/testing
#[derive(Default)]
pub struct InMemoryStorage {
    seen: Arc<Mutex<HashSet<String>>>,
    checkpoints: Arc<Mutex<HashMap<String, String>>>,
    outbox: Arc<Mutex<HashMap<String, Message>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock<T>(m: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    m.lock().map_err(|e| BridgeError::storage(format!("lock poisoned: {}", e)))
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn is_seen(&self, id: &str) -> Result<bool> {
        Ok(lock(&self.seen)?.contains(id))
    }

    async fn set_seen(&self, id: &str) -> Result<()> {
        lock(&self.seen)?.insert(id.to_string());
        Ok(())
    }

    async fn get_checkpoint(&self, name: &str) -> Result<Option<String>> {
        Ok(lock(&self.checkpoints)?.get(name).cloned())
    }

    async fn set_checkpoint(&self, name: &str, value: &str) -> Result<()> {
        lock(&self.checkpoints)?.insert(name.to_string(), value.to_string());
        Ok(())
    }

    async fn enqueue(&self, msg: &Message) -> Result<()> {
        lock(&self.outbox)?
            .entry(msg.id.clone())
            .or_insert_with(|| msg.clone());
        Ok(())
    }

    async fn dequeue(&self, id: &str) -> Result<()> {
        if lock(&self.outbox)?.remove(id).is_some() {
            debug!("Dequeued message {}", id);
        }
        Ok(())
    }

    async fn list_queued(&self) -> Result<Vec<Message>> {
        Ok(lock(&self.outbox)?.values().cloned().collect())
    }

    async fn admit(&self, msg: &Message) -> Result<bool> {
        // Both guards held together so the pair of writes is atomic.
        let mut seen = lock(&self.seen)?;
        let mut outbox = lock(&self.outbox)?;
        if !seen.insert(msg.id.clone()) {
            return Ok(false);
        }
        outbox.entry(msg.id.clone()).or_insert_with(|| msg.clone());
        Ok(true)
    }
}

use async_trait::async_trait;
use lora_bridge::error::{BridgeError, Result};
use lora_bridge::pipeline::{FlushReport, QueueManager};
use lora_bridge::sink::{NdjsonSink, Sink};
use lora_bridge::storage::{open_storage, SqliteStorage, Storage};
use lora_bridge::types::Message;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::tempdir;
use tokio::time::Instant;

fn message(n: u32) -> Message {
    Message {
        id: format!("wmc:17092872000{:02}:{}", n, n),
        eui: "70b3d57ed0001234".into(),
        timestamp: "2024-03-01T10:00:00.000Z".into(),
        received: "2024-03-01T10:00:01.000Z".into(),
        data: "AQI=".into(),
        encrypted: false,
        origin: json!({"fCntUp": n}),
    }
}

/// Sink that is down until switched on.
#[derive(Default)]
struct SwitchableSink {
    up: AtomicBool,
    delivered: Mutex<Vec<String>>,
}

#[async_trait]
impl Sink for SwitchableSink {
    async fn publish(&self, msg: &Message) -> Result<()> {
        if !self.up.load(Ordering::SeqCst) {
            return Err(BridgeError::Sink("connection refused".into()));
        }
        self.delivered.lock().unwrap().push(msg.id.clone());
        Ok(())
    }
}

#[tokio::test]
async fn test_outbox_survives_restart_and_drains() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("bridge.db");

    // First run: the sink is down, so everything stays in the outbox.
    {
        let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::open(&db).unwrap());
        let queue = QueueManager::new(storage.clone(), Duration::from_millis(20));
        let sink = Arc::new(SwitchableSink::default());
        queue.set_sink(sink.clone());
        for n in 0..3 {
            assert!(queue.push(message(n)).await.unwrap());
        }
        assert!(!queue.push(message(1)).await.unwrap());
        assert_eq!(
            queue.flush_now().await.unwrap(),
            FlushReport {
                delivered: 0,
                failed: 3
            }
        );
    }

    // Second run on the same file: ids are still seen, the outbox is redelivered.
    let storage = open_storage(&format!("sqlite://{}", db.display()))
        .await
        .unwrap();
    assert_eq!(storage.list_queued().await.unwrap().len(), 3);
    let queue = QueueManager::new(storage.clone(), Duration::from_millis(20));
    assert!(!queue.push(message(0)).await.unwrap());

    let sink = Arc::new(SwitchableSink::default());
    queue.set_sink(sink.clone());
    let _worker = queue.spawn_worker();
    tokio::time::sleep(Duration::from_millis(50)).await;
    sink.up.store(true, Ordering::SeqCst);

    let deadline = Instant::now() + Duration::from_secs(5);
    while !storage.list_queued().await.unwrap().is_empty() {
        assert!(Instant::now() < deadline, "outbox never drained");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let mut delivered = sink.delivered.lock().unwrap().clone();
    delivered.sort();
    delivered.dedup();
    assert_eq!(delivered.len(), 3);
}

#[tokio::test]
async fn test_worker_writes_ndjson() {
    let dir = tempdir().unwrap();
    let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::open(dir.path().join("b.db")).unwrap());
    let queue = QueueManager::new(storage.clone(), Duration::from_millis(20));
    let sink = Arc::new(NdjsonSink::new(dir.path().join("out")));
    queue.set_sink(sink.clone());
    let _worker = queue.spawn_worker();

    queue.push(message(7)).await.unwrap();
    queue.push(message(8)).await.unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while !storage.list_queued().await.unwrap().is_empty() {
        assert!(Instant::now() < deadline, "outbox never drained");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let content = std::fs::read_to_string(sink.current_path()).unwrap();
    let ids: Vec<String> = content
        .lines()
        .map(|line| serde_json::from_str::<Message>(line).unwrap().id)
        .collect();
    assert!(ids.contains(&message(7).id));
    assert!(ids.contains(&message(8).id));
}

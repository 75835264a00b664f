use super::Sink;
use crate::error::{BridgeError, Result};
use crate::types::Message;
use async_trait::async_trait;
use chrono::Utc;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Appends messages to a daily-rotated NDJSON file under `dir`.
/// Pattern: messages_YYYY-MM-DD.ndjson and a symlink `messages.ndjson` pointing to current.
pub struct NdjsonSink {
    dir: PathBuf,
    // serializes appends so lines never interleave
    write_lock: Mutex<()>,
}

impl NdjsonSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn current_path(&self) -> PathBuf {
        let date_str = Utc::now().format("%Y-%m-%d");
        self.dir.join(format!("messages_{}.ndjson", date_str))
    }

    fn append(&self, msg: &Message) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|e| BridgeError::Sink(format!("write lock poisoned: {}", e)))?;
        fs::create_dir_all(&self.dir)?;

        let target_path = self.current_path();
        let symlink_path = self.dir.join("messages.ndjson");
        ensure_symlink_to_current(&symlink_path, &target_path)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&target_path)?;
        let line = serde_json::to_string(msg)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}

#[async_trait]
impl Sink for NdjsonSink {
    async fn publish(&self, msg: &Message) -> Result<()> {
        self.append(msg)
            .map_err(|e| BridgeError::Sink(format!("{}: {}", self.dir.display(), e)))
    }
}

fn ensure_symlink_to_current(link_path: &Path, target_path: &Path) -> Result<()> {
    // Replace the link unless it already points at today's file.
    if let Ok(curr_target) = fs::read_link(link_path) {
        if curr_target == target_path {
            return Ok(());
        }
        fs::remove_file(link_path)?;
    } else if link_path.exists() {
        fs::remove_file(link_path)?;
    }
    #[cfg(unix)]
    std::os::unix::fs::symlink(target_path, link_path)?;
    #[cfg(windows)]
    std::os::windows::fs::symlink_file(target_path, link_path)?;
    Ok(())
}

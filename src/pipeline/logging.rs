use std::fs::{File, OpenOptions, create_dir_all};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::types::RunId;

pub const JOURNAL_FILE: &str = "events.jsonl";

/// Append-only JSONL journal of pipeline events.
pub struct PipelineLogger {
    path: PathBuf,
    file: Mutex<File>,
}

impl PipelineLogger {
    pub fn new(log_dir: &Path) -> io::Result<Self> {
        create_dir_all(log_dir)?;
        let path = log_dir.join(JOURNAL_FILE);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Note: `flush` only pushes to OS buffers; it does not guarantee durability on disk.
    pub fn log_event(&self, run_id: &RunId, step: &str, data: serde_json::Value) -> io::Result<()> {
        let mut event = serde_json::Map::new();
        if let Ok(duration) = SystemTime::now().duration_since(UNIX_EPOCH) {
            let millis = duration.as_millis() as u64;
            event.insert("ts".to_string(), serde_json::Value::Number(millis.into()));
        }
        event.insert(
            "run_id".to_string(),
            serde_json::Value::String(run_id.to_string()),
        );
        event.insert(
            "step".to_string(),
            serde_json::Value::String(step.to_string()),
        );
        event.insert("data".to_string(), data);

        let line = serde_json::to_string(&event).map_err(io::Error::other)?;
        let mut file = self
            .file
            .lock()
            .map_err(|_| io::Error::other("logger mutex poisoned"))?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        file.flush()?;
        Ok(())
    }

    /// Like [`log_event`](Self::log_event), but a failed write is only logged.
    pub fn record(&self, run_id: &RunId, step: &str, data: serde_json::Value) {
        if let Err(err) = self.log_event(run_id, step, data) {
            log::warn!("failed to write {step} to {}: {err}", self.path.display());
        }
    }
}

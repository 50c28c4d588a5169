use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{LineWriter, Write};
use std::path::{Path, PathBuf};
use tickvault_core::{Message, SubscriptionKey};
use tickvault_ports::{MessageSink, WriteError};

/// One line in a JSONL file
#[derive(Serialize)]
struct Record<'a> {
    sequence: u64,
    kind: &'a str,
    received_at: String,
    payload: &'a serde_json::Value,
}

/// Append-only JSON-lines storage
///
/// Each (product, channel) gets its own `{channel}_{product}.jsonl` file in
/// `directory`, opened lazily on first append.
pub struct JsonLinesSink {
    directory: PathBuf,
    files: Mutex<HashMap<SubscriptionKey, LineWriter<File>>>,
}

impl JsonLinesSink {
    pub fn new(directory: impl AsRef<Path>) -> Result<Self, WriteError> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory)?;
        tracing::info!(directory = %directory.display(), "Message store ready");
        Ok(JsonLinesSink {
            directory,
            files: Mutex::new(HashMap::new()),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn path_for(&self, key: &SubscriptionKey) -> PathBuf {
        self.directory
            .join(format!("{}_{}.jsonl", key.channel, key.product))
    }

    fn open(&self, key: &SubscriptionKey) -> Result<LineWriter<File>, WriteError> {
        let path = self.path_for(key);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        tracing::debug!(path = %path.display(), "Opened message file");
        Ok(LineWriter::new(file))
    }
}

#[async_trait]
impl MessageSink for JsonLinesSink {
    async fn append(&self, message: &Message) -> Result<(), WriteError> {
        let record = Record {
            sequence: message.sequence(),
            kind: message.kind(),
            received_at: message.received_at().to_rfc3339(),
            payload: message.payload(),
        };
        let mut line =
            serde_json::to_vec(&record).map_err(|e| WriteError::Serialization(e.to_string()))?;
        line.push(b'\n');

        let key = message.key();
        let mut files = self.files.lock();
        if !files.contains_key(&key) {
            let writer = self.open(&key)?;
            files.insert(key.clone(), writer);
        }
        if let Some(writer) = files.get_mut(&key) {
            writer.write_all(&line)?;
        }
        Ok(())
    }

    async fn flush(&self) -> Result<(), WriteError> {
        let mut files = self.files.lock();
        for writer in files.values_mut() {
            writer.flush()?;
        }
        Ok(())
    }
}

impl Drop for JsonLinesSink {
    fn drop(&mut self) {
        for (key, writer) in self.files.get_mut().iter_mut() {
            if let Err(e) = writer.flush() {
                tracing::error!(key = %key, error = %e, "Failed to flush message file");
            }
        }
    }
}

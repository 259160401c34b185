//! JSON Lines record store

use super::{RecordStore, StorageError};
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

/// Appends one document per line to `<records_dir>/<collection>.jsonl`
pub struct JsonlRecordStore {
    records_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlRecordStore {
    pub fn new(records_dir: impl Into<PathBuf>) -> Self {
        Self {
            records_dir: records_dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn records_dir(&self) -> &Path {
        &self.records_dir
    }

    /// File backing `collection`
    pub fn collection_path(&self, collection: &str) -> Result<PathBuf, StorageError> {
        let valid = !collection.is_empty()
            && collection
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(StorageError::InvalidCollection(collection.to_string()));
        }
        Ok(self.records_dir.join(format!("{collection}.jsonl")))
    }
}

#[async_trait]
impl RecordStore for JsonlRecordStore {
    async fn save(&self, collection: &str, document: &Value) -> Result<(), StorageError> {
        let path = self.collection_path(collection)?;
        let mut line = serde_json::to_string(document)?;
        line.push('\n');

        // Whole lines only, even with concurrent writers
        let _guard = self.write_lock.lock().await;
        fs::create_dir_all(&self.records_dir).await?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        debug!(collection = %collection, path = %path.display(), "Document appended");
        Ok(())
    }
}

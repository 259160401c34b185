//! Persistence collaborators
//!
//! The pipeline talks to storage only through [`ImageStore`] and
//! [`RecordStore`]. The bundled implementations write to the local
//! filesystem; a document database or object store plugs in behind the same
//! traits.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub mod image_store;
pub mod record_store;

pub use image_store::LocalImageStore;
pub use record_store::JsonlRecordStore;

/// Collection for enriched sensor records
pub const SENSOR_COLLECTION: &str = "solar_panel_data";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid image reference: {0}")]
    InvalidImage(String),
    #[error("Invalid collection name: {0}")]
    InvalidCollection(String),
}

/// Turns an image reference into a durable URL
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// `image_ref` is a URL, a local path, a data URI or bare base64
    async fn upload(&self, image_ref: &str, panel_id: &str) -> Result<String, StorageError>;
}

/// Append-only document sink
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn save(&self, collection: &str, document: &Value) -> Result<(), StorageError>;
}

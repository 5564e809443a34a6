//! Durable queue snapshots, scoped to one API key.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::FileClient;

use super::models::{QueueSnapshot, QueuedRequest};

/// Format version written into every snapshot
pub const QUEUE_FORMAT_VERSION: &str = "2";

/// Errors that can occur while writing or removing a snapshot.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// File I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The blocking write task panicked or was cancelled
    #[error("Snapshot write task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// On-disk representation of both lanes
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedQueue {
    version: String,
    api_key: String,
    immediate: Vec<QueuedRequest>,
    normal: Vec<QueuedRequest>,
}

/// Saves and loads queue snapshots for one API key.
///
/// Each API key maps to its own file, so switching keys never reads
/// another account's requests.
pub struct QueuePersistence {
    api_key: String,
    file_client: Arc<dyn FileClient>,
}

impl QueuePersistence {
    pub fn new(api_key: impl Into<String>, file_client: Arc<dyn FileClient>) -> Self {
        Self {
            api_key: api_key.into(),
            file_client,
        }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Location of the snapshot file for this API key.
    ///
    /// Always directly inside the library directory, whatever the key holds.
    pub fn file_path(&self) -> PathBuf {
        self.file_client
            .library_directory()
            .join(format!("klaviyo-{}-queue-v2.json", escape_file_component(&self.api_key)))
    }

    /// Write both lanes atomically, replacing any previous snapshot
    pub fn save(
        &self,
        immediate: &[QueuedRequest],
        normal: &[QueuedRequest],
    ) -> Result<(), PersistenceError> {
        let record = PersistedQueue {
            version: QUEUE_FORMAT_VERSION.to_string(),
            api_key: self.api_key.clone(),
            immediate: immediate.to_vec(),
            normal: normal.to_vec(),
        };
        let data = serde_json::to_vec(&record)?;
        self.file_client.write(&data, &self.file_path())?;

        tracing::debug!(
            immediate = immediate.len(),
            normal = normal.len(),
            bytes = data.len(),
            "Queue snapshot saved"
        );

        Ok(())
    }

    /// Read the snapshot for this API key.
    ///
    /// Never fails: a missing, unreadable or foreign snapshot yields empty
    /// lanes. A snapshot that does not parse is deleted.
    pub fn load(&self) -> QueueSnapshot {
        let path = self.file_path();
        if !self.file_client.file_exists(&path) {
            return QueueSnapshot::default();
        }

        let data = match self.file_client.read(&path) {
            Ok(data) => data,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    path = %path.display(),
                    "Failed to read queue snapshot"
                );
                return QueueSnapshot::default();
            }
        };

        let record: PersistedQueue = match serde_json::from_slice(&data) {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    path = %path.display(),
                    "Queue snapshot is corrupt, deleting it"
                );
                if let Err(e) = self.file_client.remove_item(&path) {
                    tracing::error!(error = %e, "Failed to delete corrupt queue snapshot");
                }
                return QueueSnapshot::default();
            }
        };

        if record.api_key != self.api_key {
            tracing::warn!(
                path = %path.display(),
                "Queue snapshot belongs to a different API key, ignoring it"
            );
            return QueueSnapshot::default();
        }

        if record.version != QUEUE_FORMAT_VERSION {
            tracing::warn!(
                found = %record.version,
                expected = QUEUE_FORMAT_VERSION,
                "Queue snapshot version mismatch, loading anyway"
            );
        }

        tracing::info!(
            immediate = record.immediate.len(),
            normal = record.normal.len(),
            "Queue snapshot loaded"
        );

        QueueSnapshot {
            immediate: record.immediate,
            normal: record.normal,
        }
    }

    /// Delete the snapshot if present
    pub fn clear(&self) -> Result<(), PersistenceError> {
        let path = self.file_path();
        if self.file_client.file_exists(&path) {
            self.file_client.remove_item(&path)?;
        }
        Ok(())
    }

    /// Whether a snapshot file exists, without reading it
    pub fn exists(&self) -> bool {
        self.file_client.file_exists(&self.file_path())
    }
}

/// Percent-encode every byte outside `[A-Za-z0-9_-]`.
///
/// Plain alphanumeric keys pass through unchanged; separators, dots and `%`
/// are encoded, so distinct keys map to distinct file names.
fn escape_file_component(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
            escaped.push(byte as char);
        } else {
            escaped.push_str(&format!("%{:02X}", byte));
        }
    }
    escaped
}

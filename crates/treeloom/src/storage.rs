//! Backing document storage for session state.
//!
//! Each session persists two opaque JSON documents (a stack document and a
//! status document). The [`HierarchyStore`](crate::hierarchy::HierarchyStore)
//! only ever talks to a [`DocumentStore`]; the two implementations here are a
//! directory of JSON files and an in-process map for tests and embedding.
//!
//! Directory layout of [`FileDocumentStore`]:
//! ```text
//! state_dir/
//!   1a2b3c4d_report_stack.json
//!   1a2b3c4d_report_status.json
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Errors raised by a [`DocumentStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("document '{key}' is not valid JSON: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize document '{key}': {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Key-value persistence for session documents.
///
/// `load` returns `Ok(None)` for a document that was never saved. Callers
/// decide how to recover from an `Err`; the hierarchy store substitutes an
/// empty default and logs a warning.
pub trait DocumentStore: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<Value>, StoreError>;
    fn save(&self, key: &str, document: &Value) -> Result<(), StoreError>;
}

// ── FileDocumentStore ──────────────────────────────────────────────

/// Stores each document as `{dir}/{key}.json`.
#[derive(Debug, Clone)]
pub struct FileDocumentStore {
    dir: PathBuf,
}

impl FileDocumentStore {
    /// Create a new store, ensuring the directory exists.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    /// The directory holding the documents.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl DocumentStore for FileDocumentStore {
    fn load(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(&path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        let value = serde_json::from_str(&json).map_err(|source| StoreError::Corrupt {
            key: key.to_string(),
            source,
        })?;
        Ok(Some(value))
    }

    /// Atomic write: serialize to a temp file, then rename into place.
    fn save(&self, key: &str, document: &Value) -> Result<(), StoreError> {
        let final_path = self.path_for(key);
        let tmp_path = self.dir.join(format!(".{key}.json.tmp"));

        let json = serde_json::to_string_pretty(document).map_err(|source| {
            StoreError::Serialize {
                key: key.to_string(),
                source,
            }
        })?;
        std::fs::write(&tmp_path, json).map_err(|source| StoreError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        std::fs::rename(&tmp_path, &final_path).map_err(|source| StoreError::Io {
            path: final_path.clone(),
            source,
        })?;

        debug!("Saved document {}", final_path.display());
        Ok(())
    }
}

// ── MemoryDocumentStore ────────────────────────────────────────────

/// In-process store. Documents are kept as raw JSON text so a corrupt
/// document can be planted with [`insert_raw`](Self::insert_raw).
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    documents: Mutex<HashMap<String, String>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store raw text under `key` without validation.
    pub fn insert_raw(&self, key: impl Into<String>, text: impl Into<String>) {
        let mut docs = self.documents.lock().unwrap_or_else(|e| e.into_inner());
        docs.insert(key.into(), text.into());
    }

    /// Raw text stored under `key`, if any.
    pub fn raw(&self, key: &str) -> Option<String> {
        let docs = self.documents.lock().unwrap_or_else(|e| e.into_inner());
        docs.get(key).cloned()
    }

    /// Sorted list of stored keys.
    pub fn keys(&self) -> Vec<String> {
        let docs = self.documents.lock().unwrap_or_else(|e| e.into_inner());
        let mut keys: Vec<String> = docs.keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn load(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let Some(text) = self.raw(key) else {
            return Ok(None);
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|source| StoreError::Corrupt {
                key: key.to_string(),
                source,
            })
    }

    fn save(&self, key: &str, document: &Value) -> Result<(), StoreError> {
        let text = serde_json::to_string(document).map_err(|source| StoreError::Serialize {
            key: key.to_string(),
            source,
        })?;
        self.insert_raw(key, text);
        Ok(())
    }
}

//! Persisted canvas records.
//!
//! A [`CanvasRecord`] is what survives a session: the element list, the last
//! accepted diagram text, and a modification timestamp. Where it lives is up
//! to the [`RecordStore`] implementation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::element::Element;
use crate::store::StoreError;

/// Snapshot of a canvas written after an accepted change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasRecord {
    /// Serialized element list.
    pub elements: Vec<Element>,
    /// Last accepted diagram text.
    pub diagram_text: String,
    /// Milliseconds since the Unix epoch.
    pub last_modified: u64,
}

impl CanvasRecord {
    /// Create a record stamped with the current time.
    #[must_use]
    pub fn new(elements: Vec<Element>, diagram_text: impl Into<String>) -> Self {
        Self {
            elements,
            diagram_text: diagram_text.into(),
            last_modified: current_timestamp_ms(),
        }
    }
}

/// Opaque key-value persistence for canvas records.
pub trait RecordStore: Send + Sync {
    /// Write `record` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be stored.
    fn write(&self, key: &str, record: &CanvasRecord) -> Result<(), StoreError>;

    /// Read the record stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the record exists but cannot be read.
    fn read(&self, key: &str) -> Result<Option<CanvasRecord>, StoreError>;
}

/// In-memory [`RecordStore`].
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: RwLock<HashMap<String, CanvasRecord>>,
}

impl MemoryRecordStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RecordStore for MemoryRecordStore {
    fn write(&self, key: &str, record: &CanvasRecord) -> Result<(), StoreError> {
        self.records
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(key.to_string(), record.clone());
        Ok(())
    }

    fn read(&self, key: &str) -> Result<Option<CanvasRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(key)
            .cloned())
    }
}

/// [`RecordStore`] writing one pretty-printed JSON file per key.
#[derive(Debug, Clone)]
pub struct FileRecordStore {
    data_dir: PathBuf,
}

impl FileRecordStore {
    /// Create a store rooted at `data_dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the directory cannot be created.
    pub fn new(data_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir)?;
        Ok(Self { data_dir })
    }

    /// Directory records are written to.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.data_dir.join(format!("{}.json", sanitize_filename(key)))
    }
}

impl RecordStore for FileRecordStore {
    fn write(&self, key: &str, record: &CanvasRecord) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(record)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let path = self.path_for(key);
        std::fs::write(&path, json)?;
        tracing::debug!(key, path = %path.display(), "persisted canvas record");
        Ok(())
    }

    fn read(&self, key: &str) -> Result<Option<CanvasRecord>, StoreError> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path)?;
        let record = serde_json::from_str(&contents)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(Some(record))
    }
}

/// Sanitize a record key for use as a filename.
///
/// Replaces any character that is not alphanumeric, `-`, or `_` with `_`.
fn sanitize_filename(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Get the current Unix timestamp in milliseconds.
pub(crate) fn current_timestamp_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| {
        #[allow(clippy::cast_possible_truncation)]
        {
            d.as_millis() as u64
        }
    })
}

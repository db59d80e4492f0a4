//! Marker storage: the whole collection as one JSON array in a flat file.
//!
//! Stateless apart from the path. Holds no lock; the hub serializes every
//! load/append behind the `Mutex<MarkerStore>` in its app state.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use shared::Marker;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("encode: {0}")]
    Json(#[from] serde_json::Error),
}

/// File-backed marker collection.
#[derive(Debug, Clone)]
pub struct MarkerStore {
    path: PathBuf,
}

impl MarkerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read the collection. Absent, unreadable or malformed files yield an
    /// empty list; records that do not decode as a marker are skipped.
    pub async fn load(&self) -> Vec<Marker> {
        let records = match self.read_records().await {
            Contents::Records(records) => records,
            Contents::Missing | Contents::Unusable => return Vec::new(),
        };
        records
            .into_iter()
            .enumerate()
            .filter_map(|(index, record)| match serde_json::from_value(record) {
                Ok(marker) => Some(marker),
                Err(e) => {
                    tracing::warn!(path = %self.path.display(), index, error = %e, "Skipping unreadable marker record");
                    None
                }
            })
            .collect()
    }

    /// Overwrite the file with `markers`. Writes a sibling temp file and renames it
    /// over the target, so a failed save leaves the previous contents intact.
    pub async fn try_save(&self, markers: &[Marker]) -> Result<(), StoreError> {
        self.write_json(markers).await
    }

    /// Like `try_save`, but failures are logged and swallowed. Returns whether the write landed.
    pub async fn save(&self, markers: &[Marker]) -> bool {
        self.log_save(self.try_save(markers).await)
    }

    /// Load, push, save. Returns the collection length including `marker`.
    ///
    /// Works on the raw records, so entries `load` skips are written back
    /// untouched. A file that is not a JSON array at all is moved aside to
    /// `<name>.bak` before the new collection replaces it.
    pub async fn append(&self, marker: Marker) -> usize {
        let mut records = match self.read_records().await {
            Contents::Records(records) => records,
            Contents::Missing => Vec::new(),
            Contents::Unusable => {
                if !self.set_aside().await {
                    tracing::error!(path = %self.path.display(), "Not overwriting markers file that could not be backed up");
                    return 1;
                }
                Vec::new()
            }
        };
        match serde_json::to_value(&marker) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::error!(error = %e, "Error encoding marker");
                return records.len();
            }
        }
        let result = self.write_json(&records).await;
        self.log_save(result);
        records.len()
    }

    async fn read_records(&self) -> Contents {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Contents::Missing,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Markers file unreadable, starting empty");
                return Contents::Unusable;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(records) => Contents::Records(records),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Markers file malformed, starting empty");
                Contents::Unusable
            }
        }
    }

    async fn write_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(value)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = self.sibling(".tmp");
        if let Err(e) = write_then_rename(&tmp, &self.path, &json).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    fn log_save(&self, result: Result<(), StoreError>) -> bool {
        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(path = %self.path.display(), error = %e, "Error saving markers");
                false
            }
        }
    }

    /// Move the current file to `<name>.bak`.
    async fn set_aside(&self) -> bool {
        let backup = self.sibling(".bak");
        match tokio::fs::rename(&self.path, &backup).await {
            Ok(()) => {
                tracing::warn!(backup = %backup.display(), "Moved unusable markers file aside");
                true
            }
            Err(e) => {
                tracing::error!(path = %self.path.display(), error = %e, "Error backing up markers file");
                false
            }
        }
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(OsString::from)
            .unwrap_or_else(|| OsString::from("markers"));
        name.push(suffix);
        self.path.with_file_name(name)
    }
}

/// What the markers file held on the last read.
enum Contents {
    Missing,
    Records(Vec<Value>),
    /// Unreadable, or not a JSON array.
    Unusable,
}

async fn write_then_rename(tmp: &Path, target: &Path, contents: &[u8]) -> io::Result<()> {
    let mut file = tokio::fs::File::create(tmp).await?;
    file.write_all(contents).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(tmp, target).await
}

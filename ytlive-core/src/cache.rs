use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::warn;

use crate::metadata::VideoRecord;

/// Full cache content at a point in time. `ordered_ids` is the latest
/// successful enumeration, preserved verbatim; ids may appear there before
/// their metadata fetch completes, and records whose id is no longer
/// enumerated are kept in `records` rather than purged. The record map is a
/// `BTreeMap` so the serialized document is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub ordered_ids: Vec<String>,
    pub records: BTreeMap<String, VideoRecord>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Durable home of the cache document. The refresher is the sole writer;
/// readers load a fresh snapshot every time and must not hold it across
/// refreshes (read-then-use, not read-then-hold).
#[derive(Debug, Clone)]
pub struct CacheStore {
    path: PathBuf,
}

impl CacheStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Never fails: a missing or corrupt document degrades to an empty
    /// snapshot. Staleness is preferred over crash-looping.
    pub fn load(&self) -> CacheSnapshot {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return CacheSnapshot::default();
            }
            Err(error) => {
                warn!(path = %self.path.display(), %error, "cache document unreadable, starting empty");
                return CacheSnapshot::default();
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(snapshot) => snapshot,
            Err(error) => {
                warn!(path = %self.path.display(), %error, "cache document corrupt, starting empty");
                CacheSnapshot::default()
            }
        }
    }

    /// Write-new then rename, so concurrent readers observe either the old
    /// or the new document, never a torn one.
    pub fn save(&self, snapshot: &CacheSnapshot) -> StoreResult<()> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent).map_err(|source| StoreError::Io {
            source,
            path: parent.clone(),
        })?;
        let mut file = NamedTempFile::new_in(&parent).map_err(|source| StoreError::Io {
            source,
            path: parent.clone(),
        })?;
        serde_json::to_writer_pretty(&mut file, snapshot)?;
        file.persist(&self.path).map_err(|error| StoreError::Io {
            source: error.error,
            path: self.path.clone(),
        })?;
        Ok(())
    }
}

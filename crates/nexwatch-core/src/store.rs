use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("snapshot store io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("snapshot `{name}` is not valid JSON: {source}")]
    Decode {
        name: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("cannot encode snapshot `{name}`: {source}")]
    Encode {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

pub trait SnapshotStore: Send + Sync {
    fn save(&self, name: &str, snapshot: &Value) -> Result<(), StoreError>;
    /// `Ok(None)` when nothing was ever saved under `name`.
    fn load(&self, name: &str) -> Result<Option<Value>, StoreError>;
}

/// One pretty-printed `<name>.json` file per blob inside a directory.
#[derive(Debug, Clone)]
pub struct DirStore {
    dir: PathBuf,
}

impl DirStore {
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Creates `<parent>/<host>_original_snapshot_<stamp>`, never reusing a directory.
    pub fn create_baseline_dir(parent: &Path, host: &str, now: DateTime<Local>) -> Result<Self, StoreError> {
        let stamp = now.format("%Y%m%d-%H%M%S");
        let mut dir = parent.join(format!("{host}_original_snapshot_{stamp}"));
        let mut attempt = 1;
        while dir.exists() {
            attempt += 1;
            dir = parent.join(format!("{host}_original_snapshot_{stamp}-{attempt}"));
        }
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }
}

impl SnapshotStore for DirStore {
    fn save(&self, name: &str, snapshot: &Value) -> Result<(), StoreError> {
        let path = self.path_for(name);
        let bytes = serde_json::to_vec_pretty(snapshot).map_err(|source| StoreError::Encode {
            name: name.to_string(),
            source,
        })?;
        fs::write(&path, bytes).map_err(|source| StoreError::Io { path, source })
    }

    fn load(&self, name: &str) -> Result<Option<Value>, StoreError> {
        let path = self.path_for(name);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StoreError::Decode {
                name: name.to_string(),
                source,
            })
    }
}

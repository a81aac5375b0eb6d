//! Persistence port: `NewStore(prefix, id, tag)` with
//! `Save(value)`/`Load(&out)`, atomic file write via temp file + rename, and
//! an `ErrNotExists` sentinel (`SnapshotError::NotFound` here).
//!
//! A file-backed implementation is provided since `SnapshotService` needs a
//! working default; a production deployment may swap in a different
//! `PersistenceStore`, but the interface itself is the seam, matching the
//! "typed ports" framing of for everything that touches outside
//! storage.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::path::PathBuf;
use tokio::fs;

use crate::errors::SnapshotError;

#[async_trait]
pub trait PersistenceStore: Send + Sync {
    async fn save_json(&self, value: &serde_json::Value) -> Result<(), SnapshotError>;
    async fn load_json(&self) -> Result<serde_json::Value, SnapshotError>;
}

pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// `prefix/id/tag.json` under `root`, matching its
    /// `NewStore(prefix, id, tag)` three-part key.
    pub fn new(root: &str, prefix: &str, id: &str, tag: &str) -> Self {
        let safe_tag = tag.replace([':', '/'], "_");
        let path = PathBuf::from(root).join(prefix).join(id).join(format!("{safe_tag}.json"));
        FileStore { path }
    }

    pub async fn save<T: Serialize + Sync>(&self, value: &T) -> Result<(), SnapshotError> {
        let json = serde_json::to_vec_pretty(value).map_err(|e| SnapshotError::Decode(e.to_string()))?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| SnapshotError::Io(e.to_string()))?;
        }
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, &json).await.map_err(|e| SnapshotError::Io(e.to_string()))?;
        fs::rename(&tmp_path, &self.path).await.map_err(|e| SnapshotError::Io(e.to_string()))?;
        Ok(())
    }

    pub async fn load<T: DeserializeOwned>(&self) -> Result<T, SnapshotError> {
        let bytes = fs::read(&self.path).await.map_err(|_| {
            SnapshotError::NotFound(self.path.to_string_lossy().to_string())
        })?;
        serde_json::from_slice(&bytes).map_err(|e| SnapshotError::Decode(e.to_string()))
    }
}

#[async_trait]
impl PersistenceStore for FileStore {
    async fn save_json(&self, value: &serde_json::Value) -> Result<(), SnapshotError> {
        self.save(value).await
    }

    async fn load_json(&self) -> Result<serde_json::Value, SnapshotError> {
        self.load().await
    }
}

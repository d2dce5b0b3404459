//! Storage layer for memora
//!
//! Content-addressed media storage plus the relational store that is the
//! source of truth for items, artifacts, and contexts.

pub mod database;
pub mod media;
pub mod models;
mod queries;

use crate::error::{MemoraError, Result};
use std::path::PathBuf;

pub use database::{Database, DbPool, DbStats};
pub use media::MediaStore;
pub use models::{
    ContextRecord, DerivedArtifact, EventTimeSource, ItemStatus, ItemType, SourceItem, StepStatus,
};

/// Storage manager coordinating media and database storage
pub struct StorageManager {
    pub media_store: MediaStore,
    pub database: Database,
    base_path: PathBuf,
}

impl StorageManager {
    /// Create a new storage manager
    pub fn new(base_path: PathBuf, compress_threshold: usize) -> Result<Self> {
        let store_dir = base_path.join("store");

        std::fs::create_dir_all(&store_dir).map_err(|e| MemoraError::Io {
            source: e,
            context: format!("Failed to create store directory: {}", store_dir.display()),
        })?;
        std::fs::create_dir_all(store_dir.join("vectors")).map_err(|e| MemoraError::Io {
            source: e,
            context: "Failed to create vectors directory".to_string(),
        })?;
        std::fs::create_dir_all(store_dir.join("keywords")).map_err(|e| MemoraError::Io {
            source: e,
            context: "Failed to create keywords directory".to_string(),
        })?;

        let media_store = MediaStore::new(store_dir.clone(), compress_threshold)?;
        let database = Database::new(&store_dir.join("db.sqlite"))?;

        Ok(Self {
            media_store,
            database,
            base_path,
        })
    }

    /// Root of internal, rebuildable data
    pub fn store_dir(&self) -> PathBuf {
        self.base_path.join("store")
    }

    /// Directory for the persisted vector index
    pub fn vectors_dir(&self) -> PathBuf {
        self.store_dir().join("vectors")
    }

    /// Directory for the tantivy keyword index
    pub fn keywords_dir(&self) -> PathBuf {
        self.store_dir().join("keywords")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_storage_manager_creation() {
        let temp_dir = TempDir::new().unwrap();
        let storage = StorageManager::new(temp_dir.path().to_path_buf(), 4096).unwrap();

        assert!(storage.store_dir().exists());
        assert!(storage.vectors_dir().exists());
        assert!(storage.keywords_dir().exists());
        assert!(storage.store_dir().join("db.sqlite").exists());
    }

    #[test]
    fn test_media_and_db_together() {
        let temp_dir = TempDir::new().unwrap();
        let storage = StorageManager::new(temp_dir.path().to_path_buf(), 4096).unwrap();

        let (hash, is_new) = storage.media_store.write(b"jpeg bytes").unwrap();
        assert!(is_new);

        let stats = storage.database.stats().unwrap();
        assert_eq!(stats.item_count, 0);
        assert!(storage.media_store.exists(&hash));
    }
}

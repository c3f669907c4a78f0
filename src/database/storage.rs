// ==============================================================================
// database/storage.rs - Storage Adapters
// ==============================================================================
// Description: Pluggable persistence for custom databases (in-memory and
//              on-disk JSON)
// Author: Matt Barham
// Created: 2026-03-02
// Modified: 2026-05-28
// Version: 1.0.1
// ==============================================================================

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::RwLock;
use thiserror::Error;

use crate::database::{CustomDatabase, DatabaseRecord};

/// Everything an adapter persists for one database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredDatabase {
    pub database: CustomDatabase,
    pub records: Vec<DatabaseRecord>,
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Persistence contract behind the database manager. The trait is
/// object-safe and whole-database-granular so a remote adapter can sit
/// behind the same interface.
pub trait StorageAdapter: Send + Sync {
    fn load(&self, id: &str) -> Result<Option<StoredDatabase>, StorageError>;
    fn save(&self, stored: &StoredDatabase) -> Result<(), StorageError>;
    fn delete(&self, id: &str) -> Result<(), StorageError>;
    fn list_ids(&self) -> Result<Vec<String>, StorageError>;
}

/// Volatile adapter for tests and ephemeral use
#[derive(Default)]
pub struct MemoryStorage {
    inner: RwLock<HashMap<String, StoredDatabase>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageAdapter for MemoryStorage {
    fn load(&self, id: &str) -> Result<Option<StoredDatabase>, StorageError> {
        let inner = self.inner.read().unwrap_or_else(|p| p.into_inner());
        Ok(inner.get(id).cloned())
    }

    fn save(&self, stored: &StoredDatabase) -> Result<(), StorageError> {
        let mut inner = self.inner.write().unwrap_or_else(|p| p.into_inner());
        inner.insert(stored.database.id.clone(), stored.clone());
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<(), StorageError> {
        let mut inner = self.inner.write().unwrap_or_else(|p| p.into_inner());
        inner.remove(id);
        Ok(())
    }

    fn list_ids(&self) -> Result<Vec<String>, StorageError> {
        let inner = self.inner.read().unwrap_or_else(|p| p.into_inner());
        Ok(inner.keys().cloned().collect())
    }
}

/// On-disk adapter: one JSON document per database under a directory
pub struct FileStorage {
    directory: PathBuf,
}

impl FileStorage {
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let directory = directory.into();
        fs::create_dir_all(&directory)?;
        Ok(Self { directory })
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.directory.join(format!("{}.json", id))
    }
}

impl StorageAdapter for FileStorage {
    fn load(&self, id: &str) -> Result<Option<StoredDatabase>, StorageError> {
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&contents)?))
    }

    fn save(&self, stored: &StoredDatabase) -> Result<(), StorageError> {
        let path = self.path_for(&stored.database.id);
        let contents = serde_json::to_string_pretty(stored)?;
        fs::write(path, contents)?;
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<(), StorageError> {
        let path = self.path_for(id);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    fn list_ids(&self) -> Result<Vec<String>, StorageError> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.directory)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DatabaseSchema, FieldDefinition, FieldType};
    use chrono::Utc;

    fn sample_stored(id: &str) -> StoredDatabase {
        StoredDatabase {
            database: CustomDatabase {
                id: id.to_string(),
                name: "test".to_string(),
                schema: DatabaseSchema::new(
                    "s",
                    "s",
                    vec![FieldDefinition::new("rsid", FieldType::Rsid, true)],
                    vec!["rsid".to_string()],
                ),
                record_count: 1,
                enabled: true,
                priority: 0,
                tags: vec![],
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
            records: vec![DatabaseRecord {
                id: "r1".to_string(),
                database_id: id.to_string(),
                values: [(
                    "rsid".to_string(),
                    serde_json::Value::String("rs1".to_string()),
                )]
                .into_iter()
                .collect(),
            }],
        }
    }

    #[test]
    fn test_memory_storage_round_trip() {
        let storage = MemoryStorage::new();
        storage.save(&sample_stored("db1")).unwrap();

        let loaded = storage.load("db1").unwrap().unwrap();
        assert_eq!(loaded.database.name, "test");
        assert_eq!(loaded.records.len(), 1);

        assert_eq!(storage.list_ids().unwrap(), vec!["db1".to_string()]);
        storage.delete("db1").unwrap();
        assert!(storage.load("db1").unwrap().is_none());
    }

    #[test]
    fn test_file_storage_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();

        storage.save(&sample_stored("db2")).unwrap();
        assert_eq!(storage.list_ids().unwrap(), vec!["db2".to_string()]);

        let loaded = storage.load("db2").unwrap().unwrap();
        assert_eq!(loaded.records[0].id, "r1");

        storage.delete("db2").unwrap();
        assert!(storage.load("db2").unwrap().is_none());
        assert!(storage.list_ids().unwrap().is_empty());
    }

    #[test]
    fn test_load_missing_is_none() {
        let storage = MemoryStorage::new();
        assert!(storage.load("absent").unwrap().is_none());
    }
}

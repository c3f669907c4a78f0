// ==============================================================================
// database/mod.rs - Custom Database Manager
// ==============================================================================
// Description: Named annotation databases with schema-validated records,
//              query support, lifecycle events, and pluggable storage
// Author: Matt Barham
// Created: 2026-03-02
// Modified: 2026-07-21
// Version: 1.2.0
// ==============================================================================

pub mod export;
pub mod import;
pub mod query;
pub mod source;
pub mod storage;

pub use export::{export_records, ExportError, ExportFormat, ExportOptions};
pub use import::{
    detect_import_format, parse_rows, resolve_schema, validate_rows, ImportError, ImportFormat,
    ImportOptions, ParsedRows, RowErrors, SchemaSpec,
};
pub use query::{apply_query, Query, QueryError, QueryFilter, QueryOperator, SortDirection};
pub use source::DbAnnotationSource;
pub use storage::{FileStorage, MemoryStorage, StorageAdapter, StorageError, StoredDatabase};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::schema::{find_duplicate_keys, DatabaseSchema, FieldType, SchemaError};

/// A named annotation database: one schema plus metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomDatabase {
    pub id: String,
    pub name: String,
    pub schema: DatabaseSchema,
    pub record_count: usize,
    pub enabled: bool,
    pub priority: i32,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One validated record of a database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseRecord {
    pub id: String,
    pub database_id: String,
    /// Normalized values keyed by schema field name
    pub values: HashMap<String, Value>,
}

impl DatabaseRecord {
    /// Field value by name (case-insensitive)
    pub fn value(&self, field: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(field))
            .map(|(_, value)| value)
    }

    /// Field value rendered as a string
    pub fn value_str(&self, field: &str) -> Option<String> {
        self.value(field).map(|value| match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

/// Database lifecycle events
#[derive(Debug, Clone)]
pub enum DatabaseEvent {
    Created { id: String, name: String },
    Updated { id: String },
    Deleted { id: String },
    RecordsImported { id: String, imported: usize, skipped: usize },
}

pub type DatabaseListener = Box<dyn Fn(&DatabaseEvent) + Send + Sync>;

/// Per-database load/record-count report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseStatus {
    pub id: String,
    pub name: String,
    pub loaded: bool,
    pub record_count: usize,
    pub enabled: bool,
    pub last_updated: DateTime<Utc>,
}

/// Outcome of an import
#[derive(Debug, Clone)]
pub struct ImportReport {
    pub database_id: String,
    pub imported: usize,
    pub skipped: usize,
    /// Composite primary keys occurring more than once in the imported batch
    pub duplicate_keys: Vec<String>,
}

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database '{0}' not found")]
    NotFound(String),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Import(#[from] ImportError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Export(#[from] ExportError),
}

/// In-memory working set for one database: an arena of records plus a
/// secondary rsid -> indices map for O(1) lookup
struct LoadedDatabase {
    database: CustomDatabase,
    records: Vec<DatabaseRecord>,
    rsid_index: HashMap<String, Vec<usize>>,
}

impl LoadedDatabase {
    fn from_stored(stored: StoredDatabase) -> Self {
        let mut loaded = Self {
            database: stored.database,
            records: stored.records,
            rsid_index: HashMap::new(),
        };
        loaded.rebuild_index();
        loaded
    }

    fn rsid_field(&self) -> String {
        self.database
            .schema
            .fields
            .iter()
            .find(|f| f.field_type == FieldType::Rsid)
            .map(|f| f.name.clone())
            .unwrap_or_else(|| "rsid".to_string())
    }

    fn rebuild_index(&mut self) {
        let rsid_field = self.rsid_field();
        let mut index: HashMap<String, Vec<usize>> = HashMap::new();
        for (position, record) in self.records.iter().enumerate() {
            if let Some(rsid) = record.value_str(&rsid_field) {
                index.entry(rsid.to_lowercase()).or_default().push(position);
            }
        }
        self.rsid_index = index;
    }

    fn to_stored(&self) -> StoredDatabase {
        StoredDatabase {
            database: self.database.clone(),
            records: self.records.clone(),
        }
    }
}

/// Manages named databases over a storage adapter. Construct explicitly and
/// inject into collaborators; there is no process-wide default instance.
pub struct DatabaseManager {
    storage: Arc<dyn StorageAdapter>,
    state: RwLock<HashMap<String, LoadedDatabase>>,
    listeners: RwLock<Vec<DatabaseListener>>,
}

impl DatabaseManager {
    pub fn new(storage: Arc<dyn StorageAdapter>) -> Self {
        Self {
            storage,
            state: RwLock::new(HashMap::new()),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Convenience constructor backed by volatile storage
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorage::new()))
    }

    /// Load every database the storage adapter knows about. Returns the
    /// number of databases loaded.
    pub fn load_persisted(&self) -> Result<usize, DatabaseError> {
        let ids = self.storage.list_ids()?;
        let mut loaded = 0usize;
        for id in ids {
            if let Some(stored) = self.storage.load(&id)? {
                self.write_state()
                    .insert(id.clone(), LoadedDatabase::from_stored(stored));
                loaded += 1;
            }
        }
        if loaded > 0 {
            info!("Loaded {} persisted database(s)", loaded);
        }
        Ok(loaded)
    }

    pub fn subscribe(&self, listener: DatabaseListener) {
        match self.listeners.write() {
            Ok(mut listeners) => listeners.push(listener),
            Err(poisoned) => poisoned.into_inner().push(listener),
        }
    }

    fn emit(&self, event: &DatabaseEvent) {
        let listeners = match self.listeners.read() {
            Ok(listeners) => listeners,
            Err(poisoned) => poisoned.into_inner(),
        };
        for listener in listeners.iter() {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                warn!("Database listener panicked on {:?}, continuing", event);
            }
        }
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, LoadedDatabase>> {
        self.state.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, LoadedDatabase>> {
        self.state.write().unwrap_or_else(|p| p.into_inner())
    }

    /// Create an empty database with a validated schema
    pub fn create_database(
        &self,
        name: &str,
        schema: DatabaseSchema,
        tags: Vec<String>,
    ) -> Result<String, DatabaseError> {
        schema.validate()?;

        let now = Utc::now();
        let database = CustomDatabase {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            schema,
            record_count: 0,
            enabled: true,
            priority: 0,
            tags,
            created_at: now,
            updated_at: now,
        };
        let id = database.id.clone();
        let loaded = LoadedDatabase {
            database,
            records: Vec::new(),
            rsid_index: HashMap::new(),
        };

        self.storage.save(&loaded.to_stored())?;
        self.write_state().insert(id.clone(), loaded);

        info!("Created database '{}' ({})", name, id);
        self.emit(&DatabaseEvent::Created {
            id: id.clone(),
            name: name.to_string(),
        });
        Ok(id)
    }

    /// Full import pipeline: detect format, parse rows, resolve the schema,
    /// validate, create the database, and persist only the valid records.
    pub fn import_text(
        &self,
        name: &str,
        content: &str,
        filename: Option<&str>,
        options: &ImportOptions,
    ) -> Result<ImportReport, DatabaseError> {
        let format = detect_import_format(filename, content);
        info!("Importing '{}' as {}", name, format.as_str());

        let parsed = parse_rows(format, content)?;
        let schema = resolve_schema(&options.schema, &parsed)?;
        let (valid, skipped) =
            validate_rows(&schema, &parsed.rows, options.mapping.as_ref(), options.skip_invalid)?;

        let duplicate_keys = find_duplicate_keys(&schema, &valid);
        if !duplicate_keys.is_empty() {
            warn!(
                "Import '{}' contains {} duplicate primary key(s)",
                name,
                duplicate_keys.len()
            );
        }

        let database_id = self.create_database(name, schema, Vec::new())?;
        let imported = self.append_validated(&database_id, valid)?;

        self.emit(&DatabaseEvent::RecordsImported {
            id: database_id.clone(),
            imported,
            skipped,
        });

        Ok(ImportReport {
            database_id,
            imported,
            skipped,
            duplicate_keys,
        })
    }

    /// Validate rows against an existing database's schema and append the
    /// valid ones
    pub fn append_rows(
        &self,
        id: &str,
        rows: &[HashMap<String, Value>],
        options: &ImportOptions,
    ) -> Result<ImportReport, DatabaseError> {
        let schema = self
            .get(id)
            .ok_or_else(|| DatabaseError::NotFound(id.to_string()))?
            .schema;
        let (valid, skipped) =
            validate_rows(&schema, rows, options.mapping.as_ref(), options.skip_invalid)?;
        let imported = self.append_validated(id, valid)?;

        self.emit(&DatabaseEvent::RecordsImported {
            id: id.to_string(),
            imported,
            skipped,
        });

        Ok(ImportReport {
            database_id: id.to_string(),
            imported,
            skipped,
            duplicate_keys: Vec::new(),
        })
    }

    fn append_validated(
        &self,
        id: &str,
        values: Vec<HashMap<String, Value>>,
    ) -> Result<usize, DatabaseError> {
        let stored = {
            let mut state = self.write_state();
            let loaded = state
                .get_mut(id)
                .ok_or_else(|| DatabaseError::NotFound(id.to_string()))?;

            let imported = values.len();
            for record_values in values {
                loaded.records.push(DatabaseRecord {
                    id: Uuid::new_v4().to_string(),
                    database_id: id.to_string(),
                    values: record_values,
                });
            }
            loaded.rebuild_index();
            loaded.database.record_count = loaded.records.len();
            loaded.database.updated_at = Utc::now();

            info!(
                "Appended {} record(s) to database {} ({} total)",
                imported, id, loaded.database.record_count
            );
            (loaded.to_stored(), imported)
        };

        self.storage.save(&stored.0)?;
        Ok(stored.1)
    }

    pub fn get(&self, id: &str) -> Option<CustomDatabase> {
        self.read_state().get(id).map(|l| l.database.clone())
    }

    /// Find one database by exact name (case-insensitive)
    pub fn find_by_name(&self, name: &str) -> Option<CustomDatabase> {
        self.read_state()
            .values()
            .find(|l| l.database.name.eq_ignore_ascii_case(name))
            .map(|l| l.database.clone())
    }

    /// Find one enabled database carrying the given tag, preferring higher
    /// priority
    pub fn find_by_tag(&self, tag: &str) -> Option<CustomDatabase> {
        let state = self.read_state();
        let mut candidates: Vec<&LoadedDatabase> = state
            .values()
            .filter(|l| {
                l.database.enabled
                    && l.database
                        .tags
                        .iter()
                        .any(|t| t.eq_ignore_ascii_case(tag))
            })
            .collect();
        candidates.sort_by(|a, b| b.database.priority.cmp(&a.database.priority));
        candidates.first().map(|l| l.database.clone())
    }

    /// All databases, highest priority first
    pub fn list(&self) -> Vec<CustomDatabase> {
        let mut databases: Vec<CustomDatabase> = self
            .read_state()
            .values()
            .map(|l| l.database.clone())
            .collect();
        databases.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.name.cmp(&b.name))
        });
        databases
    }

    pub fn delete_database(&self, id: &str) -> Result<(), DatabaseError> {
        {
            let mut state = self.write_state();
            if state.remove(id).is_none() {
                return Err(DatabaseError::NotFound(id.to_string()));
            }
        }
        self.storage.delete(id)?;
        info!("Deleted database {}", id);
        self.emit(&DatabaseEvent::Deleted { id: id.to_string() });
        Ok(())
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<(), DatabaseError> {
        self.update_metadata(id, |database| database.enabled = enabled)
    }

    pub fn set_priority(&self, id: &str, priority: i32) -> Result<(), DatabaseError> {
        self.update_metadata(id, |database| database.priority = priority)
    }

    pub fn set_tags(&self, id: &str, tags: Vec<String>) -> Result<(), DatabaseError> {
        self.update_metadata(id, move |database| database.tags = tags.clone())
    }

    fn update_metadata(
        &self,
        id: &str,
        apply: impl Fn(&mut CustomDatabase),
    ) -> Result<(), DatabaseError> {
        let stored = {
            let mut state = self.write_state();
            let loaded = state
                .get_mut(id)
                .ok_or_else(|| DatabaseError::NotFound(id.to_string()))?;
            apply(&mut loaded.database);
            loaded.database.updated_at = Utc::now();
            loaded.to_stored()
        };
        self.storage.save(&stored)?;
        self.emit(&DatabaseEvent::Updated { id: id.to_string() });
        Ok(())
    }

    /// Run a structured query against one database
    pub fn query(&self, id: &str, query: &Query) -> Result<Vec<DatabaseRecord>, DatabaseError> {
        let state = self.read_state();
        let loaded = state
            .get(id)
            .ok_or_else(|| DatabaseError::NotFound(id.to_string()))?;
        let hits = apply_query(loaded.records.iter(), query)?;
        Ok(hits.into_iter().cloned().collect())
    }

    /// Equality query against one field
    pub fn query_by_field(
        &self,
        id: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<DatabaseRecord>, DatabaseError> {
        self.query(
            id,
            &Query {
                filters: vec![QueryFilter {
                    field: field.to_string(),
                    operator: QueryOperator::Equals,
                    value: Value::String(value.to_string()),
                    case_sensitive: false,
                }],
                ..Default::default()
            },
        )
    }

    /// O(1) rsid lookup through the secondary index
    pub fn query_by_rsid(&self, id: &str, rsid: &str) -> Result<Vec<DatabaseRecord>, DatabaseError> {
        let state = self.read_state();
        let loaded = state
            .get(id)
            .ok_or_else(|| DatabaseError::NotFound(id.to_string()))?;
        let hits = loaded
            .rsid_index
            .get(&rsid.to_lowercase())
            .map(|positions| {
                positions
                    .iter()
                    .filter_map(|p| loaded.records.get(*p).cloned())
                    .collect()
            })
            .unwrap_or_default();
        Ok(hits)
    }

    /// Batched rsid lookup. A disabled database returns no hits.
    pub fn lookup_rsids(
        &self,
        id: &str,
        rsids: &[String],
    ) -> Result<HashMap<String, Vec<DatabaseRecord>>, DatabaseError> {
        let state = self.read_state();
        let loaded = state
            .get(id)
            .ok_or_else(|| DatabaseError::NotFound(id.to_string()))?;
        if !loaded.database.enabled {
            return Ok(HashMap::new());
        }

        let mut hits: HashMap<String, Vec<DatabaseRecord>> = HashMap::new();
        for rsid in rsids {
            if let Some(positions) = loaded.rsid_index.get(&rsid.to_lowercase()) {
                let records: Vec<DatabaseRecord> = positions
                    .iter()
                    .filter_map(|p| loaded.records.get(*p).cloned())
                    .collect();
                if !records.is_empty() {
                    hits.insert(rsid.clone(), records);
                }
            }
        }
        Ok(hits)
    }

    /// Per-database load status, mirroring what UIs surface
    pub fn status(&self) -> Vec<DatabaseStatus> {
        let mut statuses: Vec<DatabaseStatus> = self
            .read_state()
            .values()
            .map(|l| DatabaseStatus {
                id: l.database.id.clone(),
                name: l.database.name.clone(),
                loaded: true,
                record_count: l.database.record_count,
                enabled: l.database.enabled,
                last_updated: l.database.updated_at,
            })
            .collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    /// Export one database's records
    pub fn export(
        &self,
        id: &str,
        options: &ExportOptions,
    ) -> Result<String, DatabaseError> {
        let state = self.read_state();
        let loaded = state
            .get(id)
            .ok_or_else(|| DatabaseError::NotFound(id.to_string()))?;
        Ok(export_records(&loaded.database.schema, &loaded.records, options)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const FREQ_CSV: &str = "rsid,allele,frequency\nrs1,A,0.25\nrs2,G,0.5\n";

    fn import_frequency(manager: &DatabaseManager) -> ImportReport {
        manager
            .import_text(
                "freq",
                FREQ_CSV,
                Some("freq.csv"),
                &ImportOptions::named("frequency"),
            )
            .unwrap()
    }

    #[test]
    fn test_import_and_rsid_lookup() {
        let manager = DatabaseManager::in_memory();
        let report = import_frequency(&manager);

        assert_eq!(report.imported, 2);
        assert_eq!(report.skipped, 0);
        assert!(report.duplicate_keys.is_empty());

        let hits = manager.query_by_rsid(&report.database_id, "RS1").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].value_str("allele").as_deref(), Some("A"));

        let database = manager.get(&report.database_id).unwrap();
        assert_eq!(database.record_count, 2);
        assert!(database.enabled);
    }

    #[test]
    fn test_strict_import_rejects_everything() {
        let manager = DatabaseManager::in_memory();
        let content = "rsid,frequency\nrs1,0.5\nrs2,1.5\n";
        let result = manager.import_text(
            "bad",
            content,
            None,
            &ImportOptions::named("frequency"),
        );

        assert!(matches!(
            result.unwrap_err(),
            DatabaseError::Import(ImportError::InvalidRecords { .. })
        ));
        // Nothing was persisted
        assert!(manager.list().is_empty());
    }

    #[test]
    fn test_lenient_import_reports_skips() {
        let manager = DatabaseManager::in_memory();
        let content = "rsid,frequency\nrs1,0.5\nrs2,1.5\n";
        let mut options = ImportOptions::named("frequency");
        options.skip_invalid = true;

        let report = manager.import_text("mixed", content, None, &options).unwrap();
        assert_eq!(report.imported, 1);
        assert_eq!(report.skipped, 1);
    }

    #[test]
    fn test_export_import_round_trip() {
        let manager = DatabaseManager::in_memory();
        let report = import_frequency(&manager);

        let csv = manager
            .export(
                &report.database_id,
                &ExportOptions {
                    format: ExportFormat::Csv,
                    ..Default::default()
                },
            )
            .unwrap();

        let reimported = manager
            .import_text("freq2", &csv, None, &ImportOptions::named("frequency"))
            .unwrap();
        assert_eq!(reimported.imported, 2);

        // Same validated field values for each rsid
        for rsid in ["rs1", "rs2"] {
            let original = manager.query_by_rsid(&report.database_id, rsid).unwrap();
            let round_tripped = manager
                .query_by_rsid(&reimported.database_id, rsid)
                .unwrap();
            assert_eq!(original.len(), 1);
            assert_eq!(round_tripped.len(), 1);
            assert_eq!(
                original[0].value_str("allele"),
                round_tripped[0].value_str("allele")
            );
            assert_eq!(
                original[0].value_str("frequency"),
                round_tripped[0].value_str("frequency")
            );
        }
    }

    #[test]
    fn test_disabled_database_returns_no_lookups() {
        let manager = DatabaseManager::in_memory();
        let report = import_frequency(&manager);

        manager.set_enabled(&report.database_id, false).unwrap();
        let hits = manager
            .lookup_rsids(&report.database_id, &["rs1".to_string()])
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_lifecycle_events() {
        let manager = DatabaseManager::in_memory();
        let created = Arc::new(AtomicUsize::new(0));
        let imported = Arc::new(AtomicUsize::new(0));
        let deleted = Arc::new(AtomicUsize::new(0));

        let (c, i, d) = (Arc::clone(&created), Arc::clone(&imported), Arc::clone(&deleted));
        manager.subscribe(Box::new(move |event| match event {
            DatabaseEvent::Created { .. } => {
                c.fetch_add(1, Ordering::SeqCst);
            }
            DatabaseEvent::RecordsImported { .. } => {
                i.fetch_add(1, Ordering::SeqCst);
            }
            DatabaseEvent::Deleted { .. } => {
                d.fetch_add(1, Ordering::SeqCst);
            }
            _ => {}
        }));

        let report = import_frequency(&manager);
        manager.delete_database(&report.database_id).unwrap();

        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert_eq!(imported.load(Ordering::SeqCst), 1);
        assert_eq!(deleted.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_file_storage_persistence_across_managers() {
        let dir = tempfile::tempdir().unwrap();
        let database_id;
        {
            let storage = Arc::new(FileStorage::new(dir.path()).unwrap());
            let manager = DatabaseManager::new(storage);
            database_id = import_frequency(&manager).database_id;
        }

        let storage = Arc::new(FileStorage::new(dir.path()).unwrap());
        let manager = DatabaseManager::new(storage);
        assert_eq!(manager.load_persisted().unwrap(), 1);

        let hits = manager.query_by_rsid(&database_id, "rs2").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].value_str("allele").as_deref(), Some("G"));
    }

    #[test]
    fn test_query_by_field_and_priority_ordering() {
        let manager = DatabaseManager::in_memory();
        let report = import_frequency(&manager);
        manager.set_priority(&report.database_id, 5).unwrap();
        manager
            .set_tags(&report.database_id, vec!["frequency".to_string()])
            .unwrap();

        let hits = manager
            .query_by_field(&report.database_id, "allele", "g")
            .unwrap();
        assert_eq!(hits.len(), 1);

        let found = manager.find_by_tag("FREQUENCY").unwrap();
        assert_eq!(found.id, report.database_id);
        assert_eq!(found.priority, 5);

        let statuses = manager.status();
        assert_eq!(statuses.len(), 1);
        assert!(statuses[0].loaded);
        assert_eq!(statuses[0].record_count, 2);
    }
}

//! State store - the last applied snapshot of every resource
//!
//! The store is the "previous" side of every diff. Each logical id is its own
//! unit of atomicity: writes for different ids never touch the same data.

use crate::error::{Error, Result};
use crate::types::Properties;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const RECORD_EXTENSION: &str = "toml";

/// Last successfully applied state of one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    /// Resource kind the record was created by
    pub kind: String,
    /// Provider-assigned external identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
    /// Resource-level dependencies at the time of apply
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// When the record was written
    pub applied_at: DateTime<Utc>,
    /// Desired properties as declared when applied
    #[serde(default)]
    pub properties: Properties,
    /// Attributes returned by the provider
    #[serde(default)]
    pub outputs: Properties,
    /// Earlier instances replaced create-before-destroy whose destroy has
    /// not succeeded yet
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deposed: Vec<StateRecord>,
}

impl StateRecord {
    pub fn new(kind: impl Into<String>, properties: Properties) -> Self {
        Self {
            kind: kind.into(),
            handle: None,
            dependencies: Vec::new(),
            applied_at: Utc::now(),
            properties,
            outputs: Properties::new(),
            deposed: Vec::new(),
        }
    }

    pub fn with_handle(mut self, handle: impl Into<String>) -> Self {
        self.handle = Some(handle.into());
        self
    }

    pub fn with_outputs(mut self, outputs: Properties) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_deposed(mut self, deposed: Vec<StateRecord>) -> Self {
        self.deposed = deposed;
        self
    }

    /// Whether both records describe the same external instance
    pub fn same_instance(&self, other: &StateRecord) -> bool {
        self.handle == other.handle && self.applied_at == other.applied_at
    }

    /// This instance alone, without the deposed ones it carries
    pub fn instance(&self) -> StateRecord {
        StateRecord {
            deposed: Vec::new(),
            ..self.clone()
        }
    }
}

/// Persistence for state records
///
/// Every write must be durable when the call returns.
pub trait StateStore: Send + Sync {
    /// All records by logical id (empty if there is no prior state)
    fn load(&self) -> Result<BTreeMap<String, StateRecord>>;

    /// The record for `id`, if any
    fn get(&self, id: &str) -> Result<Option<StateRecord>> {
        Ok(self.load()?.remove(id))
    }

    /// Create or replace the record for `id`
    fn save(&self, id: &str, record: &StateRecord) -> Result<()>;

    /// Forget the record for `id` (no-op if absent)
    fn remove(&self, id: &str) -> Result<()>;
}

/// In-memory store, for tests and previews
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    records: Mutex<BTreeMap<String, StateRecord>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, StateRecord>> {
        match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<BTreeMap<String, StateRecord>> {
        Ok(self.records().clone())
    }

    fn get(&self, id: &str) -> Result<Option<StateRecord>> {
        Ok(self.records().get(id).cloned())
    }

    fn save(&self, id: &str, record: &StateRecord) -> Result<()> {
        self.records().insert(id.to_string(), record.clone());
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<()> {
        self.records().remove(id);
        Ok(())
    }
}

/// Directory of TOML files, one per logical id
///
/// Records are written to a temporary sibling, synced, and renamed into
/// place, so a crash never leaves a half-written record behind.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.{RECORD_EXTENSION}"))
    }

    fn io_error(path: &Path, source: std::io::Error) -> Error {
        Error::StateIo {
            path: path.to_path_buf(),
            source,
        }
    }

    fn read_record(path: &Path) -> Result<StateRecord> {
        let content = fs::read_to_string(path).map_err(|e| Self::io_error(path, e))?;
        toml::from_str(&content).map_err(|source| Error::StateDecode {
            path: path.to_path_buf(),
            source,
        })
    }

    fn sync_dir(&self) -> Result<()> {
        // Directory fsync makes the rename itself durable; not supported on Windows
        #[cfg(unix)]
        fs::File::open(&self.dir)
            .and_then(|d| d.sync_all())
            .map_err(|e| Self::io_error(&self.dir, e))?;
        Ok(())
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> Result<BTreeMap<String, StateRecord>> {
        let mut records = BTreeMap::new();
        if !self.dir.exists() {
            log::debug!("State directory {} does not exist, using empty state", self.dir.display());
            return Ok(records);
        }

        let entries = fs::read_dir(&self.dir).map_err(|e| Self::io_error(&self.dir, e))?;
        for entry in entries {
            let path = entry.map_err(|e| Self::io_error(&self.dir, e))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let record = Self::read_record(&path)?;
            records.insert(id.to_string(), record);
        }

        log::debug!("Loaded {} state records from {}", records.len(), self.dir.display());
        Ok(records)
    }

    fn get(&self, id: &str) -> Result<Option<StateRecord>> {
        let path = self.record_path(id);
        if !path.exists() {
            return Ok(None);
        }
        Self::read_record(&path).map(Some)
    }

    fn save(&self, id: &str, record: &StateRecord) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| Self::io_error(&self.dir, e))?;

        let content = toml::to_string_pretty(record).map_err(|source| Error::StateEncode {
            id: id.to_string(),
            source,
        })?;

        let path = self.record_path(id);
        let tmp = self.dir.join(format!(".{id}.{RECORD_EXTENSION}.tmp"));
        {
            let mut file = fs::File::create(&tmp).map_err(|e| Self::io_error(&tmp, e))?;
            file.write_all(content.as_bytes())
                .and_then(|()| file.sync_all())
                .map_err(|e| Self::io_error(&tmp, e))?;
        }
        fs::rename(&tmp, &path).map_err(|e| Self::io_error(&path, e))?;
        self.sync_dir()?;

        log::debug!("Saved state for {id} to {}", path.display());
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<()> {
        let path = self.record_path(id);
        match fs::remove_file(&path) {
            Ok(()) => {
                self.sync_dir()?;
                log::debug!("Removed state for {id}");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::io_error(&path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;
    use std::sync::Arc;

    fn sample_record() -> StateRecord {
        let mut properties = Properties::new();
        properties.insert("cidr".into(), Value::from("10.0.0.0/18"));
        properties.insert("max_azs".into(), Value::from(2i64));
        properties.insert("nat_gateways".into(), Value::from(1i64));
        properties.insert("peer".into(), Value::reference("alb_sg", "id"));
        properties.insert(
            "ports".into(),
            Value::List(vec![Value::from(80i64), Value::from(8080i64)]),
        );

        let mut outputs = Properties::new();
        outputs.insert("vpc_id".into(), Value::from("vpc-0a1b2c"));
        outputs.insert("ratio".into(), Value::from(0.25));

        StateRecord::new("vpc", properties)
            .with_handle("vpc-0a1b2c")
            .with_outputs(outputs)
            .with_dependencies(vec!["alb_sg".into()])
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("state"));
        let record = sample_record();

        store.save("vpc", &record).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded["vpc"], record);
    }

    #[test]
    fn test_file_store_keeps_deposed_instances() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path());
        let old = sample_record().with_handle("vpc-old");
        let record = sample_record().with_deposed(vec![old.clone()]);

        store.save("vpc", &record).unwrap();
        let loaded = store.get("vpc").unwrap().unwrap();
        assert_eq!(loaded.deposed, vec![old.clone()]);
        assert!(loaded.instance().deposed.is_empty());
        assert!(!loaded.same_instance(&old));
        assert!(store.get("cluster").unwrap().is_none());
    }

    #[test]
    fn test_file_store_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("nope"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_file_store_survives_new_instance() {
        let dir = tempfile::tempdir().unwrap();
        FileStateStore::new(dir.path())
            .save("vpc", &sample_record())
            .unwrap();

        let reopened = FileStateStore::new(dir.path());
        assert!(reopened.load().unwrap().contains_key("vpc"));
        assert!(!dir.path().join(".vpc.toml.tmp").exists());
    }

    #[test]
    fn test_file_store_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path());
        store.save("vpc", &sample_record()).unwrap();
        store.save("cluster", &sample_record()).unwrap();

        store.remove("vpc").unwrap();
        store.remove("vpc").unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.keys().collect::<Vec<_>>(), vec!["cluster"]);
    }

    #[test]
    fn test_file_store_corrupt_record() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("vpc.toml"), "kind = [").unwrap();
        let err = FileStateStore::new(dir.path()).load().unwrap_err();
        assert!(matches!(err, Error::StateDecode { .. }));
    }

    #[test]
    fn test_file_store_ignores_other_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path());
        store.save("vpc", &sample_record()).unwrap();
        fs::write(dir.path().join("README.md"), "notes").unwrap();
        fs::write(dir.path().join(".cluster.toml.tmp"), "partial").unwrap();
        assert_eq!(store.load().unwrap().len(), 1);
    }

    #[test]
    fn test_concurrent_saves_for_independent_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileStateStore::new(dir.path()));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    let mut record = sample_record();
                    record.handle = Some(format!("h-{i}"));
                    store.save(&format!("res-{i}"), &record).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 8);
        for i in 0..8 {
            assert_eq!(loaded[&format!("res-{i}")].handle, Some(format!("h-{i}")));
        }
    }

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryStateStore::new();
        let record = sample_record();
        store.save("vpc", &record).unwrap();
        assert_eq!(store.load().unwrap()["vpc"], record);
        assert_eq!(store.get("vpc").unwrap(), Some(record));
        store.remove("vpc").unwrap();
        assert!(store.load().unwrap().is_empty());
    }
}

//! Table persistence interface and the bundled in-memory and file stores.

use crate::error::{Result, RowsheetError};
use crate::storage::initial_csv;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Name given to tables created without one.
pub const DEFAULT_TABLE_NAME: &str = "Untitled";

/// Opaque identity used to scope store calls.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableRecord {
    pub id: String,
    pub owner: UserId,
    pub name: String,
    pub csv: String,
    #[serde(default)]
    pub query_spec: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TableRecord {
    fn new(id: String, owner: &UserId, name: Option<&str>) -> Self {
        let now = Utc::now();
        Self {
            id,
            owner: owner.clone(),
            name: normalize_name(name),
            csv: initial_csv(),
            query_spec: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    fn apply(&mut self, update: &TableUpdate) {
        if let Some(csv) = &update.csv {
            self.csv = csv.clone();
        }
        if let Some(name) = &update.name {
            self.name = normalize_name(Some(name));
        }
        if let Some(spec) = &update.query_spec {
            self.query_spec = spec.clone();
        }
        self.updated_at = Utc::now();
    }

    pub fn summary(&self) -> TableSummary {
        TableSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            updated_at: self.updated_at,
        }
    }
}

/// Partial update; `None` fields are left as stored.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TableUpdate {
    pub csv: Option<String>,
    pub name: Option<String>,
    pub query_spec: Option<String>,
}

impl TableUpdate {
    pub fn is_empty(&self) -> bool {
        self.csv.is_none() && self.name.is_none() && self.query_spec.is_none()
    }

    /// Fold a later update into this one; later fields win.
    pub fn merge(&mut self, later: TableUpdate) {
        if later.csv.is_some() {
            self.csv = later.csv;
        }
        if later.name.is_some() {
            self.name = later.name;
        }
        if later.query_spec.is_some() {
            self.query_spec = later.query_spec;
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableSummary {
    pub id: String,
    pub name: String,
    pub updated_at: DateTime<Utc>,
}

/// Shared flag a store checks before committing a save.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(RowsheetError::Cancelled);
        }
        Ok(())
    }
}

/// Storage for table records. Records owned by another user behave as missing.
pub trait TableStore: Send + Sync {
    fn create(&self, owner: &UserId, name: Option<&str>) -> Result<TableRecord>;

    fn load(&self, owner: &UserId, id: &str) -> Result<TableRecord>;

    /// Upsert: an unknown id is created with the update applied.
    fn save(
        &self,
        owner: &UserId,
        id: &str,
        update: &TableUpdate,
        cancel: &CancellationToken,
    ) -> Result<()>;

    fn delete(&self, owner: &UserId, id: &str) -> Result<()>;

    /// Summaries ordered by `updated_at`, newest first.
    fn list(&self, owner: &UserId) -> Result<Vec<TableSummary>>;
}

fn normalize_name(name: Option<&str>) -> String {
    match name.map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => DEFAULT_TABLE_NAME.to_string(),
    }
}

fn new_table_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn sort_summaries(mut summaries: Vec<TableSummary>) -> Vec<TableSummary> {
    summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    summaries
}

/// Process-local store, mostly for tests and the command-line tool.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    tables: Arc<DashMap<String, TableRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TableStore for MemoryStore {
    fn create(&self, owner: &UserId, name: Option<&str>) -> Result<TableRecord> {
        let record = TableRecord::new(new_table_id(), owner, name);
        self.tables.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    fn load(&self, owner: &UserId, id: &str) -> Result<TableRecord> {
        match self.tables.get(id) {
            Some(record) if record.owner == *owner => Ok(record.clone()),
            _ => Err(RowsheetError::NotFound(id.to_string())),
        }
    }

    fn save(
        &self,
        owner: &UserId,
        id: &str,
        update: &TableUpdate,
        cancel: &CancellationToken,
    ) -> Result<()> {
        cancel.check()?;
        let mut entry = self
            .tables
            .entry(id.to_string())
            .or_insert_with(|| TableRecord::new(id.to_string(), owner, None));
        if entry.owner != *owner {
            return Err(RowsheetError::NotFound(id.to_string()));
        }
        entry.apply(update);
        Ok(())
    }

    fn delete(&self, owner: &UserId, id: &str) -> Result<()> {
        self.tables
            .remove_if(id, |_, record| record.owner == *owner)
            .map(|_| ())
            .ok_or_else(|| RowsheetError::NotFound(id.to_string()))
    }

    fn list(&self, owner: &UserId) -> Result<Vec<TableSummary>> {
        let summaries = self
            .tables
            .iter()
            .filter(|entry| entry.owner == *owner)
            .map(|entry| entry.summary())
            .collect();
        Ok(sort_summaries(summaries))
    }
}

/// One JSON file per table under a data directory.
#[derive(Clone, Debug)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> Result<PathBuf> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(RowsheetError::NotFound(id.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", id)))
    }

    fn read(&self, id: &str) -> Result<Option<TableRecord>> {
        let path = self.path_for(id)?;
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn write(&self, record: &TableRecord, cancel: Option<&CancellationToken>) -> Result<()> {
        let path = self.path_for(&record.id)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(record)?)?;
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            let _ = std::fs::remove_file(&tmp);
            return Err(RowsheetError::Cancelled);
        }
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

impl TableStore for FileStore {
    fn create(&self, owner: &UserId, name: Option<&str>) -> Result<TableRecord> {
        let record = TableRecord::new(new_table_id(), owner, name);
        self.write(&record, None)?;
        tracing::debug!(id = %record.id, "created table");
        Ok(record)
    }

    fn load(&self, owner: &UserId, id: &str) -> Result<TableRecord> {
        match self.read(id)? {
            Some(record) if record.owner == *owner => Ok(record),
            _ => Err(RowsheetError::NotFound(id.to_string())),
        }
    }

    fn save(
        &self,
        owner: &UserId,
        id: &str,
        update: &TableUpdate,
        cancel: &CancellationToken,
    ) -> Result<()> {
        cancel.check()?;
        let mut record = match self.read(id)? {
            Some(record) if record.owner == *owner => record,
            Some(_) => return Err(RowsheetError::NotFound(id.to_string())),
            None => TableRecord::new(id.to_string(), owner, None),
        };
        record.apply(update);
        self.write(&record, Some(cancel))
    }

    fn delete(&self, owner: &UserId, id: &str) -> Result<()> {
        self.load(owner, id)?;
        std::fs::remove_file(self.path_for(id)?)?;
        Ok(())
    }

    fn list(&self, owner: &UserId) -> Result<Vec<TableSummary>> {
        let mut summaries = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let record: TableRecord = match std::fs::read_to_string(&path)
                .map_err(RowsheetError::from)
                .and_then(|content| Ok(serde_json::from_str::<TableRecord>(&content)?))
            {
                Ok(record) => record,
                Err(err) => {
                    tracing::warn!(path = %path.display(), %err, "skipping unreadable table file");
                    continue;
                }
            };
            if record.owner == *owner {
                summaries.push(record.summary());
            }
        }
        Ok(sort_summaries(summaries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise_store(store: &dyn TableStore) {
        let alice = UserId::new("alice");
        let bob = UserId::new("bob");

        let first = store.create(&alice, Some("  Budget  ")).unwrap();
        assert_eq!(first.name, "Budget");
        assert!(first.csv.starts_with("id,Col1,Col2\n"));
        let second = store.create(&alice, None).unwrap();
        assert_eq!(second.name, DEFAULT_TABLE_NAME);

        let update = TableUpdate {
            csv: Some("id\nx\n".into()),
            query_spec: Some("\"id\":ASC".into()),
            ..TableUpdate::default()
        };
        store
            .save(&alice, &first.id, &update, &CancellationToken::new())
            .unwrap();
        let loaded = store.load(&alice, &first.id).unwrap();
        assert_eq!(loaded.csv, "id\nx\n");
        assert_eq!(loaded.query_spec, "\"id\":ASC");
        assert_eq!(loaded.name, "Budget");

        let listed = store.list(&alice).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, first.id);

        assert!(matches!(
            store.load(&bob, &first.id),
            Err(RowsheetError::NotFound(_))
        ));
        assert!(store.list(&bob).unwrap().is_empty());
        assert!(store.delete(&bob, &first.id).is_err());

        store.delete(&alice, &first.id).unwrap();
        assert!(store.load(&alice, &first.id).is_err());
    }

    #[test]
    fn test_memory_store() {
        exercise_store(&MemoryStore::new());
    }

    #[test]
    fn test_file_store() {
        let dir = tempfile::tempdir().unwrap();
        exercise_store(&FileStore::open(dir.path()).unwrap());
    }

    #[test]
    fn test_save_upserts_missing_table() {
        let store = MemoryStore::new();
        let owner = UserId::new("u");
        let update = TableUpdate {
            csv: Some("a".into()),
            ..TableUpdate::default()
        };
        store
            .save(&owner, "fresh", &update, &CancellationToken::new())
            .unwrap();
        let record = store.load(&owner, "fresh").unwrap();
        assert_eq!(record.name, DEFAULT_TABLE_NAME);
        assert_eq!(record.csv, "a");
    }

    #[test]
    fn test_cancelled_save_is_not_committed() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let owner = UserId::new("u");
        let record = store.create(&owner, None).unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let update = TableUpdate {
            csv: Some("changed".into()),
            ..TableUpdate::default()
        };
        assert!(matches!(
            store.save(&owner, &record.id, &update, &token),
            Err(RowsheetError::Cancelled)
        ));
        assert_eq!(store.load(&owner, &record.id).unwrap().csv, record.csv);
    }

    #[test]
    fn test_file_store_rejects_path_like_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let owner = UserId::new("u");
        assert!(store.load(&owner, "../etc/passwd").is_err());
    }

    #[test]
    fn test_update_merge_prefers_later_fields() {
        let mut first = TableUpdate {
            csv: Some("a".into()),
            name: Some("n".into()),
            query_spec: None,
        };
        first.merge(TableUpdate {
            csv: Some("b".into()),
            ..TableUpdate::default()
        });
        assert_eq!(first.csv.as_deref(), Some("b"));
        assert_eq!(first.name.as_deref(), Some("n"));
        assert!(!first.is_empty());
    }
}

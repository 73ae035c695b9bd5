use super::Document;
use crate::autosave::AutoSaver;
use crate::error::Result;
use crate::history::HistoryOptions;
use crate::persistence::{TableStore, UserId};
use crate::storage::{read_csv_file, stringify_csv, write_csv_file};
use rowsheet_engine::Query;
use std::path::Path;
use std::sync::Arc;

impl Document {
    /// Load a stored table. History starts at the stored text.
    pub fn open(
        store: &dyn TableStore,
        owner: &UserId,
        id: &str,
        options: HistoryOptions,
    ) -> Result<Self> {
        let record = store.load(owner, id)?;
        let mut doc = Self::with_options(record.csv, options);
        doc.name = record.name;
        doc.query = Query::parse(&record.query_spec);
        doc.query_spec = record.query_spec;
        tracing::debug!(%id, "opened table");
        Ok(doc)
    }

    /// [`Document::open`] plus autosave of every later change back to the store.
    pub fn open_with_autosave(
        store: &dyn TableStore,
        saver: Arc<AutoSaver>,
        owner: &UserId,
        id: &str,
        options: HistoryOptions,
    ) -> Result<Self> {
        let mut doc = Self::open(store, owner, id, options)?;
        doc.attach_autosave(saver, owner.clone(), id);
        Ok(doc)
    }

    /// Import a CSV file as a new document.
    pub fn import_csv(path: &Path, options: HistoryOptions) -> Result<Self> {
        let grid = read_csv_file(path)?;
        let mut doc = Self::with_options(stringify_csv(&grid), options);
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            doc.name = stem.to_string();
        }
        Ok(doc)
    }

    /// Write the raw text (formulas, not values) to a CSV file.
    pub fn export_csv(&self, path: &Path) -> Result<()> {
        write_csv_file(path, &self.grid())
    }
}

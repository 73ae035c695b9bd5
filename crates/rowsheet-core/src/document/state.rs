use crate::autosave::{AutoSaver, SaveRequest};
use crate::history::{EditHistory, HistoryOptions};
use crate::persistence::{TableUpdate, UserId};
use crate::storage::{Grid, initial_csv, parse_csv};
use crate::table::TableView;
use rowsheet_engine::{Query, TableLookup};
use std::sync::Arc;

/// Where a document's changes are autosaved to.
pub(crate) struct SaveTarget {
    pub(crate) saver: Arc<AutoSaver>,
    pub(crate) owner: UserId,
    pub(crate) id: String,
}

/// One open table: its text history, query and save wiring.
///
/// The CSV text in the history is the only copy of the data; grids and views
/// are derived from it on every read.
pub struct Document {
    pub(crate) history: EditHistory,
    /// Display name, persisted alongside the text
    pub(crate) name: String,
    pub(crate) query_spec: String,
    pub(crate) query: Query,
    /// Resolver for `table(":id")` references in formulas
    pub(crate) lookup: Option<Arc<dyn TableLookup>>,
    pub(crate) save_target: Option<SaveTarget>,
    /// Whether the text changed since load or the last flush
    pub modified: bool,
}

impl Document {
    /// Create a document over `csv`.
    ///
    /// Side-effect free: nothing is saved until [`Document::attach_autosave`].
    pub fn new(csv: impl Into<String>) -> Self {
        Self::with_options(csv, HistoryOptions::default())
    }

    pub fn with_options(csv: impl Into<String>, options: HistoryOptions) -> Self {
        Self {
            history: EditHistory::with_options(csv, options),
            name: String::new(),
            query_spec: String::new(),
            query: Query::default(),
            lookup: None,
            save_target: None,
            modified: false,
        }
    }

    /// A fresh table with the default header and one sample row.
    pub fn blank() -> Self {
        Self::new(initial_csv())
    }

    pub fn text(&self) -> &str {
        self.history.present()
    }

    pub fn grid(&self) -> Grid {
        parse_csv(self.history.present())
    }

    pub fn view(&self) -> TableView {
        TableView::from_grid(&self.grid())
    }

    pub fn history(&self) -> &EditHistory {
        &self.history
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn query_spec(&self) -> &str {
        &self.query_spec
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn set_lookup(&mut self, lookup: Option<Arc<dyn TableLookup>>) {
        self.lookup = lookup;
    }

    /// Send every later change of this document to `saver` under `id`.
    pub fn attach_autosave(&mut self, saver: Arc<AutoSaver>, owner: UserId, id: impl Into<String>) {
        self.save_target = Some(SaveTarget {
            saver,
            owner,
            id: id.into(),
        });
    }

    pub(crate) fn schedule_save(&self, update: TableUpdate) {
        if let Some(target) = &self.save_target {
            target.saver.schedule(SaveRequest {
                owner: target.owner.clone(),
                id: target.id.clone(),
                update,
            });
        }
    }

    /// Push pending saves to the store and wait for them.
    pub fn flush(&mut self) {
        if let Some(target) = &self.save_target {
            target.saver.flush();
            self.modified = false;
        }
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::blank()
    }
}

impl Drop for Document {
    fn drop(&mut self) {
        self.flush();
    }
}

//! rowsheet-core - UI-agnostic document model, history and storage.

pub mod autosave;
pub mod document;
pub mod error;
pub mod history;
pub mod lookup;
pub mod persistence;
pub mod storage;
pub mod table;

pub use autosave::{AutoSaver, SaveRequest};
pub use document::{CellKind, Document, RenderedCell, RenderedRow, RenderedTable};
pub use error::{Result, RowsheetError};
pub use history::{EditHistory, HistoryOptions};
pub use lookup::StoreLookup;
pub use persistence::{
    CancellationToken, FileStore, MemoryStore, TableRecord, TableStore, TableSummary,
    TableUpdate, UserId,
};
pub use table::TableView;

pub use rowsheet_engine::{FormulaValue, Query, QueryRow, RowFields};

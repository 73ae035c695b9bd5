//! Error types for Rowsheet core.

use thiserror::Error;

/// Errors that can occur while editing or persisting a table
#[derive(Error, Debug)]
pub enum RowsheetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Table not found: {0}")]
    NotFound(String),

    #[error("Refusing to read {path}: file too large ({size} bytes, max {max})")]
    FileTooLarge { path: String, size: u64, max: u64 },

    #[error("Nothing to undo")]
    NothingToUndo,

    #[error("Nothing to redo")]
    NothingToRedo,

    #[error("Row is not empty")]
    RowNotEmpty,

    #[error("Table must keep at least one body row")]
    TableTooSmall,

    #[error("Column is not empty")]
    ColumnNotEmpty,

    #[error("{what} index {index} out of bounds (len {len})")]
    OutOfBounds {
        what: &'static str,
        index: usize,
        len: usize,
    },

    #[error("Save cancelled")]
    Cancelled,

    #[error("Cell at row {row}, column {column} is not a button")]
    NotAButton { row: usize, column: usize },

    #[error("Button callback failed: {0}")]
    Button(String),
}

pub type Result<T> = std::result::Result<T, RowsheetError>;

//! Cross-document references from formulas (`table(":id")`).

use serde::{Deserialize, Serialize};

use crate::engine::RowFields;

/// Another document's contents as seen by a formula.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LookupTable {
    pub id: String,
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<RowFields>,
    pub footer: Vec<String>,
}

/// Resolves a document id to its table. Failures are `None`, never errors.
pub trait TableLookup: Send + Sync {
    fn lookup(&self, id: &str) -> Option<LookupTable>;
}

/// Strip the optional leading `:` reference marker; empty ids resolve to nothing.
pub fn normalize_table_id(raw: &str) -> Option<&str> {
    let id = raw.trim();
    let id = id.strip_prefix(':').unwrap_or(id);
    (!id.is_empty()).then_some(id)
}

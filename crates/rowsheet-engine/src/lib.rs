//! rowsheet-engine - formula evaluation and query execution over table rows.
//!
//! Everything here is a pure function of its inputs: the document model in
//! `rowsheet-core` owns the data and calls in on every render.

pub mod builtins;
pub mod engine;
pub mod lookup;
pub mod query;

pub use engine::{
    ButtonAction, EvalContext, Evaluation, FormulaValue, RowFields, evaluate, is_formula,
    stringify_formula_value,
};
pub use lookup::{LookupTable, TableLookup};
pub use query::{Query, QueryRow};

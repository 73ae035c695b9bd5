//! Formula engine API.
//!
//! - [`RowFields`] - A body row keyed by column name
//! - [`FormulaValue`], [`ButtonAction`] - Typed evaluation results
//! - [`evaluate`] - Evaluate one cell's text against its row/table context
//! - [`preprocess_expression`] - Rewrite the JS-flavoured surface syntax for Rhai
//! - [`parse_date`] - Locale date coercion used by `prop()` and queries
//! - [`stringify_formula_value`] - Format a result for display

mod dates;
mod eval;
mod preprocess;
mod row;
mod value;

pub use dates::{DATE_PATTERNS, format_date, parse_date};
pub(crate) use dates::years_between;
pub use eval::{
    EvalContext, Evaluation, MAX_RECURSION_DEPTH, create_engine, evaluate, is_formula,
    resolve_property, strip_formula_prefix,
};
pub use preprocess::preprocess_expression;
pub use row::RowFields;
pub use value::{
    ButtonAction, FormulaValue, format_number, js_number, parse_number_like,
    stringify_formula_value,
};
pub(crate) use value::rows_to_dynamic;

pub use rhai::{Dynamic, FnPtr};

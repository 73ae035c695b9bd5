//! Sandboxed formula evaluation.
//!
//! Every evaluation builds a fresh raw Rhai engine with the standard package,
//! the formula built-ins bound to the caller's context, no module resolver and
//! hard operation limits. Formula text never reaches anything but the injected
//! bindings.

use std::sync::{Arc, OnceLock};

use rhai::module_resolvers::DummyModuleResolver;
use rhai::packages::{Package, StandardPackage};
use rhai::{Array, Dynamic, Engine, EvalAltResult, Module, Scope, Shared};

use super::dates::parse_date;
use super::preprocess::preprocess_expression;
use super::row::RowFields;
use super::value::{ButtonRuntime, FormulaValue, rows_to_dynamic, stringify_formula_value};
use crate::lookup::TableLookup;

/// Nested `prop()` evaluation deeper than this fails the formula.
pub const MAX_RECURSION_DEPTH: usize = 4;

const MAX_OPERATIONS: u64 = 250_000;
const MAX_CALL_LEVELS: usize = 48;
const MAX_EXPR_DEPTH: usize = 64;
const MAX_FN_EXPR_DEPTH: usize = 32;
const MAX_STRING_SIZE: usize = 256 * 1024;
const MAX_ARRAY_SIZE: usize = 100_000;
const MAX_MAP_SIZE: usize = 10_000;

/// Everything a formula can see about the table it lives in.
#[derive(Clone, Default)]
pub struct EvalContext {
    pub rows: Arc<[RowFields]>,
    pub columns: Arc<[String]>,
    pub row_values: Option<RowFields>,
    pub row_index: Option<usize>,
    pub column_index: Option<usize>,
    pub depth: usize,
    pub lookup: Option<Arc<dyn TableLookup>>,
}

impl EvalContext {
    pub fn new(columns: impl Into<Arc<[String]>>, rows: impl Into<Arc<[RowFields]>>) -> Self {
        Self {
            rows: rows.into(),
            columns: columns.into(),
            ..Self::default()
        }
    }

    /// Context for a body cell: the row's fields and its index.
    pub fn with_row(mut self, row_index: usize, fields: RowFields) -> Self {
        self.row_index = Some(row_index);
        self.row_values = Some(fields);
        self
    }

    pub fn with_column(mut self, column_index: usize) -> Self {
        self.column_index = Some(column_index);
        self
    }

    pub fn with_lookup(mut self, lookup: Option<Arc<dyn TableLookup>>) -> Self {
        self.lookup = lookup;
        self
    }

    pub(crate) fn nested(&self) -> Self {
        let mut next = self.clone();
        next.depth += 1;
        next
    }

    /// Fields of the row `prop()` reads from: the bound row, or `rows[row_index]`.
    pub fn current_row(&self) -> Option<&RowFields> {
        self.row_values
            .as_ref()
            .or_else(|| self.rows.get(self.row_index.unwrap_or(0)))
    }

    /// Name of the column the formula lives in.
    pub fn current_column(&self) -> Option<&str> {
        self.column_index
            .and_then(|idx| self.columns.get(idx))
            .map(String::as_str)
    }

    /// Header name matching `name` case-insensitively.
    pub fn find_column(&self, name: &str) -> Option<&str> {
        let wanted = name.to_lowercase();
        self.columns
            .iter()
            .find(|c| c.to_lowercase() == wanted)
            .map(String::as_str)
    }
}

/// Outcome of evaluating a cell.
#[derive(Clone, Debug, PartialEq)]
pub struct Evaluation {
    pub is_formula: bool,
    pub value: FormulaValue,
    pub error: Option<String>,
}

impl Evaluation {
    fn plain(text: &str) -> Self {
        Self {
            is_formula: false,
            value: FormulaValue::Text(text.to_string()),
            error: None,
        }
    }

    fn failure(message: impl Into<String>) -> Self {
        Self {
            is_formula: true,
            value: FormulaValue::Null,
            error: Some(message.into()),
        }
    }

    /// Display text: `#ERR <message>` on failure, otherwise the stringified value.
    pub fn display(&self) -> String {
        match &self.error {
            Some(message) => format!("#ERR {}", message),
            None => stringify_formula_value(&self.value),
        }
    }
}

/// True when the left-trimmed text starts with `%`.
pub fn is_formula(text: &str) -> bool {
    text.trim_start().starts_with('%')
}

/// Remove every leading `%` (and whitespace around them).
pub fn strip_formula_prefix(text: &str) -> &str {
    let mut expr = text.trim_start();
    while let Some(rest) = expr.strip_prefix('%') {
        expr = rest.trim_start();
    }
    expr.trim_end()
}

/// Evaluate a cell's text. Never panics and never returns an error: failures
/// are reported in [`Evaluation::error`].
pub fn evaluate(text: &str, ctx: &EvalContext) -> Evaluation {
    if !is_formula(text) {
        return Evaluation::plain(text);
    }
    let expr = strip_formula_prefix(text);
    if expr.is_empty() {
        return Evaluation::failure("empty formula");
    }
    match run_expression(expr, ctx) {
        Ok(value) => Evaluation {
            is_formula: true,
            value,
            error: None,
        },
        Err(message) => Evaluation::failure(message),
    }
}

fn run_expression(expr: &str, ctx: &EvalContext) -> Result<FormulaValue, String> {
    if ctx.depth > MAX_RECURSION_DEPTH {
        return Err("formula recursion limit reached".to_string());
    }
    let next = ctx.nested();
    let engine = create_engine(&next);
    let script = preprocess_expression(expr);
    let mut scope = build_scope(&next);

    let ast = engine
        .compile_with_scope(&scope, &script)
        .map_err(|err| err.to_string())?;
    let result = engine
        .eval_ast_with_scope::<Dynamic>(&mut scope, &ast)
        .map_err(|err| error_message(&err))?;

    let mut value = FormulaValue::from_dynamic(result);
    bind_buttons(&mut value, engine, ast);
    Ok(value)
}

/// Give returned buttons the engine and script their callbacks were compiled in.
fn bind_buttons(value: &mut FormulaValue, engine: Engine, ast: rhai::AST) {
    if !contains_button(value) {
        return;
    }
    let runtime = ButtonRuntime::new(engine, ast);
    attach_runtime(value, &runtime);
}

fn contains_button(value: &FormulaValue) -> bool {
    match value {
        FormulaValue::Button(_) => true,
        FormulaValue::List(items) => items.iter().any(contains_button),
        _ => false,
    }
}

fn attach_runtime(value: &mut FormulaValue, runtime: &Arc<ButtonRuntime>) {
    match value {
        FormulaValue::Button(button) => button.attach(runtime.clone()),
        FormulaValue::List(items) => {
            for item in items.iter_mut() {
                attach_runtime(item, runtime);
            }
        }
        _ => {}
    }
}

fn standard_package() -> Shared<Module> {
    static PACKAGE: OnceLock<Shared<Module>> = OnceLock::new();
    PACKAGE
        .get_or_init(|| StandardPackage::new().as_shared_module())
        .clone()
}

/// Create a sandboxed engine with the formula built-ins bound to `ctx`.
pub fn create_engine(ctx: &EvalContext) -> Engine {
    let mut engine = Engine::new_raw();
    engine.register_global_module(standard_package());
    engine.set_module_resolver(DummyModuleResolver::new());
    engine.disable_symbol("eval");

    engine.set_max_operations(MAX_OPERATIONS);
    engine.set_max_call_levels(MAX_CALL_LEVELS);
    engine.set_max_expr_depths(MAX_EXPR_DEPTH, MAX_FN_EXPR_DEPTH);
    engine.set_max_string_size(MAX_STRING_SIZE);
    engine.set_max_array_size(MAX_ARRAY_SIZE);
    engine.set_max_map_size(MAX_MAP_SIZE);

    // Registered operator overloads must win over the built-in fast paths.
    engine.set_fast_operators(false);

    engine.on_print(|text| tracing::debug!(target: "rowsheet::formula", "{}", text));
    engine.on_debug(|text, source, pos| {
        tracing::debug!(target: "rowsheet::formula", ?source, %pos, "{}", text)
    });

    crate::builtins::register_builtins(&mut engine, ctx.clone());
    engine
}

fn build_scope(ctx: &EvalContext) -> Scope<'static> {
    let mut scope = Scope::new();
    let columns: Array = ctx.columns.iter().map(|c| Dynamic::from(c.clone())).collect();
    let row = ctx
        .row_values
        .as_ref()
        .map(|fields| Dynamic::from_map(fields.to_rhai_map()))
        .unwrap_or(Dynamic::UNIT);
    let index = |value: Option<usize>| value.map_or(Dynamic::UNIT, |v| Dynamic::from_int(v as i64));

    scope.push_dynamic("rows", rows_to_dynamic(&ctx.rows));
    scope.push("columns", columns);
    scope.push_dynamic("row", row.clone());
    scope.push_dynamic("rowValues", row);
    scope.push_dynamic("rowIndex", index(ctx.row_index));
    scope.push_dynamic("columnIndex", index(ctx.column_index));
    scope
}

/// Resolve a column of the current row the way `prop()` does.
///
/// Formula cells are evaluated one level deeper (their failure is returned as
/// `Err`); blank cells stay blank; other text becomes a date when it matches a
/// known pattern. Unknown columns resolve to null.
pub fn resolve_property(name: &str, ctx: &EvalContext) -> Result<FormulaValue, String> {
    let Some(column) = ctx.find_column(name) else {
        return Ok(FormulaValue::Null);
    };
    let Some(row) = ctx.current_row() else {
        return Ok(FormulaValue::Null);
    };
    let raw = row.get(column).unwrap_or_default();

    if is_formula(raw) {
        let mut nested = ctx.clone();
        nested.row_values = Some(row.clone());
        let evaluation = evaluate(raw, &nested);
        return match evaluation.error {
            Some(message) => Err(message),
            None => Ok(evaluation.value),
        };
    }
    if raw.is_empty() {
        return Ok(FormulaValue::Text(String::new()));
    }
    Ok(parse_date(raw)
        .map(FormulaValue::Date)
        .unwrap_or_else(|| FormulaValue::Text(raw.to_string())))
}

/// Plain message for a script failure, without Rhai's call-site wrapping.
pub(crate) fn error_message(err: &EvalAltResult) -> String {
    match err {
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => error_message(inner),
        EvalAltResult::ErrorRuntime(value, _) => value
            .clone()
            .into_string()
            .unwrap_or_else(|_| value.to_string()),
        other => other.to_string(),
    }
}

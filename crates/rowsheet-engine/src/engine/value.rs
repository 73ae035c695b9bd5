//! Typed formula results and their display form.

use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use rhai::{AST, Array, Dynamic, Engine, FnPtr, Map};

use super::dates::format_date;
use super::row::RowFields;

/// Result of evaluating a formula.
#[derive(Clone, Debug, PartialEq)]
pub enum FormulaValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    Date(NaiveDate),
    List(Vec<FormulaValue>),
    Button(ButtonAction),
    /// Maps and other script values, kept in their printed form.
    Other(String),
}

impl FormulaValue {
    pub fn from_dynamic(value: Dynamic) -> Self {
        let value = value.flatten();
        if value.is_unit() {
            return FormulaValue::Null;
        }
        if let Ok(b) = value.as_bool() {
            return FormulaValue::Bool(b);
        }
        if let Ok(n) = value.as_int() {
            return FormulaValue::Number(n as f64);
        }
        if let Ok(n) = value.as_float() {
            return FormulaValue::Number(n);
        }
        if let Ok(c) = value.as_char() {
            return FormulaValue::Text(c.to_string());
        }
        if value.is_string() {
            return FormulaValue::Text(value.into_string().unwrap_or_default());
        }
        if value.is::<NaiveDate>() {
            return FormulaValue::Date(value.cast::<NaiveDate>());
        }
        if value.is::<ButtonAction>() {
            return FormulaValue::Button(value.cast::<ButtonAction>());
        }
        if value.is_array() {
            let items = value.cast::<Array>();
            return FormulaValue::List(items.into_iter().map(FormulaValue::from_dynamic).collect());
        }
        FormulaValue::Other(value.to_string())
    }

    /// Convert back into a script value, used when `prop()` hands a nested
    /// formula result to the outer expression.
    pub fn into_dynamic(self) -> Dynamic {
        match self {
            FormulaValue::Null => Dynamic::UNIT,
            FormulaValue::Bool(b) => Dynamic::from_bool(b),
            FormulaValue::Number(n) if n.fract() == 0.0 && n.abs() < 9.0e15 => {
                Dynamic::from_int(n as i64)
            }
            FormulaValue::Number(n) => Dynamic::from_float(n),
            FormulaValue::Text(s) | FormulaValue::Other(s) => Dynamic::from(s),
            FormulaValue::Date(d) => Dynamic::from(d),
            FormulaValue::List(items) => Dynamic::from_array(
                items.into_iter().map(FormulaValue::into_dynamic).collect(),
            ),
            FormulaValue::Button(b) => Dynamic::from(b),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FormulaValue::Null)
    }

    pub fn as_button(&self) -> Option<&ButtonAction> {
        match self {
            FormulaValue::Button(b) => Some(b),
            _ => None,
        }
    }
}

impl fmt::Display for FormulaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&stringify_formula_value(self))
    }
}

/// Format a formula result for display.
///
/// Null and non-finite numbers render as an empty string; lists are joined
/// with commas; buttons show their label.
pub fn stringify_formula_value(value: &FormulaValue) -> String {
    match value {
        FormulaValue::Null => String::new(),
        FormulaValue::Bool(b) => if *b { "true" } else { "false" }.to_string(),
        FormulaValue::Number(n) if n.is_finite() => format_number(*n),
        FormulaValue::Number(_) => String::new(),
        FormulaValue::Text(s) | FormulaValue::Other(s) => s.clone(),
        FormulaValue::Date(d) => format_date(*d),
        FormulaValue::List(items) => items
            .iter()
            .map(stringify_formula_value)
            .collect::<Vec<_>>()
            .join(","),
        FormulaValue::Button(b) => b.label().to_string(),
    }
}

/// Shortest decimal form of a finite number: `19`, `1.5`, `-0` as `0`.
pub fn format_number(n: f64) -> String {
    if n == 0.0 {
        "0".to_string()
    } else {
        format!("{}", n)
    }
}

/// Numeric coercion with JavaScript `Number()` rules.
///
/// Blank strings and unit are zero, booleans are 0/1, unparseable text is NaN.
pub fn js_number(value: &Dynamic) -> f64 {
    let value = value.clone().flatten();
    if value.is_unit() {
        return 0.0;
    }
    if let Ok(n) = value.as_int() {
        return n as f64;
    }
    if let Ok(n) = value.as_float() {
        return n;
    }
    if let Ok(b) = value.as_bool() {
        return if b { 1.0 } else { 0.0 };
    }
    if let Ok(c) = value.as_char() {
        return parse_js_number(&c.to_string());
    }
    if value.is_string() {
        return parse_js_number(&value.into_string().unwrap_or_default());
    }
    if value.is::<NaiveDate>() {
        let date = value.cast::<NaiveDate>();
        return date
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp_millis() as f64)
            .unwrap_or(f64::NAN);
    }
    if value.is_array() {
        let items = value.cast::<Array>();
        return match items.len() {
            0 => 0.0,
            1 => js_number(&items[0]),
            _ => f64::NAN,
        };
    }
    f64::NAN
}

fn parse_js_number(text: &str) -> f64 {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    match trimmed {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    let radix = [("0x", 16), ("0X", 16), ("0o", 8), ("0O", 8), ("0b", 2), ("0B", 2)]
        .iter()
        .find(|(prefix, _)| trimmed.starts_with(prefix));
    if let Some((prefix, radix)) = radix {
        return u64::from_str_radix(&trimmed[prefix.len()..], *radix)
            .map(|n| n as f64)
            .unwrap_or(f64::NAN);
    }
    // Rust accepts "inf" and "nan" spellings that JavaScript rejects.
    if trimmed
        .chars()
        .any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E')
    {
        return f64::NAN;
    }
    trimmed.parse::<f64>().unwrap_or(f64::NAN)
}

/// Lenient number parsing for display-formatted input: currency symbols,
/// thousands separators and whitespace are ignored.
pub fn parse_number_like(text: &str) -> Option<f64> {
    let cleaned: String = text
        .chars()
        .filter(|c| !matches!(c, '$' | '￥' | '¥' | ',') && !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    let n = parse_js_number(&cleaned);
    n.is_finite().then_some(n)
}

/// Engine and compiled script a button callback was created in.
pub(crate) struct ButtonRuntime {
    engine: Engine,
    ast: AST,
}

impl ButtonRuntime {
    pub(crate) fn new(engine: Engine, ast: AST) -> Arc<Self> {
        Arc::new(Self { engine, ast })
    }
}

/// An action returned by `button(label, callback)`.
///
/// The callback is only callable once the evaluator has attached the engine
/// and compiled script it came from.
#[derive(Clone)]
pub struct ButtonAction {
    label: String,
    callback: FnPtr,
    runtime: Option<Arc<ButtonRuntime>>,
}

impl ButtonAction {
    pub(crate) fn new(label: String, callback: FnPtr) -> Self {
        Self {
            label,
            callback,
            runtime: None,
        }
    }

    pub(crate) fn attach(&mut self, runtime: Arc<ButtonRuntime>) {
        self.runtime = Some(runtime);
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Run the callback with `(rowIndex, columnIndex, rows)`.
    ///
    /// `rows` is handed to the script as a shared array of `#{ values: .. }`
    /// maps; whatever the callback writes into it is read back and returned.
    /// Persisting the returned rows is up to the caller.
    pub fn invoke(
        &self,
        columns: &[String],
        rows: &[RowFields],
        row_index: usize,
        column_index: usize,
    ) -> Result<Vec<RowFields>, String> {
        let runtime = self
            .runtime
            .as_ref()
            .ok_or_else(|| format!("button '{}' is not bound to a formula", self.label))?;

        let shared = rows_to_dynamic(rows).into_shared();
        // The callback's return value is unused; its effect is the edit to `shared`.
        let _returned: Dynamic = self
            .callback
            .call(
                &runtime.engine,
                &runtime.ast,
                (row_index as i64, column_index as i64, shared.clone()),
            )
            .map_err(|err| super::eval::error_message(&err))?;

        let updated = shared.flatten().try_cast::<Array>().unwrap_or_default();
        Ok(rows
            .iter()
            .enumerate()
            .map(|(idx, original)| {
                updated
                    .get(idx)
                    .and_then(|row| row.clone().flatten().try_cast::<Map>())
                    .and_then(|row| row.get("values").cloned())
                    .and_then(|values| values.flatten().try_cast::<Map>())
                    .map(|values| RowFields::from_rhai_map(columns, &values, original))
                    .unwrap_or_else(|| original.clone())
            })
            .collect())
    }
}

impl PartialEq for ButtonAction {
    fn eq(&self, other: &Self) -> bool {
        self.label == other.label && self.callback.fn_name() == other.callback.fn_name()
    }
}

impl fmt::Debug for ButtonAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ButtonAction")
            .field("label", &self.label)
            .field("callback", &self.callback.fn_name())
            .field("bound", &self.runtime.is_some())
            .finish()
    }
}

/// Script shape of the row set: an array of `#{ values: #{ column: text } }`.
pub(crate) fn rows_to_dynamic(rows: &[RowFields]) -> Dynamic {
    let array: Array = rows
        .iter()
        .map(|row| {
            let mut entry = Map::new();
            entry.insert("values".into(), Dynamic::from_map(row.to_rhai_map()));
            Dynamic::from_map(entry)
        })
        .collect();
    Dynamic::from_array(array)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stringify_null_and_bool() {
        assert_eq!(stringify_formula_value(&FormulaValue::Null), "");
        assert_eq!(stringify_formula_value(&FormulaValue::Bool(true)), "true");
        assert_eq!(stringify_formula_value(&FormulaValue::Bool(false)), "false");
    }

    #[test]
    fn test_stringify_numbers() {
        assert_eq!(stringify_formula_value(&FormulaValue::Number(12.0)), "12");
        assert_eq!(stringify_formula_value(&FormulaValue::Number(1.5)), "1.5");
        assert_eq!(stringify_formula_value(&FormulaValue::Number(-0.0)), "0");
        assert_eq!(stringify_formula_value(&FormulaValue::Number(f64::NAN)), "");
        assert_eq!(
            stringify_formula_value(&FormulaValue::Number(f64::INFINITY)),
            ""
        );
    }

    #[test]
    fn test_stringify_list_and_date() {
        let list = FormulaValue::List(vec![
            FormulaValue::Number(1.0),
            FormulaValue::Null,
            FormulaValue::Text("a".into()),
        ]);
        assert_eq!(stringify_formula_value(&list), "1,,a");
        let date = FormulaValue::Date(NaiveDate::from_ymd_opt(2025, 1, 5).unwrap());
        assert_eq!(stringify_formula_value(&date), "2025/01/05");
    }

    #[test]
    fn test_js_number_coercion() {
        assert_eq!(js_number(&Dynamic::from("  42 ")), 42.0);
        assert_eq!(js_number(&Dynamic::from("")), 0.0);
        assert_eq!(js_number(&Dynamic::UNIT), 0.0);
        assert_eq!(js_number(&Dynamic::from("0x10")), 16.0);
        assert_eq!(js_number(&Dynamic::from_bool(true)), 1.0);
        assert!(js_number(&Dynamic::from("abc")).is_nan());
        assert!(js_number(&Dynamic::from("inf")).is_nan());
    }

    #[test]
    fn test_parse_number_like_strips_currency() {
        assert_eq!(parse_number_like("$1,234"), Some(1234.0));
        assert_eq!(parse_number_like("¥ 500"), Some(500.0));
        assert_eq!(parse_number_like("  "), None);
        assert_eq!(parse_number_like("abc"), None);
    }

    #[test]
    fn test_dynamic_round_trip_keeps_integers() {
        let value = FormulaValue::Number(3.0).into_dynamic();
        assert_eq!(value.as_int(), Ok(3));
        let value = FormulaValue::Number(3.5).into_dynamic();
        assert_eq!(value.as_float(), Ok(3.5));
    }
}

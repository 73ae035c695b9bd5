//! Built-in formula functions.
//!
//! Conventions:
//! - Row/table helpers (`prop`, `sum`, `count`, `button`, `table`) are bound to
//!   the evaluation context by capturing a clone of it.
//! - `Math::*` and `agg::*` are static modules; formulas reach them through
//!   `Math.f(..)` and `_.f(..)`, which preprocessing rewrites.
//! - Numeric helpers coerce their arguments with JavaScript `Number()` rules.

use std::cmp::Ordering;
use std::sync::OnceLock;

use chrono::{Datelike, Local, NaiveDate};
use rand::Rng;
use regex::Regex;
use rhai::{
    Array, Dynamic, Engine, EvalAltResult, FnPtr, ImmutableString, Map, Module, Position, Shared,
};

use crate::engine::{
    ButtonAction, EvalContext, FormulaValue, format_date, js_number, parse_date,
    parse_number_like, resolve_property,
};
use crate::lookup::{LookupTable, normalize_table_id};

type FnResult<T> = Result<T, Box<EvalAltResult>>;

fn invalid_arg(message: &str) -> Box<EvalAltResult> {
    EvalAltResult::ErrorRuntime(message.into(), Position::NONE).into()
}

/// JavaScript truthiness, used by rewritten `c ? a : b` conditionals.
fn truthy(value: &Dynamic) -> bool {
    let value = value.clone().flatten();
    if value.is_unit() {
        return false;
    }
    if let Ok(b) = value.as_bool() {
        return b;
    }
    if let Ok(n) = value.as_int() {
        return n != 0;
    }
    if let Ok(n) = value.as_float() {
        return n != 0.0 && !n.is_nan();
    }
    if value.is_string() {
        return !value.into_string().unwrap_or_default().is_empty();
    }
    true
}

fn leading_number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*[+-]?(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?").unwrap())
}

/// `parseFloat`: the longest numeric prefix, NaN when there is none.
fn parse_float_prefix(value: &Dynamic) -> f64 {
    let text = FormulaValue::from_dynamic(value.clone()).to_string();
    leading_number_re()
        .find(&text)
        .and_then(|m| m.as_str().trim().parse::<f64>().ok())
        .unwrap_or(f64::NAN)
}

/// Loose equality between script values, comparing numbers numerically and
/// everything else by display form.
fn values_equal(a: &Dynamic, b: &Dynamic) -> bool {
    match (
        FormulaValue::from_dynamic(a.clone()),
        FormulaValue::from_dynamic(b.clone()),
    ) {
        (FormulaValue::Number(x), FormulaValue::Number(y)) => x == y,
        (FormulaValue::Null, FormulaValue::Null) => true,
        (FormulaValue::Null, _) | (_, FormulaValue::Null) => false,
        (x, y) => x.to_string() == y.to_string(),
    }
}

fn date_arg(value: &Dynamic) -> Option<NaiveDate> {
    let value = value.clone().flatten();
    if value.is::<NaiveDate>() {
        return Some(value.cast::<NaiveDate>());
    }
    value
        .into_string()
        .ok()
        .and_then(|text| parse_date(&text))
}

fn lookup_table_to_dynamic(table: LookupTable) -> Dynamic {
    let mut map = Map::new();
    map.insert("id".into(), Dynamic::from(table.id));
    map.insert("name".into(), Dynamic::from(table.name));
    map.insert(
        "columns".into(),
        Dynamic::from_array(table.columns.into_iter().map(Dynamic::from).collect()),
    );
    map.insert("rows".into(), crate::engine::rows_to_dynamic(&table.rows));
    map.insert(
        "footer".into(),
        Dynamic::from_array(table.footer.into_iter().map(Dynamic::from).collect()),
    );
    Dynamic::from_map(map)
}

/// Register every formula built-in on `engine`, bound to `ctx`.
pub fn register_builtins(engine: &mut Engine, ctx: EvalContext) {
    register_operators(engine);
    register_types(engine);
    register_conversions(engine);
    register_collections(engine);
    register_row_helpers(engine, ctx);
    engine.register_static_module("Math", math_module());
    engine.register_static_module("agg", agg_module());
}

fn register_operators(engine: &mut Engine) {
    engine.register_fn("truthy", |value: Dynamic| truthy(&value));

    // Integer division yields a float, as in JavaScript.
    engine.register_fn("/", |a: i64, b: i64| -> f64 { a as f64 / b as f64 });

    // Arithmetic between text and numbers coerces the text.
    macro_rules! coerce_ops {
        ($($op:tt => $f:expr),*) => {$(
            engine.register_fn($op, |a: ImmutableString, b: i64| -> f64 {
                $f(js_number(&Dynamic::from(a)), b as f64)
            });
            engine.register_fn($op, |a: i64, b: ImmutableString| -> f64 {
                $f(a as f64, js_number(&Dynamic::from(b)))
            });
            engine.register_fn($op, |a: ImmutableString, b: f64| -> f64 {
                $f(js_number(&Dynamic::from(a)), b)
            });
            engine.register_fn($op, |a: f64, b: ImmutableString| -> f64 {
                $f(a, js_number(&Dynamic::from(b)))
            });
            engine.register_fn($op, |a: ImmutableString, b: ImmutableString| -> f64 {
                $f(js_number(&Dynamic::from(a)), js_number(&Dynamic::from(b)))
            });
        )*};
    }
    coerce_ops!(
        "-" => |x: f64, y: f64| x - y,
        "*" => |x: f64, y: f64| x * y,
        "/" => |x: f64, y: f64| x / y
    );

    // Comparing text with a number compares numerically (`"5" > 3`, `"5" == 5`).
    // Text against text keeps Rhai's lexical comparison.
    macro_rules! compare_ops {
        ($($op:tt => $f:expr),*) => {$(
            engine.register_fn($op, |a: ImmutableString, b: i64| -> bool {
                $f(js_number(&Dynamic::from(a)), b as f64)
            });
            engine.register_fn($op, |a: i64, b: ImmutableString| -> bool {
                $f(a as f64, js_number(&Dynamic::from(b)))
            });
            engine.register_fn($op, |a: ImmutableString, b: f64| -> bool {
                $f(js_number(&Dynamic::from(a)), b)
            });
            engine.register_fn($op, |a: f64, b: ImmutableString| -> bool {
                $f(a, js_number(&Dynamic::from(b)))
            });
        )*};
    }
    compare_ops!(
        "<" => |x: f64, y: f64| x < y,
        "<=" => |x: f64, y: f64| x <= y,
        ">" => |x: f64, y: f64| x > y,
        ">=" => |x: f64, y: f64| x >= y,
        "==" => |x: f64, y: f64| x == y,
        "!=" => |x: f64, y: f64| x != y
    );

    engine.register_fn("-", |a: ImmutableString| -> f64 { -js_number(&Dynamic::from(a)) });
}

fn register_types(engine: &mut Engine) {
    engine
        .register_type_with_name::<NaiveDate>("Date")
        .register_get("year", |d: &mut NaiveDate| d.year() as i64)
        .register_get("month", |d: &mut NaiveDate| d.month() as i64)
        .register_get("day", |d: &mut NaiveDate| d.day() as i64)
        .register_fn("to_string", |d: &mut NaiveDate| format_date(*d))
        .register_fn("to_debug", |d: &mut NaiveDate| format_date(*d))
        .register_fn("==", |a: NaiveDate, b: NaiveDate| a == b)
        .register_fn("!=", |a: NaiveDate, b: NaiveDate| a != b)
        .register_fn("<", |a: NaiveDate, b: NaiveDate| a < b)
        .register_fn("<=", |a: NaiveDate, b: NaiveDate| a <= b)
        .register_fn(">", |a: NaiveDate, b: NaiveDate| a > b)
        .register_fn(">=", |a: NaiveDate, b: NaiveDate| a >= b)
        // Date difference in milliseconds.
        .register_fn("-", |a: NaiveDate, b: NaiveDate| {
            (a - b).num_milliseconds() as f64
        });

    engine
        .register_type_with_name::<ButtonAction>("Button")
        .register_get("label", |b: &mut ButtonAction| b.label().to_string())
        .register_fn("to_string", |b: &mut ButtonAction| b.label().to_string());
}

fn register_conversions(engine: &mut Engine) {
    engine.register_fn("Number", |value: Dynamic| js_number(&value));
    engine.register_fn("String", |value: Dynamic| {
        FormulaValue::from_dynamic(value).to_string()
    });
    engine.register_fn("parseFloat", |value: Dynamic| parse_float_prefix(&value));
    engine.register_fn("parseInt", |value: Dynamic| {
        let n = parse_float_prefix(&value);
        if n.is_finite() { n.trunc() } else { n }
    });
    engine.register_fn("parseNumber", |value: Dynamic| -> Dynamic {
        let text = FormulaValue::from_dynamic(value).to_string();
        parse_number_like(&text).map_or(Dynamic::UNIT, Dynamic::from_float)
    });
    engine.register_fn("isNaN", |value: Dynamic| js_number(&value).is_nan());
    engine.register_fn("date", |value: Dynamic| -> Dynamic {
        date_arg(&value).map_or(Dynamic::UNIT, Dynamic::from)
    });
    engine.register_fn("toFixed", |n: Dynamic, digits: i64| -> FnResult<String> {
        let digits = usize::try_from(digits)
            .ok()
            .filter(|d| *d <= 20)
            .ok_or_else(|| invalid_arg("toFixed() digits must be between 0 and 20"))?;
        Ok(format!("{:.*}", digits, js_number(&n)))
    });
}

fn register_collections(engine: &mut Engine) {
    engine.register_get("length", |arr: &mut Array| arr.len() as i64);
    engine.register_get("length", |s: &mut ImmutableString| s.chars().count() as i64);
    engine.register_fn("includes", |arr: &mut Array, value: Dynamic| {
        arr.iter().any(|item| values_equal(item, &value))
    });
    engine.register_fn("includes", |s: &mut ImmutableString, sub: ImmutableString| {
        s.contains(sub.as_str())
    });
    engine.register_fn("join", |arr: &mut Array, sep: ImmutableString| {
        arr.iter()
            .map(|item| FormulaValue::from_dynamic(item.clone()).to_string())
            .collect::<Vec<_>>()
            .join(sep.as_str())
    });
    engine.register_fn("join", |arr: &mut Array| {
        arr.iter()
            .map(|item| FormulaValue::from_dynamic(item.clone()).to_string())
            .collect::<Vec<_>>()
            .join(",")
    });
    engine.register_fn("toUpperCase", |s: &mut ImmutableString| s.to_uppercase());
    engine.register_fn("toLowerCase", |s: &mut ImmutableString| s.to_lowercase());
    engine.register_fn("startsWith", |s: &mut ImmutableString, p: ImmutableString| {
        s.starts_with(p.as_str())
    });
    engine.register_fn("endsWith", |s: &mut ImmutableString, p: ImmutableString| {
        s.ends_with(p.as_str())
    });
}

fn register_row_helpers(engine: &mut Engine, ctx: EvalContext) {
    for name in ["prop", "my"] {
        let ctx = ctx.clone();
        engine.register_fn(name, move |column: ImmutableString| -> FnResult<Dynamic> {
            resolve_property(column.as_str(), &ctx)
                .map(FormulaValue::into_dynamic)
                .map_err(|message| invalid_arg(&message))
        });
    }

    let sum_ctx = ctx.clone();
    engine.register_fn("sum", move || -> f64 {
        let Some(column) = sum_ctx.current_column() else {
            return 0.0;
        };
        sum_ctx
            .rows
            .iter()
            .map(|row| js_number(&Dynamic::from(row.get(column).unwrap_or_default().to_string())))
            .sum()
    });

    let count_ctx = ctx.clone();
    engine.register_fn("count", move |value: Dynamic| -> i64 {
        let Some(column) = count_ctx.current_column() else {
            return 0;
        };
        let wanted = FormulaValue::from_dynamic(value).to_string();
        count_ctx
            .rows
            .iter()
            .filter(|row| row.get(column) == Some(wanted.as_str()))
            .count() as i64
    });

    engine.register_fn("today", || format_date(Local::now().date_naive()));
    engine.register_fn("age", |value: Dynamic| -> FnResult<i64> {
        let date = date_arg(&value).ok_or_else(|| invalid_arg("age() expects a date"))?;
        Ok(crate::engine::years_between(date, Local::now().date_naive()))
    });

    engine.register_fn("button", |label: Dynamic, callback: FnPtr| {
        ButtonAction::new(FormulaValue::from_dynamic(label).to_string(), callback)
    });

    let lookup = ctx.lookup.clone();
    engine.register_fn("table", move |id: ImmutableString| -> Dynamic {
        let Some(lookup) = lookup.as_ref() else {
            return Dynamic::UNIT;
        };
        normalize_table_id(id.as_str())
            .and_then(|id| lookup.lookup(id))
            .map_or(Dynamic::UNIT, lookup_table_to_dynamic)
    });
}

fn numbers(arr: &Array) -> impl Iterator<Item = f64> + '_ {
    arr.iter().map(js_number)
}

fn math_module() -> Shared<Module> {
    let mut module = Module::new();
    module.set_var("PI", std::f64::consts::PI);
    module.set_var("E", std::f64::consts::E);

    macro_rules! unary {
        ($($name:literal => $f:expr),* $(,)?) => {$(
            module.set_native_fn($name, |x: Dynamic| Ok($f(js_number(&x))));
        )*};
    }
    unary!(
        "abs" => f64::abs,
        "ceil" => f64::ceil,
        "floor" => f64::floor,
        // JavaScript rounds halves towards positive infinity.
        "round" => |x: f64| (x + 0.5).floor(),
        "trunc" => f64::trunc,
        "sign" => |x: f64| if x.is_nan() || x == 0.0 { x } else { x.signum() },
        "sqrt" => f64::sqrt,
        "log" => f64::ln,
        "exp" => f64::exp,
    );
    module.set_native_fn("pow", |x: Dynamic, y: Dynamic| {
        Ok(js_number(&x).powf(js_number(&y)))
    });
    module.set_native_fn("random", || Ok(rand::thread_rng().r#gen::<f64>()));

    module.set_native_fn("max", |a: Dynamic, b: Dynamic| {
        Ok(fold_extreme([a, b].iter().map(js_number), Ordering::Greater))
    });
    module.set_native_fn("max", |a: Dynamic, b: Dynamic, c: Dynamic| {
        Ok(fold_extreme([a, b, c].iter().map(js_number), Ordering::Greater))
    });
    module.set_native_fn("max", |arr: Array| {
        Ok(fold_extreme(numbers(&arr), Ordering::Greater))
    });
    module.set_native_fn("min", |a: Dynamic, b: Dynamic| {
        Ok(fold_extreme([a, b].iter().map(js_number), Ordering::Less))
    });
    module.set_native_fn("min", |a: Dynamic, b: Dynamic, c: Dynamic| {
        Ok(fold_extreme([a, b, c].iter().map(js_number), Ordering::Less))
    });
    module.set_native_fn("min", |arr: Array| {
        Ok(fold_extreme(numbers(&arr), Ordering::Less))
    });

    module.into()
}

/// `Math.max`/`Math.min` semantics: NaN poisons, empty input gives -/+Infinity.
fn fold_extreme(values: impl Iterator<Item = f64>, keep: Ordering) -> f64 {
    let start = if keep == Ordering::Greater {
        f64::NEG_INFINITY
    } else {
        f64::INFINITY
    };
    values.fold(start, |acc, x| {
        if acc.is_nan() || x.is_nan() {
            f64::NAN
        } else if x.partial_cmp(&acc) == Some(keep) {
            x
        } else {
            acc
        }
    })
}

fn agg_module() -> Shared<Module> {
    let mut module = Module::new();

    module.set_native_fn("sum", |arr: Array| Ok(numbers(&arr).sum::<f64>()));
    module.set_native_fn("mean", |arr: Array| {
        Ok(if arr.is_empty() {
            f64::NAN
        } else {
            numbers(&arr).sum::<f64>() / arr.len() as f64
        })
    });
    module.set_native_fn("count", |arr: Array| Ok(arr.len() as i64));
    module.set_native_fn("max", |arr: Array| {
        Ok(if arr.is_empty() {
            Dynamic::UNIT
        } else {
            Dynamic::from_float(fold_extreme(numbers(&arr), Ordering::Greater))
        })
    });
    module.set_native_fn("min", |arr: Array| {
        Ok(if arr.is_empty() {
            Dynamic::UNIT
        } else {
            Dynamic::from_float(fold_extreme(numbers(&arr), Ordering::Less))
        })
    });
    module.set_native_fn("uniq", |arr: Array| {
        let mut out = Array::new();
        for item in arr {
            if !out.iter().any(|seen| values_equal(seen, &item)) {
                out.push(item);
            }
        }
        Ok(out)
    });
    module.set_native_fn("round", |x: Dynamic| Ok((js_number(&x) + 0.5).floor()));
    module.set_native_fn("round", |x: Dynamic, precision: i64| {
        let factor = 10f64.powi(precision.clamp(-15, 15) as i32);
        Ok((js_number(&x) * factor).round() / factor)
    });

    module.into()
}

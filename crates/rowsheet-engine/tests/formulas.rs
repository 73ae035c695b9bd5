use rowsheet_engine::{EvalContext, FormulaValue, Query, RowFields, evaluate, stringify_formula_value};

fn table(columns: &[&str], rows: &[&[&str]]) -> (Vec<String>, Vec<RowFields>) {
    let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
    let rows = rows
        .iter()
        .map(|row| {
            let row: Vec<String> = row.iter().map(|c| c.to_string()).collect();
            RowFields::from_row(&columns, &row)
        })
        .collect();
    (columns, rows)
}

#[test]
fn test_power_binds_tighter_than_product() {
    let result = evaluate("% 1 + 2 * 3 ** 2", &EvalContext::default());
    assert!(result.is_formula);
    assert_eq!(result.error, None);
    assert_eq!(result.value, FormulaValue::Number(19.0));
}

#[test]
fn test_plain_text_passes_through() {
    let result = evaluate("plain", &EvalContext::default());
    assert!(!result.is_formula);
    assert_eq!(result.value, FormulaValue::Text("plain".into()));
}

#[test]
fn test_stringify_basics() {
    assert_eq!(stringify_formula_value(&FormulaValue::Null), "");
    assert_eq!(stringify_formula_value(&FormulaValue::Bool(true)), "true");
}

#[test]
fn test_row_formula_with_dates_and_helpers() {
    let (columns, rows) = table(
        &["id", "Due", "Price", "Label"],
        &[&["1", "2024/03/05", "$1,200", ""]],
    );
    let ctx = EvalContext::new(columns, rows.clone())
        .with_row(0, rows[0].clone())
        .with_column(3);
    let result = evaluate("% prop('Due').year", &ctx);
    assert_eq!(result.error, None);
    assert_eq!(result.value, FormulaValue::Number(2024.0));
    let result = evaluate("% prop('due').month", &ctx);
    assert_eq!(result.value, FormulaValue::Number(3.0));
    let result = evaluate("% parseNumber(prop('Price')) / 2", &ctx);
    assert_eq!(result.value, FormulaValue::Number(600.0));
}

#[test]
fn test_query_over_formula_column() {
    let (columns, rows) = table(
        &["id", "N", "Big"],
        &[
            &["a", "5", "% Number(prop('N')) > 3"],
            &["b", "1", "% Number(prop('N')) > 3"],
            &["c", "9", "% Number(prop('N')) > 3"],
        ],
    );
    let ctx = EvalContext::new(columns, rows.clone());
    let result = Query::parse(r#""Big":"true" "N":DESC"#).apply(&rows, &ctx);
    let ids: Vec<&str> = result.iter().map(|r| r.fields.get("id").unwrap()).collect();
    assert_eq!(ids, vec!["c", "a"]);
}

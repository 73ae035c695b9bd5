//! Rendering: evaluate every visible cell and apply the query.

use super::Document;
use crate::table::TableView;
use rowsheet_engine::{EvalContext, FormulaValue, QueryRow, RowFields, evaluate};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CellKind {
    /// Literal text
    Plain,
    /// Successfully evaluated formula
    Value,
    /// Formula that failed; `display` is `#ERR <message>`
    Error,
    /// Formula that returned a button
    Button,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RenderedCell {
    pub raw: String,
    pub display: String,
    pub kind: CellKind,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RenderedRow {
    /// Index of the row in the unfiltered body
    pub index: usize,
    pub cells: Vec<RenderedCell>,
}

/// A table ready for display: query applied, formulas evaluated.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RenderedTable {
    pub columns: Vec<String>,
    pub rows: Vec<RenderedRow>,
    pub footer: Vec<RenderedCell>,
}

fn render_cell(raw: &str, ctx: &EvalContext) -> RenderedCell {
    let evaluation = evaluate(raw, ctx);
    let kind = if !evaluation.is_formula {
        CellKind::Plain
    } else if evaluation.error.is_some() {
        CellKind::Error
    } else if matches!(evaluation.value, FormulaValue::Button(_)) {
        CellKind::Button
    } else {
        CellKind::Value
    };
    RenderedCell {
        raw: raw.to_string(),
        display: evaluation.display(),
        kind,
    }
}

impl Document {
    /// Context shared by every cell of `view`.
    pub(crate) fn base_context(&self, view: &TableView, rows: &[RowFields]) -> EvalContext {
        let columns: Arc<[String]> = view.columns.clone().into();
        EvalContext::new(columns, rows.to_vec()).with_lookup(self.lookup.clone())
    }

    /// Context for a formula evaluated against the whole table rather than a
    /// cell: every body row visible, no current row, the document's lookup.
    pub fn formula_context(&self) -> EvalContext {
        let view = self.view();
        let rows = view.all_row_fields();
        self.base_context(&view, &rows)
    }

    /// Body rows surviving the current query, in display order.
    pub fn query_view(&self) -> Vec<QueryRow> {
        let view = self.view();
        let rows = view.all_row_fields();
        let ctx = self.base_context(&view, &rows);
        self.query.apply(&rows, &ctx)
    }

    /// Evaluate one body cell.
    pub fn evaluate_cell(&self, body_index: usize, column: usize) -> Option<RenderedCell> {
        let view = self.view();
        let raw = view.body.get(body_index)?.get(column)?.clone();
        let rows = view.all_row_fields();
        let ctx = self
            .base_context(&view, &rows)
            .with_row(body_index, rows[body_index].clone())
            .with_column(column);
        Some(render_cell(&raw, &ctx))
    }

    /// Evaluate the whole table. Every formula is recomputed on each call.
    pub fn render(&self) -> RenderedTable {
        let view = self.view();
        let rows = view.all_row_fields();
        let ctx = self.base_context(&view, &rows);
        let visible = self.query.apply(&rows, &ctx);

        let rendered_rows = visible
            .into_iter()
            .map(|QueryRow { index, fields }| {
                let row_ctx = ctx.clone().with_row(index, fields);
                let cells = view.body[index]
                    .iter()
                    .enumerate()
                    .map(|(col, raw)| render_cell(raw, &row_ctx.clone().with_column(col)))
                    .collect();
                RenderedRow { index, cells }
            })
            .collect();

        let footer = view
            .footer
            .iter()
            .enumerate()
            .map(|(col, raw)| render_cell(raw, &ctx.clone().with_column(col)))
            .collect();

        RenderedTable {
            columns: view.columns.clone(),
            rows: rendered_rows,
            footer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "id,Name,N,Double\n\
                          r1,alice,1,% Number(prop('N')) * 2\n\
                          r2,bob,10,% Number(prop('N')) * 2\n\
                          ,,% sum(),% count('bob')";

    #[test]
    fn test_render_evaluates_body_and_footer() {
        let doc = Document::new(SAMPLE);
        let table = doc.render();
        assert_eq!(table.columns, vec!["id", "Name", "N", "Double"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0].cells[3].display, "2");
        assert_eq!(table.rows[0].cells[3].kind, CellKind::Value);
        assert_eq!(table.rows[1].cells[3].display, "20");
        assert_eq!(table.rows[0].cells[1].kind, CellKind::Plain);
        assert_eq!(table.footer[2].display, "11");
    }

    #[test]
    fn test_render_applies_query() {
        let mut doc = Document::new(SAMPLE);
        doc.set_query_spec("\"N\":DESC");
        let table = doc.render();
        assert_eq!(table.rows[0].index, 1);
        assert_eq!(table.rows[0].cells[1].display, "bob");
        doc.set_query_spec("-\"Name\":\"BOB\"");
        let rows = doc.query_view();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].index, 0);
    }

    #[test]
    fn test_render_marks_errors() {
        let doc = Document::new("id,A\nr1,% 1 +\n,");
        let table = doc.render();
        assert_eq!(table.rows[0].cells[1].kind, CellKind::Error);
        assert!(table.rows[0].cells[1].display.starts_with("#ERR "));
    }

    #[test]
    fn test_evaluate_single_cell() {
        let doc = Document::new(SAMPLE);
        let cell = doc.evaluate_cell(1, 3).unwrap();
        assert_eq!(cell.display, "20");
        assert!(doc.evaluate_cell(5, 0).is_none());
    }

    #[test]
    fn test_formula_context_reaches_lookup() {
        use crate::StoreLookup;
        use crate::persistence::{CancellationToken, MemoryStore, TableStore, TableUpdate, UserId};

        let store = Arc::new(MemoryStore::new());
        let owner = UserId::new("u");
        let record = store.create(&owner, Some("Drinks")).unwrap();
        store
            .save(
                &owner,
                &record.id,
                &TableUpdate {
                    csv: Some("id,Item
1,tea
,".into()),
                    ..TableUpdate::default()
                },
                &CancellationToken::new(),
            )
            .unwrap();

        let mut doc = Document::new(SAMPLE);
        let ctx = doc.formula_context();
        assert_eq!(evaluate("% rows.length", &ctx).value, FormulaValue::Number(2.0));
        assert_eq!(
            evaluate(&format!("% table(':{}')", record.id), &ctx).value,
            FormulaValue::Null
        );

        doc.set_lookup(Some(Arc::new(StoreLookup::new(store, owner))));
        let formula = format!("% table(':{}').name", record.id);
        assert_eq!(
            evaluate(&formula, &doc.formula_context()).value,
            FormulaValue::Text("Drinks".into())
        );
    }
}

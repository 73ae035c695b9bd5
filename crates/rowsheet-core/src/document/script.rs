//! Button presses: run a cell's `button(label, callback)` and write back the rows.

use super::Document;
use crate::error::{Result, RowsheetError};
use crate::storage::ensure_row_length;
use rowsheet_engine::evaluate;

impl Document {
    /// Press the button rendered in a body cell.
    ///
    /// The callback sees `(rowIndex, columnIndex, rows)`; whatever it writes
    /// into `rows[i].values` is stored back as one undoable edit. Returns the
    /// number of rows that changed.
    pub fn press_button(&mut self, body_index: usize, column: usize) -> Result<usize> {
        let view = self.view();
        let not_a_button = || RowsheetError::NotAButton {
            row: body_index,
            column,
        };
        let raw = view
            .body
            .get(body_index)
            .and_then(|row| row.get(column))
            .ok_or_else(not_a_button)?;

        let rows = view.all_row_fields();
        let ctx = self
            .base_context(&view, &rows)
            .with_row(body_index, rows[body_index].clone())
            .with_column(column);
        let evaluation = evaluate(raw, &ctx);
        if let Some(message) = evaluation.error {
            return Err(RowsheetError::Button(message));
        }
        let button = evaluation.value.as_button().ok_or_else(not_a_button)?;
        let updated = button
            .invoke(&view.columns, &rows, body_index, column)
            .map_err(RowsheetError::Button)?;

        let changed: Vec<usize> = updated
            .iter()
            .zip(rows.iter())
            .enumerate()
            .filter(|(_, (after, before))| after != before)
            .map(|(idx, _)| idx)
            .collect();
        if changed.is_empty() {
            return Ok(0);
        }
        tracing::debug!(label = button.label(), rows = changed.len(), "button updated rows");

        let columns = view.columns.clone();
        self.apply_grid(|grid| {
            let width = columns.len();
            for &idx in &changed {
                let Some(row) = grid.get_mut(idx + 1) else {
                    continue;
                };
                let original = ensure_row_length(row, width);
                *row = updated[idx].to_row(&columns, &original);
            }
            Ok(changed.len())
        })
    }
}

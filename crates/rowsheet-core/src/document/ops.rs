use super::Document;
use crate::error::{Result, RowsheetError};
use crate::persistence::TableUpdate;
use crate::storage::{Grid, parse_csv, stringify_csv};
use crate::table;
use rowsheet_engine::Query;

impl Document {
    /// Run `transform` over a freshly parsed grid and record the result.
    ///
    /// A failed transform leaves text and history untouched.
    pub(crate) fn apply_grid<T>(&mut self, transform: impl FnOnce(&mut Grid) -> Result<T>) -> Result<T> {
        let mut grid = parse_csv(self.history.present());
        let out = transform(&mut grid)?;
        let text = stringify_csv(&grid);
        if self.history.set(text) {
            self.text_changed();
        }
        Ok(out)
    }

    fn text_changed(&mut self) {
        self.modified = true;
        self.schedule_save(TableUpdate {
            csv: Some(self.history.present().to_string()),
            ..TableUpdate::default()
        });
    }

    /// Replace the whole text, e.g. from an import.
    pub fn replace_text(&mut self, text: impl Into<String>) {
        if self.history.set(text) {
            self.text_changed();
        }
    }

    /// Write a body cell. A `% ` value fills the whole column.
    pub fn set_cell(&mut self, body_index: usize, column: usize, value: &str) -> Result<()> {
        self.apply_grid(|grid| table::set_cell(grid, body_index, column, value))
    }

    /// Rename a column. A `% ` value fills the column instead.
    pub fn set_header(&mut self, column: usize, name: &str) -> Result<()> {
        self.apply_grid(|grid| table::rename_column(grid, column, name))
    }

    pub fn set_footer(&mut self, column: usize, value: &str) -> Result<()> {
        self.apply_grid(|grid| table::set_footer_cell(grid, column, value))
    }

    pub fn insert_row_above(&mut self, body_index: usize) -> Result<()> {
        self.apply_grid(|grid| table::insert_row_above(grid, body_index))
    }

    pub fn insert_row_below(&mut self, body_index: usize) -> Result<()> {
        self.apply_grid(|grid| table::insert_row_below(grid, body_index))
    }

    pub fn append_row(&mut self) -> Result<()> {
        self.apply_grid(|grid| {
            table::append_row(grid);
            Ok(())
        })
    }

    /// Delete an empty body row.
    pub fn delete_row(&mut self, body_index: usize) -> Result<()> {
        self.apply_grid(|grid| {
            let too_small = grid.len() <= 3;
            if table::delete_row_if_empty(grid, body_index)? {
                Ok(())
            } else if too_small {
                Err(RowsheetError::TableTooSmall)
            } else {
                Err(RowsheetError::RowNotEmpty)
            }
        })
    }

    pub fn insert_column(&mut self, at: usize) -> Result<()> {
        self.apply_grid(|grid| {
            table::insert_column(grid, at);
            Ok(())
        })
    }

    /// Delete a column regardless of its contents.
    pub fn delete_column(&mut self, at: usize) -> Result<()> {
        self.apply_grid(|grid| table::delete_column(grid, at))
    }

    /// Delete a column only if it holds no values anywhere.
    pub fn delete_empty_column(&mut self, at: usize) -> Result<()> {
        self.apply_grid(|grid| {
            if table::delete_column_if_empty(grid, at)? {
                Ok(())
            } else {
                Err(RowsheetError::ColumnNotEmpty)
            }
        })
    }

    pub fn fill_column(&mut self, column: usize, value: &str) -> Result<()> {
        self.apply_grid(|grid| table::fill_column(grid, column, value))
    }

    /// Begin coalescing edits (e.g. while a cell has focus).
    pub fn start_draft(&mut self) {
        self.history.start_draft();
    }

    /// Close the draft as a single undo step.
    pub fn commit_draft(&mut self) {
        self.history.commit_draft();
    }

    pub fn undo(&mut self) -> Result<()> {
        if !self.history.undo() {
            return Err(RowsheetError::NothingToUndo);
        }
        self.text_changed();
        Ok(())
    }

    pub fn redo(&mut self) -> Result<()> {
        if !self.history.redo() {
            return Err(RowsheetError::NothingToRedo);
        }
        self.text_changed();
        Ok(())
    }

    /// Change the query; it is re-parsed and saved but not part of undo history.
    pub fn set_query_spec(&mut self, spec: impl Into<String>) {
        let spec = spec.into();
        if spec == self.query_spec {
            return;
        }
        self.query = Query::parse(&spec);
        self.query_spec = spec.clone();
        self.schedule_save(TableUpdate {
            query_spec: Some(spec),
            ..TableUpdate::default()
        });
    }

    pub fn rename(&mut self, name: impl Into<String>) {
        let name = name.into();
        if name == self.name {
            return;
        }
        self.name = name.clone();
        self.schedule_save(TableUpdate {
            name: Some(name),
            ..TableUpdate::default()
        });
    }
}

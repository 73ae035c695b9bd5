//! Table view model and grid mutations.
//!
//! Mutations operate on a parsed [`Grid`] in place; the document re-serializes
//! the grid afterwards so every change is one text -> grid -> text round trip.
//! Body indices are zero-based and exclude the header.

use crate::error::{Result, RowsheetError};
use crate::storage::{
    Grid, create_empty_row, ensure_row_length, extract_body, extract_columns, extract_footer,
};
use rowsheet_engine::RowFields;

/// Prefix marking a value as a column formula that fills the whole body.
pub const MACRO_FILL_PREFIX: &str = "% ";

/// Minimum grid size (header, one body row, footer) below which rows are not deleted.
const MIN_ROWS_FOR_DELETE: usize = 3;

/// Read-only view of a grid with every row padded to the header width.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TableView {
    pub columns: Vec<String>,
    pub body: Vec<Vec<String>>,
    pub footer: Vec<String>,
}

impl TableView {
    pub fn from_grid(grid: &[Vec<String>]) -> Self {
        Self {
            columns: extract_columns(grid),
            body: extract_body(grid),
            footer: extract_footer(grid),
        }
    }

    pub fn row_fields(&self, body_index: usize) -> Option<RowFields> {
        self.body
            .get(body_index)
            .map(|row| RowFields::from_row(&self.columns, row))
    }

    pub fn all_row_fields(&self) -> Vec<RowFields> {
        self.body
            .iter()
            .map(|row| RowFields::from_row(&self.columns, row))
            .collect()
    }
}

pub fn is_macro_fill(value: &str) -> bool {
    value.starts_with(MACRO_FILL_PREFIX)
}

fn body_len(grid: &Grid) -> usize {
    grid.len().saturating_sub(2)
}

fn check_body_index(grid: &Grid, body_index: usize) -> Result<()> {
    let len = body_len(grid);
    if body_index >= len {
        return Err(RowsheetError::OutOfBounds {
            what: "row",
            index: body_index,
            len,
        });
    }
    Ok(())
}

fn header_width(grid: &Grid) -> usize {
    grid.first().map_or(0, Vec::len)
}

pub fn insert_row_above(grid: &mut Grid, body_index: usize) -> Result<()> {
    check_body_index(grid, body_index)?;
    let row = create_empty_row(grid);
    grid.insert(body_index + 1, row);
    Ok(())
}

pub fn insert_row_below(grid: &mut Grid, body_index: usize) -> Result<()> {
    check_body_index(grid, body_index)?;
    let row = create_empty_row(grid);
    grid.insert(body_index + 2, row);
    Ok(())
}

/// Add a row at the end of the body, keeping the footer last.
///
/// A header-only grid gains the new row plus an empty footer.
pub fn append_row(grid: &mut Grid) {
    let row = create_empty_row(grid);
    if grid.len() <= 1 {
        let width = header_width(grid);
        grid.push(row);
        grid.push(vec![String::new(); width]);
    } else {
        let at = grid.len() - 1;
        grid.insert(at, row);
    }
}

/// Delete a body row whose cells (identifier included) are all empty.
///
/// Returns `false` and leaves the grid untouched when the row has content or
/// the table would lose its last body row.
pub fn delete_row_if_empty(grid: &mut Grid, body_index: usize) -> Result<bool> {
    check_body_index(grid, body_index)?;
    if grid.len() <= MIN_ROWS_FOR_DELETE {
        return Ok(false);
    }
    let at = body_index + 1;
    if grid[at].iter().any(|cell| !cell.is_empty()) {
        return Ok(false);
    }
    grid.remove(at);
    Ok(true)
}

/// Insert an empty cell at `at` in every row, header and footer included.
pub fn insert_column(grid: &mut Grid, at: usize) {
    if grid.is_empty() {
        let seed = create_empty_row(grid);
        grid.push(seed.clone());
        grid.push(seed);
    }
    for row in grid.iter_mut() {
        let idx = at.min(row.len());
        row.insert(idx, String::new());
    }
}

/// Remove column `at` from every row that has it.
pub fn delete_column(grid: &mut Grid, at: usize) -> Result<()> {
    let width = header_width(grid);
    if at >= width {
        return Err(RowsheetError::OutOfBounds {
            what: "column",
            index: at,
            len: width,
        });
    }
    for row in grid.iter_mut() {
        if at < row.len() {
            row.remove(at);
        }
    }
    Ok(())
}

/// Delete a column only when no row, header and footer included, has a value in it.
pub fn delete_column_if_empty(grid: &mut Grid, at: usize) -> Result<bool> {
    let occupied = grid
        .iter()
        .any(|row| row.get(at).is_some_and(|cell| !cell.is_empty()));
    if occupied {
        return Ok(false);
    }
    delete_column(grid, at)?;
    Ok(true)
}

/// Rename a header cell; a macro-fill value fills the body instead.
pub fn rename_column(grid: &mut Grid, at: usize, name: &str) -> Result<()> {
    if is_macro_fill(name) {
        return fill_column(grid, at, name);
    }
    if grid.is_empty() {
        grid.push(Vec::new());
    }
    let header = &mut grid[0];
    if header.len() <= at {
        header.resize(at + 1, String::new());
    }
    header[at] = name.to_string();
    Ok(())
}

/// Write one body cell; a macro-fill value fills the whole column.
pub fn set_cell(grid: &mut Grid, body_index: usize, column: usize, value: &str) -> Result<()> {
    check_body_index(grid, body_index)?;
    if is_macro_fill(value) {
        return fill_column(grid, column, value);
    }
    let width = header_width(grid).max(column + 1);
    let row = &mut grid[body_index + 1];
    *row = ensure_row_length(row, width);
    row[column] = value.to_string();
    Ok(())
}

/// Write one footer cell. Footer values are never macro-filled.
pub fn set_footer_cell(grid: &mut Grid, column: usize, value: &str) -> Result<()> {
    if grid.len() <= 1 {
        let width = header_width(grid);
        if grid.is_empty() {
            grid.push(vec![String::new(); width]);
        }
        grid.push(vec![String::new(); width]);
    }
    let width = header_width(grid).max(column + 1);
    let last = grid.len() - 1;
    let footer = &mut grid[last];
    *footer = ensure_row_length(footer, width);
    footer[column] = value.to_string();
    Ok(())
}

/// Write `value` into `column` of every body row.
pub fn fill_column(grid: &mut Grid, column: usize, value: &str) -> Result<()> {
    let width = header_width(grid);
    if column >= width {
        return Err(RowsheetError::OutOfBounds {
            what: "column",
            index: column,
            len: width,
        });
    }
    let body_end = grid.len().saturating_sub(1);
    for row in grid.iter_mut().take(body_end).skip(1) {
        *row = ensure_row_length(row, width);
        row[column] = value.to_string();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(rows: &[&[&str]]) -> Grid {
        rows.iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect()
    }

    fn sample() -> Grid {
        grid(&[
            &["id", "Name", "N"],
            &["r1", "alice", "1"],
            &["r2", "bob", "2"],
            &["", "", "% sum()"],
        ])
    }

    #[test]
    fn test_view_pads_rows() {
        let g = grid(&[&["id", "A", "B"], &["1"], &[""]]);
        let view = TableView::from_grid(&g);
        assert_eq!(view.body, grid(&[&["1", "", ""]]));
        assert_eq!(view.footer, vec!["", "", ""]);
        let fields = view.row_fields(0).unwrap();
        assert_eq!(fields.get("B"), Some(""));
        assert!(view.row_fields(1).is_none());
    }

    #[test]
    fn test_insert_rows_relative_to_body_row() {
        let mut g = sample();
        insert_row_above(&mut g, 0).unwrap();
        assert_eq!(g.len(), 5);
        assert_eq!(g[2][0], "r1");
        insert_row_below(&mut g, 2).unwrap();
        assert_eq!(g.len(), 6);
        assert_eq!(g[3][0], "r2");
        assert_eq!(g[5][2], "% sum()");
        assert!(insert_row_above(&mut g, 10).is_err());
    }

    #[test]
    fn test_append_row_stays_before_footer() {
        let mut g = sample();
        append_row(&mut g);
        assert_eq!(g.len(), 5);
        assert_eq!(g[4][2], "% sum()");
        assert_eq!(g[3][1], "");
    }

    #[test]
    fn test_append_row_to_header_only_grid() {
        let mut g = grid(&[&["id", "A"]]);
        append_row(&mut g);
        assert_eq!(g.len(), 3);
        assert_eq!(g[2], vec!["", ""]);
    }

    #[test]
    fn test_delete_row_only_when_empty() {
        let mut g = sample();
        assert!(!delete_row_if_empty(&mut g, 0).unwrap());
        g[1] = vec![String::new(); 3];
        assert!(delete_row_if_empty(&mut g, 0).unwrap());
        assert_eq!(g.len(), 3);
        g[1] = vec![String::new(); 3];
        assert!(!delete_row_if_empty(&mut g, 0).unwrap());
    }

    #[test]
    fn test_insert_and_delete_column() {
        let mut g = sample();
        insert_column(&mut g, 1);
        assert!(g.iter().all(|row| row.len() == 4 && row[1].is_empty()));
        assert!(delete_column_if_empty(&mut g, 1).unwrap());
        assert_eq!(g, sample());
        assert!(!delete_column_if_empty(&mut g, 1).unwrap());
        delete_column(&mut g, 1).unwrap();
        assert_eq!(g[0], vec!["id", "N"]);
    }

    #[test]
    fn test_insert_column_into_empty_grid() {
        let mut g = Grid::new();
        insert_column(&mut g, 0);
        assert_eq!(g, grid(&[&[""], &[""]]));
    }

    #[test]
    fn test_footer_blocks_column_delete() {
        let mut g = grid(&[&["id", ""], &["r1", ""], &["", "% sum()"]]);
        assert!(!delete_column_if_empty(&mut g, 1).unwrap());
    }

    #[test]
    fn test_set_cell_and_macro_fill() {
        let mut g = sample();
        set_cell(&mut g, 1, 1, "carol").unwrap();
        assert_eq!(g[2][1], "carol");
        set_cell(&mut g, 0, 2, "% prop(\"n\") * 2").unwrap();
        assert_eq!(g[1][2], "% prop(\"n\") * 2");
        assert_eq!(g[2][2], "% prop(\"n\") * 2");
        assert_eq!(g[3][2], "% sum()");
    }

    #[test]
    fn test_rename_column_with_macro_fill_keeps_header() {
        let mut g = sample();
        rename_column(&mut g, 1, "Who").unwrap();
        assert_eq!(g[0][1], "Who");
        rename_column(&mut g, 1, "% 'x'").unwrap();
        assert_eq!(g[0][1], "Who");
        assert_eq!(g[1][1], "% 'x'");
        assert_eq!(g[2][1], "% 'x'");
    }

    #[test]
    fn test_footer_cell_is_not_macro_filled() {
        let mut g = sample();
        set_footer_cell(&mut g, 1, "% count('bob')").unwrap();
        assert_eq!(g[3][1], "% count('bob')");
        assert_eq!(g[1][1], "alice");
    }

    #[test]
    fn test_new_rows_inherit_column_formula() {
        let mut g = sample();
        fill_column(&mut g, 2, "% 1 + 1").unwrap();
        append_row(&mut g);
        assert_eq!(g[3][2], "% 1 + 1");
    }
}

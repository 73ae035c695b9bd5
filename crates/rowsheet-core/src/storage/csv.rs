//! CSV codec for the table text blob.
//!
//! The blob is the source of truth: row 0 is the header, the last row is the
//! footer and everything in between is the body. Parsing never trims or
//! coerces, so `parse_csv(&stringify_csv(&grid)) == grid` for any grid whose
//! rows are non-empty.

use crate::error::{Result, RowsheetError};
use std::path::Path;

/// Parsed table text: header, body rows, footer.
pub type Grid = Vec<Vec<String>>;

/// Refuse to import CSV files larger than this.
pub const MAX_CSV_FILE_BYTES: u64 = 16 * 1024 * 1024;

/// Parse CSV text into a grid.
///
/// A `"` toggles quoting; inside quotes `""` is a literal quote. Outside
/// quotes `,` ends a cell and `\n` ends a row. `\r` is kept as content.
/// The final cell and row are always flushed, so `""` parses to `[[""]]`.
pub fn parse_csv(text: &str) -> Grid {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                current.push(c);
            }
            continue;
        }
        match c {
            '"' => in_quotes = true,
            ',' => row.push(std::mem::take(&mut current)),
            '\n' => {
                row.push(std::mem::take(&mut current));
                rows.push(std::mem::take(&mut row));
            }
            _ => current.push(c),
        }
    }
    row.push(current);
    rows.push(row);
    rows
}

fn escape_cell(cell: &str) -> String {
    if cell.contains(['"', ',', '\n']) {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}

/// Serialize a grid: rows joined by `\n`, cells by `,`, quoting only when needed.
pub fn stringify_csv(grid: &[Vec<String>]) -> String {
    grid.iter()
        .map(|row| {
            row.iter()
                .map(|cell| escape_cell(cell))
                .collect::<Vec<_>>()
                .join(",")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Pad `row` with empty cells up to `len`. Never truncates.
pub fn ensure_row_length(row: &[String], len: usize) -> Vec<String> {
    let mut padded = row.to_vec();
    if padded.len() < len {
        padded.resize(len, String::new());
    }
    padded
}

/// Fresh identifier for column 0 of a new row.
pub fn new_row_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Build a row to insert into `grid`.
///
/// The first body row is the template: column 0 gets a new id, cells holding a
/// `% ` column formula are copied, everything else starts empty.
pub fn create_empty_row(grid: &[Vec<String>]) -> Vec<String> {
    let width = grid.first().map_or(0, Vec::len);
    let template = match grid.get(1) {
        Some(row) => ensure_row_length(row, width),
        None => vec![String::new(); width],
    };
    template
        .iter()
        .enumerate()
        .map(|(idx, cell)| {
            if idx == 0 {
                new_row_id()
            } else if cell.starts_with("% ") {
                cell.clone()
            } else {
                String::new()
            }
        })
        .collect()
}

/// Header row.
pub fn extract_columns(grid: &[Vec<String>]) -> Vec<String> {
    grid.first().cloned().unwrap_or_default()
}

/// Last row padded to the header width; empty when the grid has no footer.
pub fn extract_footer(grid: &[Vec<String>]) -> Vec<String> {
    if grid.len() <= 1 {
        return Vec::new();
    }
    let width = grid[0].len();
    ensure_row_length(&grid[grid.len() - 1], width)
}

/// Rows strictly between header and footer, padded to the header width.
pub fn extract_body(grid: &[Vec<String>]) -> Vec<Vec<String>> {
    if grid.len() <= 1 {
        return Vec::new();
    }
    let width = grid[0].len();
    grid[1..grid.len() - 1]
        .iter()
        .map(|row| ensure_row_length(row, width))
        .collect()
}

/// Contents of a newly created table: a header, one sample row and an empty footer.
pub fn initial_csv() -> String {
    let grid = vec![
        vec!["id".to_string(), "Col1".to_string(), "Col2".to_string()],
        vec![new_row_id(), "A".to_string(), "B".to_string()],
        vec![String::new(); 3],
    ];
    stringify_csv(&grid)
}

/// Read a CSV file into a grid, refusing oversized files.
pub fn read_csv_file(path: &Path) -> Result<Grid> {
    let meta = std::fs::metadata(path)?;
    if meta.len() > MAX_CSV_FILE_BYTES {
        return Err(RowsheetError::FileTooLarge {
            path: path.display().to_string(),
            size: meta.len(),
            max: MAX_CSV_FILE_BYTES,
        });
    }
    let content = std::fs::read_to_string(path)?;
    Ok(parse_csv(&content))
}

/// Write a grid to a CSV file.
pub fn write_csv_file(path: &Path, grid: &[Vec<String>]) -> Result<()> {
    std::fs::write(path, stringify_csv(grid))?;
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

    #[test]
    fn test_parse_simple() {
        assert_eq!(
            parse_csv("a,b\n1,2\n,"),
            grid(&[&["a", "b"], &["1", "2"], &["", ""]])
        );
    }

    #[test]
    fn test_parse_empty_input() {
        assert_eq!(parse_csv(""), grid(&[&[""]]));
    }

    #[test]
    fn test_parse_quoted_fields() {
        let parsed = parse_csv("\"a,b\",\"say \"\"hi\"\"\"\n\"line1\nline2\",x");
        assert_eq!(
            parsed,
            grid(&[&["a,b", "say \"hi\""], &["line1\nline2", "x"]])
        );
    }

    #[test]
    fn test_parse_keeps_carriage_return_and_spaces() {
        assert_eq!(parse_csv(" a ,b\r\nc"), grid(&[&[" a ", "b\r"], &["c"]]));
    }

    #[test]
    fn test_stringify_quotes_only_when_needed() {
        let g = grid(&[&["plain", "a,b", "q\"t", "n\nl", ""]]);
        assert_eq!(stringify_csv(&g), "plain,\"a,b\",\"q\"\"t\",\"n\nl\",");
    }

    #[test]
    fn test_round_trip_with_special_characters() {
        let g = grid(&[
            &["id", "Name, full", "Note"],
            &["1", "O\"Brien", "multi\nline"],
            &["", "", "% sum()"],
        ]);
        assert_eq!(parse_csv(&stringify_csv(&g)), g);
    }

    #[test]
    fn test_ensure_row_length_is_idempotent() {
        let row = vec!["a".to_string()];
        let once = ensure_row_length(&row, 3);
        assert_eq!(once, vec!["a", "", ""]);
        assert_eq!(ensure_row_length(&once, 3), once);
        let long = vec!["a".to_string(), "b".to_string()];
        assert_eq!(ensure_row_length(&long, 1), long);
    }

    #[test]
    fn test_create_empty_row_copies_column_formulas() {
        let g = grid(&[
            &["id", "Name", "Total"],
            &["x", "alice", "% prop(\"n\") * 2"],
            &["", "", ""],
        ]);
        let row = create_empty_row(&g);
        assert_eq!(row.len(), 3);
        assert_ne!(row[0], "x");
        assert_eq!(row[0].len(), 36);
        assert_eq!(row[1], "");
        assert_eq!(row[2], "% prop(\"n\") * 2");
    }

    #[test]
    fn test_create_empty_row_without_body() {
        let g = grid(&[&["id", "A"]]);
        let row = create_empty_row(&g);
        assert_eq!(row.len(), 2);
        assert_eq!(row[1], "");
        assert!(create_empty_row(&[]).is_empty());
    }

    #[test]
    fn test_extract_views() {
        let g = grid(&[&["id", "A", "B"], &["1"], &["2", "x"], &["", "", "% sum()"]]);
        assert_eq!(extract_columns(&g), vec!["id", "A", "B"]);
        assert_eq!(extract_footer(&g), vec!["", "", "% sum()"]);
        assert_eq!(
            extract_body(&g),
            grid(&[&["1", "", ""], &["2", "x", ""]])
        );
    }

    #[test]
    fn test_extract_views_with_header_only() {
        let g = grid(&[&["id", "A"]]);
        assert!(extract_footer(&g).is_empty());
        assert!(extract_body(&g).is_empty());
        assert!(extract_columns(&[]).is_empty());
    }

    #[test]
    fn test_initial_csv_shape() {
        let g = parse_csv(&initial_csv());
        assert_eq!(g.len(), 3);
        assert_eq!(g[0], vec!["id", "Col1", "Col2"]);
        assert_eq!(&g[1][1..], &["A", "B"]);
        assert_eq!(g[2], vec!["", "", ""]);
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.csv");
        let g = grid(&[&["id", "A"], &["1", "a,b"], &["", ""]]);
        write_csv_file(&path, &g).unwrap();
        assert_eq!(read_csv_file(&path).unwrap(), g);
    }
}

//! Plain-text table output

use rowsheet_core::{RenderedCell, RenderedTable};
use std::io::Write;

/// Which text of a cell to print.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CellText {
    Display,
    Raw,
}

fn cell_text(cell: &RenderedCell, mode: CellText) -> String {
    let text = match mode {
        CellText::Display => &cell.display,
        CellText::Raw => &cell.raw,
    };
    escape_cell(text)
}

fn escape_cell(s: &str) -> String {
    s.replace('|', "\\|").replace('\n', " ").replace('\r', "")
}

fn write_row<W: Write>(w: &mut W, cells: &[String], widths: &[usize]) -> std::io::Result<()> {
    write!(w, "|")?;
    for (idx, width) in widths.iter().enumerate() {
        let cell = cells.get(idx).map(String::as_str).unwrap_or("");
        let pad = width.saturating_sub(cell.chars().count());
        write!(w, " {}{} |", cell, " ".repeat(pad))?;
    }
    writeln!(w)
}

fn write_separator<W: Write>(w: &mut W, widths: &[usize]) -> std::io::Result<()> {
    write!(w, "|")?;
    for width in widths {
        write!(w, "{}|", "-".repeat(width + 2))?;
    }
    writeln!(w)
}

/// Write `table` as an aligned pipe table. The footer is printed under a
/// second separator when any footer cell has content.
pub fn write_table<W: Write>(w: &mut W, table: &RenderedTable, mode: CellText) -> std::io::Result<()> {
    let header: Vec<String> = table.columns.iter().map(|c| escape_cell(c)).collect();
    let body: Vec<Vec<String>> = table
        .rows
        .iter()
        .map(|row| row.cells.iter().map(|c| cell_text(c, mode)).collect())
        .collect();
    let footer: Vec<String> = table.footer.iter().map(|c| cell_text(c, mode)).collect();
    let show_footer = footer.iter().any(|c| !c.is_empty());

    let mut widths: Vec<usize> = header.iter().map(|c| c.chars().count().max(1)).collect();
    let extra_rows = body.iter().chain(show_footer.then_some(&footer));
    for row in extra_rows {
        for (idx, cell) in row.iter().enumerate() {
            if let Some(width) = widths.get_mut(idx) {
                *width = (*width).max(cell.chars().count());
            }
        }
    }

    write_row(w, &header, &widths)?;
    write_separator(w, &widths)?;
    for row in &body {
        write_row(w, row, &widths)?;
    }
    if show_footer {
        write_separator(w, &widths)?;
        write_row(w, &footer, &widths)?;
    }
    Ok(())
}

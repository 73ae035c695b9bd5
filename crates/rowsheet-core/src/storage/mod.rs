//! Storage module for the CSV text blob and CSV file import/export

mod csv;

pub use csv::{
    Grid, MAX_CSV_FILE_BYTES, create_empty_row, ensure_row_length, extract_body, extract_columns,
    extract_footer, initial_csv, new_row_id, parse_csv, read_csv_file, stringify_csv,
    write_csv_file,
};

//! CSV ingestion implementation.

use crate::error::{IngestionError, IngestionResult};
use crate::types::{Table, Value};

/// Ingest CSV bytes into a [`Table`].
///
/// Rules:
///
/// - The first record is the header row.
/// - If `delimiter` is `None`, `;` is used when the header line has more semicolons than commas
///   (common in Spanish-locale exports), otherwise `,`.
/// - Cells are kept as text; empty cells become [`Value::Null`].
/// - Ragged rows are accepted and padded/truncated to the header width.
pub fn ingest_csv_from_bytes(
    source_name: &str,
    bytes: &[u8],
    delimiter: Option<u8>,
) -> IngestionResult<Table> {
    let delimiter = delimiter.unwrap_or_else(|| sniff_delimiter(bytes));
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(bytes);
    ingest_csv_from_reader(source_name, &mut rdr)
}

/// Ingest CSV data from an existing CSV reader.
pub fn ingest_csv_from_reader<R: std::io::Read>(
    source_name: &str,
    rdr: &mut csv::Reader<R>,
) -> IngestionResult<Table> {
    let headers: Vec<String> = rdr.headers()?.iter().map(str::to_owned).collect();
    if headers.iter().all(|h| h.trim().is_empty()) {
        return Err(IngestionError::Malformed {
            source_name: source_name.to_string(),
            message: "no header row found".to_string(),
        });
    }

    let mut rows: Vec<Vec<Value>> = Vec::new();
    for result in rdr.records() {
        let record = result?;
        if record.iter().all(|c| c.trim().is_empty()) {
            continue;
        }
        rows.push(record.iter().map(text_cell).collect());
    }

    Ok(Table::new(&headers, rows))
}

fn text_cell(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        Value::Null
    } else {
        Value::Utf8(trimmed.to_owned())
    }
}

fn sniff_delimiter(bytes: &[u8]) -> u8 {
    let first_line = bytes.split(|&b| b == b'\n').next().unwrap_or(bytes);
    let semicolons = first_line.iter().filter(|&&b| b == b';').count();
    let commas = first_line.iter().filter(|&&b| b == b',').count();
    if semicolons > commas { b';' } else { b',' }
}

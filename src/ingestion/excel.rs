#![cfg(feature = "excel")]

use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Reader};

use crate::error::{IngestionError, IngestionResult};
use crate::types::{Table, Value};

/// Ingest a workbook (`.xlsx`, `.xls`, `.ods`, etc.) from memory into a [`Table`].
///
/// Behavior:
/// - Picks `sheet_name` if provided; otherwise uses the first sheet in the workbook
/// - Detects the first non-empty row as the header row
/// - Skips data rows where every cell is empty
/// - Keeps typed cells (numbers, booleans); dates are kept as their text form
pub fn ingest_excel_from_bytes(
    source_name: &str,
    bytes: &[u8],
    sheet_name: Option<&str>,
) -> IngestionResult<Table> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))?;

    let sheet = match sheet_name {
        Some(name) => name.to_string(),
        None => workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| IngestionError::Malformed {
                source_name: source_name.to_string(),
                message: "workbook has no sheets".to_string(),
            })?,
    };

    let range = workbook.worksheet_range(&sheet)?;
    table_from_range(source_name, &sheet, &range)
}

fn table_from_range(
    source_name: &str,
    sheet: &str,
    range: &calamine::Range<Data>,
) -> IngestionResult<Table> {
    let mut rows_iter = range
        .rows()
        .skip_while(|row| row.iter().all(|c| matches!(c, Data::Empty)));

    let headers: Vec<String> = rows_iter
        .next()
        .map(|row| row.iter().map(cell_to_header_string).collect())
        .ok_or_else(|| IngestionError::Malformed {
            source_name: source_name.to_string(),
            message: format!("sheet '{sheet}' has no non-empty rows (no header row found)"),
        })?;

    let rows: Vec<Vec<Value>> = rows_iter
        .filter(|row| row.iter().any(|c| !matches!(c, Data::Empty)))
        .map(|row| row.iter().map(convert_cell).collect())
        .collect();

    Ok(Table::new(&headers, rows))
}

fn cell_to_header_string(c: &Data) -> String {
    match c {
        Data::String(s) => s.clone(),
        Data::Empty => String::new(),
        other => convert_cell(other).as_text().into_owned(),
    }
}

fn convert_cell(c: &Data) -> Value {
    match c {
        Data::Empty => Value::Null,
        Data::String(s) if s.trim().is_empty() => Value::Null,
        Data::String(s) => Value::Utf8(s.trim().to_owned()),
        Data::Int(i) => Value::Int64(*i),
        Data::Float(f) => Value::Float64(*f),
        Data::Bool(b) => Value::Bool(*b),
        Data::DateTime(dt) => Value::Utf8(dt.to_string()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => Value::Utf8(s.clone()),
        Data::Error(e) => Value::Utf8(format!("{e:?}")),
    }
}

//! Table -> file bytes.

use serde::{Deserialize, Serialize};

use crate::error::ArtifactError;
use crate::types::{Table, Value};

/// File format of persisted artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactFormat {
    /// Comma-separated values with a header row.
    Csv,
    /// Single-sheet Excel workbook (feature-gated behind `excel`).
    #[cfg(feature = "excel")]
    Xlsx,
}

impl ArtifactFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactFormat::Csv => "csv",
            #[cfg(feature = "excel")]
            ArtifactFormat::Xlsx => "xlsx",
        }
    }
}

impl Default for ArtifactFormat {
    #[cfg(feature = "excel")]
    fn default() -> Self {
        ArtifactFormat::Xlsx
    }

    #[cfg(not(feature = "excel"))]
    fn default() -> Self {
        ArtifactFormat::Csv
    }
}

/// Encode `table` (header row + data rows) in `format`.
pub fn encode_table(table: &Table, format: ArtifactFormat) -> Result<Vec<u8>, ArtifactError> {
    match format {
        ArtifactFormat::Csv => encode_csv(table),
        #[cfg(feature = "excel")]
        ArtifactFormat::Xlsx => encode_xlsx(table),
    }
}

fn encode_csv(table: &Table) -> Result<Vec<u8>, ArtifactError> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    wtr.write_record(&table.columns)?;
    for row in &table.rows {
        wtr.write_record(row.iter().map(|v| v.as_text().into_owned()))?;
    }
    wtr.into_inner().map_err(|e| ArtifactError::Io(e.into_error()))
}

#[cfg(feature = "excel")]
fn encode_xlsx(table: &Table) -> Result<Vec<u8>, ArtifactError> {
    use rust_xlsxwriter::Workbook;

    let mut wb = Workbook::new();
    let ws = wb.add_worksheet();
    for (col, name) in table.columns.iter().enumerate() {
        ws.write_string(0, xlsx_col(col), name)?;
    }
    for (r, row) in table.rows.iter().enumerate() {
        let r = u32::try_from(r + 1).unwrap_or(u32::MAX);
        for (c, value) in row.iter().enumerate() {
            let c = xlsx_col(c);
            match value {
                Value::Null => {}
                Value::Int64(i) => {
                    ws.write_number(r, c, *i as f64)?;
                }
                Value::Float64(f) if f.is_finite() => {
                    ws.write_number(r, c, *f)?;
                }
                Value::Float64(f) => {
                    ws.write_string(r, c, Value::Float64(*f).as_text())?;
                }
                Value::Bool(b) => {
                    ws.write_boolean(r, c, *b)?;
                }
                Value::Utf8(s) => {
                    ws.write_string(r, c, s)?;
                }
            }
        }
    }
    Ok(wb.save_to_buffer()?)
}

#[cfg(feature = "excel")]
fn xlsx_col(c: usize) -> u16 {
    u16::try_from(c).unwrap_or(u16::MAX)
}

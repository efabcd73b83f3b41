//! Unified ingestion entrypoint.
//!
//! Most callers should use [`ingest_bytes`], which turns an uploaded file (name + raw bytes) into
//! an in-memory [`crate::types::Table`].
//!
//! - If [`IngestionOptions::format`] is `None`, the format is inferred from the file name's
//!   extension.
//! - Column names are normalized (trimmed, lower-cased); no other schema is enforced.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{IngestionError, IngestionResult};
use crate::types::Table;

use super::{csv, json};

/// Supported ingestion formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestionFormat {
    /// Comma- or semicolon-separated values.
    Csv,
    /// JSON array-of-objects or NDJSON.
    Json,
    /// Spreadsheet/workbook formats (feature-gated behind `excel`).
    Excel,
}

impl IngestionFormat {
    /// Parse an ingestion format from a file extension (case-insensitive).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "csv" | "txt" => Some(Self::Csv),
            "json" | "ndjson" => Some(Self::Json),
            "xlsx" | "xls" | "xlsm" | "xlsb" | "ods" => Some(Self::Excel),
            _ => None,
        }
    }

    /// Infer the format from a file name such as `export.XLSX`.
    pub fn from_file_name(name: &str) -> Option<Self> {
        Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }
}

/// Raw bytes of an uploaded table plus the name it was uploaded under.
#[derive(Clone, PartialEq, Eq)]
pub struct TableSource {
    /// Original file name; its extension drives format inference.
    pub file_name: String,
    /// File contents.
    pub bytes: Vec<u8>,
}

impl TableSource {
    /// Create a source from a file name and its contents.
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes: bytes.into(),
        }
    }

    /// Read a source from disk, keeping the path's file name.
    pub fn from_path(path: impl AsRef<Path>) -> IngestionResult<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self { file_name, bytes })
    }
}

impl fmt::Debug for TableSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableSource")
            .field("file_name", &self.file_name)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Options controlling unified ingestion behavior.
///
/// Use [`Default`] for common cases.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionOptions {
    /// If `None`, auto-detect format from the file extension.
    pub format: Option<IngestionFormat>,
    /// Workbook sheet to read. `None` reads the first sheet.
    pub sheet: Option<String>,
    /// CSV delimiter. `None` picks `;` or `,` from the header line.
    pub csv_delimiter: Option<u8>,
}

/// Ingest an uploaded file into a [`Table`].
///
/// # Examples
///
/// ```rust
/// use billing_partition::ingestion::{ingest_bytes, IngestionOptions, TableSource};
///
/// # fn main() -> Result<(), billing_partition::IngestionError> {
/// let source = TableSource::new("crystal.csv", "Profesional;Servicio\nAna;RX Torax\n");
/// let table = ingest_bytes(&source, &IngestionOptions::default())?;
/// assert_eq!(table.columns, vec!["profesional", "servicio"]);
/// assert_eq!(table.row_count(), 1);
/// # Ok(())
/// # }
/// ```
pub fn ingest_bytes(source: &TableSource, options: &IngestionOptions) -> IngestionResult<Table> {
    if source.bytes.is_empty() {
        return Err(IngestionError::Empty {
            source_name: source.file_name.clone(),
        });
    }

    let fmt = match options.format {
        Some(f) => f,
        None => IngestionFormat::from_file_name(&source.file_name).ok_or_else(|| {
            IngestionError::UnsupportedFormat {
                source_name: source.file_name.clone(),
            }
        })?,
    };

    match fmt {
        IngestionFormat::Csv => {
            csv::ingest_csv_from_bytes(&source.file_name, &source.bytes, options.csv_delimiter)
        }
        IngestionFormat::Json => json::ingest_json_from_bytes(&source.file_name, &source.bytes),
        IngestionFormat::Excel => ingest_excel_dispatch(source, options.sheet.as_deref()),
    }
}

/// Read a file from disk and ingest it with [`ingest_bytes`].
pub fn ingest_from_path(path: impl AsRef<Path>, options: &IngestionOptions) -> IngestionResult<Table> {
    let source = TableSource::from_path(path)?;
    ingest_bytes(&source, options)
}

fn ingest_excel_dispatch(source: &TableSource, sheet: Option<&str>) -> IngestionResult<Table> {
    #[cfg(feature = "excel")]
    {
        super::excel::ingest_excel_from_bytes(&source.file_name, &source.bytes, sheet)
    }

    #[cfg(not(feature = "excel"))]
    {
        let _ = sheet;
        Err(IngestionError::UnsupportedFormat {
            source_name: source.file_name.clone(),
        })
    }
}

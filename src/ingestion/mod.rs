//! Ingestion entrypoints and implementations.
//!
//! Most callers should use [`ingest_bytes`] (from [`unified`]) which:
//!
//! - auto-detects format by file extension (or you can override via [`IngestionOptions`])
//! - parses the upload into an in-memory [`crate::types::Table`]
//! - normalizes column names, enforcing no further schema
//!
//! Format-specific functions are also available under:
//! - [`csv`]
//! - [`json`]
//! - `excel` (feature `excel`)

pub mod csv;
#[cfg(feature = "excel")]
pub mod excel;
pub mod json;
pub mod unified;

pub use unified::{ingest_bytes, ingest_from_path, IngestionFormat, IngestionOptions, TableSource};

//! `billing-partition` turns two medical-services billing extracts into per-key artifacts and
//! summary counts.
//!
//! The inputs are a **crystal** table (provider extract: professional, service, user) and a
//! **query** table (validation extract: user, service). A run:
//!
//! 1. ingests both uploads into [`types::Table`]s ([`ingestion::ingest_bytes`]);
//! 2. maps abstract roles to concrete columns with ordered synonym lists
//!    ([`resolve::resolve_roles`]);
//! 3. partitions each table by its key role, counting services per category
//!    ([`categorize::CategoryTable`]) and per exact label, and writes one artifact per partition
//!    ([`execution::PartitionEngine`], [`artifact::ArtifactStore`]);
//! 4. flags query rows whose user also appears in crystal ([`processing::cross_validate`]);
//! 5. reports progress through a [`jobs::JobRegistry`] and stops early when the job is cancelled.
//!
//! [`pipeline::Pipeline`] wires these together.
//!
//! ## Supported uploads (auto-detected by extension)
//!
//! - **CSV**: `.csv`, `.txt` (`,` or `;` delimited)
//! - **JSON**: `.json` (array-of-objects) and `.ndjson`
//! - **Excel/workbooks** (Cargo feature `excel`, on by default): `.xlsx`, `.xls`, `.xlsm`, `.xlsb`,
//!   `.ods`
//!
//! Column names are trimmed and lower-cased; empty cells become [`types::Value::Null`].
//!
//! ## Quick example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use billing_partition::artifact::{ArtifactFormat, MemoryArtifactStore};
//! use billing_partition::config::EngineConfig;
//! use billing_partition::jobs::JobRegistry;
//! use billing_partition::pipeline::Pipeline;
//! use billing_partition::types::{Table, Value};
//!
//! # fn main() -> Result<(), billing_partition::EngineError> {
//! let s = |v: &str| Value::Utf8(v.to_string());
//! let crystal = Table::new(
//!     &["Profesional", "Servicio", "Usuario"],
//!     vec![
//!         vec![s("Ana"), s("Ecografia Renal"), s("jperez")],
//!         vec![s("Ana"), s("RX Torax"), s("jperez")],
//!         vec![s("Luis"), s("Mamografia"), s("mlopez")],
//!     ],
//! );
//! let query = Table::new(&["Usuario", "Servicio"], vec![vec![s("JPEREZ"), s("Ecografia")]]);
//!
//! let store = Arc::new(MemoryArtifactStore::new(ArtifactFormat::Csv));
//! let pipeline = Pipeline::new(EngineConfig::default(), store)?;
//! let registry = JobRegistry::new();
//! let job = registry.start();
//!
//! let outcome = pipeline.run_tables(&job, &crystal, &query)?;
//! let report = outcome.report().expect("not cancelled");
//! assert_eq!(report.professionals, vec!["Ana", "Luis"]);
//! assert_eq!(report.crystal.summary.categories.get("ecografia"), 1);
//! assert_eq!(report.validation.as_ref().map(|v| v.rows.members), Some(1));
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`ingestion`]: upload -> [`types::Table`]
//! - [`resolve`]: role -> column auto-detection
//! - [`categorize`]: service label -> category, count maps
//! - [`processing`]: group-by, aggregation, cross-validation
//! - [`execution`]: parallel partition engine, observers, metrics
//! - [`jobs`]: job registry, progress, cancellation
//! - [`artifact`]: artifact encoding and stores
//! - [`pipeline`]: full two-table run
//! - [`config`]: engine configuration
//! - [`error`]: error types

pub mod artifact;
pub mod categorize;
pub mod config;
pub mod error;
pub mod execution;
pub mod ingestion;
pub mod jobs;
pub mod pipeline;
pub mod processing;
pub mod resolve;
pub mod types;

pub use error::{ArtifactError, EngineError, EngineResult, ErrorClass, IngestionError, IngestionResult};
pub use jobs::{CancelResult, JobRegistry, JobToken};
pub use pipeline::{Pipeline, RunOutcome, RunReport};

use thiserror::Error;

/// Convenience result type for ingestion operations.
pub type IngestionResult<T> = Result<T, IngestionError>;

/// Convenience result type for engine and pipeline operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Error type returned while turning raw bytes into a [`crate::types::Table`].
///
/// Every variant is user-correctable: the file is missing, empty, of an unsupported type, or
/// cannot be parsed.
#[derive(Debug, Error)]
pub enum IngestionError {
    /// Underlying I/O error (e.g. file not found, permission denied).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "excel")]
    /// Spreadsheet parse error (feature-gated behind `excel`).
    #[error("excel error: {0}")]
    Excel(#[from] calamine::Error),

    /// CSV parse error.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON parse error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// No bytes were supplied for a table.
    #[error("input '{source_name}' is empty")]
    Empty { source_name: String },

    /// The file type is not one the engine can ingest.
    #[error("unsupported file type for '{source_name}' (expected xlsx, xls, xlsm, xlsb, ods, csv or json)")]
    UnsupportedFormat { source_name: String },

    /// The file parsed, but its shape is unusable (no header row, no sheets, ...).
    #[error("malformed input '{source_name}': {message}")]
    Malformed { source_name: String, message: String },
}

/// Error type returned by artifact persistence and retrieval.
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// Underlying I/O error (disk full, permission denied, ...).
    #[error("artifact io error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV encoding error.
    #[error("artifact csv error: {0}")]
    Csv(#[from] csv::Error),

    #[cfg(feature = "excel")]
    /// XLSX encoding error.
    #[error("artifact xlsx error: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),

    /// The temporary file could not be moved to its final name.
    #[error("failed to persist artifact '{name}': {message}")]
    Persist { name: String, message: String },

    /// The reference is unknown, already retrieved, or not a plain artifact name.
    #[error("artifact '{reference}' not found")]
    NotFound { reference: String },
}

/// Top-level error type for a processing run.
///
/// Cancellation is not an error: a cancelled run is a normal outcome, reported through
/// [`crate::pipeline::RunOutcome::Cancelled`].
#[derive(Debug, Error)]
pub enum EngineError {
    /// A table could not be ingested.
    #[error(transparent)]
    Ingestion(#[from] IngestionError),

    /// A mandatory role could not be mapped to any column.
    #[error("table '{table}': required column for role '{role}' not found. columns={available:?}")]
    MissingRole {
        table: String,
        role: String,
        available: Vec<String>,
    },

    /// A column referenced by name does not exist.
    #[error("column '{column}' not found. columns={available:?}")]
    MissingColumn { column: String, available: Vec<String> },

    /// The engine configuration is inconsistent.
    #[error("invalid configuration: {message}")]
    Config { message: String },

    /// Artifact persistence failed.
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

/// Coarse classification used by callers to choose a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// User-correctable: bad file, missing column, bad configuration.
    Input,
    /// Infrastructure failure while persisting or reading artifacts.
    Resource,
}

impl EngineError {
    /// Classify the error into the input/resource taxonomy.
    pub fn class(&self) -> ErrorClass {
        match self {
            EngineError::Ingestion(_)
            | EngineError::MissingRole { .. }
            | EngineError::MissingColumn { .. }
            | EngineError::Config { .. } => ErrorClass::Input,
            EngineError::Artifact(ArtifactError::NotFound { .. }) => ErrorClass::Input,
            EngineError::Artifact(_) => ErrorClass::Resource,
        }
    }

    /// HTTP-equivalent status code for the error.
    pub fn status_code(&self) -> u16 {
        match self {
            EngineError::Artifact(ArtifactError::NotFound { .. }) => 404,
            _ => match self.class() {
                ErrorClass::Input => 400,
                ErrorClass::Resource => 500,
            },
        }
    }

    /// Message safe to show to the end user.
    ///
    /// Input errors carry their full description; resource errors collapse into a generic
    /// message and should be logged with context instead.
    pub fn public_message(&self) -> String {
        match self.class() {
            ErrorClass::Input => self.to_string(),
            ErrorClass::Resource => "processing failed".to_string(),
        }
    }
}

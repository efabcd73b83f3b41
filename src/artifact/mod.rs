//! Persistence of per-partition and cross-validation tables as downloadable files.
//!
//! The contract is small (`put` / `get` / `delete`) and a reference is only
//! guaranteed to be retrievable once: stores may delete an artifact after its first successful
//! retrieval so ephemeral hosts do not fill their disk.

mod encode;
mod store;

use serde::Serialize;
use uuid::Uuid;

use crate::error::ArtifactError;
use crate::types::Table;

pub use encode::{encode_table, ArtifactFormat};
pub use store::{DirectoryArtifactStore, MemoryArtifactStore};

/// Handle to a persisted artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactRef {
    /// File name; also the retrieval reference.
    pub name: String,
    /// Encoded size.
    pub bytes: u64,
}

/// Storage backend for artifacts.
pub trait ArtifactStore: Send + Sync {
    /// Encoding used by [`Self::put`].
    fn format(&self) -> ArtifactFormat;

    /// Persist `table` under `name`.
    fn put(&self, name: &str, table: &Table) -> Result<ArtifactRef, ArtifactError>;

    /// Fetch an artifact's bytes. May remove the artifact.
    fn get(&self, reference: &str) -> Result<Vec<u8>, ArtifactError>;

    /// Remove an artifact. Removing a missing artifact is not an error.
    fn delete(&self, reference: &str) -> Result<(), ArtifactError>;
}

const MAX_LABEL_LEN: usize = 60;

/// Build a unique, filesystem-safe artifact name: `<prefix>_<label>_<8 hex>.<ext>`.
///
/// The label is reduced to ASCII alphanumerics (common Spanish accents are folded first) with
/// runs of anything else collapsed to `_`. The random suffix keeps names unique even when two
/// labels sanitize to the same text.
pub fn artifact_name(prefix: &str, label: &str, format: ArtifactFormat) -> String {
    let mut safe = String::with_capacity(label.len().min(MAX_LABEL_LEN));
    let mut last_sep = true;
    for c in label.chars().map(fold_accent) {
        if c.is_ascii_alphanumeric() {
            safe.push(c);
            last_sep = false;
        } else if !last_sep {
            safe.push('_');
            last_sep = true;
        }
        if safe.len() >= MAX_LABEL_LEN {
            break;
        }
    }
    let safe = safe.trim_end_matches('_');
    let safe = if safe.is_empty() { "sin_nombre" } else { safe };

    let suffix = Uuid::new_v4().simple().to_string();
    format!("{prefix}_{safe}_{}.{}", &suffix[..8], format.extension())
}

fn fold_accent(c: char) -> char {
    match c {
        'á' | 'à' | 'ä' | 'â' => 'a',
        'é' | 'è' | 'ë' | 'ê' => 'e',
        'í' | 'ì' | 'ï' | 'î' => 'i',
        'ó' | 'ò' | 'ö' | 'ô' => 'o',
        'ú' | 'ù' | 'ü' | 'û' => 'u',
        'ñ' => 'n',
        'Á' | 'À' | 'Ä' | 'Â' => 'A',
        'É' | 'È' | 'Ë' | 'Ê' => 'E',
        'Í' | 'Ì' | 'Ï' | 'Î' => 'I',
        'Ó' | 'Ò' | 'Ö' | 'Ô' => 'O',
        'Ú' | 'Ù' | 'Ü' | 'Û' => 'U',
        'Ñ' => 'N',
        other => other,
    }
}

//! Engine configuration.
//!
//! Everything has a [`Default`] matching the crystal/query billing exports, so most callers only
//! override a field or two. Configurations can also be loaded from JSON; omitted fields keep
//! their defaults.
//!
//! ```rust
//! use billing_partition::config::EngineConfig;
//!
//! let cfg = EngineConfig::from_json_str(r#"{ "flag_column": "validado", "execution": { "num_threads": 2 } }"#)?;
//! assert_eq!(cfg.flag_column, "validado");
//! assert_eq!(cfg.crystal.key_role, "professional");
//! # Ok::<(), billing_partition::EngineError>(())
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::artifact::ArtifactFormat;
use crate::categorize::CategoryTable;
use crate::error::{EngineError, EngineResult};
use crate::execution::ExecutionOptions;
use crate::ingestion::IngestionOptions;
use crate::resolve::RoleSpec;

pub const ROLE_PROFESSIONAL: &str = "professional";
pub const ROLE_SERVICE: &str = "service";
pub const ROLE_USER: &str = "user";

const SERVICE_SYNONYMS: &[&str] = &[
    "servicio",
    "prestacion",
    "prestación",
    "examen",
    "procedimiento",
    "descripcion",
    "descripción",
];

/// How to read and partition one of the two input tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableProfile {
    /// Name used in errors, events and reports.
    pub name: String,
    /// Roles to resolve, in resolution order (also the positional fallback order).
    pub roles: Vec<RoleSpec>,
    /// Role that defines the partitions.
    pub key_role: String,
    /// Role holding the service label.
    pub category_role: String,
    /// Role compared during cross-validation.
    #[serde(default)]
    pub identity_role: Option<String>,
    /// Role counted distinctly per partition.
    #[serde(default)]
    pub distinct_role: Option<String>,
    /// Columns never assigned to a role.
    #[serde(default)]
    pub exclude_columns: Vec<String>,
    pub artifact_prefix: String,
    #[serde(default)]
    pub ingestion: IngestionOptions,
}

impl TableProfile {
    /// Provider extract: partitioned by professional.
    pub fn crystal() -> Self {
        Self {
            name: "crystal".to_string(),
            roles: vec![
                RoleSpec::required(
                    ROLE_PROFESSIONAL,
                    &["profesional", "medico", "médico", "prestador", "doctor"],
                ),
                RoleSpec::required(ROLE_SERVICE, SERVICE_SYNONYMS),
                RoleSpec::optional(ROLE_USER, &["usuario", "validador", "user", "paciente"]),
            ],
            key_role: ROLE_PROFESSIONAL.to_string(),
            category_role: ROLE_SERVICE.to_string(),
            identity_role: Some(ROLE_USER.to_string()),
            distinct_role: Some(ROLE_USER.to_string()),
            exclude_columns: Vec::new(),
            artifact_prefix: "servicios".to_string(),
            ingestion: IngestionOptions::default(),
        }
    }

    /// Validation extract: partitioned by the validating user.
    pub fn query() -> Self {
        Self {
            name: "query".to_string(),
            roles: vec![
                RoleSpec::required(ROLE_USER, &["usuario", "validador", "user", "nombre"]),
                RoleSpec::required(ROLE_SERVICE, SERVICE_SYNONYMS),
            ],
            key_role: ROLE_USER.to_string(),
            category_role: ROLE_SERVICE.to_string(),
            identity_role: Some(ROLE_USER.to_string()),
            distinct_role: None,
            exclude_columns: Vec::new(),
            artifact_prefix: "query".to_string(),
            ingestion: IngestionOptions::default(),
        }
    }

    fn declares(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r.role == role)
    }

    fn validate(&self) -> EngineResult<()> {
        if self.name.trim().is_empty() {
            return Err(config("table profile name must not be empty"));
        }
        if self.artifact_prefix.trim().is_empty() {
            return Err(config(format!("table '{}': artifact_prefix must not be empty", self.name)));
        }
        let referenced = [Some(&self.key_role), Some(&self.category_role)]
            .into_iter()
            .chain([self.identity_role.as_ref(), self.distinct_role.as_ref()])
            .flatten();
        for role in referenced {
            if !self.declares(role) {
                return Err(config(format!(
                    "table '{}': role '{role}' is not declared in roles",
                    self.name
                )));
            }
        }
        for key in [&self.key_role, &self.category_role] {
            if self.roles.iter().any(|r| &r.role == key && !r.required) {
                return Err(config(format!(
                    "table '{}': role '{key}' must be required",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

/// Full engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub crystal: TableProfile,
    pub query: TableProfile,
    pub categories: CategoryTable,
    pub artifact_format: ArtifactFormat,
    pub execution: ExecutionOptions,
    /// Name of the membership column appended during cross-validation.
    pub flag_column: String,
    /// Artifact prefix of the cross-validation table.
    pub validation_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            crystal: TableProfile::crystal(),
            query: TableProfile::query(),
            categories: CategoryTable::default(),
            artifact_format: ArtifactFormat::default(),
            execution: ExecutionOptions::default(),
            flag_column: "en_crystal".to_string(),
            validation_prefix: "validacion_query".to_string(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json_str(json: &str) -> EngineResult<Self> {
        let cfg: Self = serde_json::from_str(json).map_err(|e| config(format!("invalid JSON: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read, parse and validate a JSON configuration file.
    pub fn from_json_path(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }

    /// Check cross-field consistency.
    pub fn validate(&self) -> EngineResult<()> {
        self.crystal.validate()?;
        self.query.validate()?;
        self.execution.validate()?;
        if self.flag_column.trim().is_empty() {
            return Err(config("flag_column must not be empty"));
        }
        if self.validation_prefix.trim().is_empty() {
            return Err(config("validation_prefix must not be empty"));
        }
        if self.categories.rules().is_empty() {
            return Err(config("categories must declare at least one rule"));
        }
        Ok(())
    }
}

fn config(message: impl Into<String>) -> EngineError {
    EngineError::Config {
        message: message.into(),
    }
}

//! Column auto-detection: map abstract roles (`professional`, `service`, `user`, ...) to the
//! concrete columns of a loaded [`Table`].
//!
//! Resolution is a pure function of the column list and an ordered list of [`RoleSpec`]s:
//!
//! 1. For each role in order, its synonyms are tried in priority order; the first column (in
//!    table order) whose name contains the synonym and has not been claimed wins and is claimed.
//! 2. Roles still unresolved fall back to the column at their own position in the resolution
//!    order (first role -> first column, ...), if that column exists and is unclaimed.
//!
//! Claiming keeps two roles from sharing a column (e.g. `user` and `professional` both
//! matching a `nombre ...` header).

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::types::{normalize_column_name, Table};

/// A role to resolve and its synonyms, highest priority first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSpec {
    /// Abstract role name, e.g. `professional`.
    pub role: String,
    /// Substrings to look for in column names, highest priority first.
    pub synonyms: Vec<String>,
    /// Whether an unresolved role must abort the run.
    #[serde(default)]
    pub required: bool,
}

impl RoleSpec {
    /// A mandatory role.
    pub fn required<S: AsRef<str>>(role: impl Into<String>, synonyms: &[S]) -> Self {
        Self {
            role: role.into(),
            synonyms: synonyms.iter().map(|s| s.as_ref().to_string()).collect(),
            required: true,
        }
    }

    /// An optional role; when unresolved the dependent feature is skipped.
    pub fn optional<S: AsRef<str>>(role: impl Into<String>, synonyms: &[S]) -> Self {
        Self {
            required: false,
            ..Self::required(role, synonyms)
        }
    }
}

/// How a role ended up mapped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "by", content = "detail")]
pub enum Resolution {
    /// Matched through the given synonym.
    Synonym(String),
    /// Positional fallback at the given column index.
    Position(usize),
    /// Nothing matched and no positional column was available.
    Unresolved,
}

/// Resolution result for one role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedRole {
    pub role: String,
    pub column: Option<String>,
    pub required: bool,
    pub resolution: Resolution,
}

/// Role -> column mapping for one table. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleMapping {
    roles: Vec<ResolvedRole>,
}

impl RoleMapping {
    /// Column resolved for `role`, if any.
    pub fn column(&self, role: &str) -> Option<&str> {
        self.roles
            .iter()
            .find(|r| r.role == role)
            .and_then(|r| r.column.as_deref())
    }

    /// Column index of `role` in `table`, if the role resolved to an existing column.
    pub fn index_in(&self, table: &Table, role: &str) -> Option<usize> {
        self.column(role).and_then(|c| table.index_of(c))
    }

    /// Column for `role`, or a [`EngineError::MissingRole`] naming the available columns.
    pub fn require(&self, table_name: &str, table: &Table, role: &str) -> EngineResult<usize> {
        self.index_in(table, role).ok_or_else(|| EngineError::MissingRole {
            table: table_name.to_string(),
            role: role.to_string(),
            available: table.columns.clone(),
        })
    }

    /// Fail with [`EngineError::MissingRole`] on the first unresolved required role.
    pub fn check_required(&self, table_name: &str, table: &Table) -> EngineResult<()> {
        match self.roles.iter().find(|r| r.required && r.column.is_none()) {
            Some(missing) => Err(EngineError::MissingRole {
                table: table_name.to_string(),
                role: missing.role.clone(),
                available: table.columns.clone(),
            }),
            None => Ok(()),
        }
    }

    /// All roles in resolution order.
    pub fn roles(&self) -> &[ResolvedRole] {
        &self.roles
    }

    /// Roles that were resolved by positional fallback.
    pub fn fallbacks(&self) -> impl Iterator<Item = &ResolvedRole> {
        self.roles
            .iter()
            .filter(|r| matches!(r.resolution, Resolution::Position(_)))
    }

}

/// Resolve every role in `specs` against `columns`.
///
/// `exclude` lists columns that may not be assigned to any role. Always returns a mapping;
/// callers decide whether an unresolved role is fatal (see [`RoleMapping::check_required`]).
pub fn resolve_roles<S: AsRef<str>>(columns: &[S], specs: &[RoleSpec], exclude: &[S]) -> RoleMapping {
    let columns: Vec<String> = columns
        .iter()
        .map(|c| normalize_column_name(c.as_ref()))
        .collect();
    let mut claimed: HashSet<String> = exclude
        .iter()
        .map(|c| normalize_column_name(c.as_ref()))
        .collect();

    let mut roles: Vec<ResolvedRole> = Vec::with_capacity(specs.len());
    for spec in specs {
        let found = spec.synonyms.iter().find_map(|syn| {
            let syn = syn.trim().to_lowercase();
            if syn.is_empty() {
                return None;
            }
            columns
                .iter()
                .find(|c| !claimed.contains(*c) && c.contains(&syn))
                .map(|c| (c.clone(), syn))
        });

        let resolved = match found {
            Some((column, syn)) => {
                claimed.insert(column.clone());
                ResolvedRole {
                    role: spec.role.clone(),
                    column: Some(column),
                    required: spec.required,
                    resolution: Resolution::Synonym(syn),
                }
            }
            None => ResolvedRole {
                role: spec.role.clone(),
                column: None,
                required: spec.required,
                resolution: Resolution::Unresolved,
            },
        };
        roles.push(resolved);
    }

    for (position, role) in roles.iter_mut().enumerate() {
        if role.column.is_some() {
            continue;
        }
        if let Some(column) = columns.get(position) {
            if !claimed.contains(column) {
                claimed.insert(column.clone());
                role.column = Some(column.clone());
                role.resolution = Resolution::Position(position);
            }
        }
    }

    RoleMapping { roles }
}

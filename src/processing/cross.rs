//! Cross-file identity validation.
//!
//! A set-membership join: every row of table A gets a boolean flag saying whether its identity
//! value appears anywhere in table B's identity column. Rows are never duplicated and keys are a
//! single column compared case- and whitespace-insensitively.

use std::collections::HashSet;

use serde::Serialize;

use crate::error::{EngineError, EngineResult};
use crate::types::{normalize_key, Table, Value};

/// Table A augmented with the membership flag, plus summary counts.
#[derive(Debug, Clone, PartialEq)]
pub struct CrossValidation {
    pub table: Table,
    /// Per-row counts; `total` is the row count of table A.
    pub counts: MembershipCounts,
    /// Counts over the distinct non-missing identities of table A.
    pub identities: MembershipCounts,
}

/// Member / non-member counts for a cross-validation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MembershipCounts {
    pub members: usize,
    pub non_members: usize,
    pub total: usize,
}

impl MembershipCounts {
    fn record(&mut self, member: bool) {
        if member {
            self.members += 1;
        } else {
            self.non_members += 1;
        }
        self.total += 1;
    }
}

/// Flag each row of `table_a` with whether its `identity_a` value occurs in `table_b`'s
/// `identity_b` column. The flag is written to column `flag_column`, replacing a column of that
/// name if table A already has one (a re-uploaded validation file).
///
/// Rows of A with a missing identity are non-members; missing identities in B are ignored.
pub fn cross_validate(
    table_a: &Table,
    identity_a: &str,
    table_b: &Table,
    identity_b: &str,
    flag_column: &str,
) -> EngineResult<CrossValidation> {
    let idx_a = column_index(table_a, identity_a)?;
    let idx_b = column_index(table_b, identity_b)?;

    let known: HashSet<String> = (0..table_b.row_count())
        .filter_map(|row| normalize_key(table_b.cell(row, idx_b)))
        .collect();

    let mut seen: HashSet<String> = HashSet::new();
    let mut identities = MembershipCounts::default();
    let flags: Vec<bool> = (0..table_a.row_count())
        .map(|row| match normalize_key(table_a.cell(row, idx_a)) {
            Some(key) => {
                let member = known.contains(&key);
                if seen.insert(key) {
                    identities.record(member);
                }
                member
            }
            None => false,
        })
        .collect();

    let members = flags.iter().filter(|&&f| f).count();
    let counts = MembershipCounts {
        members,
        non_members: flags.len() - members,
        total: flags.len(),
    };

    let table = table_a.with_column(flag_column, flags.into_iter().map(Value::Bool).collect());
    Ok(CrossValidation {
        table,
        counts,
        identities,
    })
}

fn column_index(table: &Table, column: &str) -> EngineResult<usize> {
    table.index_of(column).ok_or_else(|| EngineError::MissingColumn {
        column: column.to_string(),
        available: table.columns.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users(values: &[Option<&str>]) -> Table {
        Table::new(
            &["usuario"],
            values
                .iter()
                .map(|v| vec![v.map(|s| Value::Utf8(s.to_string())).unwrap_or(Value::Null)])
                .collect(),
        )
    }

    #[test]
    fn membership_is_case_and_whitespace_insensitive() {
        let a = users(&[Some("dr. ana"), Some("Luis"), None]);
        let b = users(&[Some("  Dr. Ana "), None]);
        let cv = cross_validate(&a, "usuario", &b, "usuario", "en_crystal").unwrap();
        assert_eq!(cv.counts.members, 1);
        assert_eq!(cv.counts.non_members, 2);
        assert_eq!(cv.counts.total, 3);
        assert_eq!(cv.table.columns, vec!["usuario", "en_crystal"]);
        assert_eq!(cv.table.rows[0][1], Value::Bool(true));
        assert_eq!(cv.table.rows[2][1], Value::Bool(false));
        assert_eq!(cv.identities.total, 2);
        assert_eq!(cv.identities.members, 1);
    }

    #[test]
    fn duplicates_in_b_do_not_duplicate_rows() {
        let a = users(&[Some("ana")]);
        let b = users(&[Some("ana"), Some("ANA"), Some("ana")]);
        let cv = cross_validate(&a, "usuario", &b, "usuario", "flag").unwrap();
        assert_eq!(cv.table.row_count(), 1);
        assert_eq!(cv.counts.members + cv.counts.non_members, a.row_count());
    }

    #[test]
    fn identity_counts_are_distinct() {
        let a = users(&[Some("ana"), Some("Ana "), Some("luis"), Some("LUIS"), Some("eva")]);
        let b = users(&[Some("ana")]);
        let cv = cross_validate(&a, "usuario", &b, "usuario", "flag").unwrap();
        assert_eq!(cv.counts.members, 2);
        assert_eq!(cv.counts.total, 5);
        assert_eq!(
            cv.identities,
            MembershipCounts {
                members: 1,
                non_members: 2,
                total: 3
            }
        );
    }

    #[test]
    fn stale_flag_column_is_overwritten() {
        let a = Table::new(
            &["usuario", "en_crystal"],
            vec![
                vec![Value::Utf8("u1".to_string()), Value::Utf8("false".to_string())],
                vec![Value::Utf8("u2".to_string()), Value::Utf8("true".to_string())],
            ],
        );
        let b = users(&[Some("U1")]);
        let cv = cross_validate(&a, "usuario", &b, "usuario", "en_crystal").unwrap();
        assert_eq!(cv.table.columns, vec!["usuario", "en_crystal"]);
        let idx = cv.table.index_of("en_crystal").unwrap();
        assert_eq!(cv.table.rows[0][idx], Value::Bool(true));
        assert_eq!(cv.table.rows[1][idx], Value::Bool(false));
        assert_eq!(cv.counts.members, 1);
    }

    #[test]
    fn missing_column_is_reported() {
        let a = users(&[Some("ana")]);
        let err = cross_validate(&a, "nombre", &a, "usuario", "flag").unwrap_err();
        assert!(matches!(err, EngineError::MissingColumn { .. }));
    }
}

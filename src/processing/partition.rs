//! Group-by pass over a [`Table`].
//!
//! [`group_rows`] scans the key column once and records row *indices* per normalized key, so the
//! grouping itself costs one `usize` per row. Sub-tables are materialized one at a time through
//! [`Grouping::partitions`] / [`Group::materialize`].

use std::collections::HashMap;

use crate::types::{normalize_key, Table};

/// Row indices sharing one normalized key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    /// Normalized key (trimmed, lower-cased).
    pub key: String,
    /// First-seen trimmed text of the key, for display and artifact names.
    pub label: String,
    /// Row indices in first-seen order.
    pub rows: Vec<usize>,
}

impl Group {
    /// Build this group's sub-table.
    pub fn materialize(&self, table: &Table) -> Partition {
        Partition {
            key: self.key.clone(),
            label: self.label.clone(),
            table: table.select_rows(&self.rows),
        }
    }
}

/// A materialized partition: the rows of one key as their own table.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    pub key: String,
    pub label: String,
    pub table: Table,
}

/// Result of the group-by pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Grouping {
    /// Groups in order of first appearance of their key.
    pub groups: Vec<Group>,
    /// Rows whose key was empty, null or `nan`.
    pub excluded: Vec<usize>,
}

impl Grouping {
    /// Lazily materialize each group's partition, in group order.
    pub fn partitions<'a>(&'a self, table: &'a Table) -> impl Iterator<Item = Partition> + 'a {
        self.groups.iter().map(move |g| g.materialize(table))
    }

    /// Number of rows assigned to some group.
    pub fn partitioned_rows(&self) -> usize {
        self.groups.iter().map(|g| g.rows.len()).sum()
    }
}

/// Group the rows of `table` by the normalized value of column `key_idx`.
///
/// Keys compare case-insensitively after trimming. Rows with a missing key are listed in
/// [`Grouping::excluded`] instead.
pub fn group_rows(table: &Table, key_idx: usize) -> Grouping {
    let mut slots: HashMap<String, usize> = HashMap::new();
    let mut grouping = Grouping::default();

    for (row_idx, row) in table.rows.iter().enumerate() {
        let Some(cell) = row.get(key_idx) else {
            grouping.excluded.push(row_idx);
            continue;
        };
        let Some(key) = normalize_key(cell) else {
            grouping.excluded.push(row_idx);
            continue;
        };
        match slots.get(&key) {
            Some(&slot) => grouping.groups[slot].rows.push(row_idx),
            None => {
                slots.insert(key.clone(), grouping.groups.len());
                grouping.groups.push(Group {
                    key,
                    label: cell.as_text().trim().to_string(),
                    rows: vec![row_idx],
                });
            }
        }
    }

    grouping
}

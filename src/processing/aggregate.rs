//! Category and exact-label counting over table rows.

use std::collections::HashSet;

use crate::categorize::{CategoryCount, CategoryTable, DetailCount};
use crate::types::{normalize_key, Table};

/// Counts accumulated over a set of rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregate {
    pub rows: u64,
    pub categories: CategoryCount,
    pub details: DetailCount,
}

impl Aggregate {
    pub fn new(categories: &CategoryTable) -> Self {
        Self {
            rows: 0,
            categories: CategoryCount::zeroed(categories),
            details: DetailCount::default(),
        }
    }

    /// Count one label. Missing labels land in the default bucket under the empty label.
    pub fn observe(&mut self, categories: &CategoryTable, label: &str) {
        let label = label.trim();
        self.rows += 1;
        self.categories.record(categories.categorize(label));
        self.details.record(label);
    }
}

/// Aggregate column `label_idx` over every row of `table`.
pub fn aggregate_rows(table: &Table, label_idx: usize, categories: &CategoryTable) -> Aggregate {
    let mut agg = Aggregate::new(categories);
    for row in 0..table.row_count() {
        agg.observe(categories, &table.cell(row, label_idx).as_text());
    }
    agg
}

/// Number of distinct non-missing values in column `idx` (case/whitespace-insensitive).
pub fn distinct_count(table: &Table, idx: usize) -> usize {
    (0..table.row_count())
        .filter_map(|row| normalize_key(table.cell(row, idx)))
        .collect::<HashSet<_>>()
        .len()
}

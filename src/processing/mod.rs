//! In-memory table transformations used by the engine.
//!
//! - [`group_rows()`]: one-pass group-by on a normalized key column, producing lazily
//!   materialized partitions
//! - [`aggregate_rows()`]: category and exact-label counts
//! - [`cross_validate()`]: identity membership flag between two tables
//!
//! ## Example: group → aggregate
//!
//! ```rust
//! use billing_partition::categorize::CategoryTable;
//! use billing_partition::processing::{aggregate_rows, group_rows};
//! use billing_partition::types::{Table, Value};
//!
//! let s = |v: &str| Value::Utf8(v.to_string());
//! let table = Table::new(
//!     &["profesional", "servicio"],
//!     vec![
//!         vec![s("Ana"), s("Ecografia Renal")],
//!         vec![s("Ana"), s("RX Torax")],
//!         vec![s("Luis"), s("Mamografia")],
//!     ],
//! );
//! let cats = CategoryTable::default();
//!
//! let grouping = group_rows(&table, 0);
//! assert_eq!(grouping.groups.len(), 2);
//!
//! let ana = grouping.groups[0].materialize(&table);
//! let agg = aggregate_rows(&ana.table, 1, &cats);
//! assert_eq!(agg.categories.get("ecografia"), 1);
//! assert_eq!(agg.categories.get("rx"), 1);
//! ```

pub mod aggregate;
pub mod cross;
pub mod partition;

pub use aggregate::{aggregate_rows, distinct_count, Aggregate};
pub use cross::{cross_validate, CrossValidation, MembershipCounts};
pub use partition::{group_rows, Group, Grouping, Partition};

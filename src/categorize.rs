//! Service-label categorization and the count maps built from it.
//!
//! A [`CategoryTable`] is an ordered list of `(category, [keyword, ...])` rules. A label is
//! lower-cased and trimmed, then the first category owning a keyword that is a substring of the
//! label wins. Order matters: overlapping keywords resolve by position, never by longest match.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Name of the default bucket for labels that match no rule.
pub const DEFAULT_OTHER_CATEGORY: &str = "otros";

/// One categorization rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRule {
    pub name: String,
    pub keywords: Vec<String>,
}

/// Ordered categorization rules plus the default bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "CategoryTableDef", into = "CategoryTableDef")]
pub struct CategoryTable {
    rules: Vec<CategoryRule>,
    other: String,
}

#[derive(Serialize, Deserialize)]
struct CategoryTableDef {
    rules: Vec<CategoryRule>,
    #[serde(default = "default_other")]
    other: String,
}

fn default_other() -> String {
    DEFAULT_OTHER_CATEGORY.to_string()
}

impl From<CategoryTableDef> for CategoryTable {
    fn from(def: CategoryTableDef) -> Self {
        Self::new(def.rules, def.other)
    }
}

impl From<CategoryTable> for CategoryTableDef {
    fn from(table: CategoryTable) -> Self {
        Self {
            rules: table.rules,
            other: table.other,
        }
    }
}

impl CategoryTable {
    /// Build a table; keywords are lower-cased and trimmed, empty keywords dropped.
    pub fn new(rules: Vec<CategoryRule>, other: impl Into<String>) -> Self {
        let rules = rules
            .into_iter()
            .map(|r| CategoryRule {
                name: r.name,
                keywords: r
                    .keywords
                    .iter()
                    .map(|k| k.trim().to_lowercase())
                    .filter(|k| !k.is_empty())
                    .collect(),
            })
            .collect();
        Self {
            rules,
            other: other.into(),
        }
    }

    /// Convenience constructor from `(name, keywords)` pairs.
    pub fn from_pairs(pairs: &[(&str, &[&str])], other: &str) -> Self {
        let rules = pairs
            .iter()
            .map(|(name, keywords)| CategoryRule {
                name: (*name).to_string(),
                keywords: keywords.iter().map(|k| (*k).to_string()).collect(),
            })
            .collect();
        Self::new(rules, other)
    }

    /// Category for a free-text service label.
    pub fn categorize(&self, label: &str) -> &str {
        let label = label.trim().to_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.keywords.iter().any(|k| label.contains(k.as_str())))
            .map(|rule| rule.name.as_str())
            .unwrap_or(self.other.as_str())
    }

    /// Declared category names in rule order, followed by the default bucket.
    pub fn category_names(&self) -> impl Iterator<Item = &str> {
        self.rules
            .iter()
            .map(|r| r.name.as_str())
            .chain(std::iter::once(self.other.as_str()))
    }

    /// Name of the default bucket.
    pub fn other(&self) -> &str {
        &self.other
    }

    pub fn rules(&self) -> &[CategoryRule] {
        &self.rules
    }
}

impl Default for CategoryTable {
    fn default() -> Self {
        Self::from_pairs(
            &[
                ("ecografia", &["ecografia", "ecografía", "ultrasonido", "doppler"]),
                ("rx", &["rx", "radiografia", "radiografía", "rayos x"]),
                ("mamografia", &["mamografia", "mamografía"]),
                ("cervicometria", &["cervicometria", "cervicometría"]),
            ],
            DEFAULT_OTHER_CATEGORY,
        )
    }
}

/// Category -> row count. Always contains every declared category and the default bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct CategoryCount(BTreeMap<String, u64>);

impl CategoryCount {
    /// All categories of `table` at zero.
    pub fn zeroed(table: &CategoryTable) -> Self {
        Self(table.category_names().map(|n| (n.to_string(), 0)).collect())
    }

    /// Count one row under `category`.
    pub fn record(&mut self, category: &str) {
        *self.0.entry(category.to_string()).or_insert(0) += 1;
    }

    pub fn get(&self, category: &str) -> u64 {
        self.0.get(category).copied().unwrap_or(0)
    }

    /// Sum over all categories.
    pub fn total(&self) -> u64 {
        self.0.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

/// Exact label -> row count.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DetailCount(BTreeMap<String, u64>);

impl DetailCount {
    pub fn record(&mut self, label: &str) {
        *self.0.entry(label.to_string()).or_insert(0) += 1;
    }

    pub fn get(&self, label: &str) -> u64 {
        self.0.get(label).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.0.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

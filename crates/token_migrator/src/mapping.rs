// SPDX-License-Identifier: Apache-2.0
//! Literal-to-token lookup tables.
//!
//! A [`MappingTable`] is built once from a list of [`MappingEntry`] values and
//! never mutated afterwards. Keys are normalized per [`ValueKind`]: color
//! literals are lower-cased with whitespace removed, length literals keep only
//! their bare numeric part (`"16px"` and `"16"` are the same key).
//!
//! Two entries that normalize to the same key inside one category are a
//! configuration error; lookups never depend on insertion order.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{MigrateError, Result};

// ── Category ────────────────────────────────────────────────────────────

/// Named group of related literals, each with its own token namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    FontSize,
    Size,
    Spacing,
    Position,
    Radius,
    ZIndex,
    Color,
}

/// How literals of a category are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Length,
    Color,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Category::FontSize,
        Category::Size,
        Category::Spacing,
        Category::Position,
        Category::Radius,
        Category::ZIndex,
        Category::Color,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FontSize => "font-size",
            Self::Size => "size",
            Self::Spacing => "spacing",
            Self::Position => "position",
            Self::Radius => "radius",
            Self::ZIndex => "z-index",
            Self::Color => "color",
        }
    }

    #[must_use]
    pub fn value_kind(self) -> ValueKind {
        match self {
            Self::Color => ValueKind::Color,
            _ => ValueKind::Length,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Category {
    type Err = MigrateError;

    fn from_str(raw: &str) -> Result<Self> {
        let wanted = raw.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|category| category.as_str() == wanted)
            .ok_or_else(|| MigrateError::invalid(format!("unknown category: {raw}")))
    }
}

// ── Entries ─────────────────────────────────────────────────────────────

/// One literal → token pairing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingEntry {
    pub literal: String,
    pub category: Category,
    pub token: String,
}

impl MappingEntry {
    #[must_use]
    pub fn new(literal: &str, category: Category, token: &str) -> Self {
        Self {
            literal: literal.to_string(),
            category,
            token: token.to_string(),
        }
    }
}

/// Normalize a literal into its lookup key for `kind`.
#[must_use]
pub fn normalize_literal(literal: &str, kind: ValueKind) -> String {
    match kind {
        ValueKind::Color => literal
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_ascii_lowercase(),
        ValueKind::Length => {
            let trimmed = literal.trim().to_ascii_lowercase();
            let numeric_end = trimmed
                .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-' || c == '+'))
                .unwrap_or(trimmed.len());
            let numeric = trimmed[..numeric_end].trim_start_matches('+');
            if numeric.is_empty() {
                trimmed
            } else {
                numeric.to_string()
            }
        }
    }
}

// ── Table ───────────────────────────────────────────────────────────────

/// Immutable lookup from `(category, normalized literal)` to token.
#[derive(Debug, Clone, Default)]
pub struct MappingTable {
    entries: BTreeMap<(Category, String), MappingEntry>,
}

impl MappingTable {
    /// Build a table, rejecting empty fields and duplicate keys.
    pub fn from_entries(entries: impl IntoIterator<Item = MappingEntry>) -> Result<Self> {
        let mut table = BTreeMap::new();
        for entry in entries {
            if entry.literal.trim().is_empty() || entry.token.trim().is_empty() {
                return Err(MigrateError::invalid(format!(
                    "mapping entry in category {} has an empty literal or token",
                    entry.category
                )));
            }
            let key = (
                entry.category,
                normalize_literal(&entry.literal, entry.category.value_kind()),
            );
            if table.contains_key(&key) {
                return Err(MigrateError::DuplicateMapping {
                    category: entry.category.to_string(),
                    literal: entry.literal,
                });
            }
            table.insert(key, entry);
        }
        Ok(Self { entries: table })
    }

    /// Token for `literal` under `category`, if one is defined.
    #[must_use]
    pub fn lookup(&self, literal: &str, category: Category) -> Option<&str> {
        let key = (category, normalize_literal(literal, category.value_kind()));
        self.entries.get(&key).map(|entry| entry.token.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries per category, in category order.
    #[must_use]
    pub fn counts_by_category(&self) -> BTreeMap<Category, usize> {
        let mut counts = BTreeMap::new();
        for (category, _) in self.entries.keys() {
            *counts.entry(*category).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::{Category, MappingEntry, MappingTable, ValueKind, normalize_literal};
    use crate::error::MigrateError;

    fn table() -> MappingTable {
        MappingTable::from_entries(vec![
            MappingEntry::new("14px", Category::FontSize, "var(--text-base)"),
            MappingEntry::new("24px", Category::FontSize, "var(--text-2xl)"),
            MappingEntry::new("24px", Category::Size, "var(--size-24)"),
            MappingEntry::new("#409EFF", Category::Color, "var(--primary-color)"),
            MappingEntry::new("rgba(0, 0, 0, 0.1)", Category::Color, "var(--shadow-color)"),
        ])
        .expect("valid table")
    }

    #[test]
    fn length_literals_compare_unit_stripped() {
        assert_eq!(normalize_literal(" 16px ", ValueKind::Length), "16");
        assert_eq!(normalize_literal("0.5rem", ValueKind::Length), "0.5");
        assert_eq!(normalize_literal("-8px", ValueKind::Length), "-8");
        assert_eq!(normalize_literal("auto", ValueKind::Length), "auto");

        let table = table();
        assert_eq!(
            table.lookup("14", Category::FontSize),
            Some("var(--text-base)")
        );
        assert_eq!(
            table.lookup("14px", Category::FontSize),
            Some("var(--text-base)")
        );
    }

    #[test]
    fn color_literals_are_case_and_whitespace_insensitive() {
        let table = table();
        assert_eq!(
            table.lookup("#409eff", Category::Color),
            Some("var(--primary-color)")
        );
        assert_eq!(
            table.lookup("  #409EfF ", Category::Color),
            Some("var(--primary-color)")
        );
        assert_eq!(
            table.lookup("rgba(0,0,0,0.1)", Category::Color),
            Some("var(--shadow-color)")
        );
    }

    #[test]
    fn same_literal_resolves_per_category() {
        let table = table();
        assert_eq!(
            table.lookup("24px", Category::FontSize),
            Some("var(--text-2xl)")
        );
        assert_eq!(table.lookup("24px", Category::Size), Some("var(--size-24)"));
        assert_eq!(table.lookup("24px", Category::Spacing), None);
    }

    #[test]
    fn missing_literal_is_absent_not_error() {
        assert_eq!(table().lookup("999px", Category::Spacing), None);
    }

    #[test]
    fn duplicate_literal_within_category_is_rejected() {
        let error = MappingTable::from_entries(vec![
            MappingEntry::new("#409eff", Category::Color, "var(--primary-color)"),
            MappingEntry::new("#409EFF", Category::Color, "var(--el-color-primary)"),
        ])
        .expect_err("duplicate should be rejected");

        assert!(matches!(
            error,
            MigrateError::DuplicateMapping { category, literal }
                if category == "color" && literal == "#409EFF"
        ));
    }

    #[test]
    fn length_duplicates_detected_after_unit_stripping() {
        let error = MappingTable::from_entries(vec![
            MappingEntry::new("16px", Category::Spacing, "var(--spacing-md)"),
            MappingEntry::new("16", Category::Spacing, "var(--spacing-16)"),
        ])
        .expect_err("unit-stripped duplicate should be rejected");
        assert!(matches!(error, MigrateError::DuplicateMapping { .. }));
    }

    #[test]
    fn empty_token_is_rejected() {
        let error = MappingTable::from_entries(vec![MappingEntry::new(
            "4px",
            Category::Radius,
            "  ",
        )])
        .expect_err("empty token");
        assert!(matches!(error, MigrateError::InvalidArgument { .. }));
    }

    #[test]
    fn category_parses_and_displays_kebab_case() {
        for category in Category::ALL {
            let parsed: Category = category.as_str().parse().expect("round trip");
            assert_eq!(parsed, category);
        }
        assert_eq!("Font-Size".parse::<Category>().ok(), Some(Category::FontSize));
        assert!("margin".parse::<Category>().is_err());

        let json = serde_json::to_string(&Category::FontSize).expect("serialize");
        assert_eq!(json, "\"font-size\"");
        let json = serde_json::to_string(&Category::ZIndex).expect("serialize");
        assert_eq!(json, "\"z-index\"");
    }

    #[test]
    fn counts_by_category_groups_entries() {
        let counts = table().counts_by_category();
        assert_eq!(counts.get(&Category::FontSize), Some(&2));
        assert_eq!(counts.get(&Category::Color), Some(&2));
        assert_eq!(counts.get(&Category::Radius), None);
    }
}

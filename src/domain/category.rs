//! Category filter nodes and the durable per-subtree count snapshot
//!
//! Filter nodes are re-derived from the listing UI every cycle. Snapshot rows
//! are keyed by [`SubtreeKey`]; a key without a subcategory means "the whole
//! category".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A category or subcategory entry read from a section's filter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterNode {
    pub id: String,
    pub name: String,
    /// Item-count annotation shown next to the node, when it could be parsed
    pub item_count: Option<u32>,
}

impl FilterNode {
    pub fn new(id: impl Into<String>, name: impl Into<String>, item_count: Option<u32>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            item_count,
        }
    }
}

/// Composite key `(category, optional subcategory)` for snapshot tracking
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubtreeKey {
    pub category_id: String,
    pub subcategory_id: Option<String>,
}

impl SubtreeKey {
    pub fn category(category_id: impl Into<String>) -> Self {
        Self {
            category_id: category_id.into(),
            subcategory_id: None,
        }
    }

    pub fn subcategory(category_id: impl Into<String>, subcategory_id: impl Into<String>) -> Self {
        Self {
            category_id: category_id.into(),
            subcategory_id: Some(subcategory_id.into()),
        }
    }

    pub const fn is_whole_category(&self) -> bool {
        self.subcategory_id.is_none()
    }
}

impl fmt::Display for SubtreeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.subcategory_id {
            Some(sub) => write!(f, "{}/{}", self.category_id, sub),
            None => f.write_str(&self.category_id),
        }
    }
}

/// Last committed count of one subtree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorySnapshotEntry {
    pub key: SubtreeKey,
    pub name: String,
    pub item_count: u32,
    pub updated_at: DateTime<Utc>,
}

/// All committed snapshot rows, read once at crawl start
#[derive(Debug, Clone, Default)]
pub struct CategorySnapshot(HashMap<SubtreeKey, CategorySnapshotEntry>);

impl CategorySnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entry: CategorySnapshotEntry) {
        self.0.insert(entry.key.clone(), entry);
    }

    pub fn count_for(&self, key: &SubtreeKey) -> Option<u32> {
        self.0.get(key).map(|e| e.item_count)
    }

    pub fn get(&self, key: &SubtreeKey) -> Option<&CategorySnapshotEntry> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &SubtreeKey> {
        self.0.keys()
    }
}

impl FromIterator<CategorySnapshotEntry> for CategorySnapshot {
    fn from_iter<T: IntoIterator<Item = CategorySnapshotEntry>>(iter: T) -> Self {
        Self(iter.into_iter().map(|e| (e.key.clone(), e)).collect())
    }
}

/// Snapshot row to write once the cycle commits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSnapshotUpdate {
    pub key: SubtreeKey,
    pub item_count: u32,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_lookup_distinguishes_whole_category_from_subcategory() {
        let now = Utc::now();
        let snapshot: CategorySnapshot = vec![
            CategorySnapshotEntry {
                key: SubtreeKey::category("3760911"),
                name: "Beauty".into(),
                item_count: 40,
                updated_at: now,
            },
            CategorySnapshotEntry {
                key: SubtreeKey::subcategory("3760911", "11058281"),
                name: "Hair Care".into(),
                item_count: 7,
                updated_at: now,
            },
        ]
        .into_iter()
        .collect();

        assert_eq!(snapshot.count_for(&SubtreeKey::category("3760911")), Some(40));
        assert_eq!(snapshot.count_for(&SubtreeKey::subcategory("3760911", "11058281")), Some(7));
        assert_eq!(snapshot.count_for(&SubtreeKey::subcategory("3760911", "999")), None);
        assert_eq!(SubtreeKey::subcategory("1", "2").to_string(), "1/2");
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::item::{Item, ItemId};
use super::section::Section;

/// Durable identity record of an item, created on first observation
///
/// `suggested_at` is set once, the first time the item is included in a
/// dispatched suggestion, and is never cleared afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestionRecord {
    pub id: ItemId,
    pub section: Section,
    pub name: String,
    pub url: String,
    pub image_url: Option<String>,
    pub first_seen_at: DateTime<Utc>,
    pub suggested_at: Option<DateTime<Utc>>,
}

impl SuggestionRecord {
    pub const fn is_suggested(&self) -> bool {
        self.suggested_at.is_some()
    }
}

impl From<&Item> for SuggestionRecord {
    fn from(item: &Item) -> Self {
        Self {
            id: item.id.clone(),
            section: item.section,
            name: item.name.clone(),
            url: item.url.clone(),
            image_url: item.image_url.clone(),
            first_seen_at: item.first_seen_at,
            suggested_at: None,
        }
    }
}

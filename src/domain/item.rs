//! Item entity and its canonical identifier
//!
//! An item is identified by the 10-character alphanumeric code found in its
//! product URL (`/dp/<ID>`). Identity is the identifier alone: the section an
//! item was observed in is metadata, not part of the key.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::errors::DomainError;
use super::section::Section;

/// Length of a canonical item identifier
pub const ITEM_ID_LEN: usize = 10;

static PRODUCT_URL_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)/(?:dp|gp/product)/([a-z0-9]{10})(?:[/?#]|$)")
        .expect("product URL pattern is valid")
});

/// Canonical, upper-cased item identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ItemId(String);

impl ItemId {
    /// Parse a raw identifier, normalising case
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let trimmed = raw.trim();
        if trimmed.len() != ITEM_ID_LEN || !trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(DomainError::InvalidItemId(raw.to_string()));
        }
        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    /// Extract the identifier from a product URL
    pub fn from_product_url(url: &str) -> Option<Self> {
        PRODUCT_URL_ID
            .captures(url)
            .and_then(|caps| caps.get(1))
            .map(|m| Self(m.as_str().to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ItemId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ItemId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ItemId> for String {
    fn from(id: ItemId) -> Self {
        id.0
    }
}

/// A product tile observed on a listing page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub section: Section,
    pub name: String,
    pub url: String,
    pub image_url: Option<String>,
    pub first_seen_at: DateTime<Utc>,
}

impl Item {
    pub fn new(id: ItemId, section: Section, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id,
            section,
            name: name.into(),
            url: url.into(),
            image_url: None,
            first_seen_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_image(mut self, image_url: Option<String>) -> Self {
        self.image_url = image_url;
        self
    }
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] {}", self.id, self.section, self.name)
    }
}

//! Service seams the crawl engine depends on
//!
//! `ListingSession` is the authenticated page provider; `PreferenceOracle` is
//! the external preference-matching service. Both are owned by the caller and
//! handed to a cycle, never reached through global state.

use async_trait::async_trait;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::{
    category::FilterNode,
    item::{Item, ItemId},
    section::{Section, SectionCounts},
};

/// What a navigation points at: a section, optionally narrowed to a category subtree
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListingTarget {
    pub section: Section,
    pub category_id: Option<String>,
    pub subcategory_id: Option<String>,
}

impl ListingTarget {
    pub const fn section(section: Section) -> Self {
        Self {
            section,
            category_id: None,
            subcategory_id: None,
        }
    }

    pub fn category(section: Section, category_id: impl Into<String>) -> Self {
        Self {
            section,
            category_id: Some(category_id.into()),
            subcategory_id: None,
        }
    }

    pub fn subcategory(
        section: Section,
        category_id: impl Into<String>,
        subcategory_id: impl Into<String>,
    ) -> Self {
        Self {
            section,
            category_id: Some(category_id.into()),
            subcategory_id: Some(subcategory_id.into()),
        }
    }
}

impl fmt::Display for ListingTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.section)?;
        if let Some(cat) = &self.category_id {
            write!(f, "/{cat}")?;
        }
        if let Some(sub) = &self.subcategory_id {
            write!(f, "/{sub}")?;
        }
        Ok(())
    }
}

/// Content of one navigated listing page
#[derive(Debug, Clone, Default)]
pub struct ListingPage {
    pub page_number: u32,
    /// Item records extracted from the page; empty when the expected structure was absent
    pub items: Vec<Item>,
    /// Total-result count parsed from page text, if any
    pub total_results: Option<u32>,
    /// Whether the pagination control offers a next page
    pub has_next: bool,
    /// Filter nodes one level below the target: categories for a bare section,
    /// subcategories for a category target, nothing for a subcategory target
    pub filter_nodes: Vec<FilterNode>,
}

/// Navigable, authenticated browsing context
///
/// Navigation is strictly sequential, hence `&mut self`. Implementations raise
/// on navigation timeout.
#[async_trait]
pub trait ListingSession: Send {
    /// Current total-result count of every monitored section
    async fn section_counts(&mut self) -> Result<SectionCounts>;

    /// Navigate to `page` (1-based) of `target` and extract its content
    async fn open(&mut self, target: &ListingTarget, page: u32) -> Result<ListingPage>;
}

/// Item summary handed to the oracle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleItem {
    pub id: ItemId,
    pub name: String,
}

impl From<&Item> for OracleItem {
    fn from(item: &Item) -> Self {
        Self {
            id: item.id.clone(),
            name: item.name.clone(),
        }
    }
}

/// External preference-matching service
///
/// An empty answer means "select none" and is authoritative. Returned values are
/// untrusted: identifiers may not correspond to any submitted item.
#[async_trait]
pub trait PreferenceOracle: Send + Sync {
    /// Identifiers of the appealing items among `items`
    async fn classify_appeal(&self, items: &[OracleItem]) -> Result<Vec<String>>;

    /// Names of the subcategories of `category` worth crawling
    async fn filter_subcategories(&self, category: &str, subcategories: &[String]) -> Result<Vec<String>>;
}

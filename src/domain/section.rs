//! Listing sections and their observed result counts

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::errors::DomainError;

/// One of the fixed listing tabs of the monitored surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    /// "Recommended for you"
    Recommended,
    /// "Available for all"
    Available,
    /// "Additional items", the only tab that normally exposes a category filter
    Additional,
}

impl Section {
    pub const ALL: [Self; 3] = [Self::Recommended, Self::Available, Self::Additional];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Recommended => "recommended",
            Self::Available => "available",
            Self::Additional => "additional",
        }
    }

    /// Queue parameter used by the listing URL
    pub const fn queue(self) -> &'static str {
        match self {
            Self::Recommended => "potluck",
            Self::Available => "last_chance",
            Self::Additional => "encore",
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Section {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "recommended" | "potluck" => Ok(Self::Recommended),
            "available" | "last_chance" => Ok(Self::Available),
            "additional" | "encore" => Ok(Self::Additional),
            other => Err(DomainError::UnknownSection(other.to_string())),
        }
    }
}

/// Snapshot of total-result-count per section
///
/// Upstream counts are parsed from page text and may be zero or stale, so they
/// only drive change detection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionCounts(BTreeMap<Section, u32>);

impl SectionCounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, section: Section, count: u32) {
        self.0.insert(section, count);
    }

    #[must_use]
    pub fn with(mut self, section: Section, count: u32) -> Self {
        self.set(section, count);
        self
    }

    /// Count for a section, zero when it was not observed
    pub fn get(&self, section: Section) -> u32 {
        self.0.get(&section).copied().unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Section, u32)> + '_ {
        self.0.iter().map(|(section, count)| (*section, *count))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn total(&self) -> u64 {
        self.0.values().map(|&c| u64::from(c)).sum()
    }
}

impl FromIterator<(Section, u32)> for SectionCounts {
    fn from_iter<T: IntoIterator<Item = (Section, u32)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for SectionCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.iter().map(|(s, c)| format!("{s}:{c}")).collect();
        write!(f, "{{{}}}", parts.join(", "))
    }
}

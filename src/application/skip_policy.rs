//! Leaf skip policies used by the category planner
//!
//! Both built-in policies trade completeness for crawl cost, so each can be
//! turned off from configuration.

use std::fmt;
use tracing::debug;

use crate::domain::{CategorySnapshot, SubtreeKey};

/// A category or subcategory the planner is about to crawl
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafCandidate {
    pub key: SubtreeKey,
    pub name: String,
    pub item_count: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    UnchangedCount(u32),
    AccessoryBucket { count: u32, threshold: u32 },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnchangedCount(n) => write!(f, "item count unchanged at {n}"),
            Self::AccessoryBucket { count, threshold } => {
                write!(f, "accessory bucket with {count} items (threshold {threshold})")
            }
        }
    }
}

pub trait LeafSkipPolicy: Send + Sync {
    fn should_skip(&self, leaf: &LeafCandidate, snapshot: &CategorySnapshot) -> Option<SkipReason>;
}

/// Skip a leaf whose current count equals the last committed count
///
/// Known false negative: items can churn under a stable aggregate count.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnchangedCountSkip;

impl LeafSkipPolicy for UnchangedCountSkip {
    fn should_skip(&self, leaf: &LeafCandidate, snapshot: &CategorySnapshot) -> Option<SkipReason> {
        let current = leaf.item_count?;
        (snapshot.count_for(&leaf.key) == Some(current)).then_some(SkipReason::UnchangedCount(current))
    }
}

/// Skip large mixed "parts & accessories" buckets
#[derive(Debug, Clone)]
pub struct AccessoryBucketSkip {
    keywords: Vec<String>,
    threshold: u32,
}

impl AccessoryBucketSkip {
    pub fn new(keywords: &[String], threshold: u32) -> Self {
        Self {
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
            threshold,
        }
    }
}

impl Default for AccessoryBucketSkip {
    fn default() -> Self {
        Self::new(&["accessor".to_string(), "parts".to_string()], 400)
    }
}

impl LeafSkipPolicy for AccessoryBucketSkip {
    fn should_skip(&self, leaf: &LeafCandidate, _snapshot: &CategorySnapshot) -> Option<SkipReason> {
        let count = leaf.item_count?;
        if count <= self.threshold {
            return None;
        }
        let name = leaf.name.to_lowercase();
        self.keywords
            .iter()
            .any(|k| name.contains(k.as_str()))
            .then_some(SkipReason::AccessoryBucket {
                count,
                threshold: self.threshold,
            })
    }
}

/// Planner tuning knobs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannerSettings {
    pub skip_unchanged_counts: bool,
    /// 0 disables the accessory-bucket skip
    pub accessory_skip_threshold: u32,
    pub accessory_keywords: Vec<String>,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            skip_unchanged_counts: true,
            accessory_skip_threshold: 400,
            accessory_keywords: vec!["accessor".to_string(), "parts".to_string()],
        }
    }
}

/// First matching policy wins
#[derive(Default)]
pub struct SkipPolicies(Vec<Box<dyn LeafSkipPolicy>>);

impl SkipPolicies {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn from_settings(settings: &PlannerSettings) -> Self {
        let mut policies = Self::none();
        if settings.skip_unchanged_counts {
            policies = policies.with(UnchangedCountSkip);
        }
        if settings.accessory_skip_threshold > 0 {
            policies = policies.with(AccessoryBucketSkip::new(
                &settings.accessory_keywords,
                settings.accessory_skip_threshold,
            ));
        }
        debug!("Leaf skip policies active: {}", policies.0.len());
        policies
    }

    #[must_use]
    pub fn with(mut self, policy: impl LeafSkipPolicy + 'static) -> Self {
        self.0.push(Box::new(policy));
        self
    }

    /// Whether the unchanged-count rule may be applied to a whole category before entering it
    pub fn skips_unchanged(&self, key: &SubtreeKey, item_count: Option<u32>, snapshot: &CategorySnapshot) -> bool {
        let probe = LeafCandidate {
            key: key.clone(),
            name: String::new(),
            item_count,
        };
        self.0
            .iter()
            .any(|p| matches!(p.should_skip(&probe, snapshot), Some(SkipReason::UnchangedCount(_))))
    }
}

impl LeafSkipPolicy for SkipPolicies {
    fn should_skip(&self, leaf: &LeafCandidate, snapshot: &CategorySnapshot) -> Option<SkipReason> {
        self.0.iter().find_map(|p| p.should_skip(leaf, snapshot))
    }
}

//! Identity & change detection
//!
//! Decides from per-section result counts whether a full crawl is warranted.
//! Only a strict increase in some section counts as a change; decreases are
//! absorbed into the new baseline.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, info};

use crate::domain::{CrawlStore, Section, SectionCounts};

/// Outcome of change detection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlDecision {
    /// No baseline exists yet
    FirstRun,
    /// Sections whose count strictly increased, as `(section, previous, current)`
    Increased(Vec<(Section, u32, u32)>),
    /// Nothing increased; the current counts become the new baseline
    Unchanged,
}

impl CrawlDecision {
    pub const fn warrants_crawl(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// Pure policy: crawl on first run or when any section's count strictly grew
pub fn decide(previous: Option<&SectionCounts>, current: &SectionCounts) -> CrawlDecision {
    let Some(previous) = previous else {
        return CrawlDecision::FirstRun;
    };

    let increased: Vec<(Section, u32, u32)> = current
        .iter()
        .filter_map(|(section, now)| {
            let before = previous.get(section);
            (now > before).then_some((section, before, now))
        })
        .collect();

    if increased.is_empty() {
        CrawlDecision::Unchanged
    } else {
        CrawlDecision::Increased(increased)
    }
}

pub struct ChangeDetector {
    store: Arc<dyn CrawlStore>,
}

impl ChangeDetector {
    pub fn new(store: Arc<dyn CrawlStore>) -> Self {
        Self { store }
    }

    /// Compare `current` with the stored baseline.
    ///
    /// When the decision is to skip, `current` is persisted immediately as the
    /// new baseline; otherwise the baseline is written at commit time.
    pub async fn detect(&self, current: &SectionCounts) -> Result<CrawlDecision> {
        let previous = self
            .store
            .last_section_counts()
            .await
            .context("Failed to read last section counts")?;

        let decision = decide(previous.as_ref(), current);
        match &decision {
            CrawlDecision::FirstRun => info!("No previous section counts; crawling (current {})", current),
            CrawlDecision::Increased(changes) => {
                for (section, before, now) in changes {
                    info!("Section {} grew {} -> {}", section, before, now);
                }
            }
            CrawlDecision::Unchanged => {
                debug!("No section count increased; skipping crawl (current {})", current);
                self.store
                    .set_last_section_counts(current)
                    .await
                    .context("Failed to persist section count baseline")?;
            }
        }
        Ok(decision)
    }
}

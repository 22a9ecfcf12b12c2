//! Application layer module
//!
//! The crawl engine: change detection, per-leaf crawling, category planning,
//! seen-resolution and batch dispatch, orchestrated by [`CrawlCycle`].

pub mod category_planner;
pub mod change_detector;
pub mod crawl_cycle;
pub mod dispatch;
pub mod section_crawler;
pub mod seen_resolver;
pub mod skip_policy;

pub use category_planner::{CategoryPlanner, PlanContext, PlanOutcome, SkippedLeaf};
pub use change_detector::{ChangeDetector, CrawlDecision};
pub use crawl_cycle::{CrawlCycle, CycleOutcome, CycleResult, CycleSettings};
pub use dispatch::{BatchDispatchCoordinator, DispatchOutcome, DispatchSettings, ItemChunk, Reconciliation, reconcile};
pub use section_crawler::{CrawlLedger, LeafReport, LeafRequest, SectionCrawler, StopReason};
pub use seen_resolver::{SeenPredicate, UnseenItemResolver};
pub use skip_policy::{
    AccessoryBucketSkip, LeafCandidate, LeafSkipPolicy, PlannerSettings, SkipPolicies, SkipReason, UnchangedCountSkip,
};

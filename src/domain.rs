//! Domain module - Core entities, value objects and service seams
//!
//! Modern Rust module organization (Rust 2018+ style):
//! - Each module is its own file in the domain/ directory
//! - Public exports are defined here for convenience

pub mod category;
pub mod cycle_stage;
pub mod errors;
pub mod item;
pub mod pagination;
pub mod repositories;
pub mod section;
pub mod services;
pub mod suggestion;

pub use category::{CategorySnapshot, CategorySnapshotEntry, FilterNode, PendingSnapshotUpdate, SubtreeKey};
pub use cycle_stage::{CycleStage, CycleStateMachine};
pub use errors::DomainError;
pub use item::{Item, ItemId};
pub use pagination::PaginationCalculator;
pub use repositories::CrawlStore;
pub use section::{Section, SectionCounts};
pub use services::{ListingPage, ListingSession, ListingTarget, OracleItem, PreferenceOracle};
pub use suggestion::SuggestionRecord;

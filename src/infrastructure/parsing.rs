//! HTML parsing for listing pages
//!
//! Selector lists are configurable with fallbacks; extraction problems degrade to
//! empty pages instead of failing a crawl.

pub mod config;
pub mod listing_parser;

// Re-export public types
pub use crate::infrastructure::parsing_error::{ParsingError, ParsingResult};
pub use self::config::ListingSelectors;
pub use listing_parser::{ListingParser, parse_result_total, split_count_annotation};

//! Vine Sentinel - incremental crawl and dedup engine for a gated product listing
//!
//! Watches the listing's sections for result-count changes, crawls only what is
//! new (descending into categories where the section offers them), and hands
//! unseen items to a preference oracle in batches while the crawl continues.

// Module declarations
pub mod application;
pub mod domain;
pub mod infrastructure;

#[cfg(test)]
pub mod test_utils;

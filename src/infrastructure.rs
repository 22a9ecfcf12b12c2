//! Infrastructure layer for storage, HTTP navigation, parsing and external integrations
//!
//! Concrete implementations of the domain seams: `SqliteCrawlStore` (`CrawlStore`),
//! `HttpListingSession` (`ListingSession`) and `OpenAiOracle` (`PreferenceOracle`).

pub mod config; // Configuration constants and helpers
pub mod database_connection;
pub mod http_client;
pub mod listing_session;
pub mod logging; // Logging infrastructure
pub mod openai_oracle;
pub mod parsing; // Listing page parsers
pub mod parsing_error;
pub mod sqlite_store;

// Re-export commonly used items
pub use self::config::{AppConfig, ConfigManager, vine};
pub use database_connection::DatabaseConnection;
pub use http_client::{FetchedPage, HttpClient, HttpClientConfig};
pub use listing_session::{HttpListingSession, SessionSettings};
pub use logging::{get_log_directory, init_logging_with_config, log_system_info};
pub use openai_oracle::OpenAiOracle;
pub use parsing::{ListingParser, ListingSelectors, ParsingError, ParsingResult};
pub use sqlite_store::SqliteCrawlStore;

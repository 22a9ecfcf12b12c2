//! Configuration infrastructure
//!
//! Configuration is layered:
//! 1. Built-in defaults (`defaults` module)
//! 2. JSON file in the user config directory, created with defaults on first run
//! 3. Environment overrides, `VINE_SENTINEL__<SECTION>__<KEY>` (e.g. `VINE_SENTINEL__DISPATCH__BATCH_SIZE=10`)

#![allow(clippy::uninlined_format_args)]

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::info;

use crate::application::{CycleSettings, DispatchSettings, PlannerSettings};
use crate::domain::{PaginationCalculator, Section};

/// Prefix of environment overrides
pub const ENV_PREFIX: &str = "VINE_SENTINEL";

/// Complete application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub crawl: CrawlConfig,
    pub planner: PlannerConfig,
    pub dispatch: DispatchConfig,
    pub oracle: OracleConfig,
    pub session: SessionConfig,
    pub database: DatabaseConfig,
    pub scheduler: SchedulerConfig,
    pub logging: LoggingConfig,
}

/// Crawl bounds and target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    /// Items per listing page upstream
    pub page_size: u32,
    /// Hard cap on pages per leaf
    pub max_pages_per_leaf: u32,
    /// Unseen-item budget of one section per cycle
    pub max_items_per_section: usize,
    pub navigation_timeout_seconds: u64,
    /// Polite delay between two navigations
    pub request_delay_ms: u64,
    pub marketplace_url: String,
    /// Sections crawled each cycle, in order
    pub sections: Vec<Section>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Skip leaves whose item count matches the last committed snapshot
    pub skip_unchanged_counts: bool,
    /// Accessory buckets above this count are skipped; 0 disables
    pub accessory_skip_threshold: u32,
    pub accessory_keywords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub batch_size: usize,
    /// Global cap on items classified per cycle
    pub max_items_per_run: usize,
    /// Item chunks buffered between crawler and dispatcher
    pub queue_capacity: usize,
}

/// OpenAI-compatible chat-completions endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub endpoint: String,
    pub model: String,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
    /// Free-form document describing what the user finds appealing
    pub guidance_path: Option<PathBuf>,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// File holding the signed-in `Cookie` header value
    pub cookie_file: Option<PathBuf>,
    pub user_agent: String,
    pub max_requests_per_second: u32,
    /// Bounded wait for manual sign-in before proceeding regardless
    pub sign_in_wait_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// sqlx connection URL; empty means `<data dir>/database/vine_sentinel.db`
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub interval_seconds: u64,
}

/// Logging configuration settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,
    pub json_format: bool,
    pub console_output: bool,
    pub file_output: bool,
    /// Log directory; empty means `<data dir>/logs`
    pub directory: Option<PathBuf>,
    /// Number of log files to keep (older files will be deleted)
    pub max_files: u32,
    /// Module-specific log level filters (e.g., "sqlx": "warn")
    pub module_filters: HashMap<String, String>,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            page_size: defaults::PAGE_SIZE,
            max_pages_per_leaf: defaults::MAX_PAGES_PER_LEAF,
            max_items_per_section: defaults::MAX_ITEMS_PER_SECTION,
            navigation_timeout_seconds: defaults::NAVIGATION_TIMEOUT_SECONDS,
            request_delay_ms: defaults::REQUEST_DELAY_MS,
            marketplace_url: defaults::MARKETPLACE_URL.to_string(),
            sections: Section::ALL.to_vec(),
        }
    }
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            skip_unchanged_counts: true,
            accessory_skip_threshold: defaults::ACCESSORY_SKIP_THRESHOLD,
            accessory_keywords: defaults::ACCESSORY_KEYWORDS.iter().map(ToString::to_string).collect(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batch_size: defaults::BATCH_SIZE,
            max_items_per_run: defaults::MAX_ITEMS_PER_RUN,
            queue_capacity: defaults::QUEUE_CAPACITY,
        }
    }
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            endpoint: defaults::ORACLE_ENDPOINT.to_string(),
            model: defaults::ORACLE_MODEL.to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            guidance_path: None,
            timeout_seconds: defaults::ORACLE_TIMEOUT_SECONDS,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_file: None,
            user_agent: defaults::USER_AGENT.to_string(),
            max_requests_per_second: defaults::MAX_REQUESTS_PER_SECOND,
            sign_in_wait_seconds: defaults::SIGN_IN_WAIT_SECONDS,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { url: String::new() }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_seconds: defaults::SCHEDULER_INTERVAL_SECONDS,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json_format: false,
            console_output: true,
            file_output: true,
            directory: None,
            max_files: defaults::LOG_MAX_FILES,
            module_filters: HashMap::new(),
        }
    }
}

impl CrawlConfig {
    pub const fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_seconds)
    }

    pub const fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }
}

impl AppConfig {
    /// Engine settings for one crawl cycle
    pub fn cycle_settings(&self) -> CycleSettings {
        CycleSettings {
            sections: self.crawl.sections.clone(),
            pagination: PaginationCalculator::new(self.crawl.page_size, self.crawl.max_pages_per_leaf),
            max_items_per_section: self.crawl.max_items_per_section,
            planner: PlannerSettings {
                skip_unchanged_counts: self.planner.skip_unchanged_counts,
                accessory_skip_threshold: self.planner.accessory_skip_threshold,
                accessory_keywords: self.planner.accessory_keywords.clone(),
            },
            dispatch: DispatchSettings {
                batch_size: self.dispatch.batch_size,
                max_items_per_run: self.dispatch.max_items_per_run,
            },
            queue_capacity: self.dispatch.queue_capacity,
            shuffle_seed: None,
        }
    }

    /// Database URL, defaulting to a file under the app data directory
    pub fn database_url(&self) -> Result<String> {
        if !self.database.url.is_empty() {
            return Ok(self.database.url.clone());
        }
        let path = ConfigManager::get_app_data_dir()?
            .join("database")
            .join("vine_sentinel.db");
        Ok(format!("sqlite://{}", path.display()))
    }
}

/// Configuration manager for loading and saving settings
pub struct ConfigManager {
    pub config_path: PathBuf,
}

impl ConfigManager {
    /// Get the application configuration directory
    pub fn get_config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get user config directory")?
            .join("vine-sentinel");
        Ok(config_dir)
    }

    /// Get application data directory
    pub fn get_app_data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .context("Failed to get user data directory")?
            .join("vine-sentinel");
        Ok(data_dir)
    }

    pub fn new() -> Result<Self> {
        let config_path = Self::get_config_dir()?.join("vine_sentinel_config.json");
        Ok(Self { config_path })
    }

    pub fn with_path(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
        }
    }

    /// Load the layered configuration, writing defaults on first run
    pub async fn load_config(&self) -> Result<AppConfig> {
        if !self.config_path.exists() {
            info!("🎉 First run detected - writing default configuration to {:?}", self.config_path);
            self.save_config(&AppConfig::default()).await?;
        }

        let layered = config::Config::builder()
            .add_source(
                config::File::from(self.config_path.as_path())
                    .format(config::FileFormat::Json)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to assemble configuration layers")?;

        let app_config: AppConfig = layered
            .try_deserialize()
            .with_context(|| format!("Invalid configuration in {:?}", self.config_path))?;
        info!("Loaded configuration from: {:?}", self.config_path);
        Ok(app_config)
    }

    /// Save configuration to file
    pub async fn save_config(&self, config: &AppConfig) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create config directory")?;
        }

        let content = serde_json::to_string_pretty(config).context("Failed to serialize configuration")?;
        fs::write(&self.config_path, content)
            .await
            .context("Failed to write configuration file")?;

        info!("Saved configuration to: {:?}", self.config_path);
        Ok(())
    }

    /// Reset configuration to defaults (useful for troubleshooting)
    pub async fn reset_to_defaults(&self) -> Result<AppConfig> {
        info!("🔄 Resetting configuration to defaults");
        let default_config = AppConfig::default();
        self.save_config(&default_config).await?;
        Ok(default_config)
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }
}

/// Default configuration values
pub mod defaults {
    pub const PAGE_SIZE: u32 = 24;
    pub const MAX_PAGES_PER_LEAF: u32 = 20;
    pub const MAX_ITEMS_PER_SECTION: usize = 400;
    pub const NAVIGATION_TIMEOUT_SECONDS: u64 = 30;
    pub const REQUEST_DELAY_MS: u64 = 1500;
    pub const MARKETPLACE_URL: &str = "https://www.amazon.com";

    pub const ACCESSORY_SKIP_THRESHOLD: u32 = 400;
    pub const ACCESSORY_KEYWORDS: &[&str] = &["accessor", "parts"];

    pub const BATCH_SIZE: usize = 20;
    pub const MAX_ITEMS_PER_RUN: usize = 150;
    pub const QUEUE_CAPACITY: usize = 64;

    pub const ORACLE_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
    pub const ORACLE_MODEL: &str = "gpt-4o-mini";
    pub const ORACLE_TIMEOUT_SECONDS: u64 = 60;

    pub const USER_AGENT: &str =
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";
    pub const MAX_REQUESTS_PER_SECOND: u32 = 1;
    pub const SIGN_IN_WAIT_SECONDS: u64 = 120;

    pub const SCHEDULER_INTERVAL_SECONDS: u64 = 600;

    pub const LOG_LEVEL: &str = "info";
    pub const LOG_MAX_FILES: u32 = 5;
}

/// Listing URL construction
pub mod vine {
    use anyhow::{Context, Result};
    use url::Url;

    use crate::domain::ListingTarget;

    pub const LISTING_PATH: &str = "/vine/vine-items";

    /// Absolute URL of `page` of `target`
    ///
    /// Page 1 carries no `page` parameter, matching the links the listing itself renders.
    pub fn listing_url(marketplace_url: &str, target: &ListingTarget, page: u32) -> Result<Url> {
        let mut url = Url::parse(marketplace_url)
            .and_then(|base| base.join(LISTING_PATH))
            .with_context(|| format!("Invalid marketplace URL {marketplace_url:?}"))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("queue", target.section.queue());
            if let Some(category) = &target.category_id {
                query.append_pair("pn", category);
            }
            if let Some(subcategory) = &target.subcategory_id {
                query.append_pair("cn", subcategory);
            }
            if page > 1 {
                query.append_pair("page", &page.to_string());
            }
        }
        Ok(url)
    }

    /// Resolve a relative link found on a listing page
    pub fn resolve_url(marketplace_url: &str, href: &str) -> Option<String> {
        Url::parse(marketplace_url)
            .ok()
            .and_then(|base| base.join(href).ok())
            .map(String::from)
    }
}

//! Vine Sentinel scheduler
//!
//! Keeps one listing session alive and runs crawl cycles strictly one after
//! another on the configured interval, or a single cycle with `--once`.

#![allow(clippy::uninlined_format_args)]

use anyhow::{Context, Result, anyhow};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use vine_sentinel_lib::application::{CrawlCycle, CycleOutcome, CycleResult};
use vine_sentinel_lib::domain::ListingSession;
use vine_sentinel_lib::infrastructure::{
    ConfigManager, DatabaseConnection, HttpListingSession, OpenAiOracle, SqliteCrawlStore, init_logging_with_config,
    log_system_info,
};

#[derive(Debug, Default)]
struct CliArgs {
    once: bool,
    config_path: Option<PathBuf>,
}

impl CliArgs {
    fn parse(args: impl IntoIterator<Item = String>) -> Result<Self> {
        let mut parsed = Self::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--once" => parsed.once = true,
                "--config" => {
                    let path = args.next().ok_or_else(|| anyhow!("--config needs a path"))?;
                    parsed.config_path = Some(PathBuf::from(path));
                }
                other => return Err(anyhow!("Unknown argument {other:?} (expected --once or --config <path>)")),
            }
        }
        Ok(parsed)
    }
}

fn log_cycle_summary(result: &CycleResult) {
    info!(
        "✅ Cycle {} done in {}s: {} new items, {} classified ({} over cap, {} failed batches), {} appealing",
        result.cycle_id,
        (result.finished_at - result.started_at).num_seconds(),
        result.new_item_count,
        result.dispatch.classified.len(),
        result.dispatch.over_cap,
        result.dispatch.failed_batches,
        result.appealing.len()
    );
    for skipped in &result.skipped {
        info!("  ⏭️ skipped {} ({})", skipped.name, skipped.reason);
    }
    for item in result.appealing_items() {
        info!("  ✨ {} {} {}", item.id, item.name, item.url);
    }
    if !result.unmatched_oracle_ids.is_empty() {
        warn!("  oracle returned unknown ids: {:?}", result.unmatched_oracle_ids);
    }
}

/// Runs cycles back to back until shutdown; returns how many ran
///
/// A running cycle is never cancelled. Shutdown is honoured between cycles.
async fn run_schedule(
    cycle: &CrawlCycle,
    session: &mut dyn ListingSession,
    shutdown: &CancellationToken,
    interval: Duration,
    once: bool,
) -> usize {
    let mut cycles = 0;
    while !shutdown.is_cancelled() {
        match cycle.run(&mut *session).await {
            Ok(CycleOutcome::Completed(result)) => log_cycle_summary(&result),
            Ok(CycleOutcome::Skipped { cycle_id, section_counts }) => {
                info!("Cycle {} skipped, counts {}", cycle_id, section_counts);
            }
            Err(e) => error!("❌ Cycle failed: {:#}", e),
        }
        cycles += 1;

        if once {
            break;
        }
        tokio::select! {
            () = shutdown.cancelled() => break,
            () = tokio::time::sleep(interval) => {}
        }
    }
    cycles
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse(std::env::args().skip(1))?;

    let manager = match &args.config_path {
        Some(path) => ConfigManager::with_path(path),
        None => ConfigManager::new()?,
    };
    let config = manager.load_config().await?;
    init_logging_with_config(&config.logging)?;
    log_system_info();
    info!("Configuration: {:?}", manager.config_path());

    let database_url = config.database_url()?;
    info!("🗄️ Using database: {}", database_url);
    let db = DatabaseConnection::new(&database_url).await?;
    db.migrate().await.context("Failed to migrate database")?;
    let store = Arc::new(SqliteCrawlStore::new(db.pool().clone()));
    info!("{} items suggested so far", store.count_suggestions().await?);

    let oracle = Arc::new(OpenAiOracle::from_config(&config.oracle).await?);
    let mut session = HttpListingSession::from_config(&config).await?;
    let cycle = CrawlCycle::new(store, oracle, config.cycle_settings());

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("🛑 Shutdown requested; stopping after the current cycle");
            signal_token.cancel();
        }
    });

    let interval = Duration::from_secs(config.scheduler.interval_seconds.max(1));
    let cycles = run_schedule(&cycle, &mut session, &shutdown, interval, args.once).await;

    info!("Vine Sentinel stopped after {} cycles", cycles);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use vine_sentinel_lib::application::CycleSettings;
    use vine_sentinel_lib::domain::{
        CrawlStore, ListingPage, ListingTarget, OracleItem, PreferenceOracle, Section, SectionCounts,
    };

    fn args(raw: &[&str]) -> Result<CliArgs> {
        CliArgs::parse(raw.iter().map(ToString::to_string))
    }

    #[test]
    fn cli_arguments() {
        let parsed = args(&["--once", "--config", "/tmp/vine.json"]).unwrap();
        assert!(parsed.once);
        assert_eq!(parsed.config_path, Some(PathBuf::from("/tmp/vine.json")));

        assert!(!args(&[]).unwrap().once);
        assert!(args(&["--config"]).is_err());
        assert!(args(&["--loop"]).is_err());
    }

    /// Session whose count probe raises the shutdown signal mid-cycle
    struct ShutdownDuringCycle {
        shutdown: CancellationToken,
    }

    #[async_trait::async_trait]
    impl ListingSession for ShutdownDuringCycle {
        async fn section_counts(&mut self) -> Result<SectionCounts> {
            self.shutdown.cancel();
            tokio::task::yield_now().await;
            Ok(SectionCounts::new().with(Section::Recommended, 1))
        }

        async fn open(&mut self, _target: &ListingTarget, page: u32) -> Result<ListingPage> {
            tokio::task::yield_now().await;
            Ok(ListingPage {
                page_number: page,
                ..ListingPage::default()
            })
        }
    }

    struct QuietOracle;

    #[async_trait::async_trait]
    impl PreferenceOracle for QuietOracle {
        async fn classify_appeal(&self, _items: &[OracleItem]) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn filter_subcategories(&self, _category: &str, subcategories: &[String]) -> Result<Vec<String>> {
            Ok(subcategories.to_vec())
        }
    }

    #[tokio::test]
    async fn shutdown_waits_for_the_running_cycle_to_commit() {
        let db = DatabaseConnection::new("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        let store = Arc::new(SqliteCrawlStore::new(db.pool().clone()));
        let cycle = CrawlCycle::new(store.clone(), Arc::new(QuietOracle), CycleSettings::default());
        let shutdown = CancellationToken::new();
        let mut session = ShutdownDuringCycle {
            shutdown: shutdown.clone(),
        };

        let cycles = run_schedule(&cycle, &mut session, &shutdown, Duration::from_secs(3600), false).await;

        assert_eq!(cycles, 1);
        let committed = store.last_section_counts().await.unwrap();
        assert_eq!(committed.map(|c| c.get(Section::Recommended)), Some(1));
    }
}

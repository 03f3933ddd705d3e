//! SETTLER — prop-market settlement engine
//!
//! Entry point. Loads configuration, initialises structured logging,
//! opens the store, checks calculator health and runs one settlement pass.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

use settler::config::AppConfig;
use settler::engine::orchestrator::SettlementOrchestrator;
use settler::engine::pipeline::SettlementPipeline;
use settler::storage::SqliteStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = AppConfig::path_from_env();
    let cfg = AppConfig::load(&config_path)?;

    init_logging();

    let pipeline_config = cfg.settlement.pipeline_config();
    info!(
        config = %config_path,
        year = pipeline_config.year,
        week = ?pipeline_config.week,
        dry_run = pipeline_config.dry_run,
        "SETTLER starting up"
    );

    // -- Store & calculators ---------------------------------------------

    let url = cfg.database_url()?;
    let store = Arc::new(SqliteStore::connect(&url, cfg.database.max_connections).await?);
    store.ensure_schema().await?;

    let orchestrator = Arc::new(SettlementOrchestrator::with_default_calculators(store.clone()));

    let coverage = orchestrator.get_calculator_coverage();
    info!(
        registered = coverage.registered.len(),
        market_types = coverage.covered_market_types.len(),
        unsupported = coverage.uncovered_market_types.len(),
        "Calculators registered"
    );

    let health = orchestrator.health_check(cfg.settlement.verbose_health).await;
    let unhealthy = health.iter().filter(|h| !h.healthy).count();
    if unhealthy > 0 {
        warn!(unhealthy, "Some calculators are unhealthy, their selections will error");
    }

    // -- Settlement pass -------------------------------------------------

    let pipeline = SettlementPipeline::new(orchestrator.clone(), store, pipeline_config);
    let report = pipeline.run().await.context("Settlement run failed")?;

    for (kind, stats) in orchestrator.cache_stats() {
        info!(
            calculator = %kind,
            games = stats.games_cached,
            rows = stats.rows_cached,
            hits = stats.hits,
            misses = stats.misses,
            on_demand = stats.on_demand_loads,
            "Cache stats"
        );
    }

    if report.dry_run {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    info!(
        run_id = %report.run_id,
        settled = report.markets_settled,
        errored = report.selections_errored,
        "SETTLER finished"
    );
    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("settler=info"));

    let json_logging = std::env::var("SETTLER_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}

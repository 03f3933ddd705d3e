//! Settlement passes against `SqliteStore` on an in-memory database.

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::Row;
use std::sync::Arc;
use tokio_test::assert_ok;

use settler::engine::orchestrator::SettlementOrchestrator;
use settler::engine::pipeline::{PipelineConfig, SettlementPipeline};
use settler::storage::{SettlementStore, SqliteStore};
use settler::types::{MarketKey, SelectionKey, SelectionResult};

async fn seeded_store() -> Arc<SqliteStore> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let store = SqliteStore::new(pool);
    store.ensure_schema().await.unwrap();
    // Applying the schema twice is harmless.
    store.ensure_schema().await.unwrap();

    let seed = [
        "INSERT INTO nfl_games VALUES \
         (200, 2024, 5, 'REG', 'BUF', 'MIA', 31, 10, 'FINAL'), \
         (201, 2024, 5, 'REG', 'NYJ', 'NE', 13, 13, 'FINAL_OVERTIME')",
        "INSERT INTO player_gamelogs (esbid, pid, tm, ry, ra, rec, recy, tdrec) VALUES \
         (200, 'RB7', 'BUF', 88, 19, 4, 31, 1)",
        "INSERT INTO nfl_plays (esbid, play_id, qtr, play_type, pos_team, def_team, yds_gained, bc_pid) VALUES \
         (200, 1, 1, 'RUSH', 'BUF', 'MIA', 9, 'RB7'), \
         (200, 2, 1, 'RUSH', 'BUF', 'MIA', 23, 'RB7'), \
         (200, 3, 3, 'RUSH', 'BUF', 'MIA', 4, 'RB7')",
        "INSERT INTO prop_markets (source_id, source_market_id, market_type, esbid, year) VALUES \
         ('BOOK', 'rr', 'GAME_RUSHING_RECEIVING_YARDS', 200, 2024), \
         ('BOOK', 'long', 'GAME_LONGEST_RUSH', 200, 2024), \
         ('BOOK', 'q1', 'GAME_FIRST_QUARTER_RUSHING_YARDS', 200, 2024), \
         ('BOOK', 'ml', 'GAME_MONEYLINE', 201, 2024), \
         ('BOOK', 'spread', 'GAME_SPREAD', 200, 2024)",
        "INSERT INTO prop_market_selections VALUES \
         ('BOOK', 'rr', 'o', 'RB7', 118.5, 'OVER', NULL), \
         ('BOOK', 'rr', 'u', 'RB7', 118.5, 'UNDER', NULL), \
         ('BOOK', 'long', 'o', 'RB7', 22.5, 'OVER', NULL), \
         ('BOOK', 'q1', 'u', 'RB7', 32, 'UNDER', NULL), \
         ('BOOK', 'ml', 'nyj', NULL, NULL, 'NYJ', NULL), \
         ('BOOK', 'ml', 'ne', NULL, NULL, 'NE', NULL), \
         ('BOOK', 'spread', 'buf', NULL, -20.5, 'BUF', NULL), \
         ('BOOK', 'spread', 'mia', NULL, 20.5, 'MIA', NULL)",
    ];
    for sql in seed {
        sqlx::query(sql).execute(store.pool()).await.unwrap();
    }
    Arc::new(store)
}

fn pipeline(store: &Arc<SqliteStore>, config: PipelineConfig) -> SettlementPipeline {
    let orchestrator = Arc::new(SettlementOrchestrator::with_default_calculators(store.clone()));
    SettlementPipeline::new(orchestrator, store.clone(), config)
}

async fn market_row(store: &SqliteStore, id: &str) -> (bool, Option<f64>, Option<String>) {
    let row = sqlx::query(
        "SELECT market_settled, metric_result_value, winning_selection_id \
         FROM prop_markets WHERE source_market_id = ?",
    )
    .bind(id)
    .fetch_one(store.pool())
    .await
    .unwrap();
    (
        row.get("market_settled"),
        row.get("metric_result_value"),
        row.get("winning_selection_id"),
    )
}

async fn selection_result(store: &SqliteStore, market: &str, id: &str) -> Option<String> {
    sqlx::query_scalar(
        "SELECT selection_result FROM prop_market_selections \
         WHERE source_market_id = ? AND source_selection_id = ?",
    )
    .bind(market)
    .bind(id)
    .fetch_one(store.pool())
    .await
    .unwrap()
}

#[tokio::test]
async fn test_sqlite_pass_writes_results() {
    let store = seeded_store().await;
    let report = assert_ok!(pipeline(&store, PipelineConfig::new(2024)).run().await);

    assert_eq!(report.games_discovered, 2);
    assert_eq!(report.selections_processed, 8);
    assert_eq!(report.selections_errored, 0);
    assert_eq!(report.markets_settled, 5);

    // 88 rushing + 31 receiving.
    assert_eq!(market_row(&store, "rr").await, (true, Some(119.0), Some("o".into())));
    assert_eq!(selection_result(&store, "rr", "u").await.as_deref(), Some("LOST"));

    assert_eq!(market_row(&store, "long").await, (true, Some(23.0), Some("o".into())));

    // 9 + 23 in the first quarter, exactly on the line: UNDER loses.
    assert_eq!(market_row(&store, "q1").await, (true, Some(32.0), None));
    assert_eq!(selection_result(&store, "q1", "u").await.as_deref(), Some("LOST"));

    // A tie loses both moneyline sides; no single winner.
    assert_eq!(market_row(&store, "ml").await, (true, Some(0.0), None));
    assert_eq!(selection_result(&store, "ml", "ne").await.as_deref(), Some("LOST"));

    // BUF won by 21: -20.5 covers, +20.5 does not.
    // The market records the home margin, not a side's margin.
    assert_eq!(market_row(&store, "spread").await, (true, Some(21.0), Some("buf".into())));
}

#[tokio::test]
async fn test_sqlite_rerun_is_a_no_op() {
    let store = seeded_store().await;
    assert_ok!(pipeline(&store, PipelineConfig::new(2024)).run().await);

    let report = assert_ok!(pipeline(&store, PipelineConfig::new(2024)).run().await);
    assert_eq!(report.games_discovered, 0);

    // Without missing_only the same values are rewritten.
    let mut config = PipelineConfig::new(2024);
    config.missing_only = false;
    let report = assert_ok!(pipeline(&store, config).run().await);
    assert_eq!(report.markets_settled, 5);
    assert_eq!(market_row(&store, "rr").await, (true, Some(119.0), Some("o".into())));
}

#[tokio::test]
async fn test_sqlite_selection_write_is_idempotent() {
    let store = seeded_store().await;
    let key = SelectionKey {
        market: MarketKey::new("BOOK", "rr"),
        source_selection_id: "o".into(),
    };
    for _ in 0..2 {
        assert_ok!(store.update_selection_result(&key, SelectionResult::Won).await);
    }
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM prop_market_selections WHERE source_market_id = 'rr'",
    )
    .fetch_one(store.pool())
    .await
    .unwrap();
    assert_eq!(count, 2);
    assert_eq!(selection_result(&store, "rr", "o").await.as_deref(), Some("WON"));
}

#[tokio::test]
async fn test_sqlite_dry_run_and_health() {
    let store = seeded_store().await;
    let orchestrator = SettlementOrchestrator::with_default_calculators(store.clone());
    let health = orchestrator.health_check(true).await;
    assert_eq!(health.len(), 4);
    assert!(health.iter().all(|h| h.healthy));

    let mut config = PipelineConfig::new(2024);
    config.dry_run = true;
    let report = assert_ok!(pipeline(&store, config).run().await);
    assert_eq!(report.preview.len(), 8 + 5);
    assert_eq!(market_row(&store, "rr").await, (false, None, None));
}

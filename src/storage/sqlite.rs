//! SQLite-backed store.
//!
//! One pool serves both traits. Lines and metric values are stored as
//! REAL and converted to `Decimal` at the boundary. Market type lists use
//! `QueryBuilder` so the `IN (...)` clause binds every value.

use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite};
use std::str::FromStr;
use tracing::{debug, info};

use super::{DiscoveryFilter, GameDataStore, MarketSettlement, SettlementStore};
use crate::types::{
    GameId, GameScore, MarketKey, Play, PlayerGamelog, SeasonType, Selection, SelectionKey,
    SelectionResult, TERMINAL_GAME_STATUSES,
};

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a pool on `url`, creating the database file if needed.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("Invalid database url {url}"))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .context("Failed to open SQLite pool")?;
        info!(max_connections, "Connected to settlement database");
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create every table the settler reads or writes, if absent.
    pub async fn ensure_schema(&self) -> Result<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS prop_markets (
                source_id TEXT NOT NULL,
                source_market_id TEXT NOT NULL,
                market_type TEXT NOT NULL,
                esbid INTEGER,
                year INTEGER NOT NULL,
                market_settled BOOLEAN NOT NULL DEFAULT 0,
                metric_result_value REAL,
                winning_selection_id TEXT,
                PRIMARY KEY (source_id, source_market_id)
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_prop_markets_esbid ON prop_markets(esbid, year)",
            r#"
            CREATE TABLE IF NOT EXISTS prop_market_selections (
                source_id TEXT NOT NULL,
                source_market_id TEXT NOT NULL,
                source_selection_id TEXT NOT NULL,
                selection_pid TEXT,
                selection_metric_line REAL,
                selection_type TEXT NOT NULL,
                selection_result TEXT,
                PRIMARY KEY (source_id, source_market_id, source_selection_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS nfl_games (
                esbid INTEGER PRIMARY KEY,
                year INTEGER NOT NULL,
                week INTEGER NOT NULL,
                seas_type TEXT NOT NULL,
                h TEXT NOT NULL,
                v TEXT NOT NULL,
                home_score INTEGER,
                away_score INTEGER,
                status TEXT
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS player_gamelogs (
                esbid INTEGER NOT NULL,
                pid TEXT NOT NULL,
                tm TEXT NOT NULL,
                py INTEGER NOT NULL DEFAULT 0,
                pa INTEGER NOT NULL DEFAULT 0,
                pc INTEGER NOT NULL DEFAULT 0,
                tdp INTEGER NOT NULL DEFAULT 0,
                ints INTEGER NOT NULL DEFAULT 0,
                ra INTEGER NOT NULL DEFAULT 0,
                ry INTEGER NOT NULL DEFAULT 0,
                tdr INTEGER NOT NULL DEFAULT 0,
                rec INTEGER NOT NULL DEFAULT 0,
                trg INTEGER NOT NULL DEFAULT 0,
                recy INTEGER NOT NULL DEFAULT 0,
                tdrec INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (esbid, pid)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS nfl_plays (
                esbid INTEGER NOT NULL,
                play_id INTEGER NOT NULL,
                qtr INTEGER NOT NULL,
                play_type TEXT NOT NULL,
                pos_team TEXT NOT NULL,
                def_team TEXT NOT NULL,
                yds_gained INTEGER,
                psr_pid TEXT,
                bc_pid TEXT,
                trg_pid TEXT,
                comp BOOLEAN NOT NULL DEFAULT 0,
                sk BOOLEAN NOT NULL DEFAULT 0,
                td BOOLEAN NOT NULL DEFAULT 0,
                td_pid TEXT,
                PRIMARY KEY (esbid, play_id)
            )
            "#,
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("Failed to apply schema")?;
        }
        debug!("Schema ready");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

fn to_decimal(value: Option<f64>) -> Option<Decimal> {
    value.and_then(Decimal::from_f64).map(|d| d.normalize())
}

fn push_ids(builder: &mut QueryBuilder<'_, Sqlite>, esbids: &[GameId]) {
    let mut ids = builder.separated(", ");
    for id in esbids {
        ids.push_bind(*id);
    }
}

fn push_terminal_statuses(builder: &mut QueryBuilder<'_, Sqlite>) {
    builder.push(" IN (");
    {
        let mut statuses = builder.separated(", ");
        for status in TERMINAL_GAME_STATUSES {
            statuses.push_bind(*status);
        }
    }
    builder.push(")");
}

/// `m.year = ? AND m.market_type IN (...)` plus the settled filter.
fn push_market_filter<'a>(builder: &mut QueryBuilder<'a, Sqlite>, filter: &'a DiscoveryFilter) {
    builder.push(" AND m.year = ").push_bind(filter.year);
    if filter.missing_only {
        builder.push(" AND m.market_settled = 0");
    }
    builder.push(" AND m.market_type IN (");
    {
        let mut types = builder.separated(", ");
        for market_type in &filter.market_types {
            types.push_bind(market_type.as_str());
        }
    }
    builder.push(")");
}

fn selection_from_row(row: &SqliteRow) -> Result<Selection> {
    let selection_result = row
        .try_get::<Option<String>, _>("selection_result")?
        .map(|r| r.parse::<SelectionResult>())
        .transpose()
        .context("Invalid stored selection_result")?;
    Ok(Selection {
        key: SelectionKey {
            market: MarketKey::new(
                row.try_get::<String, _>("source_id")?,
                row.try_get::<String, _>("source_market_id")?,
            ),
            source_selection_id: row.try_get("source_selection_id")?,
        },
        market_type: row.try_get("market_type")?,
        esbid: row.try_get("esbid")?,
        year: row.try_get("year")?,
        selection_pid: row.try_get("selection_pid")?,
        selection_metric_line: to_decimal(row.try_get("selection_metric_line")?),
        selection_type: row.try_get("selection_type")?,
        selection_result,
    })
}

// ---------------------------------------------------------------------------
// GameDataStore
// ---------------------------------------------------------------------------

#[async_trait]
impl GameDataStore for SqliteStore {
    async fn player_gamelogs(&self, esbids: &[GameId]) -> Result<Vec<PlayerGamelog>> {
        if esbids.is_empty() {
            return Ok(Vec::new());
        }
        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT esbid, pid, tm, py, pa, pc, tdp, ints, ra, ry, tdr, rec, trg, recy, tdrec \
             FROM player_gamelogs WHERE esbid IN (",
        );
        push_ids(&mut builder, esbids);
        builder.push(")");

        let rows = builder
            .build_query_as::<PlayerGamelog>()
            .fetch_all(&self.pool)
            .await
            .context("Failed to query player_gamelogs")?;
        debug!(games = esbids.len(), rows = rows.len(), "Loaded player gamelogs");
        Ok(rows)
    }

    async fn plays(&self, esbids: &[GameId]) -> Result<Vec<Play>> {
        if esbids.is_empty() {
            return Ok(Vec::new());
        }
        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT esbid, play_id, qtr, play_type, pos_team, def_team, yds_gained, \
             psr_pid, bc_pid, trg_pid, comp, sk, td, td_pid \
             FROM nfl_plays WHERE esbid IN (",
        );
        push_ids(&mut builder, esbids);
        builder.push(") ORDER BY esbid, play_id");

        let rows = builder
            .build_query_as::<Play>()
            .fetch_all(&self.pool)
            .await
            .context("Failed to query nfl_plays")?;
        debug!(games = esbids.len(), rows = rows.len(), "Loaded plays");
        Ok(rows)
    }

    async fn game_scores(&self, esbids: &[GameId]) -> Result<Vec<GameScore>> {
        if esbids.is_empty() {
            return Ok(Vec::new());
        }
        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT esbid, year, week, seas_type, h, v, home_score, away_score, status \
             FROM nfl_games WHERE esbid IN (",
        );
        push_ids(&mut builder, esbids);
        builder.push(")");

        let rows = builder
            .build_query_as::<GameScore>()
            .fetch_all(&self.pool)
            .await
            .context("Failed to query nfl_games")?;
        Ok(rows)
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("SQLite ping failed")?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SettlementStore
// ---------------------------------------------------------------------------

#[async_trait]
impl SettlementStore for SqliteStore {
    async fn discover_game_ids(&self, filter: &DiscoveryFilter) -> Result<Vec<GameId>> {
        if filter.market_types.is_empty() {
            return Ok(Vec::new());
        }
        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT DISTINCT m.esbid FROM prop_markets m \
             JOIN nfl_games g ON g.esbid = m.esbid \
             WHERE m.esbid IS NOT NULL",
        );
        push_market_filter(&mut builder, filter);
        match filter.week {
            Some(week) => {
                builder.push(" AND g.week = ").push_bind(week);
            }
            None => {
                builder.push(" AND g.status");
                push_terminal_statuses(&mut builder);
            }
        }
        if let Some(seas_type) = filter.seas_type {
            builder.push(" AND g.seas_type = ").push_bind(seas_type.as_str());
        }
        builder.push(" ORDER BY m.esbid");

        let ids = builder
            .build_query_scalar::<GameId>()
            .fetch_all(&self.pool)
            .await
            .context("Failed to discover games")?;
        Ok(ids)
    }

    async fn current_week(&self, year: i32, seas_type: Option<SeasonType>) -> Result<Option<i32>> {
        let mut builder =
            QueryBuilder::<Sqlite>::new("SELECT MAX(week) FROM nfl_games WHERE year = ");
        builder.push_bind(year);
        builder.push(" AND status");
        push_terminal_statuses(&mut builder);
        if let Some(seas_type) = seas_type {
            builder.push(" AND seas_type = ").push_bind(seas_type.as_str());
        }

        let week = builder
            .build_query_scalar::<Option<i32>>()
            .fetch_one(&self.pool)
            .await
            .context("Failed to resolve current week")?;
        Ok(week)
    }

    async fn selections_for_game(
        &self,
        esbid: GameId,
        filter: &DiscoveryFilter,
    ) -> Result<Vec<Selection>> {
        if filter.market_types.is_empty() {
            return Ok(Vec::new());
        }
        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT s.source_id, s.source_market_id, s.source_selection_id, \
             m.market_type, m.esbid, m.year, s.selection_pid, s.selection_metric_line, \
             s.selection_type, s.selection_result \
             FROM prop_market_selections s \
             JOIN prop_markets m \
               ON m.source_id = s.source_id AND m.source_market_id = s.source_market_id \
             WHERE m.esbid = ",
        );
        builder.push_bind(esbid);
        push_market_filter(&mut builder, filter);
        builder.push(" ORDER BY s.source_id, s.source_market_id, s.source_selection_id");

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("Failed to load selections for game {esbid}"))?;
        rows.iter().map(selection_from_row).collect()
    }

    async fn update_selection_result(
        &self,
        key: &SelectionKey,
        result: SelectionResult,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE prop_market_selections
            SET selection_result = ?
            WHERE source_id = ? AND source_market_id = ? AND source_selection_id = ?
            "#,
        )
        .bind(result.as_str())
        .bind(&key.market.source_id)
        .bind(&key.market.source_market_id)
        .bind(&key.source_selection_id)
        .execute(&self.pool)
        .await
        .with_context(|| {
            format!("Failed to update selection {}/{}", key.market, key.source_selection_id)
        })?;
        Ok(())
    }

    async fn settle_market(&self, settlement: &MarketSettlement) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE prop_markets
            SET market_settled = 1, metric_result_value = ?, winning_selection_id = ?
            WHERE source_id = ? AND source_market_id = ?
            "#,
        )
        .bind(settlement.metric_result_value.and_then(|v| v.to_f64()))
        .bind(settlement.winning_selection_id.as_deref())
        .bind(&settlement.key.source_id)
        .bind(&settlement.key.source_market_id)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to settle market {}", settlement.key))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

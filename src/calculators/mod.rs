//! Market calculators.
//!
//! Defines the `MarketCalculator` trait and the four calculator families:
//! - Player gamelog — per-player game totals
//! - Play-by-play — player-scoped play aggregates (longest, period splits)
//! - Game result — final box score (totals, moneyline, spread)
//! - Team stats — team-scoped play aggregates
//!
//! Each calculator owns a per-game cache that `prefetch` fills before
//! dispatch begins, so `calculate` normally performs no I/O. Every cached
//! game records whether it had reached a terminal status; selections on a
//! game still in progress fail with `GameNotFinal` in every family.

pub mod cache;
pub mod game_result;
pub mod play_by_play;
pub mod player_gamelog;
pub mod team_stats;
pub mod verdict;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

use crate::engine::router::route;
use crate::error::CalculationError;
use crate::storage::GameDataStore;
use crate::types::{CalculationOutcome, GameId, HandlerKind, MarketType, SelectionInput};

pub use game_result::GameResultCalculator;
pub use play_by_play::PlayByPlayCalculator;
pub use player_gamelog::PlayerGamelogCalculator;
pub use team_stats::TeamStatsCalculator;

/// Cache counters, for observability only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub games_cached: usize,
    pub rows_cached: usize,
    pub hits: u64,
    pub misses: u64,
    pub on_demand_loads: u64,
}

/// One family of market settlement logic over one raw data shape.
#[async_trait]
pub trait MarketCalculator: Send + Sync {
    /// The handler kind this calculator serves.
    fn kind(&self) -> HandlerKind;

    /// Bulk-load and cache data for the given games. Games already cached
    /// are skipped; an empty slice does nothing.
    async fn prefetch(&self, esbids: &[GameId]) -> Result<()>;

    /// Compute the metric value and verdict for one selection. Loads the
    /// game on demand if it was not prefetched.
    async fn calculate(&self, input: &SelectionInput) -> CalculationOutcome;

    /// Prove the underlying data source is reachable.
    async fn health_check(&self) -> Result<()>;

    fn cache_stats(&self) -> CacheStats;

    fn clear_cache(&self);
}

/// One game's cached rows and whether the game was over when loaded.
#[derive(Debug, Clone, Default)]
pub struct GameRows<T> {
    pub is_final: bool,
    pub rows: T,
}

impl<T> GameRows<T> {
    /// Refuse to settle from a game that has not finished.
    pub fn require_final(self: Arc<Self>, esbid: GameId) -> Result<Arc<Self>, CalculationError> {
        if self.is_final {
            Ok(self)
        } else {
            Err(CalculationError::GameNotFinal(esbid))
        }
    }
}

/// Ids among `esbids` whose game has a terminal status. Games without a
/// score row are not final.
pub(crate) async fn final_game_ids(
    store: &dyn GameDataStore,
    esbids: &[GameId],
) -> Result<HashSet<GameId>> {
    let games = store
        .game_scores(esbids)
        .await
        .context("Failed to load game statuses")?;
    Ok(games
        .iter()
        .filter(|g| g.is_final())
        .map(|g| g.esbid)
        .collect())
}

/// Parse the input's market type and confirm it belongs to `kind`.
pub(crate) fn market_type_for(
    input: &SelectionInput,
    kind: HandlerKind,
) -> Result<MarketType, CalculationError> {
    let handler = route(&input.market_type);
    if !handler.is_supported() {
        return Err(CalculationError::UnsupportedMarketType(input.market_type.clone()));
    }
    if handler != kind {
        return Err(CalculationError::WrongHandler {
            market_type: input.market_type.clone(),
            handler: kind,
        });
    }
    input
        .market_type
        .parse()
        .map_err(|_| CalculationError::UnsupportedMarketType(input.market_type.clone()))
}

/// The selection's player (or team) id, required by player/team markets.
pub(crate) fn require_pid(
    input: &SelectionInput,
    market_type: MarketType,
) -> Result<String, CalculationError> {
    input
        .selection_pid
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .ok_or_else(|| CalculationError::MissingSelectionPid(market_type.to_string()))
}

/// Score row for tests and fixtures: KC hosting ATL in week 3 of 2024.
#[cfg(test)]
pub(crate) fn final_game(esbid: GameId) -> crate::types::GameScore {
    crate::types::GameScore {
        esbid,
        year: 2024,
        week: 3,
        seas_type: "REG".into(),
        h: "KC".into(),
        v: "ATL".into(),
        home_score: Some(27),
        away_score: Some(24),
        status: Some("FINAL".into()),
    }
}

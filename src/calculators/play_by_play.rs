//! Play-by-play calculator.
//!
//! Settles player markets that need play-level aggregation: longest plays,
//! period-scoped yardage and the first touchdown scorer. Each market is
//! described by the player's role on the play, a quarter window, and a
//! reducer (max or sum of `yds_gained`).

use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::cache::GameCache;
use super::verdict::{evaluate_binary, evaluate_over_under, parse_selection_type};
use super::{final_game_ids, market_type_for, require_pid, CacheStats, GameRows, MarketCalculator};
use crate::error::CalculationError;
use crate::storage::GameDataStore;
use crate::types::{
    CalculationOutcome, CalculationResult, GameId, HandlerKind, MarketType, Play, SelectionInput,
};

// ---------------------------------------------------------------------------
// Market shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Threw a completed pass.
    Passer,
    /// Carried the ball on a rush.
    Rusher,
    /// Caught a completed pass.
    Receiver,
}

impl Role {
    fn matches(&self, play: &Play, pid: &str) -> bool {
        match self {
            Role::Passer => {
                play.is_pass() && play.comp && !play.sk && play.psr_pid.as_deref() == Some(pid)
            }
            Role::Rusher => play.is_rush() && play.bc_pid.as_deref() == Some(pid),
            Role::Receiver => {
                play.is_pass() && play.comp && play.trg_pid.as_deref() == Some(pid)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    Game,
    FirstQuarter,
    FirstHalf,
}

impl Window {
    fn contains(&self, qtr: i32) -> bool {
        match self {
            Window::Game => true,
            Window::FirstQuarter => qtr == 1,
            Window::FirstHalf => qtr == 1 || qtr == 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduce {
    Longest,
    Total,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaySpec {
    pub role: Role,
    pub window: Window,
    pub reduce: Reduce,
}

/// How a line market is read from plays. `None` for the binary
/// first-touchdown market and for types this calculator does not own.
pub fn play_spec(market_type: MarketType) -> Option<PlaySpec> {
    use MarketType::*;

    let (role, window, reduce) = match market_type {
        GameLongestReception => (Role::Receiver, Window::Game, Reduce::Longest),
        GameLongestRush => (Role::Rusher, Window::Game, Reduce::Longest),
        GameLongestCompletion => (Role::Passer, Window::Game, Reduce::Longest),
        GameFirstQuarterPassingYards => (Role::Passer, Window::FirstQuarter, Reduce::Total),
        GameFirstQuarterRushingYards => (Role::Rusher, Window::FirstQuarter, Reduce::Total),
        GameFirstQuarterReceivingYards => (Role::Receiver, Window::FirstQuarter, Reduce::Total),
        GameFirstHalfPassingYards => (Role::Passer, Window::FirstHalf, Reduce::Total),
        GameFirstHalfRushingYards => (Role::Rusher, Window::FirstHalf, Reduce::Total),
        GameFirstHalfReceivingYards => (Role::Receiver, Window::FirstHalf, Reduce::Total),
        _ => return None,
    };
    Some(PlaySpec { role, window, reduce })
}

/// Reduce the player's plays for a market. A player with no qualifying
/// plays in the window reads as zero.
pub fn player_metric(spec: PlaySpec, plays: &[Play], pid: &str) -> Decimal {
    let yards = plays
        .iter()
        .filter(|p| spec.window.contains(p.qtr) && spec.role.matches(p, pid))
        .map(Play::yards);

    let value = match spec.reduce {
        Reduce::Longest => yards.max().unwrap_or(0),
        Reduce::Total => yards.sum::<i32>(),
    };
    Decimal::from(value)
}

/// Scorer of the earliest touchdown in the game. Plays must be sorted by
/// `play_id`.
pub fn first_touchdown_scorer(plays: &[Play]) -> Option<&str> {
    plays
        .iter()
        .find(|p| p.td && p.td_pid.is_some())
        .and_then(|p| p.td_pid.as_deref())
}

fn involves(play: &Play, pid: &str) -> bool {
    [&play.psr_pid, &play.bc_pid, &play.trg_pid, &play.td_pid]
        .iter()
        .any(|id| id.as_deref() == Some(pid))
}

// ---------------------------------------------------------------------------
// Calculator
// ---------------------------------------------------------------------------

pub struct PlayByPlayCalculator {
    store: Arc<dyn GameDataStore>,
    cache: GameCache<GameRows<Vec<Play>>>,
}

impl PlayByPlayCalculator {
    pub fn new(store: Arc<dyn GameDataStore>) -> Self {
        Self {
            store,
            cache: GameCache::new(),
        }
    }

    async fn load(&self, esbids: &[GameId]) -> Result<()> {
        let rows = self
            .store
            .plays(esbids)
            .await
            .context("Failed to load plays")?;
        let finished = final_game_ids(self.store.as_ref(), esbids).await?;
        for (esbid, plays) in group_plays(esbids, rows) {
            let is_final = finished.contains(&esbid);
            self.cache.insert(esbid, GameRows { is_final, rows: plays });
        }
        Ok(())
    }

    async fn game(&self, esbid: GameId) -> Result<Arc<GameRows<Vec<Play>>>, CalculationError> {
        let ids = [esbid];
        let load = async {
            debug!(esbid, "Play cache miss, loading on demand");
            self.load(&ids).await
        };
        self.cache
            .get_or_load(esbid, load)
            .await
            .map_err(CalculationError::data_source)?
            .require_final(esbid)
    }
}

/// Bucket plays by game (one bucket per requested id) sorted by play order.
pub(crate) fn group_plays(esbids: &[GameId], rows: Vec<Play>) -> HashMap<GameId, Vec<Play>> {
    let mut by_game: HashMap<GameId, Vec<Play>> =
        esbids.iter().map(|id| (*id, Vec::new())).collect();
    for play in rows {
        by_game.entry(play.esbid).or_default().push(play);
    }
    for plays in by_game.values_mut() {
        plays.sort_by_key(|p| p.play_id);
    }
    by_game
}

#[async_trait]
impl MarketCalculator for PlayByPlayCalculator {
    fn kind(&self) -> HandlerKind {
        HandlerKind::PlayByPlay
    }

    async fn prefetch(&self, esbids: &[GameId]) -> Result<()> {
        let missing = self.cache.missing(esbids);
        if missing.is_empty() {
            return Ok(());
        }
        self.load(&missing).await?;
        debug!(games = missing.len(), "Prefetched plays");
        Ok(())
    }

    async fn calculate(&self, input: &SelectionInput) -> CalculationOutcome {
        let market_type = market_type_for(input, self.kind())?;
        let pid = require_pid(input, market_type)?;
        let selection_type = parse_selection_type(market_type, &input.selection_type)?;

        let game = self.game(input.esbid).await?;
        let plays = &game.rows;
        if plays.is_empty() {
            return Err(CalculationError::MissingPlays(input.esbid));
        }
        if !plays.iter().any(|p| involves(p, &pid)) {
            return Err(CalculationError::NoPlaysForPlayer {
                esbid: input.esbid,
                pid,
            });
        }

        let (metric_value, selection_result) = match play_spec(market_type) {
            Some(spec) => {
                let metric = player_metric(spec, plays, &pid);
                let result = evaluate_over_under(
                    market_type,
                    metric,
                    input.selection_metric_line,
                    &selection_type,
                )?;
                (metric, result)
            }
            None => {
                let scored_first = first_touchdown_scorer(plays) == Some(pid.as_str());
                let metric = Decimal::from(i32::from(scored_first));
                (metric, evaluate_binary(market_type, metric, &selection_type)?)
            }
        };

        Ok(CalculationResult {
            esbid: input.esbid,
            market_type,
            selection_pid: Some(pid),
            metric_value,
            market_metric_value: metric_value,
            selection_result,
            handler_type: self.kind(),
        })
    }

    async fn health_check(&self) -> Result<()> {
        self.store.ping().await.context("Play store unreachable")
    }

    fn cache_stats(&self) -> CacheStats {
        self.cache.stats(|game| game.rows.len())
    }

    fn clear_cache(&self) {
        self.cache.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Player gamelog calculator.
//!
//! Settles markets that read straight off one player's game totals:
//! single-column yardage/count lines, two-column combined lines, and the
//! binary anytime-touchdown market.

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
    CalculationOutcome, CalculationResult, GameId, HandlerKind, MarketType, PlayerGamelog,
    SelectionInput,
};

/// Gamelogs of one game, keyed by player id.
type GameGamelogs = HashMap<String, PlayerGamelog>;

pub struct PlayerGamelogCalculator {
    store: Arc<dyn GameDataStore>,
    cache: GameCache<GameRows<GameGamelogs>>,
}

impl PlayerGamelogCalculator {
    pub fn new(store: Arc<dyn GameDataStore>) -> Self {
        Self {
            store,
            cache: GameCache::new(),
        }
    }

    /// Load gamelogs for `esbids` and cache one entry per requested game,
    /// including games with no rows.
    async fn load(&self, esbids: &[GameId]) -> Result<()> {
        let rows = self
            .store
            .player_gamelogs(esbids)
            .await
            .context("Failed to load player gamelogs")?;
        let finished = final_game_ids(self.store.as_ref(), esbids).await?;

        let mut by_game: HashMap<GameId, GameGamelogs> =
            esbids.iter().map(|id| (*id, HashMap::new())).collect();
        for row in rows {
            by_game.entry(row.esbid).or_default().insert(row.pid.clone(), row);
        }
        for (esbid, logs) in by_game {
            let is_final = finished.contains(&esbid);
            self.cache.insert(esbid, GameRows { is_final, rows: logs });
        }
        Ok(())
    }

    async fn game(&self, esbid: GameId) -> Result<Arc<GameRows<GameGamelogs>>, CalculationError> {
        let ids = [esbid];
        let load = async {
            debug!(esbid, "Gamelog cache miss, loading on demand");
            self.load(&ids).await
        };
        self.cache
            .get_or_load(esbid, load)
            .await
            .map_err(CalculationError::data_source)?
            .require_final(esbid)
    }
}

/// The metric a gamelog market settles on.
pub fn gamelog_metric(market_type: MarketType, log: &PlayerGamelog) -> Option<Decimal> {
    use MarketType::*;

    let value = match market_type {
        GamePassingYards => log.py,
        GamePassingCompletions => log.pc,
        GamePassingAttempts => log.pa,
        GamePassingTouchdowns => log.tdp,
        GamePassingInterceptions => log.ints,
        GameRushingYards => log.ry,
        GameRushingAttempts => log.ra,
        GameRushingTouchdowns => log.tdr,
        GameReceivingYards => log.recy,
        GameReceptions => log.rec,
        GameTargets => log.trg,
        GameReceivingTouchdowns => log.tdrec,
        GameRushingReceivingYards => log.ry + log.recy,
        GamePassingRushingYards => log.py + log.ry,
        AnytimeTouchdown => i32::from(log.tdr > 0 || log.tdrec > 0),
        _ => return None,
    };
    Some(Decimal::from(value))
}

#[async_trait]
impl MarketCalculator for PlayerGamelogCalculator {
    fn kind(&self) -> HandlerKind {
        HandlerKind::PlayerGamelog
    }

    async fn prefetch(&self, esbids: &[GameId]) -> Result<()> {
        let missing = self.cache.missing(esbids);
        if missing.is_empty() {
            return Ok(());
        }
        self.load(&missing).await?;
        debug!(games = missing.len(), "Prefetched player gamelogs");
        Ok(())
    }

    async fn calculate(&self, input: &SelectionInput) -> CalculationOutcome {
        let market_type = market_type_for(input, self.kind())?;
        let pid = require_pid(input, market_type)?;
        let selection_type = parse_selection_type(market_type, &input.selection_type)?;

        let game = self.game(input.esbid).await?;
        let log = game.rows.get(&pid).ok_or_else(|| CalculationError::MissingGamelog {
            esbid: input.esbid,
            pid: pid.clone(),
        })?;

        let metric_value = gamelog_metric(market_type, log).ok_or_else(|| {
            CalculationError::WrongHandler {
                market_type: input.market_type.clone(),
                handler: self.kind(),
            }
        })?;

        let selection_result = if market_type == MarketType::AnytimeTouchdown {
            evaluate_binary(market_type, metric_value, &selection_type)?
        } else {
            evaluate_over_under(
                market_type,
                metric_value,
                input.selection_metric_line,
                &selection_type,
            )?
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
        self.store.ping().await.context("Gamelog store unreachable")
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

//! Game result calculator.
//!
//! Settles markets with no player dimension from the final box score:
//! game totals, moneyline, spread, and a single team's points.
//!
//! Moneyline and spread selections carry the team code in
//! `selection_type`; their metric is that team's margin. A tied game loses
//! for both moneyline sides and a spread push loses.

use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::cache::GameCache;
use super::verdict::{evaluate_over_under, parse_selection_type};
use super::{market_type_for, require_pid, CacheStats, MarketCalculator};
use crate::error::CalculationError;
use crate::storage::GameDataStore;
use crate::types::{
    CalculationOutcome, CalculationResult, GameId, GameScore, HandlerKind, MarketType,
    SelectionInput, SelectionResult, SelectionType,
};

pub struct GameResultCalculator {
    store: Arc<dyn GameDataStore>,
    /// `None` marks a game that was looked up but has no score row.
    cache: GameCache<Option<GameScore>>,
}

impl GameResultCalculator {
    pub fn new(store: Arc<dyn GameDataStore>) -> Self {
        Self {
            store,
            cache: GameCache::new(),
        }
    }

    async fn load(&self, esbids: &[GameId]) -> Result<()> {
        let rows = self
            .store
            .game_scores(esbids)
            .await
            .context("Failed to load game scores")?;

        let mut by_game: HashMap<GameId, Option<GameScore>> =
            esbids.iter().map(|id| (*id, None)).collect();
        for row in rows {
            by_game.insert(row.esbid, Some(row));
        }
        for (esbid, score) in by_game {
            self.cache.insert(esbid, score);
        }
        Ok(())
    }

    async fn game(&self, esbid: GameId) -> Result<GameScore, CalculationError> {
        let ids = [esbid];
        let load = async {
            debug!(esbid, "Score cache miss, loading on demand");
            self.load(&ids).await
        };
        let cached = self
            .cache
            .get_or_load(esbid, load)
            .await
            .map_err(CalculationError::data_source)?;

        let game = (*cached)
            .clone()
            .ok_or(CalculationError::MissingGameScore(esbid))?;
        if game.home_score.is_none() || game.away_score.is_none() {
            return Err(CalculationError::MissingGameScore(esbid));
        }
        if !game.is_final() {
            return Err(CalculationError::GameNotFinal(esbid));
        }
        Ok(game)
    }
}

/// The named team's `(score, opponent score)`.
fn team_scores(game: &GameScore, team: &str) -> Result<(i32, i32), CalculationError> {
    game.scores_for(team)
        .ok_or_else(|| CalculationError::TeamNotInGame {
            esbid: game.esbid,
            team: team.to_string(),
        })
}

/// Home score minus away score.
fn home_margin(game: &GameScore) -> Decimal {
    Decimal::from(game.home_score.unwrap_or_default() - game.away_score.unwrap_or_default())
}

fn team_side<'a>(
    market_type: MarketType,
    selection_type: &'a SelectionType,
) -> Result<&'a str, CalculationError> {
    selection_type
        .team()
        .ok_or_else(|| CalculationError::InvalidSelectionType {
            market_type: market_type.to_string(),
            selection_type: selection_type.to_string(),
        })
}

#[async_trait]
impl MarketCalculator for GameResultCalculator {
    fn kind(&self) -> HandlerKind {
        HandlerKind::GameResult
    }

    async fn prefetch(&self, esbids: &[GameId]) -> Result<()> {
        let missing = self.cache.missing(esbids);
        if missing.is_empty() {
            return Ok(());
        }
        self.load(&missing).await?;
        debug!(games = missing.len(), "Prefetched game scores");
        Ok(())
    }

    async fn calculate(&self, input: &SelectionInput) -> CalculationOutcome {
        let market_type = market_type_for(input, self.kind())?;
        let selection_type = parse_selection_type(market_type, &input.selection_type)?;
        let game = self.game(input.esbid).await?;

        let (metric_value, selection_result, selection_pid) = match market_type {
            MarketType::GameTotal => {
                let home = game.home_score.unwrap_or_default();
                let away = game.away_score.unwrap_or_default();
                let metric = Decimal::from(home + away);
                let result = evaluate_over_under(
                    market_type,
                    metric,
                    input.selection_metric_line,
                    &selection_type,
                )?;
                (metric, result, input.selection_pid.clone())
            }
            MarketType::GameMoneyline => {
                let team = team_side(market_type, &selection_type)?;
                let (ours, theirs) = team_scores(&game, team)?;
                let margin = Decimal::from(ours - theirs);
                let result = SelectionResult::from_bool(margin > Decimal::ZERO);
                (margin, result, input.selection_pid.clone())
            }
            MarketType::GameSpread => {
                let team = team_side(market_type, &selection_type)?;
                let line = input
                    .selection_metric_line
                    .ok_or_else(|| CalculationError::MissingLine(market_type.to_string()))?;
                let (ours, theirs) = team_scores(&game, team)?;
                let margin = Decimal::from(ours - theirs);
                let result = SelectionResult::from_bool(margin + line > Decimal::ZERO);
                (margin, result, input.selection_pid.clone())
            }
            MarketType::GameTeamTotalPoints => {
                let team = require_pid(input, market_type)?.to_uppercase();
                let (ours, _) = team_scores(&game, &team)?;
                let metric = Decimal::from(ours);
                let result = evaluate_over_under(
                    market_type,
                    metric,
                    input.selection_metric_line,
                    &selection_type,
                )?;
                (metric, result, Some(team))
            }
            _ => {
                return Err(CalculationError::WrongHandler {
                    market_type: input.market_type.clone(),
                    handler: self.kind(),
                })
            }
        };

        let market_metric_value = match market_type {
            MarketType::GameMoneyline | MarketType::GameSpread => home_margin(&game),
            _ => metric_value,
        };

        Ok(CalculationResult {
            esbid: input.esbid,
            market_type,
            selection_pid,
            metric_value,
            market_metric_value,
            selection_result,
            handler_type: self.kind(),
        })
    }

    async fn health_check(&self) -> Result<()> {
        self.store.ping().await.context("Score store unreachable")
    }

    fn cache_stats(&self) -> CacheStats {
        self.cache.stats(|score| usize::from(score.is_some()))
    }

    fn clear_cache(&self) {
        self.cache.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

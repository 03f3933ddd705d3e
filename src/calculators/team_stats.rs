//! Team stat calculator.
//!
//! Aggregates a team's plays for one game. `selection_pid` carries the team
//! code. Offensive markets read plays where the team had possession;
//! sacks are credited to the defense.

use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::debug;

use super::cache::GameCache;
use super::play_by_play::group_plays;
use super::verdict::{evaluate_over_under, parse_selection_type};
use super::{final_game_ids, market_type_for, require_pid, CacheStats, GameRows, MarketCalculator};
use crate::error::CalculationError;
use crate::storage::GameDataStore;
use crate::types::{
    CalculationOutcome, CalculationResult, GameId, HandlerKind, MarketType, Play, SelectionInput,
};

/// The team aggregate a market settles on.
pub fn team_metric(market_type: MarketType, plays: &[Play], team: &str) -> Option<Decimal> {
    let on_offense = |p: &&Play| p.pos_team.eq_ignore_ascii_case(team);

    let value: i32 = match market_type {
        MarketType::GameTeamRushingYards => plays
            .iter()
            .filter(on_offense)
            .filter(|p| p.is_rush())
            .map(Play::yards)
            .sum(),
        MarketType::GameTeamPassingYards => plays
            .iter()
            .filter(on_offense)
            .filter(|p| p.is_pass() && p.comp && !p.sk)
            .map(Play::yards)
            .sum(),
        MarketType::GameTeamSacks => plays
            .iter()
            .filter(|p| p.sk && p.def_team.eq_ignore_ascii_case(team))
            .count() as i32,
        _ => return None,
    };
    Some(Decimal::from(value))
}

pub struct TeamStatsCalculator {
    store: Arc<dyn GameDataStore>,
    cache: GameCache<GameRows<Vec<Play>>>,
}

impl TeamStatsCalculator {
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
            .context("Failed to load team plays")?;
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
            debug!(esbid, "Team play cache miss, loading on demand");
            self.load(&ids).await
        };
        self.cache
            .get_or_load(esbid, load)
            .await
            .map_err(CalculationError::data_source)?
            .require_final(esbid)
    }
}

#[async_trait]
impl MarketCalculator for TeamStatsCalculator {
    fn kind(&self) -> HandlerKind {
        HandlerKind::TeamStats
    }

    async fn prefetch(&self, esbids: &[GameId]) -> Result<()> {
        let missing = self.cache.missing(esbids);
        if missing.is_empty() {
            return Ok(());
        }
        self.load(&missing).await?;
        debug!(games = missing.len(), "Prefetched team plays");
        Ok(())
    }

    async fn calculate(&self, input: &SelectionInput) -> CalculationOutcome {
        let market_type = market_type_for(input, self.kind())?;
        let team = require_pid(input, market_type)?.to_uppercase();
        let selection_type = parse_selection_type(market_type, &input.selection_type)?;

        let game = self.game(input.esbid).await?;
        let plays = &game.rows;
        if plays.is_empty() {
            return Err(CalculationError::MissingPlays(input.esbid));
        }
        let played = plays.iter().any(|p| {
            p.pos_team.eq_ignore_ascii_case(&team) || p.def_team.eq_ignore_ascii_case(&team)
        });
        if !played {
            return Err(CalculationError::TeamNotInGame {
                esbid: input.esbid,
                team,
            });
        }

        let metric_value = team_metric(market_type, plays, &team).ok_or_else(|| {
            CalculationError::WrongHandler {
                market_type: input.market_type.clone(),
                handler: self.kind(),
            }
        })?;
        let selection_result = evaluate_over_under(
            market_type,
            metric_value,
            input.selection_metric_line,
            &selection_type,
        )?;

        Ok(CalculationResult {
            esbid: input.esbid,
            market_type,
            selection_pid: Some(team),
            metric_value,
            market_metric_value: metric_value,
            selection_result,
            handler_type: self.kind(),
        })
    }

    async fn health_check(&self) -> Result<()> {
        self.store.ping().await.context("Team play store unreachable")
    }

    fn cache_stats(&self) -> CacheStats {
        self.cache.stats(|game| game.rows.len())
    }

    fn clear_cache(&self) {
        self.cache.clear();
    }
}

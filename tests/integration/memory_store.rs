//! In-memory store for integration testing.
//!
//! Implements both store traits over plain vectors so a full settlement
//! pass can run with no database. Reads and writes are counted, and
//! fetches or writes can be forced to fail.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use settler::storage::{DiscoveryFilter, GameDataStore, MarketSettlement, SettlementStore};
use settler::types::*;

#[derive(Default)]
pub struct MemoryStore {
    games: Mutex<Vec<GameScore>>,
    gamelogs: Mutex<Vec<PlayerGamelog>>,
    plays: Mutex<Vec<Play>>,
    markets: Mutex<Vec<Market>>,
    selections: Mutex<Vec<Selection>>,
    /// Games whose selection fetch fails.
    fail_fetch_for: Mutex<HashSet<GameId>>,
    /// If set, every write fails with this message.
    fail_writes: Mutex<Option<String>>,
    pub data_reads: AtomicUsize,
    pub writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // -- Seeding ---------------------------------------------------------

    pub fn add_game(&self, game: GameScore) {
        self.games.lock().unwrap().push(game);
    }

    pub fn add_gamelog(&self, log: PlayerGamelog) {
        self.gamelogs.lock().unwrap().push(log);
    }

    pub fn add_plays(&self, plays: Vec<Play>) {
        self.plays.lock().unwrap().extend(plays);
    }

    pub fn add_market(&self, market_id: &str, market_type: &str, esbid: GameId, year: i32) {
        self.markets.lock().unwrap().push(Market {
            key: MarketKey::new("TEST", market_id),
            market_type: market_type.to_string(),
            esbid: Some(esbid),
            year,
            market_settled: false,
            metric_result_value: None,
            winning_selection_id: None,
        });
    }

    /// Add a selection to an existing market, copying its market fields.
    pub fn add_selection(
        &self,
        market_id: &str,
        selection_id: &str,
        pid: Option<&str>,
        line: Option<Decimal>,
        selection_type: &str,
    ) {
        let market = self
            .market(market_id)
            .unwrap_or_else(|| panic!("unknown market {market_id}"));
        self.selections.lock().unwrap().push(Selection {
            key: SelectionKey {
                market: market.key.clone(),
                source_selection_id: selection_id.to_string(),
            },
            market_type: market.market_type.clone(),
            esbid: market.esbid.unwrap_or_default(),
            year: market.year,
            selection_pid: pid.map(String::from),
            selection_metric_line: line,
            selection_type: selection_type.to_string(),
            selection_result: None,
        });
    }

    pub fn set_status(&self, esbid: GameId, status: &str) {
        for game in self.games.lock().unwrap().iter_mut() {
            if game.esbid == esbid {
                game.status = Some(status.to_string());
            }
        }
    }

    pub fn fail_fetch_for(&self, esbid: GameId) {
        self.fail_fetch_for.lock().unwrap().insert(esbid);
    }

    pub fn set_write_error(&self, msg: Option<&str>) {
        *self.fail_writes.lock().unwrap() = msg.map(String::from);
    }

    // -- Inspection ------------------------------------------------------

    pub fn market(&self, market_id: &str) -> Option<Market> {
        self.markets
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.key.source_market_id == market_id)
            .cloned()
    }

    pub fn selection_result(&self, market_id: &str, selection_id: &str) -> Option<SelectionResult> {
        self.selections
            .lock()
            .unwrap()
            .iter()
            .find(|s| {
                s.key.market.source_market_id == market_id && s.key.source_selection_id == selection_id
            })
            .and_then(|s| s.selection_result)
    }

    fn market_matches(market: &Market, filter: &DiscoveryFilter) -> bool {
        market.esbid.is_some()
            && market.year == filter.year
            && !(filter.missing_only && market.market_settled)
            && filter.market_types.iter().any(|t| *t == market.market_type)
    }

    fn game_matches(game: &GameScore, filter: &DiscoveryFilter) -> bool {
        let scoped = match filter.week {
            Some(week) => game.week == week,
            None => game.is_final(),
        };
        let season = filter
            .seas_type
            .map_or(true, |s| game.seas_type == s.as_str());
        scoped && season
    }

    fn check_writes(&self) -> Result<()> {
        if let Some(msg) = self.fail_writes.lock().unwrap().as_ref() {
            return Err(anyhow!("{msg}"));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl GameDataStore for MemoryStore {
    async fn player_gamelogs(&self, esbids: &[GameId]) -> Result<Vec<PlayerGamelog>> {
        self.data_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .gamelogs
            .lock()
            .unwrap()
            .iter()
            .filter(|g| esbids.contains(&g.esbid))
            .cloned()
            .collect())
    }

    async fn plays(&self, esbids: &[GameId]) -> Result<Vec<Play>> {
        self.data_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .plays
            .lock()
            .unwrap()
            .iter()
            .filter(|p| esbids.contains(&p.esbid))
            .cloned()
            .collect())
    }

    async fn game_scores(&self, esbids: &[GameId]) -> Result<Vec<GameScore>> {
        self.data_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .games
            .lock()
            .unwrap()
            .iter()
            .filter(|g| esbids.contains(&g.esbid))
            .cloned()
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl SettlementStore for MemoryStore {
    async fn discover_game_ids(&self, filter: &DiscoveryFilter) -> Result<Vec<GameId>> {
        let games = self.games.lock().unwrap();
        let mut ids: Vec<GameId> = self
            .markets
            .lock()
            .unwrap()
            .iter()
            .filter(|m| Self::market_matches(m, filter))
            .filter_map(|m| m.esbid)
            .filter(|esbid| {
                games
                    .iter()
                    .any(|g| g.esbid == *esbid && Self::game_matches(g, filter))
            })
            .collect();
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    async fn current_week(&self, year: i32, seas_type: Option<SeasonType>) -> Result<Option<i32>> {
        Ok(self
            .games
            .lock()
            .unwrap()
            .iter()
            .filter(|g| g.year == year && g.is_final())
            .filter(|g| seas_type.map_or(true, |s| g.seas_type == s.as_str()))
            .map(|g| g.week)
            .max())
    }

    async fn selections_for_game(
        &self,
        esbid: GameId,
        filter: &DiscoveryFilter,
    ) -> Result<Vec<Selection>> {
        if self.fail_fetch_for.lock().unwrap().contains(&esbid) {
            return Err(anyhow!("selection fetch failed for game {esbid}"));
        }
        let eligible: HashSet<MarketKey> = self
            .markets
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.esbid == Some(esbid) && Self::market_matches(m, filter))
            .map(|m| m.key.clone())
            .collect();

        let mut selections: Vec<Selection> = self
            .selections
            .lock()
            .unwrap()
            .iter()
            .filter(|s| eligible.contains(&s.key.market))
            .cloned()
            .collect();
        selections.sort_by(|a, b| {
            (&a.key.market, &a.key.source_selection_id).cmp(&(&b.key.market, &b.key.source_selection_id))
        });
        Ok(selections)
    }

    async fn update_selection_result(
        &self,
        key: &SelectionKey,
        result: SelectionResult,
    ) -> Result<()> {
        self.check_writes()?;
        for selection in self.selections.lock().unwrap().iter_mut() {
            if selection.key == *key {
                selection.selection_result = Some(result);
            }
        }
        Ok(())
    }

    async fn settle_market(&self, settlement: &MarketSettlement) -> Result<()> {
        self.check_writes()?;
        for market in self.markets.lock().unwrap().iter_mut() {
            if market.key == settlement.key {
                market.market_settled = true;
                market.metric_result_value = settlement.metric_result_value;
                market.winning_selection_id = settlement.winning_selection_id.clone();
            }
        }
        Ok(())
    }
}

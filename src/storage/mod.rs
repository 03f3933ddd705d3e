//! Persistence boundary.
//!
//! Defines the two store traits the settlement core talks to:
//! - `GameDataStore` — read-only game data in three shapes (player
//!   gamelogs, play-by-play rows, final scores)
//! - `SettlementStore` — market/selection discovery and the two write-backs
//!   the core is allowed to make
//!
//! `SqliteStore` implements both against a single SQLite database.

pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{
    GameId, GameScore, MarketKey, Play, PlayerGamelog, SeasonType, Selection, SelectionKey,
    SelectionResult,
};

pub use sqlite::SqliteStore;

// ---------------------------------------------------------------------------
// Query & update records
// ---------------------------------------------------------------------------

/// Which markets and games a settlement pass looks at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryFilter {
    pub year: i32,
    /// Restrict to games in this week. Without a week, only games with a
    /// terminal status are eligible.
    pub week: Option<i32>,
    pub seas_type: Option<SeasonType>,
    /// Skip markets that are already settled.
    pub missing_only: bool,
    /// Stored market type identifiers to include.
    pub market_types: Vec<String>,
}

/// The market-level write-back: marks a market settled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSettlement {
    pub key: MarketKey,
    pub metric_result_value: Option<Decimal>,
    pub winning_selection_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Read-only access to authoritative game data.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GameDataStore: Send + Sync {
    /// Every player gamelog row for the given games.
    async fn player_gamelogs(&self, esbids: &[GameId]) -> Result<Vec<PlayerGamelog>>;

    /// Every play for the given games.
    async fn plays(&self, esbids: &[GameId]) -> Result<Vec<Play>>;

    /// Score rows for the given games (games without a row are omitted).
    async fn game_scores(&self, esbids: &[GameId]) -> Result<Vec<GameScore>>;

    /// Trivial round-trip to prove the store is reachable.
    async fn ping(&self) -> Result<()>;
}

/// Market/selection reads and settlement writes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SettlementStore: Send + Sync {
    /// Distinct game ids that have eligible markets, ascending.
    async fn discover_game_ids(&self, filter: &DiscoveryFilter) -> Result<Vec<GameId>>;

    /// Highest week of `year` with a completed game.
    async fn current_week(&self, year: i32, seas_type: Option<SeasonType>) -> Result<Option<i32>>;

    /// Selections of every eligible market for one game, joined with their
    /// market fields.
    async fn selections_for_game(
        &self,
        esbid: GameId,
        filter: &DiscoveryFilter,
    ) -> Result<Vec<Selection>>;

    /// Write `selection_result` for one selection.
    async fn update_selection_result(
        &self,
        key: &SelectionKey,
        result: SelectionResult,
    ) -> Result<()>;

    /// Set `market_settled = true` along with the computed market fields.
    async fn settle_market(&self, settlement: &MarketSettlement) -> Result<()>;
}

//! Shared types for the settlement engine.
//!
//! These types form the data model used across all modules: market and
//! selection identities, the calculation input/output records, and the
//! raw game data rows the calculators read.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a single game (`esbid`).
pub type GameId = i64;

// ---------------------------------------------------------------------------
// Market types
// ---------------------------------------------------------------------------

/// Every market type the engine knows about.
///
/// Knowing a type does not mean it can be settled; see
/// [`crate::engine::router::route`] for the handler mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketType {
    // Player gamelog
    GamePassingYards,
    GamePassingCompletions,
    GamePassingAttempts,
    GamePassingTouchdowns,
    GamePassingInterceptions,
    GameRushingYards,
    GameRushingAttempts,
    GameRushingTouchdowns,
    GameReceivingYards,
    GameReceptions,
    GameTargets,
    GameReceivingTouchdowns,
    GameRushingReceivingYards,
    GamePassingRushingYards,
    AnytimeTouchdown,
    // Play-by-play
    GameLongestReception,
    GameLongestRush,
    GameLongestCompletion,
    GameFirstQuarterPassingYards,
    GameFirstQuarterRushingYards,
    GameFirstQuarterReceivingYards,
    GameFirstHalfPassingYards,
    GameFirstHalfRushingYards,
    GameFirstHalfReceivingYards,
    FirstTouchdownScorer,
    // Game result
    GameTotal,
    GameMoneyline,
    GameSpread,
    GameTeamTotalPoints,
    // Team stats
    GameTeamRushingYards,
    GameTeamPassingYards,
    GameTeamSacks,
    // Season-long futures
    SeasonPassingYards,
    SeasonRushingYards,
    SeasonReceivingYards,
    SeasonWins,
}

impl MarketType {
    /// All known market types (useful for iteration).
    pub const ALL: &'static [MarketType] = &[
        MarketType::GamePassingYards,
        MarketType::GamePassingCompletions,
        MarketType::GamePassingAttempts,
        MarketType::GamePassingTouchdowns,
        MarketType::GamePassingInterceptions,
        MarketType::GameRushingYards,
        MarketType::GameRushingAttempts,
        MarketType::GameRushingTouchdowns,
        MarketType::GameReceivingYards,
        MarketType::GameReceptions,
        MarketType::GameTargets,
        MarketType::GameReceivingTouchdowns,
        MarketType::GameRushingReceivingYards,
        MarketType::GamePassingRushingYards,
        MarketType::AnytimeTouchdown,
        MarketType::GameLongestReception,
        MarketType::GameLongestRush,
        MarketType::GameLongestCompletion,
        MarketType::GameFirstQuarterPassingYards,
        MarketType::GameFirstQuarterRushingYards,
        MarketType::GameFirstQuarterReceivingYards,
        MarketType::GameFirstHalfPassingYards,
        MarketType::GameFirstHalfRushingYards,
        MarketType::GameFirstHalfReceivingYards,
        MarketType::FirstTouchdownScorer,
        MarketType::GameTotal,
        MarketType::GameMoneyline,
        MarketType::GameSpread,
        MarketType::GameTeamTotalPoints,
        MarketType::GameTeamRushingYards,
        MarketType::GameTeamPassingYards,
        MarketType::GameTeamSacks,
        MarketType::SeasonPassingYards,
        MarketType::SeasonRushingYards,
        MarketType::SeasonReceivingYards,
        MarketType::SeasonWins,
    ];

    /// The identifier stored in `prop_markets.market_type`.
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketType::GamePassingYards => "GAME_PASSING_YARDS",
            MarketType::GamePassingCompletions => "GAME_PASSING_COMPLETIONS",
            MarketType::GamePassingAttempts => "GAME_PASSING_ATTEMPTS",
            MarketType::GamePassingTouchdowns => "GAME_PASSING_TOUCHDOWNS",
            MarketType::GamePassingInterceptions => "GAME_PASSING_INTERCEPTIONS",
            MarketType::GameRushingYards => "GAME_RUSHING_YARDS",
            MarketType::GameRushingAttempts => "GAME_RUSHING_ATTEMPTS",
            MarketType::GameRushingTouchdowns => "GAME_RUSHING_TOUCHDOWNS",
            MarketType::GameReceivingYards => "GAME_RECEIVING_YARDS",
            MarketType::GameReceptions => "GAME_RECEPTIONS",
            MarketType::GameTargets => "GAME_TARGETS",
            MarketType::GameReceivingTouchdowns => "GAME_RECEIVING_TOUCHDOWNS",
            MarketType::GameRushingReceivingYards => "GAME_RUSHING_RECEIVING_YARDS",
            MarketType::GamePassingRushingYards => "GAME_PASSING_RUSHING_YARDS",
            MarketType::AnytimeTouchdown => "ANYTIME_TOUCHDOWN",
            MarketType::GameLongestReception => "GAME_LONGEST_RECEPTION",
            MarketType::GameLongestRush => "GAME_LONGEST_RUSH",
            MarketType::GameLongestCompletion => "GAME_LONGEST_COMPLETION",
            MarketType::GameFirstQuarterPassingYards => "GAME_FIRST_QUARTER_PASSING_YARDS",
            MarketType::GameFirstQuarterRushingYards => "GAME_FIRST_QUARTER_RUSHING_YARDS",
            MarketType::GameFirstQuarterReceivingYards => "GAME_FIRST_QUARTER_RECEIVING_YARDS",
            MarketType::GameFirstHalfPassingYards => "GAME_FIRST_HALF_PASSING_YARDS",
            MarketType::GameFirstHalfRushingYards => "GAME_FIRST_HALF_RUSHING_YARDS",
            MarketType::GameFirstHalfReceivingYards => "GAME_FIRST_HALF_RECEIVING_YARDS",
            MarketType::FirstTouchdownScorer => "FIRST_TOUCHDOWN_SCORER",
            MarketType::GameTotal => "GAME_TOTAL",
            MarketType::GameMoneyline => "GAME_MONEYLINE",
            MarketType::GameSpread => "GAME_SPREAD",
            MarketType::GameTeamTotalPoints => "GAME_TEAM_TOTAL_POINTS",
            MarketType::GameTeamRushingYards => "GAME_TEAM_RUSHING_YARDS",
            MarketType::GameTeamPassingYards => "GAME_TEAM_PASSING_YARDS",
            MarketType::GameTeamSacks => "GAME_TEAM_SACKS",
            MarketType::SeasonPassingYards => "SEASON_PASSING_YARDS",
            MarketType::SeasonRushingYards => "SEASON_RUSHING_YARDS",
            MarketType::SeasonReceivingYards => "SEASON_RECEIVING_YARDS",
            MarketType::SeasonWins => "SEASON_WINS",
        }
    }
}

impl fmt::Display for MarketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse a stored market type identifier (exact, case-sensitive).
impl std::str::FromStr for MarketType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MarketType::ALL
            .iter()
            .find(|t| t.as_str() == s)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("Unknown market type: {s}"))
    }
}

// ---------------------------------------------------------------------------
// Handler kinds
// ---------------------------------------------------------------------------

/// The family of calculator responsible for a market type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HandlerKind {
    PlayerGamelog,
    PlayByPlay,
    GameResult,
    TeamStats,
    Unsupported,
}

impl HandlerKind {
    /// The four real handler kinds, excluding `Unsupported`.
    pub const CALCULATORS: &'static [HandlerKind] = &[
        HandlerKind::PlayerGamelog,
        HandlerKind::PlayByPlay,
        HandlerKind::GameResult,
        HandlerKind::TeamStats,
    ];

    pub fn is_supported(&self) -> bool {
        !matches!(self, HandlerKind::Unsupported)
    }
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerKind::PlayerGamelog => write!(f, "PLAYER_GAMELOG"),
            HandlerKind::PlayByPlay => write!(f, "PLAY_BY_PLAY"),
            HandlerKind::GameResult => write!(f, "GAME_RESULT"),
            HandlerKind::TeamStats => write!(f, "TEAM_STATS"),
            HandlerKind::Unsupported => write!(f, "UNSUPPORTED"),
        }
    }
}

// ---------------------------------------------------------------------------
// Selection side and verdict
// ---------------------------------------------------------------------------

/// Which side of a market a selection takes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SelectionType {
    Over,
    Under,
    Yes,
    No,
    /// A team code, used by moneyline, spread and team markets.
    Team(String),
}

impl SelectionType {
    /// Parse a stored `selection_type`. Anything that is not one of the
    /// keywords is taken to be a team code.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        let upper = trimmed.to_uppercase();
        Some(match upper.as_str() {
            "OVER" => SelectionType::Over,
            "UNDER" => SelectionType::Under,
            "YES" => SelectionType::Yes,
            "NO" => SelectionType::No,
            _ => SelectionType::Team(upper),
        })
    }

    pub fn team(&self) -> Option<&str> {
        match self {
            SelectionType::Team(code) => Some(code),
            _ => None,
        }
    }
}

impl fmt::Display for SelectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionType::Over => write!(f, "OVER"),
            SelectionType::Under => write!(f, "UNDER"),
            SelectionType::Yes => write!(f, "YES"),
            SelectionType::No => write!(f, "NO"),
            SelectionType::Team(code) => write!(f, "{code}"),
        }
    }
}

/// Settlement verdict for one selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SelectionResult {
    Won,
    Lost,
}

impl SelectionResult {
    pub fn from_bool(won: bool) -> Self {
        if won {
            SelectionResult::Won
        } else {
            SelectionResult::Lost
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionResult::Won => "WON",
            SelectionResult::Lost => "LOST",
        }
    }
}

impl fmt::Display for SelectionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SelectionResult {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WON" => Ok(SelectionResult::Won),
            "LOST" => Ok(SelectionResult::Lost),
            other => anyhow::bail!("Unknown selection result: {other}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Market & selection identity
// ---------------------------------------------------------------------------

/// Identity of a market: `(source_id, source_market_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MarketKey {
    pub source_id: String,
    pub source_market_id: String,
}

impl MarketKey {
    pub fn new(source_id: impl Into<String>, source_market_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            source_market_id: source_market_id.into(),
        }
    }
}

impl fmt::Display for MarketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.source_id, self.source_market_id)
    }
}

/// Identity of a selection: its market key plus `source_selection_id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SelectionKey {
    pub market: MarketKey,
    pub source_selection_id: String,
}

impl fmt::Display for SelectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.market, self.source_selection_id)
    }
}

// ---------------------------------------------------------------------------
// Market & selection rows
// ---------------------------------------------------------------------------

/// A market row as read by the settlement core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub key: MarketKey,
    /// Stored identifier; may name a type this build does not know.
    pub market_type: String,
    pub esbid: Option<GameId>,
    pub year: i32,
    pub market_settled: bool,
    pub metric_result_value: Option<Decimal>,
    pub winning_selection_id: Option<String>,
}

/// A selection joined with the fields of its parent market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Selection {
    pub key: SelectionKey,
    pub market_type: String,
    pub esbid: GameId,
    pub year: i32,
    pub selection_pid: Option<String>,
    pub selection_metric_line: Option<Decimal>,
    pub selection_type: String,
    pub selection_result: Option<SelectionResult>,
}

impl Selection {
    /// The calculation input for this selection.
    pub fn to_input(&self) -> SelectionInput {
        SelectionInput {
            esbid: self.esbid,
            market_type: self.market_type.clone(),
            selection_pid: self.selection_pid.clone(),
            selection_metric_line: self.selection_metric_line,
            selection_type: self.selection_type.clone(),
        }
    }
}

/// Everything a calculator needs to settle one selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionInput {
    pub esbid: GameId,
    pub market_type: String,
    pub selection_pid: Option<String>,
    pub selection_metric_line: Option<Decimal>,
    pub selection_type: String,
}

/// Successful outcome of a single calculation. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationResult {
    pub esbid: GameId,
    pub market_type: MarketType,
    pub selection_pid: Option<String>,
    pub metric_value: Decimal,
    /// The value recorded on the market. Same as `metric_value` except for
    /// moneyline and spread, where it is the home team's margin so every
    /// side of the market agrees on it.
    pub market_metric_value: Decimal,
    pub selection_result: SelectionResult,
    pub handler_type: HandlerKind,
}

/// What every calculation produces: a result or a contained error.
pub type CalculationOutcome = Result<CalculationResult, crate::error::CalculationError>;

// ---------------------------------------------------------------------------
// Game data rows
// ---------------------------------------------------------------------------

/// Season phase of a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SeasonType {
    Pre,
    Reg,
    Post,
}

impl SeasonType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeasonType::Pre => "PRE",
            SeasonType::Reg => "REG",
            SeasonType::Post => "POST",
        }
    }
}

impl fmt::Display for SeasonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SeasonType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PRE" => Ok(SeasonType::Pre),
            "REG" => Ok(SeasonType::Reg),
            "POST" => Ok(SeasonType::Post),
            other => anyhow::bail!("Unknown season type: {other}"),
        }
    }
}

/// One player's totals for one game.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PlayerGamelog {
    pub esbid: GameId,
    pub pid: String,
    pub tm: String,
    /// Passing yards
    pub py: i32,
    /// Pass attempts
    pub pa: i32,
    /// Completions
    pub pc: i32,
    /// Passing touchdowns
    pub tdp: i32,
    /// Interceptions thrown
    pub ints: i32,
    /// Rush attempts
    pub ra: i32,
    /// Rushing yards
    pub ry: i32,
    /// Rushing touchdowns
    pub tdr: i32,
    /// Receptions
    pub rec: i32,
    /// Targets
    pub trg: i32,
    /// Receiving yards
    pub recy: i32,
    /// Receiving touchdowns
    pub tdrec: i32,
}

/// One play-by-play event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Play {
    pub esbid: GameId,
    /// Sequence of the play within the game.
    pub play_id: i64,
    pub qtr: i32,
    /// `PASS`, `RUSH`, `PUNT`, ...
    pub play_type: String,
    pub pos_team: String,
    pub def_team: String,
    pub yds_gained: Option<i32>,
    pub psr_pid: Option<String>,
    pub bc_pid: Option<String>,
    pub trg_pid: Option<String>,
    pub comp: bool,
    pub sk: bool,
    pub td: bool,
    pub td_pid: Option<String>,
}

impl Play {
    pub fn is_pass(&self) -> bool {
        self.play_type == "PASS"
    }

    pub fn is_rush(&self) -> bool {
        self.play_type == "RUSH"
    }

    pub fn yards(&self) -> i32 {
        self.yds_gained.unwrap_or(0)
    }
}

/// Final box score and scheduling fields for one game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct GameScore {
    pub esbid: GameId,
    pub year: i32,
    pub week: i32,
    pub seas_type: String,
    /// Home team code
    pub h: String,
    /// Visiting team code
    pub v: String,
    pub home_score: Option<i32>,
    pub away_score: Option<i32>,
    pub status: Option<String>,
}

/// Game statuses that mean the box score will not change.
pub const TERMINAL_GAME_STATUSES: &[&str] = &["FINAL", "FINAL_OVERTIME"];

impl GameScore {
    pub fn is_final(&self) -> bool {
        self.status
            .as_deref()
            .map(|s| TERMINAL_GAME_STATUSES.contains(&s))
            .unwrap_or(false)
    }

    /// `(team score, opponent score)` from the named team's side, or `None`
    /// if the team did not play in this game or a score is missing.
    pub fn scores_for(&self, team: &str) -> Option<(i32, i32)> {
        let home = self.home_score?;
        let away = self.away_score?;
        if self.h.eq_ignore_ascii_case(team) {
            Some((home, away))
        } else if self.v.eq_ignore_ascii_case(team) {
            Some((away, home))
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

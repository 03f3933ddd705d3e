//! Market type router.
//!
//! A fixed table from market type to the calculator family that settles it.
//! Unknown identifiers and known-but-unsettleable types (season futures)
//! both route to `HandlerKind::Unsupported`.

use crate::types::{HandlerKind, MarketType};

/// Route a stored market type identifier. Total over every input string.
pub fn route(market_type: &str) -> HandlerKind {
    match market_type.parse::<MarketType>() {
        Ok(t) => handler_for(t),
        Err(_) => HandlerKind::Unsupported,
    }
}

/// The handler for a parsed market type.
pub fn handler_for(market_type: MarketType) -> HandlerKind {
    use MarketType::*;

    match market_type {
        GamePassingYards
        | GamePassingCompletions
        | GamePassingAttempts
        | GamePassingTouchdowns
        | GamePassingInterceptions
        | GameRushingYards
        | GameRushingAttempts
        | GameRushingTouchdowns
        | GameReceivingYards
        | GameReceptions
        | GameTargets
        | GameReceivingTouchdowns
        | GameRushingReceivingYards
        | GamePassingRushingYards
        | AnytimeTouchdown => HandlerKind::PlayerGamelog,

        GameLongestReception
        | GameLongestRush
        | GameLongestCompletion
        | GameFirstQuarterPassingYards
        | GameFirstQuarterRushingYards
        | GameFirstQuarterReceivingYards
        | GameFirstHalfPassingYards
        | GameFirstHalfRushingYards
        | GameFirstHalfReceivingYards
        | FirstTouchdownScorer => HandlerKind::PlayByPlay,

        GameTotal | GameMoneyline | GameSpread | GameTeamTotalPoints => HandlerKind::GameResult,

        GameTeamRushingYards | GameTeamPassingYards | GameTeamSacks => HandlerKind::TeamStats,

        SeasonPassingYards | SeasonRushingYards | SeasonReceivingYards | SeasonWins => {
            HandlerKind::Unsupported
        }
    }
}

/// Every market type that routes to a real handler.
pub fn supported_market_types() -> Vec<MarketType> {
    MarketType::ALL
        .iter()
        .copied()
        .filter(|t| handler_for(*t).is_supported())
        .collect()
}

/// Market types settled by one handler kind.
pub fn market_types_for(kind: HandlerKind) -> Vec<MarketType> {
    MarketType::ALL
        .iter()
        .copied()
        .filter(|t| handler_for(*t) == kind)
        .collect()
}

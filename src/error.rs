//! Typed errors for the settlement core.
//!
//! Calculation errors are contained as data: the pipeline counts and logs
//! them per selection. Only storage failures during the write phase travel
//! up as `anyhow::Error`.

use thiserror::Error;

use crate::types::{GameId, HandlerKind};

/// Why a single selection could not be settled.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CalculationError {
    #[error("Unsupported market type: {0}")]
    UnsupportedMarketType(String),

    #[error("No calculator registered for {0}")]
    NoCalculator(HandlerKind),

    #[error("{market_type} is not handled by the {handler} calculator")]
    WrongHandler {
        market_type: String,
        handler: HandlerKind,
    },

    #[error("Selection is missing a player id for {0}")]
    MissingSelectionPid(String),

    #[error("Selection is missing a line for {0}")]
    MissingLine(String),

    #[error("Invalid selection type {selection_type:?} for {market_type}")]
    InvalidSelectionType {
        market_type: String,
        selection_type: String,
    },

    #[error("No gamelog for player {pid} in game {esbid}")]
    MissingGamelog { esbid: GameId, pid: String },

    #[error("No plays found for game {0}")]
    MissingPlays(GameId),

    #[error("No plays for player {pid} in game {esbid}")]
    NoPlaysForPlayer { esbid: GameId, pid: String },

    #[error("No final score for game {0}")]
    MissingGameScore(GameId),

    #[error("Game {0} is not final")]
    GameNotFinal(GameId),

    #[error("Team {team} did not play in game {esbid}")]
    TeamNotInGame { esbid: GameId, team: String },

    #[error("Data source error: {0}")]
    DataSource(String),

    #[error("Calculation panicked: {0}")]
    Panicked(String),
}

impl CalculationError {
    /// Wrap an I/O failure from the on-demand load path.
    pub fn data_source(err: anyhow::Error) -> Self {
        CalculationError::DataSource(format!("{err:#}"))
    }
}

/// Errors from configuring the orchestrator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OrchestratorError {
    #[error("Calculator already registered for {0}")]
    AlreadyRegistered(HandlerKind),

    #[error("Cannot register a calculator for {0}")]
    InvalidKind(HandlerKind),
}

/// A per-item failure captured by the bounded worker pool.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PoolError {
    #[error("{0}")]
    Failed(String),

    #[error("worker panicked: {0}")]
    Panicked(String),
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

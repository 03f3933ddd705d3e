//! The comparison boundary shared by every calculator.
//!
//! OVER wins iff `metric > line`, UNDER wins iff `metric < line`. A metric
//! exactly on the line loses on both sides. Binary markets compare the
//! 0/1 metric exactly. There is no cushion here.

use rust_decimal::Decimal;

use crate::error::CalculationError;
use crate::types::{MarketType, SelectionResult, SelectionType};

/// Settle an OVER/UNDER selection against its line.
pub fn evaluate_over_under(
    market_type: MarketType,
    metric: Decimal,
    line: Option<Decimal>,
    selection_type: &SelectionType,
) -> Result<SelectionResult, CalculationError> {
    let line = line.ok_or_else(|| CalculationError::MissingLine(market_type.to_string()))?;
    let won = match selection_type {
        SelectionType::Over => metric > line,
        SelectionType::Under => metric < line,
        other => {
            return Err(CalculationError::InvalidSelectionType {
                market_type: market_type.to_string(),
                selection_type: other.to_string(),
            })
        }
    };
    Ok(SelectionResult::from_bool(won))
}

/// Settle a YES/NO selection against a 0/1 metric.
pub fn evaluate_binary(
    market_type: MarketType,
    metric: Decimal,
    selection_type: &SelectionType,
) -> Result<SelectionResult, CalculationError> {
    let won = match selection_type {
        SelectionType::Yes => metric == Decimal::ONE,
        SelectionType::No => metric == Decimal::ZERO,
        other => {
            return Err(CalculationError::InvalidSelectionType {
                market_type: market_type.to_string(),
                selection_type: other.to_string(),
            })
        }
    };
    Ok(SelectionResult::from_bool(won))
}

/// Parse the stored selection type, rejecting blanks.
pub fn parse_selection_type(
    market_type: MarketType,
    raw: &str,
) -> Result<SelectionType, CalculationError> {
    SelectionType::parse(raw).ok_or_else(|| CalculationError::InvalidSelectionType {
        market_type: market_type.to_string(),
        selection_type: raw.to_string(),
    })
}

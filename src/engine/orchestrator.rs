//! Settlement orchestrator.
//!
//! Owns one calculator per handler kind and dispatches each selection to
//! the calculator its market type routes to. Prefetch fans out to every
//! calculator concurrently. Batch calculation never aborts: every input
//! yields exactly one outcome, in input order.

use futures::future::join_all;
use futures::FutureExt;
use serde::Serialize;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::calculators::{
    CacheStats, GameResultCalculator, MarketCalculator, PlayByPlayCalculator,
    PlayerGamelogCalculator, TeamStatsCalculator,
};
use crate::engine::router::{handler_for, market_types_for, route};
use crate::error::{panic_message, CalculationError, OrchestratorError};
use crate::storage::GameDataStore;
use crate::types::{CalculationOutcome, GameId, HandlerKind, MarketType, SelectionInput};

/// Health of one registered calculator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalculatorHealth {
    pub calculator_type: HandlerKind,
    pub healthy: bool,
    pub error: Option<String>,
}

/// Which handler kinds have calculators, and which market types that covers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalculatorCoverage {
    pub registered: Vec<HandlerKind>,
    pub missing: Vec<HandlerKind>,
    pub covered_market_types: Vec<MarketType>,
    pub uncovered_market_types: Vec<MarketType>,
}

/// What a prefetch round did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PrefetchSummary {
    pub games: usize,
    pub calculators: usize,
    pub failed: Vec<HandlerKind>,
}

#[derive(Default)]
pub struct SettlementOrchestrator {
    calculators: BTreeMap<HandlerKind, Arc<dyn MarketCalculator>>,
}

impl SettlementOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// An orchestrator with all four calculators registered over `store`.
    pub fn with_default_calculators(store: Arc<dyn GameDataStore>) -> Self {
        let defaults: [Arc<dyn MarketCalculator>; 4] = [
            Arc::new(PlayerGamelogCalculator::new(store.clone())),
            Arc::new(PlayByPlayCalculator::new(store.clone())),
            Arc::new(GameResultCalculator::new(store.clone())),
            Arc::new(TeamStatsCalculator::new(store)),
        ];
        let calculators = defaults
            .into_iter()
            .map(|calc| (calc.kind(), calc))
            .collect();
        Self { calculators }
    }

    /// Register `calculator` for `kind`. Each kind takes one calculator.
    pub fn register_calculator(
        &mut self,
        kind: HandlerKind,
        calculator: Arc<dyn MarketCalculator>,
    ) -> Result<(), OrchestratorError> {
        if !kind.is_supported() {
            return Err(OrchestratorError::InvalidKind(kind));
        }
        if self.calculators.contains_key(&kind) {
            return Err(OrchestratorError::AlreadyRegistered(kind));
        }
        debug!(%kind, "Registered calculator");
        self.calculators.insert(kind, calculator);
        Ok(())
    }

    pub fn calculator(&self, kind: HandlerKind) -> Option<&Arc<dyn MarketCalculator>> {
        self.calculators.get(&kind)
    }

    /// Warm every calculator's cache for `esbids`. Failures are logged and
    /// reported; the affected games load on demand later.
    pub async fn prefetch_data_for_games(&self, esbids: &[GameId]) -> PrefetchSummary {
        if esbids.is_empty() || self.calculators.is_empty() {
            return PrefetchSummary::default();
        }

        let results = join_all(self.calculators.iter().map(|(kind, calc)| async move {
            (*kind, calc.prefetch(esbids).await)
        }))
        .await;

        let mut summary = PrefetchSummary {
            games: esbids.len(),
            calculators: results.len(),
            failed: Vec::new(),
        };
        for (kind, result) in results {
            if let Err(e) = result {
                warn!(%kind, games = esbids.len(), error = %format!("{e:#}"), "Prefetch failed");
                summary.failed.push(kind);
            }
        }
        debug!(
            games = summary.games,
            failed = summary.failed.len(),
            "Prefetch complete"
        );
        summary
    }

    /// Settle one selection.
    pub async fn calculate_market_result(&self, input: &SelectionInput) -> CalculationOutcome {
        let kind = route(&input.market_type);
        if !kind.is_supported() {
            return Err(CalculationError::UnsupportedMarketType(input.market_type.clone()));
        }
        let calculator = self
            .calculators
            .get(&kind)
            .ok_or(CalculationError::NoCalculator(kind))?;
        calculator.calculate(input).await
    }

    /// Settle every input. The output matches the input in length and
    /// order; a panic inside a calculator becomes that input's error.
    pub async fn batch_calculate_markets(&self, inputs: &[SelectionInput]) -> Vec<CalculationOutcome> {
        join_all(inputs.iter().map(|input| async move {
            AssertUnwindSafe(self.calculate_market_result(input))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| {
                    Err(CalculationError::Panicked(panic_message(payload.as_ref())))
                })
        }))
        .await
    }

    /// Probe every registered calculator. Never fails; an unhealthy
    /// calculator is reported with its error text.
    pub async fn health_check(&self, verbose: bool) -> Vec<CalculatorHealth> {
        let checks = self.calculators.iter().map(|(kind, calc)| async move {
            let outcome = AssertUnwindSafe(calc.health_check()).catch_unwind().await;
            let error = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(format!("{e:#}")),
                Err(payload) => Some(panic_message(payload.as_ref())),
            };
            CalculatorHealth {
                calculator_type: *kind,
                healthy: error.is_none(),
                error,
            }
        });
        let report = join_all(checks).await;

        for health in &report {
            match &health.error {
                Some(error) => warn!(calculator = %health.calculator_type, %error, "Calculator unhealthy"),
                None if verbose => info!(calculator = %health.calculator_type, "Calculator healthy"),
                None => {}
            }
        }
        report
    }

    pub fn get_calculator_coverage(&self) -> CalculatorCoverage {
        let (registered, missing): (Vec<HandlerKind>, Vec<HandlerKind>) = HandlerKind::CALCULATORS
            .iter()
            .copied()
            .partition(|kind| self.calculators.contains_key(kind));

        let covered_market_types = registered
            .iter()
            .flat_map(|kind| market_types_for(*kind))
            .collect();
        let uncovered_market_types = MarketType::ALL
            .iter()
            .copied()
            .filter(|mt| {
                let kind = handler_for(*mt);
                !kind.is_supported() || !self.calculators.contains_key(&kind)
            })
            .collect();

        CalculatorCoverage {
            registered,
            missing,
            covered_market_types,
            uncovered_market_types,
        }
    }

    pub fn cache_stats(&self) -> BTreeMap<HandlerKind, CacheStats> {
        self.calculators
            .iter()
            .map(|(kind, calc)| (*kind, calc.cache_stats()))
            .collect()
    }

    pub fn clear_caches(&self) {
        for calc in self.calculators.values() {
            calc.clear_cache();
        }
        debug!("Calculator caches cleared");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

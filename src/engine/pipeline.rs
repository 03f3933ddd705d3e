//! Batch settlement pipeline.
//!
//! One `run` is a single pass:
//! discover games → chunk into game batches → prefetch → fetch selections
//! (bounded pool) → chunk into selection batches → calculate → queue writes.
//!
//! Selection writes are queued for every successful result. Market writes
//! are decided only after every batch has been calculated, because a
//! market is settled only when all of its selections were processed in
//! this pass. Fetch and calculation errors are counted and skipped; a
//! failed write aborts the run.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::orchestrator::SettlementOrchestrator;
use crate::engine::pool::with_concurrency;
use crate::engine::router::supported_market_types;
use crate::storage::{DiscoveryFilter, MarketSettlement, SettlementStore};
use crate::types::{
    GameId, MarketKey, SeasonType, Selection, SelectionInput, SelectionKey, SelectionResult,
};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Invocation parameters for one pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub year: i32,
    pub week: Option<i32>,
    pub seas_type: Option<SeasonType>,
    pub missing_only: bool,
    /// Without an explicit week, settle only the latest completed week.
    pub current_week_only: bool,
    pub selection_batch_size: usize,
    pub game_batch_size: usize,
    pub fetch_concurrency: usize,
    pub dry_run: bool,
    /// Max pending writes echoed to the log in dry-run mode.
    pub preview_limit: usize,
}

impl PipelineConfig {
    pub fn new(year: i32) -> Self {
        Self {
            year,
            week: None,
            seas_type: None,
            missing_only: true,
            current_week_only: false,
            selection_batch_size: 500,
            game_batch_size: 10,
            fetch_concurrency: 5,
            dry_run: false,
            preview_limit: 20,
        }
    }
}

// ---------------------------------------------------------------------------
// Queued writes
// ---------------------------------------------------------------------------

/// A write described as data, for dry-run previews.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingWrite {
    pub table: String,
    pub where_clause: serde_json::Value,
    pub update: serde_json::Value,
}

#[derive(Debug, Clone)]
enum QueuedWrite {
    Selection {
        key: SelectionKey,
        result: SelectionResult,
    },
    Market(MarketSettlement),
}

impl QueuedWrite {
    fn preview(&self) -> PendingWrite {
        match self {
            QueuedWrite::Selection { key, result } => PendingWrite {
                table: "prop_market_selections".into(),
                where_clause: json!({
                    "source_id": key.market.source_id,
                    "source_market_id": key.market.source_market_id,
                    "source_selection_id": key.source_selection_id,
                }),
                update: json!({ "selection_result": result.as_str() }),
            },
            QueuedWrite::Market(settlement) => PendingWrite {
                table: "prop_markets".into(),
                where_clause: json!({
                    "source_id": settlement.key.source_id,
                    "source_market_id": settlement.key.source_market_id,
                }),
                update: json!({
                    "market_settled": true,
                    "metric_result_value": settlement.metric_result_value.and_then(|v| v.to_f64()),
                    "winning_selection_id": settlement.winning_selection_id,
                }),
            },
        }
    }

    async fn apply(&self, store: &dyn SettlementStore) -> Result<()> {
        match self {
            QueuedWrite::Selection { key, result } => store
                .update_selection_result(key, *result)
                .await
                .with_context(|| {
                    format!("Failed to write result for selection {}/{}", key.market, key.source_selection_id)
                }),
            QueuedWrite::Market(settlement) => store
                .settle_market(settlement)
                .await
                .with_context(|| format!("Failed to settle market {}", settlement.key)),
        }
    }
}

// ---------------------------------------------------------------------------
// Progress & report
// ---------------------------------------------------------------------------

/// Per-market tally across every batch of the pass.
#[derive(Debug, Clone, Default)]
struct MarketProgress {
    total: usize,
    processed: usize,
    metric_result_value: Option<Decimal>,
    winners: Vec<String>,
}

impl MarketProgress {
    fn is_complete(&self) -> bool {
        self.total > 0 && self.processed == self.total
    }

    fn settlement(&self, key: &MarketKey) -> MarketSettlement {
        MarketSettlement {
            key: key.clone(),
            metric_result_value: self.metric_result_value,
            winning_selection_id: match self.winners.as_slice() {
                [only] => Some(only.clone()),
                _ => None,
            },
        }
    }
}

/// Summary of one pass.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub year: i32,
    pub week: Option<i32>,
    pub dry_run: bool,
    pub games_discovered: usize,
    pub games_processed: usize,
    pub game_fetch_errors: usize,
    pub selections_processed: usize,
    pub selections_errored: usize,
    pub markets_settled: usize,
    pub markets_partially_settled: usize,
    pub selection_writes: usize,
    pub market_writes: usize,
    /// Every queued write, filled only in dry-run mode.
    pub preview: Vec<PendingWrite>,
}

impl PipelineReport {
    fn new(config: &PipelineConfig) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            year: config.year,
            week: config.week,
            dry_run: config.dry_run,
            games_discovered: 0,
            games_processed: 0,
            game_fetch_errors: 0,
            selections_processed: 0,
            selections_errored: 0,
            markets_settled: 0,
            markets_partially_settled: 0,
            selection_writes: 0,
            market_writes: 0,
            preview: Vec::new(),
        }
    }

    fn finish(mut self) -> Self {
        self.finished_at = Some(Utc::now());
        self
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct SettlementPipeline {
    orchestrator: Arc<SettlementOrchestrator>,
    store: Arc<dyn SettlementStore>,
    config: PipelineConfig,
}

impl SettlementPipeline {
    pub fn new(
        orchestrator: Arc<SettlementOrchestrator>,
        store: Arc<dyn SettlementStore>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            orchestrator,
            store,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run one settlement pass.
    pub async fn run(&self) -> Result<PipelineReport> {
        let mut report = PipelineReport::new(&self.config);
        info!(
            run_id = %report.run_id,
            year = self.config.year,
            week = ?self.config.week,
            dry_run = self.config.dry_run,
            "Settlement run starting"
        );

        let week = match self.resolve_week().await? {
            WeekScope::Resolved(week) => week,
            WeekScope::NothingToDo => {
                info!(year = self.config.year, "No completed week found, nothing to settle");
                return Ok(report.finish());
            }
        };
        report.week = week;

        let filter = DiscoveryFilter {
            year: self.config.year,
            week,
            seas_type: self.config.seas_type,
            missing_only: self.config.missing_only,
            market_types: supported_market_types()
                .iter()
                .map(|mt| mt.as_str().to_string())
                .collect(),
        };
        let game_ids = self
            .store
            .discover_game_ids(&filter)
            .await
            .context("Failed to discover games")?;
        report.games_discovered = game_ids.len();
        info!(games = game_ids.len(), week = ?week, "Discovered games with open markets");

        let mut progress: BTreeMap<MarketKey, MarketProgress> = BTreeMap::new();
        let mut writes: Vec<QueuedWrite> = Vec::new();

        let game_batches: Vec<&[GameId]> = game_ids
            .chunks(self.config.game_batch_size.max(1))
            .collect();
        for (batch_idx, batch) in game_batches.iter().enumerate() {
            self.process_game_batch(batch, &filter, &mut report, &mut progress, &mut writes)
                .await;
            info!(
                batch = batch_idx + 1,
                batches = game_batches.len(),
                processed = report.selections_processed,
                errored = report.selections_errored,
                "Game batch complete"
            );
        }
        report.selection_writes = writes.len();

        // Market settlement needs the complete tally, so it runs after
        // every batch.
        for (key, tally) in &progress {
            if tally.is_complete() {
                writes.push(QueuedWrite::Market(tally.settlement(key)));
                report.markets_settled += 1;
            } else {
                debug!(
                    market = %key,
                    processed = tally.processed,
                    total = tally.total,
                    "Market left unsettled"
                );
                report.markets_partially_settled += 1;
            }
        }
        report.market_writes = report.markets_settled;

        if self.config.dry_run {
            report.preview = writes.iter().map(QueuedWrite::preview).collect();
            for write in report.preview.iter().take(self.config.preview_limit) {
                info!(
                    table = %write.table,
                    where_clause = %write.where_clause,
                    update = %write.update,
                    "Dry run: pending write"
                );
            }
            if report.preview.len() > self.config.preview_limit {
                info!(
                    hidden = report.preview.len() - self.config.preview_limit,
                    "Dry run: further pending writes not shown"
                );
            }
        } else {
            for write in &writes {
                write.apply(self.store.as_ref()).await?;
            }
        }

        let report = report.finish();
        info!(
            run_id = %report.run_id,
            games = report.games_processed,
            fetch_errors = report.game_fetch_errors,
            processed = report.selections_processed,
            errored = report.selections_errored,
            settled = report.markets_settled,
            partial = report.markets_partially_settled,
            dry_run = report.dry_run,
            duration_ms = report.duration_ms().unwrap_or_default(),
            "Settlement run complete"
        );
        Ok(report)
    }

    async fn resolve_week(&self) -> Result<WeekScope> {
        if self.config.week.is_some() || !self.config.current_week_only {
            return Ok(WeekScope::Resolved(self.config.week));
        }
        let week = self
            .store
            .current_week(self.config.year, self.config.seas_type)
            .await
            .context("Failed to resolve current week")?;
        Ok(match week {
            Some(week) => {
                debug!(week, "Resolved current week");
                WeekScope::Resolved(Some(week))
            }
            None => WeekScope::NothingToDo,
        })
    }

    async fn process_game_batch(
        &self,
        batch: &[GameId],
        filter: &DiscoveryFilter,
        report: &mut PipelineReport,
        progress: &mut BTreeMap<MarketKey, MarketProgress>,
        writes: &mut Vec<QueuedWrite>,
    ) {
        self.orchestrator.prefetch_data_for_games(batch).await;

        let store = self.store.as_ref();
        let fetched = with_concurrency(batch, self.config.fetch_concurrency, |esbid| async move {
            store.selections_for_game(*esbid, filter).await
        })
        .await;

        for (esbid, outcome) in batch.iter().zip(fetched) {
            let selections = match outcome {
                Ok(selections) => selections,
                Err(e) => {
                    warn!(esbid, error = %e, "Failed to fetch selections, skipping game");
                    report.game_fetch_errors += 1;
                    continue;
                }
            };
            report.games_processed += 1;

            for selection in &selections {
                progress
                    .entry(selection.key.market.clone())
                    .or_default()
                    .total += 1;
            }

            for chunk in selections.chunks(self.config.selection_batch_size.max(1)) {
                self.settle_chunk(*esbid, chunk, report, progress, writes)
                    .await;
            }
        }
    }

    async fn settle_chunk(
        &self,
        esbid: GameId,
        chunk: &[Selection],
        report: &mut PipelineReport,
        progress: &mut BTreeMap<MarketKey, MarketProgress>,
        writes: &mut Vec<QueuedWrite>,
    ) {
        let inputs: Vec<SelectionInput> = chunk.iter().map(Selection::to_input).collect();
        let outcomes = self.orchestrator.batch_calculate_markets(&inputs).await;

        for (selection, outcome) in chunk.iter().zip(outcomes) {
            let result = match outcome {
                Ok(result) => result,
                Err(e) => {
                    debug!(
                        esbid,
                        selection = %selection.key.source_selection_id,
                        market_type = %selection.market_type,
                        error = %e,
                        "Selection not settled"
                    );
                    report.selections_errored += 1;
                    continue;
                }
            };
            report.selections_processed += 1;

            let tally = progress.entry(selection.key.market.clone()).or_default();
            tally.processed += 1;
            if tally.metric_result_value.is_none() {
                tally.metric_result_value = Some(result.market_metric_value);
            }
            if result.selection_result == SelectionResult::Won {
                tally.winners.push(selection.key.source_selection_id.clone());
            }

            writes.push(QueuedWrite::Selection {
                key: selection.key.clone(),
                result: result.selection_result,
            });
        }
    }
}

enum WeekScope {
    Resolved(Option<i32>),
    NothingToDo,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! End-to-end settlement passes over the in-memory store.
//!
//! One final game (KC 27, ATL 24) carries markets for all four calculator
//! families, plus one market whose player never played.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};

use settler::engine::orchestrator::SettlementOrchestrator;
use settler::engine::pipeline::{PipelineConfig, SettlementPipeline};
use settler::types::*;

use crate::memory_store::MemoryStore;

const GAME: GameId = 100;

fn game(esbid: GameId, week: i32, status: &str) -> GameScore {
    GameScore {
        esbid,
        year: 2024,
        week,
        seas_type: "REG".into(),
        h: "KC".into(),
        v: "ATL".into(),
        home_score: Some(27),
        away_score: Some(24),
        status: Some(status.into()),
    }
}

fn play(play_id: i64, qtr: i32, play_type: &str, pos: &str, def: &str, yds: i32) -> Play {
    Play {
        esbid: GAME,
        play_id,
        qtr,
        play_type: play_type.into(),
        pos_team: pos.into(),
        def_team: def.into(),
        yds_gained: Some(yds),
        ..Default::default()
    }
}

fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.add_game(game(GAME, 3, "FINAL"));

    store.add_gamelog(PlayerGamelog {
        esbid: GAME,
        pid: "QB1".into(),
        tm: "KC".into(),
        py: 260,
        pa: 35,
        pc: 24,
        tdp: 2,
        ..Default::default()
    });
    store.add_gamelog(PlayerGamelog {
        esbid: GAME,
        pid: "RB1".into(),
        tm: "KC".into(),
        ra: 14,
        ry: 17,
        tdr: 1,
        ..Default::default()
    });

    store.add_plays(vec![
        Play {
            psr_pid: Some("QB1".into()),
            trg_pid: Some("WR1".into()),
            comp: true,
            ..play(1, 1, "PASS", "KC", "ATL", 15)
        },
        Play {
            bc_pid: Some("RB1".into()),
            td: true,
            td_pid: Some("RB1".into()),
            ..play(2, 1, "RUSH", "KC", "ATL", 6)
        },
        Play {
            psr_pid: Some("QB1".into()),
            trg_pid: Some("WR1".into()),
            comp: true,
            ..play(3, 2, "PASS", "KC", "ATL", 42)
        },
        Play {
            bc_pid: Some("RB1".into()),
            ..play(4, 3, "RUSH", "KC", "ATL", 11)
        },
        Play {
            sk: true,
            ..play(5, 3, "PASS", "ATL", "KC", -8)
        },
    ]);

    let markets = [
        ("total", "GAME_TOTAL"),
        ("moneyline", "GAME_MONEYLINE"),
        ("passing", "GAME_PASSING_YARDS"),
        ("anytime", "ANYTIME_TOUCHDOWN"),
        ("longest", "GAME_LONGEST_RECEPTION"),
        ("first_td", "FIRST_TOUCHDOWN_SCORER"),
        ("team_rush", "GAME_TEAM_RUSHING_YARDS"),
        ("team_sacks", "GAME_TEAM_SACKS"),
        ("no_show", "GAME_RECEIVING_YARDS"),
        ("season", "SEASON_PASSING_YARDS"),
    ];
    for (id, market_type) in markets {
        store.add_market(id, market_type, GAME, 2024);
    }

    store.add_selection("total", "over", None, Some(dec!(45.5)), "OVER");
    store.add_selection("total", "under", None, Some(dec!(45.5)), "UNDER");
    store.add_selection("moneyline", "kc", None, None, "KC");
    store.add_selection("moneyline", "atl", None, None, "ATL");
    store.add_selection("passing", "over", Some("QB1"), Some(dec!(250.5)), "OVER");
    store.add_selection("passing", "under", Some("QB1"), Some(dec!(250.5)), "UNDER");
    store.add_selection("anytime", "yes", Some("RB1"), None, "YES");
    store.add_selection("anytime", "no", Some("RB1"), None, "NO");
    store.add_selection("longest", "over", Some("WR1"), Some(dec!(39.5)), "OVER");
    store.add_selection("first_td", "yes", Some("RB1"), None, "YES");
    store.add_selection("team_rush", "over", Some("KC"), Some(dec!(15.5)), "OVER");
    store.add_selection("team_sacks", "under", Some("KC"), Some(dec!(1.5)), "UNDER");
    store.add_selection("no_show", "over", Some("WR9"), Some(dec!(10.5)), "OVER");
    store.add_selection("season", "over", Some("QB1"), Some(dec!(4500.5)), "OVER");
    store
}

fn pipeline(store: &Arc<MemoryStore>, config: PipelineConfig) -> SettlementPipeline {
    let orchestrator = Arc::new(SettlementOrchestrator::with_default_calculators(store.clone()));
    SettlementPipeline::new(orchestrator, store.clone(), config)
}

#[tokio::test]
async fn test_full_pass_settles_every_calculator_family() {
    let store = seeded_store();
    let report = assert_ok!(pipeline(&store, PipelineConfig::new(2024)).run().await);

    assert_eq!(report.games_discovered, 1);
    assert_eq!(report.selections_processed, 12);
    assert_eq!(report.selections_errored, 1);
    assert_eq!(report.markets_settled, 8);
    assert_eq!(report.markets_partially_settled, 1);

    let expect = |market: &str, selection: &str, result: SelectionResult| {
        assert_eq!(
            store.selection_result(market, selection),
            Some(result),
            "{market}/{selection}"
        );
    };
    expect("total", "over", SelectionResult::Won);
    expect("total", "under", SelectionResult::Lost);
    expect("moneyline", "kc", SelectionResult::Won);
    expect("moneyline", "atl", SelectionResult::Lost);
    expect("passing", "over", SelectionResult::Won);
    expect("passing", "under", SelectionResult::Lost);
    expect("anytime", "yes", SelectionResult::Won);
    expect("anytime", "no", SelectionResult::Lost);
    expect("longest", "over", SelectionResult::Won);
    expect("first_td", "yes", SelectionResult::Won);
    expect("team_rush", "over", SelectionResult::Won);
    expect("team_sacks", "under", SelectionResult::Won);

    let total = store.market("total").unwrap();
    assert!(total.market_settled);
    assert_eq!(total.metric_result_value, Some(dec!(51)));
    assert_eq!(total.winning_selection_id.as_deref(), Some("over"));

    // "atl" sorts first, but the market keeps the home margin.
    let moneyline = store.market("moneyline").unwrap();
    assert_eq!(moneyline.metric_result_value, Some(dec!(3)));
    assert_eq!(moneyline.winning_selection_id.as_deref(), Some("kc"));

    let team_rush = store.market("team_rush").unwrap();
    assert_eq!(team_rush.metric_result_value, Some(dec!(17)));

    let no_show = store.market("no_show").unwrap();
    assert!(!no_show.market_settled);
    assert_eq!(store.selection_result("no_show", "over"), None);

    // Unsupported types are never discovered or touched.
    assert!(!store.market("season").unwrap().market_settled);
    assert_eq!(store.selection_result("season", "over"), None);
}

#[tokio::test]
async fn test_backfill_then_rerun_settles_remaining_market() {
    let store = seeded_store();
    assert_ok!(pipeline(&store, PipelineConfig::new(2024)).run().await);
    assert!(!store.market("no_show").unwrap().market_settled);

    store.add_gamelog(PlayerGamelog {
        esbid: GAME,
        pid: "WR9".into(),
        tm: "KC".into(),
        rec: 2,
        recy: 12,
        ..Default::default()
    });

    // A fresh orchestrator sees the backfilled row; missing_only skips
    // nothing else because the other markets are settled.
    let report = assert_ok!(pipeline(&store, PipelineConfig::new(2024)).run().await);
    assert_eq!(report.selections_processed, 1);
    assert_eq!(report.markets_settled, 1);

    let no_show = store.market("no_show").unwrap();
    assert!(no_show.market_settled);
    assert_eq!(no_show.metric_result_value, Some(dec!(12)));
    assert_eq!(store.selection_result("no_show", "over"), Some(SelectionResult::Won));

    // Nothing left to do.
    let report = assert_ok!(pipeline(&store, PipelineConfig::new(2024)).run().await);
    assert_eq!(report.games_discovered, 0);
}

#[tokio::test]
async fn test_dry_run_leaves_store_untouched() {
    let store = seeded_store();
    let mut config = PipelineConfig::new(2024);
    config.dry_run = true;

    let report = assert_ok!(pipeline(&store, config).run().await);
    assert_eq!(report.preview.len(), 12 + 8);
    assert_eq!(store.writes.load(Ordering::SeqCst), 0);
    assert!(!store.market("total").unwrap().market_settled);
    assert_eq!(store.selection_result("total", "over"), None);
}

#[tokio::test]
async fn test_fetch_failure_skips_game_only() {
    let store = seeded_store();
    store.add_game(game(101, 3, "FINAL"));
    store.add_market("other_total", "GAME_TOTAL", 101, 2024);
    store.add_selection("other_total", "over", None, Some(dec!(40.5)), "OVER");
    store.fail_fetch_for(GAME);

    let mut config = PipelineConfig::new(2024);
    config.fetch_concurrency = 2;
    let report = assert_ok!(pipeline(&store, config).run().await);

    assert_eq!(report.games_discovered, 2);
    assert_eq!(report.game_fetch_errors, 1);
    assert_eq!(report.markets_settled, 1);
    assert!(store.market("other_total").unwrap().market_settled);
    assert!(!store.market("total").unwrap().market_settled);
}

#[tokio::test]
async fn test_write_failure_halts_run() {
    let store = seeded_store();
    store.set_write_error(Some("disk full"));

    let err = assert_err!(pipeline(&store, PipelineConfig::new(2024)).run().await);
    assert!(format!("{err:#}").contains("disk full"));
    assert!(!store.market("total").unwrap().market_settled);
}

#[tokio::test]
async fn test_week_scoping() {
    let store = seeded_store();
    // Week 4 game still in progress: eligible only when week 4 is asked for.
    store.add_game(game(102, 4, "IN_PROGRESS"));
    store.add_market("live_total", "GAME_TOTAL", 102, 2024);
    store.add_selection("live_total", "over", None, Some(dec!(40.5)), "OVER");

    let mut config = PipelineConfig::new(2024);
    config.current_week_only = true;
    let report = assert_ok!(pipeline(&store, config).run().await);
    assert_eq!(report.week, Some(3));
    assert_eq!(report.games_discovered, 1);

    let mut config = PipelineConfig::new(2024);
    config.week = Some(4);
    let report = assert_ok!(pipeline(&store, config).run().await);
    assert_eq!(report.games_discovered, 1);
    // Not final yet, so nothing settles it.
    assert_eq!(report.selections_errored, 1);
    assert!(!store.market("live_total").unwrap().market_settled);
}

#[tokio::test]
async fn test_live_game_in_current_week_stays_open() {
    let store = seeded_store();
    // Kicked off late in week 3 and still running.
    store.add_game(game(103, 3, "IN_PROGRESS"));
    store.add_gamelog(PlayerGamelog {
        esbid: 103,
        pid: "QB7".into(),
        tm: "KC".into(),
        py: 120,
        ..Default::default()
    });
    store.add_plays(vec![Play {
        esbid: 103,
        psr_pid: Some("QB7".into()),
        trg_pid: Some("WR7".into()),
        comp: true,
        ..play(1, 1, "PASS", "KC", "ATL", 20)
    }]);
    store.add_market("live_pass", "GAME_PASSING_YARDS", 103, 2024);
    store.add_selection("live_pass", "under", Some("QB7"), Some(dec!(250.5)), "UNDER");
    store.add_market("live_q1", "GAME_FIRST_QUARTER_PASSING_YARDS", 103, 2024);
    store.add_selection("live_q1", "over", Some("QB7"), Some(dec!(10.5)), "OVER");
    store.add_market("live_team", "GAME_TEAM_PASSING_YARDS", 103, 2024);
    store.add_selection("live_team", "over", Some("KC"), Some(dec!(10.5)), "OVER");

    let mut config = PipelineConfig::new(2024);
    config.current_week_only = true;
    let report = assert_ok!(pipeline(&store, config.clone()).run().await);

    assert_eq!(report.week, Some(3));
    assert_eq!(report.games_discovered, 2);
    assert_eq!(report.selections_processed, 12);
    assert_eq!(report.selections_errored, 1 + 3);
    assert_eq!(report.markets_settled, 8);
    for market in ["live_pass", "live_q1", "live_team"] {
        assert!(!store.market(market).unwrap().market_settled, "{market}");
    }
    assert_eq!(store.selection_result("live_pass", "under"), None);

    // Once the game is final the next pass settles it.
    store.set_status(103, "FINAL");
    let report = assert_ok!(pipeline(&store, config).run().await);
    assert_eq!(report.selections_processed, 3);
    assert_eq!(report.markets_settled, 3);
    assert_eq!(store.selection_result("live_pass", "under"), Some(SelectionResult::Won));
    assert_eq!(store.selection_result("live_q1", "over"), Some(SelectionResult::Won));
    assert_eq!(store.selection_result("live_team", "over"), Some(SelectionResult::Won));
    assert_eq!(store.market("live_pass").unwrap().metric_result_value, Some(dec!(120)));
}

#[tokio::test]
async fn test_prefetch_keeps_calculation_off_the_store() {
    let store = seeded_store();
    let orchestrator = SettlementOrchestrator::with_default_calculators(store.clone());
    orchestrator.prefetch_data_for_games(&[GAME]).await;
    let reads_after_prefetch = store.data_reads.load(Ordering::SeqCst);

    let input = SelectionInput {
        esbid: GAME,
        market_type: "GAME_PASSING_YARDS".into(),
        selection_pid: Some("QB1".into()),
        selection_metric_line: Some(Decimal::from(250)),
        selection_type: "OVER".into(),
    };
    let first = assert_ok!(orchestrator.calculate_market_result(&input).await);
    let second = assert_ok!(orchestrator.calculate_market_result(&input).await);
    assert_eq!(first, second);
    assert_eq!(first.metric_value, dec!(260));
    assert_eq!(store.data_reads.load(Ordering::SeqCst), reads_after_prefetch);

    let stats = orchestrator.cache_stats();
    assert_eq!(stats[&HandlerKind::PlayerGamelog].hits, 2);
    assert_eq!(stats[&HandlerKind::PlayerGamelog].on_demand_loads, 0);
}

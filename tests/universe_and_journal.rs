//! Universe filtering through the orchestrator, cross-asset correlation
//! tracking, and byte-stable journaling.

use chrono::{DateTime, Duration, TimeZone, Utc};
use pairrisk::application::engine::{CycleOutcome, EngineConfig, TradingEngine};
use pairrisk::domain::clock::ManualClock;
use pairrisk::domain::market::MarketSample;
use pairrisk::domain::trading::params::StrategyParameters;
use pairrisk::domain::trading::portfolio::Portfolio;
use pairrisk::domain::trading::types::Prediction;
use pairrisk::infrastructure::journal::Journal;
use rust_decimal_macros::dec;
use std::sync::Arc;

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 31, 12, 0, 0).unwrap()
}

fn params() -> StrategyParameters {
    StrategyParameters {
        max_pairs_to_create: 2,
        total_investment_ratio: 0.9,
        cash_buffer_pct: 0.1,
        max_single_pair_allocation: 0.5,
        ..Default::default()
    }
}

fn seed_symbol(engine: &mut TradingEngine, symbol: &str, price: f64, daily_volume: f64) {
    for i in 0..40 {
        let ts = start() - Duration::minutes(30 * (40 - i));
        let wiggle = if i % 2 == 0 { 1.002 } else { 0.998 };
        let sample = MarketSample::new(
            symbol,
            ts,
            price * wiggle,
            daily_volume / 2.0,
            daily_volume / 2.0,
        );
        engine.ingest_market(sample).unwrap();
    }
    engine
        .ingest_market(MarketSample::new(
            symbol,
            start(),
            price,
            daily_volume / 2.0,
            daily_volume / 2.0,
        ))
        .unwrap();
}

fn prediction(symbol: &str, ret: f64, confidence: f64) -> Prediction {
    Prediction {
        symbol: symbol.to_string(),
        predicted_return: ret,
        confidence,
        model_r2: 0.4,
        volatility_forecast: 0.6,
        timestamp: start(),
    }
}

#[test]
fn thin_symbol_is_excluded_from_pairing() {
    let clock = Arc::new(ManualClock::new(start()));
    let config = EngineConfig {
        params: params(),
        ..Default::default()
    };
    let mut engine = TradingEngine::new(config, clock).unwrap();

    seed_symbol(&mut engine, "BTC", 45_000.0, 150e6);
    seed_symbol(&mut engine, "ETH", 2_500.0, 150e6);
    // THIN trades ~30M USD a day: the liquidity gate takes it out even
    // though its prediction is the juiciest.
    seed_symbol(&mut engine, "THIN", 2.0, 30e6);
    engine.set_portfolio(Portfolio::new(dec!(1000000)), vec![]);
    engine.ingest_predictions(vec![
        prediction("BTC", 0.06, 0.8),
        prediction("ETH", -0.02, 0.6),
        prediction("THIN", 0.10, 0.9),
    ]);

    let outcome = engine.run_cycle();
    assert_eq!(outcome, CycleOutcome::Completed { orders: 2 });
    let orders = engine.orders_out();
    assert!(orders.iter().all(|o| o.symbol != "THIN"));
    assert!(orders.iter().any(|o| o.symbol == "BTC"));
    assert!(orders.iter().any(|o| o.symbol == "ETH"));
}

#[test]
fn negative_news_cloud_excludes_a_symbol() {
    use pairrisk::domain::market::SentimentSample;

    let clock = Arc::new(ManualClock::new(start()));
    let config = EngineConfig {
        params: params(),
        ..Default::default()
    };
    let mut engine = TradingEngine::new(config, clock).unwrap();

    seed_symbol(&mut engine, "BTC", 45_000.0, 150e6);
    seed_symbol(&mut engine, "ETH", 2_500.0, 150e6);
    seed_symbol(&mut engine, "SOL", 150.0, 150e6);

    // A week of heavily negative, well-covered headlines on SOL.
    for day in 24..=30 {
        engine
            .ingest_sentiment(SentimentSample {
                ticker: "SOL".to_string(),
                source: "newswire".to_string(),
                date: chrono::NaiveDate::from_ymd_opt(2024, 3, day).unwrap(),
                article_count: 15,
                avg_sentiment: -0.6,
            })
            .unwrap();
    }

    engine.set_portfolio(Portfolio::new(dec!(1000000)), vec![]);
    engine.ingest_predictions(vec![
        prediction("BTC", 0.06, 0.8),
        prediction("ETH", -0.02, 0.6),
        prediction("SOL", 0.08, 0.9),
    ]);

    engine.run_cycle();
    assert!(engine.orders_out().iter().all(|o| o.symbol != "SOL"));
    assert!(engine.orders_out().iter().any(|o| o.symbol == "BTC"));
}

#[test]
fn correlation_monitor_tracks_cross_asset_pairs() {
    let clock = Arc::new(ManualClock::new(start()));
    let mut engine =
        TradingEngine::new(EngineConfig::default(), clock).unwrap();

    // BTC and SPX co-move tightly; ingesting both feeds the monitor.
    for i in 0..40 {
        let ts = start() - Duration::minutes(30 * (40 - i));
        let wiggle = if i % 3 == 0 { 1.01 } else { 0.995 };
        engine
            .ingest_market(MarketSample::new("BTC", ts, 45_000.0 * wiggle, 80e6, 70e6))
            .unwrap();
        engine
            .ingest_market(MarketSample::new("SPX", ts, 5_000.0 * wiggle, 50e6, 50e6))
            .unwrap();
    }
    engine.set_portfolio(Portfolio::new(dec!(100000)), vec![]);
    engine.run_cycle();

    let snapshots = engine.correlation_monitor().snapshots();
    let btc_spx = snapshots
        .iter()
        .find(|s| s.pair.key() == "BTC/SPX")
        .expect("BTC/SPX is monitored by default");
    assert!(btc_spx.correlation > 0.95);
    assert!(btc_spx.is_significant);
    assert!(btc_spx.sample_size >= 30);
}

#[test]
fn journal_order_records_are_byte_identical_across_runs() {
    let run = |dir: &std::path::Path| {
        let clock = Arc::new(ManualClock::new(start()));
        let config = EngineConfig {
            params: params(),
            ..Default::default()
        };
        let journal = Journal::open(dir).unwrap();
        let mut engine = TradingEngine::new(config, clock).unwrap().with_journal(journal);

        seed_symbol(&mut engine, "BTC", 45_000.0, 150e6);
        seed_symbol(&mut engine, "ADA", 0.5, 150e6);
        engine.set_portfolio(Portfolio::new(dec!(1000000)), vec![]);
        engine.ingest_predictions(vec![
            prediction("BTC", 0.06, 0.8),
            prediction("ADA", -0.02, 0.6),
        ]);
        engine.run_cycle();

        let contents = std::fs::read_to_string(dir.join("journal.jsonl")).unwrap();
        contents
            .lines()
            .filter(|line| line.contains("\"kind\":\"Orders\""))
            .map(String::from)
            .collect::<Vec<String>>()
    };

    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let first = run(dir_a.path());
    let second = run(dir_b.path());

    assert!(!first.is_empty(), "orders should have been journaled");
    assert_eq!(first, second);
}

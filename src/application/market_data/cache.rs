use crate::domain::errors::RiskError;
use crate::domain::market::{MarketSample, SentimentSample};
use crate::domain::stats;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, warn};

/// Bounded price/volume history per symbol.
pub const MARKET_HISTORY_CAPACITY: usize = 250;
/// Bounded sentiment history per symbol.
pub const SENTIMENT_HISTORY_CAPACITY: usize = 30;

#[derive(Debug, Default)]
struct SymbolHistory {
    /// Market samples in timestamp order, oldest first.
    samples: VecDeque<MarketSample>,
    sentiment: VecDeque<SentimentSample>,
}

/// Bounded per-symbol market and sentiment history.
///
/// Written only by the ingestion entry point; every engine reads borrowed
/// views. Insertion is amortized O(1): the buffers trim on every push and a
/// periodic sweep drops anything older than the retention window.
#[derive(Debug, Default)]
pub struct MarketDataCache {
    by_symbol: HashMap<String, SymbolHistory>,
}

impl MarketDataCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert one market sample. Samples are expected in timestamp order per
    /// symbol; a duplicate timestamp replaces the earlier observation instead
    /// of growing the history, and an out-of-order sample is dropped with a
    /// warning.
    pub fn insert_market(&mut self, sample: MarketSample) -> Result<(), RiskError> {
        if !sample.is_valid() {
            return Err(RiskError::invalid_input(format!(
                "rejected market sample for {}: non-finite or negative fields",
                sample.symbol
            )));
        }

        let history = self.by_symbol.entry(sample.symbol.clone()).or_default();

        if let Some(last) = history.samples.back_mut() {
            if sample.timestamp == last.timestamp {
                debug!(symbol = %sample.symbol, "duplicate timestamp, replacing latest sample");
                *last = sample;
                return Ok(());
            }
            if sample.timestamp < last.timestamp {
                warn!(
                    symbol = %sample.symbol,
                    "out-of-order market sample dropped ({} < {})",
                    sample.timestamp,
                    last.timestamp
                );
                return Ok(());
            }
        }

        history.samples.push_back(sample);
        if history.samples.len() > MARKET_HISTORY_CAPACITY {
            history.samples.pop_front();
        }
        Ok(())
    }

    /// Insert one sentiment reading. Deduplicated by (source, date).
    pub fn insert_sentiment(&mut self, sample: SentimentSample) -> Result<(), RiskError> {
        if !sample.is_valid() {
            return Err(RiskError::invalid_input(format!(
                "rejected sentiment sample for {}: sentiment outside [-1, 1]",
                sample.ticker
            )));
        }

        let history = self.by_symbol.entry(sample.ticker.clone()).or_default();

        if let Some(existing) = history
            .sentiment
            .iter_mut()
            .find(|s| s.source == sample.source && s.date == sample.date)
        {
            *existing = sample;
            return Ok(());
        }

        history.sentiment.push_back(sample);
        if history.sentiment.len() > SENTIMENT_HISTORY_CAPACITY {
            history.sentiment.pop_front();
        }
        Ok(())
    }

    pub fn latest(&self, symbol: &str) -> Option<&MarketSample> {
        self.by_symbol.get(symbol)?.samples.back()
    }

    /// Last `n` closes, oldest first.
    pub fn recent_prices(&self, symbol: &str, n: usize) -> Vec<f64> {
        self.map_recent(symbol, n, |s| s.close)
    }

    /// Last `n` total USD volumes, oldest first.
    pub fn recent_volumes(&self, symbol: &str, n: usize) -> Vec<f64> {
        self.map_recent(symbol, n, |s| s.total_volume())
    }

    /// Simple returns over the last `n + 1` closes.
    pub fn recent_returns(&self, symbol: &str, n: usize) -> Vec<f64> {
        stats::returns(&self.recent_prices(symbol, n.saturating_add(1)))
    }

    /// Last `n` sentiment readings, oldest first.
    pub fn recent_sentiment(&self, symbol: &str, n: usize) -> Vec<SentimentSample> {
        let Some(history) = self.by_symbol.get(symbol) else {
            return Vec::new();
        };
        let start = history.sentiment.len().saturating_sub(n);
        history.sentiment.iter().skip(start).cloned().collect()
    }

    /// Closes observed at or after `since`, oldest first.
    pub fn prices_since(&self, symbol: &str, since: DateTime<Utc>) -> Vec<f64> {
        let Some(history) = self.by_symbol.get(symbol) else {
            return Vec::new();
        };
        history
            .samples
            .iter()
            .filter(|s| s.timestamp >= since)
            .map(|s| s.close)
            .collect()
    }

    /// Whether the latest sample for `symbol` is younger than `max_age`
    /// relative to `now`.
    pub fn has_recent(&self, symbol: &str, max_age: Duration, now: DateTime<Utc>) -> bool {
        match self.latest(symbol) {
            Some(sample) => now - sample.timestamp <= max_age,
            None => false,
        }
    }

    /// Drop market and sentiment history older than `retention` behind `now`.
    pub fn sweep_older_than(&mut self, retention: Duration, now: DateTime<Utc>) {
        let cutoff = now - retention;
        let cutoff_date = cutoff.date_naive();
        for history in self.by_symbol.values_mut() {
            while history
                .samples
                .front()
                .is_some_and(|s| s.timestamp < cutoff)
            {
                history.samples.pop_front();
            }
            while history
                .sentiment
                .front()
                .is_some_and(|s| s.date < cutoff_date)
            {
                history.sentiment.pop_front();
            }
        }
        self.by_symbol.retain(|_, h| {
            !h.samples.is_empty() || !h.sentiment.is_empty()
        });
    }

    pub fn symbols(&self) -> Vec<String> {
        let mut out: Vec<String> = self.by_symbol.keys().cloned().collect();
        out.sort();
        out
    }

    pub fn history_len(&self, symbol: &str) -> usize {
        self.by_symbol
            .get(symbol)
            .map_or(0, |h| h.samples.len())
    }

    fn map_recent<F>(&self, symbol: &str, n: usize, f: F) -> Vec<f64>
    where
        F: Fn(&MarketSample) -> f64,
    {
        let Some(history) = self.by_symbol.get(symbol) else {
            return Vec::new();
        };
        let start = history.samples.len().saturating_sub(n);
        history.samples.iter().skip(start).map(f).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, minute, 0).unwrap()
    }

    fn sample(ts: DateTime<Utc>, close: f64) -> MarketSample {
        MarketSample::new("BTC", ts, close, 60e6, 50e6)
    }

    #[test]
    fn test_insert_and_query() {
        let mut cache = MarketDataCache::new();
        cache.insert_market(sample(at(0, 0), 45_000.0)).unwrap();
        cache.insert_market(sample(at(1, 0), 45_500.0)).unwrap();
        cache.insert_market(sample(at(2, 0), 46_000.0)).unwrap();

        assert_eq!(cache.recent_prices("BTC", 2), vec![45_500.0, 46_000.0]);
        assert_eq!(cache.latest("BTC").unwrap().close, 46_000.0);
        assert_eq!(cache.recent_volumes("BTC", 1), vec![110e6]);
        assert!(cache.recent_prices("ETH", 5).is_empty());
    }

    #[test]
    fn test_duplicate_timestamp_does_not_grow_history() {
        let mut cache = MarketDataCache::new();
        cache.insert_market(sample(at(0, 0), 45_000.0)).unwrap();
        cache.insert_market(sample(at(0, 0), 45_100.0)).unwrap();

        assert_eq!(cache.history_len("BTC"), 1);
        // The replacement wins.
        assert_eq!(cache.latest("BTC").unwrap().close, 45_100.0);
    }

    #[test]
    fn test_capacity_is_bounded() {
        let mut cache = MarketDataCache::new();
        for i in 0..300u32 {
            let ts = at(0, 0) + Duration::minutes(i as i64);
            cache.insert_market(sample(ts, 45_000.0 + i as f64)).unwrap();
        }
        assert_eq!(cache.history_len("BTC"), MARKET_HISTORY_CAPACITY);
        // Oldest entries were evicted: the front is sample 50.
        assert_eq!(cache.recent_prices("BTC", 250)[0], 45_050.0);
    }

    #[test]
    fn test_rejects_invalid_sample() {
        let mut cache = MarketDataCache::new();
        let bad = MarketSample::new("BTC", at(0, 0), f64::NAN, 1e6, 1e6);
        assert!(cache.insert_market(bad).is_err());
    }

    #[test]
    fn test_has_recent_uses_latest_sample_age() {
        let mut cache = MarketDataCache::new();
        cache.insert_market(sample(at(0, 0), 45_000.0)).unwrap();

        let now = at(0, 30);
        assert!(cache.has_recent("BTC", Duration::hours(1), now));
        assert!(!cache.has_recent("BTC", Duration::minutes(10), now));
        assert!(!cache.has_recent("ETH", Duration::hours(1), now));
    }

    #[test]
    fn test_sweep_drops_stale_history() {
        let mut cache = MarketDataCache::new();
        cache.insert_market(sample(at(0, 0), 45_000.0)).unwrap();
        cache.insert_market(sample(at(23, 0), 45_500.0)).unwrap();

        let now = at(23, 30) + Duration::days(1);
        cache.sweep_older_than(Duration::hours(24), now);
        // First sample is > 24h old, second survives.
        assert_eq!(cache.history_len("BTC"), 1);
        assert_eq!(cache.latest("BTC").unwrap().close, 45_500.0);
    }

    #[test]
    fn test_sentiment_capacity_and_dedup() {
        let mut cache = MarketDataCache::new();
        for day in 1..=31u32 {
            let reading = SentimentSample {
                ticker: "BTC".to_string(),
                source: "newswire".to_string(),
                date: chrono::NaiveDate::from_ymd_opt(2024, 3, day.min(31)).unwrap(),
                article_count: 8,
                avg_sentiment: 0.1,
            };
            cache.insert_sentiment(reading).unwrap();
        }
        assert_eq!(
            cache.recent_sentiment("BTC", 64).len(),
            SENTIMENT_HISTORY_CAPACITY
        );

        // Same source+date replaces in place.
        let update = SentimentSample {
            ticker: "BTC".to_string(),
            source: "newswire".to_string(),
            date: chrono::NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
            article_count: 20,
            avg_sentiment: -0.4,
        };
        cache.insert_sentiment(update).unwrap();
        let recent = cache.recent_sentiment("BTC", 64);
        assert_eq!(recent.len(), SENTIMENT_HISTORY_CAPACITY);
        assert!((recent.last().unwrap().avg_sentiment + 0.4).abs() < 1e-12);
    }
}

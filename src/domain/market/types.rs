use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Daily volume (USD) above which a venue is considered deep.
pub const DEEP_VOLUME_USD: f64 = 100e6;
/// Daily volume (USD) above which a venue is considered adequate.
pub const ADEQUATE_VOLUME_USD: f64 = 50e6;

/// One market observation for a symbol.
///
/// Bid/ask are not carried; [`MarketSample::estimated_spread`] derives a
/// documented proxy from the volume tier instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSample {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub close: f64,
    /// Volume flowing into the asset (buy side), USD.
    pub volume_from: f64,
    /// Volume flowing out of the asset (sell side), USD.
    pub volume_to: f64,
}

impl MarketSample {
    pub fn new(
        symbol: impl Into<String>,
        timestamp: DateTime<Utc>,
        close: f64,
        volume_from: f64,
        volume_to: f64,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            timestamp,
            close,
            volume_from,
            volume_to,
        }
    }

    /// Net capital flow implied by the directional volumes.
    pub fn net_inflow(&self) -> f64 {
        self.volume_from - self.volume_to
    }

    pub fn total_volume(&self) -> f64 {
        self.volume_from + self.volume_to
    }

    pub fn is_valid(&self) -> bool {
        !self.symbol.is_empty()
            && self.close.is_finite()
            && self.close >= 0.0
            && self.volume_from.is_finite()
            && self.volume_from >= 0.0
            && self.volume_to.is_finite()
            && self.volume_to >= 0.0
    }
}

/// Spread proxy by average daily volume tier. A documented estimate, not a
/// measurement (no order book is available to the core).
pub fn estimated_spread(avg_daily_volume_usd: f64) -> f64 {
    if avg_daily_volume_usd > DEEP_VOLUME_USD {
        0.001
    } else if avg_daily_volume_usd > ADEQUATE_VOLUME_USD {
        0.002
    } else {
        0.005
    }
}

/// Exchange-count proxy, tiered on the same volume breakpoints as the spread.
pub fn estimated_exchange_count(avg_daily_volume_usd: f64) -> u32 {
    if avg_daily_volume_usd > DEEP_VOLUME_USD {
        5
    } else if avg_daily_volume_usd > ADEQUATE_VOLUME_USD {
        3
    } else {
        2
    }
}

/// Article count at which a sentiment reading is considered significant.
pub const SENTIMENT_SIGNIFICANCE_COUNT: u32 = 5;

/// One aggregated news-sentiment observation for a ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentSample {
    pub ticker: String,
    pub source: String,
    pub date: NaiveDate,
    pub article_count: u32,
    /// Average article sentiment in [-1, 1].
    pub avg_sentiment: f64,
}

impl SentimentSample {
    pub fn is_valid(&self) -> bool {
        !self.ticker.is_empty()
            && self.avg_sentiment.is_finite()
            && (-1.0..=1.0).contains(&self.avg_sentiment)
    }

    /// Whether enough articles back this reading to act on it.
    pub fn is_significant(&self) -> bool {
        self.article_count >= SENTIMENT_SIGNIFICANCE_COUNT
    }
}

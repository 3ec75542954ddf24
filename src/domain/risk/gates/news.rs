use crate::domain::risk::alerts::AlertLevel;
use crate::domain::risk::gates::{ExclusionGate, ExclusionReason, GateContext, GateVerdict};
use crate::domain::stats;

#[derive(Debug, Clone)]
pub struct NewsGateConfig {
    /// Recent average sentiment below this excludes the symbol.
    pub negative_sentiment_threshold: f64,
    /// Readings considered "recent" for the negative-news check.
    pub recent_window: usize,
    /// Recent sentiment dispersion above this multiple of its own history
    /// counts as instability.
    pub instability_sigma_multiple: f64,
}

impl Default for NewsGateConfig {
    fn default() -> Self {
        Self {
            negative_sentiment_threshold: -0.3,
            recent_window: 7,
            instability_sigma_multiple: 2.0,
        }
    }
}

/// Excludes symbols under a negative news cloud or with unstable sentiment.
/// Only significant readings (enough articles) are considered. Absent
/// sentiment is no signal: many small assets simply have no coverage, and
/// excluding them all would empty the universe.
pub struct NewsGate {
    config: NewsGateConfig,
}

impl NewsGate {
    pub fn new(config: NewsGateConfig) -> Self {
        Self { config }
    }
}

impl ExclusionGate for NewsGate {
    fn name(&self) -> &'static str {
        "news_sentiment"
    }

    fn assess(&self, ctx: &GateContext<'_>) -> GateVerdict {
        let significant: Vec<f64> = ctx
            .sentiment
            .iter()
            .filter(|s| s.is_significant())
            .map(|s| s.avg_sentiment)
            .collect();

        if significant.is_empty() {
            return GateVerdict::clear(ExclusionReason::NewsEventRisk);
        }

        let recent_start = significant.len().saturating_sub(self.config.recent_window);
        let recent = &significant[recent_start..];
        let recent_avg = stats::mean(recent);

        if recent_avg < self.config.negative_sentiment_threshold {
            return GateVerdict::exclude(
                AlertLevel::Warning,
                ExclusionReason::NewsEventRisk,
                0.5,
                format!(
                    "{}: recent sentiment {:.2} below {:.2}",
                    ctx.symbol, recent_avg, self.config.negative_sentiment_threshold
                ),
            );
        }

        // Instability: recent dispersion against the full history's.
        if recent_start >= 2 && recent.len() >= 2 {
            let recent_sigma = stats::std_dev(recent);
            let history_sigma = stats::std_dev(&significant[..recent_start]);
            if history_sigma > f64::EPSILON
                && recent_sigma > self.config.instability_sigma_multiple * history_sigma
            {
                return GateVerdict::exclude(
                    AlertLevel::Warning,
                    ExclusionReason::NewsEventRisk,
                    0.3,
                    format!(
                        "{}: sentiment dispersion {:.2} vs historical {:.2}",
                        ctx.symbol, recent_sigma, history_sigma
                    ),
                );
            }
        }

        GateVerdict::clear(ExclusionReason::NewsEventRisk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::data_quality::DataQuality;
    use crate::domain::market::SentimentSample;
    use chrono::NaiveDate;

    fn reading(day: u32, sentiment: f64, articles: u32) -> SentimentSample {
        SentimentSample {
            ticker: "BTC".to_string(),
            source: "newswire".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 3, day).unwrap(),
            article_count: articles,
            avg_sentiment: sentiment,
        }
    }

    fn ctx<'a>(sentiment: &'a [SentimentSample]) -> GateContext<'a> {
        GateContext {
            symbol: "BTC",
            prices: &[],
            volumes: &[],
            sentiment,
            prediction: None,
            recent_model_failure: false,
            volatility_quality: DataQuality::Measured,
        }
    }

    #[test]
    fn test_negative_news_excludes() {
        let readings: Vec<_> = (1..=7).map(|d| reading(d, -0.5, 12)).collect();
        let verdict = NewsGate::new(Default::default()).assess(&ctx(&readings));
        assert!(verdict.should_exclude);
        assert_eq!(verdict.reason, ExclusionReason::NewsEventRisk);
    }

    #[test]
    fn test_insignificant_articles_are_ignored() {
        // Heavily negative but below the article-count significance bar.
        let readings: Vec<_> = (1..=7).map(|d| reading(d, -0.9, 2)).collect();
        let verdict = NewsGate::new(Default::default()).assess(&ctx(&readings));
        assert!(!verdict.should_exclude);
    }

    #[test]
    fn test_no_coverage_is_no_signal() {
        let verdict = NewsGate::new(Default::default()).assess(&ctx(&[]));
        assert!(!verdict.should_exclude);
    }

    #[test]
    fn test_sentiment_instability_excludes() {
        // Ten near-steady days then a violent week of swings.
        let mut readings: Vec<_> = (1..=10)
            .map(|d| reading(d, if d % 2 == 0 { 0.10 } else { 0.12 }, 10))
            .collect();
        for (i, d) in (11..=17).enumerate() {
            readings.push(reading(d, if i % 2 == 0 { 0.9 } else { -0.2 }, 10));
        }
        let verdict = NewsGate::new(Default::default()).assess(&ctx(&readings));
        assert!(verdict.should_exclude);
        assert!(verdict.message.contains("dispersion"));
    }
}

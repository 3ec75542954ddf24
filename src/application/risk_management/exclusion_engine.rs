use crate::application::market_data::MarketDataCache;
use crate::domain::data_quality::DataQuality;
use crate::domain::risk::gates::{
    ConfidenceGate, ConfidenceGateConfig, ExclusionGate, ExclusionReason, GateContext,
    GateVerdict, LiquidityGate, LiquidityGateConfig, NewsGate, NewsGateConfig, TechnicalGate,
    TechnicalGateConfig, VolatilityGate, VolatilityGateConfig,
};
use crate::domain::trading::types::Prediction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info};

/// Lookback windows for the per-gate context views.
#[derive(Debug, Clone)]
pub struct ExclusionConfig {
    pub liquidity_lookback_days: usize,
    pub volatility_lookback_days: usize,
    pub sentiment_lookback: usize,
    pub liquidity: LiquidityGateConfig,
    pub volatility: VolatilityGateConfig,
    pub confidence: ConfidenceGateConfig,
    pub technical: TechnicalGateConfig,
    pub news: NewsGateConfig,
}

impl Default for ExclusionConfig {
    fn default() -> Self {
        Self {
            liquidity_lookback_days: 7,
            volatility_lookback_days: 30,
            sentiment_lookback: 30,
            liquidity: LiquidityGateConfig::default(),
            volatility: VolatilityGateConfig::default(),
            confidence: ConfidenceGateConfig::default(),
            technical: TechnicalGateConfig::default(),
            news: NewsGateConfig::default(),
        }
    }
}

/// Full assessment of one symbol across all five gates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolAssessment {
    pub symbol: String,
    pub is_excluded: bool,
    /// Composite score: clipped sum of the gate contributions, [0, 1].
    pub exclusion_score: f64,
    pub verdicts: Vec<GateVerdict>,
    pub assessed_at: DateTime<Utc>,
}

impl SymbolAssessment {
    pub fn active_reasons(&self) -> Vec<ExclusionReason> {
        self.verdicts
            .iter()
            .filter(|v| v.should_exclude)
            .map(|v| v.reason)
            .collect()
    }

    /// The firing verdict with the largest score contribution.
    pub fn dominant_verdict(&self) -> Option<&GateVerdict> {
        self.verdicts
            .iter()
            .filter(|v| v.should_exclude)
            .max_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal))
    }
}

/// Summary across the last batch assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExclusionDiagnostics {
    pub total_assessed: usize,
    pub excluded: usize,
    /// Exclusion counts per reason, sorted by reason name for stable output.
    pub reason_counts: BTreeMap<String, usize>,
    pub last_assessment: Option<DateTime<Utc>>,
}

/// Multi-criterion filter deciding which assets may enter a pair.
///
/// A symbol is excluded iff any gate fires; the composite score aggregates
/// how much of the gate budget fired. Gates only see borrowed views of the
/// market cache.
pub struct ExclusionEngine {
    config: ExclusionConfig,
    liquidity: LiquidityGate,
    volatility: VolatilityGate,
    confidence: ConfidenceGate,
    technical: TechnicalGate,
    news: NewsGate,
    /// Symbols flagged by model validation as recently failing.
    model_failures: HashSet<String>,
    last_assessments: HashMap<String, SymbolAssessment>,
    last_batch_at: Option<DateTime<Utc>>,
}

impl ExclusionEngine {
    pub fn new(config: ExclusionConfig) -> Self {
        Self {
            liquidity: LiquidityGate::new(config.liquidity.clone()),
            volatility: VolatilityGate::new(config.volatility.clone()),
            confidence: ConfidenceGate::new(config.confidence.clone()),
            technical: TechnicalGate::new(config.technical.clone()),
            news: NewsGate::new(config.news.clone()),
            model_failures: HashSet::new(),
            last_assessments: HashMap::new(),
            last_batch_at: None,
            config,
        }
    }

    /// Record a model-validation failure for a symbol; the confidence gate
    /// excludes it until the flag is cleared.
    pub fn flag_model_failure(&mut self, symbol: &str) {
        self.model_failures.insert(symbol.to_string());
    }

    pub fn clear_model_failure(&mut self, symbol: &str) {
        self.model_failures.remove(symbol);
    }

    /// Assess one symbol against every gate.
    pub fn assess(
        &mut self,
        symbol: &str,
        cache: &MarketDataCache,
        prediction: Option<&Prediction>,
        now: DateTime<Utc>,
    ) -> SymbolAssessment {
        // One extra price so the 30-day window yields 30 returns.
        let prices =
            cache.recent_prices(symbol, self.config.volatility_lookback_days + 1);
        let volumes = cache.recent_volumes(symbol, self.config.liquidity_lookback_days);
        let sentiment = cache.recent_sentiment(symbol, self.config.sentiment_lookback);

        let volatility_quality =
            if prices.len() <= self.config.volatility.min_observations {
                DataQuality::Defaulted
            } else {
                DataQuality::Measured
            };

        let ctx = GateContext {
            symbol,
            prices: &prices,
            volumes: &volumes,
            sentiment: &sentiment,
            prediction,
            recent_model_failure: self.model_failures.contains(symbol),
            volatility_quality,
        };

        let verdicts = vec![
            self.liquidity.assess(&ctx),
            self.volatility.assess(&ctx),
            self.confidence.assess(&ctx),
            self.technical.assess(&ctx),
            self.news.assess(&ctx),
        ];

        let is_excluded = verdicts.iter().any(|v| v.should_exclude);
        let exclusion_score = verdicts
            .iter()
            .map(|v| v.score)
            .sum::<f64>()
            .clamp(0.0, 1.0);

        if is_excluded {
            debug!(
                symbol,
                score = exclusion_score,
                reasons = ?verdicts.iter().filter(|v| v.should_exclude).map(|v| v.reason).collect::<Vec<_>>(),
                "symbol excluded from pairing universe"
            );
        }

        let assessment = SymbolAssessment {
            symbol: symbol.to_string(),
            is_excluded,
            exclusion_score,
            verdicts,
            assessed_at: now,
        };
        self.last_assessments
            .insert(symbol.to_string(), assessment.clone());
        assessment
    }

    /// Filter a candidate list, returning the survivors in input order.
    pub fn filter_universe(
        &mut self,
        candidates: &[String],
        cache: &MarketDataCache,
        predictions: &HashMap<String, Prediction>,
        now: DateTime<Utc>,
    ) -> Vec<String> {
        let mut survivors = Vec::with_capacity(candidates.len());
        for symbol in candidates {
            let assessment = self.assess(symbol, cache, predictions.get(symbol), now);
            if !assessment.is_excluded {
                survivors.push(symbol.clone());
            }
        }
        self.last_batch_at = Some(now);
        info!(
            candidates = candidates.len(),
            survivors = survivors.len(),
            "exclusion filter applied"
        );
        survivors
    }

    pub fn last_assessment(&self, symbol: &str) -> Option<&SymbolAssessment> {
        self.last_assessments.get(symbol)
    }

    pub fn diagnostics(&self) -> ExclusionDiagnostics {
        let mut reason_counts: BTreeMap<String, usize> = BTreeMap::new();
        let mut excluded = 0;
        for assessment in self.last_assessments.values() {
            if assessment.is_excluded {
                excluded += 1;
                for reason in assessment.active_reasons() {
                    *reason_counts.entry(format!("{reason:?}")).or_default() += 1;
                }
            }
        }
        ExclusionDiagnostics {
            total_assessed: self.last_assessments.len(),
            excluded,
            reason_counts,
            last_assessment: self.last_batch_at,
        }
    }
}

impl Default for ExclusionEngine {
    fn default() -> Self {
        Self::new(ExclusionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::MarketSample;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 31, 0, 0, 0).unwrap()
    }

    fn prediction(symbol: &str, confidence: f64) -> Prediction {
        Prediction {
            symbol: symbol.to_string(),
            predicted_return: 0.03,
            confidence,
            model_r2: 0.5,
            volatility_forecast: 0.6,
            timestamp: now(),
        }
    }

    /// Healthy history: deep volume, mild volatility.
    fn seed_healthy(cache: &mut MarketDataCache, symbol: &str) {
        for i in 0..40 {
            let ts = now() - Duration::days(40 - i);
            let wiggle = if i % 2 == 0 { 1.004 } else { 0.996 };
            let sample =
                MarketSample::new(symbol, ts, 45_000.0 * wiggle, 80e6, 70e6);
            cache.insert_market(sample).unwrap();
        }
    }

    /// Thin history: ~30M USD daily volume.
    fn seed_thin(cache: &mut MarketDataCache, symbol: &str) {
        for i in 0..40 {
            let ts = now() - Duration::days(40 - i);
            let wiggle = if i % 2 == 0 { 1.004 } else { 0.996 };
            let sample = MarketSample::new(symbol, ts, 2.0 * wiggle, 16e6, 14e6);
            cache.insert_market(sample).unwrap();
        }
    }

    #[test]
    fn test_healthy_symbol_survives() {
        let mut cache = MarketDataCache::new();
        seed_healthy(&mut cache, "BTC");
        let mut engine = ExclusionEngine::default();
        let p = prediction("BTC", 0.8);
        let assessment = engine.assess("BTC", &cache, Some(&p), now());
        assert!(!assessment.is_excluded, "verdicts: {:?}", assessment.verdicts);
        assert_eq!(assessment.exclusion_score, 0.0);
    }

    #[test]
    fn test_thin_symbol_excluded_for_liquidity() {
        let mut cache = MarketDataCache::new();
        seed_thin(&mut cache, "THIN");
        let mut engine = ExclusionEngine::default();
        let p = prediction("THIN", 0.8);
        let assessment = engine.assess("THIN", &cache, Some(&p), now());
        assert!(assessment.is_excluded);
        assert!(assessment.exclusion_score >= 0.7);
        assert_eq!(
            assessment.dominant_verdict().unwrap().reason,
            ExclusionReason::LiquidityCrisis
        );
    }

    #[test]
    fn test_unknown_symbol_errs_toward_exclusion() {
        let cache = MarketDataCache::new();
        let mut engine = ExclusionEngine::default();
        let assessment = engine.assess("GHOST", &cache, None, now());
        assert!(assessment.is_excluded);
        assert!(assessment
            .active_reasons()
            .contains(&ExclusionReason::MissingData));
    }

    #[test]
    fn test_model_failure_flag_round_trip() {
        let mut cache = MarketDataCache::new();
        seed_healthy(&mut cache, "BTC");
        let mut engine = ExclusionEngine::default();
        let p = prediction("BTC", 0.9);

        engine.flag_model_failure("BTC");
        assert!(engine.assess("BTC", &cache, Some(&p), now()).is_excluded);

        engine.clear_model_failure("BTC");
        assert!(!engine.assess("BTC", &cache, Some(&p), now()).is_excluded);
    }

    #[test]
    fn test_filter_universe_and_diagnostics() {
        let mut cache = MarketDataCache::new();
        seed_healthy(&mut cache, "BTC");
        seed_healthy(&mut cache, "ETH");
        seed_thin(&mut cache, "THIN");

        let mut engine = ExclusionEngine::default();
        let predictions: HashMap<String, Prediction> = ["BTC", "ETH", "THIN"]
            .iter()
            .map(|s| (s.to_string(), prediction(s, 0.8)))
            .collect();

        let candidates = vec![
            "BTC".to_string(),
            "ETH".to_string(),
            "THIN".to_string(),
        ];
        let survivors = engine.filter_universe(&candidates, &cache, &predictions, now());
        assert_eq!(survivors, vec!["BTC".to_string(), "ETH".to_string()]);

        let diag = engine.diagnostics();
        assert_eq!(diag.total_assessed, 3);
        assert_eq!(diag.excluded, 1);
        assert_eq!(diag.reason_counts.get("LiquidityCrisis"), Some(&1));
    }
}

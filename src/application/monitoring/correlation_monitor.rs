use crate::domain::stats;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use super::MonitorEvent;

/// A crypto/traditional pair whose co-movement the monitor tracks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossAssetPair {
    pub crypto_symbol: String,
    pub traditional_symbol: String,
    pub description: String,
}

impl CrossAssetPair {
    pub fn new(crypto: &str, traditional: &str, description: &str) -> Self {
        Self {
            crypto_symbol: crypto.to_string(),
            traditional_symbol: traditional.to_string(),
            description: description.to_string(),
        }
    }

    pub fn key(&self) -> String {
        format!("{}/{}", self.crypto_symbol, self.traditional_symbol)
    }
}

/// Default pairs of interest for a crypto book hedged against macro moves.
pub fn default_pairs() -> Vec<CrossAssetPair> {
    vec![
        CrossAssetPair::new("BTC", "SPX", "Bitcoin vs S&P 500"),
        CrossAssetPair::new("BTC", "GLD", "Bitcoin vs Gold"),
        CrossAssetPair::new("BTC", "DXY", "Bitcoin vs US Dollar Index"),
        CrossAssetPair::new("BTC", "VIX", "Bitcoin vs Volatility Index"),
        CrossAssetPair::new("ETH", "SPX", "Ethereum vs S&P 500"),
        CrossAssetPair::new("ETH", "GLD", "Ethereum vs Gold"),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationSnapshot {
    pub pair: CrossAssetPair,
    pub correlation: f64,
    pub correlation_3d: f64,
    pub correlation_7d: f64,
    pub correlation_30d: f64,
    /// Two-sided p-value from the Fisher transform.
    pub p_value: f64,
    /// Change of the correlation against its own history, in sigmas.
    pub z_score: f64,
    pub sample_size: usize,
    /// p < significance level (default 0.05).
    pub is_significant: bool,
    pub correlation_spike: bool,
    pub regime_change: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StressSignalKind {
    CorrelationSpike,
    RegimeChange,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketStressSignal {
    pub kind: StressSignalKind,
    pub affected_pairs: Vec<String>,
    /// Signal strength in [0, 1].
    pub magnitude: f64,
    pub description: String,
    /// Suggested scaling of portfolio risk while the signal is active.
    pub portfolio_risk_multiplier: f64,
    pub recommended_actions: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// Broad market regime inferred from cross-asset correlations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketRegime {
    RiskOn,
    RiskOff,
    Decoupling,
    Neutral,
}

#[derive(Debug, Clone)]
pub struct CorrelationMonitorConfig {
    /// Z-score threshold for a correlation spike.
    pub spike_threshold: f64,
    /// Mean |rho| level whose crossing flags a regime change.
    pub regime_threshold: f64,
    /// Significance level for the Fisher-transform test.
    pub significance_level: f64,
    /// Correlation observations retained per pair for z-scores and regimes.
    pub history_capacity: usize,
}

impl Default for CorrelationMonitorConfig {
    fn default() -> Self {
        Self {
            spike_threshold: 2.0,
            regime_threshold: 0.3,
            significance_level: 0.05,
            history_capacity: 90,
        }
    }
}

/// Rolling cross-asset correlation monitor.
///
/// The monitor is owned by the orchestrator and updated between cycle
/// stages; readers take snapshots by value. An optional background task
/// only emits refresh ticks, never touches state.
pub struct CorrelationMonitor {
    config: CorrelationMonitorConfig,
    monitored_pairs: Vec<CrossAssetPair>,
    correlation_history: HashMap<String, VecDeque<f64>>,
    latest_snapshots: Vec<CorrelationSnapshot>,
    stress_signals: Vec<MarketStressSignal>,
    market_stress: f64,
    last_update: Option<DateTime<Utc>>,
}

impl CorrelationMonitor {
    pub fn new(config: CorrelationMonitorConfig) -> Self {
        Self {
            config,
            monitored_pairs: default_pairs(),
            correlation_history: HashMap::new(),
            latest_snapshots: Vec::new(),
            stress_signals: Vec::new(),
            market_stress: 0.0,
            last_update: None,
        }
    }

    pub fn add_pair(&mut self, pair: CrossAssetPair) {
        if !self.monitored_pairs.contains(&pair) {
            self.monitored_pairs.push(pair);
        }
    }

    pub fn remove_pair(&mut self, crypto: &str, traditional: &str) {
        self.monitored_pairs
            .retain(|p| !(p.crypto_symbol == crypto && p.traditional_symbol == traditional));
    }

    pub fn monitored_pairs(&self) -> &[CrossAssetPair] {
        &self.monitored_pairs
    }

    /// Recompute all pair correlations from the provided return series
    /// (oldest first, daily). Series the caller cannot supply are skipped
    /// with a warning.
    pub fn update_correlations(
        &mut self,
        returns_by_symbol: &HashMap<String, Vec<f64>>,
        now: DateTime<Utc>,
    ) {
        let mut snapshots = Vec::with_capacity(self.monitored_pairs.len());
        let pairs = self.monitored_pairs.clone();
        let regime_threshold = self.config.regime_threshold;
        let spike_threshold = self.config.spike_threshold;

        for pair in &pairs {
            let (Some(crypto), Some(traditional)) = (
                returns_by_symbol.get(&pair.crypto_symbol),
                returns_by_symbol.get(&pair.traditional_symbol),
            ) else {
                warn!(pair = %pair.key(), "missing return series, skipping correlation");
                continue;
            };

            let n = crypto.len().min(traditional.len());
            if n < 3 {
                debug!(pair = %pair.key(), samples = n, "too few samples for correlation");
                continue;
            }

            let correlation = stats::correlation(crypto, traditional);
            let window = |days: usize| {
                let take = days.min(n);
                stats::correlation(&crypto[n - take..n], &traditional[n - take..n])
            };

            let history = self
                .correlation_history
                .entry(pair.key())
                .or_default();

            let z_score = correlation_change_z(correlation, history);
            let spike = z_score.abs() > spike_threshold;
            let regime_change = detect_regime_change(history, correlation, regime_threshold);

            let p_value = fisher_p_value(correlation, n);

            history.push_back(correlation);
            if history.len() > self.config.history_capacity {
                history.pop_front();
            }

            snapshots.push(CorrelationSnapshot {
                pair: pair.clone(),
                correlation,
                correlation_3d: window(3),
                correlation_7d: window(7),
                correlation_30d: window(30),
                p_value,
                z_score,
                sample_size: n,
                is_significant: p_value < self.config.significance_level,
                correlation_spike: spike,
                regime_change,
                timestamp: now,
            });
        }

        self.latest_snapshots = snapshots;
        self.last_update = Some(now);
        self.refresh_stress_signals(now);
        info!(
            pairs = self.latest_snapshots.len(),
            stress = self.market_stress,
            "correlation monitor updated"
        );
    }

    fn refresh_stress_signals(&mut self, now: DateTime<Utc>) {
        let mut signals = Vec::new();

        let spiked: Vec<String> = self
            .latest_snapshots
            .iter()
            .filter(|s| s.correlation_spike)
            .map(|s| s.pair.key())
            .collect();
        if !spiked.is_empty() {
            signals.push(MarketStressSignal {
                kind: StressSignalKind::CorrelationSpike,
                magnitude: (spiked.len() as f64 / self.monitored_pairs.len().max(1) as f64)
                    .clamp(0.0, 1.0),
                description: format!("correlation spike on {}", spiked.join(", ")),
                affected_pairs: spiked,
                portfolio_risk_multiplier: 0.7,
                recommended_actions: vec![
                    "reduce gross exposure".to_string(),
                    "re-run stress suite".to_string(),
                ],
                timestamp: now,
            });
        }

        let regime_shifted: Vec<String> = self
            .latest_snapshots
            .iter()
            .filter(|s| s.regime_change)
            .map(|s| s.pair.key())
            .collect();
        if !regime_shifted.is_empty() {
            signals.push(MarketStressSignal {
                kind: StressSignalKind::RegimeChange,
                magnitude: (regime_shifted.len() as f64 / self.monitored_pairs.len().max(1) as f64)
                    .clamp(0.0, 1.0),
                description: format!("correlation regime change on {}", regime_shifted.join(", ")),
                affected_pairs: regime_shifted,
                portfolio_risk_multiplier: 0.8,
                recommended_actions: vec!["review pair hedges".to_string()],
                timestamp: now,
            });
        }

        self.stress_signals = signals;
        self.market_stress = self.compute_market_stress();
    }

    /// Fraction of pairs with an active spike or regime event, blended with
    /// the mean |z| relative to twice the spike threshold, clipped to [0, 1].
    fn compute_market_stress(&self) -> f64 {
        if self.latest_snapshots.is_empty() {
            return 0.0;
        }
        let n = self.latest_snapshots.len() as f64;
        let event_fraction = self
            .latest_snapshots
            .iter()
            .filter(|s| s.correlation_spike || s.regime_change)
            .count() as f64
            / n;
        let mean_abs_z =
            self.latest_snapshots.iter().map(|s| s.z_score.abs()).sum::<f64>() / n;
        let z_component = (mean_abs_z / (2.0 * self.config.spike_threshold)).clamp(0.0, 1.0);
        (0.6 * event_fraction + 0.4 * z_component).clamp(0.0, 1.0)
    }

    /// Classify the broad regime from BTC/SPX, BTC/GLD and the VIX level.
    pub fn market_regime(&self, vix_level: Option<f64>) -> MarketRegime {
        let corr = |crypto: &str, traditional: &str| {
            self.latest_snapshots
                .iter()
                .find(|s| {
                    s.pair.crypto_symbol == crypto && s.pair.traditional_symbol == traditional
                })
                .map(|s| s.correlation)
        };

        let btc_spx = corr("BTC", "SPX");
        let btc_gld = corr("BTC", "GLD");

        match (btc_spx, btc_gld, vix_level) {
            (Some(spx), _, Some(vix)) if spx > 0.5 && vix > 25.0 => MarketRegime::RiskOff,
            (Some(spx), _, Some(vix)) if spx > 0.3 && vix < 20.0 => MarketRegime::RiskOn,
            (Some(spx), Some(gld), _) if spx < -0.2 && gld < -0.2 => MarketRegime::Decoupling,
            _ => MarketRegime::Neutral,
        }
    }

    pub fn snapshots(&self) -> &[CorrelationSnapshot] {
        &self.latest_snapshots
    }

    pub fn stress_signals(&self) -> &[MarketStressSignal] {
        &self.stress_signals
    }

    /// Aggregate market stress in [0, 1].
    pub fn market_stress(&self) -> f64 {
        self.market_stress
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }

    /// Immutable correlation matrix snapshot over the given symbols, built
    /// from the provided return series. Unknown pairs fall back to zero.
    pub fn correlation_matrix(
        returns_by_symbol: &HashMap<String, Vec<f64>>,
        symbols: &[String],
    ) -> HashMap<(String, String), f64> {
        let mut matrix = HashMap::new();
        for (i, a) in symbols.iter().enumerate() {
            for b in symbols.iter().skip(i) {
                let rho = if a == b {
                    1.0
                } else {
                    match (returns_by_symbol.get(a), returns_by_symbol.get(b)) {
                        (Some(ra), Some(rb)) => stats::correlation(ra, rb),
                        _ => 0.0,
                    }
                };
                matrix.insert((a.clone(), b.clone()), rho);
                if a != b {
                    matrix.insert((b.clone(), a.clone()), rho);
                }
            }
        }
        matrix
    }
}

impl Default for CorrelationMonitor {
    fn default() -> Self {
        Self::new(CorrelationMonitorConfig::default())
    }
}

/// Mean |rho| of the pair history crossing the regime threshold in either
/// direction once the candidate observation is appended.
fn detect_regime_change(history: &VecDeque<f64>, candidate: f64, threshold: f64) -> bool {
    if history.len() < 5 {
        return false;
    }
    let abs_values: Vec<f64> = history.iter().map(|r| r.abs()).collect();
    let prev_mean = stats::mean(&abs_values);
    let new_mean =
        (prev_mean * abs_values.len() as f64 + candidate.abs()) / (abs_values.len() + 1) as f64;
    (prev_mean <= threshold && new_mean > threshold)
        || (prev_mean >= threshold && new_mean < threshold)
}

/// Change of the latest correlation against its own history, in sigmas.
fn correlation_change_z(current: f64, history: &VecDeque<f64>) -> f64 {
    if history.len() < 5 {
        return 0.0;
    }
    let values: Vec<f64> = history.iter().copied().collect();
    let sigma = stats::std_dev(&values);
    if sigma <= f64::EPSILON {
        return 0.0;
    }
    let Some(&previous) = values.last() else {
        return 0.0;
    };
    (current - previous) / sigma
}

/// Two-sided p-value for rho != 0 via the Fisher transform.
fn fisher_p_value(correlation: f64, sample_size: usize) -> f64 {
    if sample_size < 4 {
        return 1.0;
    }
    let clamped = correlation.clamp(-0.999_999, 0.999_999);
    let z = clamped.atanh() * ((sample_size - 3) as f64).sqrt();
    2.0 * (1.0 - stats::normal_cdf(z.abs()))
}

/// Spawn a background task that emits a refresh tick on every interval until
/// the stop flag is raised. The flag is observed between ticks (cooperative
/// cancellation); the task never mutates monitor state.
pub fn spawn_refresh_task(
    interval: std::time::Duration,
    stop: Arc<AtomicBool>,
    events: UnboundedSender<MonitorEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately; skip it so the cadence starts
        // one interval after spawn.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if stop.load(Ordering::Relaxed) {
                info!("correlation refresh task stopping");
                break;
            }
            if events
                .send(MonitorEvent::CorrelationRefreshDue { at: Utc::now() })
                .is_err()
            {
                break;
            }
        }
    })
}

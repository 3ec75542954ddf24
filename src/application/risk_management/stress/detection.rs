use crate::application::market_data::MarketDataCache;
use crate::application::monitoring::{CorrelationMonitor, MonitorEvent};
use crate::domain::market::types::estimated_spread;
use crate::domain::stats;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

use super::protection::{
    plan_with_reduction_cap, ProtectionAction, ProtectionActionType, ProtectionPlan,
    DEFAULT_MAX_AUTOMATIC_REDUCTION,
};

/// Thresholds and windows for real-time stress detection.
#[derive(Debug, Clone)]
pub struct StressDetectionConfig {
    /// Drop within the flash-crash window that trips the detector (negative).
    pub flash_crash_threshold: f64,
    pub flash_crash_window: Duration,
    /// Recent / historical volatility ratio that trips the detector.
    pub volatility_spike_factor: f64,
    /// Returns in the "recent" volatility window.
    pub volatility_window: usize,
    /// Mean |rho| across monitored pairs that trips the detector.
    pub correlation_spike_threshold: f64,
    /// Current / baseline estimated spread ratio that trips the detector.
    pub liquidity_dryup_threshold: f64,
    /// Cap on automatic position reduction per cycle.
    pub max_automatic_reduction: f64,
}

impl Default for StressDetectionConfig {
    fn default() -> Self {
        Self {
            flash_crash_threshold: -0.10,
            flash_crash_window: Duration::minutes(15),
            volatility_spike_factor: 2.0,
            volatility_window: 12,
            correlation_spike_threshold: 0.8,
            liquidity_dryup_threshold: 3.0,
            max_automatic_reduction: DEFAULT_MAX_AUTOMATIC_REDUCTION,
        }
    }
}

/// Snapshot of the detectors at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressDetectionResult {
    pub stress_detected: bool,
    pub flash_crash_detected: bool,
    pub volatility_spike_detected: bool,
    pub correlation_spike_detected: bool,
    pub liquidity_crisis_detected: bool,
    /// Overall intensity in [0, 1].
    pub stress_intensity: f64,
    pub affected_assets: Vec<String>,
    pub recommended_actions: Vec<ProtectionAction>,
    pub details: Vec<String>,
    pub detected_at: DateTime<Utc>,
}

impl StressDetectionResult {
    pub fn quiet(now: DateTime<Utc>) -> Self {
        Self {
            stress_detected: false,
            flash_crash_detected: false,
            volatility_spike_detected: false,
            correlation_spike_detected: false,
            liquidity_crisis_detected: false,
            stress_intensity: 0.0,
            affected_assets: Vec::new(),
            recommended_actions: Vec::new(),
            details: Vec::new(),
            detected_at: now,
        }
    }

    /// Split the recommendations into auto-executable and queued actions
    /// under the configured reduction cap.
    pub fn protection_plan(&self, max_automatic_reduction: f64) -> ProtectionPlan {
        plan_with_reduction_cap(self.recommended_actions.clone(), max_automatic_reduction)
    }
}

/// Real-time market stress detector over the cache and correlation monitor.
pub struct StressDetector {
    config: StressDetectionConfig,
}

impl StressDetector {
    pub fn new(config: StressDetectionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StressDetectionConfig {
        &self.config
    }

    pub fn detect(
        &self,
        cache: &MarketDataCache,
        correlations: &CorrelationMonitor,
        now: DateTime<Utc>,
    ) -> StressDetectionResult {
        let mut result = StressDetectionResult::quiet(now);
        let mut crash_magnitude: f64 = 0.0;
        let mut spike_magnitude: f64 = 0.0;
        let mut dryup_magnitude: f64 = 0.0;

        for symbol in cache.symbols() {
            // Flash crash: peak-to-trough drop inside the window.
            let window_prices = cache.prices_since(&symbol, now - self.config.flash_crash_window);
            if let Some(drop) = peak_to_trough(&window_prices) {
                if drop < self.config.flash_crash_threshold {
                    result.flash_crash_detected = true;
                    result.affected_assets.push(symbol.clone());
                    crash_magnitude = crash_magnitude
                        .max((drop / self.config.flash_crash_threshold).min(3.0) / 3.0);
                    result.details.push(format!(
                        "{symbol}: {:.1}% drop within the flash-crash window",
                        drop * 100.0
                    ));
                }
            }

            // Volatility spike: recent window vs the full cached history.
            let returns = cache.recent_returns(&symbol, 240);
            if returns.len() > self.config.volatility_window * 2 {
                let recent_start = returns.len() - self.config.volatility_window;
                let recent_vol = stats::std_dev(&returns[recent_start..]);
                let baseline_vol = stats::std_dev(&returns[..recent_start]);
                if baseline_vol > f64::EPSILON {
                    let ratio = recent_vol / baseline_vol;
                    if ratio > self.config.volatility_spike_factor {
                        result.volatility_spike_detected = true;
                        if !result.affected_assets.contains(&symbol) {
                            result.affected_assets.push(symbol.clone());
                        }
                        spike_magnitude = spike_magnitude
                            .max((ratio / self.config.volatility_spike_factor).min(3.0) / 3.0);
                        result
                            .details
                            .push(format!("{symbol}: volatility {ratio:.1}x baseline"));
                    }
                }
            }

            // Liquidity dry-up: spread proxy vs the 30-day baseline tier.
            let recent_volumes = cache.recent_volumes(&symbol, 3);
            let baseline_volumes = cache.recent_volumes(&symbol, 30);
            if !recent_volumes.is_empty() && baseline_volumes.len() >= 10 {
                let current_spread = estimated_spread(stats::mean(&recent_volumes));
                let baseline_spread = estimated_spread(stats::mean(&baseline_volumes));
                let ratio = current_spread / baseline_spread;
                if ratio > self.config.liquidity_dryup_threshold {
                    result.liquidity_crisis_detected = true;
                    if !result.affected_assets.contains(&symbol) {
                        result.affected_assets.push(symbol.clone());
                    }
                    dryup_magnitude = dryup_magnitude
                        .max((ratio / self.config.liquidity_dryup_threshold).min(3.0) / 3.0);
                    result
                        .details
                        .push(format!("{symbol}: spread {ratio:.1}x baseline"));
                }
            }
        }

        // Correlation spike: mean |rho| across the monitored pairs.
        let snapshots = correlations.snapshots();
        if !snapshots.is_empty() {
            let mean_abs_rho = snapshots
                .iter()
                .map(|s| s.correlation.abs())
                .sum::<f64>()
                / snapshots.len() as f64;
            if mean_abs_rho > self.config.correlation_spike_threshold {
                result.correlation_spike_detected = true;
                result.details.push(format!(
                    "mean |rho| {mean_abs_rho:.2} above {:.2}",
                    self.config.correlation_spike_threshold
                ));
            }
        }

        let corr_magnitude = if result.correlation_spike_detected {
            0.6
        } else {
            0.0
        };
        let triggered = [
            result.flash_crash_detected,
            result.volatility_spike_detected,
            result.correlation_spike_detected,
            result.liquidity_crisis_detected,
        ]
        .iter()
        .filter(|t| **t)
        .count();

        result.stress_detected = triggered > 0;
        if result.stress_detected {
            let breadth = triggered as f64 / 4.0;
            let depth = crash_magnitude
                .max(spike_magnitude)
                .max(dryup_magnitude)
                .max(corr_magnitude);
            result.stress_intensity = (0.5 * breadth + 0.5 * depth).clamp(0.0, 1.0);
            result.recommended_actions = self.recommend(&result);
            warn!(
                intensity = result.stress_intensity,
                flash = result.flash_crash_detected,
                vol = result.volatility_spike_detected,
                corr = result.correlation_spike_detected,
                liq = result.liquidity_crisis_detected,
                "market stress detected"
            );
        }
        result
    }

    fn recommend(&self, detection: &StressDetectionResult) -> Vec<ProtectionAction> {
        let mut actions = Vec::new();

        if detection.flash_crash_detected {
            actions.push(
                ProtectionAction::new(
                    ProtectionActionType::ReducePositions,
                    (0.2_f64).max(detection.stress_intensity * 0.5),
                    1,
                    "cut exposure into the crash",
                )
                .targeting(detection.affected_assets.clone())
                .within_minutes(5),
            );
            actions.push(
                ProtectionAction::new(
                    ProtectionActionType::ActivateStopLosses,
                    1.0,
                    2,
                    "arm stop-losses on open positions",
                )
                .targeting(detection.affected_assets.clone()),
            );
        }
        if detection.volatility_spike_detected {
            actions.push(ProtectionAction::new(
                ProtectionActionType::RebalanceConservative,
                detection.stress_intensity,
                3,
                "shift to the conservative allocation",
            ));
        }
        if detection.liquidity_crisis_detected {
            actions.push(ProtectionAction::new(
                ProtectionActionType::StopTrading,
                1.0,
                2,
                "halt order flow while spreads are dislocated",
            ));
        }
        if detection.correlation_spike_detected {
            actions.push(ProtectionAction::new(
                ProtectionActionType::IncreaseCash,
                0.5 * detection.stress_intensity + 0.2,
                4,
                "raise cash while diversification is impaired",
            ));
        }
        actions.push(
            ProtectionAction::new(
                ProtectionActionType::NotifyOperators,
                1.0,
                9,
                "notify operators of detected stress",
            )
            .within_minutes(1),
        );
        actions
    }
}

impl Default for StressDetector {
    fn default() -> Self {
        Self::new(StressDetectionConfig::default())
    }
}

/// Largest peak-to-trough decline over the window, as a negative fraction.
fn peak_to_trough(prices: &[f64]) -> Option<f64> {
    if prices.len() < 2 {
        return None;
    }
    let mut peak = prices[0];
    let mut worst = 0.0_f64;
    for &price in &prices[1..] {
        if price > peak {
            peak = price;
        } else if peak > 0.0 {
            worst = worst.min(price / peak - 1.0);
        }
    }
    Some(worst)
}

/// Background tick task for the stress scan, mirroring the correlation
/// refresh task: emits events, observes the stop flag between ticks.
pub fn spawn_scan_task(
    interval: std::time::Duration,
    stop: Arc<AtomicBool>,
    events: UnboundedSender<MonitorEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if stop.load(Ordering::Relaxed) {
                info!("stress scan task stopping");
                break;
            }
            if events
                .send(MonitorEvent::StressScanDue { at: Utc::now() })
                .is_err()
            {
                break;
            }
        }
    })
}

use crate::application::market_data::MarketDataCache;
use crate::application::monitoring::{
    CorrelationMonitor, CorrelationMonitorConfig, MonitorEvent,
};
use crate::application::risk_management::exclusion_engine::{ExclusionConfig, ExclusionEngine};
use crate::application::risk_management::stress::{
    ProtectionAction, StressDetectionConfig, StressDetector, StressEngine, StressHorizon,
    StressResult, StressScenario, StressSeverity,
};
use crate::application::risk_management::var::{
    Methodology, MethodologyKind, ParametricConfig, VaRConfidence, VaREngine, VaRHorizon,
    VaRInputs, VaRResult,
};
use crate::config::CoreConfig;
use crate::application::trading::execution::SimulatedExecutor;
use crate::application::trading::order_planner::{OrderPlan, OrderPlanner};
use crate::application::trading::pairing::PairingEngine;
use crate::domain::clock::Clock;
use crate::domain::errors::{ParameterError, RiskError};
use crate::domain::market::{MarketSample, SentimentSample};
use crate::domain::risk::alerts::{AlertKind, AlertLevel, RiskAlert};
use crate::domain::trading::params::{StrategyParameters, TrsRiskParameters};
use crate::domain::trading::portfolio::{Portfolio, Position};
use crate::domain::trading::types::{OrderStatus, OrderType, Prediction, TradeOrder};
use crate::infrastructure::journal::{Journal, JournalRecord, RecordKind};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Consecutive cycle errors that trip the emergency stop.
const EMERGENCY_ERROR_THRESHOLD: u32 = 3;
/// Market data older than this is swept from the cache.
const CACHE_RETENTION_HOURS: i64 = 24;
/// Return observations fed to the correlation monitor and VaR engine.
const RETURN_LOOKBACK: usize = 30;

/// Orchestrator configuration, assembled by the caller at startup.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub params: StrategyParameters,
    pub trs: TrsRiskParameters,
    pub exclusion: ExclusionConfig,
    pub detection: StressDetectionConfig,
    pub correlation: CorrelationMonitorConfig,
    /// Seed for deterministic Monte Carlo; forwarded from the environment.
    pub rng_seed: Option<u64>,
    /// Whether an emergency stop also closes all pairs.
    pub close_pairs_on_emergency: bool,
}

/// What one cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Orders were produced (possibly zero after filtering).
    Completed { orders: usize },
    /// Market data too thin or stale to trade on.
    SkippedUnhealthy,
    /// No rebalance trigger fired.
    SkippedNoRebalance,
    /// Planned orders failed the cost gate.
    SkippedCostGate,
    /// A critical alert is blocking new pair formation.
    SkippedRiskBlocked,
    /// The engine is halted by the emergency stop.
    Halted,
    /// The cycle failed; state was isolated and the error counted.
    Errored,
}

/// Engine health snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Health {
    pub healthy: bool,
    pub warnings: Vec<String>,
}

/// The trading orchestrator: exclusive owner of all mutable engine state.
///
/// One `run_cycle` call is indivisible from the caller's point of view.
/// Background monitors communicate only through the event channel, drained
/// between stages; engines receive read-only views and return values.
pub struct TradingEngine {
    params: StrategyParameters,
    close_pairs_on_emergency: bool,
    rng_seed: Option<u64>,
    clock: Arc<dyn Clock>,

    cache: MarketDataCache,
    correlation_monitor: CorrelationMonitor,
    exclusion: ExclusionEngine,
    pairing: PairingEngine,
    planner: OrderPlanner,
    executor: SimulatedExecutor,
    var_engine: VaREngine,
    stress_engine: StressEngine,
    stress_detector: StressDetector,

    portfolio: Portfolio,
    predictions: Vec<Prediction>,

    latest_var: Option<VaRResult>,
    latest_stress: Vec<StressResult>,
    active_alerts: Vec<RiskAlert>,
    pending_confirmation: Vec<ProtectionAction>,
    cycle_orders: Vec<TradeOrder>,
    order_history: Vec<TradeOrder>,

    last_rebalance: Option<DateTime<Utc>>,
    emergency_stop: bool,
    emergency_reason: Option<String>,
    emergency_close_done: bool,
    trading_blocked: bool,
    consecutive_errors: u32,
    cycle_id: u64,

    journal: Option<Journal>,
    monitor_tx: UnboundedSender<MonitorEvent>,
    monitor_rx: UnboundedReceiver<MonitorEvent>,
}

impl TradingEngine {
    pub fn new(config: EngineConfig, clock: Arc<dyn Clock>) -> Result<Self, ParameterError> {
        config.params.validate()?;
        let (monitor_tx, monitor_rx) = unbounded_channel();
        Ok(Self {
            pairing: PairingEngine::new(config.params.clone()),
            planner: OrderPlanner::new(config.params.clone()),
            executor: SimulatedExecutor::new(),
            var_engine: VaREngine::new(config.trs.clone()),
            stress_engine: StressEngine::new(config.trs),
            stress_detector: StressDetector::new(config.detection),
            exclusion: ExclusionEngine::new(config.exclusion),
            correlation_monitor: CorrelationMonitor::new(config.correlation),
            cache: MarketDataCache::new(),
            portfolio: Portfolio::default(),
            predictions: Vec::new(),
            latest_var: None,
            latest_stress: Vec::new(),
            active_alerts: Vec::new(),
            pending_confirmation: Vec::new(),
            cycle_orders: Vec::new(),
            order_history: Vec::new(),
            last_rebalance: None,
            emergency_stop: false,
            emergency_reason: None,
            emergency_close_done: false,
            trading_blocked: false,
            consecutive_errors: 0,
            cycle_id: 0,
            journal: None,
            monitor_tx,
            monitor_rx,
            close_pairs_on_emergency: config.close_pairs_on_emergency,
            rng_seed: config.rng_seed,
            params: config.params,
            clock,
        })
    }

    /// Build an engine from the startup environment: the journal opens
    /// under the configured data root and a configured RNG seed makes
    /// Monte Carlo reproducible.
    pub fn from_core_config(
        core: &CoreConfig,
        mut config: EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        let journal = Journal::open(&core.data_root)?;
        config.rng_seed = core.rng_seed.or(config.rng_seed);
        let engine = Self::new(config, clock)?;
        Ok(engine.with_journal(journal))
    }

    /// Attach a journal; cycles then persist params, orders, VaR, stress
    /// and alert records.
    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Sender half for background monitor tasks.
    pub fn monitor_sender(&self) -> UnboundedSender<MonitorEvent> {
        self.monitor_tx.clone()
    }

    // === inbound interface ===

    pub fn ingest_market(&mut self, sample: MarketSample) -> Result<(), RiskError> {
        self.cache.insert_market(sample)
    }

    pub fn ingest_sentiment(&mut self, sample: SentimentSample) -> Result<(), RiskError> {
        self.cache.insert_sentiment(sample)
    }

    pub fn ingest_predictions(&mut self, predictions: Vec<Prediction>) {
        let (valid, invalid): (Vec<Prediction>, Vec<Prediction>) =
            predictions.into_iter().partition(|p| p.is_valid());
        if !invalid.is_empty() {
            warn!(dropped = invalid.len(), "dropped invalid predictions");
        }
        self.predictions = valid;
    }

    pub fn set_portfolio(&mut self, mut portfolio: Portfolio, positions: Vec<Position>) {
        for position in positions {
            portfolio
                .positions
                .insert(position.symbol.clone(), position);
        }
        self.portfolio = portfolio;
    }

    /// Validated wholesale; an invalid set is rejected and the previous
    /// parameters stay in force.
    pub fn set_strategy_parameters(
        &mut self,
        params: StrategyParameters,
    ) -> Result<(), ParameterError> {
        params.validate()?;
        self.pairing.set_parameters(params.clone());
        self.planner.set_parameters(params.clone());
        self.params = params;
        let now = self.clock.now();
        self.journal_record(RecordKind::Params, &self.params.clone(), now);
        Ok(())
    }

    pub fn activate_emergency_stop(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        error!(%reason, "emergency stop activated");
        self.emergency_stop = true;
        self.emergency_close_done = false;
        self.emergency_reason = Some(reason.clone());
        let now = self.clock.now();
        let alert = RiskAlert::new(
            AlertLevel::Emergency,
            AlertKind::EmergencyStop,
            reason,
            1.0,
            now,
        );
        self.journal_record(RecordKind::Alert, &alert, now);
        self.active_alerts.push(alert);
    }

    pub fn clear_emergency_stop(&mut self) {
        self.emergency_stop = false;
        self.emergency_reason = None;
        self.emergency_close_done = false;
        self.consecutive_errors = 0;
        self.active_alerts
            .retain(|a| a.kind != AlertKind::EmergencyStop);
        info!("emergency stop cleared");
    }

    // === outbound interface ===

    /// Orders produced by the most recent cycle.
    pub fn orders_out(&self) -> &[TradeOrder] {
        &self.cycle_orders
    }

    pub fn order_history(&self) -> &[TradeOrder] {
        &self.order_history
    }

    pub fn latest_var(&self) -> Option<&VaRResult> {
        self.latest_var.as_ref()
    }

    pub fn latest_stress(&self) -> &[StressResult] {
        &self.latest_stress
    }

    pub fn active_alerts(&self) -> &[RiskAlert] {
        &self.active_alerts
    }

    /// Protection actions queued for human confirmation.
    pub fn pending_confirmation(&self) -> &[ProtectionAction] {
        &self.pending_confirmation
    }

    pub fn portfolio(&self) -> &Portfolio {
        &self.portfolio
    }

    pub fn correlation_monitor(&self) -> &CorrelationMonitor {
        &self.correlation_monitor
    }

    pub fn health(&self) -> Health {
        let mut warnings = Vec::new();
        if self.emergency_stop {
            warnings.push(format!(
                "emergency stop active: {}",
                self.emergency_reason.as_deref().unwrap_or("unspecified")
            ));
        }
        if self.cache.symbols().is_empty() {
            warnings.push("no market data".to_string());
        } else {
            let now = self.clock.now();
            for symbol in self.cache.symbols() {
                if !self
                    .cache
                    .has_recent(&symbol, Duration::hours(CACHE_RETENTION_HOURS), now)
                {
                    warnings.push(format!("stale market data for {symbol}"));
                }
            }
        }
        if self.consecutive_errors > 0 {
            warnings.push(format!(
                "{} consecutive cycle errors",
                self.consecutive_errors
            ));
        }
        Health {
            healthy: warnings.is_empty(),
            warnings,
        }
    }

    // === the cycle ===

    pub fn run_cycle(&mut self) -> CycleOutcome {
        let now = self.clock.now();
        self.cycle_id += 1;
        self.cycle_orders.clear();
        self.drain_monitor_events(now);

        if self.emergency_stop {
            if self.close_pairs_on_emergency && !self.emergency_close_done {
                self.close_all_pairs(now);
                self.emergency_close_done = true;
            }
            info!(cycle = self.cycle_id, "cycle halted by emergency stop");
            return CycleOutcome::Halted;
        }

        match self.try_cycle(now) {
            Ok(outcome) => {
                self.consecutive_errors = 0;
                outcome
            }
            Err(err) => {
                self.consecutive_errors += 1;
                error!(
                    cycle = self.cycle_id,
                    errors = self.consecutive_errors,
                    %err,
                    "cycle failed"
                );
                if self.consecutive_errors >= EMERGENCY_ERROR_THRESHOLD {
                    self.activate_emergency_stop(format!(
                        "{EMERGENCY_ERROR_THRESHOLD} consecutive cycle errors, last: {err}"
                    ));
                }
                CycleOutcome::Errored
            }
        }
    }

    fn try_cycle(&mut self, now: DateTime<Utc>) -> Result<CycleOutcome, RiskError> {
        self.cache
            .sweep_older_than(Duration::hours(CACHE_RETENTION_HOURS), now);

        let health = self.health();
        if !health.healthy {
            warn!(warnings = ?health.warnings, "skipping cycle, engine unhealthy");
            return Ok(CycleOutcome::SkippedUnhealthy);
        }

        let prices = self.current_prices();
        self.portfolio.mark_equity(&prices);
        let drawdown = self.portfolio.current_drawdown(&prices);

        if drawdown >= self.params.portfolio_drawdown_stop {
            self.activate_emergency_stop(format!(
                "portfolio drawdown {:.1}% crossed the {:.1}% stop",
                drawdown * 100.0,
                self.params.portfolio_drawdown_stop * 100.0
            ));
            if self.close_pairs_on_emergency {
                self.close_all_pairs(now);
                self.emergency_close_done = true;
            }
            return Ok(CycleOutcome::Halted);
        }

        self.refresh_correlations(now);

        if self.trading_blocked {
            // Risk state from the previous cycle forbids new pairs; keep
            // monitoring and let the block clear when alerts do.
            self.update_risk_state(&prices, now);
            if self.trading_blocked {
                return Ok(CycleOutcome::SkippedRiskBlocked);
            }
        }

        // Filter -> pair -> allocate -> targets.
        let prediction_map: HashMap<String, Prediction> = self
            .predictions
            .iter()
            .map(|p| (p.symbol.clone(), p.clone()))
            .collect();
        let candidates: Vec<String> = {
            let mut symbols: Vec<String> = prediction_map.keys().cloned().collect();
            symbols.sort();
            symbols
        };
        let survivors =
            self.exclusion
                .filter_universe(&candidates, &self.cache, &prediction_map, now);
        let surviving_predictions: Vec<Prediction> = survivors
            .iter()
            .filter_map(|s| prediction_map.get(s).cloned())
            .collect();

        let float_prices: HashMap<String, f64> = prices
            .iter()
            .map(|(s, p)| (s.clone(), p.to_f64().unwrap_or(0.0)))
            .collect();
        let (pairs, targets) = self
            .pairing
            .build_targets(&surviving_predictions, &float_prices);
        info!(
            cycle = self.cycle_id,
            predictions = self.predictions.len(),
            survivors = survivors.len(),
            pairs = pairs.len(),
            "universe filtered and paired"
        );

        let current_weights = self.portfolio.current_weights(&prices);
        let decision =
            self.planner
                .should_rebalance(now, self.last_rebalance, &current_weights, &targets, drawdown);
        if !decision.should_rebalance {
            self.update_risk_state(&prices, now);
            return Ok(CycleOutcome::SkippedNoRebalance);
        }
        if decision.is_emergency {
            warn!(reasons = ?decision.reasons, "emergency rebalance");
        }

        // Plan, protect the buffer, gate on cost, execute.
        let portfolio_value = self.portfolio.total_equity(&prices);
        let slippage: HashMap<String, f64> = float_prices
            .keys()
            .map(|s| {
                let volumes = self.cache.recent_volumes(s, 7);
                let avg = if volumes.is_empty() {
                    0.0
                } else {
                    volumes.iter().sum::<f64>() / volumes.len() as f64
                };
                (s.clone(), crate::domain::market::types::estimated_spread(avg) / 2.0)
            })
            .collect();

        let cycle_id = self.cycle_id;
        let mut seq = 0u32;
        let mut plan: OrderPlan = self.planner.plan_orders(
            &targets,
            &current_weights,
            &prices,
            portfolio_value,
            &slippage,
            now,
            || {
                seq += 1;
                order_id(cycle_id, seq)
            },
        );
        self.planner.enforce_cash_buffer(
            &mut plan.orders,
            self.portfolio.cash,
            portfolio_value,
            &prices,
        );

        if !decision.is_emergency && !plan.passes_cost_gate(&self.params) {
            info!(
                benefit = plan.expected_benefit,
                cost = plan.expected_cost,
                "cost gate blocked the rebalance"
            );
            self.update_risk_state(&prices, now);
            return Ok(CycleOutcome::SkippedCostGate);
        }

        let mut orders = plan.orders;
        let summary = self.executor.execute_batch(&mut orders, &prices, now);
        for order in &orders {
            self.apply_fill(order);
        }
        info!(
            cycle = self.cycle_id,
            filled = summary.filled,
            rejected = summary.rejected,
            "orders executed"
        );

        self.last_rebalance = Some(now);
        self.journal_record(RecordKind::Orders, &orders, now);
        self.order_history.extend(orders.iter().cloned());
        let order_count = orders.len();
        self.cycle_orders = orders;

        self.update_risk_state(&prices, now);
        Ok(CycleOutcome::Completed {
            orders: order_count,
        })
    }

    /// Compare all four VaR methodologies on the current book. Monte Carlo
    /// uses the configured seed, so the comparison is reproducible.
    pub fn var_multi_method(&self) -> BTreeMap<MethodologyKind, VaRResult> {
        let now = self.clock.now();
        let prices = self.current_prices();
        let Some((assets, weights, value)) = self.gross_exposure(&prices) else {
            return BTreeMap::new();
        };
        let returns = self.return_series();
        let inputs = VaRInputs {
            assets: &assets,
            weights: &weights,
            returns_by_symbol: &returns,
            portfolio_value: value,
        };
        self.var_engine.calculate_multi_method(
            VaRConfidence::P95,
            VaRHorizon::Daily,
            &inputs,
            self.rng_seed,
            now,
        )
    }

    /// Run the full stress suite against the current book. Exposed for
    /// callers that want more than the per-cycle detection pass.
    pub fn run_stress_suite(
        &mut self,
        severity: StressSeverity,
        horizon: StressHorizon,
    ) -> Vec<StressResult> {
        let now = self.clock.now();
        let prices = self.current_prices();
        let Some((assets, weights, value)) = self.gross_exposure(&prices) else {
            return Vec::new();
        };
        let returns = self.return_series();
        let inputs = VaRInputs {
            assets: &assets,
            weights: &weights,
            returns_by_symbol: &returns,
            portfolio_value: value,
        };
        let results = self.stress_engine.run_comprehensive(
            &self.var_engine,
            severity,
            horizon,
            &inputs,
            now,
        );
        self.latest_stress = results.values().cloned().collect();
        for result in self.latest_stress.clone() {
            self.journal_record(RecordKind::Stress, &result, now);
        }
        self.latest_stress.clone()
    }

    /// Run one named or custom scenario.
    pub fn run_stress_scenario(
        &mut self,
        scenario: &StressScenario,
        severity: StressSeverity,
        horizon: StressHorizon,
    ) -> Result<StressResult, RiskError> {
        let now = self.clock.now();
        let prices = self.current_prices();
        let (assets, weights, value) = self
            .gross_exposure(&prices)
            .ok_or_else(|| RiskError::invalid_input("no positions to stress"))?;
        let returns = self.return_series();
        let inputs = VaRInputs {
            assets: &assets,
            weights: &weights,
            returns_by_symbol: &returns,
            portfolio_value: value,
        };
        let result = self.stress_engine.run_scenario(
            &self.var_engine,
            scenario,
            severity,
            horizon,
            &inputs,
            now,
        )?;
        self.journal_record(RecordKind::Stress, &result, now);
        Ok(result)
    }

    // === internals ===

    fn drain_monitor_events(&mut self, now: DateTime<Utc>) {
        while let Ok(event) = self.monitor_rx.try_recv() {
            match event {
                MonitorEvent::CorrelationRefreshDue { .. } => self.refresh_correlations(now),
                MonitorEvent::StressScanDue { .. } => {
                    let prices = self.current_prices();
                    self.run_stress_detection(&prices, now);
                }
            }
        }
    }

    fn refresh_correlations(&mut self, now: DateTime<Utc>) {
        let returns = self.return_series();
        self.correlation_monitor.update_correlations(&returns, now);
    }

    fn return_series(&self) -> HashMap<String, Vec<f64>> {
        self.cache
            .symbols()
            .into_iter()
            .map(|symbol| {
                let series = self.cache.recent_returns(&symbol, RETURN_LOOKBACK);
                (symbol, series)
            })
            .collect()
    }

    fn current_prices(&self) -> HashMap<String, Decimal> {
        self.cache
            .symbols()
            .into_iter()
            .filter_map(|symbol| {
                self.cache.latest(&symbol).and_then(|sample| {
                    Decimal::from_f64(sample.close).map(|price| (symbol, price))
                })
            })
            .collect()
    }

    /// Gross exposure of the current book as non-negative normalized
    /// weights, for the VaR and stress engines.
    fn gross_exposure(
        &self,
        prices: &HashMap<String, Decimal>,
    ) -> Option<(Vec<String>, Vec<f64>, f64)> {
        let value = self.portfolio.total_equity(prices).to_f64().unwrap_or(0.0);
        if value <= 0.0 || self.portfolio.positions.is_empty() {
            return None;
        }
        let mut entries: Vec<(String, f64)> = self
            .portfolio
            .positions
            .values()
            .filter_map(|position| {
                let price = prices
                    .get(&position.symbol)
                    .copied()
                    .unwrap_or(position.average_price);
                let notional = position.notional(price).to_f64().unwrap_or(0.0);
                (notional > 0.0).then(|| (position.symbol.clone(), notional))
            })
            .collect();
        if entries.is_empty() {
            return None;
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        let gross: f64 = entries.iter().map(|(_, n)| n).sum();
        let assets: Vec<String> = entries.iter().map(|(s, _)| s.clone()).collect();
        let weights: Vec<f64> = entries.iter().map(|(_, n)| n / gross).collect();
        Some((assets, weights, value))
    }

    fn update_risk_state(&mut self, prices: &HashMap<String, Decimal>, now: DateTime<Utc>) {
        let mut alerts = Vec::new();

        if let Some((assets, weights, value)) = self.gross_exposure(prices) {
            let returns = self.return_series();
            let inputs = VaRInputs {
                assets: &assets,
                weights: &weights,
                returns_by_symbol: &returns,
                portfolio_value: value,
            };
            match self.var_engine.calculate(
                &Methodology::Parametric(ParametricConfig::default()),
                VaRConfidence::P95,
                VaRHorizon::Daily,
                &inputs,
                now,
            ) {
                Ok(result) => {
                    alerts.extend(self.var_engine.check_risk_limits(&result, now));
                    if !result.is_valid {
                        // Surface, never block pair formation on its own.
                        alerts.push(RiskAlert::new(
                            AlertLevel::Warning,
                            AlertKind::VarLimitBreach,
                            format!(
                                "VaR result failed validation: {}",
                                result.warnings.join("; ")
                            ),
                            0.5,
                            now,
                        ));
                    }
                    self.journal_record(RecordKind::VaR, &result, now);
                    self.latest_var = Some(result);
                }
                Err(err) => {
                    warn!(%err, "VaR calculation failed, isolated from the cycle");
                    alerts.push(RiskAlert::new(
                        AlertLevel::Warning,
                        AlertKind::DataGap,
                        format!("VaR unavailable: {err}"),
                        0.3,
                        now,
                    ));
                }
            }
        }

        self.run_stress_detection(prices, now);

        // Keep the emergency alert (if any) and replace the rest.
        let emergency: Vec<RiskAlert> = self
            .active_alerts
            .drain(..)
            .filter(|a| a.kind == AlertKind::EmergencyStop)
            .collect();
        self.active_alerts = emergency;
        for alert in &alerts {
            self.journal_record(RecordKind::Alert, alert, now);
        }
        self.active_alerts.extend(alerts);
        self.trading_blocked = self
            .active_alerts
            .iter()
            .any(|a| a.blocks_trading() && a.kind != AlertKind::EmergencyStop);
    }

    fn run_stress_detection(&mut self, _prices: &HashMap<String, Decimal>, now: DateTime<Utc>) {
        let detection = self
            .stress_detector
            .detect(&self.cache, &self.correlation_monitor, now);
        if !detection.stress_detected {
            return;
        }
        let plan = detection
            .protection_plan(self.stress_detector.config().max_automatic_reduction);
        if !plan.requires_confirmation.is_empty() {
            self.pending_confirmation
                .extend(plan.requires_confirmation.iter().cloned());
        }
        let alert = RiskAlert::new(
            AlertLevel::Critical,
            AlertKind::VolatilityRegimeChange,
            format!("market stress detected: {}", detection.details.join("; ")),
            detection.stress_intensity,
            now,
        )
        .with_assets(detection.affected_assets.clone())
        .with_actions(
            plan.automatic
                .iter()
                .map(|a| a.description.clone())
                .collect(),
        );
        self.journal_record(RecordKind::Alert, &alert, now);
        self.active_alerts.push(alert);
    }

    /// Close positions without ever taking cash below the buffer. Longs
    /// close first (they raise cash); shorts close largest-first while the
    /// buy-back leaves the buffer intact. Residual positions remain.
    fn close_all_pairs(&mut self, now: DateTime<Utc>) {
        let prices = self.current_prices();
        let portfolio_value = self.portfolio.total_equity(&prices);
        let buffer = portfolio_value
            * Decimal::from_f64(self.params.cash_buffer_pct).unwrap_or(Decimal::ZERO);

        let mut positions: Vec<Position> = self.portfolio.positions.values().cloned().collect();
        // Longs first, then shorts, largest notional first within each side.
        positions.sort_by(|a, b| {
            let side = a.is_short().cmp(&b.is_short());
            let pa = prices.get(&a.symbol).copied().unwrap_or(a.average_price);
            let pb = prices.get(&b.symbol).copied().unwrap_or(b.average_price);
            side.then(b.notional(pb).cmp(&a.notional(pa)))
        });

        let mut orders = Vec::new();
        let mut projected_cash = self.portfolio.cash;
        let mut seq = 0u32;
        for position in positions {
            let Some(&price) = prices.get(&position.symbol) else {
                warn!(symbol = %position.symbol, "no price, cannot close position");
                continue;
            };
            let cash_delta = position.quantity * price;
            if position.is_short() && projected_cash + cash_delta < buffer {
                warn!(
                    symbol = %position.symbol,
                    "leaving residual short open, buy-back would breach the cash buffer"
                );
                continue;
            }
            projected_cash += cash_delta;
            seq += 1;
            orders.push(TradeOrder {
                id: order_id(self.cycle_id, 9_000 + seq),
                symbol: position.symbol.clone(),
                order_type: if position.is_short() {
                    OrderType::MarketBuy
                } else {
                    OrderType::MarketSell
                },
                status: OrderStatus::Pending,
                quantity: -position.quantity,
                limit_price: Decimal::ZERO,
                executed_quantity: Decimal::ZERO,
                average_fill_price: Decimal::ZERO,
                created_at: now,
                executed_at: None,
                reason: "emergency close".to_string(),
                expected_slippage: 0.0,
                estimated_cost: Decimal::ZERO,
                is_rebalance: false,
                is_risk_control: true,
            });
        }

        let summary = self.executor.execute_batch(&mut orders, &prices, now);
        for order in &orders {
            self.apply_fill(order);
        }
        info!(
            closed = summary.filled,
            residual = self.portfolio.positions.len(),
            cash = %self.portfolio.cash,
            "emergency close complete"
        );
        self.journal_record(RecordKind::Orders, &orders, now);
        self.order_history.extend(orders.iter().cloned());
        self.cycle_orders.extend(orders);
    }

    fn apply_fill(&mut self, order: &TradeOrder) {
        if order.status != OrderStatus::Filled {
            return;
        }
        let fill_value = order.executed_quantity * order.average_fill_price;
        self.portfolio.cash -= fill_value;

        let position = self
            .portfolio
            .positions
            .entry(order.symbol.clone())
            .or_insert_with(|| Position {
                symbol: order.symbol.clone(),
                quantity: Decimal::ZERO,
                average_price: Decimal::ZERO,
            });

        let old_quantity = position.quantity;
        let new_quantity = old_quantity + order.executed_quantity;
        let same_direction = (old_quantity >= Decimal::ZERO) == (order.executed_quantity >= Decimal::ZERO);
        if old_quantity == Decimal::ZERO || same_direction {
            // Extending: blend the average entry price.
            let old_cost = old_quantity * position.average_price;
            if new_quantity != Decimal::ZERO {
                position.average_price = (old_cost + fill_value) / new_quantity;
            }
        } else {
            // Reducing or flipping: realize P&L on the closed quantity.
            let closed = old_quantity.abs().min(order.executed_quantity.abs());
            let direction = if old_quantity > Decimal::ZERO {
                Decimal::ONE
            } else {
                -Decimal::ONE
            };
            self.portfolio.realized_pnl +=
                closed * (order.average_fill_price - position.average_price) * direction;
            if new_quantity != Decimal::ZERO && (new_quantity > Decimal::ZERO) != (old_quantity > Decimal::ZERO) {
                position.average_price = order.average_fill_price;
            }
        }
        position.quantity = new_quantity;
        if position.quantity == Decimal::ZERO {
            self.portfolio.positions.remove(&order.symbol);
        }
    }

    fn journal_record<T: serde::Serialize>(
        &mut self,
        kind: RecordKind,
        payload: &T,
        now: DateTime<Utc>,
    ) {
        let Some(journal) = self.journal.as_mut() else {
            return;
        };
        match JournalRecord::new(self.cycle_id, now, kind, payload)
            .and_then(|record| journal.append(&record))
        {
            Ok(()) => {}
            Err(err) => warn!(%err, "journal append failed"),
        }
    }
}

/// Deterministic, totally ordered order id: cycle and sequence prefix for
/// ordering, a v5 UUID for global uniqueness.
fn order_id(cycle_id: u64, seq: u32) -> String {
    let uuid = Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("pairrisk-order-{cycle_id}-{seq}").as_bytes(),
    );
    format!("{cycle_id:06}-{seq:04}-{uuid}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::clock::ManualClock;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 31, 12, 0, 0).unwrap()
    }

    fn engine_with_clock() -> (TradingEngine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start()));
        let engine = TradingEngine::new(EngineConfig::default(), clock.clone()).unwrap();
        (engine, clock)
    }

    #[test]
    fn test_order_ids_are_deterministic_and_ordered() {
        let a = order_id(3, 1);
        let b = order_id(3, 2);
        let c = order_id(4, 1);
        assert_eq!(a, order_id(3, 1));
        assert!(a < b && b < c);
    }

    #[test]
    fn test_rejects_invalid_parameters() {
        let clock = Arc::new(ManualClock::new(start()));
        let config = EngineConfig {
            params: StrategyParameters {
                cash_buffer_pct: 0.5,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(TradingEngine::new(config, clock).is_err());
    }

    #[test]
    fn test_empty_engine_is_unhealthy_and_skips() {
        let (mut engine, _clock) = engine_with_clock();
        let health = engine.health();
        assert!(!health.healthy);
        assert_eq!(engine.run_cycle(), CycleOutcome::SkippedUnhealthy);
        assert!(engine.orders_out().is_empty());
        assert!(engine.active_alerts().is_empty());
    }

    #[test]
    fn test_set_parameters_validates() {
        let (mut engine, _clock) = engine_with_clock();
        let bad = StrategyParameters {
            total_investment_ratio: 0.99,
            ..Default::default()
        };
        assert!(engine.set_strategy_parameters(bad).is_err());
        assert!(engine
            .set_strategy_parameters(StrategyParameters::trs_conservative())
            .is_ok());
    }

    #[test]
    fn test_emergency_stop_halts_cycles() {
        let (mut engine, _clock) = engine_with_clock();
        engine.activate_emergency_stop("manual kill switch");
        assert_eq!(engine.run_cycle(), CycleOutcome::Halted);
        assert!(engine
            .active_alerts()
            .iter()
            .any(|a| a.kind == AlertKind::EmergencyStop));

        engine.clear_emergency_stop();
        assert_ne!(engine.run_cycle(), CycleOutcome::Halted);
    }

    #[test]
    fn test_apply_fill_updates_cash_and_positions() {
        let (mut engine, _clock) = engine_with_clock();
        engine.set_portfolio(Portfolio::new(dec!(100000)), vec![]);

        let order = TradeOrder {
            id: order_id(1, 1),
            symbol: "BTC".to_string(),
            order_type: OrderType::MarketBuy,
            status: OrderStatus::Filled,
            quantity: dec!(1),
            limit_price: Decimal::ZERO,
            executed_quantity: dec!(1),
            average_fill_price: dec!(50000),
            created_at: start(),
            executed_at: Some(start()),
            reason: String::new(),
            expected_slippage: 0.0,
            estimated_cost: Decimal::ZERO,
            is_rebalance: true,
            is_risk_control: false,
        };
        engine.apply_fill(&order);
        assert_eq!(engine.portfolio().cash, dec!(50000));
        assert_eq!(engine.portfolio().positions["BTC"].quantity, dec!(1));

        // Sell half at a profit.
        let mut sell = order.clone();
        sell.quantity = dec!(-0.5);
        sell.executed_quantity = dec!(-0.5);
        sell.average_fill_price = dec!(60000);
        engine.apply_fill(&sell);
        assert_eq!(engine.portfolio().cash, dec!(80000));
        assert_eq!(engine.portfolio().positions["BTC"].quantity, dec!(0.5));
        assert_eq!(engine.portfolio().realized_pnl, dec!(5000));

        // Close the rest: the position entry disappears.
        let mut close = sell.clone();
        close.quantity = dec!(-0.5);
        close.executed_quantity = dec!(-0.5);
        engine.apply_fill(&close);
        assert!(!engine.portfolio().positions.contains_key("BTC"));
    }

    #[test]
    fn test_var_multi_method_uses_configured_seed() {
        let clock = Arc::new(ManualClock::new(start()));
        let config = EngineConfig {
            rng_seed: Some(99),
            ..Default::default()
        };
        let mut engine = TradingEngine::new(config, clock).unwrap();
        engine
            .ingest_market(crate::domain::market::MarketSample::new(
                "BTC", start(), 45_000.0, 80e6, 70e6,
            ))
            .unwrap();
        engine.set_portfolio(
            Portfolio::new(dec!(100000)),
            vec![Position {
                symbol: "BTC".to_string(),
                quantity: dec!(2),
                average_price: dec!(45000),
            }],
        );

        let first = engine.var_multi_method();
        let second = engine.var_multi_method();
        assert!(first.contains_key(&MethodologyKind::MonteCarlo));
        assert_eq!(
            first[&MethodologyKind::MonteCarlo].var_pct,
            second[&MethodologyKind::MonteCarlo].var_pct
        );
    }

    #[test]
    fn test_from_core_config_opens_journal() {
        let dir = tempfile::tempdir().unwrap();
        let core = CoreConfig {
            data_root: dir.path().to_path_buf(),
            rng_seed: Some(7),
        };
        let clock = Arc::new(ManualClock::new(start()));
        let engine =
            TradingEngine::from_core_config(&core, EngineConfig::default(), clock).unwrap();
        assert_eq!(engine.rng_seed, Some(7));
        assert!(dir.path().join("journal.jsonl").exists());
    }

    #[test]
    fn test_gross_exposure_normalizes_abs_weights() {
        let (mut engine, _clock) = engine_with_clock();
        let positions = vec![
            Position {
                symbol: "BTC".to_string(),
                quantity: dec!(1),
                average_price: dec!(40000),
            },
            Position {
                symbol: "ETH".to_string(),
                quantity: dec!(-10),
                average_price: dec!(2000),
            },
        ];
        engine.set_portfolio(Portfolio::new(dec!(100000)), positions);

        let prices: HashMap<String, Decimal> =
            [("BTC".to_string(), dec!(40000)), ("ETH".to_string(), dec!(2000))].into();
        let (assets, weights, value) = engine.gross_exposure(&prices).unwrap();
        assert_eq!(assets, vec!["BTC".to_string(), "ETH".to_string()]);
        // Gross 60k: 40k BTC + 20k ETH short.
        assert!((weights[0] - 2.0 / 3.0).abs() < 1e-9);
        assert!((weights[1] - 1.0 / 3.0).abs() < 1e-9);
        // Equity: 100k + 40k - 20k.
        assert!((value - 120_000.0).abs() < 1e-6);
    }
}

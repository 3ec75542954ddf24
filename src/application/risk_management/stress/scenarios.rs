use serde::{Deserialize, Serialize};

/// Qualitative stress strength mapped to a numeric shock multiplier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StressSeverity {
    Mild,
    Moderate,
    Severe,
    Extreme,
    Catastrophic,
}

impl StressSeverity {
    pub fn multiplier(&self) -> f64 {
        match self {
            StressSeverity::Mild => 1.0,
            StressSeverity::Moderate => 1.5,
            StressSeverity::Severe => 2.5,
            StressSeverity::Extreme => 4.0,
            StressSeverity::Catastrophic => 6.0,
        }
    }
}

/// How long the stressed market state is assumed to persist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StressHorizon {
    /// Minutes: flash events.
    Immediate,
    /// About an hour.
    ShortTerm,
    /// One trading day.
    Intraday,
    /// About a week.
    MultiDay,
    /// A month or more.
    Extended,
}

impl StressHorizon {
    pub fn minutes(&self) -> u64 {
        match self {
            StressHorizon::Immediate => 5,
            StressHorizon::ShortTerm => 60,
            StressHorizon::Intraday => 1_440,
            StressHorizon::MultiDay => 10_080,
            StressHorizon::Extended => 43_200,
        }
    }

    /// Evolution-curve resolution for scenario modeling.
    pub fn time_steps(&self) -> usize {
        match self {
            StressHorizon::Immediate => 5,
            StressHorizon::ShortTerm => 12,
            StressHorizon::Intraday => 24,
            StressHorizon::MultiDay => 28,
            StressHorizon::Extended => 30,
        }
    }
}

/// Coarse asset classes used by the shock calibrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssetClass {
    Major,
    Stablecoin,
    Alt,
}

impl AssetClass {
    pub fn of(symbol: &str) -> Self {
        match symbol {
            "BTC" | "ETH" => AssetClass::Major,
            "USDT" | "USDC" | "DAI" | "BUSD" | "TUSD" => AssetClass::Stablecoin,
            _ => AssetClass::Alt,
        }
    }
}

/// A user-supplied scenario: explicit shocks instead of a calibration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomScenario {
    pub name: String,
    pub description: String,
    /// Price shock per symbol, fractional (e.g. -0.25).
    pub price_shocks: Vec<(String, f64)>,
    /// Volatility multiplier per symbol.
    pub vol_shocks: Vec<(String, f64)>,
    /// Additive correlation shock per symbol pair.
    pub correlation_shocks: Vec<(String, String, f64)>,
    /// Additional liquidity cost per symbol, fractional.
    pub liquidity_shocks: Vec<(String, f64)>,
    /// Optional shock evolution curve: (minute offset, intensity in [0, 1]).
    pub time_evolution: Vec<(u64, f64)>,
}

/// The prescribed scenario set: parametric market stresses, calibrated
/// historical replays, tail events, and fully custom shocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StressScenario {
    FlashCrash,
    LiquidityCrisis,
    CorrelationBreakdown,
    VolatilitySpike,
    MomentumReversal,
    CryptoWinter,
    FinancialCrisis2008,
    Covid2020,
    LunaCollapse2022,
    FtxCollapse2022,
    SvbBanking2023,
    ExchangeHack,
    RegulatoryCrackdown,
    StablecoinDepeg,
    MarketManipulation,
    Custom(CustomScenario),
}

impl StressScenario {
    pub fn name(&self) -> String {
        match self {
            StressScenario::Custom(custom) => format!("Custom:{}", custom.name),
            other => format!("{other:?}"),
        }
    }

    /// Every named (non-custom) scenario, for the comprehensive suite.
    pub fn all_named() -> Vec<StressScenario> {
        vec![
            StressScenario::FlashCrash,
            StressScenario::LiquidityCrisis,
            StressScenario::CorrelationBreakdown,
            StressScenario::VolatilitySpike,
            StressScenario::MomentumReversal,
            StressScenario::CryptoWinter,
            StressScenario::FinancialCrisis2008,
            StressScenario::Covid2020,
            StressScenario::LunaCollapse2022,
            StressScenario::FtxCollapse2022,
            StressScenario::SvbBanking2023,
            StressScenario::ExchangeHack,
            StressScenario::RegulatoryCrackdown,
            StressScenario::StablecoinDepeg,
            StressScenario::MarketManipulation,
        ]
    }
}

/// Base shock magnitudes for one scenario at Mild severity. Severity scales
/// the price/vol/correlation shocks; asset-class factors differentiate the
/// impact per symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioCalibration {
    /// Base portfolio-level price shock, negative fraction.
    pub base_price_shock: f64,
    /// Volatility inflation factor (1.0 = unchanged).
    pub vol_multiplier: f64,
    /// Additive pairwise correlation shift.
    pub correlation_shift: f64,
    /// Additional cost of exiting positions, fraction of notional.
    pub liquidity_cost: f64,
    /// Expected time to recover at Mild severity, days.
    pub recovery_days: f64,
    /// Price-shock factor per asset class (Major, Stablecoin, Alt).
    pub class_factors: (f64, f64, f64),
    pub description: &'static str,
}

impl ScenarioCalibration {
    pub fn class_factor(&self, class: AssetClass) -> f64 {
        match class {
            AssetClass::Major => self.class_factors.0,
            AssetClass::Stablecoin => self.class_factors.1,
            AssetClass::Alt => self.class_factors.2,
        }
    }
}

/// Calibration table for every named scenario. Historical replays follow the
/// recorded event magnitudes; tail events use the documented estimates.
pub fn calibration(scenario: &StressScenario) -> Option<ScenarioCalibration> {
    use StressScenario::*;
    let cal = match scenario {
        FlashCrash => ScenarioCalibration {
            base_price_shock: -0.20,
            vol_multiplier: 3.0,
            correlation_shift: 0.30,
            liquidity_cost: 0.02,
            recovery_days: 2.0,
            class_factors: (0.8, 0.05, 1.2),
            description: "sudden severe market drop within minutes",
        },
        LiquidityCrisis => ScenarioCalibration {
            base_price_shock: -0.10,
            vol_multiplier: 2.0,
            correlation_shift: 0.20,
            liquidity_cost: 0.05,
            recovery_days: 7.0,
            class_factors: (0.7, 0.05, 1.3),
            description: "extreme bid-ask spread widening, order books empty",
        },
        CorrelationBreakdown => ScenarioCalibration {
            base_price_shock: -0.08,
            vol_multiplier: 1.5,
            correlation_shift: 0.50,
            liquidity_cost: 0.01,
            recovery_days: 5.0,
            class_factors: (0.9, 0.05, 1.1),
            description: "correlation matrix destabilizes, hedges stop working",
        },
        VolatilitySpike => ScenarioCalibration {
            base_price_shock: -0.12,
            vol_multiplier: 3.5,
            correlation_shift: 0.25,
            liquidity_cost: 0.015,
            recovery_days: 3.0,
            class_factors: (0.8, 0.05, 1.2),
            description: "volatility triples without a clear direction",
        },
        MomentumReversal => ScenarioCalibration {
            base_price_shock: -0.15,
            vol_multiplier: 2.0,
            correlation_shift: 0.15,
            liquidity_cost: 0.01,
            recovery_days: 10.0,
            class_factors: (0.9, 0.05, 1.2),
            description: "sharp trend reversal against positioning",
        },
        CryptoWinter => ScenarioCalibration {
            base_price_shock: -0.50,
            vol_multiplier: 1.8,
            correlation_shift: 0.30,
            liquidity_cost: 0.03,
            recovery_days: 365.0,
            class_factors: (0.9, 0.02, 1.3),
            description: "extended bear market, capitulation and apathy",
        },
        FinancialCrisis2008 => ScenarioCalibration {
            base_price_shock: -0.45,
            vol_multiplier: 4.0,
            correlation_shift: 0.50,
            liquidity_cost: 0.06,
            recovery_days: 400.0,
            class_factors: (1.0, 0.05, 1.2),
            description: "Lehman-style systemic deleveraging",
        },
        Covid2020 => ScenarioCalibration {
            base_price_shock: -0.40,
            vol_multiplier: 3.5,
            correlation_shift: 0.60,
            liquidity_cost: 0.04,
            recovery_days: 90.0,
            class_factors: (1.0, 0.03, 1.15),
            description: "March 2020 pandemic crash, everything sells off",
        },
        LunaCollapse2022 => ScenarioCalibration {
            base_price_shock: -0.35,
            vol_multiplier: 3.0,
            correlation_shift: 0.40,
            liquidity_cost: 0.05,
            recovery_days: 180.0,
            class_factors: (0.8, 0.60, 1.4),
            description: "algorithmic stablecoin death spiral and contagion",
        },
        FtxCollapse2022 => ScenarioCalibration {
            base_price_shock: -0.25,
            vol_multiplier: 2.5,
            correlation_shift: 0.35,
            liquidity_cost: 0.06,
            recovery_days: 120.0,
            class_factors: (0.9, 0.10, 1.3),
            description: "major exchange insolvency, counterparty panic",
        },
        SvbBanking2023 => ScenarioCalibration {
            base_price_shock: -0.15,
            vol_multiplier: 2.0,
            correlation_shift: 0.30,
            liquidity_cost: 0.03,
            recovery_days: 30.0,
            class_factors: (0.8, 0.55, 1.1),
            description: "banking stress hits fiat rails and reserve-backed stables",
        },
        ExchangeHack => ScenarioCalibration {
            base_price_shock: -0.18,
            vol_multiplier: 2.5,
            correlation_shift: 0.30,
            liquidity_cost: 0.08,
            recovery_days: 45.0,
            class_factors: (0.9, 0.10, 1.3),
            description: "major venue security breach, withdrawals frozen",
        },
        RegulatoryCrackdown => ScenarioCalibration {
            base_price_shock: -0.22,
            vol_multiplier: 2.0,
            correlation_shift: 0.35,
            liquidity_cost: 0.04,
            recovery_days: 150.0,
            class_factors: (0.8, 0.10, 1.4),
            description: "severe coordinated regulatory action",
        },
        StablecoinDepeg => ScenarioCalibration {
            base_price_shock: -0.20,
            vol_multiplier: 3.0,
            correlation_shift: 0.40,
            liquidity_cost: 0.07,
            recovery_days: 30.0,
            // The depeg hits stables directly; majors wobble, alts bleed.
            class_factors: (0.40, 0.75, 1.0),
            description: "major stablecoin loses its peg, flight to hard assets",
        },
        MarketManipulation => ScenarioCalibration {
            base_price_shock: -0.12,
            vol_multiplier: 2.0,
            correlation_shift: 0.20,
            liquidity_cost: 0.05,
            recovery_days: 14.0,
            class_factors: (0.7, 0.05, 1.4),
            description: "coordinated manipulation event, spoofed liquidity",
        },
        Custom(_) => return None,
    };
    Some(cal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_multipliers_increase() {
        let severities = [
            StressSeverity::Mild,
            StressSeverity::Moderate,
            StressSeverity::Severe,
            StressSeverity::Extreme,
            StressSeverity::Catastrophic,
        ];
        for pair in severities.windows(2) {
            assert!(pair[0].multiplier() < pair[1].multiplier());
        }
        assert!((StressSeverity::Mild.multiplier() - 1.0).abs() < 1e-12);
        assert!((StressSeverity::Catastrophic.multiplier() - 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_every_named_scenario_is_calibrated() {
        for scenario in StressScenario::all_named() {
            assert!(
                calibration(&scenario).is_some(),
                "missing calibration for {}",
                scenario.name()
            );
        }
    }

    #[test]
    fn test_calibrations_are_sane() {
        for scenario in StressScenario::all_named() {
            let cal = calibration(&scenario).unwrap();
            assert!(cal.base_price_shock < 0.0, "{}", scenario.name());
            assert!(cal.vol_multiplier >= 1.0);
            assert!(cal.correlation_shift >= 0.0);
            assert!(cal.liquidity_cost >= 0.0);
            assert!(cal.recovery_days > 0.0);
        }
    }

    #[test]
    fn test_depeg_hits_stables_hardest_among_non_alts() {
        let cal = calibration(&StressScenario::StablecoinDepeg).unwrap();
        assert!(cal.class_factor(AssetClass::Stablecoin) > cal.class_factor(AssetClass::Major));
    }

    #[test]
    fn test_asset_class_mapping() {
        assert_eq!(AssetClass::of("BTC"), AssetClass::Major);
        assert_eq!(AssetClass::of("USDC"), AssetClass::Stablecoin);
        assert_eq!(AssetClass::of("ADA"), AssetClass::Alt);
    }

    #[test]
    fn test_custom_scenario_has_no_table_entry() {
        let custom = StressScenario::Custom(CustomScenario {
            name: "desk-scenario".to_string(),
            description: String::new(),
            price_shocks: vec![],
            vol_shocks: vec![],
            correlation_shocks: vec![],
            liquidity_shocks: vec![],
            time_evolution: vec![],
        });
        assert!(calibration(&custom).is_none());
        assert_eq!(custom.name(), "Custom:desk-scenario");
    }
}

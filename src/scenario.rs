use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::agents::Population;
use crate::error::{Result, SimError};
use crate::market::{Asset, MarketState};

/// Daily time step, in years.
pub const DT: f64 = 1.0 / 365.0;
/// Gas price is refreshed on steps divisible by this.
pub const GAS_UPDATE_INTERVAL: u64 = 10;

/// Stress scenario descriptor. Every shock is optional; `None` leaves the
/// corresponding market field untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub name: String,
    /// One-time fractional price move, e.g. -0.30 for a 30% crash
    #[serde(default)]
    pub market_shock: Option<f64>,
    #[serde(default)]
    pub volatility_multiplier: Option<f64>,
    /// One-time fractional liquidity move
    #[serde(default)]
    pub liquidity_shock: Option<f64>,
    /// Annualized GBM drift (default 0)
    #[serde(default)]
    pub drift: Option<f64>,
}

impl ScenarioConfig {
    /// Scenario with no shocks at all.
    pub fn named(name: &str) -> Self {
        ScenarioConfig {
            name: name.to_string(),
            market_shock: None,
            volatility_multiplier: None,
            liquidity_shock: None,
            drift: None,
        }
    }

    pub fn drift(&self) -> f64 {
        self.drift.unwrap_or(0.0)
    }

    /// Reject descriptors that would zero or negate prices, liquidity or
    /// volatility.
    pub fn validate(&self) -> Result<()> {
        let fail = |reason: String| SimError::InvalidScenario {
            name: self.name.clone(),
            reason,
        };

        if self.name.trim().is_empty() {
            return Err(fail("name must not be empty".into()));
        }
        for (field, value) in [
            ("market_shock", self.market_shock),
            ("liquidity_shock", self.liquidity_shock),
        ] {
            if let Some(v) = value {
                if !v.is_finite() || v <= -1.0 {
                    return Err(fail(format!("{} must be finite and > -1, got {}", field, v)));
                }
            }
        }
        if let Some(m) = self.volatility_multiplier {
            if !m.is_finite() || m < 0.0 {
                return Err(fail(format!(
                    "volatility_multiplier must be finite and >= 0, got {}",
                    m
                )));
            }
        }
        if let Some(d) = self.drift {
            if !d.is_finite() {
                return Err(fail(format!("drift must be finite, got {}", d)));
            }
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Presets
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScenarioPreset {
    Baseline,
    Crash,
    FlashCrash,
    LiquidityCrisis,
    VolatilitySpike,
    BearMarket,
    BlackSwan,
}

impl ScenarioPreset {
    pub fn all() -> Vec<ScenarioPreset> {
        use ScenarioPreset::*;
        vec![
            Baseline,
            Crash,
            FlashCrash,
            LiquidityCrisis,
            VolatilitySpike,
            BearMarket,
            BlackSwan,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Baseline => "baseline",
            Self::Crash => "crash",
            Self::FlashCrash => "flash_crash",
            Self::LiquidityCrisis => "liquidity_crisis",
            Self::VolatilitySpike => "volatility_spike",
            Self::BearMarket => "bear_market",
            Self::BlackSwan => "black_swan",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Baseline => "No shock, calibrated volatility",
            Self::Crash => "30% price drop with doubled volatility",
            Self::FlashCrash => "15% drop, 3x volatility, thinner liquidity",
            Self::LiquidityCrisis => "60% of liquidity withdrawn, elevated volatility",
            Self::VolatilitySpike => "Prices unchanged, 4x volatility",
            Self::BearMarket => "10% drop followed by strong negative drift",
            Self::BlackSwan => "50% crash, 5x volatility, 70% liquidity loss",
        }
    }

    pub fn from_name(name: &str) -> Result<ScenarioPreset> {
        Self::all()
            .into_iter()
            .find(|p| p.name() == name)
            .ok_or_else(|| SimError::UnknownPreset(name.to_string()))
    }

    pub fn config(&self) -> ScenarioConfig {
        let base = ScenarioConfig::named(self.name());
        match self {
            Self::Baseline => base,
            Self::Crash => ScenarioConfig {
                market_shock: Some(-0.30),
                volatility_multiplier: Some(2.0),
                ..base
            },
            Self::FlashCrash => ScenarioConfig {
                market_shock: Some(-0.15),
                volatility_multiplier: Some(3.0),
                liquidity_shock: Some(-0.30),
                ..base
            },
            Self::LiquidityCrisis => ScenarioConfig {
                volatility_multiplier: Some(1.5),
                liquidity_shock: Some(-0.60),
                ..base
            },
            Self::VolatilitySpike => ScenarioConfig {
                volatility_multiplier: Some(4.0),
                ..base
            },
            Self::BearMarket => ScenarioConfig {
                market_shock: Some(-0.10),
                volatility_multiplier: Some(1.5),
                drift: Some(-2.0),
                ..base
            },
            Self::BlackSwan => ScenarioConfig {
                market_shock: Some(-0.50),
                volatility_multiplier: Some(5.0),
                liquidity_shock: Some(-0.70),
                ..base
            },
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Scenario applier
// ═══════════════════════════════════════════════════════════════════════

/// One-time shocks at scenario start.
pub fn apply_scenario(state: &mut MarketState, scenario: &ScenarioConfig) {
    if let Some(shock) = scenario.market_shock {
        state.scale_prices(1.0 + shock);
    }
    if let Some(mult) = scenario.volatility_multiplier {
        state.scale_volatility(mult);
    }
    if let Some(shock) = scenario.liquidity_shock {
        state.scale_liquidity(1.0 + shock);
    }
}

/// Per-step market evolution: GBM prices, utilization, and on every
/// [`GAS_UPDATE_INTERVAL`]-th step the gas proxy.
///
/// Draws exactly one normal per asset, in canonical order, from `rng`.
pub fn advance_step<R: Rng + ?Sized>(
    state: &mut MarketState,
    step: u64,
    scenario: &ScenarioConfig,
    population: &Population,
    rng: &mut R,
) {
    let drift = scenario.drift();
    let sqrt_dt = DT.sqrt();
    for asset in Asset::ALL {
        let z: f64 = rng.sample(StandardNormal);
        state.gbm_step(asset, drift, DT, z * sqrt_dt);
    }

    state.recompute_utilization();

    if step % GAS_UPDATE_INTERVAL == 0 {
        state.update_gas_price(population.holder_fraction());
    }
}

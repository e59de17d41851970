use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::agents::{Archetype, Population};
use crate::liquidation::LiquidationEvent;
use crate::market::{Asset, MarketState};

/// Run-level risk summary. `systemic_risk` here is the liquidation-rate
/// proxy, not the cascade score in [`crate::liquidation::CascadeReport`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskMetrics {
    pub avg_volatility: f64,
    pub max_volatility: f64,
    pub avg_utilization: f64,
    pub liquidation_rate: f64,
    pub systemic_risk: f64,
    pub total_liquidations: usize,
    pub volatilities_by_asset: BTreeMap<Asset, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PnlStats {
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub total: f64,
}

impl PnlStats {
    /// Population statistics; `None` for an empty sample.
    pub fn from_samples(samples: &[f64]) -> Option<PnlStats> {
        if samples.is_empty() {
            return None;
        }
        let n = samples.len() as f64;
        let total: f64 = samples.iter().sum();
        let mean = total / n;
        let variance = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
        Some(PnlStats {
            mean,
            std: variance.sqrt(),
            min: samples.iter().cloned().fold(f64::INFINITY, f64::min),
            max: samples.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            total,
        })
    }
}

/// Population standard deviation; zero for fewer than two samples.
pub fn std_dev(samples: &[f64]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    (samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n).sqrt()
}

/// stdev of daily log returns × √365. Fewer than two prices, or any
/// non-positive price, gives zero.
pub fn annualized_volatility(prices: &[f64]) -> f64 {
    if prices.len() < 2 || prices.iter().any(|p| *p <= 0.0) {
        return 0.0;
    }
    let returns: Vec<f64> = prices.windows(2).map(|w| (w[1] / w[0]).ln()).collect();
    std_dev(&returns) * 365f64.sqrt()
}

pub fn compute_risk_metrics(
    history: &[MarketState],
    events: &[LiquidationEvent],
    agent_count: usize,
) -> RiskMetrics {
    let mut volatilities_by_asset = BTreeMap::new();
    for asset in Asset::ALL {
        let prices: Vec<f64> = history.iter().map(|s| s.price(asset)).collect();
        volatilities_by_asset.insert(asset, annualized_volatility(&prices));
    }

    let vols: Vec<f64> = volatilities_by_asset.values().cloned().collect();
    let avg_volatility = vols.iter().sum::<f64>() / vols.len() as f64;
    let max_volatility = vols.iter().cloned().fold(0.0_f64, f64::max);

    let avg_utilization = if history.is_empty() {
        0.0
    } else {
        history
            .iter()
            .map(|s| {
                let n = s.utilization_rate.len().max(1) as f64;
                s.utilization_rate.values().sum::<f64>() / n
            })
            .sum::<f64>()
            / history.len() as f64
    };

    let samples = history.len() * agent_count;
    let liquidation_rate = if samples > 0 {
        events.len() as f64 / samples as f64
    } else {
        0.0
    };

    RiskMetrics {
        avg_volatility,
        max_volatility,
        avg_utilization,
        liquidation_rate,
        systemic_risk: (liquidation_rate * 100.0).min(1.0),
        total_liquidations: events.len(),
        volatilities_by_asset,
    }
}

/// Realized plus unrealized PnL per agent, summarized per archetype name.
/// Archetypes with no agents are omitted.
pub fn agent_pnl(population: &Population) -> BTreeMap<String, PnlStats> {
    let mut samples: BTreeMap<Archetype, Vec<f64>> = BTreeMap::new();
    for agent in &population.agents {
        samples.entry(agent.archetype).or_default().push(agent.total_pnl());
    }
    samples
        .into_iter()
        .filter_map(|(archetype, pnls)| {
            PnlStats::from_samples(&pnls).map(|s| (archetype.name().to_string(), s))
        })
        .collect()
}

/// Half-width of the band around the systemic-risk estimate; narrower with
/// more observed liquidations.
pub fn confidence_width(event_count: usize) -> f64 {
    if event_count > 100 {
        0.05
    } else if event_count > 50 {
        0.10
    } else {
        0.20
    }
}

pub fn confidence_interval(metrics: &RiskMetrics) -> (f64, f64) {
    let width = confidence_width(metrics.total_liquidations);
    let point = metrics.systemic_risk;
    ((point - width).max(0.0), (point + width).min(1.0))
}

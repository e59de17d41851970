use std::collections::{BTreeMap, BTreeSet};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, SimError};
use crate::metrics::std_dev;
use crate::scenario::ScenarioConfig;
use crate::simulation::{Simulation, SimulationConfig, SimulationResult};

/// Worst-case systemic risk above this is critical.
pub const CRITICAL_RISK: f64 = 0.7;
pub const WARNING_RISK: f64 = 0.5;
/// Liquidation count above this calls for more liquidator capacity.
pub const HIGH_LIQUIDATIONS: usize = 100;
/// Std-dev of per-scenario average PnL above this calls for hedging.
pub const PNL_DISPERSION: f64 = 10_000.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    /// Scenario names in run order
    pub scenarios: Vec<String>,
    pub risk_comparison: BTreeMap<String, f64>,
    pub liquidation_comparison: BTreeMap<String, usize>,
    /// Mean of the per-archetype mean PnL
    pub pnl_comparison: BTreeMap<String, f64>,
    pub worst_case: Option<String>,
}

impl Comparison {
    pub fn from_results(results: &[SimulationResult]) -> Self {
        let mut comparison = Comparison {
            scenarios: Vec::with_capacity(results.len()),
            risk_comparison: BTreeMap::new(),
            liquidation_comparison: BTreeMap::new(),
            pnl_comparison: BTreeMap::new(),
            worst_case: None,
        };

        let mut worst: Option<(&str, f64, usize)> = None;
        for r in results {
            let name = r.scenario_name.clone();
            let risk = r.risk_metrics.systemic_risk;
            let liquidations = r.risk_metrics.total_liquidations;
            let avg_pnl = if r.agent_pnl.is_empty() {
                0.0
            } else {
                r.agent_pnl.values().map(|s| s.mean).sum::<f64>() / r.agent_pnl.len() as f64
            };

            comparison.scenarios.push(name.clone());
            comparison.risk_comparison.insert(name.clone(), risk);
            comparison.liquidation_comparison.insert(name.clone(), liquidations);
            comparison.pnl_comparison.insert(name, avg_pnl);

            let worse = match worst {
                None => true,
                Some((_, w_risk, w_liq)) => risk > w_risk || (risk == w_risk && liquidations > w_liq),
            };
            if worse {
                worst = Some((r.scenario_name.as_str(), risk, liquidations));
            }
        }
        comparison.worst_case = worst.map(|(name, _, _)| name.to_string());
        comparison
    }

    pub fn worst_risk(&self) -> f64 {
        self.risk_comparison.values().cloned().fold(0.0_f64, f64::max)
    }

    pub fn max_liquidations(&self) -> usize {
        self.liquidation_comparison.values().cloned().max().unwrap_or(0)
    }

    pub fn pnl_dispersion(&self) -> f64 {
        let values: Vec<f64> = self.pnl_comparison.values().cloned().collect();
        std_dev(&values)
    }
}

/// Threshold-rule guidance for a comparison. The three general items are
/// always appended.
pub fn recommendations(comparison: &Comparison) -> Vec<String> {
    let mut recs = Vec::new();

    let worst_risk = comparison.worst_risk();
    if worst_risk > CRITICAL_RISK {
        recs.push(
            "CRITICAL: High systemic risk detected. \
             Immediately reduce leverage limits and increase collateral requirements."
                .to_string(),
        );
    } else if worst_risk > WARNING_RISK {
        recs.push(
            "WARNING: Moderate systemic risk. Consider tightening risk parameters gradually."
                .to_string(),
        );
    }

    if comparison.max_liquidations() > HIGH_LIQUIDATIONS {
        recs.push(
            "High liquidation activity expected. \
             Increase liquidation incentives and ensure sufficient liquidator capacity."
                .to_string(),
        );
    }

    if comparison.pnl_dispersion() > PNL_DISPERSION {
        recs.push(
            "High variance in outcomes across scenarios. Implement robust hedging strategies."
                .to_string(),
        );
    }

    if let Some(worst) = &comparison.worst_case {
        recs.push(format!(
            "Worst-case scenario: {}. Develop specific contingency plans for this scenario.",
            worst
        ));
    }

    recs.extend(
        [
            "Maintain real-time monitoring of all risk metrics",
            "Ensure adequate capital reserves for stress scenarios",
            "Regular parameter optimization based on market conditions",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    recs
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorReport {
    pub results: Vec<SimulationResult>,
    pub comparison: Comparison,
    pub recommendations: Vec<String>,
}

impl OrchestratorReport {
    fn from_results(results: Vec<SimulationResult>) -> Self {
        let comparison = Comparison::from_results(&results);
        let recommendations = recommendations(&comparison);
        OrchestratorReport {
            results,
            comparison,
            recommendations,
        }
    }
}

/// Runs a set of scenarios under one simulation config. Every scenario
/// gets the same seed, so differences come from the scenario alone.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    pub config: SimulationConfig,
    pub scenarios: Vec<ScenarioConfig>,
}

impl Orchestrator {
    /// Validates everything up front; an unseeded config is pinned to one
    /// entropy-drawn seed shared by all scenarios.
    pub fn new(mut config: SimulationConfig, scenarios: Vec<ScenarioConfig>) -> Result<Self> {
        config.validate()?;
        if scenarios.is_empty() {
            return Err(SimError::InvalidConfig("no scenarios to run".into()));
        }
        let mut names = BTreeSet::new();
        for s in &scenarios {
            s.validate()?;
            if !names.insert(s.name.as_str()) {
                return Err(SimError::InvalidConfig(format!(
                    "duplicate scenario name '{}'",
                    s.name
                )));
            }
        }
        if config.seed.is_none() {
            config.seed = Some(rand::random());
        }
        Ok(Orchestrator { config, scenarios })
    }

    pub fn run(&self) -> Result<OrchestratorReport> {
        self.run_with_progress(|_| {})
    }

    /// Scenarios one after another, in the order given.
    pub fn run_with_progress<F: FnMut(&SimulationResult)>(&self, mut on_done: F) -> Result<OrchestratorReport> {
        let mut results = Vec::with_capacity(self.scenarios.len());
        for scenario in &self.scenarios {
            let result = Simulation::new(self.config.clone(), scenario.clone())?.run();
            on_done(&result);
            results.push(result);
        }
        Ok(self.finish(results))
    }

    pub fn run_parallel(&self) -> Result<OrchestratorReport> {
        self.run_parallel_with_progress(|_| {})
    }

    /// Independent scenarios on the rayon pool. Each owns its market,
    /// population and RNG, so results match [`Orchestrator::run`].
    pub fn run_parallel_with_progress<F>(&self, on_done: F) -> Result<OrchestratorReport>
    where
        F: Fn(&SimulationResult) + Sync,
    {
        let results = self
            .scenarios
            .par_iter()
            .map(|scenario| -> Result<SimulationResult> {
                let result = Simulation::new(self.config.clone(), scenario.clone())?.run();
                on_done(&result);
                Ok(result)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(self.finish(results))
    }

    fn finish(&self, results: Vec<SimulationResult>) -> OrchestratorReport {
        let report = OrchestratorReport::from_results(results);
        info!(
            scenarios = report.results.len(),
            worst_case = report.comparison.worst_case.as_deref().unwrap_or("-"),
            worst_risk = report.comparison.worst_risk(),
            "scenario comparison complete"
        );
        report
    }
}

use std::collections::BTreeMap;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::agents::{ArchetypeDistribution, Population};
use crate::error::{Result, SimError};
use crate::executor::{Executor, ExecutorConfig};
use crate::liquidation::{self, CascadeConfig, CascadeReport, CascadeResolver, LiquidationEvent, MAX_CASCADE_ROUNDS};
use crate::market::MarketState;
use crate::metrics::{self, PnlStats, RiskMetrics};
use crate::policy;
use crate::scenario::{self, ScenarioConfig};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub agents: usize,
    pub steps: u64,
    /// `None` draws a seed from OS entropy; the drawn seed is reported
    pub seed: Option<u64>,
    pub distribution: ArchetypeDistribution,
    pub max_cascade_rounds: u32,
    /// Evaluate agent policies on the rayon pool
    pub parallel_decisions: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            agents: 10_000,
            steps: 1_000,
            seed: None,
            distribution: ArchetypeDistribution::default(),
            max_cascade_rounds: MAX_CASCADE_ROUNDS,
            parallel_decisions: false,
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.agents == 0 {
            return Err(SimError::InvalidConfig("agents must be positive".into()));
        }
        if self.steps == 0 {
            return Err(SimError::InvalidConfig("steps must be positive".into()));
        }
        if self.max_cascade_rounds == 0 {
            return Err(SimError::InvalidConfig(
                "max_cascade_rounds must be at least 1".into(),
            ));
        }
        self.distribution.validate()
    }
}

/// Everything one scenario run produced. Immutable once returned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationResult {
    pub scenario_name: String,
    pub steps: u64,
    pub agents: usize,
    pub seed: u64,
    pub market_states: Vec<MarketState>,
    pub liquidation_events: Vec<LiquidationEvent>,
    pub agent_pnl: BTreeMap<String, PnlStats>,
    /// Most severe cascade of the run
    pub cascade_analysis: CascadeReport,
    pub cascades: Vec<CascadeReport>,
    pub risk_metrics: RiskMetrics,
    pub confidence_interval: (f64, f64),
    pub actions_applied: u64,
    pub actions_rejected: u64,
    /// Wall-clock seconds
    pub execution_time: f64,
}

/// Per-step summary returned by [`Simulation::step`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepSummary {
    pub step: u64,
    pub actions: usize,
    pub liquidations: usize,
    pub cascade_rounds: u32,
}

/// One scenario run: owns its market, population and RNG stream.
pub struct Simulation {
    pub config: SimulationConfig,
    pub scenario: ScenarioConfig,
    pub market: MarketState,
    pub population: Population,
    seed: u64,
    rng: StdRng,
    executor: Executor,
    resolver: CascadeResolver,
    events: Vec<LiquidationEvent>,
    history: Vec<MarketState>,
    cascades: Vec<CascadeReport>,
    current_step: u64,
}

impl Simulation {
    /// Validate inputs, seed the run, build the population, open its
    /// starting book at pre-shock prices, then apply the scenario's
    /// one-time shocks to that book. Nothing is stepped yet.
    pub fn new(config: SimulationConfig, scenario: ScenarioConfig) -> Result<Self> {
        config.validate()?;
        scenario.validate()?;

        let seed = config.seed.unwrap_or_else(rand::random);
        let mut rng = StdRng::seed_from_u64(seed);
        let mut population = Population::initialize_with_rng(config.agents, &config.distribution, &mut rng)?;

        let mut market = MarketState::initial();
        let mut executor = Executor::new(ExecutorConfig::default());
        let mut events = Vec::new();

        let opening_seed: u64 = rng.gen();
        let opening = policy::opening_book(&population, &market, opening_seed);
        executor.execute_all(0, &opening, &mut population, &mut market, &mut rng, &mut events);
        market.recompute_utilization();
        debug!(
            positions = population.open_position_count(),
            applied = executor.applied,
            "opening book placed"
        );

        scenario::apply_scenario(&mut market, &scenario);
        population.mark_positions(&market);

        let resolver = CascadeResolver::new(CascadeConfig {
            max_rounds: config.max_cascade_rounds,
        });

        Ok(Simulation {
            config,
            scenario,
            market,
            population,
            seed,
            rng,
            executor,
            resolver,
            events,
            history: Vec::new(),
            cascades: Vec::new(),
            current_step: 0,
        })
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn current_step(&self) -> u64 {
        self.current_step
    }

    pub fn events(&self) -> &[LiquidationEvent] {
        &self.events
    }

    pub fn history(&self) -> &[MarketState] {
        &self.history
    }

    /// Advance one step: market evolution, decisions against the evolved
    /// market, sequential execution, detection, cascade, marks, snapshot.
    pub fn step(&mut self) -> StepSummary {
        let step = self.current_step;
        let events_before = self.events.len();

        scenario::advance_step(&mut self.market, step, &self.scenario, &self.population, &mut self.rng);

        let decision_seed: u64 = self.rng.gen();
        let actions = policy::decide_all(
            &self.population,
            &self.market,
            decision_seed,
            self.config.parallel_decisions,
        );

        self.executor.execute_all(
            step,
            &actions,
            &mut self.population,
            &mut self.market,
            &mut self.rng,
            &mut self.events,
        );
        self.market.recompute_utilization();

        let breaches = liquidation::detect(&self.population, &self.market);
        let mut cascade_rounds = 0;
        if !breaches.is_empty() {
            let report = self.resolver.resolve(
                step,
                breaches,
                &mut self.population,
                &mut self.market,
                &mut self.events,
            );
            cascade_rounds = report.rounds;
            self.cascades.push(report);
        }

        self.population.mark_positions(&self.market);
        self.history.push(self.market.snapshot());
        self.current_step += 1;

        let liquidations = self.events.len() - events_before;
        debug!(step, actions = actions.len(), liquidations, cascade_rounds, "step complete");

        StepSummary {
            step,
            actions: actions.len(),
            liquidations,
            cascade_rounds,
        }
    }

    /// Run every configured step and aggregate.
    pub fn run(self) -> SimulationResult {
        self.run_with_progress(|_| {})
    }

    /// As [`Simulation::run`], calling `on_step` after each step.
    pub fn run_with_progress<F: FnMut(&StepSummary)>(mut self, mut on_step: F) -> SimulationResult {
        let started = Instant::now();
        info!(
            scenario = %self.scenario.name,
            agents = self.population.len(),
            steps = self.config.steps,
            seed = self.seed,
            "starting scenario"
        );

        while self.current_step < self.config.steps {
            let summary = self.step();
            on_step(&summary);
        }

        let result = self.finish(started.elapsed().as_secs_f64());
        info!(
            scenario = %result.scenario_name,
            liquidations = result.liquidation_events.len(),
            cascades = result.cascades.len(),
            systemic_risk = result.risk_metrics.systemic_risk,
            elapsed = result.execution_time,
            "scenario finished"
        );
        result
    }

    fn finish(self, execution_time: f64) -> SimulationResult {
        let risk_metrics = metrics::compute_risk_metrics(&self.history, &self.events, self.population.len());
        let confidence_interval = metrics::confidence_interval(&risk_metrics);
        let agent_pnl = metrics::agent_pnl(&self.population);
        let cascade_analysis = most_severe(&self.cascades)
            .cloned()
            .unwrap_or_else(|| CascadeReport::empty(0));

        SimulationResult {
            scenario_name: self.scenario.name.clone(),
            steps: self.current_step,
            agents: self.population.len(),
            seed: self.seed,
            market_states: self.history,
            liquidation_events: self.events,
            agent_pnl,
            cascade_analysis,
            cascades: self.cascades,
            risk_metrics,
            confidence_interval,
            actions_applied: self.executor.applied,
            actions_rejected: self.executor.rejected,
            execution_time,
        }
    }
}

/// Highest cascade score, then most liquidations; earliest wins ties.
pub fn most_severe(cascades: &[CascadeReport]) -> Option<&CascadeReport> {
    let mut best: Option<&CascadeReport> = None;
    for c in cascades {
        let better = match best {
            None => true,
            Some(b) => {
                c.systemic_risk > b.systemic_risk
                    || (c.systemic_risk == b.systemic_risk && c.total_liquidations > b.total_liquidations)
            }
        };
        if better {
            best = Some(c);
        }
    }
    best
}

/// Build and run a scenario in one call.
pub fn run_scenario(config: &SimulationConfig, scenario: &ScenarioConfig) -> Result<SimulationResult> {
    Ok(Simulation::new(config.clone(), scenario.clone())?.run())
}

use cascade_sim::liquidation::{detect, MAX_MARKET_IMPACT};
use cascade_sim::scenario::{ScenarioConfig, ScenarioPreset};
use cascade_sim::simulation::*;
use cascade_sim::SimError;

fn small_config(seed: u64) -> SimulationConfig {
    SimulationConfig {
        agents: 200,
        steps: 30,
        seed: Some(seed),
        ..SimulationConfig::default()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Validation
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn test_invalid_config_rejected() {
    let scenario = ScenarioPreset::Baseline.config();
    for config in [
        SimulationConfig { agents: 0, ..small_config(1) },
        SimulationConfig { steps: 0, ..small_config(1) },
        SimulationConfig { max_cascade_rounds: 0, ..small_config(1) },
    ] {
        let err = Simulation::new(config, scenario.clone()).err().unwrap();
        assert!(matches!(err, SimError::InvalidConfig(_)), "got {:?}", err);
    }
}

#[test]
fn test_invalid_scenario_rejected() {
    let scenario = ScenarioConfig {
        market_shock: Some(-1.0),
        ..ScenarioConfig::named("wipeout")
    };
    let err = Simulation::new(small_config(1), scenario).err().unwrap();
    assert!(matches!(err, SimError::InvalidScenario { .. }));
}

// ═══════════════════════════════════════════════════════════════════════
// Stepping
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn test_step_advances_and_snapshots() {
    let mut sim = Simulation::new(small_config(5), ScenarioPreset::Baseline.config()).unwrap();
    assert_eq!(sim.current_step(), 0);
    assert!(sim.history().is_empty());

    for expected in 0..5u64 {
        let summary = sim.step();
        assert_eq!(summary.step, expected);
    }
    assert_eq!(sim.current_step(), 5);
    assert_eq!(sim.history().len(), 5);
    assert_eq!(sim.history()[4], sim.market);
}

#[test]
fn test_result_shape() {
    let result = run_scenario(&small_config(3), &ScenarioPreset::Crash.config()).unwrap();
    assert_eq!(result.scenario_name, "crash");
    assert_eq!(result.steps, 30);
    assert_eq!(result.agents, 200);
    assert_eq!(result.seed, 3);
    assert_eq!(result.market_states.len(), 30);
    assert_eq!(result.agent_pnl.len(), 8);
    assert_eq!(result.risk_metrics.total_liquidations, result.liquidation_events.len());
    assert!(result.actions_applied > 0);

    let (lo, hi) = result.confidence_interval;
    assert!(0.0 <= lo && lo <= hi && hi <= 1.0);

    let cascade_events: usize = result.cascades.iter().map(|c| c.total_liquidations).sum();
    let liquidator_events = result
        .liquidation_events
        .iter()
        .filter(|e| e.cascade_round == 0)
        .count();
    assert_eq!(cascade_events + liquidator_events, result.liquidation_events.len());

    match most_severe(&result.cascades) {
        Some(worst) => assert_eq!(&result.cascade_analysis, worst),
        None => assert_eq!(result.cascade_analysis.rounds, 0),
    }
}

#[test]
fn test_events_ordered_by_step() {
    let result = run_scenario(&small_config(8), &ScenarioPreset::BlackSwan.config()).unwrap();
    for pair in result.liquidation_events.windows(2) {
        assert!(pair[0].step <= pair[1].step);
    }
    for c in &result.cascades {
        assert!(c.rounds >= 1);
        assert!(c.final_state.is_terminal());
        assert!((0.0..=1.0).contains(&c.systemic_risk));
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Reproducibility
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn test_same_seed_same_run() {
    let scenario = ScenarioPreset::FlashCrash.config();
    let a = run_scenario(&small_config(17), &scenario).unwrap();
    let b = run_scenario(&small_config(17), &scenario).unwrap();

    assert_eq!(a.market_states, b.market_states);
    assert_eq!(a.liquidation_events, b.liquidation_events);
    assert_eq!(a.cascades, b.cascades);
    assert_eq!(a.agent_pnl, b.agent_pnl);
    assert_eq!(a.risk_metrics, b.risk_metrics);
    assert_eq!(a.actions_applied, b.actions_applied);
}

#[test]
fn test_different_seeds_diverge() {
    let scenario = ScenarioPreset::Baseline.config();
    let a = run_scenario(&small_config(1), &scenario).unwrap();
    let b = run_scenario(&small_config(2), &scenario).unwrap();
    assert_ne!(a.market_states, b.market_states);
}

#[test]
fn test_unseeded_run_is_replayable() {
    let config = SimulationConfig {
        seed: None,
        ..small_config(0)
    };
    let scenario = ScenarioPreset::Crash.config();
    let first = run_scenario(&config, &scenario).unwrap();

    let replay = run_scenario(&small_config(first.seed), &scenario).unwrap();
    assert_eq!(first.market_states, replay.market_states);
    assert_eq!(first.liquidation_events, replay.liquidation_events);
}

#[test]
fn test_parallel_decisions_do_not_change_results() {
    let scenario = ScenarioPreset::Crash.config();
    let seq = run_scenario(&small_config(21), &scenario).unwrap();
    let par = run_scenario(
        &SimulationConfig {
            parallel_decisions: true,
            ..small_config(21)
        },
        &scenario,
    )
    .unwrap();
    assert_eq!(seq.market_states, par.market_states);
    assert_eq!(seq.liquidation_events, par.liquidation_events);
}

// ═══════════════════════════════════════════════════════════════════════
// Opening book and shocks
// ═══════════════════════════════════════════════════════════════════════

fn price_shock(name: &str) -> ScenarioConfig {
    ScenarioConfig {
        market_shock: Some(-0.30),
        ..ScenarioConfig::named(name)
    }
}

#[test]
fn test_new_simulation_holds_opening_book() {
    let sim = Simulation::new(small_config(4), ScenarioPreset::Baseline.config()).unwrap();
    assert!(sim.population.open_position_count() > 0);
    assert!(sim.events().is_empty());
    assert!(sim.market.total_borrowed.values().any(|b| *b > 0.0));
}

#[test]
fn test_price_shock_hits_opening_book() {
    let calm = Simulation::new(small_config(11), ScenarioConfig::named("calm")).unwrap();
    let shocked = Simulation::new(small_config(11), price_shock("shocked")).unwrap();

    assert_eq!(
        calm.population.open_position_count(),
        shocked.population.open_position_count()
    );
    let calm_breaches = detect(&calm.population, &calm.market);
    let shocked_breaches = detect(&shocked.population, &shocked.market);
    assert!(shocked_breaches.len() > calm_breaches.len());
}

#[test]
fn test_price_shock_alone_liquidates_more() {
    let config = SimulationConfig {
        agents: 1_000,
        ..small_config(42)
    };
    let mut calm = Simulation::new(config.clone(), ScenarioConfig::named("calm")).unwrap();
    let mut shocked = Simulation::new(config, price_shock("shocked")).unwrap();

    let calm_first = calm.step();
    let shocked_first = shocked.step();
    assert!(shocked_first.liquidations > calm_first.liquidations);
}

// ═══════════════════════════════════════════════════════════════════════
// Crash vs baseline
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn test_crash_riskier_than_baseline() {
    let config = SimulationConfig {
        agents: 1_000,
        steps: 100,
        seed: Some(42),
        ..SimulationConfig::default()
    };
    let baseline = run_scenario(&config, &ScenarioPreset::Baseline.config()).unwrap();
    let crash = run_scenario(&config, &ScenarioPreset::Crash.config()).unwrap();

    println!(
        "baseline: {} liquidations, risk {:.4} | crash: {} liquidations, risk {:.4}",
        baseline.liquidation_events.len(),
        baseline.risk_metrics.systemic_risk,
        crash.liquidation_events.len(),
        crash.risk_metrics.systemic_risk
    );

    assert!(!crash.liquidation_events.is_empty());
    assert!(crash.risk_metrics.systemic_risk > baseline.risk_metrics.systemic_risk);
    assert!(crash.liquidation_events.len() > baseline.liquidation_events.len());
    assert!(crash.liquidation_events.iter().any(|e| e.cascade_round == 0));
    assert!(crash.risk_metrics.avg_volatility > baseline.risk_metrics.avg_volatility);
    assert!(crash.market_states[0].price(cascade_sim::market::Asset::Eth) < 2_000.0);

    assert!(!crash.cascades.is_empty());
    for c in &crash.cascades {
        for r in &c.details {
            assert!(r.market_impact <= MAX_MARKET_IMPACT);
        }
    }
}

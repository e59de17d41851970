use std::collections::BTreeMap;

use cascade_sim::orchestrator::*;
use cascade_sim::scenario::{ScenarioConfig, ScenarioPreset};
use cascade_sim::simulation::SimulationConfig;
use cascade_sim::SimError;

fn config() -> SimulationConfig {
    SimulationConfig {
        agents: 150,
        steps: 25,
        seed: Some(9),
        ..SimulationConfig::default()
    }
}

fn presets(names: &[&str]) -> Vec<ScenarioConfig> {
    names
        .iter()
        .map(|n| ScenarioPreset::from_name(n).unwrap().config())
        .collect()
}

fn comparison(entries: &[(&str, f64, usize, f64)]) -> Comparison {
    let mut c = Comparison {
        scenarios: Vec::new(),
        risk_comparison: BTreeMap::new(),
        liquidation_comparison: BTreeMap::new(),
        pnl_comparison: BTreeMap::new(),
        worst_case: None,
    };
    for (name, risk, liqs, pnl) in entries {
        c.scenarios.push(name.to_string());
        c.risk_comparison.insert(name.to_string(), *risk);
        c.liquidation_comparison.insert(name.to_string(), *liqs);
        c.pnl_comparison.insert(name.to_string(), *pnl);
    }
    c
}

const GENERAL: [&str; 3] = [
    "Maintain real-time monitoring of all risk metrics",
    "Ensure adequate capital reserves for stress scenarios",
    "Regular parameter optimization based on market conditions",
];

// ═══════════════════════════════════════════════════════════════════════
// Construction
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn test_empty_scenario_list_rejected() {
    let err = Orchestrator::new(config(), Vec::new()).unwrap_err();
    assert!(matches!(err, SimError::InvalidConfig(_)));
}

#[test]
fn test_duplicate_names_rejected() {
    let err = Orchestrator::new(config(), presets(&["crash", "baseline", "crash"])).unwrap_err();
    assert!(matches!(err, SimError::InvalidConfig(_)));
}

#[test]
fn test_invalid_scenario_rejected_up_front() {
    let bad = ScenarioConfig {
        volatility_multiplier: Some(-2.0),
        ..ScenarioConfig::named("bad")
    };
    let err = Orchestrator::new(config(), vec![bad]).unwrap_err();
    assert!(matches!(err, SimError::InvalidScenario { .. }));
}

#[test]
fn test_unseeded_config_pinned() {
    let orch = Orchestrator::new(
        SimulationConfig {
            seed: None,
            ..config()
        },
        presets(&["baseline"]),
    )
    .unwrap();
    assert!(orch.config.seed.is_some());
}

// ═══════════════════════════════════════════════════════════════════════
// Runs
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn test_parallel_matches_sequential() {
    let orch = Orchestrator::new(config(), presets(&["baseline", "crash", "black_swan"])).unwrap();
    let seq = orch.run().unwrap();
    let par = orch.run_parallel().unwrap();

    assert_eq!(seq.comparison, par.comparison);
    assert_eq!(seq.recommendations, par.recommendations);
    for (a, b) in seq.results.iter().zip(&par.results) {
        assert_eq!(a.scenario_name, b.scenario_name);
        assert_eq!(a.market_states, b.market_states);
        assert_eq!(a.liquidation_events, b.liquidation_events);
    }
}

#[test]
fn test_scenarios_share_seed_and_order() {
    let orch = Orchestrator::new(config(), presets(&["volatility_spike", "baseline"])).unwrap();
    let report = orch.run().unwrap();
    assert_eq!(report.comparison.scenarios, vec!["volatility_spike", "baseline"]);
    assert!(report.results.iter().all(|r| r.seed == 9));
    assert!(report.comparison.worst_case.is_some());
}

#[test]
fn test_worst_case_from_results() {
    let orch = Orchestrator::new(config(), presets(&["baseline", "black_swan"])).unwrap();
    let report = orch.run().unwrap();
    let c = &report.comparison;

    let worst = c.worst_case.clone().unwrap();
    let worst_risk = c.risk_comparison[&worst];
    for name in &c.scenarios {
        assert!(c.risk_comparison[name] <= worst_risk);
    }
    assert_eq!(
        report.recommendations[report.recommendations.len() - 4],
        format!(
            "Worst-case scenario: {}. Develop specific contingency plans for this scenario.",
            worst
        )
    );
}

// ═══════════════════════════════════════════════════════════════════════
// Recommendations
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn test_critical_risk_recommendation() {
    let mut c = comparison(&[("baseline", 0.2, 10, 0.0), ("black_swan", 0.8, 150, 30_000.0)]);
    c.worst_case = Some("black_swan".to_string());
    let recs = recommendations(&c);

    assert!(recs[0].starts_with("CRITICAL"));
    assert!(recs[1].starts_with("High liquidation activity expected"));
    assert!(recs[2].contains("hedging"));
    assert!(recs[3].starts_with("Worst-case scenario: black_swan."));
    assert_eq!(&recs[4..], &GENERAL);
}

#[test]
fn test_warning_risk_recommendation() {
    let c = comparison(&[("crash", 0.6, 20, 100.0)]);
    let recs = recommendations(&c);
    assert!(recs[0].starts_with("WARNING"));
    assert_eq!(recs.len(), 4);
    assert_eq!(&recs[1..], &GENERAL);
}

#[test]
fn test_calm_comparison_only_general_items() {
    let c = comparison(&[("baseline", 0.5, 100, 0.0), ("crash", 0.1, 0, 20_000.0)]);
    // risk not above 0.5, liquidations not above 100, pnl std exactly 10_000
    assert_eq!(recommendations(&c), GENERAL.to_vec());
}

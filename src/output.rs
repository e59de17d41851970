use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::liquidation::{CascadeReport, LiquidationEvent};
use crate::market::Asset;
use crate::metrics::RiskMetrics;
use crate::orchestrator::{Comparison, OrchestratorReport};
use crate::simulation::SimulationResult;

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// One row per step: prices, utilization and liquidity per asset, then
/// the scalar counters.
pub fn save_snapshots_csv(result: &SimulationResult, path: &Path) -> Result<()> {
    ensure_parent(path)?;
    let mut wtr = csv::Writer::from_path(path)?;

    let mut header = vec!["step".to_string()];
    for asset in Asset::ALL {
        header.push(format!("price_{}", asset));
        header.push(format!("utilization_{}", asset));
        header.push(format!("liquidity_{}", asset));
    }
    header.extend(["gas_price", "liquidations_24h", "volume_24h"].iter().map(|s| s.to_string()));
    wtr.write_record(&header)?;

    for (step, state) in result.market_states.iter().enumerate() {
        let mut row = vec![step.to_string()];
        for asset in Asset::ALL {
            row.push(format!("{:.6}", state.price(asset)));
            row.push(format!("{:.6}", state.utilization(asset)));
            row.push(format!("{:.2}", state.liquidity_of(asset)));
        }
        row.push(format!("{:.4}", state.gas_price));
        row.push(state.liquidations_24h.to_string());
        row.push(format!("{:.2}", state.volume_24h));
        wtr.write_record(&row)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn save_liquidations_csv(events: &[LiquidationEvent], path: &Path) -> Result<()> {
    ensure_parent(path)?;
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record([
        "step",
        "agent",
        "position",
        "health_factor",
        "collateral_value",
        "debt_value",
        "cascade_round",
        "liquidator",
    ])?;

    for e in events {
        wtr.write_record(&[
            e.step.to_string(),
            e.agent.to_string(),
            e.position.to_string(),
            format!("{:.6}", e.health_factor),
            format!("{:.2}", e.collateral_value),
            format!("{:.2}", e.debt_value),
            e.cascade_round.to_string(),
            e.liquidator.map(|l| l.to_string()).unwrap_or_default(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

/// One row per cascade round.
pub fn save_cascades_csv(cascades: &[CascadeReport], path: &Path) -> Result<()> {
    ensure_parent(path)?;
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record([
        "step",
        "round",
        "liquidations",
        "losses",
        "market_impact",
        "cumulative_losses",
        "systemic_risk",
        "capped",
    ])?;

    for c in cascades {
        for r in &c.details {
            wtr.write_record(&[
                c.step.to_string(),
                r.round.to_string(),
                r.liquidations.to_string(),
                format!("{:.2}", r.losses),
                format!("{:.6}", r.market_impact),
                format!("{:.2}", r.cumulative_losses),
                format!("{:.6}", c.systemic_risk),
                c.capped.to_string(),
            ])?;
        }
    }
    wtr.flush()?;
    Ok(())
}

pub fn save_result_json(result: &SimulationResult, path: &Path) -> Result<()> {
    ensure_parent(path)?;
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, result)?;
    Ok(())
}

#[derive(Serialize)]
struct ScenarioSummary<'a> {
    seed: u64,
    steps: u64,
    agents: usize,
    risk_metrics: &'a RiskMetrics,
    cascade_systemic_risk: f64,
    cascade_rounds: u32,
    confidence_interval: (f64, f64),
}

#[derive(Serialize)]
struct ComparisonExport<'a> {
    generated_at: DateTime<Utc>,
    comparison: &'a Comparison,
    recommendations: &'a [String],
    scenarios: BTreeMap<&'a str, ScenarioSummary<'a>>,
}

/// Cross-scenario comparison plus a compact per-scenario summary.
pub fn save_comparison_json(report: &OrchestratorReport, path: &Path) -> Result<()> {
    ensure_parent(path)?;
    let scenarios = report
        .results
        .iter()
        .map(|r| {
            (
                r.scenario_name.as_str(),
                ScenarioSummary {
                    seed: r.seed,
                    steps: r.steps,
                    agents: r.agents,
                    risk_metrics: &r.risk_metrics,
                    cascade_systemic_risk: r.cascade_analysis.systemic_risk,
                    cascade_rounds: r.cascade_analysis.rounds,
                    confidence_interval: r.confidence_interval,
                },
            )
        })
        .collect();

    let export = ComparisonExport {
        generated_at: Utc::now(),
        comparison: &report.comparison,
        recommendations: &report.recommendations,
        scenarios,
    };
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, &export)?;
    Ok(())
}

/// Every per-run artifact into `output_dir`.
pub fn save_all(result: &SimulationResult, output_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(output_dir)?;
    save_snapshots_csv(result, &output_dir.join("snapshots.csv"))?;
    save_liquidations_csv(&result.liquidation_events, &output_dir.join("liquidations.csv"))?;
    save_cascades_csv(&result.cascades, &output_dir.join("cascades.csv"))?;
    save_result_json(result, &output_dir.join("result.json"))?;
    Ok(())
}

/// Human-readable run summary on stdout.
pub fn print_summary(result: &SimulationResult) {
    let m = &result.risk_metrics;
    let c = &result.cascade_analysis;
    println!(
        "  {:<18} steps={} agents={} seed={} time={:.2}s",
        result.scenario_name, result.steps, result.agents, result.seed, result.execution_time
    );
    println!(
        "    liquidations={} rate={:.6} systemic_risk={:.4} ci=[{:.3}, {:.3}]",
        m.total_liquidations,
        m.liquidation_rate,
        m.systemic_risk,
        result.confidence_interval.0,
        result.confidence_interval.1
    );
    println!(
        "    avg_vol={:.4} max_vol={:.4} avg_util={:.4}",
        m.avg_volatility, m.max_volatility, m.avg_utilization
    );
    println!(
        "    cascades={} worst: step={} rounds={} liquidations={} losses={:.2} score={:.4}{}",
        result.cascades.len(),
        c.step,
        c.rounds,
        c.total_liquidations,
        c.total_losses,
        c.systemic_risk,
        if c.capped { " (round cap reached)" } else { "" }
    );
}

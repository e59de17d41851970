use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use cascade_sim::config::RunFile;
use cascade_sim::orchestrator::Orchestrator;
use cascade_sim::output;
use cascade_sim::scenario::{ScenarioConfig, ScenarioPreset};
use cascade_sim::simulation::{Simulation, SimulationConfig};
use cascade_sim::SimError;

#[derive(Parser)]
#[command(name = "cascade-sim", about = "Agent-based liquidation cascade simulator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct RunArgs {
    /// Number of agents
    #[arg(long, default_value = "10000")]
    agents: usize,

    /// Number of time steps (days)
    #[arg(long, default_value = "1000")]
    steps: u64,

    /// Random seed; drawn from entropy when omitted
    #[arg(long)]
    seed: Option<u64>,

    /// Output directory
    #[arg(long, default_value = "output")]
    output_dir: String,

    /// Evaluate agent decisions on all cores
    #[arg(long)]
    parallel_decisions: bool,
}

impl RunArgs {
    fn simulation_config(&self) -> SimulationConfig {
        SimulationConfig {
            agents: self.agents,
            steps: self.steps,
            seed: self.seed,
            parallel_decisions: self.parallel_decisions,
            ..SimulationConfig::default()
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single scenario
    Run {
        /// Preset name (see `presets`); flags below override its shocks
        #[arg(long, default_value = "baseline")]
        preset: String,

        /// Name for the run (defaults to the preset name)
        #[arg(long)]
        name: Option<String>,

        /// One-time price shock, e.g. -0.3
        #[arg(long, allow_hyphen_values = true)]
        market_shock: Option<f64>,

        /// Volatility multiplier
        #[arg(long)]
        volatility_multiplier: Option<f64>,

        /// One-time liquidity shock, e.g. -0.5
        #[arg(long, allow_hyphen_values = true)]
        liquidity_shock: Option<f64>,

        /// Annualized drift
        #[arg(long, allow_hyphen_values = true)]
        drift: Option<f64>,

        #[command(flatten)]
        common: RunArgs,
    },

    /// Run several scenarios and compare them
    Compare {
        /// Comma-separated preset names, or "all"
        #[arg(long, default_value = "baseline,crash")]
        presets: String,

        /// TOML run file; replaces --presets and the run flags
        #[arg(long)]
        config: Option<PathBuf>,

        /// Run scenarios concurrently
        #[arg(long)]
        parallel: bool,

        #[command(flatten)]
        common: RunArgs,
    },

    /// List built-in scenario presets
    Presets,
}

fn progress_bar(len: u64, template: &str) -> ProgressBar {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::with_template(template).unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    pb
}

fn run_single(scenario: ScenarioConfig, common: &RunArgs) -> Result<(), SimError> {
    let config = common.simulation_config();
    let sim = Simulation::new(config, scenario)?;

    println!(
        "Running scenario '{}': {} agents, {} steps, seed {}",
        sim.scenario.name,
        sim.population.len(),
        sim.config.steps,
        sim.seed()
    );

    let pb = progress_bar(sim.config.steps, "  [{bar:40}] {pos}/{len} steps ({eta})");
    let result = sim.run_with_progress(|_| pb.inc(1));
    pb.finish_and_clear();

    output::print_summary(&result);

    let dir = PathBuf::from(&common.output_dir).join(&result.scenario_name);
    output::save_all(&result, &dir)?;
    println!("  -> {}", dir.display());
    Ok(())
}

fn run_compare(
    presets: &str,
    config_path: Option<PathBuf>,
    parallel: bool,
    common: &RunArgs,
) -> Result<(), SimError> {
    let (config, scenarios) = match config_path {
        Some(path) => {
            let file = RunFile::load(&path)?;
            let scenarios = file.scenarios()?;
            (file.simulation, scenarios)
        }
        None => {
            let scenarios = if presets.trim() == "all" {
                ScenarioPreset::all().iter().map(|p| p.config()).collect()
            } else {
                presets
                    .split(',')
                    .map(|name| ScenarioPreset::from_name(name.trim()).map(|p| p.config()))
                    .collect::<Result<Vec<_>, _>>()?
            };
            (common.simulation_config(), scenarios)
        }
    };

    let orchestrator = Orchestrator::new(config, scenarios)?;
    println!(
        "Comparing {} scenarios: {} agents, {} steps, seed {}{}",
        orchestrator.scenarios.len(),
        orchestrator.config.agents,
        orchestrator.config.steps,
        orchestrator.config.seed.unwrap_or_default(),
        if parallel { " (parallel)" } else { "" }
    );

    let pb = progress_bar(
        orchestrator.scenarios.len() as u64,
        "  [{bar:40}] {pos}/{len} scenarios {msg}",
    );
    let report = if parallel {
        orchestrator.run_parallel_with_progress(|r| {
            pb.set_message(r.scenario_name.clone());
            pb.inc(1);
        })?
    } else {
        orchestrator.run_with_progress(|r| {
            pb.set_message(r.scenario_name.clone());
            pb.inc(1);
        })?
    };
    pb.finish_and_clear();

    let out = PathBuf::from(&common.output_dir);
    for result in &report.results {
        output::print_summary(result);
        output::save_all(result, &out.join(&result.scenario_name))?;
    }

    println!(
        "\nWorst case: {}",
        report.comparison.worst_case.as_deref().unwrap_or("-")
    );
    println!("Recommendations:");
    for rec in &report.recommendations {
        println!("  - {}", rec);
    }

    let path = out.join("comparison.json");
    output::save_comparison_json(&report, &path)?;
    println!("\nSaved comparison to {}", path.display());
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let outcome = match cli.command {
        Commands::Run {
            preset,
            name,
            market_shock,
            volatility_multiplier,
            liquidity_shock,
            drift,
            common,
        } => ScenarioPreset::from_name(&preset).and_then(|p| {
            let mut scenario = p.config();
            if let Some(name) = name {
                scenario.name = name;
            }
            scenario.market_shock = market_shock.or(scenario.market_shock);
            scenario.volatility_multiplier = volatility_multiplier.or(scenario.volatility_multiplier);
            scenario.liquidity_shock = liquidity_shock.or(scenario.liquidity_shock);
            scenario.drift = drift.or(scenario.drift);
            run_single(scenario, &common)
        }),

        Commands::Compare {
            presets,
            config,
            parallel,
            common,
        } => run_compare(&presets, config, parallel, &common),

        Commands::Presets => {
            println!("Built-in scenarios:");
            for p in ScenarioPreset::all() {
                println!("  {:<18} {}", p.name(), p.description());
            }
            Ok(())
        }
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

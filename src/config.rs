use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::scenario::{ScenarioConfig, ScenarioPreset};
use crate::simulation::SimulationConfig;

/// A TOML run description:
///
/// ```toml
/// presets = ["baseline", "crash"]
///
/// [simulation]
/// agents = 1000
/// steps = 100
/// seed = 42
///
/// [[scenario]]
/// name = "deep_crash"
/// market_shock = -0.45
/// volatility_multiplier = 3.0
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunFile {
    #[serde(default)]
    pub simulation: SimulationConfig,
    /// Built-in scenarios by name, run before the explicit ones
    #[serde(default)]
    pub presets: Vec<String>,
    #[serde(default)]
    pub scenario: Vec<ScenarioConfig>,
}

impl RunFile {
    pub fn load(path: &Path) -> Result<RunFile> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<RunFile> {
        let file: RunFile = toml::from_str(text)?;
        file.simulation.validate()?;
        Ok(file)
    }

    /// Presets resolved to descriptors, followed by the explicit scenarios.
    pub fn scenarios(&self) -> Result<Vec<ScenarioConfig>> {
        let mut out = Vec::with_capacity(self.presets.len() + self.scenario.len());
        for name in &self.presets {
            out.push(ScenarioPreset::from_name(name)?.config());
        }
        for s in &self.scenario {
            s.validate()?;
            out.push(s.clone());
        }
        Ok(out)
    }
}

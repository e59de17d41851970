use thiserror::Error;

/// Errors raised while building or exporting a simulation run.
///
/// Rejected agent actions (insufficient balance, vanished liquidation
/// target) are not errors; see [`crate::executor::ActionOutcome`].
#[derive(Debug, Error)]
pub enum SimError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid scenario '{name}': {reason}")]
    InvalidScenario { name: String, reason: String },

    #[error("cannot populate {requested} agents: {reason}")]
    Population { requested: usize, reason: String },

    #[error("unknown scenario preset '{0}'")]
    UnknownPreset(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, SimError>;

pub mod agents;
pub mod config;
pub mod error;
pub mod executor;
pub mod liquidation;
pub mod market;
pub mod metrics;
pub mod orchestrator;
pub mod output;
pub mod policy;
pub mod scenario;
pub mod simulation;

pub use error::{Result, SimError};

//! Interpretation Engine
//!
//! Document-scoped inference over a network of neuron-like nodes:
//! - Activation network with round-indexed values for recurrent links
//! - Depth-first value propagation queue with an oscillation ceiling
//! - Interpretation lattice of conflicting/caused-by decisions
//! - Branch-and-bound search with an undo log for cheap backtracking
//! - YAML scenarios and a parallel batch runner

pub mod batch;
pub mod document;
pub mod error;
pub mod lattice;
pub mod model;
pub mod network;
pub mod queue;
pub mod scenario;
pub mod search;

pub use document::{
    ActivationHandle, ActivationOutput, Counters, Document, DocumentOutcome, DocumentStatus,
    SelectedInterpretation,
};
pub use error::{EngineError, EngineResult, OscillationEntry, OscillationError};
pub use lattice::{Candidate, Decision, InterprId, InterprNode, Lattice};
pub use model::{ActivationFunction, Model, Neuron, NeuronId, Synapse, SynapseId};
pub use network::{Activation, ActivationId, ActivationNetwork, Link, RoundState};
pub use scenario::Scenario;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

// ============================================================================
// Configuration
// ============================================================================

/// Top-level YAML configuration file structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub engine: EngineConfig,
}

/// Limits applied to every document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Highest round index the propagation queue may write.
    pub max_round: usize,
    /// Changes of value, net or weight at or below this are ignored.
    pub weight_tolerance: f64,
    /// Search nodes created before the search turns greedy.
    pub max_search_nodes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_round: 20,
            weight_tolerance: 0.001,
            max_search_nodes: 100_000,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables only.
    /// Equivalent to from_yaml_and_env(None).
    pub fn from_env() -> Result<Self> {
        Self::from_yaml_and_env(None)
    }

    /// Load configuration from an optional YAML file, then override with env vars.
    ///
    /// Priority: env var > YAML > default
    ///
    /// If `yaml_path` is None, tries "config.yaml" in CWD. A missing file
    /// falls back to env vars / defaults.
    pub fn from_yaml_and_env(yaml_path: Option<&Path>) -> Result<Self> {
        let yaml = Self::load_yaml(yaml_path).engine;

        let config = Self {
            max_round: env_parse("ENGINE_MAX_ROUND").unwrap_or(yaml.max_round),
            weight_tolerance: env_parse("ENGINE_WEIGHT_TOLERANCE")
                .unwrap_or(yaml.weight_tolerance),
            max_search_nodes: env_parse("ENGINE_MAX_SEARCH_NODES")
                .unwrap_or(yaml.max_search_nodes),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.max_round >= 1, "max_round must be at least 1");
        anyhow::ensure!(
            self.weight_tolerance >= 0.0 && self.weight_tolerance.is_finite(),
            "weight_tolerance must be a finite, non-negative number"
        );
        anyhow::ensure!(self.max_search_nodes >= 1, "max_search_nodes must be at least 1");
        Ok(())
    }

    /// Try to load and parse a YAML config file. Returns defaults on any failure.
    fn load_yaml(yaml_path: Option<&Path>) -> YamlConfig {
        let default_path = Path::new("config.yaml");
        let path = yaml_path.unwrap_or(default_path);

        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_yaml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                    YamlConfig::default()
                }
            },
            Err(_) => {
                tracing::debug!(
                    "No config file at {}, using env vars / defaults",
                    path.display()
                );
                YamlConfig::default()
            }
        }
    }
}

fn env_parse<T: std::str::FromStr>(var: &str) -> Option<T> {
    std::env::var(var).ok().and_then(|s| s.parse().ok())
}

// ============================================================================
// Tests
// ============================================================================

//! Error taxonomy of the interpretation engine.
//!
//! Only two conditions are expected to reach a caller of a healthy document:
//! an oscillation that happens outside of any search branch (initial
//! propagation or commit replay) and a caller-requested interruption.
//! Branch-local oscillations and invalid candidate sets are pruned inside the
//! search and never surface here.

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::network::ActivationId;

/// Snapshot of one activation round taken when the round ceiling was hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OscillationEntry {
    pub activation: ActivationId,
    pub label: String,
    pub round: usize,
    pub value: f64,
    pub net: f64,
}

/// The propagation queue needed more than `max_round` rounds to converge.
///
/// `round` is the first round index above the ceiling that still changed,
/// `dump` lists the failing activation first, followed by everything that was
/// still queued at that moment.
#[derive(Debug, Clone, Error)]
#[error("maximum number of rounds reached at round {round}, the network might be oscillating")]
pub struct OscillationError {
    pub round: usize,
    pub dump: Vec<OscillationEntry>,
}

impl OscillationError {
    /// Human readable dump, one activation round per line.
    pub fn activations_dump(&self) -> String {
        self.dump
            .iter()
            .map(|e| {
                format!(
                    "{} {} round:{} value:{:.3} net:{:.3}",
                    e.activation, e.label, e.round, e.value, e.net
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Errors surfaced by documents, scenarios and the batch runner.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Oscillation(#[from] OscillationError),

    #[error("document {document} was interrupted")]
    Interrupted { document: Uuid },

    /// Mutation through a handle of another document or of a processed one.
    #[error("stale state for document {document}: {reason}")]
    StaleState { document: Uuid, reason: String },

    #[error("no consistent interpretation found for document {document}")]
    NoConsistentInterpretation { document: Uuid },

    #[error("unknown neuron: {0}")]
    UnknownNeuron(String),

    #[error("unknown interpretation node: {0}")]
    UnknownInterpretation(String),

    #[error("invalid scenario: {0}")]
    Scenario(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activations_dump_lists_every_entry() {
        let err = OscillationError {
            round: 21,
            dump: vec![
                OscillationEntry {
                    activation: ActivationId(3),
                    label: "Y".into(),
                    round: 21,
                    value: 22.0,
                    net: 22.0,
                },
                OscillationEntry {
                    activation: ActivationId(4),
                    label: "Z".into(),
                    round: 20,
                    value: 0.5,
                    net: 0.5,
                },
            ],
        };

        let dump = err.activations_dump();
        assert_eq!(dump.lines().count(), 2);
        assert!(dump.starts_with("A3 Y round:21"));
        assert!(err.to_string().contains("round 21"));
    }

    #[test]
    fn test_oscillation_converts_into_engine_error() {
        let err: EngineError = OscillationError {
            round: 5,
            dump: vec![],
        }
        .into();
        assert!(matches!(err, EngineError::Oscillation(ref e) if e.round == 5));
    }
}

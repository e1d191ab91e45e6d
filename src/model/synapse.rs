//! Weighted, directed connections between neurons.

use serde::{Deserialize, Serialize};

use super::neuron::NeuronId;

/// Index of a synapse inside its [`Model`](super::Model).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SynapseId(pub u32);

impl SynapseId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A synapse from `input` to `output`.
///
/// Recurrent synapses are feedback links: their contribution to round `k` of
/// the output is read from round `k - 1` of the input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Synapse {
    pub id: SynapseId,
    pub input: NeuronId,
    pub output: NeuronId,
    pub weight: f64,
    pub recurrent: bool,
}

impl Synapse {
    pub fn is_negative(&self) -> bool {
        self.weight < 0.0
    }
}

impl std::fmt::Display for Synapse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "S{} {}->{} w:{:.3} rec:{}",
            self.id.0, self.input, self.output, self.weight, self.recurrent
        )
    }
}

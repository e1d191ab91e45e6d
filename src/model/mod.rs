//! Neuron/synapse model.
//!
//! The model is the static side of the network: neurons with their bias and
//! transfer function, and synapses with their weights. Training and pattern
//! discovery live outside this crate, so the model is built once, wrapped in
//! an `Arc` and read by every [`Document`](crate::document::Document) that
//! runs against it.
//!
//! ## Modules
//!
//! - [`neuron`]: `Neuron`, `NeuronId`, `ActivationFunction`
//! - [`synapse`]: `Synapse`, `SynapseId`

pub mod neuron;
pub mod synapse;

pub use neuron::{ActivationFunction, Neuron, NeuronId};
pub use synapse::{Synapse, SynapseId};

use std::collections::HashMap;

use crate::error::{EngineError, EngineResult};

/// Id-indexed tables of neurons and synapses with adjacency in both directions.
#[derive(Debug, Clone, Default)]
pub struct Model {
    neurons: Vec<Neuron>,
    synapses: Vec<Synapse>,
    inputs_of: Vec<Vec<SynapseId>>,
    outputs_of: Vec<Vec<SynapseId>>,
    by_label: HashMap<String, NeuronId>,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a hidden neuron. Labels are expected to be unique; a duplicate
    /// label shadows the previous neuron in [`Model::neuron_by_label`].
    pub fn add_neuron(
        &mut self,
        label: impl Into<String>,
        bias: f64,
        activation_function: ActivationFunction,
    ) -> NeuronId {
        self.push_neuron(label.into(), bias, activation_function, false)
    }

    /// Add an input neuron. Its activations take their value from the caller.
    pub fn add_input_neuron(&mut self, label: impl Into<String>) -> NeuronId {
        self.push_neuron(label.into(), 0.0, ActivationFunction::Identity, true)
    }

    fn push_neuron(
        &mut self,
        label: String,
        bias: f64,
        activation_function: ActivationFunction,
        is_input: bool,
    ) -> NeuronId {
        let id = NeuronId(self.neurons.len() as u32);
        self.by_label.insert(label.clone(), id);
        self.neurons.push(Neuron {
            id,
            label,
            bias,
            activation_function,
            is_input,
        });
        self.inputs_of.push(Vec::new());
        self.outputs_of.push(Vec::new());
        id
    }

    /// Connect two existing neurons.
    pub fn add_synapse(
        &mut self,
        input: NeuronId,
        output: NeuronId,
        weight: f64,
        recurrent: bool,
    ) -> EngineResult<SynapseId> {
        for n in [input, output] {
            if n.index() >= self.neurons.len() {
                return Err(EngineError::UnknownNeuron(n.to_string()));
            }
        }

        let id = SynapseId(self.synapses.len() as u32);
        self.synapses.push(Synapse {
            id,
            input,
            output,
            weight,
            recurrent,
        });
        self.inputs_of[output.index()].push(id);
        self.outputs_of[input.index()].push(id);
        Ok(id)
    }

    pub fn get_neuron(&self, id: NeuronId) -> Option<&Neuron> {
        self.neurons.get(id.index())
    }

    /// Panics on an id that was not issued by this model.
    pub fn neuron(&self, id: NeuronId) -> &Neuron {
        &self.neurons[id.index()]
    }

    pub fn synapse(&self, id: SynapseId) -> &Synapse {
        &self.synapses[id.index()]
    }

    pub fn get_synapse(&self, id: SynapseId) -> Option<&Synapse> {
        self.synapses.get(id.index())
    }

    pub fn neuron_by_label(&self, label: &str) -> Option<NeuronId> {
        self.by_label.get(label).copied()
    }

    /// Synapses feeding `neuron`, in creation order.
    pub fn input_synapses(&self, neuron: NeuronId) -> impl Iterator<Item = &Synapse> + '_ {
        self.inputs_of[neuron.index()]
            .iter()
            .map(move |s| &self.synapses[s.index()])
    }

    /// Synapses leaving `neuron`, in creation order.
    pub fn output_synapses(&self, neuron: NeuronId) -> impl Iterator<Item = &Synapse> + '_ {
        self.outputs_of[neuron.index()]
            .iter()
            .map(move |s| &self.synapses[s.index()])
    }

    pub fn neurons(&self) -> &[Neuron] {
        &self.neurons
    }

    pub fn neuron_count(&self) -> usize {
        self.neurons.len()
    }

    pub fn synapse_count(&self) -> usize {
        self.synapses.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adjacency_in_both_directions() {
        let mut model = Model::new();
        let a = model.add_input_neuron("A");
        let t = model.add_neuron("T", 0.0, ActivationFunction::default());
        let s = model.add_synapse(a, t, 0.8, false).unwrap();

        assert_eq!(model.output_synapses(a).map(|s| s.id).collect::<Vec<_>>(), vec![s]);
        assert_eq!(model.input_synapses(t).map(|s| s.id).collect::<Vec<_>>(), vec![s]);
        assert_eq!(model.input_synapses(a).count(), 0);
        assert_eq!(model.neuron_by_label("T"), Some(t));
        assert!(model.neuron(a).is_input);
    }

    #[test]
    fn test_synapse_to_unknown_neuron_rejected() {
        let mut model = Model::new();
        let a = model.add_input_neuron("A");
        let err = model.add_synapse(a, NeuronId(7), 1.0, false).unwrap_err();
        assert!(matches!(err, EngineError::UnknownNeuron(_)));
        assert_eq!(model.synapse_count(), 0);
    }
}

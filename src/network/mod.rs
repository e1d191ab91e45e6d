//! Activation network.
//!
//! Per-document graph of activations connected by links that mirror the
//! model's synapses. The graph is a `petgraph::DiGraph` used as an arena:
//! activations are never removed, so an [`ActivationId`] is also the node
//! index and every cross reference is an index lookup.
//!
//! ```text
//! Model (neurons, synapses) ──► ActivationNetwork ◄── ValueQueue (writes rounds)
//!                                      ▲
//!                               StateChangeLog (restores rounds)
//! ```
//!
//! The network only *computes* round states ([`ActivationNetwork::recompute_round`]);
//! writing them is reserved to the propagation queue so that every mutation
//! goes through the state-change log.

pub mod activation;

pub use activation::{Activation, ActivationId, RoundState, Rounds};

use std::collections::HashMap;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};

use crate::document::Counters;
use crate::lattice::InterprId;
use crate::model::{Model, Neuron, NeuronId, Synapse, SynapseId};

/// Directed, weighted edge between two activations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub synapse: SynapseId,
    pub weight: f64,
    pub recurrent: bool,
}

impl Link {
    pub fn is_negative(&self) -> bool {
        self.weight < 0.0
    }
}

/// Arena of activations and links for one document.
#[derive(Debug, Clone, Default)]
pub struct ActivationNetwork {
    graph: DiGraph<Activation, Link>,
    by_neuron: HashMap<NeuronId, Vec<ActivationId>>,
}

impl ActivationNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an activation with the next document-wide id. Round 0 starts
    /// from the neuron's bias with nothing fired.
    pub(crate) fn create_activation(
        &mut self,
        counters: &mut Counters,
        neuron: &Neuron,
        interpretation: InterprId,
        input_value: Option<f64>,
    ) -> ActivationId {
        let id = counters.next_activation_id();
        let idx = self.graph.add_node(Activation::new(
            id,
            neuron.id,
            neuron.bias,
            interpretation,
            input_value,
        ));
        debug_assert_eq!(idx.index(), id.index());
        self.by_neuron.entry(neuron.id).or_default().push(id);
        id
    }

    /// Link `source` to `target` through `synapse`.
    ///
    /// Returns false if this exact link already exists.
    pub(crate) fn link(
        &mut self,
        synapse: &Synapse,
        source: ActivationId,
        target: ActivationId,
    ) -> bool {
        let (s, t) = (node(source), node(target));
        if self
            .graph
            .edges_connecting(s, t)
            .any(|e| e.weight().synapse == synapse.id)
        {
            return false;
        }
        self.graph.add_edge(
            s,
            t,
            Link {
                synapse: synapse.id,
                weight: synapse.weight,
                recurrent: synapse.recurrent,
            },
        );
        true
    }

    pub fn get(&self, id: ActivationId) -> Option<&Activation> {
        self.graph.node_weight(node(id))
    }

    /// Panics on an id that was not issued by this network.
    pub fn activation(&self, id: ActivationId) -> &Activation {
        &self.graph[node(id)]
    }

    pub(crate) fn activation_mut(&mut self, id: ActivationId) -> &mut Activation {
        &mut self.graph[node(id)]
    }

    /// All activations in id order.
    pub fn activations(&self) -> impl Iterator<Item = &Activation> + '_ {
        self.graph.node_weights()
    }

    pub fn activations_of(&self, neuron: NeuronId) -> &[ActivationId] {
        self.by_neuron.get(&neuron).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn link_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Incoming links as `(source, link)`.
    pub fn input_links(&self, id: ActivationId) -> impl Iterator<Item = (ActivationId, &Link)> + '_ {
        self.graph
            .edges_directed(node(id), Direction::Incoming)
            .map(|e| (ActivationId(e.source().index() as u32), e.weight()))
    }

    /// Outgoing links as `(target, link)`.
    pub fn output_links(&self, id: ActivationId) -> impl Iterator<Item = (ActivationId, &Link)> + '_ {
        self.graph
            .edges_directed(node(id), Direction::Outgoing)
            .map(|e| (ActivationId(e.target().index() as u32), e.weight()))
    }

    /// Compute round `round` of `id` from its current inputs.
    ///
    /// Direct links read the input's state at `round`, recurrent links at
    /// `round - 1` (nothing at round 0). A suppressed activation keeps its net
    /// but neither fires nor contributes weight.
    pub fn recompute_round(
        &self,
        model: &Model,
        id: ActivationId,
        round: usize,
        suppressed: bool,
    ) -> RoundState {
        let act = self.activation(id);

        if let Some(input) = act.input_value {
            return RoundState {
                value: if suppressed { 0.0 } else { input },
                net: input,
                weight: 0.0,
            };
        }

        let neuron = model.neuron(act.neuron);
        let mut net = neuron.bias;
        for (source, link) in self.input_links(id) {
            let input_round = if link.recurrent {
                match round.checked_sub(1) {
                    Some(r) => r,
                    None => continue,
                }
            } else {
                round
            };
            net += self.activation(source).rounds().get(input_round).value * link.weight;
        }

        let value = if suppressed {
            0.0
        } else {
            neuron.activation_function.f(net)
        };
        RoundState {
            value,
            net,
            weight: value,
        }
    }

    /// Sum of the final-round weights of all activations.
    pub fn total_weight(&self) -> f64 {
        self.activations().map(|a| a.final_state().weight).sum()
    }

    /// Every round of every activation, in id order.
    pub fn snapshot(&self) -> Vec<Vec<RoundState>> {
        self.activations()
            .map(|a| a.rounds().states().to_vec())
            .collect()
    }
}

fn node(id: ActivationId) -> NodeIndex {
    NodeIndex::new(id.index())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ActivationFunction;

    fn model_with_feedback() -> (Model, NeuronId, NeuronId) {
        let mut model = Model::new();
        let x = model.add_input_neuron("X");
        let y = model.add_neuron("Y", 0.1, ActivationFunction::RectifiedLinearUnit);
        model.add_synapse(x, y, 2.0, false).unwrap();
        model.add_synapse(y, y, 0.5, true).unwrap();
        (model, x, y)
    }

    fn build(model: &Model, x: NeuronId, y: NeuronId) -> (ActivationNetwork, ActivationId, ActivationId) {
        let mut counters = Counters::default();
        let mut net = ActivationNetwork::new();
        let xa = net.create_activation(&mut counters, model.neuron(x), InterprId::ROOT, Some(1.0));
        let ya = net.create_activation(&mut counters, model.neuron(y), InterprId::ROOT, None);
        for s in model.input_synapses(y) {
            let source = if s.input == x { xa } else { ya };
            net.link(s, source, ya);
        }
        (net, xa, ya)
    }

    #[test]
    fn test_ids_follow_creation_order() {
        let (model, x, y) = model_with_feedback();
        let (net, xa, ya) = build(&model, x, y);
        assert_eq!((xa, ya), (ActivationId(0), ActivationId(1)));
        assert_eq!(net.activations_of(y), &[ya]);
        assert_eq!(net.activation(ya).final_state(), RoundState::initial(0.1));
    }

    #[test]
    fn test_duplicate_link_rejected() {
        let (model, x, y) = model_with_feedback();
        let (mut net, xa, ya) = build(&model, x, y);
        let s = model.input_synapses(y).next().unwrap().clone();
        assert!(!net.link(&s, xa, ya));
        assert_eq!(net.link_count(), 2);
    }

    #[test]
    fn test_recompute_defers_recurrent_contribution() {
        let (model, x, y) = model_with_feedback();
        let (mut net, xa, ya) = build(&model, x, y);

        let x0 = net.recompute_round(&model, xa, 0, false);
        net.activation_mut(xa).rounds_mut().set(0, x0, 0.001);
        let y0 = net.recompute_round(&model, ya, 0, false);
        net.activation_mut(ya).rounds_mut().set(0, y0, 0.001);

        // Round 0 ignores the self loop: 0.1 + 1.0 * 2.0
        assert!((y0.net - 2.1).abs() < 1e-12);
        assert_eq!(y0.weight, y0.value);

        // Round 1 adds 0.5 * y(0)
        let y1 = net.recompute_round(&model, ya, 1, false);
        assert!((y1.net - (2.1 + 0.5 * 2.1)).abs() < 1e-12);
    }

    #[test]
    fn test_suppressed_activation_keeps_net_only() {
        let (model, x, y) = model_with_feedback();
        let (net, xa, ya) = build(&model, x, y);

        let x0 = net.recompute_round(&model, xa, 0, true);
        assert_eq!(x0, RoundState { value: 0.0, net: 1.0, weight: 0.0 });

        let y0 = net.recompute_round(&model, ya, 0, true);
        assert_eq!(y0.value, 0.0);
        assert_eq!(y0.weight, 0.0);
        assert!((y0.net - 0.1).abs() < 1e-12);
    }
}

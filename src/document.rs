//! Documents.
//!
//! A [`Document`] owns one search session: the activation network built for
//! one input unit, the interpretation lattice over it, the propagation queue,
//! the undo log and the id counters. Documents never share mutable state, so
//! independent documents can be processed on separate threads against the
//! same `Arc<Model>`.
//!
//! Lifecycle: `Open` (inputs, activations and interpretation nodes may be
//! added) → `Processed` (the committed interpretation is readable), or
//! `Aborted` when the search failed or was interrupted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::lattice::{Candidate, InterprId, Lattice};
use crate::model::{Model, NeuronId, SynapseId};
use crate::network::{Activation, ActivationId, ActivationNetwork};
use crate::queue::{PropagationEnv, ValueQueue};
use crate::search::{SearchContext, SearchTree, StateChangeLog};
use crate::EngineConfig;

// ============================================================================
// Counters
// ============================================================================

/// Per-document id counters.
#[derive(Debug, Clone, Default)]
pub struct Counters {
    activation: u32,
    interpretation: u32,
    search_node: u32,
    visited: u64,
}

impl Counters {
    pub(crate) fn next_activation_id(&mut self) -> ActivationId {
        let id = ActivationId(self.activation);
        self.activation += 1;
        id
    }

    pub(crate) fn next_interpretation_id(&mut self) -> InterprId {
        let id = InterprId(self.interpretation);
        self.interpretation += 1;
        id
    }

    pub(crate) fn next_search_node_id(&mut self) -> u32 {
        let id = self.search_node;
        self.search_node += 1;
        id
    }

    /// Fresh traversal stamp, never 0.
    pub(crate) fn next_visited(&mut self) -> u64 {
        self.visited += 1;
        self.visited
    }

    pub fn search_nodes(&self) -> u32 {
        self.search_node
    }
}

// ============================================================================
// Outcome types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Open,
    Processed,
    Aborted,
}

/// Reference to an activation of a specific document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ActivationHandle {
    pub document: Uuid,
    pub id: ActivationId,
}

#[derive(Debug, Clone, Serialize)]
pub struct SelectedInterpretation {
    pub id: InterprId,
    pub label: String,
}

/// Final round of one activation.
#[derive(Debug, Clone, Serialize)]
pub struct ActivationOutput {
    pub id: ActivationId,
    pub neuron: NeuronId,
    pub label: String,
    pub interpretation: InterprId,
    pub value: f64,
    pub net: f64,
    pub weight: f64,
    pub last_round: usize,
}

/// What consumers read once a document has been processed.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentOutcome {
    pub document_id: Uuid,
    pub status: DocumentStatus,
    /// Selected interpretation nodes, root first.
    pub selected: Vec<SelectedInterpretation>,
    pub weight_sum: f64,
    pub search_nodes: usize,
    pub activations: Vec<ActivationOutput>,
    pub completed_at: DateTime<Utc>,
}

impl DocumentOutcome {
    pub fn is_selected(&self, label: &str) -> bool {
        self.selected.iter().any(|s| s.label == label)
    }

    /// First activation of the neuron labelled `label`.
    pub fn activation(&self, label: &str) -> Option<&ActivationOutput> {
        self.activations.iter().find(|a| a.label == label)
    }
}

// ============================================================================
// Document
// ============================================================================

pub struct Document {
    id: Uuid,
    model: Arc<Model>,
    config: EngineConfig,
    counters: Counters,
    network: ActivationNetwork,
    lattice: Lattice,
    candidate: Candidate,
    queue: ValueQueue,
    log: StateChangeLog,
    interrupted: Arc<AtomicBool>,
    status: DocumentStatus,
    search: Option<SearchTree>,
    outcome: Option<DocumentOutcome>,
}

impl Document {
    pub fn new(model: Arc<Model>, config: EngineConfig) -> Self {
        let mut counters = Counters::default();
        let lattice = Lattice::new(&mut counters);
        Self {
            id: Uuid::new_v4(),
            model,
            config,
            counters,
            network: ActivationNetwork::new(),
            lattice,
            candidate: Candidate::new(),
            queue: ValueQueue::new(),
            log: StateChangeLog::new(),
            interrupted: Arc::new(AtomicBool::new(false)),
            status: DocumentStatus::Open,
            search: None,
            outcome: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn status(&self) -> DocumentStatus {
        self.status
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn network(&self) -> &ActivationNetwork {
        &self.network
    }

    pub fn lattice(&self) -> &Lattice {
        &self.lattice
    }

    pub fn candidate(&self) -> &Candidate {
        &self.candidate
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    /// The committed search tree, once processed.
    pub fn search(&self) -> Option<&SearchTree> {
        self.search.as_ref()
    }

    pub fn outcome(&self) -> Option<&DocumentOutcome> {
        self.outcome.as_ref()
    }

    /// Flag another thread can set to stop the search.
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupted)
    }

    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::Relaxed);
    }

    // ------------------------------------------------------------------
    // Building
    // ------------------------------------------------------------------

    pub fn create_interpretation(
        &mut self,
        label: impl Into<String>,
        caused_by: &[InterprId],
    ) -> EngineResult<InterprId> {
        self.ensure_open()?;
        self.lattice.create_node(&mut self.counters, label, caused_by)
    }

    pub fn add_conflict(&mut self, a: InterprId, b: InterprId) -> EngineResult<()> {
        self.ensure_open()?;
        self.lattice.add_conflict(a, b)
    }

    /// Seed an activation with a fixed value and queue it for round 0.
    pub fn add_input(
        &mut self,
        neuron: NeuronId,
        value: f64,
        interpretation: InterprId,
    ) -> EngineResult<ActivationHandle> {
        self.new_activation(neuron, interpretation, Some(value))
    }

    /// Create an activation computed from its links.
    pub fn create_activation(
        &mut self,
        neuron: NeuronId,
        interpretation: InterprId,
    ) -> EngineResult<ActivationHandle> {
        self.new_activation(neuron, interpretation, None)
    }

    fn new_activation(
        &mut self,
        neuron: NeuronId,
        interpretation: InterprId,
        input_value: Option<f64>,
    ) -> EngineResult<ActivationHandle> {
        self.ensure_open()?;
        self.lattice.require(interpretation)?;
        let neuron = self
            .model
            .get_neuron(neuron)
            .ok_or_else(|| EngineError::UnknownNeuron(neuron.to_string()))?;

        let id = self
            .network
            .create_activation(&mut self.counters, neuron, interpretation, input_value);
        self.lattice.register_activation(interpretation, id);
        self.queue.enqueue(&mut self.network, id, 0);
        Ok(self.handle(id))
    }

    /// Link two activations through `synapse`. Returns false if the link
    /// already existed.
    pub fn link(
        &mut self,
        synapse: SynapseId,
        source: ActivationHandle,
        target: ActivationHandle,
    ) -> EngineResult<bool> {
        self.ensure_open()?;
        self.check_handle(source)?;
        self.check_handle(target)?;

        let synapse = self
            .model
            .get_synapse(synapse)
            .ok_or_else(|| EngineError::Scenario(format!("unknown synapse S{}", synapse.0)))?;
        let (from, to) = (
            self.network.activation(source.id).neuron,
            self.network.activation(target.id).neuron,
        );
        if synapse.input != from || synapse.output != to {
            return Err(EngineError::Scenario(format!(
                "synapse S{} does not connect {} to {}",
                synapse.id.0, from, to
            )));
        }

        let created = self.network.link(synapse, source.id, target.id);
        if created {
            self.enqueue_all_rounds(target.id);
        }
        Ok(created)
    }

    /// Link every activation to the activations of its neuron's output
    /// synapses, creating root-governed activations where none exist yet.
    ///
    /// Activations are visited in id order, including those created on the
    /// way. Returns the number of links created.
    pub fn link_forward(&mut self) -> EngineResult<usize> {
        self.ensure_open()?;
        let model = Arc::clone(&self.model);
        let mut created = 0;
        let mut next = 0;

        while next < self.network.len() {
            let source = ActivationId(next as u32);
            next += 1;
            let neuron = self.network.activation(source).neuron;

            for synapse in model.output_synapses(neuron) {
                let mut targets = self.network.activations_of(synapse.output).to_vec();
                if targets.is_empty() {
                    let id = self.network.create_activation(
                        &mut self.counters,
                        model.neuron(synapse.output),
                        InterprId::ROOT,
                        None,
                    );
                    self.lattice.register_activation(InterprId::ROOT, id);
                    targets.push(id);
                }
                for target in targets {
                    if self.network.link(synapse, source, target) {
                        created += 1;
                        self.enqueue_all_rounds(target);
                    }
                }
            }
        }

        debug!("Document {}: link_forward created {} links", self.id, created);
        Ok(created)
    }

    // ------------------------------------------------------------------
    // Processing
    // ------------------------------------------------------------------

    /// Drain the queue outside of any search branch and keep the result.
    ///
    /// An oscillation here is fatal for the document.
    pub fn propagate(&mut self) -> EngineResult<f64> {
        self.ensure_open()?;
        let env = PropagationEnv {
            model: self.model.as_ref(),
            candidate: &self.candidate,
            max_round: self.config.max_round,
            tolerance: self.config.weight_tolerance,
            stamp: self.counters.next_visited(),
        };
        self.log.set_depth(0);
        match self.queue.drain(&mut self.network, &env, &mut self.log) {
            Ok(delta) => {
                self.log.clear();
                Ok(delta)
            }
            Err(err) => {
                self.log.rollback_to(&mut self.network, 0);
                self.status = DocumentStatus::Aborted;
                Err(err.into())
            }
        }
    }

    /// Propagate all inputs, search for the best interpretation and commit it.
    pub fn process(&mut self) -> EngineResult<DocumentOutcome> {
        self.ensure_open()?;
        for id in (0..self.network.len()).map(|i| ActivationId(i as u32)) {
            self.enqueue_all_rounds(id);
        }
        self.propagate()?;

        let context = SearchContext {
            document: self.id,
            model: self.model.as_ref(),
            config: &self.config,
            counters: &mut self.counters,
            network: &mut self.network,
            lattice: &self.lattice,
            candidate: &mut self.candidate,
            queue: &mut self.queue,
            log: &mut self.log,
            interrupted: self.interrupted.as_ref(),
        };
        let tree = match context.run() {
            Ok(tree) => tree,
            Err(err) => {
                self.status = DocumentStatus::Aborted;
                return Err(err);
            }
        };

        self.status = DocumentStatus::Processed;
        let outcome = self.build_outcome(&tree);
        info!(
            "Document {} processed: {} interpretation(s) selected, weight-sum {:.4}, {} search nodes",
            self.id,
            outcome.selected.len(),
            outcome.weight_sum,
            outcome.search_nodes
        );
        self.search = Some(tree);
        self.outcome = Some(outcome.clone());
        Ok(outcome)
    }

    fn build_outcome(&self, tree: &SearchTree) -> DocumentOutcome {
        let selected = self
            .candidate
            .selected()
            .into_iter()
            .map(|id| SelectedInterpretation {
                id,
                label: self.lattice.label(id).to_string(),
            })
            .collect();

        let activations = self
            .network
            .activations()
            .map(|a| {
                let state = a.final_state();
                ActivationOutput {
                    id: a.id,
                    neuron: a.neuron,
                    label: self.model.neuron(a.neuron).label.clone(),
                    interpretation: a.interpretation,
                    value: state.value,
                    net: state.net,
                    weight: state.weight,
                    last_round: a.rounds().last_round(),
                }
            })
            .collect();

        DocumentOutcome {
            document_id: self.id,
            status: self.status,
            selected,
            weight_sum: tree.weight_sum,
            search_nodes: tree.node_count,
            activations,
            completed_at: Utc::now(),
        }
    }

    // ------------------------------------------------------------------
    // Access
    // ------------------------------------------------------------------

    pub fn handle(&self, id: ActivationId) -> ActivationHandle {
        ActivationHandle {
            document: self.id,
            id,
        }
    }

    pub fn activation(&self, handle: ActivationHandle) -> EngineResult<&Activation> {
        self.check_handle(handle)?;
        Ok(self.network.activation(handle.id))
    }

    /// One line per activation with its governing node and final state.
    /// `with_weights` adds the weight and every round's value.
    pub fn activations_to_string(&self, with_weights: bool) -> String {
        let mut out = String::new();
        for act in self.network.activations() {
            let state = act.final_state();
            out.push_str(&format!(
                "{} {} {}:{} value:{:.3} net:{:.3}",
                act.id,
                self.model.neuron(act.neuron).label,
                act.interpretation,
                self.lattice.label(act.interpretation),
                state.value,
                state.net
            ));
            if with_weights {
                let rounds: Vec<String> = act
                    .rounds()
                    .states()
                    .iter()
                    .enumerate()
                    .map(|(r, s)| format!("{}:{:.3}", r, s.value))
                    .collect();
                out.push_str(&format!(
                    " weight:{:.3} rounds:[{}]",
                    state.weight,
                    rounds.join(" ")
                ));
            }
            out.push('\n');
        }
        if let Some(tree) = &self.search {
            out.push_str(&format!("Best interpretation: {}\n", self.best_interpretation()));
            out.push_str(&format!("Final weight-sum: {:.4}\n", tree.weight_sum));
        }
        out
    }

    /// Labels of the selected interpretation nodes, root first.
    pub fn best_interpretation(&self) -> String {
        self.candidate
            .selected()
            .into_iter()
            .map(|id| self.lattice.label(id))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn enqueue_all_rounds(&mut self, id: ActivationId) {
        let last = self.network.activation(id).rounds().last_round();
        for round in 0..=last {
            self.queue.enqueue(&mut self.network, id, round);
        }
    }

    fn ensure_open(&self) -> EngineResult<()> {
        match self.status {
            DocumentStatus::Open => Ok(()),
            status => Err(EngineError::StaleState {
                document: self.id,
                reason: format!("document is {:?}", status).to_lowercase(),
            }),
        }
    }

    fn check_handle(&self, handle: ActivationHandle) -> EngineResult<()> {
        if handle.document != self.id {
            return Err(EngineError::StaleState {
                document: self.id,
                reason: format!(
                    "activation {} belongs to document {}",
                    handle.id, handle.document
                ),
            });
        }
        if self.network.get(handle.id).is_none() {
            return Err(EngineError::StaleState {
                document: self.id,
                reason: format!("unknown activation {}", handle.id),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ActivationFunction;

    fn chain_model() -> (Arc<Model>, NeuronId, NeuronId, SynapseId) {
        let mut model = Model::new();
        let x = model.add_input_neuron("X");
        let y = model.add_neuron("Y", 0.0, ActivationFunction::RectifiedHyperbolicTangent);
        let s = model.add_synapse(x, y, 1.0, false).unwrap();
        (Arc::new(model), x, y, s)
    }

    #[test]
    fn test_counters_are_per_document() {
        let (model, x, _, _) = chain_model();
        let mut a = Document::new(Arc::clone(&model), EngineConfig::default());
        let mut b = Document::new(model, EngineConfig::default());

        let ha = a.add_input(x, 1.0, InterprId::ROOT).unwrap();
        let hb = b.add_input(x, 1.0, InterprId::ROOT).unwrap();
        assert_eq!(ha.id, hb.id);
        assert_ne!(ha.document, hb.document);
    }

    #[test]
    fn test_foreign_handle_is_stale() {
        let (model, x, y, s) = chain_model();
        let mut a = Document::new(Arc::clone(&model), EngineConfig::default());
        let mut b = Document::new(model, EngineConfig::default());

        let foreign = a.add_input(x, 1.0, InterprId::ROOT).unwrap();
        let target = b.create_activation(y, InterprId::ROOT).unwrap();

        let err = b.link(s, foreign, target).unwrap_err();
        assert!(matches!(err, EngineError::StaleState { .. }));
        assert!(b.activation(foreign).is_err());
    }

    #[test]
    fn test_mutation_after_processing_is_stale() {
        let (model, x, _, _) = chain_model();
        let mut doc = Document::new(model, EngineConfig::default());
        doc.add_input(x, 1.0, InterprId::ROOT).unwrap();
        doc.link_forward().unwrap();
        doc.process().unwrap();

        assert_eq!(doc.status(), DocumentStatus::Processed);
        let err = doc.add_input(x, 2.0, InterprId::ROOT).unwrap_err();
        assert!(matches!(err, EngineError::StaleState { ref reason, .. } if reason.contains("processed")));
        assert!(doc.process().is_err());
    }

    #[test]
    fn test_link_rejects_mismatched_synapse() {
        let (model, x, y, s) = chain_model();
        let mut doc = Document::new(model, EngineConfig::default());
        let hx = doc.add_input(x, 1.0, InterprId::ROOT).unwrap();
        let hy = doc.create_activation(y, InterprId::ROOT).unwrap();

        assert!(doc.link(s, hx, hy).unwrap());
        assert!(!doc.link(s, hx, hy).unwrap());
        assert!(matches!(doc.link(s, hy, hx), Err(EngineError::Scenario(_))));
    }

    #[test]
    fn test_link_forward_creates_missing_targets() {
        let (model, x, y, _) = chain_model();
        let mut doc = Document::new(model, EngineConfig::default());
        doc.add_input(x, 1.0, InterprId::ROOT).unwrap();

        assert_eq!(doc.link_forward().unwrap(), 1);
        assert_eq!(doc.network().activations_of(y).len(), 1);
        assert_eq!(doc.link_forward().unwrap(), 0);
    }

    #[test]
    fn test_without_conflicts_search_is_a_single_leaf() {
        let (model, x, _, _) = chain_model();
        let mut doc = Document::new(model, EngineConfig::default());
        doc.add_input(x, 1.0, InterprId::ROOT).unwrap();
        doc.link_forward().unwrap();
        let outcome = doc.process().unwrap();

        let tree = doc.search().unwrap();
        assert!(tree.root.is_leaf());
        assert_eq!(tree.node_count, 1);
        assert!(tree.path.is_empty());

        let y = outcome.activation("Y").unwrap();
        assert!((y.value - 1.0_f64.tanh()).abs() < 1e-9);
        assert!((outcome.weight_sum - 1.0_f64.tanh()).abs() < 1e-9);
        assert_eq!(outcome.selected.len(), 1);
    }

    #[test]
    fn test_interrupt_before_search_restores_baseline() {
        let (model, x, _, _) = chain_model();
        let mut doc = Document::new(model, EngineConfig::default());
        let ix = doc.create_interpretation("ix", &[]).unwrap();
        doc.add_input(x, 1.0, ix).unwrap();
        doc.link_forward().unwrap();

        doc.interrupt_handle().store(true, Ordering::Relaxed);
        let err = doc.process().unwrap_err();

        assert!(matches!(err, EngineError::Interrupted { document } if document == doc.id()));
        assert_eq!(doc.status(), DocumentStatus::Aborted);
        assert!(doc.candidate().is_undecided(ix));
        assert_eq!(doc.network().total_weight(), 0.0);
    }

    #[test]
    fn test_activations_to_string_lists_every_activation() {
        let (model, x, _, _) = chain_model();
        let mut doc = Document::new(model, EngineConfig::default());
        doc.add_input(x, 1.0, InterprId::ROOT).unwrap();
        doc.link_forward().unwrap();
        doc.process().unwrap();

        let dump = doc.activations_to_string(true);
        assert!(dump.starts_with("A0 X I0:bottom value:1.000"));
        assert!(dump.contains("A1 Y"));
        assert!(dump.contains("rounds:[0:"));
        assert!(dump.ends_with("Best interpretation: bottom\nFinal weight-sum: 0.7616\n"));
    }

    #[test]
    fn test_dump_names_the_committed_interpretation() {
        let (model, x, _, _) = chain_model();
        let mut doc = Document::new(model, EngineConfig::default());
        let ix = doc.create_interpretation("ix", &[]).unwrap();
        doc.add_input(x, 1.0, ix).unwrap();
        doc.link_forward().unwrap();

        assert!(!doc.activations_to_string(false).contains("Best interpretation"));
        doc.process().unwrap();

        assert_eq!(doc.best_interpretation(), "bottom, ix");
        assert!(doc
            .activations_to_string(false)
            .contains("Best interpretation: bottom, ix\n"));
    }
}

//! Interpretation lattice.
//!
//! Nodes are boolean decision points: selecting one admits the activations it
//! governs into the interpretation of the document. Nodes are related by
//! symmetric `excludes` edges (conflicts) and by `caused_by` edges, an OR over
//! parent nodes. The root ("bottom") node has id 0 and is always selected.
//!
//! The lattice itself is append-only. What changes during the search is the
//! [`Candidate`], which records the current decision of every node.

pub mod candidate;

pub use candidate::{Candidate, Decision};

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::document::Counters;
use crate::error::{EngineError, EngineResult};
use crate::network::{ActivationId, ActivationNetwork};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InterprId(pub u32);

impl InterprId {
    pub const ROOT: InterprId = InterprId(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for InterprId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "I{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct InterprNode {
    pub id: InterprId,
    pub label: String,
    /// Nodes that may not be selected together with this one.
    pub excludes: BTreeSet<InterprId>,
    /// OR-parents. Empty means caused by the root.
    pub caused_by: Vec<InterprId>,
    /// Nodes listing this one in their `caused_by`.
    pub referenced_by: Vec<InterprId>,
    /// Activations governed by this node.
    pub activations: Vec<ActivationId>,
}

impl InterprNode {
    fn new(id: InterprId, label: String, caused_by: Vec<InterprId>) -> Self {
        Self {
            id,
            label,
            excludes: BTreeSet::new(),
            caused_by,
            referenced_by: Vec::new(),
            activations: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Lattice {
    nodes: Vec<InterprNode>,
    by_label: HashMap<String, InterprId>,
}

impl Lattice {
    pub const ROOT_LABEL: &'static str = "bottom";

    pub(crate) fn new(counters: &mut Counters) -> Self {
        let root = counters.next_interpretation_id();
        debug_assert_eq!(root, InterprId::ROOT);
        let mut by_label = HashMap::new();
        by_label.insert(Self::ROOT_LABEL.to_string(), root);
        Self {
            nodes: vec![InterprNode::new(root, Self::ROOT_LABEL.to_string(), Vec::new())],
            by_label,
        }
    }

    /// Create a decision node caused by any of `caused_by` (the root if empty).
    ///
    /// Labels are unique within a lattice, the root's included.
    pub(crate) fn create_node(
        &mut self,
        counters: &mut Counters,
        label: impl Into<String>,
        caused_by: &[InterprId],
    ) -> EngineResult<InterprId> {
        let label = label.into();
        if self.by_label.contains_key(&label) {
            return Err(EngineError::Scenario(format!(
                "duplicate interpretation label {label}"
            )));
        }
        for parent in caused_by {
            self.require(*parent)?;
        }

        let id = counters.next_interpretation_id();
        debug_assert_eq!(id.index(), self.nodes.len());
        let mut parents: Vec<InterprId> = caused_by.to_vec();
        parents.sort();
        parents.dedup();
        for parent in &parents {
            self.nodes[parent.index()].referenced_by.push(id);
        }
        self.by_label.insert(label.clone(), id);
        self.nodes.push(InterprNode::new(id, label, parents));
        Ok(id)
    }

    /// Declare `a` and `b` mutually exclusive.
    pub(crate) fn add_conflict(&mut self, a: InterprId, b: InterprId) -> EngineResult<()> {
        self.require(a)?;
        self.require(b)?;
        if a == b {
            return Err(EngineError::UnknownInterpretation(format!(
                "{a} cannot conflict with itself"
            )));
        }
        self.nodes[a.index()].excludes.insert(b);
        self.nodes[b.index()].excludes.insert(a);
        Ok(())
    }

    pub(crate) fn register_activation(&mut self, node: InterprId, activation: ActivationId) {
        self.nodes[node.index()].activations.push(activation);
    }

    pub fn require(&self, id: InterprId) -> EngineResult<&InterprNode> {
        self.get(id)
            .ok_or_else(|| EngineError::UnknownInterpretation(id.to_string()))
    }

    pub fn get(&self, id: InterprId) -> Option<&InterprNode> {
        self.nodes.get(id.index())
    }

    /// Panics on an id that was not issued by this lattice.
    pub fn node(&self, id: InterprId) -> &InterprNode {
        &self.nodes[id.index()]
    }

    pub fn nodes(&self) -> &[InterprNode] {
        &self.nodes
    }

    pub fn by_label(&self, label: &str) -> Option<InterprId> {
        self.by_label.get(label).copied()
    }

    pub fn label(&self, id: InterprId) -> &str {
        &self.nodes[id.index()].label
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when nothing but the root exists.
    pub fn is_trivial(&self) -> bool {
        self.nodes.len() == 1
    }

    /// A candidate is valid when no selected node has a selected conflict and
    /// no selected node has lost all of its causes.
    pub fn is_valid(&self, candidate: &Candidate) -> bool {
        self.nodes
            .iter()
            .filter(|n| candidate.is_selected(n.id))
            .all(|n| {
                let conflict_free = n.excludes.iter().all(|e| !candidate.is_selected(*e));
                let caused = n.caused_by.is_empty()
                    || n
                        .caused_by
                        .iter()
                        .any(|p| candidate.get(*p) != Decision::Excluded);
                conflict_free && caused
            })
    }

    /// Decision nodes that compete with `activation`.
    ///
    /// These are the nodes excluded by the activation's own node plus the
    /// nodes behind its inhibitory feedback: the inputs of every negative
    /// recurrent incoming link and, one level further, their own inputs.
    pub fn conflicts_of(
        &self,
        network: &ActivationNetwork,
        activation: ActivationId,
    ) -> BTreeSet<InterprId> {
        let act = network.activation(activation);
        let mut out: BTreeSet<InterprId> = self.node(act.interpretation).excludes.clone();

        for (inhibitor, link) in network.input_links(activation) {
            if !(link.recurrent && link.is_negative()) {
                continue;
            }
            out.insert(network.activation(inhibitor).interpretation);
            for (source, _) in network.input_links(inhibitor) {
                out.insert(network.activation(source).interpretation);
            }
        }

        out.remove(&InterprId::ROOT);
        out.remove(&act.interpretation);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ActivationFunction, Model};

    fn lattice() -> (Lattice, Counters) {
        let mut counters = Counters::default();
        (Lattice::new(&mut counters), counters)
    }

    #[test]
    fn test_root_is_bottom() {
        let (l, _) = lattice();
        assert_eq!(l.by_label("bottom"), Some(InterprId::ROOT));
        assert!(l.is_trivial());
        assert!(l.is_valid(&Candidate::new()));
    }

    #[test]
    fn test_duplicate_label_rejected() {
        let (mut l, mut c) = lattice();
        let a = l.create_node(&mut c, "a", &[]).unwrap();

        let err = l.create_node(&mut c, "a", &[]).unwrap_err();
        assert!(matches!(err, EngineError::Scenario(ref m) if m.contains("duplicate")));
        assert!(l.create_node(&mut c, Lattice::ROOT_LABEL, &[]).is_err());
        assert_eq!(l.by_label("a"), Some(a));
        assert_eq!(l.len(), 2);

        // The failed calls consumed no id.
        assert_eq!(l.create_node(&mut c, "b", &[]).unwrap(), InterprId(2));
    }

    #[test]
    fn test_conflicts_are_symmetric() {
        let (mut l, mut c) = lattice();
        let a = l.create_node(&mut c, "a", &[]).unwrap();
        let b = l.create_node(&mut c, "b", &[]).unwrap();
        l.add_conflict(a, b).unwrap();

        assert!(l.node(a).excludes.contains(&b));
        assert!(l.node(b).excludes.contains(&a));
        assert!(l.add_conflict(a, a).is_err());
        assert!(l.add_conflict(a, InterprId(9)).is_err());
    }

    #[test]
    fn test_validity_rejects_selected_conflicts() {
        let (mut l, mut c) = lattice();
        let a = l.create_node(&mut c, "a", &[]).unwrap();
        let b = l.create_node(&mut c, "b", &[]).unwrap();
        l.add_conflict(a, b).unwrap();

        let mut cand = Candidate::new();
        cand.set(a, Decision::Selected);
        assert!(l.is_valid(&cand));
        cand.set(b, Decision::Selected);
        assert!(!l.is_valid(&cand));
        cand.set(b, Decision::Excluded);
        assert!(l.is_valid(&cand));
    }

    #[test]
    fn test_validity_requires_one_cause() {
        let (mut l, mut c) = lattice();
        let p = l.create_node(&mut c, "p", &[]).unwrap();
        let q = l.create_node(&mut c, "q", &[]).unwrap();
        let child = l.create_node(&mut c, "child", &[p, q]).unwrap();
        assert_eq!(l.node(p).referenced_by, vec![child]);

        let mut cand = Candidate::new();
        cand.set(child, Decision::Selected);
        cand.set(p, Decision::Excluded);
        assert!(l.is_valid(&cand));
        cand.set(q, Decision::Excluded);
        assert!(!l.is_valid(&cand));
        cand.set(q, Decision::Selected);
        assert!(l.is_valid(&cand));
    }

    #[test]
    fn test_conflicts_follow_inhibitory_feedback() {
        let mut model = Model::new();
        let x = model.add_input_neuron("X");
        let t = model.add_neuron("T", 0.0, ActivationFunction::default());
        let inh = model.add_neuron("INH", 0.0, ActivationFunction::default());
        let s_xt = model.add_synapse(x, t, 1.0, false).unwrap();
        let s_t_inh = model.add_synapse(t, inh, 1.0, false).unwrap();
        let s_inh_t = model.add_synapse(inh, t, -2.0, true).unwrap();

        let (mut l, mut c) = lattice();
        let ix = l.create_node(&mut c, "ix", &[]).unwrap();
        let it = l.create_node(&mut c, "it", &[]).unwrap();
        let other = l.create_node(&mut c, "other", &[]).unwrap();
        l.add_conflict(it, other).unwrap();

        let mut net = ActivationNetwork::new();
        let xa = net.create_activation(&mut c, model.neuron(x), ix, Some(1.0));
        let ta = net.create_activation(&mut c, model.neuron(t), it, None);
        let ia = net.create_activation(&mut c, model.neuron(inh), InterprId::ROOT, None);
        net.link(model.synapse(s_xt), xa, ta);
        net.link(model.synapse(s_t_inh), ta, ia);
        net.link(model.synapse(s_inh_t), ia, ta);

        let conflicts = l.conflicts_of(&net, ta);
        // `other` via excludes; the inhibitor's input is `ta` itself.
        assert_eq!(conflicts.into_iter().collect::<Vec<_>>(), vec![other]);
        // Plain forward links carry no conflicts.
        assert!(l.conflicts_of(&net, xa).is_empty());
    }
}

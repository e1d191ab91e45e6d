//! Branch-and-bound search over interpretation decisions.
//!
//! Every search node forces one undecided interpretation node, explores the
//! *selected* branch and then the *excluded* branch, and keeps the branch with
//! the higher accumulated weight. Each branch applies its decision, re-seeds
//! the propagation queue with the governed activations and drains it; the
//! resulting weight delta is the branch's score before its subtree is
//! explored. Between the two branches the state-change log rolls the network
//! back to the node's mark, so both start from the same baseline.
//!
//! The tree is driven by an explicit stack of boxed frames rather than by
//! recursion. A branch owns its child node; the losing child is dropped when
//! its parent resolves. Once the root resolves, the winning path is replayed
//! once at depth 0 and its log entries are discarded.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::document::Counters;
use crate::error::{EngineError, EngineResult, OscillationError};
use crate::lattice::{Candidate, Decision, InterprId, Lattice};
use crate::model::Model;
use crate::network::ActivationNetwork;
use crate::queue::{PropagationEnv, ValueQueue};
use crate::EngineConfig;

use super::log::{LogMark, StateChangeLog};

// ============================================================================
// Tree types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchKind {
    Selected,
    Excluded,
}

impl BranchKind {
    pub fn decision(self) -> Decision {
        match self {
            Self::Selected => Decision::Selected,
            Self::Excluded => Decision::Excluded,
        }
    }

    fn index(self) -> usize {
        match self {
            Self::Selected => 0,
            Self::Excluded => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PruneReason {
    /// The candidate violated the lattice constraints.
    Invalid,
    /// Propagation did not converge within the round ceiling.
    Oscillation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Unvisited,
    /// The branch is about to be applied, or its subtree is being explored.
    Exploring(BranchKind),
    Resolved,
}

/// One alternative under a search node.
#[derive(Debug)]
pub struct Branch {
    pub kind: BranchKind,
    pub visited: bool,
    pub searched: bool,
    pub pruned: Option<PruneReason>,
    /// Weight delta produced by applying the decision.
    pub weight: f64,
    /// Best weight-sum reachable through this branch.
    pub weight_sum: f64,
    pub child: Option<Box<SearchNode>>,
}

impl Branch {
    fn new(kind: BranchKind) -> Self {
        Self {
            kind,
            visited: false,
            searched: false,
            pruned: None,
            weight: 0.0,
            weight_sum: f64::NEG_INFINITY,
            child: None,
        }
    }

    fn prune(&mut self, reason: PruneReason) {
        self.pruned = Some(reason);
        self.searched = true;
        self.weight_sum = f64::NEG_INFINITY;
    }
}

#[derive(Debug)]
pub struct SearchNode {
    pub id: u32,
    pub depth: usize,
    /// Interpretation node forced here; `None` for a leaf.
    pub decision: Option<InterprId>,
    /// Accumulated weight of the path from the root, including this node.
    pub weight_sum: f64,
    /// Weight-sum reported to the parent.
    pub result: f64,
    pub branches: [Branch; 2],
    pub state: NodeState,
    /// Set once both branches (or the greedy one) have been explored.
    pub explored: bool,
    pub log_mark: LogMark,
    pub winner: Option<BranchKind>,
    /// Created after the search budget ran out: only the first viable branch
    /// is explored.
    pub greedy: bool,
}

impl SearchNode {
    pub fn new(id: u32, depth: usize, weight_sum: f64, greedy: bool) -> Self {
        Self {
            id,
            depth,
            decision: None,
            weight_sum,
            result: f64::NEG_INFINITY,
            branches: [Branch::new(BranchKind::Selected), Branch::new(BranchKind::Excluded)],
            state: NodeState::Unvisited,
            explored: false,
            log_mark: LogMark::default(),
            winner: None,
            greedy,
        }
    }

    pub fn branch(&self, kind: BranchKind) -> &Branch {
        &self.branches[kind.index()]
    }

    pub fn branch_mut(&mut self, kind: BranchKind) -> &mut Branch {
        &mut self.branches[kind.index()]
    }

    pub fn is_leaf(&self) -> bool {
        self.decision.is_none()
    }

    fn resolve_leaf(&mut self) {
        self.result = self.weight_sum;
        self.explored = true;
        self.state = NodeState::Resolved;
    }

    /// Pick the better branch (ties go to `Selected`) and drop the loser's
    /// subtree.
    fn resolve(&mut self) {
        let selected = self.branches[0].weight_sum;
        let excluded = self.branches[1].weight_sum;

        if selected == f64::NEG_INFINITY && excluded == f64::NEG_INFINITY {
            self.winner = None;
            self.result = f64::NEG_INFINITY;
            self.branches[0].child = None;
            self.branches[1].child = None;
        } else if selected >= excluded {
            self.winner = Some(BranchKind::Selected);
            self.result = selected;
            self.branches[1].child = None;
        } else {
            self.winner = Some(BranchKind::Excluded);
            self.result = excluded;
            self.branches[0].child = None;
        }
        self.explored = true;
        self.state = NodeState::Resolved;
    }

    /// Move on after `kind` has been explored or pruned.
    fn advance(&mut self, kind: BranchKind) {
        let first_viable = self.branches[0].weight_sum.is_finite();
        match kind {
            BranchKind::Selected if !(self.greedy && first_viable) => {
                self.state = NodeState::Exploring(BranchKind::Excluded);
            }
            _ => self.resolve(),
        }
    }

    /// Decisions along the winning branches, root first.
    pub fn winning_path(&self) -> Vec<(InterprId, BranchKind)> {
        let mut path = Vec::new();
        let mut node = self;
        while let (Some(decision), Some(winner)) = (node.decision, node.winner) {
            path.push((decision, winner));
            match node.branch(winner).child.as_deref() {
                Some(child) => node = child,
                None => break,
            }
        }
        path
    }

    /// Number of nodes still attached below and including this one.
    pub fn size(&self) -> usize {
        1 + self
            .branches
            .iter()
            .filter_map(|b| b.child.as_deref())
            .map(SearchNode::size)
            .sum::<usize>()
    }
}

/// Result of a completed search.
#[derive(Debug)]
pub struct SearchTree {
    pub root: Box<SearchNode>,
    pub path: Vec<(InterprId, BranchKind)>,
    pub weight_sum: f64,
    /// Search nodes created, including the ones dropped on resolution.
    pub node_count: usize,
    pub pruned_invalid: usize,
    pub pruned_oscillation: usize,
}

// ============================================================================
// Driver
// ============================================================================

/// Mutable view of a document for the duration of one search.
pub(crate) struct SearchContext<'a> {
    pub document: Uuid,
    pub model: &'a Model,
    pub config: &'a EngineConfig,
    pub counters: &'a mut Counters,
    pub network: &'a mut ActivationNetwork,
    pub lattice: &'a Lattice,
    pub candidate: &'a mut Candidate,
    pub queue: &'a mut ValueQueue,
    pub log: &'a mut StateChangeLog,
    pub interrupted: &'a AtomicBool,
}

#[derive(Default)]
struct SearchStats {
    created: usize,
    pruned_invalid: usize,
    pruned_oscillation: usize,
    last_oscillation: Option<OscillationError>,
    budget_exhausted: bool,
}

/// Open frames of the explicit search stack.
struct Frames {
    current: Box<SearchNode>,
    parents: Vec<Box<SearchNode>>,
}

impl SearchContext<'_> {
    /// Run the search and commit the best interpretation into the network.
    pub(crate) fn run(mut self) -> EngineResult<SearchTree> {
        let baseline = self.log.mark();
        let (frames, stats) = self.start();
        self.resume(baseline, frames, stats)
    }

    fn start(&mut self) -> (Frames, SearchStats) {
        let stats = SearchStats {
            created: 1,
            ..Default::default()
        };
        let root = Box::new(SearchNode::new(
            self.counters.next_search_node_id(),
            0,
            self.network.total_weight(),
            self.config.max_search_nodes <= 1,
        ));
        let frames = Frames {
            current: root,
            parents: Vec::new(),
        };
        (frames, stats)
    }

    /// Step until the root resolves, then commit its winning path.
    ///
    /// The interruption flag is checked before every step; on interruption
    /// everything since `baseline` is undone.
    fn resume(
        mut self,
        baseline: LogMark,
        mut frames: Frames,
        mut stats: SearchStats,
    ) -> EngineResult<SearchTree> {
        loop {
            if self.interrupted.load(Ordering::Relaxed) {
                self.abort(baseline);
                return Err(EngineError::Interrupted {
                    document: self.document,
                });
            }
            if !self.step(&mut frames, &mut stats) {
                break;
            }
        }

        let root = frames.current;
        if root.result == f64::NEG_INFINITY {
            self.abort(baseline);
            let only_oscillations = stats.pruned_invalid == 0;
            return Err(match stats.last_oscillation {
                Some(err) if only_oscillations => err.into(),
                _ => EngineError::NoConsistentInterpretation {
                    document: self.document,
                },
            });
        }

        let path = root.winning_path();
        if let Err(err) = self.replay(&path) {
            self.abort(baseline);
            return Err(err.into());
        }

        debug!(
            "Search for document {} finished: {} nodes, {} decisions committed, weight-sum {:.4}",
            self.document,
            stats.created,
            path.len(),
            root.result
        );

        Ok(SearchTree {
            weight_sum: root.result,
            root,
            path,
            node_count: stats.created,
            pruned_invalid: stats.pruned_invalid,
            pruned_oscillation: stats.pruned_oscillation,
        })
    }

    /// Advance the current frame by one transition. Returns false once the
    /// root has resolved.
    fn step(&mut self, frames: &mut Frames, stats: &mut SearchStats) -> bool {
        let current = &mut frames.current;
        match current.state {
            NodeState::Unvisited => {
                self.log.set_depth(current.depth);
                current.log_mark = self.log.mark();
                match self.select_decision() {
                    None => current.resolve_leaf(),
                    Some(decision) => {
                        debug!(
                            "Search node {} at depth {} decides {} ({})",
                            current.id,
                            current.depth,
                            decision,
                            self.lattice.label(decision)
                        );
                        current.decision = Some(decision);
                        current.state = NodeState::Exploring(BranchKind::Selected);
                    }
                }
            }
            NodeState::Exploring(kind) => {
                let Some(decision) = current.decision else {
                    current.resolve_leaf();
                    return true;
                };
                match self.apply(current, decision, kind, stats) {
                    Ok(delta) => {
                        current.branch_mut(kind).weight = delta;
                        stats.created += 1;
                        let greedy = stats.created >= self.config.max_search_nodes;
                        if greedy && !stats.budget_exhausted {
                            stats.budget_exhausted = true;
                            warn!(
                                "Search budget of {} nodes exhausted for document {}, completing greedily",
                                self.config.max_search_nodes, self.document
                            );
                        }
                        let child = Box::new(SearchNode::new(
                            self.counters.next_search_node_id(),
                            current.depth + 1,
                            current.weight_sum + delta,
                            greedy,
                        ));
                        frames.parents.push(std::mem::replace(current, child));
                    }
                    Err(reason) => {
                        current.branch_mut(kind).prune(reason);
                        self.undo_branch(current, decision);
                        current.advance(kind);
                    }
                }
            }
            NodeState::Resolved => {
                let Some(parent) = frames.parents.pop() else {
                    return false;
                };
                let child = std::mem::replace(current, parent);
                let (NodeState::Exploring(kind), Some(decision)) =
                    (current.state, current.decision)
                else {
                    return true;
                };
                let branch = current.branch_mut(kind);
                branch.weight_sum = child.result;
                branch.searched = true;
                branch.child = Some(child);
                self.undo_branch(current, decision);
                current.advance(kind);
            }
        }
        true
    }

    /// Smallest undecided node among the governing nodes (and their
    /// conflicts) of activations that would fire if selected.
    ///
    /// Undecided `caused_by` ancestors of a considered node are considered
    /// too. Parents have smaller ids than their children, so a parent is
    /// always decided before any of its children.
    fn select_decision(&self) -> Option<InterprId> {
        let mut best: Option<InterprId> = None;
        let mut consider = |id: InterprId| {
            let mut pending = vec![id];
            while let Some(n) = pending.pop() {
                if n == InterprId::ROOT {
                    continue;
                }
                if self.candidate.is_undecided(n) && best.map_or(true, |b| n < b) {
                    best = Some(n);
                }
                pending.extend(self.lattice.node(n).caused_by.iter().copied());
            }
        };

        for act in self.network.activations() {
            let f = self.model.neuron(act.neuron).activation_function;
            if f.f(act.final_state().net) <= 0.0 {
                continue;
            }
            consider(act.interpretation);
            for conflict in self.lattice.conflicts_of(&*self.network, act.id) {
                consider(conflict);
            }
        }
        best
    }

    /// Apply `kind` for `decision` under `node` and propagate.
    fn apply(
        &mut self,
        node: &mut SearchNode,
        decision: InterprId,
        kind: BranchKind,
        stats: &mut SearchStats,
    ) -> Result<f64, PruneReason> {
        node.branch_mut(kind).visited = true;
        self.log.set_depth(node.depth + 1);
        self.candidate.set(decision, kind.decision());

        if !self.lattice.is_valid(self.candidate) {
            stats.pruned_invalid += 1;
            debug!("Search node {}: {:?} branch of {} is invalid", node.id, kind, decision);
            return Err(PruneReason::Invalid);
        }

        match self.propagate_decision(decision) {
            Ok(delta) => Ok(delta),
            Err(err) => {
                warn!(
                    "Search node {}: {:?} branch of {} pruned, {}",
                    node.id, kind, decision, err
                );
                stats.pruned_oscillation += 1;
                stats.last_oscillation = Some(err);
                Err(PruneReason::Oscillation)
            }
        }
    }

    /// Re-seed the activations that depend on `decision` and drain.
    fn propagate_decision(&mut self, decision: InterprId) -> Result<f64, OscillationError> {
        let node = self.lattice.node(decision);
        let governing = std::iter::once(decision).chain(node.referenced_by.iter().copied());
        for interpretation in governing {
            for &act in &self.lattice.node(interpretation).activations {
                let last = self.network.activation(act).rounds().last_round();
                for round in 0..=last {
                    self.queue.enqueue(self.network, act, round);
                }
            }
        }

        let env = PropagationEnv {
            model: self.model,
            candidate: self.candidate,
            max_round: self.config.max_round,
            tolerance: self.config.weight_tolerance,
            stamp: self.counters.next_visited(),
        };
        self.queue.drain(self.network, &env, self.log)
    }

    fn undo_branch(&mut self, node: &SearchNode, decision: InterprId) {
        self.log.rollback_to_mark(self.network, node.log_mark);
        self.candidate.set(decision, Decision::Undecided);
    }

    /// Re-apply the winning path at depth 0 and drop its log entries.
    fn replay(&mut self, path: &[(InterprId, BranchKind)]) -> Result<(), OscillationError> {
        self.log.set_depth(0);
        for (decision, kind) in path {
            self.candidate.set(*decision, kind.decision());
            self.propagate_decision(*decision)?;
        }
        self.log.discard(0);
        Ok(())
    }

    fn abort(&mut self, baseline: LogMark) {
        self.queue.clear(self.network);
        self.log.rollback_to_mark(self.network, baseline);
        self.candidate.reset();
    }
}

//! State-change log.
//!
//! Append-only undo journal of activation round writes. Every entry carries
//! the search depth that produced it, so the search can unwind a branch in
//! O(changes) instead of recomputing the network. Entries are always undone
//! in reverse order.

use crate::network::{ActivationId, ActivationNetwork, RoundState};

#[derive(Debug, Clone, PartialEq)]
pub struct StateChange {
    pub depth: usize,
    pub activation: ActivationId,
    pub round: usize,
    /// Previous content of the round, `None` if the round did not exist.
    pub old: Option<RoundState>,
}

/// Position in the log captured before a search node mutates anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LogMark {
    pub position: usize,
    pub depth: usize,
}

#[derive(Debug, Clone, Default)]
pub struct StateChangeLog {
    entries: Vec<StateChange>,
    depth: usize,
}

impl StateChangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Depth attached to subsequent records.
    pub fn set_depth(&mut self, depth: usize) {
        self.depth = depth;
    }

    pub fn record(&mut self, activation: ActivationId, round: usize, old: Option<RoundState>) {
        self.entries.push(StateChange {
            depth: self.depth,
            activation,
            round,
            old,
        });
    }

    pub fn mark(&self) -> LogMark {
        LogMark {
            position: self.entries.len(),
            depth: self.depth,
        }
    }

    /// Undo every trailing entry whose depth is `>= depth`.
    ///
    /// Returns the number of entries undone.
    pub fn rollback_to(&mut self, network: &mut ActivationNetwork, depth: usize) -> usize {
        let mut undone = 0;
        while self.entries.last().is_some_and(|e| e.depth >= depth) {
            if let Some(change) = self.entries.pop() {
                undo(network, change);
                undone += 1;
            }
        }
        undone
    }

    /// Undo everything recorded after `mark` and restore its depth.
    pub fn rollback_to_mark(&mut self, network: &mut ActivationNetwork, mark: LogMark) -> usize {
        let mut undone = 0;
        while self.entries.len() > mark.position {
            if let Some(change) = self.entries.pop() {
                undo(network, change);
                undone += 1;
            }
        }
        self.depth = mark.depth;
        undone
    }

    /// Forget entries at `depth` or deeper without restoring them.
    ///
    /// Used once a subtree is committed or dropped: no rollback to that depth
    /// will be requested again.
    pub fn discard(&mut self, depth: usize) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| e.depth < depth);
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.depth = 0;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[StateChange] {
        &self.entries
    }
}

fn undo(network: &mut ActivationNetwork, change: StateChange) {
    network
        .activation_mut(change.activation)
        .rounds_mut()
        .restore(change.round, change.old);
}

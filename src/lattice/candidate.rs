//! Candidate interpretation: one decision per lattice node.

use serde::{Deserialize, Serialize};

use super::InterprId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    #[default]
    Undecided,
    Selected,
    Excluded,
}

/// Decisions indexed by [`InterprId`]. The root is always selected and
/// nodes created after the candidate read as undecided.
#[derive(Debug, Clone)]
pub struct Candidate {
    decisions: Vec<Decision>,
}

impl Default for Candidate {
    fn default() -> Self {
        Self {
            decisions: vec![Decision::Selected],
        }
    }
}

impl Candidate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: InterprId) -> Decision {
        if id == InterprId::ROOT {
            return Decision::Selected;
        }
        self.decisions
            .get(id.index())
            .copied()
            .unwrap_or(Decision::Undecided)
    }

    /// Set the decision for `id` and return the previous one. The root
    /// cannot be changed.
    pub fn set(&mut self, id: InterprId, decision: Decision) -> Decision {
        if id == InterprId::ROOT {
            return Decision::Selected;
        }
        if self.decisions.len() <= id.index() {
            self.decisions.resize(id.index() + 1, Decision::Undecided);
        }
        std::mem::replace(&mut self.decisions[id.index()], decision)
    }

    pub fn is_selected(&self, id: InterprId) -> bool {
        self.get(id) == Decision::Selected
    }

    pub fn is_undecided(&self, id: InterprId) -> bool {
        self.get(id) == Decision::Undecided
    }

    /// Selected nodes in id order, root included.
    pub fn selected(&self) -> Vec<InterprId> {
        let mut out = vec![InterprId::ROOT];
        out.extend(
            self.decisions
                .iter()
                .enumerate()
                .skip(1)
                .filter(|(_, d)| **d == Decision::Selected)
                .map(|(i, _)| InterprId(i as u32)),
        );
        out
    }

    /// Forget every decision except the root.
    pub fn reset(&mut self) {
        self.decisions.truncate(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_is_always_selected() {
        let mut c = Candidate::new();
        assert_eq!(c.set(InterprId::ROOT, Decision::Excluded), Decision::Selected);
        assert!(c.is_selected(InterprId::ROOT));
    }

    #[test]
    fn test_set_returns_previous_decision() {
        let mut c = Candidate::new();
        let n = InterprId(3);
        assert!(c.is_undecided(n));
        assert_eq!(c.set(n, Decision::Selected), Decision::Undecided);
        assert_eq!(c.set(n, Decision::Excluded), Decision::Selected);
        assert_eq!(c.selected(), vec![InterprId::ROOT]);

        c.set(InterprId(2), Decision::Selected);
        assert_eq!(c.selected(), vec![InterprId::ROOT, InterprId(2)]);

        c.reset();
        assert!(c.is_undecided(InterprId(2)));
    }
}

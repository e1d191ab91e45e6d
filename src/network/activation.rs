//! Activations and their per-round state.

use serde::{Deserialize, Serialize};

use crate::lattice::InterprId;
use crate::model::NeuronId;

/// Creation-ordered id of an activation within one document.
///
/// Ids double as indices into the document's activation arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActivationId(pub u32);

impl ActivationId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for ActivationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "A{}", self.0)
    }
}

/// State of one activation in one round.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RoundState {
    pub value: f64,
    pub net: f64,
    /// Contribution of this activation to the search objective.
    pub weight: f64,
}

impl RoundState {
    /// Round 0 of a fresh activation: bias only, nothing fired yet.
    pub fn initial(bias: f64) -> Self {
        Self {
            value: 0.0,
            net: bias,
            weight: 0.0,
        }
    }

    pub fn equals_within(&self, other: &RoundState, tolerance: f64) -> bool {
        (self.value - other.value).abs() <= tolerance
            && (self.net - other.net).abs() <= tolerance
            && (self.weight - other.weight).abs() <= tolerance
    }
}

/// Ordered round states of an activation.
///
/// Round `k` exists explicitly for `k <= last_round()`; reading a higher round
/// yields the last explicit state. Only the propagation queue writes rounds
/// and only the state-change log restores them.
#[derive(Debug, Clone)]
pub struct Rounds {
    states: Vec<RoundState>,
    queued: Vec<bool>,
    /// Drain stamp of the last log entry written per round.
    logged: Vec<u64>,
}

impl Rounds {
    pub fn new(initial: RoundState) -> Self {
        Self {
            states: vec![initial],
            queued: Vec::new(),
            logged: Vec::new(),
        }
    }

    pub fn get(&self, round: usize) -> RoundState {
        self.states[round.min(self.last_round())]
    }

    pub fn last_round(&self) -> usize {
        self.states.len() - 1
    }

    pub fn final_state(&self) -> RoundState {
        self.states[self.last_round()]
    }

    pub fn states(&self) -> &[RoundState] {
        &self.states
    }

    pub fn is_queued(&self, round: usize) -> bool {
        self.queued.get(round).copied().unwrap_or(false)
    }

    pub(crate) fn set_queued(&mut self, round: usize, queued: bool) {
        if self.queued.len() <= round {
            self.queued.resize(round + 1, false);
        }
        self.queued[round] = queued;
    }

    /// Returns true the first time `round` is seen with this drain `stamp`.
    pub(crate) fn mark_logged(&mut self, round: usize, stamp: u64) -> bool {
        if self.logged.len() <= round {
            self.logged.resize(round + 1, 0);
        }
        if self.logged[round] == stamp {
            return false;
        }
        self.logged[round] = stamp;
        true
    }

    /// Write `state` at `round`.
    ///
    /// Returns the previous content of every round touched, in ascending
    /// round order (`None` for rounds that did not exist yet). An empty result
    /// means the observed state already matched within `tolerance`.
    pub(crate) fn set(
        &mut self,
        round: usize,
        state: RoundState,
        tolerance: f64,
    ) -> Vec<(usize, Option<RoundState>)> {
        if self.get(round).equals_within(&state, tolerance) {
            return Vec::new();
        }

        if round < self.states.len() {
            let old = std::mem::replace(&mut self.states[round], state);
            return vec![(round, Some(old))];
        }

        let last = self.final_state();
        let mut touched = Vec::with_capacity(round + 1 - self.states.len());
        while self.states.len() < round {
            touched.push((self.states.len(), None));
            self.states.push(last);
        }
        touched.push((round, None));
        self.states.push(state);
        touched
    }

    /// Undo one write. `None` removes the round, which must be the last one.
    pub(crate) fn restore(&mut self, round: usize, old: Option<RoundState>) {
        match old {
            Some(state) => self.states[round] = state,
            None => {
                debug_assert!(round > 0 && round == self.last_round());
                self.states.truncate(round);
            }
        }
    }
}

/// One neuron's state for one document.
#[derive(Debug, Clone)]
pub struct Activation {
    pub id: ActivationId,
    pub neuron: NeuronId,
    /// Decision node this activation belongs to; `InterprId::ROOT` when it is
    /// not part of any conflict.
    pub interpretation: InterprId,
    /// Fixed value for activations seeded by the caller.
    pub input_value: Option<f64>,
    rounds: Rounds,
}

impl Activation {
    pub(crate) fn new(
        id: ActivationId,
        neuron: NeuronId,
        bias: f64,
        interpretation: InterprId,
        input_value: Option<f64>,
    ) -> Self {
        Self {
            id,
            neuron,
            interpretation,
            input_value,
            rounds: Rounds::new(RoundState::initial(bias)),
        }
    }

    pub fn rounds(&self) -> &Rounds {
        &self.rounds
    }

    pub(crate) fn rounds_mut(&mut self) -> &mut Rounds {
        &mut self.rounds
    }

    pub fn final_state(&self) -> RoundState {
        self.rounds.final_state()
    }

    pub fn is_input(&self) -> bool {
        self.input_value.is_some()
    }
}

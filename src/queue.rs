//! Value propagation queue.
//!
//! Converges round states across the reachable part of the activation
//! network after a perturbation (new inputs, a search decision, a rollback
//! that must be re-evaluated).
//!
//! The queue keeps one LIFO stack per round. Rounds are drained in ascending
//! order and each stack pops its most recent entry first, so propagation is
//! depth-first. A changed state is written through [`Rounds::set`], every
//! overwritten round is recorded in the [`StateChangeLog`], and downstream
//! activations are enqueued at the same round (direct links) or the next one
//! (recurrent links).
//!
//! [`Rounds::set`]: crate::network::Rounds

use tracing::debug;

use crate::error::{OscillationEntry, OscillationError};
use crate::lattice::Candidate;
use crate::model::Model;
use crate::network::{ActivationId, ActivationNetwork, RoundState};
use crate::search::StateChangeLog;

/// Read-only inputs of one drain.
#[derive(Debug, Clone, Copy)]
pub struct PropagationEnv<'a> {
    pub model: &'a Model,
    pub candidate: &'a Candidate,
    pub max_round: usize,
    pub tolerance: f64,
    /// Unique per drain; keeps each `(activation, round)` logged once.
    pub stamp: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ValueQueue {
    rounds: Vec<Vec<ActivationId>>,
}

impl ValueQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `id` for recomputation at `round`. No-op if already queued there.
    pub fn enqueue(&mut self, network: &mut ActivationNetwork, id: ActivationId, round: usize) {
        let rounds = network.activation_mut(id).rounds_mut();
        if rounds.is_queued(round) {
            return;
        }
        rounds.set_queued(round, true);

        if self.rounds.len() <= round {
            self.rounds.resize_with(round + 1, Vec::new);
        }
        self.rounds[round].push(id);
    }

    pub fn is_empty(&self) -> bool {
        self.rounds.iter().all(Vec::is_empty)
    }

    pub fn len(&self) -> usize {
        self.rounds.iter().map(Vec::len).sum()
    }

    /// Drop every queued entry and reset the queued flags.
    pub fn clear(&mut self, network: &mut ActivationNetwork) {
        for (round, stack) in self.rounds.iter_mut().enumerate() {
            for id in stack.drain(..) {
                network.activation_mut(id).rounds_mut().set_queued(round, false);
            }
        }
        self.rounds.clear();
    }

    /// Propagate until the queue is empty.
    ///
    /// Returns the change of the summed final weights. Fails when a state
    /// would have to be written above `env.max_round`; the queue is cleared
    /// and the writes made so far stay in the log for the caller to undo.
    pub fn drain(
        &mut self,
        network: &mut ActivationNetwork,
        env: &PropagationEnv<'_>,
        log: &mut StateChangeLog,
    ) -> Result<f64, OscillationError> {
        let mut delta = 0.0;
        let mut processed = 0usize;
        let mut changed = 0usize;
        let mut round = 0;

        while round < self.rounds.len() {
            let Some(id) = self.rounds[round].pop() else {
                round += 1;
                continue;
            };
            processed += 1;
            network.activation_mut(id).rounds_mut().set_queued(round, false);

            let act = network.activation(id);
            let suppressed = !env.candidate.is_selected(act.interpretation);
            let state = network.recompute_round(env.model, id, round, suppressed);

            let rounds = act.rounds();
            if rounds.get(round).equals_within(&state, env.tolerance) {
                continue;
            }

            if round > env.max_round {
                let err = self.oscillation(network, env.model, id, round, state);
                self.clear(network);
                return Err(err);
            }

            let was_last = round >= rounds.last_round();
            let old_final = rounds.final_state();

            let rounds = network.activation_mut(id).rounds_mut();
            for (r, old) in rounds.set(round, state, env.tolerance) {
                if rounds.mark_logged(r, env.stamp) {
                    log.record(id, r, old);
                }
            }
            changed += 1;
            if was_last {
                delta += state.weight - old_final.weight;
            }

            let targets: Vec<(ActivationId, bool)> = network
                .output_links(id)
                .map(|(t, link)| (t, link.recurrent))
                .collect();
            for (target, recurrent) in targets {
                let start = if recurrent { round + 1 } else { round };
                let end = if was_last {
                    start.max(network.activation(target).rounds().last_round())
                } else {
                    start
                };
                for r in start..=end {
                    self.enqueue(network, target, r);
                }
            }

            // The implicit rounds above a changed last round are stale too.
            if round == 0 || was_last {
                self.enqueue(network, id, round + 1);
            }
        }

        self.rounds.clear();
        debug!(
            "Queue drained: {} recomputed, {} changed, weight delta {:.4}",
            processed, changed, delta
        );
        Ok(delta)
    }

    fn oscillation(
        &self,
        network: &ActivationNetwork,
        model: &Model,
        id: ActivationId,
        round: usize,
        state: RoundState,
    ) -> OscillationError {
        let entry = |a: ActivationId, r: usize, s: RoundState| OscillationEntry {
            activation: a,
            label: model.neuron(network.activation(a).neuron).label.clone(),
            round: r,
            value: s.value,
            net: s.net,
        };

        let mut dump = vec![entry(id, round, state)];
        for (r, stack) in self.rounds.iter().enumerate() {
            for a in stack.iter().rev() {
                dump.push(entry(*a, r, network.activation(*a).rounds().get(r)));
            }
        }
        OscillationError { round, dump }
    }
}

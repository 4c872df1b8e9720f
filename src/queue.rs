//! Work queues: the round-ordered value propagation queue used during the
//! search and the FIFO upper-bound queue used while linking.

use hashbrown::HashSet;
use std::collections::{BTreeSet, VecDeque};

use crate::Result;
use crate::activation::ActivationId;
use crate::document::Document;
use crate::interpretation::CoverageScope;
use crate::model::NormWeight;
use crate::search::SearchNodeId;
use crate::search::journal::Journal;

// ============================================================================
// PropagationQueue
// ============================================================================

/// Pending `(activation, round)` recomputations, popped in
/// `(round, sequence, id)` order. Each pair is queued at most once.
#[derive(Debug, Default, Clone)]
pub struct PropagationQueue {
    pending: BTreeSet<(u32, u32, ActivationId)>,
    queued: HashSet<(ActivationId, u32)>,
}

impl PropagationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether the entry was new.
    pub fn add(&mut self, round: u32, sequence: u32, act: ActivationId) -> bool {
        if !self.queued.insert((act, round)) {
            return false;
        }
        self.pending.insert((round, sequence, act));
        true
    }

    pub fn pop(&mut self) -> Option<(u32, ActivationId)> {
        let (round, _, act) = self.pending.pop_first()?;
        self.queued.remove(&(act, round));
        Some((round, act))
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.queued.clear();
    }
}

// ============================================================================
// UpperBoundQueue
// ============================================================================

/// FIFO of activations whose bounds need recomputing.
#[derive(Debug, Default, Clone)]
pub struct UpperBoundQueue {
    pending: VecDeque<ActivationId>,
}

impl UpperBoundQueue {
    pub fn push(&mut self, act: ActivationId) {
        self.pending.push_back(act);
    }

    pub fn pop(&mut self) -> Option<ActivationId> {
        self.pending.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

// ============================================================================
// Processing
// ============================================================================

impl Document {
    pub(crate) fn enqueue_value(&mut self, round: u32, act: ActivationId) {
        let sequence = self.activations[act.index()].sequence;
        self.queue.add(round, sequence, act);
    }

    pub(crate) fn enqueue_bound(&mut self, act: ActivationId) {
        let a = &mut self.activations[act.index()];
        if !a.bound_queued {
            a.bound_queued = true;
            self.bound_queue.push(act);
        }
    }

    /// Recomputes `act` at `round` and schedules its dependents when its
    /// value moved. Returns the change in `act`'s last-round weight.
    pub(crate) fn process_activation(
        &mut self,
        scope: &dyn CoverageScope,
        journal: &mut Journal,
        node: SearchNodeId,
        act: ActivationId,
        round: u32,
    ) -> Result<NormWeight> {
        let (state, decision) = self.compute_state(scope, act, round);
        debug_assert!(
            !self.bounds_apply(scope, act) || self.within_bounds(act, state.value),
            "value {} of activation {act} outside its bounds [{}, {}]",
            state.value,
            self.activations[act.index()].lower_bound,
            self.activations[act.index()].upper_bound,
        );

        let a = &mut self.activations[act.index()];
        let old = a.rounds.get(round);
        if round != 0 && old.equals_with_weights(&state) && a.decision == decision {
            return Ok(NormWeight::ZERO);
        }

        journal.save_old(node, a);
        let last_before = a.rounds.last();
        let propagate = a.rounds.set(round, state) && !old.equals(&state);
        a.decision = decision;
        journal.save_new(node, a);
        let delta = a.rounds.last().weight.sub(last_before.weight);

        if propagate {
            if round > self.config.max_rounds {
                return Err(self.oscillation(act, round));
            }
            for lid in self.activations[act.index()].outputs.clone() {
                let link = &self.links[lid.index()];
                if link.inactive {
                    continue;
                }
                let next = if link.recurrent { round + 1 } else { round };
                let output = link.output;
                self.enqueue_value(next, output);
            }
        }
        if round == 0 {
            self.enqueue_value(1, act);
        }
        Ok(delta)
    }

    /// Drains the value queue, returning the summed weight change.
    pub(crate) fn process_queue(
        &mut self,
        scope: &dyn CoverageScope,
        journal: &mut Journal,
        node: SearchNodeId,
    ) -> Result<NormWeight> {
        let mut delta = NormWeight::ZERO;
        while let Some((round, act)) = self.queue.pop() {
            match self.process_activation(scope, journal, node, act, round) {
                Ok(d) => delta = delta.add(d),
                Err(e) => {
                    self.queue.clear();
                    return Err(e);
                }
            }
        }
        Ok(delta)
    }

    /// Drains the bound queue, linking downstream units for every
    /// activation whose upper bound turns positive.
    pub(crate) fn process_bounds(&mut self) -> Result<()> {
        while let Some(act) = self.bound_queue.pop() {
            self.activations[act.index()].bound_queued = false;

            let old_ub = self.activations[act.index()].upper_bound;
            let (lb, ub) = self.compute_bounds(act);
            let changed = (ub - old_ub).abs() > self.config.upper_bound_epsilon;

            let a = &mut self.activations[act.index()];
            a.lower_bound = lb;
            a.upper_bound = ub;
            if changed {
                a.bound_passes += 1;
                if a.bound_passes > self.config.max_bound_passes {
                    tracing::warn!(
                        activation = act.0,
                        passes = a.bound_passes,
                        "upper bound keeps changing, no longer propagating it"
                    );
                } else {
                    for lid in self.activations[act.index()].outputs.clone() {
                        let link = &self.links[lid.index()];
                        if !link.recurrent {
                            let output = link.output;
                            self.enqueue_bound(output);
                        }
                    }
                }
            }

            let a = &mut self.activations[act.index()];
            if old_ub <= 0.0 && ub > 0.0 && !a.relevant {
                a.relevant = true;
                self.link_downstream(act)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pops_by_round_then_sequence() {
        let mut q = PropagationQueue::new();
        assert!(q.add(1, 0, ActivationId(0)));
        assert!(q.add(0, 2, ActivationId(1)));
        assert!(q.add(0, 1, ActivationId(2)));
        assert!(q.add(0, 1, ActivationId(3)));
        assert_eq!(q.pop(), Some((0, ActivationId(2))));
        assert_eq!(q.pop(), Some((0, ActivationId(3))));
        assert_eq!(q.pop(), Some((0, ActivationId(1))));
        assert_eq!(q.pop(), Some((1, ActivationId(0))));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn test_add_is_idempotent_until_popped() {
        let mut q = PropagationQueue::new();
        assert!(q.add(0, 0, ActivationId(7)));
        assert!(!q.add(0, 0, ActivationId(7)));
        assert!(q.add(1, 0, ActivationId(7)));
        assert_eq!(q.len(), 2);
        q.pop();
        assert!(q.add(0, 0, ActivationId(7)));
        q.clear();
        assert!(q.is_empty());
    }

    #[test]
    fn test_bound_queue_is_fifo() {
        let mut q = UpperBoundQueue::default();
        q.push(ActivationId(3));
        q.push(ActivationId(1));
        assert_eq!(q.pop(), Some(ActivationId(3)));
        assert_eq!(q.pop(), Some(ActivationId(1)));
        assert!(q.is_empty());
    }
}

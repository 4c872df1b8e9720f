//! Per-node undo log of activation state changes.
//!
//! The first time a search node modifies an activation, the activation's
//! rounds and decision are saved as both the old and the new value; later
//! modifications by the same node only refresh the new value. Restoring a
//! node with [`Restore::Old`] undoes everything it did, and replaying
//! [`Restore::New`] from the root down re-establishes a branch.

use crate::activation::{Activation, ActivationId};
use crate::model::{Decision, Rounds};

use super::SearchNodeId;

#[derive(Debug, Clone, PartialEq)]
pub struct StateChange {
    pub activation: ActivationId,
    pub old_rounds: Rounds,
    pub new_rounds: Rounds,
    pub old_decision: Decision,
    pub new_decision: Decision,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Restore {
    Old,
    New,
}

#[derive(Debug, Default, Clone)]
pub struct Journal {
    logs: Vec<Vec<StateChange>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn open(&mut self, node: SearchNodeId) {
        if self.logs.len() <= node.index() {
            self.logs.resize_with(node.index() + 1, Vec::new);
        }
    }

    pub(crate) fn save_old(&mut self, node: SearchNodeId, act: &mut Activation) {
        if matches!(act.journal_slot, Some((n, _)) if n == node) {
            return;
        }
        self.open(node);
        let log = &mut self.logs[node.index()];
        act.journal_slot = Some((node, log.len()));
        log.push(StateChange {
            activation: act.id,
            old_rounds: act.rounds.clone(),
            new_rounds: act.rounds.clone(),
            old_decision: act.decision,
            new_decision: act.decision,
        });
    }

    pub(crate) fn save_new(&mut self, node: SearchNodeId, act: &Activation) {
        if let Some((n, i)) = act.journal_slot
            && n == node
        {
            let change = &mut self.logs[n.index()][i];
            change.new_rounds = act.rounds.clone();
            change.new_decision = act.decision;
        }
    }

    pub(crate) fn restore(&self, node: SearchNodeId, mode: Restore, activations: &mut [Activation]) {
        let Some(log) = self.logs.get(node.index()) else {
            return;
        };
        for change in log {
            let act = &mut activations[change.activation.index()];
            let (rounds, decision) = match mode {
                Restore::Old => (&change.old_rounds, change.old_decision),
                Restore::New => (&change.new_rounds, change.new_decision),
            };
            act.rounds = rounds.clone();
            act.decision = decision;
            if matches!(act.journal_slot, Some((n, _)) if n == node) {
                act.journal_slot = None;
            }
        }
    }

    /// Changes recorded by `node`, in first-modification order.
    pub fn changes(&self, node: SearchNodeId) -> &[StateChange] {
        self.logs.get(node.index()).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpretation::OptionId;
    use crate::model::{NormWeight, Range, State, UnitId};
    use pretty_assertions::assert_eq;

    fn activation() -> Activation {
        Activation::new(ActivationId(0), UnitId(0), Range::new(0, 1), OptionId::ROOT, OptionId::ROOT)
    }

    #[test]
    fn test_restore_old_and_replay_new() {
        let mut acts = vec![activation()];
        let mut journal = Journal::new();
        let node = SearchNodeId(0);

        journal.save_old(node, &mut acts[0]);
        acts[0].rounds.set(0, State::new(0.5, 1.0, 1, NormWeight::new(1.0, 1.0)));
        journal.save_new(node, &acts[0]);
        // A second modification by the same node keeps the first old value.
        journal.save_old(node, &mut acts[0]);
        acts[0].rounds.set(1, State::new(0.7, 2.0, 1, NormWeight::new(2.0, 2.0)));
        acts[0].decision = Decision::Selected;
        journal.save_new(node, &acts[0]);
        assert_eq!(journal.changes(node).len(), 1);

        let modified = acts[0].rounds.clone();
        journal.restore(node, Restore::Old, &mut acts);
        assert!(acts[0].rounds.is_empty());
        assert_eq!(acts[0].decision, Decision::Unknown);

        journal.restore(node, Restore::New, &mut acts);
        assert_eq!(acts[0].rounds, modified);
        assert_eq!(acts[0].decision, Decision::Selected);
    }

    #[test]
    fn test_nested_nodes_undo_independently() {
        let mut acts = vec![activation()];
        let mut journal = Journal::new();
        let (parent, child) = (SearchNodeId(0), SearchNodeId(1));

        journal.save_old(parent, &mut acts[0]);
        acts[0].rounds.set(0, State::input(1.0));
        journal.save_new(parent, &acts[0]);
        let after_parent = acts[0].rounds.clone();

        journal.save_old(child, &mut acts[0]);
        acts[0].rounds.set(0, State::input(0.5));
        journal.save_new(child, &acts[0]);

        journal.restore(child, Restore::Old, &mut acts);
        assert_eq!(acts[0].rounds, after_parent);
        journal.restore(parent, Restore::Old, &mut acts);
        assert!(acts[0].rounds.is_empty());
        assert!(journal.changes(SearchNodeId(7)).is_empty());
    }
}

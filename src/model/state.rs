//! Per-round activation state and the sparse `Rounds` step function.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::weight::{NormWeight, WEIGHT_TOLERANCE};

/// Immutable result of one state computation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub value: f64,
    pub net: f64,
    /// Length of the firing chain that pushed `net` non-negative, `-1` if unfired.
    pub fired: i32,
    pub weight: NormWeight,
}

impl State {
    pub const ZERO: State = State { value: 0.0, net: 0.0, fired: -1, weight: NormWeight::ZERO };

    pub fn new(value: f64, net: f64, fired: i32, weight: NormWeight) -> Self {
        Self { value, net, fired, weight }
    }

    /// State of a fixed-value input activation.
    pub fn input(value: f64) -> Self {
        Self { value, net: value, fired: 0, weight: NormWeight::ZERO }
    }

    /// Values agree within [`WEIGHT_TOLERANCE`].
    pub fn equals(&self, other: &State) -> bool {
        (self.value - other.value).abs() <= WEIGHT_TOLERANCE
    }

    /// Values and weights agree within [`WEIGHT_TOLERANCE`].
    pub fn equals_with_weights(&self, other: &State) -> bool {
        self.equals(other) && self.weight.approx_eq(&other.weight)
    }
}

impl Default for State {
    fn default() -> Self {
        State::ZERO
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "V:{:.3} N:{:.3} F:{} W:{}",
            self.value, self.net, self.fired, self.weight
        )
    }
}

// ============================================================================
// Rounds
// ============================================================================

/// Sparse `round -> State` step function.
///
/// `get(r)` yields the entry with the greatest key `<= r`, or [`State::ZERO`].
/// No stored entry is ever numerically equal to the state in effect just
/// before it; `set` collapses such entries.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Rounds {
    rounds: BTreeMap<u32, State>,
}

impl Rounds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, round: u32) -> State {
        self.rounds
            .range(..=round)
            .next_back()
            .map(|(_, s)| *s)
            .unwrap_or(State::ZERO)
    }

    /// Stores `state` at `round`, returning whether the entry at `round` changed.
    pub fn set(&mut self, round: u32, state: State) -> bool {
        let before = if round == 0 { State::ZERO } else { self.get(round - 1) };

        let changed = if before.equals_with_weights(&state) {
            match self.rounds.remove(&round) {
                Some(old) => !old.equals_with_weights(&state),
                None => false,
            }
        } else {
            match self.rounds.insert(round, state) {
                Some(old) => !old.equals_with_weights(&state),
                None => true,
            }
        };

        self.collapse_after(round);
        changed
    }

    /// Drops later entries that repeat the state in effect before them.
    fn collapse_after(&mut self, round: u32) {
        let mut in_effect = self.get(round);
        let later: Vec<(u32, State)> = self
            .rounds
            .range(round.saturating_add(1)..)
            .map(|(r, s)| (*r, *s))
            .collect();
        for (r, s) in later {
            if s.equals_with_weights(&in_effect) {
                self.rounds.remove(&r);
            } else {
                in_effect = s;
            }
        }
    }

    pub fn last_round(&self) -> Option<u32> {
        self.rounds.keys().next_back().copied()
    }

    /// State in effect after the last stored round.
    pub fn last(&self) -> State {
        self.rounds.values().next_back().copied().unwrap_or(State::ZERO)
    }

    pub fn is_empty(&self) -> bool {
        self.rounds.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rounds.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &State)> {
        self.rounds.iter().map(|(r, s)| (*r, s))
    }

    pub fn clear(&mut self) {
        self.rounds.clear();
    }

    /// Entries agree round-for-round within tolerance.
    pub fn approx_eq(&self, other: &Rounds) -> bool {
        self.rounds.len() == other.rounds.len()
            && self
                .rounds
                .iter()
                .zip(other.rounds.iter())
                .all(|((ra, sa), (rb, sb))| ra == rb && sa.equals_with_weights(sb))
    }
}

impl std::fmt::Display for Rounds {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, (r, s)) in self.rounds.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "[R{r} {s}]")?;
        }
        Ok(())
    }
}

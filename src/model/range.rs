//! Closed-open text intervals and the positional relation algebra.
//!
//! Unbounded ends are represented by the [`Range::MIN`] / [`Range::MAX`]
//! sentinels. All arithmetic saturates, so every function here is total.

use serde::{Deserialize, Serialize};

/// Interval `[begin, end)` over document positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Range {
    pub begin: i32,
    pub end: i32,
}

impl Range {
    pub const MIN: i32 = i32::MIN;
    pub const MAX: i32 = i32::MAX;

    /// Fully unbounded range.
    pub const UNBOUNDED: Range = Range { begin: Self::MIN, end: Self::MAX };

    pub fn new(begin: i32, end: i32) -> Self {
        Self { begin, end }
    }

    /// `None` maps to the matching sentinel.
    pub fn from_bounds(begin: Option<i32>, end: Option<i32>) -> Self {
        Self {
            begin: begin.unwrap_or(Self::MIN),
            end: end.unwrap_or(Self::MAX),
        }
    }

    pub fn begin_bound(&self) -> Option<i32> {
        (self.begin != Self::MIN).then_some(self.begin)
    }

    pub fn end_bound(&self) -> Option<i32> {
        (self.end != Self::MAX).then_some(self.end)
    }

    /// Both ends are concrete values.
    pub fn is_resolved(&self) -> bool {
        self.begin != Self::MIN && self.end != Self::MAX
    }

    /// Bound-wise union preferring concrete values over sentinels.
    pub fn merge(a: Range, b: Range) -> Range {
        Range {
            begin: if a.begin != Self::MIN { a.begin } else { b.begin },
            end: if a.end != Self::MAX { a.end } else { b.end },
        }
    }

    pub fn contains(&self, other: &Range) -> bool {
        self.begin <= other.begin && other.end <= self.end
    }

    pub fn contains_position(&self, pos: i32) -> bool {
        self.begin <= pos && pos < self.end
    }

    pub fn overlaps(&self, other: &Range) -> bool {
        self.begin < other.end && other.begin < self.end
    }

    /// Length, or `i32::MAX` ("infinite") when either end is a sentinel.
    pub fn length(&self) -> i32 {
        if !self.is_resolved() {
            return i32::MAX;
        }
        self.end.saturating_sub(self.begin)
    }

    /// Number of positions shared with `other`, zero when disjoint.
    pub fn overlap_length(&self, other: &Range) -> i32 {
        let begin = self.begin.max(other.begin);
        let end = self.end.min(other.end);
        end.saturating_sub(begin).max(0)
    }

    /// Distance between the closest ends, zero when overlapping or adjacent.
    pub fn gap(&self, other: &Range) -> i32 {
        if other.begin >= self.end {
            other.begin.saturating_sub(self.end)
        } else if self.begin >= other.end {
            self.begin.saturating_sub(other.end)
        } else {
            0
        }
    }
}

impl std::fmt::Display for Range {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fmt_pos = |p: i32| match p {
            Range::MIN => "MIN".to_string(),
            Range::MAX => "MAX".to_string(),
            p => p.to_string(),
        };
        write!(f, "({},{})", fmt_pos(self.begin), fmt_pos(self.end))
    }
}

// ============================================================================
// Operator
// ============================================================================

/// Comparison between two range ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    Equals,
    LessThanEqual,
    GreaterThanEqual,
    LessThan,
    GreaterThan,
    /// Always satisfied.
    None,
}

impl Operator {
    pub fn compare(self, a: i32, b: i32) -> bool {
        match self {
            Operator::Equals => a == b,
            Operator::LessThanEqual => a <= b,
            Operator::GreaterThanEqual => a >= b,
            Operator::LessThan => a < b,
            Operator::GreaterThan => a > b,
            Operator::None => true,
        }
    }

    /// `op.invert().compare(b, a) == op.compare(a, b)`.
    pub fn invert(self) -> Operator {
        match self {
            Operator::Equals => Operator::Equals,
            Operator::LessThanEqual => Operator::GreaterThanEqual,
            Operator::GreaterThanEqual => Operator::LessThanEqual,
            Operator::LessThan => Operator::GreaterThan,
            Operator::GreaterThan => Operator::LessThan,
            Operator::None => Operator::None,
        }
    }
}

// ============================================================================
// Relation
// ============================================================================

/// Required comparisons between the ends of two ranges `a` and `b`.
///
/// | Field | Compares |
/// |-------|----------|
/// | `begin_to_begin` | `a.begin` vs `b.begin` |
/// | `begin_to_end` | `a.begin` vs `b.end` |
/// | `end_to_end` | `a.end` vs `b.end` |
/// | `end_to_begin` | `a.end` vs `b.begin` |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Relation {
    pub begin_to_begin: Operator,
    pub begin_to_end: Operator,
    pub end_to_end: Operator,
    pub end_to_begin: Operator,
}

impl Relation {
    pub const EQUALS: Relation = Relation::new(Operator::Equals, Operator::None, Operator::Equals, Operator::None);
    pub const BEGIN_EQUALS: Relation = Relation::new(Operator::Equals, Operator::None, Operator::None, Operator::None);
    pub const END_EQUALS: Relation = Relation::new(Operator::None, Operator::None, Operator::Equals, Operator::None);
    pub const CONTAINS: Relation = Relation::new(Operator::LessThanEqual, Operator::None, Operator::GreaterThanEqual, Operator::None);
    pub const CONTAINED_IN: Relation = Relation::new(Operator::GreaterThanEqual, Operator::None, Operator::LessThanEqual, Operator::None);
    pub const OVERLAPS: Relation = Relation::new(Operator::None, Operator::LessThan, Operator::None, Operator::GreaterThan);
    pub const NONE: Relation = Relation::new(Operator::None, Operator::None, Operator::None, Operator::None);
    /// `a.begin == b.end`: `a` directly follows `b`.
    pub const BEGIN_TO_END_EQUALS: Relation = Relation::new(Operator::None, Operator::Equals, Operator::None, Operator::None);
    /// `a.end == b.begin`: `a` directly precedes `b`.
    pub const END_TO_BEGIN_EQUALS: Relation = Relation::new(Operator::None, Operator::None, Operator::None, Operator::Equals);

    pub const fn new(
        begin_to_begin: Operator,
        begin_to_end: Operator,
        end_to_end: Operator,
        end_to_begin: Operator,
    ) -> Self {
        Self { begin_to_begin, begin_to_end, end_to_end, end_to_begin }
    }

    pub fn evaluate(&self, a: &Range, b: &Range) -> bool {
        self.begin_to_begin.compare(a.begin, b.begin)
            && self.begin_to_end.compare(a.begin, b.end)
            && self.end_to_end.compare(a.end, b.end)
            && self.end_to_begin.compare(a.end, b.begin)
    }

    /// The same relation seen from `b`'s side.
    pub fn invert(&self) -> Relation {
        Relation {
            begin_to_begin: self.begin_to_begin.invert(),
            begin_to_end: self.end_to_begin.invert(),
            end_to_end: self.end_to_end.invert(),
            end_to_begin: self.begin_to_end.invert(),
        }
    }

    pub fn is_none(&self) -> bool {
        *self == Relation::NONE
    }
}

impl Default for Relation {
    fn default() -> Self {
        Relation::EQUALS
    }
}

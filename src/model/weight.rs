//! Normalized weight: a `(w, n)` numerator/normalizer pair scored as `w / n`.

use serde::{Deserialize, Serialize};

/// Comparison tolerance for values and weights.
pub const WEIGHT_TOLERANCE: f64 = 0.001;

/// Accumulated `(numerator, normalizer)` pair.
///
/// Weights produced by a state computation satisfy `0 <= w <= n`.
/// Deltas obtained through [`NormWeight::sub`] may carry negative
/// components; they are only ever added back onto an accumulated weight.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NormWeight {
    pub w: f64,
    pub n: f64,
}

impl NormWeight {
    pub const ZERO: NormWeight = NormWeight { w: 0.0, n: 0.0 };

    pub fn new(w: f64, n: f64) -> Self {
        debug_assert!(w >= 0.0 && n >= 0.0, "negative normalized weight ({w}, {n})");
        debug_assert!(w <= n + WEIGHT_TOLERANCE, "numerator {w} exceeds normalizer {n}");
        Self { w, n }
    }

    pub fn add(self, other: NormWeight) -> NormWeight {
        NormWeight { w: self.w + other.w, n: self.n + other.n }
    }

    pub fn sub(self, other: NormWeight) -> NormWeight {
        NormWeight { w: self.w - other.w, n: self.n - other.n }
    }

    /// `w / n`, or `0` when the normalizer is not positive.
    pub fn norm(&self) -> f64 {
        if self.n > 0.0 { self.w / self.n } else { 0.0 }
    }

    pub fn approx_eq(&self, other: &NormWeight) -> bool {
        (self.w - other.w).abs() <= WEIGHT_TOLERANCE && (self.n - other.n).abs() <= WEIGHT_TOLERANCE
    }
}

impl std::fmt::Display for NormWeight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.3}/{:.3}", self.w, self.n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_norm_of_zero_normalizer_is_zero() {
        assert_eq!(NormWeight::ZERO.norm(), 0.0);
        assert_eq!(NormWeight::new(0.0, 0.0).norm(), 0.0);
    }

    #[test]
    fn test_add_sub() {
        let a = NormWeight::new(1.0, 4.0);
        let b = NormWeight::new(2.0, 2.0);
        let sum = a.add(b);
        assert_eq!(sum, NormWeight { w: 3.0, n: 6.0 });
        assert_eq!(sum.norm(), 0.5);
        let delta = a.sub(b);
        assert_eq!(delta, NormWeight { w: -1.0, n: 2.0 });
        assert!(sum.sub(b).approx_eq(&a));
    }

    #[test]
    fn test_approx_eq_uses_tolerance() {
        let a = NormWeight::new(1.0, 2.0);
        assert!(a.approx_eq(&NormWeight::new(1.0005, 2.0)));
        assert!(!a.approx_eq(&NormWeight::new(1.01, 2.0)));
    }

    #[test]
    #[should_panic]
    #[cfg(debug_assertions)]
    fn test_numerator_above_normalizer_is_a_bug() {
        let _ = NormWeight::new(2.0, 1.0);
    }
}

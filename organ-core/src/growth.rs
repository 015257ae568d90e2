//! Analytical growth laws.
//!
//! A growth law maps organ age to organ length for an initial growth rate
//! `r` and a maximal length `k`, and back. Both directions are needed: the
//! forward map gives the target length of a time step, the inverse gives
//! the exact age at which a node or a branch point was reached.

use serde::{Deserialize, Serialize};

/// Family of the growth curve, selected per organ type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrowthFunction {
    /// `l(t) = k (1 - exp(-r t / k))`, saturating at `k`.
    #[default]
    NegativeExponential,
    /// `l(t) = min(r t, k)`.
    Linear,
}

impl GrowthFunction {
    /// Length reached at `age` (negative ages give zero length).
    pub fn length(self, age: f64, r: f64, k: f64) -> f64 {
        if age <= 0.0 || k <= 0.0 || r <= 0.0 {
            return 0.0;
        }
        match self {
            GrowthFunction::NegativeExponential => k * (1.0 - (-(r / k) * age).exp()),
            GrowthFunction::Linear => (r * age).min(k),
        }
    }

    /// Age at which `length` is reached.
    ///
    /// Lengths at or beyond `k` are never reached by the negative
    /// exponential law and give `f64::INFINITY`; the linear law reaches `k`
    /// after `k / r` days.
    pub fn age(self, length: f64, r: f64, k: f64) -> f64 {
        if length <= 0.0 {
            return 0.0;
        }
        if r <= 0.0 || k <= 0.0 {
            return f64::INFINITY;
        }
        match self {
            GrowthFunction::NegativeExponential => {
                if length >= k {
                    f64::INFINITY
                } else {
                    -(k / r) * (1.0 - length / k).ln()
                }
            }
            GrowthFunction::Linear => length.min(k) / r,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_law_saturates_at_k() {
        let g = GrowthFunction::Linear;
        assert_eq!(g.length(2.5, 1.0, 10.0), 2.5);
        assert_eq!(g.length(20.0, 1.0, 10.0), 10.0);
        assert_eq!(g.age(2.5, 1.0, 10.0), 2.5);
        assert_eq!(g.length(-1.0, 1.0, 10.0), 0.0);
    }

    #[test]
    fn age_and_length_round_trip() {
        let (r, k) = (2.0, 15.0);
        for g in [GrowthFunction::Linear, GrowthFunction::NegativeExponential] {
            for i in 0..60 {
                let a = i as f64 * 0.1;
                let l = g.length(a, r, k);
                assert!((g.age(l, r, k) - a).abs() < 1e-9, "{g:?} age {a}");
            }
            for i in 0..140 {
                let l = i as f64 * 0.1;
                let a = g.age(l, r, k);
                assert!((g.length(a, r, k) - l).abs() < 1e-9, "{g:?} length {l}");
            }
        }
    }

    #[test]
    fn negative_exponential_is_monotonic_and_bounded() {
        let g = GrowthFunction::NegativeExponential;
        let mut last = 0.0;
        for i in 1..100 {
            let l = g.length(i as f64, 1.0, 5.0);
            assert!(l > last && l < 5.0, "age {i}: {l}");
            last = l;
        }
        // saturates to k in floating point, never beyond
        for i in 100..400 {
            let l = g.length(i as f64, 1.0, 5.0);
            assert!(l >= last && l <= 5.0);
            last = l;
        }
        assert_eq!(g.age(5.0, 1.0, 5.0), f64::INFINITY);
    }

    #[test]
    fn degenerate_coefficients_do_not_grow() {
        let g = GrowthFunction::NegativeExponential;
        assert_eq!(g.length(3.0, 0.0, 5.0), 0.0);
        assert_eq!(g.length(3.0, 1.0, 0.0), 0.0);
        assert_eq!(g.age(1.0, 0.0, 5.0), f64::INFINITY);
        assert_eq!(g.age(0.0, 0.0, 5.0), 0.0);
    }
}

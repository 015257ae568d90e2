//! Directional growth bias applied at each growth increment.
//!
//! A tropism draws random deflections `(a, b)` of the current heading,
//! `a` being a polar angle with standard deviation `sigma * sqrt(dx)` and
//! `b` a uniform azimuth. With strength `n` it tries about `n * sqrt(dx)`
//! extra draws and keeps the one minimizing its objective.

use crate::geometry::{rot_ab, rot_x, rot_z};
use glam::{DMat3, DVec3};
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};
use std::f64::consts::{PI, TAU};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TropismKind {
    /// Random walk only, no preferred direction.
    #[default]
    Straight,
    /// Prefers horizontal headings.
    Plagiotropism,
    /// Prefers growing downwards (negative z).
    Gravitropism,
    /// Prefers growing upwards (positive z).
    AntiGravitropism,
    /// Prefers the organ's initial heading.
    Exotropism,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tropism {
    pub kind: TropismKind,
    /// Strength: expected number of trials per unit length.
    pub n: f64,
    /// Flexibility: standard deviation of the polar deflection per sqrt(cm).
    pub sigma: f64,
}

impl Default for Tropism {
    fn default() -> Self {
        Self {
            kind: TropismKind::Straight,
            n: 0.0,
            sigma: 0.0,
        }
    }
}

impl Tropism {
    pub fn new(kind: TropismKind, n: f64, sigma: f64) -> Self {
        Self { kind, n, sigma }
    }

    /// Value to minimize for the deflection `(a, b)` of `frame`.
    ///
    /// All objectives are scaled to `[0, 1]`.
    pub fn objective(&self, frame: DMat3, a: f64, b: f64, i_heading: DVec3) -> f64 {
        let h = (frame * rot_x(b) * rot_z(a)).col(0);
        match self.kind {
            TropismKind::Straight => 0.0,
            TropismKind::Plagiotropism => h.z.abs(),
            TropismKind::Gravitropism => 0.5 * (h.z + 1.0),
            TropismKind::AntiGravitropism => 0.5 * (1.0 - h.z),
            TropismKind::Exotropism => {
                h.dot(i_heading.normalize_or_zero()).clamp(-1.0, 1.0).acos() / PI
            }
        }
    }

    /// Draws the deflection `(a, b)` applied to `frame` for a step of length `dx`.
    pub fn heading<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        frame: DMat3,
        dx: f64,
        i_heading: DVec3,
    ) -> (f64, f64) {
        let sd = self.sigma * dx.max(0.0).sqrt();
        let draw = |rng: &mut R| -> (f64, f64) {
            let z: f64 = StandardNormal.sample(rng);
            (sd * z, rng.random::<f64>() * TAU)
        };
        let (mut best_a, mut best_b) = draw(rng);
        if self.kind == TropismKind::Straight {
            return (best_a, best_b);
        }

        let mut trials = self.n * dx.max(0.0).sqrt();
        if trials > 0.0 {
            let frac = trials - trials.floor();
            trials = if rng.random::<f64>() < frac {
                trials.ceil()
            } else {
                trials.floor()
            };
            let mut best_v = self.objective(frame, best_a, best_b, i_heading);
            for _ in 0..trials as usize {
                let (a, b) = draw(rng);
                let v = self.objective(frame, a, b, i_heading);
                if v < best_v {
                    best_v = v;
                    best_a = a;
                    best_b = b;
                }
            }
        }
        (best_a, best_b)
    }

    /// Unit heading after one perturbed step of length `dx`.
    pub fn next_heading<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        frame: DMat3,
        dx: f64,
        i_heading: DVec3,
    ) -> DVec3 {
        let (a, b) = self.heading(rng, frame, dx, i_heading);
        frame * rot_ab(a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::ons;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn zero_sigma_keeps_heading() {
        let mut rng = StdRng::seed_from_u64(7);
        let frame = ons(DVec3::new(1.0, 0.0, 0.0));
        let t = Tropism::new(TropismKind::Gravitropism, 3.0, 0.0);
        let h = t.next_heading(&mut rng, frame, 1.0, DVec3::X);
        assert!((h - DVec3::X).length() < 1e-12);
    }

    #[test]
    fn objectives_are_scaled() {
        let down = ons(DVec3::new(0.0, 0.0, -1.0));
        let up = ons(DVec3::new(0.0, 0.0, 1.0));
        let g = Tropism::new(TropismKind::Gravitropism, 1.0, 0.1);
        assert!(g.objective(down, 0.0, 0.0, DVec3::Z).abs() < 1e-12);
        assert!((g.objective(up, 0.0, 0.0, DVec3::Z) - 1.0).abs() < 1e-12);
        let e = Tropism::new(TropismKind::Exotropism, 1.0, 0.1);
        assert!((e.objective(down, 0.0, 0.0, DVec3::Z) - 1.0).abs() < 1e-12);
        let p = Tropism::new(TropismKind::Plagiotropism, 1.0, 0.1);
        assert!(p.objective(ons(DVec3::X), 0.0, 0.0, DVec3::X).abs() < 1e-12);
    }

    #[test]
    fn gravitropism_bends_downwards() {
        let mut rng = StdRng::seed_from_u64(42);
        let t = Tropism::new(TropismKind::Gravitropism, 5.0, 0.5);
        let mut h = DVec3::X;
        for _ in 0..200 {
            h = t.next_heading(&mut rng, ons(h), 0.5, DVec3::X);
        }
        assert!(h.z < -0.5, "heading {h:?} should point down");
    }

    #[test]
    fn same_seed_gives_same_headings() {
        let t = Tropism::new(TropismKind::Plagiotropism, 2.0, 0.3);
        let run = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut h = DVec3::new(0.0, 0.0, -1.0);
            for _ in 0..20 {
                h = t.next_heading(&mut rng, ons(h), 1.0, DVec3::Z);
            }
            h
        };
        assert_eq!(run(3), run(3));
    }
}

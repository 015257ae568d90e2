//! Organ parameters.
//!
//! A *random* parameter describes an organ type (mean and standard
//! deviation of every growth coefficient) and is shared read-only by all
//! organs of that type. A *specific* parameter is drawn from it once, when
//! an organ is created, and stays fixed for the organ's life.

use crate::growth::GrowthFunction;
use crate::tropism::Tropism;
use crate::types::OrganType;
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Draws `max(mean + N(0,1) * sd, floor)`; no draw is made for `sd == 0`.
fn draw<R: Rng + ?Sized>(rng: &mut R, mean: f64, sd: f64, floor: f64) -> f64 {
    if sd == 0.0 {
        return mean.max(floor);
    }
    let z: f64 = StandardNormal.sample(rng);
    (mean + z * sd).max(floor)
}

/// How the emergence delay of a lateral is defined.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LateralDelay {
    /// The parent's realized `ldelay` [day].
    #[default]
    Time,
    /// The time the parent needs to grow its apical zone `la` past the branch point.
    Distance,
}

/// A lateral organ a parent may emit at a branch point.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Successor {
    pub organ_type: OrganType,
    pub subtype: usize,
    pub probability: f64,
}

/// Picks a successor by cumulative probability; `None` if the draw falls
/// beyond the summed probabilities.
fn pick_successor<R: Rng + ?Sized>(successors: &[Successor], rng: &mut R) -> Option<Successor> {
    if successors.is_empty() {
        return None;
    }
    let x = rng.random::<f64>();
    let mut acc = 0.0;
    successors.iter().copied().find(|s| {
        acc += s.probability;
        x < acc
    })
}

/// Parameters every organ type carries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrganRandomParameter {
    pub name: String,
    pub organ_type: OrganType,
    pub subtype: usize,
    /// Maximal axial resolution [cm].
    pub dx: f64,
    /// Minimal axial resolution [cm]; shorter increments are banked.
    pub dx_min: f64,
    /// Radius [cm].
    pub a: f64,
    pub a_s: f64,
}

impl Default for OrganRandomParameter {
    fn default() -> Self {
        Self {
            name: "organ".to_string(),
            organ_type: OrganType::Organ,
            subtype: 0,
            dx: 0.25,
            dx_min: 1e-6,
            a: 0.1,
            a_s: 0.0,
        }
    }
}

/// Upper bound on the number of branch points of a single organ.
pub const MAX_BRANCH_POINTS: usize = 10_000;

/// Branching layout shared by roots and leaves.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Zones {
    pub lb: f64,
    pub la: f64,
    /// Internodal distances between consecutive branch points.
    pub ln: Vec<f64>,
    /// Number of branch points, `ln.len() + 1` or 0 for unbranched organs.
    pub nob: usize,
    /// Maximal length.
    pub lmax: f64,
}

impl Zones {
    /// Draws the zone layout; `ln <= 0` or `lmax <= lb + la` gives no branch points.
    fn realize<R: Rng + ?Sized>(
        rng: &mut R,
        (lb, lbs): (f64, f64),
        (la, las): (f64, f64),
        (ln, lns): (f64, f64),
        lmax: f64,
    ) -> Self {
        let lb = draw(rng, lb, lbs, 0.0);
        let la = draw(rng, la, las, 0.0);
        if ln <= 0.0 || lmax <= lb + la {
            return Self {
                lb,
                la,
                ln: Vec::new(),
                nob: 0,
                lmax,
            };
        }
        let mut nob = ((lmax - la - lb) / ln).ceil().max(1.0) as usize;
        if nob > MAX_BRANCH_POINTS {
            tracing::warn!(nob, ln, lmax, "too many branch points, truncated");
            nob = MAX_BRANCH_POINTS;
        }
        let ln: Vec<f64> = (1..nob).map(|_| draw(rng, ln, lns, 1e-5)).collect();
        let lmax = lb + ln.iter().sum::<f64>() + la;
        Self { lb, la, ln, nob, lmax }
    }

    /// Distances from the organ base at which laterals emerge, in order.
    pub fn branch_points(&self) -> Vec<f64> {
        if self.nob == 0 {
            return Vec::new();
        }
        let mut s = self.lb;
        let mut points = Vec::with_capacity(self.nob);
        points.push(s);
        for l in &self.ln {
            s += l;
            points.push(s);
        }
        points
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RootRandomParameter {
    pub base: OrganRandomParameter,
    /// Basal zone [cm].
    pub lb: f64,
    pub lbs: f64,
    /// Apical zone [cm].
    pub la: f64,
    pub las: f64,
    /// Internodal distance [cm].
    pub ln: f64,
    pub lns: f64,
    /// Maximal length [cm].
    pub lmax: f64,
    pub lmaxs: f64,
    /// Initial growth rate [cm/day].
    pub r: f64,
    pub rs: f64,
    /// Insertion angle [rad].
    pub theta: f64,
    pub thetas: f64,
    /// Life time [day].
    pub rlt: f64,
    pub rlts: f64,
    /// Emergence delay of laterals [day].
    pub ldelay: f64,
    pub ldelays: f64,
    pub lateral_delay: LateralDelay,
    pub growth: GrowthFunction,
    pub tropism: Tropism,
    pub successors: Vec<Successor>,
}

impl Default for RootRandomParameter {
    fn default() -> Self {
        Self {
            base: OrganRandomParameter {
                name: "root".to_string(),
                organ_type: OrganType::Root,
                subtype: 1,
                ..OrganRandomParameter::default()
            },
            lb: 0.0,
            lbs: 0.0,
            la: 10.0,
            las: 0.0,
            ln: 1.0,
            lns: 0.0,
            lmax: 30.0,
            lmaxs: 0.0,
            r: 1.0,
            rs: 0.0,
            theta: 1.22,
            thetas: 0.0,
            rlt: 1e9,
            rlts: 0.0,
            ldelay: 0.0,
            ldelays: 0.0,
            lateral_delay: LateralDelay::Time,
            growth: GrowthFunction::NegativeExponential,
            tropism: Tropism::default(),
            successors: Vec::new(),
        }
    }
}

impl RootRandomParameter {
    /// Draws the parameters of a single root.
    pub fn realize<R: Rng + ?Sized>(&self, rng: &mut R) -> RootSpecificParameter {
        let lmax = draw(rng, self.lmax, self.lmaxs, 0.0);
        let zones = Zones::realize(
            rng,
            (self.lb, self.lbs),
            (self.la, self.las),
            (self.ln, self.lns),
            lmax,
        );
        RootSpecificParameter {
            subtype: self.base.subtype,
            zones,
            r: draw(rng, self.r, self.rs, 0.0),
            a: draw(rng, self.base.a, self.base.a_s, 0.0),
            theta: draw(rng, self.theta, self.thetas, 0.0),
            rlt: draw(rng, self.rlt, self.rlts, 0.0),
            ldelay: draw(rng, self.ldelay, self.ldelays, 0.0),
        }
    }

    /// Type of the lateral to emit at the next branch point, if any.
    pub fn lateral_type<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<Successor> {
        pick_successor(&self.successors, rng)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RootSpecificParameter {
    pub subtype: usize,
    pub zones: Zones,
    pub r: f64,
    pub a: f64,
    pub theta: f64,
    pub rlt: f64,
    pub ldelay: f64,
}

impl RootSpecificParameter {
    /// Maximal length of this root.
    pub fn k(&self) -> f64 {
        self.zones.lmax
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeafRandomParameter {
    pub base: OrganRandomParameter,
    /// Petiole (basal zone) [cm].
    pub lb: f64,
    pub lbs: f64,
    pub la: f64,
    pub las: f64,
    pub ln: f64,
    pub lns: f64,
    pub lmax: f64,
    pub lmaxs: f64,
    pub r: f64,
    pub rs: f64,
    pub theta: f64,
    pub thetas: f64,
    pub rlt: f64,
    pub rlts: f64,
    pub ldelay: f64,
    pub ldelays: f64,
    pub lateral_delay: LateralDelay,
    pub growth: GrowthFunction,
    pub tropism: Tropism,
    /// Age at which the tropism starts to act; `<= 0` applies it from emergence.
    pub tropism_age: f64,
    /// Maximal blade width [cm].
    pub width_blade: f64,
    /// Petiole width [cm].
    pub width_petiole: f64,
    /// Blade thickness [cm].
    pub thickness: f64,
    /// Relative half-width of the blade (0..=1), sampled uniformly from
    /// blade base to tip. Empty means a rectangular blade.
    pub leaf_geometry: Vec<f64>,
    /// Maximal length per phytomer position; the last entry applies to all
    /// further phytomers. Empty means `lmax` for every phytomer.
    pub lmax_phytomer: Vec<f64>,
    pub successors: Vec<Successor>,
}

impl Default for LeafRandomParameter {
    fn default() -> Self {
        Self {
            base: OrganRandomParameter {
                name: "leaf".to_string(),
                organ_type: OrganType::Leaf,
                subtype: 1,
                ..OrganRandomParameter::default()
            },
            lb: 1.0,
            lbs: 0.0,
            la: 5.0,
            las: 0.0,
            ln: 0.0,
            lns: 0.0,
            lmax: 6.0,
            lmaxs: 0.0,
            r: 1.0,
            rs: 0.0,
            theta: 0.7,
            thetas: 0.0,
            rlt: 1e9,
            rlts: 0.0,
            ldelay: 0.0,
            ldelays: 0.0,
            lateral_delay: LateralDelay::Time,
            growth: GrowthFunction::NegativeExponential,
            tropism: Tropism::default(),
            tropism_age: 0.0,
            width_blade: 1.0,
            width_petiole: 0.2,
            thickness: 0.02,
            leaf_geometry: Vec::new(),
            lmax_phytomer: Vec::new(),
            successors: Vec::new(),
        }
    }
}

impl LeafRandomParameter {
    /// Mean maximal length of the leaf at phytomer position `phytomer`.
    pub fn lmax_of(&self, phytomer: usize) -> f64 {
        match self.lmax_phytomer.last() {
            None => self.lmax,
            Some(&last) => self.lmax_phytomer.get(phytomer).copied().unwrap_or(last),
        }
    }

    /// Draws the parameters of a single leaf at phytomer position `phytomer`.
    pub fn realize<R: Rng + ?Sized>(&self, rng: &mut R, phytomer: usize) -> LeafSpecificParameter {
        let lmax = draw(rng, self.lmax_of(phytomer), self.lmaxs, 0.0);
        let zones = Zones::realize(
            rng,
            (self.lb, self.lbs),
            (self.la, self.las),
            (self.ln, self.lns),
            lmax,
        );
        LeafSpecificParameter {
            subtype: self.base.subtype,
            phytomer,
            zones,
            r: draw(rng, self.r, self.rs, 0.0),
            a: draw(rng, self.base.a, self.base.a_s, 0.0),
            theta: draw(rng, self.theta, self.thetas, 0.0),
            rlt: draw(rng, self.rlt, self.rlts, 0.0),
            ldelay: draw(rng, self.ldelay, self.ldelays, 0.0),
            width_blade: self.width_blade.max(0.0),
            width_petiole: self.width_petiole.max(0.0),
            thickness: self.thickness.max(0.0),
        }
    }

    pub fn lateral_type<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<Successor> {
        pick_successor(&self.successors, rng)
    }

    /// Relative half-width of the blade at the relative position `xi` (0 base, 1 tip).
    pub fn blade_profile(&self, xi: f64) -> f64 {
        let g = &self.leaf_geometry;
        match g.len() {
            0 => 1.0,
            1 => g[0],
            n => {
                let x = xi.clamp(0.0, 1.0) * (n - 1) as f64;
                let i = (x.floor() as usize).min(n - 2);
                let t = x - i as f64;
                g[i] * (1.0 - t) + g[i + 1] * t
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct LeafSpecificParameter {
    pub subtype: usize,
    pub phytomer: usize,
    pub zones: Zones,
    pub r: f64,
    pub a: f64,
    pub theta: f64,
    pub rlt: f64,
    pub ldelay: f64,
    pub width_blade: f64,
    pub width_petiole: f64,
    pub thickness: f64,
}

impl LeafSpecificParameter {
    pub fn k(&self) -> f64 {
        self.zones.lmax
    }
}

/// Type-level parameter of an organ, shared by all organs of that type.
#[derive(Clone, Debug)]
pub enum TypeParameter {
    Organ(Arc<OrganRandomParameter>),
    Root(Arc<RootRandomParameter>),
    Leaf(Arc<LeafRandomParameter>),
}

impl TypeParameter {
    pub fn base(&self) -> &OrganRandomParameter {
        match self {
            TypeParameter::Organ(p) => p,
            TypeParameter::Root(p) => &p.base,
            TypeParameter::Leaf(p) => &p.base,
        }
    }

    pub fn organ_type(&self) -> OrganType {
        self.base().organ_type
    }

    pub fn subtype(&self) -> usize {
        self.base().subtype
    }
}

impl From<OrganRandomParameter> for TypeParameter {
    fn from(p: OrganRandomParameter) -> Self {
        TypeParameter::Organ(Arc::new(p))
    }
}

impl From<RootRandomParameter> for TypeParameter {
    fn from(p: RootRandomParameter) -> Self {
        TypeParameter::Root(Arc::new(p))
    }
}

impl From<LeafRandomParameter> for TypeParameter {
    fn from(p: LeafRandomParameter) -> Self {
        TypeParameter::Leaf(Arc::new(p))
    }
}

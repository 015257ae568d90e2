//! Leaves.
//!
//! A leaf grows like a root but stores its nodes relative to its
//! attachment, so the organism can re-place it every step when the parent
//! moves. Along its axis a leaf has a petiole (`lb`), followed by the
//! lamina whose width follows the blade profile of the type.

use crate::error::OrganError;
use crate::geometry::{ons, takeoff_frame};
use crate::organ::{Development, Elongation, Emergence, Organ, OrganCore, OrganKind};
use crate::organism::GrowthContext;
use crate::params::{
    LateralDelay, LeafRandomParameter, LeafSpecificParameter, Successor, TypeParameter, Zones,
};
use crate::types::OrganType;
use glam::{DMat3, DQuat, DVec3};
use std::f64::consts::{PI, TAU};
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct Leaf {
    lrp: Arc<LeafRandomParameter>,
    param: LeafSpecificParameter,
    branch_count: usize,
    /// Initial heading expressed in the parent's frame at the attachment node.
    partial_i_heading: DVec3,
    /// Node coordinates relative to node 0, in the orientation of `i_heading`.
    rel_nodes: Vec<DVec3>,
    /// Rotation from the `i_heading` orientation to the current placement.
    rotation: DQuat,
    /// Set until the age-dependent tropism has been applied.
    first_call: bool,
}

impl Leaf {
    pub fn new(lrp: Arc<LeafRandomParameter>, param: LeafSpecificParameter) -> Self {
        Self {
            lrp,
            param,
            branch_count: 0,
            partial_i_heading: DVec3::X,
            rel_nodes: Vec::new(),
            rotation: DQuat::IDENTITY,
            first_call: true,
        }
    }

    /// Creates a leaf within the simulation, or `None` if its realized
    /// maximal length is degenerate.
    ///
    /// The leaf takes the next phytomer position of its subtype; a leaf that
    /// is not created gives its position back.
    pub(crate) fn spawn(
        lrp: Arc<LeafRandomParameter>,
        e: &Emergence,
        ctx: &mut GrowthContext,
    ) -> Option<Organ> {
        let subtype = lrp.base.subtype;
        let phytomer = ctx.leaf_phytomer_id(subtype);
        ctx.add_leaf_phytomer_id(subtype);
        let param = lrp.realize(&mut ctx.rng, phytomer);
        if param.k() <= 0.0 {
            ctx.minus_phytomer_id(subtype);
            tracing::debug!(subtype, phytomer, "leaf without length not created");
            return None;
        }
        let i_heading = match e.heading {
            Some(h) => ons(h),
            None => takeoff_frame(e.frame, ctx.rand() * TAU, param.theta),
        };
        let partial_i_heading = e.frame.transpose() * i_heading.col(0);
        let id = ctx.next_organ_id();
        let type_param = TypeParameter::Leaf(lrp.clone());
        let core = OrganCore::spawned(id, e.parent, type_param, e.delay, i_heading, e.attachment);
        let leaf = Leaf {
            partial_i_heading,
            ..Leaf::new(lrp, param)
        };
        Some(Organ::spawned(core, OrganKind::Leaf(leaf)))
    }

    pub fn random_parameter(&self) -> Arc<LeafRandomParameter> {
        self.lrp.clone()
    }

    pub fn param(&self) -> &LeafSpecificParameter {
        &self.param
    }

    pub fn phytomer(&self) -> usize {
        self.param.phytomer
    }

    /// Takeoff direction in the parent's frame.
    pub fn get_i_heading0(&self) -> DVec3 {
        self.partial_i_heading
    }

    pub fn rel_nodes(&self) -> &[DVec3] {
        &self.rel_nodes
    }

    fn age_dependent_tropism(&self) -> bool {
        self.lrp.tropism_age > 0.0
    }

    /// Length of the lamina once fully grown.
    fn lamina_max(&self) -> f64 {
        (self.param.k() - self.param.zones.lb).max(0.0)
    }

    /// Blade width at distance `s` from the lamina base.
    fn width_at(&self, s: f64) -> f64 {
        let m = self.lamina_max();
        if m <= 0.0 {
            return 0.0;
        }
        self.param.width_blade * self.lrp.blade_profile(s / m)
    }

    /// Lamina area between `a` and `b`, measured from the lamina base.
    ///
    /// The width is piecewise linear, so the trapezoidal rule over the
    /// profile breakpoints is exact.
    fn lamina_area(&self, a: f64, b: f64) -> f64 {
        if b <= a {
            return 0.0;
        }
        let m = self.lamina_max();
        let n = self.lrp.leaf_geometry.len();
        let mut xs = vec![a, b];
        if n > 1 && m > 0.0 {
            xs.extend(
                (1..n - 1)
                    .map(|j| j as f64 / (n - 1) as f64 * m)
                    .filter(|&s| s > a && s < b),
            );
        }
        xs.sort_by(f64::total_cmp);
        xs.windows(2)
            .map(|w| 0.5 * (self.width_at(w[0]) + self.width_at(w[1])) * (w[1] - w[0]))
            .sum()
    }

    /// Recomputes the relative nodes from the absolute ones.
    fn sync_relative(&mut self, core: &OrganCore) {
        let Some(&origin) = core.nodes.first() else {
            self.rel_nodes.clear();
            return;
        };
        let inv = self.rotation.inverse();
        self.rel_nodes = core.nodes.iter().map(|&n| inv * (n - origin)).collect();
    }

    /// Re-bends the grown blade with the tropism, keeping segment lengths.
    fn bend(&self, core: &mut OrganCore, ctx: &mut GrowthContext) {
        let lengths: Vec<f64> = core.nodes.windows(2).map(|w| w[0].distance(w[1])).collect();
        for (i, &sdx) in lengths.iter().enumerate() {
            let p = core.nodes[i] + self.tropic_increment(core, i, sdx, ctx);
            core.nodes[i + 1] = p;
        }
        tracing::trace!(organ = core.id, age = core.age, "leaf bent by tropism");
    }

    /// Initial heading turned into the leaf's current placement.
    fn placed_i_heading(&self, core: &OrganCore) -> DVec3 {
        self.rotation * core.i_heading.col(0)
    }

    /// Heading at node `n`, in the current placement.
    fn placed_heading(&self, core: &OrganCore, n: usize) -> Result<DVec3, OrganError> {
        if n == 0 && !core.nodes.is_empty() {
            return Ok(self.placed_i_heading(core));
        }
        core.segment_heading(n)
    }

    fn tropic_increment(
        &self,
        core: &OrganCore,
        n: usize,
        sdx: f64,
        ctx: &mut GrowthContext,
    ) -> DVec3 {
        let h = self.placed_heading(core, n).unwrap_or_else(|_| core.heading());
        let reference = self.placed_i_heading(core);
        self.lrp.tropism.next_heading(&mut ctx.rng, ons(h), sdx, reference) * sdx
    }

    fn is_branched(core: &OrganCore) -> bool {
        core.children.iter().any(|c| c.core.age > 0.0)
    }

    /* zoning */

    /// Length of the part beyond the petiole [cm].
    pub fn leaf_length(&self, core: &OrganCore, realized: bool) -> f64 {
        (core.get_length(realized) - self.param.zones.lb).max(0.0)
    }

    /// Length beyond petiole and apical zone [cm].
    pub fn leaf_center(&self, core: &OrganCore, realized: bool) -> f64 {
        (core.get_length(realized) - self.param.zones.la - self.param.zones.lb).max(0.0)
    }

    /// Surface area of the lamina [cm²], plus the petiole strip if
    /// `with_petiole`. Zero for leaves bearing emerged lateral leaves.
    pub fn leaf_area(&self, core: &OrganCore, realized: bool, with_petiole: bool) -> f64 {
        if Self::is_branched(core) {
            return 0.0;
        }
        let mut area = self.lamina_area(0.0, self.leaf_length(core, realized));
        if with_petiole {
            area += core.get_length(realized).min(self.param.zones.lb) * self.param.width_petiole;
        }
        area
    }

    /// Axial range of segment `i`.
    fn segment_range(core: &OrganCore, i: usize, realized: bool) -> Result<(f64, f64), OrganError> {
        let n = core.nodes.len().saturating_sub(1);
        if i >= n {
            return Err(OrganError::OutOfRange {
                what: "segment",
                index: i,
                len: n,
            });
        }
        let s0 = core.get_length_at(i)?;
        let mut s1 = core.get_length_at(i + 1)?;
        if !realized && i + 1 == n {
            s1 += core.epsilon_dx;
        }
        Ok((s0, s1))
    }

    /// Petiole and lamina lengths of segment `i`.
    fn split_segment(
        &self,
        core: &OrganCore,
        i: usize,
        realized: bool,
    ) -> Result<((f64, f64), (f64, f64)), OrganError> {
        let (s0, s1) = Self::segment_range(core, i, realized)?;
        let lb = self.param.zones.lb;
        Ok(((s0.min(lb), s1.min(lb)), ((s0 - lb).max(0.0), (s1 - lb).max(0.0))))
    }

    pub fn leaf_area_at_seg(
        &self,
        core: &OrganCore,
        i: usize,
        realized: bool,
        with_petiole: bool,
    ) -> Result<f64, OrganError> {
        let ((p0, p1), (l0, l1)) = self.split_segment(core, i, realized)?;
        if Self::is_branched(core) {
            return Ok(0.0);
        }
        let mut area = self.lamina_area(l0, l1);
        if with_petiole {
            area += (p1 - p0) * self.param.width_petiole;
        }
        Ok(area)
    }

    /// Lamina slab of segment `i`, plus the petiole part as a cylinder.
    pub fn leaf_vol_at_seg(
        &self,
        core: &OrganCore,
        i: usize,
        realized: bool,
        with_petiole: bool,
    ) -> Result<f64, OrganError> {
        let ((p0, p1), _) = self.split_segment(core, i, realized)?;
        let mut vol = self.leaf_area_at_seg(core, i, realized, false)? * self.param.thickness;
        if with_petiole {
            vol += PI * self.param.a * self.param.a * (p1 - p0);
        }
        Ok(vol)
    }

    pub fn leaf_length_at_seg(
        &self,
        core: &OrganCore,
        i: usize,
        with_petiole: bool,
    ) -> Result<f64, OrganError> {
        let ((p0, p1), (l0, l1)) = self.split_segment(core, i, true)?;
        Ok(if with_petiole { (p1 - p0) + (l1 - l0) } else { l1 - l0 })
    }

    /* visualization */

    /// Offsets of the blade edges along the leaf's side axis at node `i`;
    /// empty within the petiole and for branched leaves.
    pub fn get_leaf_vis_x(&self, core: &OrganCore, i: usize) -> Result<Vec<f64>, OrganError> {
        let l = core.get_length_at(i)?;
        let lb = self.param.zones.lb;
        if Self::is_branched(core) || l + 1e-12 < lb {
            return Ok(Vec::new());
        }
        let w = 0.5 * self.width_at(l - lb);
        Ok(vec![-w, w])
    }

    /// Blade edge points at node `i`.
    pub fn get_leaf_vis(&self, core: &OrganCore, i: usize) -> Result<Vec<DVec3>, OrganError> {
        let x = self.get_leaf_vis_x(core, i)?;
        let side = ons(self.placed_heading(core, i)?).col(1);
        Ok(x.into_iter().map(|x| core.nodes[i] + side * x).collect())
    }
}

impl Development for Leaf {
    fn organ_type(&self) -> OrganType {
        OrganType::Leaf
    }

    fn simulate(
        &mut self,
        core: &mut OrganCore,
        dt: f64,
        ctx: &mut GrowthContext,
    ) -> Result<(), OrganError> {
        self.develop(core, dt, ctx)?;
        if self.age_dependent_tropism()
            && self.first_call
            && core.age >= self.lrp.tropism_age
            && core.nodes.len() > 1
        {
            self.bend(core, ctx);
            self.first_call = false;
        }
        self.sync_relative(core);
        Ok(())
    }

    fn calc_length(&self, _core: &OrganCore, age: f64) -> Result<f64, OrganError> {
        Ok(self.lrp.growth.length(age, self.param.r, self.param.k()))
    }

    fn calc_age(&self, _core: &OrganCore, length: f64) -> Result<f64, OrganError> {
        Ok(self.lrp.growth.age(length, self.param.r, self.param.k()))
    }

    fn heading_at(&self, core: &OrganCore, i: usize) -> Result<DVec3, OrganError> {
        self.placed_heading(core, i)
    }

    /// Places the leaf at `origin`, turning its initial heading to follow
    /// the parent frame.
    fn rel2abs(
        &mut self,
        core: &mut OrganCore,
        origin: DVec3,
        parent_frame: DMat3,
    ) -> Result<(), OrganError> {
        if core.nodes.is_empty() {
            return Ok(());
        }
        if self.rel_nodes.len() != core.nodes.len() {
            self.sync_relative(core);
        }
        let h = (parent_frame * self.partial_i_heading).normalize_or_zero();
        let h0 = core.i_heading.col(0).normalize_or_zero();
        if h != DVec3::ZERO && h0 != DVec3::ZERO {
            self.rotation = DQuat::from_rotation_arc(h0, h);
        }
        for (n, r) in core.nodes.iter_mut().zip(&self.rel_nodes) {
            *n = origin + self.rotation * *r;
        }
        Ok(())
    }

    fn abs2rel(&mut self, core: &mut OrganCore) -> Result<(), OrganError> {
        self.sync_relative(core);
        Ok(())
    }

    fn stores_relative_nodes(&self) -> bool {
        true
    }

    fn has_moved(&self, _core: &OrganCore) -> bool {
        true
    }

    fn radius(&self, _core: &OrganCore) -> f64 {
        self.param.a
    }

    /// Midrib cylinder plus the lamina slab grown up to `length`.
    fn org_volume(&self, core: &OrganCore, length: Option<f64>, realized: bool) -> f64 {
        let l = length.unwrap_or_else(|| core.get_length(realized)).max(0.0);
        let a = self.param.a;
        let lamina = self.lamina_area(0.0, (l - self.param.zones.lb).max(0.0));
        PI * a * a * l + self.param.thickness * lamina
    }

    fn org_volume_to_length(&self, core: &OrganCore, volume: f64) -> f64 {
        if volume <= 0.0 {
            return 0.0;
        }
        let f = |l: f64| self.org_volume(core, Some(l), false);
        let mut hi = self.param.k().max(1.0);
        while f(hi) < volume && hi < 1e12 {
            hi *= 2.0;
        }
        let mut lo = 0.0;
        for _ in 0..200 {
            let mid = 0.5 * (lo + hi);
            if f(mid) < volume {
                lo = mid;
            } else {
                hi = mid;
            }
            if hi - lo < 1e-13 {
                break;
            }
        }
        0.5 * (lo + hi)
    }

    fn parameter(&self, core: &OrganCore, name: &str) -> Option<f64> {
        let p = &self.param;
        let v = match name {
            "lb" => p.zones.lb,
            "la" => p.zones.la,
            "nob" => p.zones.nob as f64,
            "lmax" | "k" => p.k(),
            "r" => p.r,
            "a" => p.a,
            "theta" => p.theta,
            "rlt" => p.rlt,
            "ldelay" => p.ldelay,
            "phytomer" => p.phytomer as f64,
            "width_blade" => p.width_blade,
            "width_petiole" => p.width_petiole,
            "thickness" => p.thickness,
            "leaf_length" => self.leaf_length(core, true),
            "leaf_area" => self.leaf_area(core, true, false),
            _ => return None,
        };
        Some(v)
    }
}

impl Elongation for Leaf {
    fn zones(&self) -> &Zones {
        &self.param.zones
    }

    fn life_time(&self) -> f64 {
        self.param.rlt
    }

    fn branch_count(&self) -> usize {
        self.branch_count
    }

    fn set_branch_count(&mut self, n: usize) {
        self.branch_count = n;
    }

    fn lateral_type(&self, ctx: &mut GrowthContext) -> Option<Successor> {
        self.lrp.lateral_type(&mut ctx.rng)
    }

    fn delay_rule(&self) -> (LateralDelay, f64) {
        (self.lrp.lateral_delay, self.param.ldelay)
    }

    /// Straight until `tropism_age` when the tropism is age dependent.
    fn get_increment(
        &self,
        core: &OrganCore,
        n: usize,
        sdx: f64,
        ctx: &mut GrowthContext,
    ) -> DVec3 {
        if self.age_dependent_tropism() && core.age < self.lrp.tropism_age {
            let h = self.placed_heading(core, n).unwrap_or_else(|_| core.heading());
            return h * sdx;
        }
        self.tropic_increment(core, n, sdx, ctx)
    }
}

/// Borrowed view of a leaf organ, see [`Organ::as_leaf`].
#[derive(Clone, Copy)]
pub struct LeafView<'a> {
    core: &'a OrganCore,
    leaf: &'a Leaf,
}

impl<'a> LeafView<'a> {
    pub fn leaf(&self) -> &'a Leaf {
        self.leaf
    }

    pub fn leaf_length(&self, realized: bool) -> f64 {
        self.leaf.leaf_length(self.core, realized)
    }

    pub fn leaf_center(&self, realized: bool) -> f64 {
        self.leaf.leaf_center(self.core, realized)
    }

    pub fn leaf_area(&self, realized: bool, with_petiole: bool) -> f64 {
        self.leaf.leaf_area(self.core, realized, with_petiole)
    }

    pub fn leaf_area_at_seg(
        &self,
        i: usize,
        realized: bool,
        with_petiole: bool,
    ) -> Result<f64, OrganError> {
        self.leaf.leaf_area_at_seg(self.core, i, realized, with_petiole)
    }

    pub fn leaf_vol_at_seg(
        &self,
        i: usize,
        realized: bool,
        with_petiole: bool,
    ) -> Result<f64, OrganError> {
        self.leaf.leaf_vol_at_seg(self.core, i, realized, with_petiole)
    }

    pub fn leaf_length_at_seg(&self, i: usize, with_petiole: bool) -> Result<f64, OrganError> {
        self.leaf.leaf_length_at_seg(self.core, i, with_petiole)
    }

    pub fn get_leaf_vis_x(&self, i: usize) -> Result<Vec<f64>, OrganError> {
        self.leaf.get_leaf_vis_x(self.core, i)
    }

    pub fn get_leaf_vis(&self, i: usize) -> Result<Vec<DVec3>, OrganError> {
        self.leaf.get_leaf_vis(self.core, i)
    }
}

impl Organ {
    pub fn as_leaf(&self) -> Option<LeafView<'_>> {
        match &self.kind {
            OrganKind::Leaf(leaf) => Some(LeafView { core: &self.core, leaf }),
            _ => None,
        }
    }
}

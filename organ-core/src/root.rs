//! Roots: absolute polylines growing along the growth law of their type,
//! branching at the realized branch points and bending with the tropism.

use crate::error::OrganError;
use crate::geometry::{ons, takeoff_frame};
use crate::organ::{Development, Elongation, Emergence, Organ, OrganCore, OrganKind};
use crate::organism::GrowthContext;
use crate::params::{
    LateralDelay, RootRandomParameter, RootSpecificParameter, Successor, TypeParameter, Zones,
};
use crate::types::OrganType;
use glam::DVec3;
use std::f64::consts::TAU;
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct Root {
    rrp: Arc<RootRandomParameter>,
    param: RootSpecificParameter,
    /// Branch points already passed.
    branch_count: usize,
}

impl Root {
    pub fn new(rrp: Arc<RootRandomParameter>, param: RootSpecificParameter) -> Self {
        Self {
            rrp,
            param,
            branch_count: 0,
        }
    }

    /// Creates a root within the simulation.
    ///
    /// ### Parameters
    /// - `rrp`: The type parameter; a specific parameter is realized from it.
    /// - `e`: Attachment, parent frame and, for base roots, the initial heading.
    pub(crate) fn spawn(
        rrp: Arc<RootRandomParameter>,
        e: &Emergence,
        ctx: &mut GrowthContext,
    ) -> Organ {
        let param = rrp.realize(&mut ctx.rng);
        if param.k() <= 0.0 {
            tracing::warn!(subtype = param.subtype, "root with zero maximal length");
        }
        let i_heading = match e.heading {
            Some(h) => ons(h),
            None => takeoff_frame(e.frame, ctx.rand() * TAU, param.theta),
        };
        let id = ctx.next_organ_id();
        let type_param = TypeParameter::Root(rrp.clone());
        let core = OrganCore::spawned(id, e.parent, type_param, e.delay, i_heading, e.attachment);
        Organ::spawned(core, OrganKind::Root(Root::new(rrp, param)))
    }

    pub fn random_parameter(&self) -> Arc<RootRandomParameter> {
        self.rrp.clone()
    }

    pub fn param(&self) -> &RootSpecificParameter {
        &self.param
    }

    /// Realized takeoff angle relative to the parent heading [rad].
    pub fn insertion_angle(&self) -> f64 {
        self.param.theta
    }
}

impl Development for Root {
    fn organ_type(&self) -> OrganType {
        OrganType::Root
    }

    fn simulate(
        &mut self,
        core: &mut OrganCore,
        dt: f64,
        ctx: &mut GrowthContext,
    ) -> Result<(), OrganError> {
        self.develop(core, dt, ctx)
    }

    fn calc_length(&self, _core: &OrganCore, age: f64) -> Result<f64, OrganError> {
        Ok(self.rrp.growth.length(age, self.param.r, self.param.k()))
    }

    fn calc_age(&self, _core: &OrganCore, length: f64) -> Result<f64, OrganError> {
        Ok(self.rrp.growth.age(length, self.param.r, self.param.k()))
    }

    fn heading_at(&self, core: &OrganCore, i: usize) -> Result<DVec3, OrganError> {
        core.segment_heading(i)
    }

    fn radius(&self, _core: &OrganCore) -> f64 {
        self.param.a
    }

    fn parameter(&self, _core: &OrganCore, name: &str) -> Option<f64> {
        let p = &self.param;
        let v = match name {
            "lb" => p.zones.lb,
            "la" => p.zones.la,
            "ln" => {
                if p.zones.ln.is_empty() {
                    0.0
                } else {
                    p.zones.ln.iter().sum::<f64>() / p.zones.ln.len() as f64
                }
            }
            "nob" => p.zones.nob as f64,
            "lmax" | "k" => p.k(),
            "r" => p.r,
            "a" => p.a,
            "theta" => p.theta,
            "rlt" => p.rlt,
            "ldelay" => p.ldelay,
            "branch_count" => self.branch_count as f64,
            _ => return None,
        };
        Some(v)
    }
}

impl Elongation for Root {
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
        self.rrp.lateral_type(&mut ctx.rng)
    }

    fn delay_rule(&self) -> (LateralDelay, f64) {
        (self.rrp.lateral_delay, self.param.ldelay)
    }

    fn get_increment(
        &self,
        core: &OrganCore,
        n: usize,
        sdx: f64,
        ctx: &mut GrowthContext,
    ) -> DVec3 {
        let h = core.segment_heading(n).unwrap_or_else(|_| core.heading());
        let frame = ons(h);
        self.rrp
            .tropism
            .next_heading(&mut ctx.rng, frame, sdx, core.i_heading.col(0))
            * sdx
    }
}

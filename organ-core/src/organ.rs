//! The organ tree.
//!
//! An [`Organ`] is a polyline of nodes that owns its laterals. Its shared
//! state lives in [`OrganCore`]; what differs between roots, leaves and
//! generic organs lives in an [`OrganKind`] and is reached through the
//! [`Development`] capability interface.
//!
//! The parent of an organ is only known by id. Lookups go through
//! [`crate::organism::Organism::organ`]; ownership flows strictly from
//! parent to child.

use crate::error::OrganError;
use crate::geometry::{direction, ons};
use crate::leaf::Leaf;
use crate::organism::GrowthContext;
use crate::params::{LateralDelay, OrganRandomParameter, Successor, TypeParameter, Zones};
use crate::root::Root;
use crate::types::{NodeId, OrganId, OrganType};
use glam::{DMat3, DVec3};
use std::f64::consts::PI;
use std::fmt;
use std::sync::Arc;

/// Where a spawned organ is attached to its parent.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Attachment {
    /// Position of the parent node.
    pub node: DVec3,
    /// Global id of the parent node.
    pub node_id: NodeId,
    /// Local index of the parent node.
    pub parent_ni: usize,
    /// Absolute time at which the parent passed this node [day].
    pub time: f64,
}

/// Explicit state of an organ, used to rebuild one from scratch.
#[derive(Clone, Debug)]
pub struct OrganState {
    pub id: OrganId,
    pub parent: Option<OrganId>,
    pub alive: bool,
    pub active: bool,
    pub age: f64,
    pub length: f64,
    pub creation_time: f64,
    pub i_heading: DMat3,
    pub parent_ni: usize,
    pub moved: bool,
    pub old_number_of_nodes: usize,
}

/// State shared by every organ kind.
#[derive(Clone, Debug)]
pub struct OrganCore {
    pub(crate) id: OrganId,
    pub(crate) parent: Option<OrganId>,
    pub(crate) type_param: TypeParameter,

    pub(crate) alive: bool,
    pub(crate) active: bool,
    pub(crate) age: f64,
    /// Includes `epsilon_dx`.
    pub(crate) length: f64,
    /// Growth not yet realized as a node, added to the next step.
    pub(crate) epsilon_dx: f64,
    /// Absolute time at which the organ's age was zero.
    pub(crate) creation_time: f64,

    pub(crate) nodes: Vec<DVec3>,
    pub(crate) node_ids: Vec<NodeId>,
    pub(crate) node_cts: Vec<f64>,

    pub(crate) i_heading: DMat3,
    pub(crate) parent_ni: usize,
    /// Attachment of a spawned organ; node 0 is realized from it on emergence.
    pub(crate) origin: Option<Attachment>,

    pub(crate) moved: bool,
    pub(crate) old_number_of_nodes: usize,

    pub(crate) children: Vec<Organ>,
}

impl OrganCore {
    fn from_state(s: OrganState, type_param: TypeParameter) -> Self {
        Self {
            id: s.id,
            parent: s.parent,
            type_param,
            alive: s.alive,
            active: s.active,
            age: s.age,
            length: s.length,
            epsilon_dx: 0.0,
            creation_time: s.creation_time,
            nodes: Vec::new(),
            node_ids: Vec::new(),
            node_cts: Vec::new(),
            i_heading: s.i_heading,
            parent_ni: s.parent_ni,
            origin: None,
            moved: s.moved,
            old_number_of_nodes: s.old_number_of_nodes,
            children: Vec::new(),
        }
    }

    pub(crate) fn spawned(
        id: OrganId,
        parent: Option<OrganId>,
        type_param: TypeParameter,
        delay: f64,
        i_heading: DMat3,
        attachment: Attachment,
    ) -> Self {
        Self {
            id,
            parent,
            type_param,
            alive: true,
            active: true,
            age: -delay,
            length: 0.0,
            epsilon_dx: 0.0,
            creation_time: attachment.time + delay,
            nodes: Vec::new(),
            node_ids: Vec::new(),
            node_cts: Vec::new(),
            i_heading,
            parent_ni: attachment.parent_ni,
            origin: Some(attachment),
            moved: false,
            old_number_of_nodes: 0,
            children: Vec::new(),
        }
    }

    pub fn dx(&self) -> f64 {
        self.type_param.base().dx
    }

    pub fn dx_min(&self) -> f64 {
        self.type_param.base().dx_min
    }

    pub fn get_length(&self, realized: bool) -> f64 {
        if realized {
            self.length - self.epsilon_dx
        } else {
            self.length
        }
    }

    /// Resets the last-step bookkeeping.
    pub(crate) fn begin_step(&mut self) {
        self.moved = false;
        self.old_number_of_nodes = self.nodes.len();
    }

    /// Realizes node 0 at the attachment point, once.
    pub(crate) fn emerge(&mut self) {
        if self.nodes.is_empty()
            && let Some(o) = self.origin
        {
            self.nodes.push(o.node);
            self.node_ids.push(o.node_id);
            self.node_cts.push(self.creation_time);
        }
    }

    /// Adds a node. Appends unless `shift`, in which case the node is
    /// inserted at `index` and laterals attached at or after `index` are
    /// moved along.
    pub fn add_node(
        &mut self,
        n: DVec3,
        id: NodeId,
        t: f64,
        index: usize,
        shift: bool,
    ) -> Result<(), OrganError> {
        if !shift {
            self.nodes.push(n);
            self.node_ids.push(id);
            self.node_cts.push(t);
            return Ok(());
        }
        if index > self.nodes.len() {
            return Err(OrganError::OutOfRange {
                what: "node",
                index,
                len: self.nodes.len(),
            });
        }
        self.nodes.insert(index, n);
        self.node_ids.insert(index, id);
        self.node_cts.insert(index, t);
        for child in self.children.iter_mut() {
            let ni = child.core.parent_ni;
            if ni >= index {
                child.move_origin(ni + 1, self.nodes[ni + 1], self.node_ids[ni + 1]);
            }
        }
        Ok(())
    }

    /// Splits `l` plus the banked growth into segment lengths.
    ///
    /// Every full `dx` becomes a segment. The remainder is banked in
    /// `epsilon_dx`, unless `close` is set and it is at least `dx_min`, in
    /// which case it becomes a final short segment.
    pub(crate) fn plan_segments(&mut self, l: f64, close: bool) -> Vec<f64> {
        let total = l + self.epsilon_dx;
        self.epsilon_dx = 0.0;
        let dx = self.dx();
        if total <= 0.0 || dx <= 0.0 {
            return Vec::new();
        }
        let n = (total / dx + 1e-9).floor() as usize;
        let mut steps = vec![dx; n];
        let rem = (total - n as f64 * dx).max(0.0);
        if rem > 1e-14 {
            if close && rem >= self.dx_min() * 0.99 {
                steps.push(rem);
            } else {
                self.epsilon_dx = rem;
                tracing::trace!(organ = self.id, epsilon = rem, "growth banked");
            }
        }
        steps
    }

    /// Direction of the segment ending at node `i`; the initial heading for node 0.
    pub(crate) fn segment_heading(&self, i: usize) -> Result<DVec3, OrganError> {
        if i >= self.nodes.len() {
            return Err(OrganError::OutOfRange {
                what: "node",
                index: i,
                len: self.nodes.len(),
            });
        }
        let h0 = self.i_heading.col(0);
        if i == 0 {
            return Ok(h0);
        }
        Ok(direction(self.nodes[i - 1], self.nodes[i], h0))
    }

    /// Current tip heading: the last segment, or the initial heading.
    pub fn heading(&self) -> DVec3 {
        let n = self.nodes.len();
        let h0 = self.i_heading.col(0);
        if n < 2 {
            h0
        } else {
            direction(self.nodes[n - 2], self.nodes[n - 1], h0)
        }
    }

    /// Polyline length from node 0 to node `i`.
    pub fn get_length_at(&self, i: usize) -> Result<f64, OrganError> {
        if i >= self.nodes.len() {
            return Err(OrganError::OutOfRange {
                what: "node",
                index: i,
                len: self.nodes.len(),
            });
        }
        Ok(self.nodes[..=i].windows(2).map(|w| w[0].distance(w[1])).sum())
    }

    fn number_of_laterals(&self) -> usize {
        self.children.iter().filter(|c| c.core.age > 0.0).count()
    }
}

/// Behavior that differs between organ kinds.
///
/// Defaults cover what every organ provides; the analytical
/// growth functions, local headings and relative coordinates are
/// obligations of the concrete kinds and fail with
/// [`OrganError::NotImplemented`] otherwise.
pub trait Development {
    fn organ_type(&self) -> OrganType;

    /// Grows the organ and its laterals for `dt` days.
    fn simulate(
        &mut self,
        core: &mut OrganCore,
        dt: f64,
        ctx: &mut GrowthContext,
    ) -> Result<(), OrganError>;

    fn calc_length(&self, _core: &OrganCore, _age: f64) -> Result<f64, OrganError> {
        Err(OrganError::NotImplemented("calc_length"))
    }

    fn calc_age(&self, _core: &OrganCore, _length: f64) -> Result<f64, OrganError> {
        Err(OrganError::NotImplemented("calc_age"))
    }

    /// Heading of the organ at node `i`.
    fn heading_at(&self, _core: &OrganCore, _i: usize) -> Result<DVec3, OrganError> {
        Err(OrganError::NotImplemented("heading"))
    }

    /// Recomputes absolute node coordinates for the attachment `origin` and
    /// the parent's current frame there.
    fn rel2abs(
        &mut self,
        _core: &mut OrganCore,
        _origin: DVec3,
        _parent_frame: DMat3,
    ) -> Result<(), OrganError> {
        Err(OrganError::NotImplemented("rel2abs"))
    }

    fn abs2rel(&mut self, _core: &mut OrganCore) -> Result<(), OrganError> {
        Err(OrganError::NotImplemented("abs2rel"))
    }

    /// Whether node coordinates are stored relative to the attachment point.
    fn stores_relative_nodes(&self) -> bool {
        false
    }

    fn has_moved(&self, core: &OrganCore) -> bool {
        core.moved
    }

    fn radius(&self, core: &OrganCore) -> f64 {
        core.type_param.base().a
    }

    /// Volume for `length` (or the current length) as a cylinder.
    fn org_volume(&self, core: &OrganCore, length: Option<f64>, realized: bool) -> f64 {
        let l = length.unwrap_or_else(|| core.get_length(realized));
        let a = self.radius(core);
        PI * a * a * l
    }

    fn org_volume_to_length(&self, core: &OrganCore, volume: f64) -> f64 {
        let a = self.radius(core);
        if a <= 0.0 {
            return 0.0;
        }
        volume / (PI * a * a)
    }

    /// Kind specific named parameters, see [`Organ::get_parameter`].
    fn parameter(&self, _core: &OrganCore, _name: &str) -> Option<f64> {
        None
    }
}

/// Growth along a branched axis, shared by roots and leaves.
///
/// The axis is a basal zone, a sequence of branch points and an apical
/// zone. Length grows along the analytical growth law and is discretized
/// into nodes; a lateral is emitted when the length reaches each branch
/// point.
pub(crate) trait Elongation: Development {
    fn zones(&self) -> &Zones;

    fn life_time(&self) -> f64;

    /// Number of branch points already passed.
    fn branch_count(&self) -> usize;

    fn set_branch_count(&mut self, n: usize);

    fn lateral_type(&self, ctx: &mut GrowthContext) -> Option<Successor>;

    /// How the emergence delay of laterals is defined, with the realized `ldelay`.
    fn delay_rule(&self) -> (LateralDelay, f64);

    /// Displacement of a new node grown from node `n` with length `sdx`.
    fn get_increment(&self, core: &OrganCore, n: usize, sdx: f64, ctx: &mut GrowthContext) -> DVec3;

    fn max_length(&self) -> f64 {
        self.zones().lmax
    }

    /// Time between passing a branch point at age `age_ln` and the lateral's emergence.
    fn lateral_delay(&self, core: &OrganCore, age_ln: f64) -> Result<f64, OrganError> {
        match self.delay_rule() {
            (LateralDelay::Time, ldelay) => Ok(ldelay),
            (LateralDelay::Distance, _) => {
                // saturating laws never reach the maximal length itself
                let k = self.max_length();
                let l = (core.length + self.zones().la).min(k * (1.0 - 1e-9));
                Ok((self.calc_age(core, l)? - age_ln).max(0.0))
            }
        }
    }

    /// Absolute time at which the organ reaches `length`, clipped to the
    /// growth window `[age, age + dt]` of the current step.
    fn calc_creation_time(
        &self,
        core: &OrganCore,
        length: f64,
        dt: f64,
    ) -> Result<f64, OrganError> {
        let a = self.calc_age(core, length)?.max(core.age).min(core.age + dt);
        Ok(core.creation_time + a)
    }

    /// Appends the nodes realizing `l` more length (see [`OrganCore::plan_segments`]).
    fn create_segments(
        &mut self,
        core: &mut OrganCore,
        l: f64,
        dt: f64,
        close: bool,
        ctx: &mut GrowthContext,
    ) -> Result<(), OrganError> {
        if l < 0.0 || core.nodes.is_empty() {
            return Ok(());
        }
        let base = core.get_length(true);
        let steps = core.plan_segments(l, close);
        let mut sl = 0.0;
        for sdx in steps {
            sl += sdx;
            let n = core.nodes.len() - 1;
            let p = core.nodes[n] + self.get_increment(core, n, sdx, ctx);
            let ct = self.calc_creation_time(core, base + sl, dt)?;
            let id = ctx.next_node_id();
            core.add_node(p, id, ct, 0, false)?;
        }
        Ok(())
    }

    /// Spawns a lateral at the tip and grows it for the rest of the step.
    fn create_lateral(
        &mut self,
        core: &mut OrganCore,
        dt: f64,
        ctx: &mut GrowthContext,
    ) -> Result<(), OrganError> {
        let Some(successor) = self.lateral_type(ctx) else {
            return Ok(());
        };
        if core.nodes.is_empty() {
            return Ok(());
        }
        let age_ln = self.calc_age(core, core.length)?;
        let delay = self.lateral_delay(core, age_ln)?;
        let tip = core.nodes.len() - 1;
        let attachment = Attachment {
            node: core.nodes[tip],
            node_id: core.node_ids[tip],
            parent_ni: tip,
            time: core.creation_time + age_ln,
        };
        let frame = ons(self.heading_at(core, tip)?);
        let emergence = Emergence {
            organ_type: successor.organ_type,
            subtype: successor.subtype,
            frame,
            heading: None,
            delay,
            parent: Some(core.id),
            attachment,
        };
        if let Some(mut lateral) = ctx.create_organ(emergence)? {
            let remaining = (core.age + dt - age_ln).clamp(0.0, dt.max(0.0));
            tracing::trace!(
                parent = core.id,
                lateral = lateral.id(),
                at = core.length,
                delay,
                remaining,
                "lateral created"
            );
            lateral.simulate(remaining, ctx)?;
            core.children.push(lateral);
        }
        Ok(())
    }

    /// Grows `dl` through the basal zone, the branch points and the apical zone.
    fn elongate(
        &mut self,
        core: &mut OrganCore,
        mut dl: f64,
        dt: f64,
        ctx: &mut GrowthContext,
    ) -> Result<(), OrganError> {
        let points = self.zones().branch_points();
        let mut i = self.branch_count();
        while i < points.len() {
            let s = points[i];
            if core.length < s {
                if dl <= 0.0 {
                    break;
                }
                let reaches = core.length + dl >= s - 1e-12;
                let ddx = if reaches { s - core.length } else { dl };
                self.create_segments(core, ddx, dt, reaches, ctx)?;
                dl -= ddx;
                if !reaches {
                    core.length += ddx;
                    break;
                }
                core.length = s;
            }
            self.create_lateral(core, dt, ctx)?;
            i += 1;
            self.set_branch_count(i);
        }
        if dl > 0.0 {
            self.create_segments(core, dl, dt, false, ctx)?;
            core.length += dl;
        }
        Ok(())
    }

    /// The per-step life cycle: death, emergence, laterals first, then
    /// own growth along the analytical law.
    fn develop(
        &mut self,
        core: &mut OrganCore,
        dt: f64,
        ctx: &mut GrowthContext,
    ) -> Result<(), OrganError> {
        core.begin_step();
        if !core.alive || dt <= 0.0 {
            return Ok(());
        }
        let mut dt = dt;
        let rlt = self.life_time();
        if core.age + dt > rlt {
            dt = (rlt - core.age).max(0.0);
            core.alive = false;
        }
        if core.age + dt <= 0.0 {
            core.age += dt;
            return Ok(());
        }
        core.emerge();
        let dt_ = if core.age < 0.0 { core.age + dt } else { dt };
        core.age = core.age.max(0.0);

        for child in core.children.iter_mut() {
            child.simulate(dt, ctx)?;
        }

        if core.active {
            let target = self.calc_length(core, self.calc_age(core, core.length)? + dt_)?;
            let dl = (target - core.length).max(0.0);
            if dl > 0.0 {
                self.elongate(core, dl, dt_, ctx)?;
            }
            if core.length >= self.max_length() * (1.0 - 1e-11) {
                self.create_segments(core, 0.0, dt_, true, ctx)?;
                core.active = false;
            }
        }
        core.age += dt_;
        Ok(())
    }
}

/// An organ without own growth law, e.g. the seed. It only ages and
/// drives its children.
#[derive(Clone, Debug)]
pub struct Generic {
    param: Arc<OrganRandomParameter>,
}

impl Generic {
    pub fn new(param: Arc<OrganRandomParameter>) -> Self {
        Self { param }
    }

    pub fn random_parameter(&self) -> Arc<OrganRandomParameter> {
        self.param.clone()
    }
}

impl Development for Generic {
    fn organ_type(&self) -> OrganType {
        self.param.organ_type
    }

    fn simulate(
        &mut self,
        core: &mut OrganCore,
        dt: f64,
        ctx: &mut GrowthContext,
    ) -> Result<(), OrganError> {
        core.begin_step();
        if !core.alive || dt <= 0.0 {
            return Ok(());
        }
        if core.age + dt > 0.0 {
            core.emerge();
        }
        for child in core.children.iter_mut() {
            child.simulate(dt, ctx)?;
        }
        core.age += dt;
        Ok(())
    }
}

/// The closed set of organ kinds.
#[derive(Clone, Debug)]
pub enum OrganKind {
    Generic(Generic),
    Root(Root),
    Leaf(Leaf),
}

impl OrganKind {
    fn dev(&self) -> &dyn Development {
        match self {
            OrganKind::Generic(g) => g,
            OrganKind::Root(r) => r,
            OrganKind::Leaf(l) => l,
        }
    }

    fn dev_mut(&mut self) -> &mut dyn Development {
        match self {
            OrganKind::Generic(g) => g,
            OrganKind::Root(r) => r,
            OrganKind::Leaf(l) => l,
        }
    }
}

/// Request to the organ factory, see [`GrowthContext::create_organ`].
#[derive(Clone, Copy, Debug)]
pub struct Emergence {
    pub organ_type: OrganType,
    pub subtype: usize,
    /// Parent frame at the attachment node, see [`Organ::frame_at`].
    pub frame: DMat3,
    /// Initial heading of a base organ; laterals (`None`) take off at their
    /// insertion angle around a random azimuth.
    pub heading: Option<DVec3>,
    pub delay: f64,
    pub parent: Option<OrganId>,
    pub attachment: Attachment,
}

#[derive(Clone, Debug)]
pub struct Organ {
    pub(crate) core: OrganCore,
    pub(crate) kind: OrganKind,
}

impl Organ {
    /// Rebuilds an organ from explicit state; nodes are added afterwards
    /// with [`Organ::add_node`].
    pub fn from_scratch(state: OrganState, kind: OrganKind) -> Self {
        let type_param = match &kind {
            OrganKind::Generic(g) => TypeParameter::Organ(g.random_parameter()),
            OrganKind::Root(r) => TypeParameter::Root(r.random_parameter()),
            OrganKind::Leaf(l) => TypeParameter::Leaf(l.random_parameter()),
        };
        Self {
            core: OrganCore::from_state(state, type_param),
            kind,
        }
    }

    /// Assembles an organ spawned within the simulation.
    pub(crate) fn spawned(core: OrganCore, kind: OrganKind) -> Self {
        Self { core, kind }
    }

    /// Deep copy of the organ and all its descendants.
    pub fn copy(&self) -> Organ {
        self.clone()
    }

    pub fn simulate(&mut self, dt: f64, ctx: &mut GrowthContext) -> Result<(), OrganError> {
        self.kind.dev_mut().simulate(&mut self.core, dt, ctx)
    }

    pub fn organ_type(&self) -> OrganType {
        self.kind.dev().organ_type()
    }

    pub fn kind(&self) -> &OrganKind {
        &self.kind
    }

    pub fn id(&self) -> OrganId {
        self.core.id
    }

    /// Id of the parent organ; resolve it with [`crate::organism::Organism::organ`].
    pub fn parent_id(&self) -> Option<OrganId> {
        self.core.parent
    }

    pub fn type_parameter(&self) -> &TypeParameter {
        &self.core.type_param
    }

    pub fn subtype(&self) -> usize {
        self.core.type_param.subtype()
    }

    pub fn is_alive(&self) -> bool {
        self.core.alive
    }

    pub fn is_active(&self) -> bool {
        self.core.active
    }

    pub fn age(&self) -> f64 {
        self.core.age
    }

    pub fn creation_time(&self) -> f64 {
        self.core.creation_time
    }

    pub fn get_length(&self, realized: bool) -> f64 {
        self.core.get_length(realized)
    }

    pub fn get_length_at(&self, i: usize) -> Result<f64, OrganError> {
        self.core.get_length_at(i)
    }

    pub fn get_epsilon(&self) -> f64 {
        self.core.epsilon_dx
    }

    pub fn dx(&self) -> f64 {
        self.core.dx()
    }

    pub fn dx_min(&self) -> f64 {
        self.core.dx_min()
    }

    pub fn calc_length(&self, age: f64) -> Result<f64, OrganError> {
        self.kind.dev().calc_length(&self.core, age)
    }

    pub fn calc_age(&self, length: f64) -> Result<f64, OrganError> {
        self.kind.dev().calc_age(&self.core, length)
    }

    pub fn i_heading(&self) -> DMat3 {
        self.core.i_heading
    }

    pub fn parent_ni(&self) -> usize {
        self.core.parent_ni
    }

    pub fn heading(&self) -> DVec3 {
        self.core.heading()
    }

    pub fn heading_at(&self, i: usize) -> Result<DVec3, OrganError> {
        self.kind.dev().heading_at(&self.core, i)
    }

    pub fn rel2abs(&mut self, origin: DVec3, parent_frame: DMat3) -> Result<(), OrganError> {
        self.kind.dev_mut().rel2abs(&mut self.core, origin, parent_frame)
    }

    pub fn abs2rel(&mut self) -> Result<(), OrganError> {
        self.kind.dev_mut().abs2rel(&mut self.core)
    }

    pub fn has_moved(&self) -> bool {
        self.kind.dev().has_moved(&self.core)
    }

    pub fn get_old_number_of_nodes(&self) -> usize {
        self.core.old_number_of_nodes
    }

    pub fn org_volume(&self, length: Option<f64>, realized: bool) -> f64 {
        self.kind.dev().org_volume(&self.core, length, realized)
    }

    pub fn org_volume_to_length(&self, volume: f64) -> f64 {
        self.kind.dev().org_volume_to_length(&self.core, volume)
    }

    /* nodes */

    pub fn get_number_of_nodes(&self) -> usize {
        self.core.nodes.len()
    }

    pub fn get_number_of_segments(&self) -> usize {
        self.core.nodes.len().saturating_sub(1)
    }

    pub fn get_node(&self, i: usize) -> Result<DVec3, OrganError> {
        self.core.nodes.get(i).copied().ok_or(OrganError::OutOfRange {
            what: "node",
            index: i,
            len: self.core.nodes.len(),
        })
    }

    pub fn get_node_id(&self, i: usize) -> Result<NodeId, OrganError> {
        self.core.node_ids.get(i).copied().ok_or(OrganError::OutOfRange {
            what: "node",
            index: i,
            len: self.core.node_ids.len(),
        })
    }

    pub fn get_node_ct(&self, i: usize) -> Result<f64, OrganError> {
        self.core.node_cts.get(i).copied().ok_or(OrganError::OutOfRange {
            what: "node",
            index: i,
            len: self.core.node_cts.len(),
        })
    }

    pub fn nodes(&self) -> &[DVec3] {
        &self.core.nodes
    }

    pub fn node_ids(&self) -> &[NodeId] {
        &self.core.node_ids
    }

    pub fn node_cts(&self) -> &[f64] {
        &self.core.node_cts
    }

    /// Attachment point: node 0, or the pending attachment of an organ that has not emerged.
    pub fn origin(&self) -> Option<DVec3> {
        self.core.nodes.first().copied().or(self.core.origin.map(|o| o.node))
    }

    pub fn add_node(
        &mut self,
        n: DVec3,
        id: NodeId,
        t: f64,
        index: usize,
        shift: bool,
    ) -> Result<(), OrganError> {
        self.core.add_node(n, id, t, index, shift)
    }

    /// Re-attaches the organ to the parent node `idx`, e.g. after the parent
    /// inserted a node below the attachment point.
    pub fn move_origin(&mut self, idx: usize, node: DVec3, node_id: NodeId) {
        let core = &mut self.core;
        core.parent_ni = idx;
        if let Some(o) = core.origin.as_mut() {
            o.node = node;
            o.node_id = node_id;
            o.parent_ni = idx;
        }
        if !core.nodes.is_empty() {
            core.nodes[0] = node;
            core.node_ids[0] = node_id;
            core.moved = true;
        }
    }

    /// Consecutive pairs of global node ids.
    pub fn get_segments(&self) -> Vec<[NodeId; 2]> {
        self.core.node_ids.windows(2).map(|w| [w[0], w[1]]).collect()
    }

    /* children */

    pub fn add_child(&mut self, child: Organ) {
        self.core.children.push(child);
    }

    pub fn get_number_of_children(&self) -> usize {
        self.core.children.len()
    }

    pub fn get_child(&self, i: usize) -> Result<&Organ, OrganError> {
        self.core.children.get(i).ok_or(OrganError::OutOfRange {
            what: "child",
            index: i,
            len: self.core.children.len(),
        })
    }

    pub fn children(&self) -> &[Organ] {
        &self.core.children
    }

    /// Number of emerged laterals (children with positive age).
    pub fn get_number_of_laterals(&self) -> usize {
        self.core.number_of_laterals()
    }

    /// This organ and all descendants in pre-order, optionally filtered by
    /// type; organs that have not emerged yet are included only with `all`.
    pub fn get_organs(&self, ot: Option<OrganType>, all: bool) -> Vec<&Organ> {
        let mut v = Vec::new();
        self.collect_organs(ot, all, &mut v);
        v
    }

    fn collect_organs<'a>(&'a self, ot: Option<OrganType>, all: bool, v: &mut Vec<&'a Organ>) {
        if (all || self.core.age > 0.0) && ot.is_none_or(|t| t == self.organ_type()) {
            v.push(self);
        }
        for child in &self.core.children {
            child.collect_organs(ot, all, v);
        }
    }

    /// Finds this organ or a descendant by id.
    pub fn find(&self, id: OrganId) -> Option<&Organ> {
        if self.core.id == id {
            return Some(self);
        }
        self.core.children.iter().find_map(|c| c.find(id))
    }

    /// Local frame at node `i`: built from the heading there, or the initial
    /// frame for kinds without local headings.
    pub fn frame_at(&self, i: usize) -> DMat3 {
        match self.heading_at(i) {
            Ok(h) => ons(h),
            Err(_) => self.core.i_heading,
        }
    }

    /// Recomputes absolute coordinates of organs stored relative to their
    /// attachment, top-down. Absolute organs whose attachment node moved are
    /// re-attached with [`Organ::move_origin`].
    pub(crate) fn update_geometry(&mut self) -> Result<(), OrganError> {
        for i in 0..self.core.children.len() {
            let ni = self.core.children[i].core.parent_ni;
            let core = &self.core;
            let (Some(&node), Some(&node_id)) = (core.nodes.get(ni), core.node_ids.get(ni)) else {
                continue;
            };
            let frame = self.frame_at(ni);
            let child = &mut self.core.children[i];
            if child.core.nodes.is_empty() {
                child.move_origin(ni, node, node_id);
            } else if child.kind.dev().stores_relative_nodes() {
                child.rel2abs(node, frame)?;
            } else if child.core.nodes[0] != node {
                child.move_origin(ni, node, node_id);
            }
            child.update_geometry()?;
        }
        Ok(())
    }

    /// Named scalar of the organ's state or parameters.
    pub fn get_parameter(&self, name: &str) -> Result<f64, OrganError> {
        let c = &self.core;
        let flag = |b: bool| if b { 1.0 } else { 0.0 };
        let v = match name {
            "id" => c.id as f64,
            "organ_type" => self.organ_type().index() as f64,
            "sub_type" => self.subtype() as f64,
            "alive" => flag(c.alive),
            "active" => flag(c.active),
            "age" => c.age,
            "length" => c.get_length(true),
            "epsilon" => c.epsilon_dx,
            "creation_time" => c.creation_time,
            "number_of_nodes" => c.nodes.len() as f64,
            "number_of_segments" => self.get_number_of_segments() as f64,
            "number_of_children" => c.children.len() as f64,
            "number_of_laterals" => c.number_of_laterals() as f64,
            "parent_ni" => c.parent_ni as f64,
            "dx" => c.dx(),
            "dx_min" => c.dx_min(),
            "radius" => self.kind.dev().radius(c),
            "volume" => self.org_volume(None, true),
            _ => {
                return self
                    .kind
                    .dev()
                    .parameter(c, name)
                    .ok_or_else(|| OrganError::UnknownParameter(name.to_string()));
            }
        };
        Ok(v)
    }
}

impl fmt::Display for Organ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = &self.core;
        write!(
            f,
            "{} #{}: subtype {}, alive {}, active {}, age {:.3} d, length {:.3} cm, \
             epsilon {:.3} cm, {} nodes, parent node index {}, {} children",
            self.organ_type(),
            c.id,
            self.subtype(),
            c.alive,
            c.active,
            c.age,
            c.get_length(true),
            c.epsilon_dx,
            c.nodes.len(),
            c.parent_ni,
            c.children.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generic(id: OrganId) -> Organ {
        Organ::from_scratch(
            OrganState {
                id,
                parent: None,
                alive: true,
                active: true,
                age: 1.0,
                length: 0.0,
                creation_time: 0.0,
                i_heading: DMat3::IDENTITY,
                parent_ni: 0,
                moved: false,
                old_number_of_nodes: 0,
            },
            OrganKind::Generic(Generic::new(Arc::new(OrganRandomParameter::default()))),
        )
    }

    fn line(n: usize) -> Organ {
        let mut o = generic(0);
        for i in 0..n {
            o.add_node(DVec3::new(i as f64, 0.0, 0.0), i, i as f64, 0, false).unwrap();
        }
        o
    }

    #[test]
    fn add_node_keeps_arrays_in_sync() {
        let o = line(4);
        assert_eq!(o.get_number_of_nodes(), 4);
        assert_eq!(o.node_ids().len(), 4);
        assert_eq!(o.node_cts().len(), 4);
        assert_eq!(o.get_segments(), vec![[0, 1], [1, 2], [2, 3]]);
        assert_eq!(o.get_length_at(3).unwrap(), 3.0);
    }

    #[test]
    fn insert_with_shift_reattaches_children() {
        let mut parent = line(3);
        let mut child = generic(1);
        child.core.parent_ni = 2;
        child.add_node(DVec3::new(2.0, 0.0, 0.0), 2, 2.0, 0, false).unwrap();
        child.add_node(DVec3::new(2.0, 1.0, 0.0), 10, 3.0, 0, false).unwrap();
        parent.add_child(child);

        parent.add_node(DVec3::new(0.5, 0.0, 0.0), 20, 0.5, 1, true).unwrap();

        assert_eq!(parent.node_ids(), &[0, 20, 1, 2]);
        let child = parent.get_child(0).unwrap();
        assert_eq!(child.parent_ni(), 3);
        assert_eq!(child.get_node_id(0).unwrap(), 2);
        assert!(child.has_moved());
    }

    #[test]
    fn insert_beyond_end_is_out_of_range() {
        let mut o = line(2);
        let err = o.add_node(DVec3::ZERO, 9, 0.0, 5, true).unwrap_err();
        assert_eq!(
            err,
            OrganError::OutOfRange {
                what: "node",
                index: 5,
                len: 2
            }
        );
    }

    #[test]
    fn indexing_past_the_end_is_out_of_range() {
        let o = line(2);
        assert!(o.get_node(2).is_err());
        assert!(o.get_node_id(7).is_err());
        assert!(o.get_node_ct(2).is_err());
        assert!(o.get_child(0).is_err());
        assert!(o.get_length_at(2).is_err());
    }

    #[test]
    fn base_kind_has_no_growth_law() {
        let mut o = line(2);
        assert_eq!(o.calc_age(1.0), Err(OrganError::NotImplemented("calc_age")));
        assert_eq!(o.calc_length(1.0), Err(OrganError::NotImplemented("calc_length")));
        assert_eq!(o.heading_at(0), Err(OrganError::NotImplemented("heading")));
        assert_eq!(o.abs2rel(), Err(OrganError::NotImplemented("abs2rel")));
        assert_eq!(
            o.rel2abs(DVec3::ZERO, DMat3::IDENTITY),
            Err(OrganError::NotImplemented("rel2abs"))
        );
    }

    #[test]
    fn get_organs_is_preorder_and_filters_unemerged() {
        let mut root = generic(0);
        let mut a = generic(1);
        let mut a1 = generic(2);
        a1.core.age = -1.0;
        a.add_child(a1);
        a.add_child(generic(3));
        root.add_child(a);
        root.add_child(generic(4));

        let ids: Vec<_> = root.get_organs(None, false).iter().map(|o| o.id()).collect();
        assert_eq!(ids, vec![0, 1, 3, 4]);
        let ids: Vec<_> = root.get_organs(None, true).iter().map(|o| o.id()).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
        assert!(root.get_organs(Some(OrganType::Root), true).is_empty());
        assert_eq!(root.get_child(0).unwrap().get_number_of_laterals(), 1);
        assert_eq!(root.find(3).map(|o| o.id()), Some(3));
    }

    #[test]
    fn plan_segments_banks_remainders() {
        let mut o = line(1);
        // default dx 0.25, dx_min 1e-6
        let steps = o.core.plan_segments(0.6, false);
        assert_eq!(steps, vec![0.25, 0.25]);
        assert!((o.get_epsilon() - 0.1).abs() < 1e-12);
        let steps = o.core.plan_segments(0.2, true);
        assert_eq!(steps.len(), 2);
        assert!((steps[1] - 0.05).abs() < 1e-12);
        assert_eq!(o.get_epsilon(), 0.0);
    }

    #[test]
    fn cylinder_volume_inverts() {
        let mut o = line(3);
        o.core.length = 2.0;
        let v = o.org_volume(None, false);
        assert!((v - PI * 0.01 * 2.0).abs() < 1e-12);
        assert!((o.org_volume_to_length(v) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn parameters_by_name() {
        let o = line(3);
        assert_eq!(o.get_parameter("number_of_nodes").unwrap(), 3.0);
        assert_eq!(o.get_parameter("dx").unwrap(), 0.25);
        assert_eq!(o.get_parameter("alive").unwrap(), 1.0);
        assert_eq!(
            o.get_parameter("nonsense"),
            Err(OrganError::UnknownParameter("nonsense".to_string()))
        );
        assert!(o.to_string().starts_with("organ #0"));
    }
}

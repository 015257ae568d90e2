//! The simulation driver.
//!
//! A step of [`Organism::simulate`] runs in two passes:
//! 1. Growth: the seed and, recursively, every organ grows for `dt`;
//!    laterals created on the way grow at once for their share of the step.
//! 2. Placement: organs storing relative coordinates are re-placed at their
//!    attachment nodes, top-down, and absolute organs are re-attached where
//!    their parent node moved.
//!
//! Everything the organs need from their plant during growth lives in the
//! [`GrowthContext`], passed by `&mut` into every mutating call.

use crate::error::OrganError;
use crate::geometry::ons;
use crate::leaf::Leaf;
use crate::organ::{Attachment, Emergence, Generic, Organ, OrganCore, OrganKind, OrganState};
use crate::params::{OrganRandomParameter, TypeParameter};
use crate::root::Root;
use crate::types::{NodeId, OrganId, OrganType};
use glam::{DMat3, DVec3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Allocators, parameter registry, random source and phytomer counters of one plant.
#[derive(Clone, Debug)]
pub struct GrowthContext {
    pub(crate) rng: StdRng,
    next_node_id: NodeId,
    next_organ_id: OrganId,
    parameters: BTreeMap<(OrganType, usize), TypeParameter>,
    leaf_phytomers: BTreeMap<usize, usize>,
}

impl GrowthContext {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            next_node_id: 0,
            next_organ_id: 0,
            parameters: BTreeMap::new(),
            leaf_phytomers: BTreeMap::new(),
        }
    }

    pub fn next_node_id(&mut self) -> NodeId {
        let id = self.next_node_id;
        self.next_node_id += 1;
        id
    }

    pub fn next_organ_id(&mut self) -> OrganId {
        let id = self.next_organ_id;
        self.next_organ_id += 1;
        id
    }

    /// Number of node ids handed out so far.
    pub fn number_of_nodes(&self) -> usize {
        self.next_node_id
    }

    pub fn number_of_organs(&self) -> usize {
        self.next_organ_id
    }

    /// Uniform draw in `[0, 1)`.
    pub fn rand(&mut self) -> f64 {
        self.rng.random::<f64>()
    }

    /// Standard normal draw.
    pub fn randn(&mut self) -> f64 {
        StandardNormal.sample(&mut self.rng)
    }

    /// Registers the parameter of an organ type, replacing any previous one
    /// for the same type and subtype.
    pub fn set_parameter(&mut self, p: impl Into<TypeParameter>) {
        let p = p.into();
        self.parameters.insert((p.organ_type(), p.subtype()), p);
    }

    pub fn parameter(
        &self,
        organ_type: OrganType,
        subtype: usize,
    ) -> Result<&TypeParameter, OrganError> {
        self.parameters
            .get(&(organ_type, subtype))
            .ok_or(OrganError::UnknownType { organ_type, subtype })
    }

    pub fn parameters(&self) -> impl Iterator<Item = &TypeParameter> {
        self.parameters.values()
    }

    /* phytomers */

    /// Phytomer position the next leaf of `subtype` takes.
    pub fn leaf_phytomer_id(&self, subtype: usize) -> usize {
        self.leaf_phytomers.get(&subtype).copied().unwrap_or(0)
    }

    pub fn add_leaf_phytomer_id(&mut self, subtype: usize) {
        *self.leaf_phytomers.entry(subtype).or_insert(0) += 1;
    }

    pub fn minus_phytomer_id(&mut self, subtype: usize) {
        if let Some(n) = self.leaf_phytomers.get_mut(&subtype) {
            *n = n.saturating_sub(1);
        }
    }

    /// Instantiates the organ kind registered for the requested type.
    ///
    /// ### Returns
    /// `Ok(None)` if the organ is degenerate and was not created (a leaf
    /// without length); `UnknownType` if nothing is registered.
    pub fn create_organ(&mut self, e: Emergence) -> Result<Option<Organ>, OrganError> {
        let organ = match self.parameter(e.organ_type, e.subtype)?.clone() {
            TypeParameter::Root(p) => Some(Root::spawn(p, &e, self)),
            TypeParameter::Leaf(p) => Leaf::spawn(p, &e, self),
            TypeParameter::Organ(p) => {
                let id = self.next_organ_id();
                let i_heading = e.heading.map_or(e.frame, ons);
                let type_param = TypeParameter::Organ(p.clone());
                let core =
                    OrganCore::spawned(id, e.parent, type_param, e.delay, i_heading, e.attachment);
                Some(Organ::spawned(core, OrganKind::Generic(Generic::new(p))))
            }
        };
        Ok(organ)
    }
}

/// A plant: the seed organ, its subtree and the simulation clock.
#[derive(Clone, Debug)]
pub struct Organism {
    ctx: GrowthContext,
    seed: Option<Organ>,
    sim_time: f64,
}

impl Organism {
    /// Empty organism whose random source is seeded with `seed`.
    pub fn new(seed: u64) -> Self {
        Self {
            ctx: GrowthContext::new(seed),
            seed: None,
            sim_time: 0.0,
        }
    }

    pub fn set_parameter(&mut self, p: impl Into<TypeParameter>) {
        self.ctx.set_parameter(p);
    }

    pub fn context(&self) -> &GrowthContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut GrowthContext {
        &mut self.ctx
    }

    pub fn sim_time(&self) -> f64 {
        self.sim_time
    }

    /// Creates the seed organ with a single node at `position`.
    ///
    /// The seed uses the registered [`OrganType::Seed`] parameter if there
    /// is one.
    pub fn initialize(&mut self, position: DVec3) -> Result<(), OrganError> {
        let param = match self.ctx.parameter(OrganType::Seed, 0) {
            Ok(TypeParameter::Organ(p)) => p.clone(),
            _ => Arc::new(OrganRandomParameter {
                name: "seed".to_string(),
                organ_type: OrganType::Seed,
                ..OrganRandomParameter::default()
            }),
        };
        let id = self.ctx.next_organ_id();
        let mut seed = Organ::from_scratch(
            OrganState {
                id,
                parent: None,
                alive: true,
                active: true,
                age: 0.0,
                length: 0.0,
                creation_time: self.sim_time,
                i_heading: DMat3::IDENTITY,
                parent_ni: 0,
                moved: false,
                old_number_of_nodes: 0,
            },
            OrganKind::Generic(Generic::new(param)),
        );
        let node_id = self.ctx.next_node_id();
        seed.add_node(position, node_id, self.sim_time, 0, false)?;
        tracing::debug!(seed = id, ?position, "organism initialized");
        self.seed = Some(seed);
        Ok(())
    }

    /// Attaches a base organ to the seed node, emerging after `delay` days.
    ///
    /// ### Returns
    /// The id of the new organ, or `None` if it was degenerate.
    pub fn add_base_organ(
        &mut self,
        organ_type: OrganType,
        subtype: usize,
        heading: DVec3,
        delay: f64,
    ) -> Result<Option<OrganId>, OrganError> {
        let seed = self.seed.as_ref().ok_or(OrganError::MissingSeed)?;
        let attachment = Attachment {
            node: seed.get_node(0)?,
            node_id: seed.get_node_id(0)?,
            parent_ni: 0,
            time: self.sim_time,
        };
        let e = Emergence {
            organ_type,
            subtype,
            frame: seed.frame_at(0),
            heading: Some(heading),
            delay,
            parent: Some(seed.id()),
            attachment,
        };
        let Some(organ) = self.ctx.create_organ(e)? else {
            return Ok(None);
        };
        let id = organ.id();
        tracing::debug!(organ = id, %organ_type, subtype, delay, "base organ added");
        if let Some(seed) = self.seed.as_mut() {
            seed.add_child(organ);
        }
        Ok(Some(id))
    }

    /// Advances the whole plant by `dt` days.
    pub fn simulate(&mut self, dt: f64) -> Result<(), OrganError> {
        if dt.is_nan() || dt < 0.0 {
            return Err(OrganError::InvalidTimeStep(dt));
        }
        let seed = self.seed.as_mut().ok_or(OrganError::MissingSeed)?;
        seed.simulate(dt, &mut self.ctx)?;
        seed.update_geometry()?;
        self.sim_time += dt;
        tracing::debug!(
            time = self.sim_time,
            organs = self.ctx.number_of_organs(),
            nodes = self.ctx.number_of_nodes(),
            "simulated"
        );
        Ok(())
    }

    pub fn seed(&self) -> Option<&Organ> {
        self.seed.as_ref()
    }

    /// All organs in pre-order, see [`Organ::get_organs`].
    pub fn get_organs(&self, ot: Option<OrganType>, all: bool) -> Vec<&Organ> {
        self.seed.as_ref().map(|s| s.get_organs(ot, all)).unwrap_or_default()
    }

    pub fn organ(&self, id: OrganId) -> Option<&Organ> {
        self.seed.as_ref().and_then(|s| s.find(id))
    }

    /// Resolves the parent of organ `id`.
    pub fn parent(&self, id: OrganId) -> Option<&Organ> {
        self.organ(id)?.parent_id().and_then(|p| self.organ(p))
    }

    pub fn get_number_of_nodes(&self) -> usize {
        self.ctx.number_of_nodes()
    }

    pub fn leaf_phytomer_id(&self, subtype: usize) -> usize {
        self.ctx.leaf_phytomer_id(subtype)
    }

    /// Segments of all emerged organs as pairs of global node ids.
    pub fn get_segments(&self) -> Vec<[NodeId; 2]> {
        self.get_organs(None, false)
            .into_iter()
            .flat_map(|o| o.get_segments())
            .collect()
    }

    /// Node positions indexed by global node id.
    pub fn get_nodes(&self) -> Vec<DVec3> {
        let mut nodes = vec![DVec3::ZERO; self.ctx.number_of_nodes()];
        for o in self.get_organs(None, true) {
            for (&id, &n) in o.node_ids().iter().zip(o.nodes()) {
                if let Some(slot) = nodes.get_mut(id) {
                    *slot = n;
                }
            }
        }
        nodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::growth::GrowthFunction;
    use crate::params::{LeafRandomParameter, RootRandomParameter, Successor};
    use crate::tropism::{Tropism, TropismKind};

    fn herb(seed: u64) -> Organism {
        let mut plant = Organism::new(seed);
        plant.set_parameter(RootRandomParameter {
            lb: 1.0,
            lbs: 0.2,
            la: 2.0,
            ln: 0.8,
            lns: 0.1,
            lmax: 15.0,
            lmaxs: 2.0,
            r: 1.5,
            theta: 1.2,
            thetas: 0.1,
            tropism: Tropism::new(TropismKind::Gravitropism, 1.0, 0.2),
            successors: vec![
                Successor {
                    organ_type: OrganType::Root,
                    subtype: 2,
                    probability: 0.7,
                },
                Successor {
                    organ_type: OrganType::Leaf,
                    subtype: 1,
                    probability: 0.2,
                },
            ],
            ..RootRandomParameter::default()
        });
        let mut lateral = RootRandomParameter {
            lmax: 4.0,
            ln: 0.0,
            growth: GrowthFunction::Linear,
            tropism: Tropism::new(TropismKind::Plagiotropism, 2.0, 0.3),
            ..RootRandomParameter::default()
        };
        lateral.base.subtype = 2;
        plant.set_parameter(lateral);
        plant.set_parameter(LeafRandomParameter {
            lmax: 3.0,
            la: 2.0,
            lb: 0.5,
            ..LeafRandomParameter::default()
        });
        plant.initialize(DVec3::new(0.0, 0.0, -3.0)).unwrap();
        plant
            .add_base_organ(OrganType::Root, 1, DVec3::new(0.0, 0.0, -1.0), 0.0)
            .unwrap();
        plant
    }

    fn run(seed: u64) -> Organism {
        let mut plant = herb(seed);
        for _ in 0..15 {
            plant.simulate(1.0).unwrap();
        }
        plant
    }

    #[test]
    fn same_seed_same_plant() {
        let a = run(17);
        let b = run(17);
        let ids = |p: &Organism| {
            p.get_organs(None, true)
                .iter()
                .map(|o| (o.id(), o.parent_ni()))
                .collect::<Vec<_>>()
        };
        assert_eq!(ids(&a), ids(&b));
        assert_eq!(a.get_nodes(), b.get_nodes());
        assert_eq!(a.get_segments(), b.get_segments());
        assert!(a.get_organs(None, false).len() > 3);
    }

    #[test]
    fn zero_step_changes_nothing() {
        let mut plant = run(5);
        let nodes = plant.get_nodes();
        let state: Vec<_> = plant
            .get_organs(None, true)
            .iter()
            .map(|o| (o.get_number_of_nodes(), o.get_length(false), o.age()))
            .collect();
        plant.simulate(0.0).unwrap();
        let after: Vec<_> = plant
            .get_organs(None, true)
            .iter()
            .map(|o| (o.get_number_of_nodes(), o.get_length(false), o.age()))
            .collect();
        assert_eq!(state, after);
        assert_eq!(nodes, plant.get_nodes());
    }

    #[test]
    fn arrays_stay_in_sync_and_ages_bounded() {
        let mut plant = herb(23);
        let mut ages: BTreeMap<OrganId, f64> = BTreeMap::new();
        for _ in 0..10 {
            let dt = 0.75;
            plant.simulate(dt).unwrap();
            for o in plant.get_organs(None, true) {
                assert_eq!(o.nodes().len(), o.node_ids().len());
                assert_eq!(o.nodes().len(), o.node_cts().len());
                assert!(o.node_cts().windows(2).all(|w| w[0] <= w[1] + 1e-12));
                if let Some(&before) = ages.get(&o.id()) {
                    assert!(o.age() - before <= dt + 1e-12);
                }
                ages.insert(o.id(), o.age());
            }
        }
    }

    #[test]
    fn node_ids_are_unique_and_shared_at_attachments() {
        let plant = run(9);
        let mut seen = std::collections::BTreeSet::new();
        for o in plant.get_organs(None, true) {
            // node 0 repeats the parent's attachment node
            for &id in o.node_ids().iter().skip(1) {
                assert!(seen.insert(id), "node id {id} used twice");
            }
            if let Some(parent) = plant.parent(o.id())
                && o.get_number_of_nodes() > 0
            {
                assert_eq!(o.get_node_id(0).unwrap(), parent.get_node_id(o.parent_ni()).unwrap());
                let at = parent.get_node(o.parent_ni()).unwrap();
                assert!((o.get_node(0).unwrap() - at).length() < 1e-9);
            }
        }
    }

    #[test]
    fn errors_surface_to_the_driver() {
        let mut plant = Organism::new(1);
        assert_eq!(plant.simulate(1.0), Err(OrganError::MissingSeed));
        plant.initialize(DVec3::ZERO).unwrap();
        assert_eq!(plant.simulate(-1.0), Err(OrganError::InvalidTimeStep(-1.0)));
        assert_eq!(
            plant.add_base_organ(OrganType::Root, 7, DVec3::Z, 0.0),
            Err(OrganError::UnknownType {
                organ_type: OrganType::Root,
                subtype: 7
            })
        );
        assert!(plant.get_organs(None, false).is_empty());
        plant.simulate(1.0).unwrap();
        assert_eq!(plant.get_organs(Some(OrganType::Seed), false).len(), 1);
    }

    #[test]
    fn phytomer_counters_are_symmetric() {
        let mut ctx = GrowthContext::new(0);
        assert_eq!(ctx.leaf_phytomer_id(4), 0);
        ctx.add_leaf_phytomer_id(4);
        ctx.add_leaf_phytomer_id(4);
        assert_eq!(ctx.leaf_phytomer_id(4), 2);
        ctx.minus_phytomer_id(4);
        assert_eq!(ctx.leaf_phytomer_id(4), 1);
        assert_eq!(ctx.leaf_phytomer_id(5), 0);
        ctx.minus_phytomer_id(5);
        assert_eq!(ctx.leaf_phytomer_id(5), 0);
    }

    #[test]
    fn random_draws_are_reproducible() {
        let mut a = GrowthContext::new(11);
        let mut b = GrowthContext::new(11);
        let draws: Vec<f64> = (0..2000).map(|_| a.randn()).collect();
        assert!(draws.iter().zip((0..2000).map(|_| b.randn())).all(|(x, y)| *x == y));
        let mean = draws.iter().sum::<f64>() / draws.len() as f64;
        let var = draws.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / draws.len() as f64;
        assert!(mean.abs() < 0.1, "mean {mean}");
        assert!((var - 1.0).abs() < 0.15, "variance {var}");
        assert!((0..100).map(|_| a.rand()).all(|u| (0.0..1.0).contains(&u)));
    }

    #[test]
    fn generic_organs_from_the_registry() {
        let mut plant = Organism::new(2);
        plant.set_parameter(OrganRandomParameter {
            name: "bud".to_string(),
            subtype: 3,
            ..OrganRandomParameter::default()
        });
        plant.initialize(DVec3::ZERO).unwrap();
        let id = plant
            .add_base_organ(OrganType::Organ, 3, DVec3::Z, 0.5)
            .unwrap()
            .unwrap();
        plant.simulate(0.25).unwrap();
        assert_eq!(plant.organ(id).unwrap().get_number_of_nodes(), 0);
        plant.simulate(1.0).unwrap();
        let bud = plant.organ(id).unwrap();
        assert!((bud.age() - 0.75).abs() < 1e-12);
        assert!((bud.creation_time() - 0.5).abs() < 1e-12);
        assert_eq!(bud.get_number_of_nodes(), 1);
        assert_eq!(bud.get_node_id(0).unwrap(), plant.seed().unwrap().get_node_id(0).unwrap());
        assert_eq!(plant.parent(id).map(|o| o.organ_type()), Some(OrganType::Seed));
        assert_eq!(bud.calc_length(1.0), Err(OrganError::NotImplemented("calc_length")));
    }
}

//! Plant parameter files.
//!
//! A plant is described by a JSON document holding the random seed, the
//! seed position, the organ type parameters and the base organs:
//!
//! ```json
//! {
//!   "seed": 7,
//!   "parameters": [
//!     { "kind": "root", "base": { "subtype": 1, "dx": 0.5 }, "lmax": 20.0,
//!       "successors": [ { "organ_type": "root", "subtype": 2, "probability": 1.0 } ] },
//!     { "kind": "root", "base": { "subtype": 2 }, "lmax": 4.0, "ln": 0.0 }
//!   ],
//!   "base_organs": [ { "organ_type": "root", "subtype": 1, "heading": [0, 0, -1] } ]
//! }
//! ```
//!
//! Omitted parameter fields take their defaults.

use crate::error::ConfigError;
use crate::organism::Organism;
use crate::params::{
    LeafRandomParameter, MAX_BRANCH_POINTS, OrganRandomParameter, RootRandomParameter, Successor,
    TypeParameter,
};
use crate::types::OrganType;
use glam::DVec3;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Root configuration of a plant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlantConfig {
    /// Seed of the random source.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Position of the seed node [cm].
    #[serde(default = "default_seed_position")]
    pub seed_position: [f64; 3],
    pub parameters: Vec<ParameterEntry>,
    #[serde(default)]
    pub base_organs: Vec<BaseOrgan>,
}

/// Type parameter of one organ type and subtype.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParameterEntry {
    Organ(OrganRandomParameter),
    Root(RootRandomParameter),
    Leaf(LeafRandomParameter),
}

/// An organ attached to the seed at start.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BaseOrgan {
    pub organ_type: OrganType,
    pub subtype: usize,
    pub heading: [f64; 3],
    /// Emergence delay [day].
    #[serde(default)]
    pub delay: f64,
}

fn default_seed() -> u64 {
    1
}

fn default_seed_position() -> [f64; 3] {
    [0.0, 0.0, -3.0]
}

impl ParameterEntry {
    fn base(&self) -> &OrganRandomParameter {
        match self {
            ParameterEntry::Organ(p) => p,
            ParameterEntry::Root(p) => &p.base,
            ParameterEntry::Leaf(p) => &p.base,
        }
    }

    /// Named zone lengths and their deviations [cm], for the organ kinds that branch.
    fn zone_lengths(&self) -> Vec<(&'static str, f64)> {
        let v = |lb, lbs, la, las, ln, lns, lmax, lmaxs| {
            vec![
                ("lb", lb),
                ("lbs", lbs),
                ("la", la),
                ("las", las),
                ("ln", ln),
                ("lns", lns),
                ("lmax", lmax),
                ("lmaxs", lmaxs),
            ]
        };
        match self {
            ParameterEntry::Organ(_) => Vec::new(),
            ParameterEntry::Root(p) => v(p.lb, p.lbs, p.la, p.las, p.ln, p.lns, p.lmax, p.lmaxs),
            ParameterEntry::Leaf(p) => {
                let mut zones = v(p.lb, p.lbs, p.la, p.las, p.ln, p.lns, p.lmax, p.lmaxs);
                zones.extend(p.lmax_phytomer.iter().map(|&l| ("lmax_phytomer", l)));
                zones
            }
        }
    }

    fn successors(&self) -> &[Successor] {
        match self {
            ParameterEntry::Organ(_) => &[],
            ParameterEntry::Root(p) => &p.successors,
            ParameterEntry::Leaf(p) => &p.successors,
        }
    }

    /// A partially given `base` falls back to the generic organ defaults;
    /// the entry kind fixes its organ type.
    fn normalize(&mut self) {
        let (base, ot) = match self {
            ParameterEntry::Organ(_) => return,
            ParameterEntry::Root(p) => (&mut p.base, OrganType::Root),
            ParameterEntry::Leaf(p) => (&mut p.base, OrganType::Leaf),
        };
        if base.organ_type == OrganType::Organ {
            base.organ_type = ot;
            if base.name == OrganRandomParameter::default().name {
                base.name = ot.name().to_string();
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let base = self.base();
        let invalid = |field, reason| ConfigError::Invalid {
            name: base.name.clone(),
            field,
            reason,
        };
        let expected = match self {
            ParameterEntry::Organ(p) => p.organ_type,
            ParameterEntry::Root(_) => OrganType::Root,
            ParameterEntry::Leaf(_) => OrganType::Leaf,
        };
        if base.organ_type != expected {
            return Err(invalid("organ_type", "does not match the parameter kind"));
        }
        if base.dx.is_nan() || base.dx <= 0.0 {
            return Err(invalid("dx", "must be positive"));
        }
        if base.dx_min < 0.0 || base.dx_min > base.dx {
            return Err(invalid("dx_min", "must lie in [0, dx]"));
        }
        let zones = self.zone_lengths();
        if let Some(&(field, _)) = zones.iter().find(|(_, l)| !l.is_finite() || *l < 0.0) {
            return Err(invalid(field, "must be finite and not negative"));
        }
        let length = |name: &str| zones.iter().find(|(f, _)| *f == name).map_or(0.0, |&(_, l)| l);
        let ln = length("ln");
        if ln > 0.0 {
            if ln < base.dx_min {
                return Err(invalid("ln", "must be zero or at least dx_min"));
            }
            let longest = zones
                .iter()
                .filter(|(f, _)| f.starts_with("lmax") && *f != "lmaxs")
                .map(|&(_, l)| l)
                .fold(0.0, f64::max);
            if (longest - length("lb") - length("la")) / ln > MAX_BRANCH_POINTS as f64 {
                return Err(invalid("ln", "gives too many branch points"));
            }
        }
        let successors = self.successors();
        if successors.iter().any(|s| !(0.0..=1.0).contains(&s.probability)) {
            return Err(invalid("successors", "probabilities must lie in [0, 1]"));
        }
        if successors.iter().map(|s| s.probability).sum::<f64>() > 1.0 + 1e-9 {
            return Err(invalid("successors", "probabilities sum to more than 1"));
        }
        Ok(())
    }
}

impl From<ParameterEntry> for TypeParameter {
    fn from(p: ParameterEntry) -> Self {
        match p {
            ParameterEntry::Organ(p) => p.into(),
            ParameterEntry::Root(p) => p.into(),
            ParameterEntry::Leaf(p) => p.into(),
        }
    }
}

impl PlantConfig {
    /// Parses and validates a JSON document.
    pub fn from_json(s: &str) -> Result<Self, ConfigError> {
        let mut config: PlantConfig = serde_json::from_str(s)?;
        for p in config.parameters.iter_mut() {
            p.normalize();
        }
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a JSON file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for p in &self.parameters {
            p.validate()?;
        }
        Ok(())
    }
}

impl Organism {
    /// Builds an initialized organism from a parameter file.
    pub fn from_config(config: &PlantConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut plant = Organism::new(config.seed);
        for p in &config.parameters {
            plant.set_parameter(p.clone());
        }
        plant.initialize(DVec3::from_array(config.seed_position))?;
        for b in &config.base_organs {
            let heading = DVec3::from_array(b.heading);
            let added = plant.add_base_organ(b.organ_type, b.subtype, heading, b.delay)?;
            if added.is_none() {
                tracing::warn!(
                    organ_type = %b.organ_type,
                    subtype = b.subtype,
                    "base organ not created"
                );
            }
        }
        tracing::debug!(
            parameters = config.parameters.len(),
            base_organs = config.base_organs.len(),
            "organism configured"
        );
        Ok(plant)
    }

    /// Parses a JSON document and builds the organism.
    pub fn from_json(s: &str) -> Result<Self, ConfigError> {
        Self::from_config(&PlantConfig::from_json(s)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HERB: &str = r#"{
        "seed": 7,
        "parameters": [
            { "kind": "root", "base": { "subtype": 1, "dx": 0.5 }, "lb": 1.0, "la": 2.0, "ln": 1.0,
              "lmax": 12.0, "growth": "linear",
              "tropism": { "kind": "gravitropism", "n": 1.0, "sigma": 0.2 },
              "successors": [ { "organ_type": "root", "subtype": 2, "probability": 1.0 } ] },
            { "kind": "root", "base": { "subtype": 2 }, "lmax": 3.0, "ln": 0.0 },
            { "kind": "leaf", "base": { "subtype": 1 }, "width_blade": 1.5,
              "lmax_phytomer": [3.0, 4.0] }
        ],
        "base_organs": [
            { "organ_type": "root", "subtype": 1, "heading": [0.0, 0.0, -1.0] },
            { "organ_type": "leaf", "subtype": 1, "heading": [1.0, 0.0, 0.0], "delay": 2.0 }
        ]
    }"#;

    #[test]
    fn parameters_keep_defaults() {
        let config = PlantConfig::from_json(HERB).unwrap();
        assert_eq!(config.seed, 7);
        assert_eq!(config.seed_position, [0.0, 0.0, -3.0]);
        let ParameterEntry::Root(main) = &config.parameters[0] else {
            panic!("expected a root parameter");
        };
        assert_eq!(main.base.dx, 0.5);
        assert_eq!(main.base.organ_type, OrganType::Root);
        assert_eq!(main.base.name, "root");
        assert_eq!(main.base.dx_min, 1e-6);
        assert_eq!(main.r, 1.0);
        assert_eq!(main.successors.len(), 1);
        let ParameterEntry::Leaf(leaf) = &config.parameters[2] else {
            panic!("expected a leaf parameter");
        };
        assert_eq!(leaf.base.organ_type, OrganType::Leaf);
        assert_eq!(leaf.lmax_of(5), 4.0);
    }

    #[test]
    fn organism_grows_from_config() {
        let mut plant = Organism::from_json(HERB).unwrap();
        assert_eq!(plant.seed().unwrap().get_number_of_children(), 2);
        for _ in 0..8 {
            plant.simulate(1.0).unwrap();
        }
        assert!(plant.get_organs(Some(OrganType::Root), false).len() > 1);
        assert_eq!(plant.get_organs(Some(OrganType::Leaf), false).len(), 1);
        assert_eq!(plant.leaf_phytomer_id(1), 1);
    }

    #[test]
    fn round_trips_through_json() {
        let config = PlantConfig::from_json(HERB).unwrap();
        let again = PlantConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(config, again);
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        let bad_dx = r#"{ "parameters": [ { "kind": "root", "base": { "dx": 0.0 } } ] }"#;
        assert!(matches!(
            PlantConfig::from_json(bad_dx),
            Err(ConfigError::Invalid { field: "dx", .. })
        ));
        let bad_sum = r#"{ "parameters": [ { "kind": "leaf", "successors": [
            { "organ_type": "leaf", "subtype": 2, "probability": 0.7 },
            { "organ_type": "root", "subtype": 1, "probability": 0.7 } ] } ] }"#;
        assert!(matches!(
            PlantConfig::from_json(bad_sum),
            Err(ConfigError::Invalid { field: "successors", .. })
        ));
        let mismatch =
            r#"{ "parameters": [ { "kind": "root", "base": { "organ_type": "leaf" } } ] }"#;
        assert!(matches!(
            PlantConfig::from_json(mismatch),
            Err(ConfigError::Invalid { field: "organ_type", .. })
        ));
        let tiny_ln = r#"{ "parameters": [ { "kind": "root", "ln": 1e-12, "lmax": 30.0 } ] }"#;
        assert!(matches!(
            PlantConfig::from_json(tiny_ln),
            Err(ConfigError::Invalid { field: "ln", .. })
        ));
        let dense = r#"{ "parameters": [ { "kind": "root", "ln": 0.001, "lmax": 1000.0 } ] }"#;
        assert!(matches!(
            Organism::from_json(dense),
            Err(ConfigError::Invalid { field: "ln", .. })
        ));
        let negative = r#"{ "parameters": [ { "kind": "leaf", "lb": -1.0 } ] }"#;
        assert!(matches!(
            PlantConfig::from_json(negative),
            Err(ConfigError::Invalid { field: "lb", .. })
        ));
        let phytomer = r#"{ "parameters": [ { "kind": "leaf", "lmax_phytomer": [3.0, -2.0] } ] }"#;
        assert!(matches!(
            PlantConfig::from_json(phytomer),
            Err(ConfigError::Invalid { field: "lmax_phytomer", .. })
        ));
        assert!(matches!(PlantConfig::from_json("{"), Err(ConfigError::Json(_))));
        assert!(matches!(
            PlantConfig::load(Path::new("/nonexistent/plant.json")),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn unknown_base_organ_type_is_an_error() {
        let s = r#"{ "parameters": [],
            "base_organs": [ { "organ_type": "root", "subtype": 1, "heading": [0, 0, -1] } ] }"#;
        assert!(matches!(Organism::from_json(s), Err(ConfigError::Organ(_))));
    }
}

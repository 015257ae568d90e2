use serde::{Deserialize, Serialize};
use std::fmt;

/// Global identifier of a node in an [`crate::organism::Organism`].
///
/// Issued by [`crate::organism::GrowthContext::next_node_id`] and unique
/// across the whole organism. An organ's first node reuses the id of the
/// parent node it is attached to.
pub type NodeId = usize;

/// Unique identifier of an [`crate::organ::Organ`] within its organism.
pub type OrganId = usize;

/// The kind of plant organ, used for filtering and for parameter lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrganType {
    Organ,
    Seed,
    Root,
    Stem,
    Leaf,
}

impl OrganType {
    /// Numeric code of the organ type (organ 0, seed 1, root 2, stem 3, leaf 4).
    pub fn index(self) -> usize {
        match self {
            OrganType::Organ => 0,
            OrganType::Seed => 1,
            OrganType::Root => 2,
            OrganType::Stem => 3,
            OrganType::Leaf => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            OrganType::Organ => "organ",
            OrganType::Seed => "seed",
            OrganType::Root => "root",
            OrganType::Stem => "stem",
            OrganType::Leaf => "leaf",
        }
    }
}

impl fmt::Display for OrganType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

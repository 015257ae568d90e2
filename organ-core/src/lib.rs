//! Growth and branching of plant organs.
//!
//! Organs (roots, leaves, generic organs) are 3-D polylines that grow in
//! length along an analytical growth law, discretize that length into
//! nodes and emit laterals at their branch points. The organs of a plant
//! form a tree owned by its seed.
//!
//! Main components:
//! - [`organ`]: the organ tree, shared lifecycle and node management.
//! - [`root`]: roots with absolute geometry, tropism-driven headings.
//! - [`leaf`]: leaves with relative geometry, lamina area and volume.
//! - [`organism`]: the growth context and the simulation driver.
//! - [`params`]: organ type parameters and their per-organ realizations.
//! - [`growth`]: analytical growth laws.
//! - [`tropism`]: random heading perturbation biased by tropisms.
//! - [`geometry`]: orthonormal frames and rotations.
//! - [`config`]: JSON plant parameter files.
//! - [`error`]: error types.
//! - [`types`]: shared type aliases and IDs.

pub mod config;
pub mod error;
pub mod geometry;
pub mod growth;
pub mod leaf;
pub mod organ;
pub mod organism;
pub mod params;
pub mod root;
pub mod tropism;
pub mod types;

pub use error::{ConfigError, OrganError};
pub use organ::{Organ, OrganKind};
pub use organism::{GrowthContext, Organism};
pub use types::{NodeId, OrganId, OrganType};

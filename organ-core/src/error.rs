use crate::types::{OrganId, OrganType};
use thiserror::Error;

/// Errors raised by the growth engine.
///
/// `NotImplemented` and `OutOfRange` are contract violations and are
/// propagated up to the driver unrecovered. Degenerate growth (zero length
/// increments, missing branch points) is never reported through this type.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum OrganError {
    /// An abstract operation was called on an organ kind that does not provide it.
    #[error("{0}() not implemented for this organ kind")]
    NotImplemented(&'static str),

    #[error("{what} index {index} out of range (length {len})")]
    OutOfRange {
        what: &'static str,
        index: usize,
        len: usize,
    },

    #[error("no parameters registered for {organ_type} subtype {subtype}")]
    UnknownType { organ_type: OrganType, subtype: usize },

    #[error("unknown parameter {0:?}")]
    UnknownParameter(String),

    #[error("invalid time step {0}")]
    InvalidTimeStep(f64),

    #[error("organ {0} not found")]
    OrganNotFound(OrganId),

    #[error("organism has not been initialized with a seed")]
    MissingSeed,
}

/// Errors raised while loading parameter files.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read parameter file: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed parameter file: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Organ(#[from] OrganError),

    #[error("invalid parameter {field} for {name}: {reason}")]
    Invalid {
        name: String,
        field: &'static str,
        reason: &'static str,
    },
}

// tandem_core/src/error.rs

//! Error taxonomy for the controller core.
//!
//! * [`ConfigurationError`] is structural and fatal: it is raised while the
//!   controller is being assembled and never mid-run.
//! * [`NumericDegeneracy`] is routine near singular poses. The control law
//!   catches it and substitutes a safe fallback; it only escapes from
//!   low-level helpers.
//! * [`ControlError::ShapeMismatch`] means the simulator publishes tensors
//!   that disagree with the scene topology. It is an integration bug.

use thiserror::Error;

/// An invalid or incomplete controller or scene description.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("unknown controller mode '{0}'")]
    UnknownMode(String),

    #[error("controller mode '{mode}' requires gain '{field}'")]
    MissingGain {
        mode: &'static str,
        field: &'static str,
    },

    #[error("gain '{field}' must have {expected} entries, got {actual}")]
    GainLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("axis selector '{field}' entry {axis} must be 0 or 1, got {value}")]
    NonBinaryAxis {
        field: &'static str,
        axis: usize,
        value: f64,
    },

    #[error("axis {axis} is selected for both motion and force control")]
    OverlappingAxes { axis: usize },

    #[error("torque limit must be positive and finite, got {0}")]
    InvalidTorqueLimit(f64),

    #[error("actor '{0}' not found in scene topology")]
    UnknownActor(String),

    #[error("body '{body}' not found on actor '{actor}'")]
    UnknownBody { actor: String, body: String },

    #[error("body '{body}' on actor '{actor}' is the fixed base and has no Jacobian")]
    BaseBodyHasNoJacobian { actor: String, body: String },

    #[error("actor '{actor}' has {actual} DOFs but {expected} are required")]
    DofCount {
        actor: String,
        expected: usize,
        actual: usize,
    },

    #[error("actor '{actor}' has {expected} drive DOFs but the gains cover {actual}")]
    DriveGainCount {
        actor: String,
        expected: usize,
        actual: usize,
    },

    #[error("command batch mixes position targets and torques")]
    MixedCommandKinds,
}

/// A numerically degenerate operation (singular matrix, zero-length axis).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("numeric degeneracy in {context}")]
pub struct NumericDegeneracy {
    pub context: &'static str,
}

/// Top-level error for every fallible core operation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ControlError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("tensor '{tensor}' has shape {actual:?}, expected {expected:?}")]
    ShapeMismatch {
        tensor: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error(transparent)]
    NumericDegeneracy(#[from] NumericDegeneracy),

    #[error("simulator rejected request: {0}")]
    Simulator(String),
}

pub type ControlResult<T> = Result<T, ControlError>;

// tandem_core/src/prelude.rs

// --- Simulator Contract (what an engine integration implements) ---
pub use crate::simulator::{
    DofDriveProperties, DriveMode, SimSnapshot, SimulationBackend, SnapshotShapes, Tensor,
};

// --- Scene Description & Frames ---
pub use crate::frames::layout::{
    ActorDescription, ArmBodyNames, ArmDescription, ArmLayout, FrameTable, SceneTopology,
};
pub use crate::frames::{ArmBody, RigidBodyFrame};
pub use crate::kinematics::{ArmState, KinematicStateExtractor};

// --- Controller Configuration ---
pub use crate::control::config::{
    AxisRole, ControlMode, ControlModeKind, ControllerConfig, JacobianType, JointGains, TaskGains,
};
pub use crate::control::ik::IkMethod;
pub use crate::control::spec::{parse_controller_spec, CommonSettings, ControllerSpec, GainBundle};

// --- Control Law & Dispatch ---
pub use crate::actions::{target_from_action, ActionScales, ACTIONS_PER_ARM};
pub use crate::control::drive::configure_arm_drives;
pub use crate::control::law::{compute_control_signals, ArmCommand, ControlTarget};
pub use crate::dispatch::CommandDispatcher;

// --- Errors & Shared Types ---
pub use crate::error::{ConfigurationError, ControlError, ControlResult, NumericDegeneracy};
pub use crate::types::{Jacobian, JointVector, MassMatrix, Twist, Wrench};

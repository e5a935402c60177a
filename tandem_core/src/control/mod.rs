// tandem_core/src/control/mod.rs

pub mod config;
pub mod drive;
pub mod ik;
pub mod law;
pub mod spec;

pub use config::{
    AxisRole, ControlMode, ControlModeKind, ControllerConfig, ForceControl, GainSpace,
    JacobianType, JointGains, MotorBackend, TaskGains,
};
pub use drive::configure_arm_drives;
pub use ik::IkMethod;
pub use law::{compute_control_signals, ArmCommand, ControlTarget};
pub use spec::{parse_controller_spec, CommonSettings, ControllerSpec, GainBundle};

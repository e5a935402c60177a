// tandem_core/src/control/config.rs

//! The immutable controller configuration.
//!
//! [`ControlMode`] is a sum type over the eight supported modes. Each variant
//! carries only the gains it uses, so "not applicable" is a missing field
//! rather than a zero. Motion and force axes share a single
//! `[AxisRole; 6]` array, which makes an axis that is both motion- and
//! force-controlled unrepresentable.

use std::fmt;
use std::str::FromStr;

use nalgebra::Vector6;
use serde::{Deserialize, Serialize};

use super::ik::IkMethod;
use crate::error::ConfigurationError;
use crate::types::{JointVector, DEFAULT_TORQUE_LIMIT, TASK_DIM};

// =========================================================================
// == Mode Names ==
// =========================================================================

/// The name of a control mode, as it appears in configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlModeKind {
    GymDefault,
    JointSpaceIk,
    JointSpaceId,
    TaskSpaceImpedance,
    OperationalSpaceMotion,
    OpenLoopForce,
    ClosedLoopForce,
    HybridForceMotion,
}

impl ControlModeKind {
    pub const ALL: [ControlModeKind; 8] = [
        ControlModeKind::GymDefault,
        ControlModeKind::JointSpaceIk,
        ControlModeKind::JointSpaceId,
        ControlModeKind::TaskSpaceImpedance,
        ControlModeKind::OperationalSpaceMotion,
        ControlModeKind::OpenLoopForce,
        ControlModeKind::ClosedLoopForce,
        ControlModeKind::HybridForceMotion,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ControlModeKind::GymDefault => "gym_default",
            ControlModeKind::JointSpaceIk => "joint_space_ik",
            ControlModeKind::JointSpaceId => "joint_space_id",
            ControlModeKind::TaskSpaceImpedance => "task_space_impedance",
            ControlModeKind::OperationalSpaceMotion => "operational_space_motion",
            ControlModeKind::OpenLoopForce => "open_loop_force",
            ControlModeKind::ClosedLoopForce => "closed_loop_force",
            ControlModeKind::HybridForceMotion => "hybrid_force_motion",
        }
    }
}

impl fmt::Display for ControlModeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ControlModeKind {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ControlModeKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| ConfigurationError::UnknownMode(s.to_string()))
    }
}

// =========================================================================
// == Classification ==
// =========================================================================

/// Who closes the joint-level loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotorBackend {
    /// The engine's position-drive PD servo tracks joint targets.
    NativePd,
    /// Joint torques are computed here and applied in effort mode.
    Manual,
}

/// Where the proportional/derivative gains act.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GainSpace {
    Joint,
    Task,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForceControl {
    /// The target wrench is applied as a feed-forward term.
    OpenLoop,
    /// The target wrench plus a proportional correction on the sensed wrench.
    ClosedLoop,
}

/// How the orientation error and Jacobian are expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JacobianType {
    #[default]
    Geometric,
    /// Angular rows act on rotation-vector coordinates.
    Analytic,
}

/// The role of one task-space axis (x, y, z, rx, ry, rz).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AxisRole {
    Motion,
    Force,
    #[default]
    Free,
}

// =========================================================================
// == Gains ==
// =========================================================================

/// Per-joint PD gains.
#[derive(Debug, Clone, PartialEq)]
pub struct JointGains {
    pub kp: JointVector,
    pub kd: JointVector,
}

impl JointGains {
    pub fn len(&self) -> usize {
        self.kp.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kp.is_empty()
    }
}

/// Per-axis task-space PD gains.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaskGains {
    pub kp: Vector6<f64>,
    pub kd: Vector6<f64>,
}

// =========================================================================
// == Modes ==
// =========================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum ControlMode {
    /// Engine PD on joint targets obtained from one IK step.
    GymDefault {
        joint_gains: JointGains,
        ik_method: IkMethod,
    },
    /// Joint PD on an IK step, applied as torques.
    JointSpaceIk {
        joint_gains: JointGains,
        ik_method: IkMethod,
    },
    /// Joint PD on an IK step, premultiplied by the arm mass matrix.
    JointSpaceId {
        joint_gains: JointGains,
        ik_method: IkMethod,
    },
    /// Task-space PD mapped through `J^T`.
    TaskSpaceImpedance {
        task_gains: TaskGains,
        axes: [AxisRole; TASK_DIM],
    },
    /// Task-space PD shaped by the task-space inertia.
    OperationalSpaceMotion {
        task_gains: TaskGains,
        axes: [AxisRole; TASK_DIM],
    },
    OpenLoopForce {
        axes: [AxisRole; TASK_DIM],
    },
    ClosedLoopForce {
        wrench_gains: Vector6<f64>,
        axes: [AxisRole; TASK_DIM],
    },
    /// Inertia-shaped motion on some axes, closed-loop force on the others.
    HybridForceMotion {
        task_gains: TaskGains,
        wrench_gains: Vector6<f64>,
        axes: [AxisRole; TASK_DIM],
    },
}

impl ControlMode {
    pub fn kind(&self) -> ControlModeKind {
        match self {
            ControlMode::GymDefault { .. } => ControlModeKind::GymDefault,
            ControlMode::JointSpaceIk { .. } => ControlModeKind::JointSpaceIk,
            ControlMode::JointSpaceId { .. } => ControlModeKind::JointSpaceId,
            ControlMode::TaskSpaceImpedance { .. } => ControlModeKind::TaskSpaceImpedance,
            ControlMode::OperationalSpaceMotion { .. } => ControlModeKind::OperationalSpaceMotion,
            ControlMode::OpenLoopForce { .. } => ControlModeKind::OpenLoopForce,
            ControlMode::ClosedLoopForce { .. } => ControlModeKind::ClosedLoopForce,
            ControlMode::HybridForceMotion { .. } => ControlModeKind::HybridForceMotion,
        }
    }
}

// =========================================================================
// == Configuration ==
// =========================================================================

/// A fully populated, immutable controller configuration. Built once per run
/// by [`super::spec::parse_controller_spec`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "bevy", derive(bevy_ecs::prelude::Resource))]
pub struct ControllerConfig {
    pub mode: ControlMode,
    pub jacobian_type: JacobianType,
    pub gripper_gains: JointGains,
    /// Joint damping projected into the null space of the task Jacobian.
    /// Only used by the task-space modes.
    pub null_space_damping: Option<f64>,
    /// Every torque is clamped to `[-limit, limit]`.
    pub torque_limit: f64,
}

impl ControllerConfig {
    pub fn new(mode: ControlMode, gripper_gains: JointGains) -> Self {
        Self {
            mode,
            jacobian_type: JacobianType::default(),
            gripper_gains,
            null_space_damping: None,
            torque_limit: DEFAULT_TORQUE_LIMIT,
        }
    }

    pub fn kind(&self) -> ControlModeKind {
        self.mode.kind()
    }

    pub fn backend(&self) -> MotorBackend {
        match self.mode {
            ControlMode::GymDefault { .. } => MotorBackend::NativePd,
            _ => MotorBackend::Manual,
        }
    }

    pub fn gain_space(&self) -> GainSpace {
        match self.mode {
            ControlMode::GymDefault { .. }
            | ControlMode::JointSpaceIk { .. }
            | ControlMode::JointSpaceId { .. } => GainSpace::Joint,
            _ => GainSpace::Task,
        }
    }

    /// `None` where inertial compensation has no meaning for the mode.
    pub fn inertial_compensation(&self) -> Option<bool> {
        match self.mode {
            ControlMode::JointSpaceIk { .. } | ControlMode::TaskSpaceImpedance { .. } => {
                Some(false)
            }
            ControlMode::JointSpaceId { .. }
            | ControlMode::OperationalSpaceMotion { .. }
            | ControlMode::HybridForceMotion { .. } => Some(true),
            ControlMode::GymDefault { .. }
            | ControlMode::OpenLoopForce { .. }
            | ControlMode::ClosedLoopForce { .. } => None,
        }
    }

    /// `None` when the mode does no force control.
    pub fn force_control(&self) -> Option<ForceControl> {
        match self.mode {
            ControlMode::OpenLoopForce { .. } => Some(ForceControl::OpenLoop),
            ControlMode::ClosedLoopForce { .. } | ControlMode::HybridForceMotion { .. } => {
                Some(ForceControl::ClosedLoop)
            }
            _ => None,
        }
    }

    /// Per-axis roles. Joint-space modes have no task axes.
    pub fn axis_roles(&self) -> Option<&[AxisRole; TASK_DIM]> {
        match &self.mode {
            ControlMode::TaskSpaceImpedance { axes, .. }
            | ControlMode::OperationalSpaceMotion { axes, .. }
            | ControlMode::OpenLoopForce { axes }
            | ControlMode::ClosedLoopForce { axes, .. }
            | ControlMode::HybridForceMotion { axes, .. } => Some(axes),
            _ => None,
        }
    }

    /// 1.0 on motion-controlled axes, 0.0 elsewhere.
    pub fn motion_mask(&self) -> Vector6<f64> {
        self.mask_for(AxisRole::Motion)
    }

    /// 1.0 on force-controlled axes, 0.0 elsewhere.
    pub fn force_mask(&self) -> Vector6<f64> {
        self.mask_for(AxisRole::Force)
    }

    fn mask_for(&self, role: AxisRole) -> Vector6<f64> {
        match self.axis_roles() {
            Some(axes) => Vector6::from_fn(|i, _| if axes[i] == role { 1.0 } else { 0.0 }),
            None => Vector6::zeros(),
        }
    }

    /// Joint gains of the joint-space modes.
    pub fn joint_gains(&self) -> Option<&JointGains> {
        match &self.mode {
            ControlMode::GymDefault { joint_gains, .. }
            | ControlMode::JointSpaceIk { joint_gains, .. }
            | ControlMode::JointSpaceId { joint_gains, .. } => Some(joint_gains),
            _ => None,
        }
    }

    pub fn ik_method(&self) -> Option<IkMethod> {
        match &self.mode {
            ControlMode::GymDefault { ik_method, .. }
            | ControlMode::JointSpaceIk { ik_method, .. }
            | ControlMode::JointSpaceId { ik_method, .. } => Some(*ik_method),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gains(n: usize) -> JointGains {
        JointGains {
            kp: JointVector::from_element(n, 10.0),
            kd: JointVector::from_element(n, 1.0),
        }
    }

    #[test]
    fn test_mode_names_round_trip() {
        for kind in ControlModeKind::ALL {
            assert_eq!(kind.name().parse::<ControlModeKind>(), Ok(kind));
        }
        assert_eq!(
            "impedance".parse::<ControlModeKind>(),
            Err(ConfigurationError::UnknownMode("impedance".into()))
        );
    }

    #[test]
    fn test_classification_of_hybrid_mode() {
        use AxisRole::*;
        let task_gains = TaskGains {
            kp: Vector6::repeat(40.0),
            kd: Vector6::repeat(8.0),
        };
        let config = ControllerConfig::new(
            ControlMode::HybridForceMotion {
                task_gains,
                wrench_gains: Vector6::repeat(0.1),
                axes: [Motion, Motion, Force, Motion, Motion, Motion],
            },
            gains(2),
        );
        assert_eq!(config.backend(), MotorBackend::Manual);
        assert_eq!(config.gain_space(), GainSpace::Task);
        assert_eq!(config.inertial_compensation(), Some(true));
        assert_eq!(config.force_control(), Some(ForceControl::ClosedLoop));
        assert_eq!(config.motion_mask(), Vector6::new(1.0, 1.0, 0.0, 1.0, 1.0, 1.0));
        assert_eq!(config.force_mask(), Vector6::new(0.0, 0.0, 1.0, 0.0, 0.0, 0.0));
        assert!(config.joint_gains().is_none());
    }

    #[test]
    fn test_native_pd_mode_has_no_task_axes() {
        let config = ControllerConfig::new(
            ControlMode::GymDefault {
                joint_gains: gains(7),
                ik_method: IkMethod::Dls,
            },
            gains(2),
        );
        assert_eq!(config.backend(), MotorBackend::NativePd);
        assert_eq!(config.inertial_compensation(), None);
        assert_eq!(config.force_control(), None);
        assert_eq!(config.motion_mask(), Vector6::zeros());
        assert_eq!(config.ik_method(), Some(IkMethod::Dls));
    }
}

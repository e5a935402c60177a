// tandem_core/src/control/spec.rs

//! Declarative controller settings and their validation into a
//! [`ControllerConfig`].
//!
//! The serialized form keeps one gain table per mode next to a shared `all`
//! table, so a configuration file can carry presets for every mode and pick
//! one with `ctrl_type`:
//!
//! ```toml
//! ctrl_type = "operational_space_motion"
//!
//! [all]
//! jacobian_type = "geometric"
//! gripper_prop_gains = [100.0, 100.0]
//! gripper_deriv_gains = [2.0, 2.0]
//!
//! [operational_space_motion]
//! motion_ctrl_axes = [1, 1, 1, 1, 1, 1]
//! task_prop_gains = [40, 40, 40, 40, 40, 40]
//! task_deriv_gains = [8, 8, 8, 8, 8, 8]
//! ```

use nalgebra::Vector6;
use serde::{Deserialize, Serialize};

use super::config::{
    AxisRole, ControlMode, ControlModeKind, ControllerConfig, JacobianType, JointGains, TaskGains,
};
use super::ik::IkMethod;
use crate::error::ConfigurationError;
use crate::types::{JointVector, DEFAULT_TORQUE_LIMIT, TASK_DIM};

/// Settings shared by every mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommonSettings {
    #[serde(default)]
    pub jacobian_type: JacobianType,
    pub gripper_prop_gains: Vec<f64>,
    pub gripper_deriv_gains: Vec<f64>,
    #[serde(default)]
    pub null_space_damping: Option<f64>,
    #[serde(default = "default_torque_limit")]
    pub torque_limit: f64,
}

fn default_torque_limit() -> f64 {
    DEFAULT_TORQUE_LIMIT
}

/// The gains one mode may use. Which fields are required depends on the mode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GainBundle {
    pub ik_method: Option<IkMethod>,
    pub joint_prop_gains: Option<Vec<f64>>,
    pub joint_deriv_gains: Option<Vec<f64>>,
    /// Overrides the shared gripper gains for this mode.
    pub gripper_prop_gains: Option<Vec<f64>>,
    pub gripper_deriv_gains: Option<Vec<f64>>,
    pub motion_ctrl_axes: Option<Vec<f64>>,
    pub task_prop_gains: Option<Vec<f64>>,
    pub task_deriv_gains: Option<Vec<f64>>,
    pub force_ctrl_axes: Option<Vec<f64>>,
    pub wrench_prop_gains: Option<Vec<f64>>,
}

/// A controller section with presets for any subset of modes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControllerSpec {
    pub ctrl_type: String,
    pub all: CommonSettings,
    #[serde(default)]
    pub gym_default: Option<GainBundle>,
    #[serde(default)]
    pub joint_space_ik: Option<GainBundle>,
    #[serde(default)]
    pub joint_space_id: Option<GainBundle>,
    #[serde(default)]
    pub task_space_impedance: Option<GainBundle>,
    #[serde(default)]
    pub operational_space_motion: Option<GainBundle>,
    #[serde(default)]
    pub open_loop_force: Option<GainBundle>,
    #[serde(default)]
    pub closed_loop_force: Option<GainBundle>,
    #[serde(default)]
    pub hybrid_force_motion: Option<GainBundle>,
}

impl ControllerSpec {
    /// The preset stored for `kind`, if any.
    pub fn preset(&self, kind: ControlModeKind) -> Option<&GainBundle> {
        match kind {
            ControlModeKind::GymDefault => self.gym_default.as_ref(),
            ControlModeKind::JointSpaceIk => self.joint_space_ik.as_ref(),
            ControlModeKind::JointSpaceId => self.joint_space_id.as_ref(),
            ControlModeKind::TaskSpaceImpedance => self.task_space_impedance.as_ref(),
            ControlModeKind::OperationalSpaceMotion => self.operational_space_motion.as_ref(),
            ControlModeKind::OpenLoopForce => self.open_loop_force.as_ref(),
            ControlModeKind::ClosedLoopForce => self.closed_loop_force.as_ref(),
            ControlModeKind::HybridForceMotion => self.hybrid_force_motion.as_ref(),
        }
    }

    /// Builds the configuration for the mode named by `ctrl_type`.
    ///
    /// A missing preset table is treated as an empty gain bundle, so the
    /// error names the first gain the mode actually needs.
    pub fn to_config(
        &self,
        num_arm_dofs: usize,
        num_gripper_dofs: usize,
    ) -> Result<ControllerConfig, ConfigurationError> {
        let kind: ControlModeKind = self.ctrl_type.parse()?;
        let empty = GainBundle::default();
        let gains = self.preset(kind).unwrap_or(&empty);
        parse_controller_spec(
            &self.ctrl_type,
            gains,
            &self.all,
            num_arm_dofs,
            num_gripper_dofs,
        )
    }
}

/// Validates a mode name and gain bundle into an immutable configuration.
///
/// Joint gains must cover `num_arm_dofs` and gripper gains `num_gripper_dofs`.
pub fn parse_controller_spec(
    mode_name: &str,
    gains: &GainBundle,
    common: &CommonSettings,
    num_arm_dofs: usize,
    num_gripper_dofs: usize,
) -> Result<ControllerConfig, ConfigurationError> {
    let kind: ControlModeKind = mode_name.parse()?;
    let reader = GainReader {
        mode: kind.name(),
        gains,
    };

    let mode = match kind {
        ControlModeKind::GymDefault => ControlMode::GymDefault {
            joint_gains: reader.joint_gains(num_arm_dofs)?,
            ik_method: reader.ik_method()?,
        },
        ControlModeKind::JointSpaceIk => ControlMode::JointSpaceIk {
            joint_gains: reader.joint_gains(num_arm_dofs)?,
            ik_method: reader.ik_method()?,
        },
        ControlModeKind::JointSpaceId => ControlMode::JointSpaceId {
            joint_gains: reader.joint_gains(num_arm_dofs)?,
            ik_method: reader.ik_method()?,
        },
        ControlModeKind::TaskSpaceImpedance => ControlMode::TaskSpaceImpedance {
            task_gains: reader.task_gains()?,
            axes: axis_roles(Some(reader.motion_axes()?), None)?,
        },
        ControlModeKind::OperationalSpaceMotion => ControlMode::OperationalSpaceMotion {
            task_gains: reader.task_gains()?,
            axes: axis_roles(Some(reader.motion_axes()?), None)?,
        },
        ControlModeKind::OpenLoopForce => ControlMode::OpenLoopForce {
            axes: axis_roles(None, Some(reader.force_axes()?))?,
        },
        ControlModeKind::ClosedLoopForce => ControlMode::ClosedLoopForce {
            wrench_gains: reader.wrench_gains()?,
            axes: axis_roles(None, Some(reader.force_axes()?))?,
        },
        ControlModeKind::HybridForceMotion => ControlMode::HybridForceMotion {
            task_gains: reader.task_gains()?,
            wrench_gains: reader.wrench_gains()?,
            axes: axis_roles(Some(reader.motion_axes()?), Some(reader.force_axes()?))?,
        },
    };

    let gripper_kp = gains
        .gripper_prop_gains
        .as_deref()
        .unwrap_or(&common.gripper_prop_gains);
    let gripper_kd = gains
        .gripper_deriv_gains
        .as_deref()
        .unwrap_or(&common.gripper_deriv_gains);
    let gripper_gains = joint_gains_from(
        "gripper_prop_gains",
        gripper_kp,
        "gripper_deriv_gains",
        gripper_kd,
        num_gripper_dofs,
    )?;

    if !(common.torque_limit.is_finite() && common.torque_limit > 0.0) {
        return Err(ConfigurationError::InvalidTorqueLimit(common.torque_limit));
    }

    Ok(ControllerConfig {
        mode,
        jacobian_type: common.jacobian_type,
        gripper_gains,
        null_space_damping: common.null_space_damping,
        torque_limit: common.torque_limit,
    })
}

/// Reads required fields out of a gain bundle, naming the mode in errors.
struct GainReader<'a> {
    mode: &'static str,
    gains: &'a GainBundle,
}

impl GainReader<'_> {
    fn required<'b>(
        &self,
        field: &'static str,
        value: &'b Option<Vec<f64>>,
    ) -> Result<&'b [f64], ConfigurationError> {
        value
            .as_deref()
            .ok_or(ConfigurationError::MissingGain {
                mode: self.mode,
                field,
            })
    }

    fn ik_method(&self) -> Result<IkMethod, ConfigurationError> {
        self.gains.ik_method.ok_or(ConfigurationError::MissingGain {
            mode: self.mode,
            field: "ik_method",
        })
    }

    fn joint_gains(&self, num_arm_dofs: usize) -> Result<JointGains, ConfigurationError> {
        let kp = self.required("joint_prop_gains", &self.gains.joint_prop_gains)?;
        let kd = self.required("joint_deriv_gains", &self.gains.joint_deriv_gains)?;
        joint_gains_from("joint_prop_gains", kp, "joint_deriv_gains", kd, num_arm_dofs)
    }

    fn task_gains(&self) -> Result<TaskGains, ConfigurationError> {
        Ok(TaskGains {
            kp: self.vector6("task_prop_gains", &self.gains.task_prop_gains)?,
            kd: self.vector6("task_deriv_gains", &self.gains.task_deriv_gains)?,
        })
    }

    fn wrench_gains(&self) -> Result<Vector6<f64>, ConfigurationError> {
        self.vector6("wrench_prop_gains", &self.gains.wrench_prop_gains)
    }

    fn motion_axes(&self) -> Result<[bool; TASK_DIM], ConfigurationError> {
        self.axes("motion_ctrl_axes", &self.gains.motion_ctrl_axes)
    }

    fn force_axes(&self) -> Result<[bool; TASK_DIM], ConfigurationError> {
        self.axes("force_ctrl_axes", &self.gains.force_ctrl_axes)
    }

    fn vector6(
        &self,
        field: &'static str,
        value: &Option<Vec<f64>>,
    ) -> Result<Vector6<f64>, ConfigurationError> {
        let values = self.required(field, value)?;
        check_len(field, values, TASK_DIM)?;
        Ok(Vector6::from_column_slice(values))
    }

    fn axes(
        &self,
        field: &'static str,
        value: &Option<Vec<f64>>,
    ) -> Result<[bool; TASK_DIM], ConfigurationError> {
        let values = self.required(field, value)?;
        check_len(field, values, TASK_DIM)?;
        let mut axes = [false; TASK_DIM];
        for (axis, &value) in values.iter().enumerate() {
            axes[axis] = if value == 1.0 {
                true
            } else if value == 0.0 {
                false
            } else {
                return Err(ConfigurationError::NonBinaryAxis { field, axis, value });
            };
        }
        Ok(axes)
    }
}

fn check_len(
    field: &'static str,
    values: &[f64],
    expected: usize,
) -> Result<(), ConfigurationError> {
    if values.len() == expected {
        Ok(())
    } else {
        Err(ConfigurationError::GainLength {
            field,
            expected,
            actual: values.len(),
        })
    }
}

fn joint_gains_from(
    kp_field: &'static str,
    kp: &[f64],
    kd_field: &'static str,
    kd: &[f64],
    expected: usize,
) -> Result<JointGains, ConfigurationError> {
    check_len(kp_field, kp, expected)?;
    check_len(kd_field, kd, expected)?;
    Ok(JointGains {
        kp: JointVector::from_column_slice(kp),
        kd: JointVector::from_column_slice(kd),
    })
}

/// Merges motion and force selectors into per-axis roles, rejecting overlap.
fn axis_roles(
    motion: Option<[bool; TASK_DIM]>,
    force: Option<[bool; TASK_DIM]>,
) -> Result<[AxisRole; TASK_DIM], ConfigurationError> {
    let motion = motion.unwrap_or_default();
    let force = force.unwrap_or_default();
    let mut roles = [AxisRole::Free; TASK_DIM];
    for axis in 0..TASK_DIM {
        roles[axis] = match (motion[axis], force[axis]) {
            (true, true) => return Err(ConfigurationError::OverlappingAxes { axis }),
            (true, false) => AxisRole::Motion,
            (false, true) => AxisRole::Force,
            (false, false) => AxisRole::Free,
        };
    }
    Ok(roles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::config::{ForceControl, GainSpace, MotorBackend};

    fn common() -> CommonSettings {
        CommonSettings {
            jacobian_type: JacobianType::Geometric,
            gripper_prop_gains: vec![100.0, 100.0],
            gripper_deriv_gains: vec![2.0, 2.0],
            null_space_damping: None,
            torque_limit: DEFAULT_TORQUE_LIMIT,
        }
    }

    /// A bundle carrying every gain any mode could ask for.
    fn full_bundle() -> GainBundle {
        GainBundle {
            ik_method: Some(IkMethod::Dls),
            joint_prop_gains: Some(vec![40.0; 7]),
            joint_deriv_gains: Some(vec![8.0; 7]),
            gripper_prop_gains: None,
            gripper_deriv_gains: None,
            motion_ctrl_axes: Some(vec![1.0, 1.0, 0.0, 1.0, 1.0, 1.0]),
            task_prop_gains: Some(vec![40.0; 6]),
            task_deriv_gains: Some(vec![8.0; 6]),
            force_ctrl_axes: Some(vec![0.0, 0.0, 1.0, 0.0, 0.0, 0.0]),
            wrench_prop_gains: Some(vec![0.1; 6]),
        }
    }

    #[test]
    fn test_every_mode_has_complementary_masks() {
        for kind in ControlModeKind::ALL {
            let config = parse_controller_spec(kind.name(), &full_bundle(), &common(), 7, 2)
                .unwrap_or_else(|e| panic!("{kind} failed: {e}"));
            assert_eq!(config.kind(), kind);
            let motion = config.motion_mask();
            let force = config.force_mask();
            for axis in 0..TASK_DIM {
                assert!(
                    !(motion[axis] == 1.0 && force[axis] == 1.0),
                    "{kind}: axis {axis} is both motion and force"
                );
                assert!(motion[axis] == 0.0 || motion[axis] == 1.0);
                assert!(force[axis] == 0.0 || force[axis] == 1.0);
            }
        }
    }

    #[test]
    fn test_mode_table() {
        let expect =
            |name: &str| parse_controller_spec(name, &full_bundle(), &common(), 7, 2).unwrap();

        let c = expect("gym_default");
        assert_eq!(c.backend(), MotorBackend::NativePd);
        assert_eq!(c.gain_space(), GainSpace::Joint);
        assert_eq!(c.inertial_compensation(), None);
        assert_eq!(c.force_control(), None);

        let c = expect("joint_space_ik");
        assert_eq!((c.backend(), c.gain_space()), (MotorBackend::Manual, GainSpace::Joint));
        assert_eq!(c.inertial_compensation(), Some(false));

        let c = expect("joint_space_id");
        assert_eq!(c.inertial_compensation(), Some(true));

        let c = expect("task_space_impedance");
        assert_eq!(c.gain_space(), GainSpace::Task);
        assert_eq!(c.inertial_compensation(), Some(false));
        assert_eq!(c.force_mask(), Vector6::zeros());

        let c = expect("operational_space_motion");
        assert_eq!(c.inertial_compensation(), Some(true));
        assert_eq!(c.force_control(), None);

        let c = expect("open_loop_force");
        assert_eq!(c.inertial_compensation(), None);
        assert_eq!(c.force_control(), Some(ForceControl::OpenLoop));
        assert_eq!(c.motion_mask(), Vector6::zeros());

        let c = expect("closed_loop_force");
        assert_eq!(c.force_control(), Some(ForceControl::ClosedLoop));

        let c = expect("hybrid_force_motion");
        assert_eq!(c.inertial_compensation(), Some(true));
        assert_eq!(c.force_control(), Some(ForceControl::ClosedLoop));
    }

    #[test]
    fn test_unknown_mode_is_rejected() {
        let err = parse_controller_spec("admittance", &full_bundle(), &common(), 7, 2).unwrap_err();
        assert_eq!(err, ConfigurationError::UnknownMode("admittance".into()));
    }

    #[test]
    fn test_missing_gain_is_named() {
        let mut gains = full_bundle();
        gains.task_deriv_gains = None;
        let err =
            parse_controller_spec("operational_space_motion", &gains, &common(), 7, 2).unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::MissingGain {
                mode: "operational_space_motion",
                field: "task_deriv_gains"
            }
        );

        let mut gains = full_bundle();
        gains.ik_method = None;
        let err = parse_controller_spec("joint_space_ik", &gains, &common(), 7, 2).unwrap_err();
        assert!(matches!(err, ConfigurationError::MissingGain { field: "ik_method", .. }));
    }

    #[test]
    fn test_gains_irrelevant_to_the_mode_are_not_required() {
        let gains = GainBundle {
            force_ctrl_axes: Some(vec![0.0, 0.0, 1.0, 0.0, 0.0, 0.0]),
            ..Default::default()
        };
        let config = parse_controller_spec("open_loop_force", &gains, &common(), 7, 2).unwrap();
        assert_eq!(config.force_mask(), Vector6::new(0.0, 0.0, 1.0, 0.0, 0.0, 0.0));
    }

    #[test]
    fn test_overlapping_axes_are_rejected() {
        let mut gains = full_bundle();
        gains.force_ctrl_axes = Some(vec![1.0, 0.0, 1.0, 0.0, 0.0, 0.0]);
        let err =
            parse_controller_spec("hybrid_force_motion", &gains, &common(), 7, 2).unwrap_err();
        assert_eq!(err, ConfigurationError::OverlappingAxes { axis: 0 });
    }

    #[test]
    fn test_bad_lengths_and_values_are_rejected() {
        let mut gains = full_bundle();
        gains.joint_prop_gains = Some(vec![40.0; 6]);
        let err = parse_controller_spec("joint_space_id", &gains, &common(), 7, 2).unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::GainLength {
                field: "joint_prop_gains",
                expected: 7,
                actual: 6
            }
        );

        let mut gains = full_bundle();
        gains.motion_ctrl_axes = Some(vec![1.0, 0.5, 1.0, 1.0, 1.0, 1.0]);
        let err =
            parse_controller_spec("task_space_impedance", &gains, &common(), 7, 2).unwrap_err();
        assert!(matches!(err, ConfigurationError::NonBinaryAxis { axis: 1, .. }));

        let mut settings = common();
        settings.torque_limit = 0.0;
        let err =
            parse_controller_spec("joint_space_id", &full_bundle(), &settings, 7, 2).unwrap_err();
        assert_eq!(err, ConfigurationError::InvalidTorqueLimit(0.0));
    }

    #[test]
    fn test_mode_specific_gripper_gains_override_shared_ones() {
        let mut gains = full_bundle();
        gains.gripper_prop_gains = Some(vec![500.0, 500.0]);
        gains.gripper_deriv_gains = Some(vec![20.0, 20.0]);
        let config = parse_controller_spec("gym_default", &gains, &common(), 7, 2).unwrap();
        assert_eq!(config.gripper_gains.kp[0], 500.0);
        assert_eq!(config.gripper_gains.kd[1], 20.0);

        let config =
            parse_controller_spec("joint_space_ik", &full_bundle(), &common(), 7, 2).unwrap();
        assert_eq!(config.gripper_gains.kp[0], 100.0);
    }

    #[test]
    fn test_gripper_gains_must_cover_every_gripper_dof() {
        let mut settings = common();
        settings.gripper_prop_gains = vec![100.0];
        let err = parse_controller_spec("task_space_impedance", &full_bundle(), &settings, 7, 2)
            .unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::GainLength {
                field: "gripper_prop_gains",
                expected: 2,
                actual: 1
            }
        );

        let mut gains = full_bundle();
        gains.gripper_deriv_gains = Some(vec![2.0; 3]);
        let err = parse_controller_spec("gym_default", &gains, &common(), 7, 2).unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::GainLength { field: "gripper_deriv_gains", expected: 2, actual: 3 }
        ));

        // A gripperless arm takes empty gripper gains.
        let mut settings = common();
        settings.gripper_prop_gains.clear();
        settings.gripper_deriv_gains.clear();
        let config = parse_controller_spec("joint_space_id", &full_bundle(), &settings, 7, 0)
            .unwrap();
        assert!(config.gripper_gains.is_empty());
    }

    #[test]
    fn test_spec_selects_preset_by_ctrl_type() {
        let spec = ControllerSpec {
            ctrl_type: "task_space_impedance".into(),
            all: common(),
            gym_default: None,
            joint_space_ik: None,
            joint_space_id: None,
            task_space_impedance: Some(GainBundle {
                motion_ctrl_axes: Some(vec![1.0; 6]),
                task_prop_gains: Some(vec![30.0; 6]),
                task_deriv_gains: Some(vec![5.0; 6]),
                ..Default::default()
            }),
            operational_space_motion: None,
            open_loop_force: None,
            closed_loop_force: None,
            hybrid_force_motion: None,
        };
        let config = spec.to_config(7, 2).unwrap();
        assert_eq!(config.kind(), ControlModeKind::TaskSpaceImpedance);
        assert_eq!(config.motion_mask(), Vector6::repeat(1.0));

        let spec = ControllerSpec {
            ctrl_type: "closed_loop_force".into(),
            ..spec
        };
        assert!(matches!(
            spec.to_config(7, 2),
            Err(ConfigurationError::MissingGain { mode: "closed_loop_force", .. })
        ));
    }
}

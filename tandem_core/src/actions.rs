// tandem_core/src/actions.rs

//! Maps a policy's per-arm action vector onto a [`ControlTarget`].
//!
//! Each arm reads 12 actions: position delta (3), rotation delta as an
//! axis-angle vector (3), target force (3) and target torque (3).

use nalgebra::{DVector, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::control::config::ControllerConfig;
use crate::control::law::ControlTarget;
use crate::kinematics::ArmState;
use crate::types::Wrench;
use crate::utils::rotations::quat_from_axis_angle;

pub const ACTIONS_PER_ARM: usize = 12;

/// Per-axis action scaling, applied when an action vector is mapped with
/// scaling enabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionScales {
    pub pos_action_scale: [f64; 3],
    pub rot_action_scale: [f64; 3],
    pub force_action_scale: [f64; 3],
    pub torque_action_scale: [f64; 3],
    /// Rotations at or below `clamp_rot_thresh` radians are dropped.
    pub clamp_rot: bool,
    pub clamp_rot_thresh: f64,
}

impl Default for ActionScales {
    fn default() -> Self {
        Self {
            pos_action_scale: [0.1; 3],
            rot_action_scale: [0.1; 3],
            force_action_scale: [1.0; 3],
            torque_action_scale: [1.0; 3],
            clamp_rot: true,
            clamp_rot_thresh: 1.0e-6,
        }
    }
}

/// Builds the next target from one arm's action slice.
///
/// Position and orientation targets are relative to the current fingertip
/// midpoint. The wrench target only changes when the configured mode does
/// force control; otherwise `previous` keeps its wrench.
pub fn target_from_action(
    state: &ArmState,
    actions: &[f64; ACTIONS_PER_ARM],
    gripper_positions: DVector<f64>,
    previous: &ControlTarget,
    scales: &ActionScales,
    config: &ControllerConfig,
    do_scale: bool,
) -> ControlTarget {
    let scaled = |offset: usize, scale: &[f64; 3]| {
        let raw = Vector3::new(actions[offset], actions[offset + 1], actions[offset + 2]);
        if do_scale {
            raw.component_mul(&Vector3::from(*scale))
        } else {
            raw
        }
    };

    let current = &state.fingertip_midpoint;
    let position = current.position + scaled(0, &scales.pos_action_scale);

    let rotation_vector = scaled(3, &scales.rot_action_scale);
    let rotation = if scales.clamp_rot && rotation_vector.norm() <= scales.clamp_rot_thresh {
        UnitQuaternion::identity()
    } else {
        quat_from_axis_angle(&rotation_vector)
    };
    let orientation = rotation * current.orientation;

    let wrench = if config.force_control().is_some() {
        let force = scaled(6, &scales.force_action_scale);
        let torque = scaled(9, &scales.torque_action_scale);
        Wrench::new(force.x, force.y, force.z, torque.x, torque.y, torque.z)
    } else {
        previous.wrench
    };

    ControlTarget {
        position,
        orientation,
        gripper_positions,
        wrench,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::config::{AxisRole, ControlMode, JointGains, TaskGains};
    use crate::frames::{derive_fingertip_midpoint, RigidBodyFrame};
    use crate::types::Jacobian;
    use approx::assert_abs_diff_eq;
    use nalgebra::{DMatrix, Vector6};

    const F64_EPSILON: f64 = 1e-9;

    fn state() -> ArmState {
        let q = UnitQuaternion::from_euler_angles(3.0, 0.1, -0.4);
        let frame = RigidBodyFrame::at_rest(Vector3::new(0.4, 0.1, 0.3), q);
        let midpoint = derive_fingertip_midpoint(&frame, &frame, &frame, &frame, 0.0);
        let jacobian: Jacobian = DMatrix::identity(6, 7);
        ArmState {
            hand: frame,
            left_finger: frame,
            right_finger: frame,
            fingertip_centered: frame,
            fingertip_midpoint: midpoint,
            hand_jacobian: jacobian.clone(),
            left_finger_jacobian: jacobian.clone(),
            right_finger_jacobian: jacobian.clone(),
            fingertip_midpoint_jacobian: jacobian,
            mass_matrix: DMatrix::identity(7, 7),
            dof_positions: DVector::zeros(9),
            dof_velocities: DVector::zeros(9),
            dof_forces: DVector::zeros(9),
            left_finger_contact_force: Vector3::zeros(),
            right_finger_contact_force: Vector3::zeros(),
            num_arm_dofs: 7,
        }
    }

    fn config(force: bool) -> ControllerConfig {
        let gripper = JointGains {
            kp: DVector::from_element(2, 500.0),
            kd: DVector::from_element(2, 1.0),
        };
        let mode = if force {
            ControlMode::OpenLoopForce {
                axes: [AxisRole::Force; 6],
            }
        } else {
            ControlMode::TaskSpaceImpedance {
                task_gains: TaskGains {
                    kp: Vector6::repeat(40.0),
                    kd: Vector6::repeat(8.0),
                },
                axes: [AxisRole::Motion; 6],
            }
        };
        ControllerConfig::new(mode, gripper)
    }

    #[test]
    fn test_zero_action_keeps_pose() {
        let state = state();
        let previous = ControlTarget::hold(&state);
        let target = target_from_action(
            &state,
            &[0.0; ACTIONS_PER_ARM],
            DVector::from_element(2, 0.04),
            &previous,
            &ActionScales::default(),
            &config(false),
            true,
        );
        assert_abs_diff_eq!(
            target.position,
            state.fingertip_midpoint.position,
            epsilon = F64_EPSILON
        );
        assert_abs_diff_eq!(
            target.orientation.angle_to(&state.fingertip_midpoint.orientation),
            0.0,
            epsilon = F64_EPSILON
        );
    }

    #[test]
    fn test_scaled_position_and_rotation() {
        let state = state();
        let previous = ControlTarget::hold(&state);
        let mut actions = [0.0; ACTIONS_PER_ARM];
        actions[0] = 1.0;
        actions[5] = 1.0;
        let target = target_from_action(
            &state,
            &actions,
            DVector::zeros(2),
            &previous,
            &ActionScales::default(),
            &config(false),
            true,
        );
        let moved = target.position - state.fingertip_midpoint.position;
        assert_abs_diff_eq!(moved, Vector3::new(0.1, 0.0, 0.0), epsilon = F64_EPSILON);
        let delta = target.orientation * state.fingertip_midpoint.orientation.inverse();
        assert_abs_diff_eq!(
            delta.scaled_axis(),
            Vector3::new(0.0, 0.0, 0.1),
            epsilon = F64_EPSILON
        );
    }

    #[test]
    fn test_clamp_threshold_drops_tiny_rotations() {
        let state = state();
        let previous = ControlTarget::hold(&state);
        let mut actions = [0.0; ACTIONS_PER_ARM];
        actions[3] = 1.0e-4;
        let scales = ActionScales {
            clamp_rot_thresh: 1.0e-3,
            ..Default::default()
        };
        let target = target_from_action(
            &state,
            &actions,
            DVector::zeros(2),
            &previous,
            &scales,
            &config(false),
            false,
        );
        assert_eq!(target.orientation, state.fingertip_midpoint.orientation);
    }

    #[test]
    fn test_wrench_only_changes_under_force_control() {
        let state = state();
        let mut previous = ControlTarget::hold(&state);
        previous.wrench = Wrench::new(0.0, 0.0, -1.0, 0.0, 0.0, 0.0);
        let mut actions = [0.0; ACTIONS_PER_ARM];
        actions[6] = 2.0;
        actions[11] = 0.5;

        let motion_only = target_from_action(
            &state,
            &actions,
            DVector::zeros(2),
            &previous,
            &ActionScales::default(),
            &config(false),
            true,
        );
        assert_eq!(motion_only.wrench, previous.wrench);

        let forced = target_from_action(
            &state,
            &actions,
            DVector::zeros(2),
            &previous,
            &ActionScales::default(),
            &config(true),
            true,
        );
        assert_eq!(forced.wrench, Wrench::new(2.0, 0.0, 0.0, 0.0, 0.0, 0.5));
    }
}

// tandem_core/src/control/law.rs

//! The motion/force control law.
//!
//! Everything here is a pure function of `(arm state, target, config)`. The
//! surrounding loop supplies a fresh [`ArmState`] every tick and applies the
//! returned [`ArmCommand`].

use nalgebra::{DMatrix, DVector, UnitQuaternion, Vector3};
use tracing::debug;

use super::config::{
    ControlMode, ControllerConfig, ForceControl, JacobianType, JointGains, TaskGains,
};
use super::ik::{delta_joint_positions, IkMethod};
use crate::kinematics::ArmState;
use crate::types::{Jacobian, JointVector, Twist, Wrench, TASK_DIM};
use crate::utils::linalg::{damped_spd_inverse, pseudo_inverse, spd_inverse};
use crate::utils::rotations::{axis_angle_from_quat, rotation_vector_rate_map, shortest_path};

/// Damping used when `J M^-1 J^T` is too close to singular to invert.
pub const TASK_INERTIA_DAMPING: f64 = 1.0e-2;

// =========================================================================
// == Inputs & Outputs ==
// =========================================================================

/// Desired fingertip-midpoint pose, gripper opening and contact wrench.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlTarget {
    pub position: Vector3<f64>,
    pub orientation: UnitQuaternion<f64>,
    /// One entry per gripper DOF.
    pub gripper_positions: DVector<f64>,
    /// Only read by the force-controlled modes.
    pub wrench: Wrench,
}

impl ControlTarget {
    /// A target that holds the arm where it currently is.
    pub fn hold(state: &ArmState) -> Self {
        Self {
            position: state.fingertip_midpoint.position,
            orientation: state.fingertip_midpoint.orientation,
            gripper_positions: state.gripper_positions().into_owned(),
            wrench: Wrench::zeros(),
        }
    }
}

/// One arm's output for one tick, arm DOFs first, then gripper DOFs.
#[derive(Debug, Clone, PartialEq)]
pub enum ArmCommand {
    /// Setpoints for the engine's position drives.
    PositionTargets(JointVector),
    /// Joint torques for effort-mode drives.
    Torques(JointVector),
}

impl ArmCommand {
    pub fn values(&self) -> &JointVector {
        match self {
            ArmCommand::PositionTargets(v) | ArmCommand::Torques(v) => v,
        }
    }

    pub fn is_torque(&self) -> bool {
        matches!(self, ArmCommand::Torques(_))
    }
}

// =========================================================================
// == Entry Point ==
// =========================================================================

/// Computes one arm's command for one tick.
///
/// The native-PD backend yields joint position targets from a single IK
/// step; the manual backend yields clamped joint torques.
pub fn compute_control_signals(
    state: &ArmState,
    target: &ControlTarget,
    config: &ControllerConfig,
) -> ArmCommand {
    match &config.mode {
        ControlMode::GymDefault { ik_method, .. } => ArmCommand::PositionTargets(
            compute_dof_position_targets(state, target, config.jacobian_type, *ik_method),
        ),
        _ => ArmCommand::Torques(compute_dof_torque(state, target, config)),
    }
}

/// Joint position targets: current arm joints plus one IK step, gripper
/// targets passed through.
pub fn compute_dof_position_targets(
    state: &ArmState,
    target: &ControlTarget,
    jacobian_type: JacobianType,
    ik_method: IkMethod,
) -> JointVector {
    let n = state.num_arm_dofs;
    let (error, jacobian) = pose_error_and_jacobian(state, target, jacobian_type);
    let delta = delta_joint_positions(&jacobian, &error, ik_method);

    let mut targets = DVector::zeros(state.dof_positions.len());
    targets
        .rows_mut(0, n)
        .copy_from(&(state.arm_positions() + delta));
    targets
        .rows_mut(n, state.num_gripper_dofs())
        .copy_from(&target.gripper_positions);
    targets
}

/// Joint torques for the manual backend, clamped to the configured limit.
///
/// The joint-space modes run an IK step through joint PD; every other mode
/// maps a task-space wrench through `J^T`.
pub fn compute_dof_torque(
    state: &ArmState,
    target: &ControlTarget,
    config: &ControllerConfig,
) -> JointVector {
    let n = state.num_arm_dofs;
    let mut torque = DVector::zeros(state.dof_positions.len());

    let arm_torque = match &config.mode {
        ControlMode::GymDefault {
            joint_gains,
            ik_method,
        }
        | ControlMode::JointSpaceIk {
            joint_gains,
            ik_method,
        } => joint_space_torque(state, target, config.jacobian_type, joint_gains, *ik_method),
        ControlMode::JointSpaceId {
            joint_gains,
            ik_method,
        } => {
            let torque =
                joint_space_torque(state, target, config.jacobian_type, joint_gains, *ik_method);
            &state.mass_matrix * torque
        }
        _ => task_space_torque(state, target, config),
    };
    torque.rows_mut(0, n).copy_from(&arm_torque);

    let gripper = &config.gripper_gains;
    let gripper_torque = gripper
        .kp
        .component_mul(&(&target.gripper_positions - state.gripper_positions()))
        - gripper.kd.component_mul(&state.gripper_velocities());
    torque
        .rows_mut(n, state.num_gripper_dofs())
        .copy_from(&gripper_torque);

    let limit = config.torque_limit;
    torque.apply(|t| *t = t.clamp(-limit, limit));
    torque
}

// =========================================================================
// == Pose Error ==
// =========================================================================

/// `[target - current position; orientation error]`.
///
/// With the geometric convention the orientation error is the rotation
/// vector of `q_target * q_current^-1`, taken along the shortest path. With
/// the analytic convention it is the difference of the two rotation vectors.
pub fn pose_error(
    current_position: &Vector3<f64>,
    current_orientation: &UnitQuaternion<f64>,
    target_position: &Vector3<f64>,
    target_orientation: &UnitQuaternion<f64>,
    jacobian_type: JacobianType,
) -> Twist {
    let position_error = target_position - current_position;
    let orientation_error = match jacobian_type {
        JacobianType::Geometric => {
            let relative = shortest_path(target_orientation * current_orientation.inverse());
            axis_angle_from_quat(&relative)
        }
        JacobianType::Analytic => {
            axis_angle_from_quat(&shortest_path(*target_orientation))
                - axis_angle_from_quat(&shortest_path(*current_orientation))
        }
    };
    Twist::new(
        position_error.x,
        position_error.y,
        position_error.z,
        orientation_error.x,
        orientation_error.y,
        orientation_error.z,
    )
}

/// Pose error plus the Jacobian expressed in the same convention.
fn pose_error_and_jacobian(
    state: &ArmState,
    target: &ControlTarget,
    jacobian_type: JacobianType,
) -> (Twist, Jacobian) {
    let frame = &state.fingertip_midpoint;
    let error = pose_error(
        &frame.position,
        &frame.orientation,
        &target.position,
        &target.orientation,
        jacobian_type,
    );
    let jacobian = match jacobian_type {
        JacobianType::Geometric => state.fingertip_midpoint_jacobian.clone(),
        JacobianType::Analytic => {
            analytic_jacobian(&frame.orientation, &state.fingertip_midpoint_jacobian)
        }
    };
    (error, jacobian)
}

/// Maps the angular rows of a geometric Jacobian onto rotation-vector rates.
pub fn analytic_jacobian(orientation: &UnitQuaternion<f64>, geometric: &Jacobian) -> Jacobian {
    let mut analytic = geometric.clone();
    let rate_map = rotation_vector_rate_map(orientation);
    let angular = rate_map * geometric.rows(3, 3);
    analytic.rows_mut(3, 3).copy_from(&angular);
    analytic
}

// =========================================================================
// == Joint Space ==
// =========================================================================

/// `tau = Kp * delta_q - Kd * q_dot`.
fn joint_space_torque(
    state: &ArmState,
    target: &ControlTarget,
    jacobian_type: JacobianType,
    gains: &JointGains,
    ik_method: IkMethod,
) -> JointVector {
    let (error, jacobian) = pose_error_and_jacobian(state, target, jacobian_type);
    let delta = delta_joint_positions(&jacobian, &error, ik_method);
    gains.kp.component_mul(&delta) - gains.kd.component_mul(&state.arm_velocities())
}

// =========================================================================
// == Task Space ==
// =========================================================================

/// The task-space wrench the arm should exert at the fingertip midpoint:
/// masked motion PD (optionally inertia-shaped) plus masked force control.
pub fn compute_task_wrench(
    state: &ArmState,
    target: &ControlTarget,
    config: &ControllerConfig,
) -> Wrench {
    let mut wrench = Wrench::zeros();

    if let Some(gains) = task_gains_of(config) {
        let (error, jacobian) = pose_error_and_jacobian(state, target, config.jacobian_type);
        let velocity = state.fingertip_midpoint.twist();
        let mut motion = gains.kp.component_mul(&error) - gains.kd.component_mul(&velocity);
        if config.inertial_compensation() == Some(true) {
            let inertia = task_space_inertia(&jacobian, &state.mass_matrix);
            motion = Wrench::from_iterator((inertia * motion).iter().copied());
        }
        wrench += config.motion_mask().component_mul(&motion);
    }

    if let Some(method) = config.force_control() {
        let mut force = target.wrench;
        if method == ForceControl::ClosedLoop {
            if let Some(gains) = wrench_gains_of(config) {
                force += gains.component_mul(&wrench_error(state, target));
            }
        }
        wrench += config.force_mask().component_mul(&force);
    }

    wrench
}

/// `target - measured`, with the measured wrench sensed at the fingertips.
pub fn wrench_error(state: &ArmState, target: &ControlTarget) -> Wrench {
    target.wrench - state.measured_contact_wrench()
}

fn task_space_torque(
    state: &ArmState,
    target: &ControlTarget,
    config: &ControllerConfig,
) -> JointVector {
    let jacobian = match config.jacobian_type {
        JacobianType::Geometric => state.fingertip_midpoint_jacobian.clone(),
        JacobianType::Analytic => analytic_jacobian(
            &state.fingertip_midpoint.orientation,
            &state.fingertip_midpoint_jacobian,
        ),
    };
    let wrench = compute_task_wrench(state, target, config);
    let mut torque = jacobian.transpose() * wrench;
    if let Some(k) = config.null_space_damping {
        torque += null_space_damping_torque(state, &jacobian, config, k);
    }
    torque
}

/// `Lambda = (J M^-1 J^T)^-1`.
///
/// Near singular configurations the inverse is damped; if even that fails
/// the identity is returned, which reduces the law to plain impedance.
pub fn task_space_inertia(jacobian: &Jacobian, mass_matrix: &DMatrix<f64>) -> DMatrix<f64> {
    let mass_inv = mass_inverse(mass_matrix);
    let inertia_inv = jacobian * mass_inv * jacobian.transpose();
    spd_inverse(&inertia_inv, "task-space inertia")
        .or_else(|err| {
            debug!("{err}; damping the task-space inertia");
            damped_spd_inverse(&inertia_inv, TASK_INERTIA_DAMPING, "damped task-space inertia")
        })
        .unwrap_or_else(|err| {
            debug!("{err}; using identity task-space inertia");
            DMatrix::identity(TASK_DIM, TASK_DIM)
        })
}

fn mass_inverse(mass_matrix: &DMatrix<f64>) -> DMatrix<f64> {
    let n = mass_matrix.nrows();
    spd_inverse(mass_matrix, "arm mass matrix").unwrap_or_else(|err| {
        debug!("{err}; using identity mass matrix");
        DMatrix::identity(n, n)
    })
}

/// `(I - J^T Jbar^T) (-k q_dot)`: joint damping that produces no task-space force.
///
/// `Jbar` is the dynamically consistent inverse `M^-1 J^T Lambda` when
/// inertial compensation is on, otherwise the plain pseudo-inverse.
fn null_space_damping_torque(
    state: &ArmState,
    jacobian: &Jacobian,
    config: &ControllerConfig,
    k: f64,
) -> JointVector {
    let n = state.num_arm_dofs;
    let damping = state.arm_velocities() * -k;
    let generalized_inverse = if config.inertial_compensation() == Some(true) {
        let mass_inv = mass_inverse(&state.mass_matrix);
        let inertia = task_space_inertia(jacobian, &state.mass_matrix);
        Ok(&mass_inv * jacobian.transpose() * inertia)
    } else {
        pseudo_inverse(jacobian, 1.0e-6, "null-space projection")
    };
    match generalized_inverse {
        Ok(j_bar) => {
            let projector = DMatrix::identity(n, n) - jacobian.transpose() * j_bar.transpose();
            projector * damping
        }
        Err(err) => {
            debug!("{err}; skipping null-space damping");
            DVector::zeros(n)
        }
    }
}

fn task_gains_of(config: &ControllerConfig) -> Option<TaskGains> {
    use ControlMode::*;
    match &config.mode {
        TaskSpaceImpedance { task_gains, .. }
        | OperationalSpaceMotion { task_gains, .. }
        | HybridForceMotion { task_gains, .. } => Some(*task_gains),
        _ => None,
    }
}

fn wrench_gains_of(config: &ControllerConfig) -> Option<Wrench> {
    use ControlMode::*;
    match &config.mode {
        ClosedLoopForce { wrench_gains, .. } | HybridForceMotion { wrench_gains, .. } => {
            Some(*wrench_gains)
        }
        _ => None,
    }
}

// tandem_core/src/kinematics/mod.rs

//! Per-arm views over a simulator snapshot.

mod extractor;

pub use extractor::KinematicStateExtractor;

use nalgebra::{DVectorView, Vector3};

use crate::frames::RigidBodyFrame;
use crate::types::{Jacobian, JointVector, MassMatrix, Wrench};

/// Everything the control law reads about one arm in one environment.
///
/// Rebuilt from scratch on every tick; nothing in here outlives the snapshot
/// it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct ArmState {
    pub hand: RigidBodyFrame,
    pub left_finger: RigidBodyFrame,
    pub right_finger: RigidBodyFrame,
    pub fingertip_centered: RigidBodyFrame,
    /// Derived control frame, see [`crate::frames::derive_fingertip_midpoint`].
    pub fingertip_midpoint: RigidBodyFrame,

    /// `6 x num_arm_dofs`; gripper columns are dropped.
    pub hand_jacobian: Jacobian,
    pub left_finger_jacobian: Jacobian,
    pub right_finger_jacobian: Jacobian,
    /// Mean of the two finger Jacobians. The midpoint is not a physical body,
    /// so this is an approximation kept for parity with trained policies.
    pub fingertip_midpoint_jacobian: Jacobian,
    /// `num_arm_dofs x num_arm_dofs`
    pub mass_matrix: MassMatrix,

    /// Arm DOFs first, then gripper DOFs.
    pub dof_positions: JointVector,
    pub dof_velocities: JointVector,
    /// Actuation forces applied during the previous step.
    pub dof_forces: JointVector,

    pub left_finger_contact_force: Vector3<f64>,
    pub right_finger_contact_force: Vector3<f64>,

    pub num_arm_dofs: usize,
}

impl ArmState {
    pub fn num_gripper_dofs(&self) -> usize {
        self.dof_positions.len() - self.num_arm_dofs
    }

    pub fn arm_positions(&self) -> DVectorView<'_, f64> {
        self.dof_positions.rows(0, self.num_arm_dofs)
    }

    pub fn arm_velocities(&self) -> DVectorView<'_, f64> {
        self.dof_velocities.rows(0, self.num_arm_dofs)
    }

    pub fn gripper_positions(&self) -> DVectorView<'_, f64> {
        self.dof_positions
            .rows(self.num_arm_dofs, self.num_gripper_dofs())
    }

    pub fn gripper_velocities(&self) -> DVectorView<'_, f64> {
        self.dof_velocities
            .rows(self.num_arm_dofs, self.num_gripper_dofs())
    }

    /// The wrench the fingertips exert on the environment, `[-(f_l + f_r); 0]`.
    ///
    /// Net contact forces are reported as acting on the fingers, hence the
    /// sign flip. Contact torques are not sensed.
    pub fn measured_contact_wrench(&self) -> Wrench {
        let f = -(self.left_finger_contact_force + self.right_finger_contact_force);
        Wrench::new(f.x, f.y, f.z, 0.0, 0.0, 0.0)
    }
}

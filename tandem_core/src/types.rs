// tandem_core/src/types.rs

use nalgebra::{DMatrix, DVector, Vector6};

// --- Core Type Aliases ---
/// Force (3) followed by torque (3), expressed in the world frame.
pub type Wrench = Vector6<f64>;
/// Linear velocity (3) followed by angular velocity (3), or a pose delta of the same layout.
pub type Twist = Vector6<f64>;
pub type JointVector = DVector<f64>;
/// A `6 x n` task-space Jacobian: linear rows first, angular rows second.
pub type Jacobian = DMatrix<f64>;
pub type MassMatrix = DMatrix<f64>;

// --- Simulator Tensor Layout ---
/// Floats per rigid-body or root state row: position (3), quaternion xyzw (4),
/// linear velocity (3), angular velocity (3).
pub const BODY_STATE_WIDTH: usize = 13;
/// Floats per DOF state row: position, velocity.
pub const DOF_STATE_WIDTH: usize = 2;
/// Floats per net contact force row.
pub const CONTACT_FORCE_WIDTH: usize = 3;
/// Rows of a spatial Jacobian.
pub const TASK_DIM: usize = 6;

/// Symmetric bound applied to every commanded joint torque, in N·m.
pub const DEFAULT_TORQUE_LIMIT: f64 = 100.0;

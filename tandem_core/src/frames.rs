// tandem_core/src/frames.rs

pub mod layout;

use nalgebra::{UnitQuaternion, Vector3};

use crate::types::{Twist, BODY_STATE_WIDTH};
use crate::utils::rotations::{quat_from_xyzw, quat_to_xyzw, translate_along_local_z};

/// The physical bodies of an arm the controller reads every tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArmBody {
    Hand,
    LeftFinger,
    RightFinger,
    /// A real body fixed to the hand, centered between the fingertips.
    FingertipCentered,
}

impl ArmBody {
    pub const ALL: [ArmBody; 4] = [
        ArmBody::Hand,
        ArmBody::LeftFinger,
        ArmBody::RightFinger,
        ArmBody::FingertipCentered,
    ];
}

/// Pose and spatial velocity of a rigid body, all in the world frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidBodyFrame {
    pub position: Vector3<f64>,
    pub orientation: UnitQuaternion<f64>,
    pub linear_velocity: Vector3<f64>,
    pub angular_velocity: Vector3<f64>,
}

impl Default for RigidBodyFrame {
    fn default() -> Self {
        Self::at_rest(Vector3::zeros(), UnitQuaternion::identity())
    }
}

impl RigidBodyFrame {
    pub fn at_rest(position: Vector3<f64>, orientation: UnitQuaternion<f64>) -> Self {
        Self {
            position,
            orientation,
            linear_velocity: Vector3::zeros(),
            angular_velocity: Vector3::zeros(),
        }
    }

    /// Reads a simulator state row `[p(3), q_xyzw(4), v(3), w(3)]`.
    ///
    /// # Panics
    /// If `row` is shorter than [`BODY_STATE_WIDTH`]. Callers slice rows out of
    /// tensors whose shapes were validated against the scene topology.
    pub fn from_state_row(row: &[f64]) -> Self {
        let row = &row[..BODY_STATE_WIDTH];
        Self {
            position: Vector3::new(row[0], row[1], row[2]),
            orientation: quat_from_xyzw(&row[3..7]),
            linear_velocity: Vector3::new(row[7], row[8], row[9]),
            angular_velocity: Vector3::new(row[10], row[11], row[12]),
        }
    }

    /// Writes the frame back into the simulator's 13-float row layout.
    pub fn to_state_row(&self) -> [f64; BODY_STATE_WIDTH] {
        let q = quat_to_xyzw(&self.orientation);
        let p = &self.position;
        let v = &self.linear_velocity;
        let w = &self.angular_velocity;
        [
            p.x, p.y, p.z, q[0], q[1], q[2], q[3], v.x, v.y, v.z, w.x, w.y, w.z,
        ]
    }

    /// `[v; w]`, matching the row order of the simulator Jacobians.
    pub fn twist(&self) -> Twist {
        Twist::new(
            self.linear_velocity.x,
            self.linear_velocity.y,
            self.linear_velocity.z,
            self.angular_velocity.x,
            self.angular_velocity.y,
            self.angular_velocity.z,
        )
    }

    /// Velocity of a point rigidly attached to this body.
    pub fn point_velocity(&self, point: &Vector3<f64>) -> Vector3<f64> {
        self.linear_velocity + self.angular_velocity.cross(&(point - self.position))
    }
}

/// Derives the fingertip-midpoint control frame.
///
/// * position: midpoint of the two finger bodies, pushed along the hand's
///   local z-axis by `finger_length`;
/// * orientation and angular velocity: those of the fingertip-centered body,
///   which is rigid with the hand;
/// * linear velocity: the centered body's velocity carried over the lever arm
///   `p_mid - p_centered`.
///
/// Only relative positions enter the velocity, so translating every input by
/// a constant translates the output position and leaves the velocities alone.
pub fn derive_fingertip_midpoint(
    hand: &RigidBodyFrame,
    left_finger: &RigidBodyFrame,
    right_finger: &RigidBodyFrame,
    fingertip_centered: &RigidBodyFrame,
    finger_length: f64,
) -> RigidBodyFrame {
    let finger_midpoint = (left_finger.position + right_finger.position) * 0.5;
    let position = translate_along_local_z(&finger_midpoint, &hand.orientation, finger_length);
    RigidBodyFrame {
        position,
        orientation: fingertip_centered.orientation,
        linear_velocity: fingertip_centered.point_velocity(&position),
        angular_velocity: fingertip_centered.angular_velocity,
    }
}

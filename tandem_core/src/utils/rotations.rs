// tandem_core/src/utils/rotations.rs

//! Quaternion and rotation-vector helpers shared by the control law, the
//! action mapping and the kinematic extractor.

use nalgebra::{Matrix3, Quaternion, Unit, UnitQuaternion, Vector3};

/// Below this angle (rad) a rotation is treated as the identity.
pub const ANGLE_EPSILON: f64 = 1.0e-6;

/// Converts a unit quaternion into a rotation vector (axis scaled by angle).
///
/// The angle is taken from `atan2(|xyz|, w)`, so a quaternion with a negative
/// scalar part yields an angle above pi. Callers that want the shortest path
/// must flip the sign beforehand (see [`shortest_path`]).
pub fn axis_angle_from_quat(q: &UnitQuaternion<f64>) -> Vector3<f64> {
    let q = q.quaternion();
    let xyz = q.imag();
    let half_angle = xyz.norm().atan2(q.w);
    let angle = 2.0 * half_angle;
    // sin(a/2) / a, with its Taylor expansion near zero
    let sin_half_over_angle = if angle.abs() > ANGLE_EPSILON {
        half_angle.sin() / angle
    } else {
        0.5 - angle * angle / 48.0
    };
    xyz / sin_half_over_angle
}

/// Builds a unit quaternion from a rotation vector.
///
/// A numerically zero angle has no defined axis; the identity is returned
/// instead of normalizing a zero vector.
pub fn quat_from_axis_angle(rotation_vector: &Vector3<f64>) -> UnitQuaternion<f64> {
    match Unit::try_new_and_get(*rotation_vector, ANGLE_EPSILON) {
        Some((axis, angle)) => UnitQuaternion::from_axis_angle(&axis, angle),
        None => UnitQuaternion::identity(),
    }
}

/// Returns the quaternion representing the same rotation with a non-negative
/// scalar part.
pub fn shortest_path(q: UnitQuaternion<f64>) -> UnitQuaternion<f64> {
    if q.w < 0.0 {
        UnitQuaternion::new_unchecked(-q.into_inner())
    } else {
        q
    }
}

/// Reads a quaternion stored in simulator order `[x, y, z, w]`.
///
/// A zero-norm quaternion (uninitialized buffer) reads as the identity.
pub fn quat_from_xyzw(xyzw: &[f64]) -> UnitQuaternion<f64> {
    let q = Quaternion::new(xyzw[3], xyzw[0], xyzw[1], xyzw[2]);
    UnitQuaternion::try_new(q, f64::EPSILON).unwrap_or_else(UnitQuaternion::identity)
}

/// Writes a quaternion in simulator order `[x, y, z, w]`.
pub fn quat_to_xyzw(q: &UnitQuaternion<f64>) -> [f64; 4] {
    let c = q.coords;
    [c.x, c.y, c.z, c.w]
}

/// Offsets `position` along the local z-axis of the frame oriented by `orientation`.
pub fn translate_along_local_z(
    position: &Vector3<f64>,
    orientation: &UnitQuaternion<f64>,
    offset: f64,
) -> Vector3<f64> {
    position + orientation * Vector3::new(0.0, 0.0, offset)
}

/// The skew-symmetric cross-product matrix of `v`.
pub fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    v.cross_matrix()
}

/// The inverse of the rotation-vector rate map, `E_r^-1`, such that
/// `d/dt(axis_angle) = E_r^-1 * omega`.
///
/// Used to turn a geometric Jacobian into an analytic one whose angular rows
/// act on rotation-vector coordinates.
pub fn rotation_vector_rate_map(orientation: &UnitQuaternion<f64>) -> Matrix3<f64> {
    let phi = axis_angle_from_quat(&shortest_path(*orientation));
    let angle = phi.norm();
    let phi_cross = skew(&phi);
    // (1 - a sin(a) / (2 (1 - cos a))) / a^2 tends to 1/12 at zero
    let factor = if angle > 1.0e-4 {
        (1.0 - angle * 0.5 * angle.sin() / (1.0 - angle.cos())) / (angle * angle)
    } else {
        1.0 / 12.0 + angle * angle / 720.0
    };
    Matrix3::identity() - 0.5 * phi_cross + factor * phi_cross * phi_cross
}

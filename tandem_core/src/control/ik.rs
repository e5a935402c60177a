// tandem_core/src/control/ik.rs

//! One-step differential inverse kinematics: `delta_q = f(J, delta_x)`.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{Jacobian, JointVector, Twist};
use crate::utils::linalg::{damped_spd_inverse, pseudo_inverse};

/// Damping of the damped-least-squares step.
pub const DLS_LAMBDA: f64 = 0.1;
/// Singular values below this are discarded by the SVD step.
pub const SVD_MIN_SINGULAR_VALUE: f64 = 1.0e-5;
/// Rank cutoff of the plain pseudo-inverse.
const PINV_EPSILON: f64 = 1.0e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IkMethod {
    /// Moore-Penrose pseudo-inverse.
    Pinv,
    /// Jacobian transpose.
    Trans,
    /// Damped least squares, `J^T (J J^T + lambda^2 I)^-1`.
    #[default]
    Dls,
    /// Truncated SVD pseudo-inverse.
    Svd,
}

/// Joint displacement that moves the end effector by `pose_error` to first order.
///
/// A failed factorization falls back to the Jacobian transpose, which is
/// always defined and still points downhill.
pub fn delta_joint_positions(
    jacobian: &Jacobian,
    pose_error: &Twist,
    method: IkMethod,
) -> JointVector {
    let transpose_step = || jacobian.transpose() * pose_error;
    let step = match method {
        IkMethod::Trans => return transpose_step(),
        IkMethod::Pinv => pseudo_inverse(jacobian, PINV_EPSILON, "ik pinv")
            .map(|pinv| pinv * pose_error),
        IkMethod::Svd => pseudo_inverse(jacobian, SVD_MIN_SINGULAR_VALUE, "ik svd")
            .map(|pinv| pinv * pose_error),
        IkMethod::Dls => {
            let jjt: DMatrix<f64> = jacobian * jacobian.transpose();
            damped_spd_inverse(&jjt, DLS_LAMBDA, "ik dls")
                .map(|inv| jacobian.transpose() * (inv * pose_error))
        }
    };
    step.unwrap_or_else(|err| {
        debug!("{err}; falling back to Jacobian transpose");
        transpose_step()
    })
}

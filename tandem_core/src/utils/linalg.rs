// tandem_core/src/utils/linalg.rs

use nalgebra::DMatrix;

use crate::error::NumericDegeneracy;

/// Smallest Cholesky pivot accepted before a symmetric matrix counts as singular.
pub const CHOLESKY_PIVOT_EPSILON: f64 = 1.0e-9;

/// Inverts a symmetric positive-definite matrix through its Cholesky factor.
///
/// Fails when the factorization does not exist or a pivot falls below
/// [`CHOLESKY_PIVOT_EPSILON`], which is how a rank-deficient `J M^-1 J^T`
/// shows up near kinematic singularities.
pub fn spd_inverse(
    matrix: &DMatrix<f64>,
    context: &'static str,
) -> Result<DMatrix<f64>, NumericDegeneracy> {
    let chol = matrix
        .clone()
        .cholesky()
        .ok_or(NumericDegeneracy { context })?;
    let min_pivot = chol.l_dirty().diagonal().min();
    if !(min_pivot > CHOLESKY_PIVOT_EPSILON) {
        return Err(NumericDegeneracy { context });
    }
    Ok(chol.inverse())
}

/// Inverts `matrix + damping^2 * I`, which is positive definite for any
/// positive semi-definite input.
pub fn damped_spd_inverse(
    matrix: &DMatrix<f64>,
    damping: f64,
    context: &'static str,
) -> Result<DMatrix<f64>, NumericDegeneracy> {
    let n = matrix.nrows();
    let damped = matrix + DMatrix::identity(n, n) * (damping * damping);
    damped
        .cholesky()
        .map(|chol| chol.inverse())
        .ok_or(NumericDegeneracy { context })
}

/// Moore-Penrose pseudo-inverse through SVD; singular values at or below
/// `min_singular_value` are dropped.
pub fn pseudo_inverse(
    matrix: &DMatrix<f64>,
    min_singular_value: f64,
    context: &'static str,
) -> Result<DMatrix<f64>, NumericDegeneracy> {
    matrix
        .clone()
        .pseudo_inverse(min_singular_value)
        .map_err(|_| NumericDegeneracy { context })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const F64_EPSILON: f64 = 1e-9;

    #[test]
    fn test_spd_inverse_round_trip() {
        let m = DMatrix::from_row_slice(3, 3, &[4.0, 1.0, 0.5, 1.0, 3.0, 0.2, 0.5, 0.2, 2.0]);
        let inv = spd_inverse(&m, "test").expect("matrix is SPD");
        assert_abs_diff_eq!(&m * &inv, DMatrix::identity(3, 3), epsilon = F64_EPSILON);
    }

    #[test]
    fn test_spd_inverse_rejects_singular() {
        // Rank one.
        let m = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]);
        let err = spd_inverse(&m, "rank one").unwrap_err();
        assert_eq!(err.context, "rank one");
    }

    #[test]
    fn test_damped_inverse_handles_singular() {
        let m = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]);
        let inv = damped_spd_inverse(&m, 0.1, "test").expect("damped matrix is SPD");
        assert!(inv.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_pseudo_inverse_of_wide_matrix() {
        let j = DMatrix::from_row_slice(2, 3, &[1.0, 0.0, 0.0, 0.0, 2.0, 0.0]);
        let pinv = pseudo_inverse(&j, 1e-12, "test").expect("svd converges");
        assert_abs_diff_eq!(&j * &pinv, DMatrix::identity(2, 2), epsilon = F64_EPSILON);
    }
}

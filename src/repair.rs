//! Covariance and correlation matrix repair
//!
//! Cholesky factorization doubles as the validity probe for covariance and
//! correlation input. Measured matrices often miss positive-definiteness by
//! floating-point noise; the nearest positive-semidefinite projection brings
//! them back, as long as the adjustment stays inside a strict relative
//! tolerance. Anything further off is rejected as invalid data.

use log::warn;
use nalgebra::{Cholesky, DMatrix, DVector};

use crate::McError;

/// Largest element-wise relative deviation accepted when repairing a matrix
pub const REPAIR_TOLERANCE: f64 = 1e-4;

/// Cap on the diagonal-nudging loop
const MAX_REPAIR_ITERATIONS: usize = 100;

/// Iteration budget handed to the singular value decomposition
const SVD_MAX_ITERATIONS: usize = 10_000;

/// Cholesky-based positive-definiteness probe
pub fn is_positive_definite(matrix: &DMatrix<f64>) -> bool {
    Cholesky::new(matrix.clone()).is_some()
}

/// Nearest positive-semidefinite projection (Higham 1988)
///
/// Symmetrizes the input, averages it with its symmetric polar factor from an
/// SVD, then nudges the diagonal past the most negative eigenvalue until the
/// Cholesky probe succeeds. The result is accepted only when every element
/// stays within `REPAIR_TOLERANCE` relative deviation of the input (absolute
/// deviation where the input element is zero); otherwise the input is not a
/// usable covariance or correlation matrix and `IllConditionedMatrix` is
/// returned. Already positive-definite input is returned unchanged.
pub fn nearest_positive_definite(matrix: &DMatrix<f64>) -> Result<DMatrix<f64>, McError> {
    if is_positive_definite(matrix) {
        return Ok(matrix.clone());
    }

    let n = matrix.nrows();
    let b = (matrix + matrix.transpose()) * 0.5;
    let svd = b
        .clone()
        .try_svd(true, true, f64::EPSILON, SVD_MAX_ITERATIONS)
        .ok_or_else(|| {
            McError::IllConditionedMatrix("singular value decomposition did not converge".into())
        })?;
    let v_t = svd.v_t.as_ref().ok_or_else(|| {
        McError::IllConditionedMatrix("singular value decomposition returned no factors".into())
    })?;

    // Symmetric polar factor of b, then the Higham average
    let h = v_t.transpose() * DMatrix::from_diagonal(&svd.singular_values) * v_t;
    let a2 = (&b + &h) * 0.5;
    let mut a3 = (&a2 + a2.transpose()) * 0.5;

    let spacing = (f64::EPSILON * matrix.norm()).max(f64::EPSILON);
    let identity = DMatrix::<f64>::identity(n, n);
    let mut k = 1usize;
    while !is_positive_definite(&a3) {
        if k > MAX_REPAIR_ITERATIONS {
            return Err(McError::IllConditionedMatrix(format!(
                "still not positive-definite after {MAX_REPAIR_ITERATIONS} diagonal adjustments"
            )));
        }
        let min_eig = a3.symmetric_eigenvalues().min();
        a3 += &identity * (-min_eig * (k * k) as f64 + spacing);
        k += 1;
    }

    let mut max_deviation = 0.0f64;
    for i in 0..n {
        for j in 0..n {
            let original = matrix[(i, j)];
            let deviation = (a3[(i, j)] - original).abs();
            let scaled = if original != 0.0 {
                deviation / original.abs()
            } else {
                deviation
            };
            max_deviation = max_deviation.max(scaled);
        }
    }
    if max_deviation > REPAIR_TOLERANCE {
        return Err(McError::IllConditionedMatrix(format!(
            "nearest valid matrix deviates by {max_deviation:.3e}, tolerance {REPAIR_TOLERANCE:e}"
        )));
    }

    warn!("repaired non positive-definite matrix, max relative change {max_deviation:.3e}");
    Ok(a3)
}

/// Lower Cholesky factor, repairing the matrix first if factorization fails
pub(crate) fn cholesky_or_repair(matrix: &DMatrix<f64>) -> Result<DMatrix<f64>, McError> {
    match Cholesky::new(matrix.clone()) {
        Some(factor) => Ok(factor.l()),
        None => {
            let repaired = nearest_positive_definite(matrix)?;
            match Cholesky::new(repaired) {
                Some(factor) => Ok(factor.l()),
                None => Err(McError::IllConditionedMatrix(
                    "repaired matrix failed Cholesky factorization".into(),
                )),
            }
        }
    }
}

/// Covariance matrix from a correlation matrix and per-element uncertainties
pub fn covariance_from_correlation(
    corr: &DMatrix<f64>,
    u: &DVector<f64>,
) -> Result<DMatrix<f64>, McError> {
    check_square_with_len("correlation matrix", corr, u.len())?;
    Ok(DMatrix::from_fn(u.len(), u.len(), |i, j| {
        corr[(i, j)] * u[i] * u[j]
    }))
}

/// Correlation matrix from a covariance matrix and per-element uncertainties
pub fn correlation_from_covariance(
    cov: &DMatrix<f64>,
    u: &DVector<f64>,
) -> Result<DMatrix<f64>, McError> {
    check_square_with_len("covariance matrix", cov, u.len())?;
    Ok(DMatrix::from_fn(u.len(), u.len(), |i, j| {
        cov[(i, j)] / (u[i] * u[j])
    }))
}

/// Per-element standard deviations from the diagonal of a covariance matrix
pub fn uncertainty_from_covariance(cov: &DMatrix<f64>) -> Result<DVector<f64>, McError> {
    if !cov.is_square() {
        return Err(McError::InvalidArgument(format!(
            "covariance matrix is {}x{}, expected square",
            cov.nrows(),
            cov.ncols()
        )));
    }
    Ok(DVector::from_fn(cov.nrows(), |i, _| cov[(i, i)].sqrt()))
}

fn check_square_with_len(
    context: &'static str,
    matrix: &DMatrix<f64>,
    len: usize,
) -> Result<(), McError> {
    if matrix.nrows() != len || matrix.ncols() != len {
        return Err(McError::InvalidArgument(format!(
            "{context} is {}x{}, expected {len}x{len}",
            matrix.nrows(),
            matrix.ncols()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ones(n: usize) -> DMatrix<f64> {
        DMatrix::from_element(n, n, 1.0)
    }

    #[test]
    fn test_probe_accepts_identity_rejects_singular() {
        assert!(is_positive_definite(&DMatrix::identity(3, 3)));
        assert!(!is_positive_definite(&ones(2)));
        assert!(!is_positive_definite(&DMatrix::from_row_slice(
            2,
            2,
            &[1.0, 2.0, 2.0, 1.0]
        )));
    }

    #[test]
    fn test_positive_definite_input_returned_unchanged() {
        let m = DMatrix::from_row_slice(2, 2, &[2.0, 0.5, 0.5, 1.0]);
        let repaired = nearest_positive_definite(&m).unwrap();
        assert_eq!(repaired, m);
    }

    #[test]
    fn test_singular_correlation_repaired_within_tolerance() {
        let m = ones(2);
        let repaired = nearest_positive_definite(&m).unwrap();
        assert!(is_positive_definite(&repaired));
        for i in 0..2 {
            for j in 0..2 {
                assert!((repaired[(i, j)] - 1.0).abs() < REPAIR_TOLERANCE);
            }
        }
    }

    #[test]
    fn test_slightly_indefinite_matrix_repaired() {
        // Eigenvalues 1 + a, 1 + a, 1 - 2a; a just past 1/2 leaves one barely
        // negative
        let a = 0.50003;
        let m = DMatrix::from_row_slice(3, 3, &[1.0, a, a, a, 1.0, -a, a, -a, 1.0]);
        assert!(!is_positive_definite(&m));

        let repaired = nearest_positive_definite(&m).unwrap();
        assert!(is_positive_definite(&repaired));
        for i in 0..3 {
            for j in 0..3 {
                let rel = (repaired[(i, j)] - m[(i, j)]).abs() / m[(i, j)].abs();
                assert!(rel < REPAIR_TOLERANCE);
            }
        }
    }

    #[test]
    fn test_strongly_indefinite_matrix_rejected() {
        let m = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 1.0]);
        let err = nearest_positive_definite(&m).unwrap_err();
        assert!(matches!(err, McError::IllConditionedMatrix(_)));
    }

    #[test]
    fn test_correlation_covariance_round_trip() {
        let corr = DMatrix::from_row_slice(
            3,
            3,
            &[1.0, 0.3, 0.1, 0.3, 1.0, 0.2, 0.1, 0.2, 1.0],
        );
        let u = DVector::from_vec(vec![1.0, 2.0, 3.0]);

        let cov = covariance_from_correlation(&corr, &u).unwrap();
        assert!((cov[(0, 0)] - 1.0).abs() < 1e-12);
        assert!((cov[(1, 1)] - 4.0).abs() < 1e-12);
        assert!((cov[(1, 2)] - 0.2 * 2.0 * 3.0).abs() < 1e-12);

        let back = correlation_from_covariance(&cov, &u).unwrap();
        for i in 0..3 {
            for j in 0..3 {
                assert!((back[(i, j)] - corr[(i, j)]).abs() < 1e-12);
            }
        }

        let sigmas = uncertainty_from_covariance(&cov).unwrap();
        for i in 0..3 {
            assert!((sigmas[i] - u[i]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_conversion_dimension_mismatch() {
        let corr = DMatrix::identity(3, 3);
        let u = DVector::from_vec(vec![1.0, 2.0]);
        let err = covariance_from_correlation(&corr, &u).unwrap_err();
        assert!(matches!(err, McError::InvalidArgument(_)));
    }
}

//! Cross-input correlation injection
//!
//! Independently generated ensembles are made jointly correlated by moving
//! each one to a normalized form, mixing across inputs with the Cholesky
//! factor of the requested correlation matrix, and moving back. Each input
//! keeps its per-element means exactly and its overall deviation scale.

use nalgebra::DMatrix;

use crate::ensemble::Ensemble;
use crate::repair::cholesky_or_repair;
use crate::McError;

/// Correlate `n` ensembles according to an `n x n` correlation matrix
///
/// The matrix describes dependence between the inputs as wholes, not between
/// elements of one input. Ensembles must share element count and trial count.
/// An ensemble with zero variance passes through unchanged.
pub fn correlate_ensembles(
    ensembles: &[Ensemble],
    corr: &DMatrix<f64>,
) -> Result<Vec<Ensemble>, McError> {
    let n = ensembles.len();
    if n == 0 {
        return Ok(Vec::new());
    }
    if corr.nrows() != n || corr.ncols() != n {
        return Err(McError::InvalidCorrelationMatrix(format!(
            "matrix is {}x{}, but there are {n} inputs",
            corr.nrows(),
            corr.ncols()
        )));
    }
    if let Some(bad) = corr.iter().find(|v| v.abs() > 1.0) {
        return Err(McError::InvalidCorrelationMatrix(format!(
            "element {bad} exceeds 1 in magnitude"
        )));
    }

    let size = ensembles[0].size();
    let steps = ensembles[0].steps();
    for ens in &ensembles[1..] {
        if ens.size() != size || ens.steps() != steps {
            return Err(McError::InvalidArgument(format!(
                "ensembles disagree in layout: {}x{} vs {size}x{steps}",
                ens.size(),
                ens.steps()
            )));
        }
    }

    let factor = cholesky_or_repair(corr)?;

    // Normalize: remove per-element means, divide by the pooled deviation
    // scale of the whole ensemble
    let mut normalized = Vec::with_capacity(n);
    let mut means = Vec::with_capacity(n);
    let mut scales = Vec::with_capacity(n);
    for ens in ensembles {
        let mean = ens.mean();
        let mut deviations = ens.samples().clone();
        let mut sum_sq = 0.0;
        for e in 0..size {
            for k in 0..steps {
                deviations[(e, k)] -= mean[e];
                sum_sq += deviations[(e, k)] * deviations[(e, k)];
            }
        }
        let scale = (sum_sq / (size * steps) as f64).sqrt();
        if scale > 0.0 {
            deviations /= scale;
        }
        normalized.push(deviations);
        means.push(mean);
        scales.push(scale);
    }

    // Mix across inputs with the lower-triangular factor
    let mut correlated = Vec::with_capacity(n);
    for i in 0..n {
        let mut mixed = DMatrix::zeros(size, steps);
        for (j, z) in normalized.iter().enumerate().take(i + 1) {
            let weight = factor[(i, j)];
            if weight != 0.0 {
                mixed += z * weight;
            }
        }
        for e in 0..size {
            for k in 0..steps {
                mixed[(e, k)] = mixed[(e, k)] * scales[i] + means[i][e];
            }
        }
        correlated.push(Ensemble::new(ensembles[i].shape(), mixed)?);
    }
    Ok(correlated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantity::Quantity;
    use crate::sampling::sample_random;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn iid_pair(seed: u64, steps: usize) -> Vec<Ensemble> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let x1 = Quantity::vector(vec![50.0; 30]);
        let u1 = Quantity::vector(vec![1.0; 30]);
        let x2 = Quantity::vector(vec![30.0; 30]);
        let u2 = Quantity::vector(vec![2.0; 30]);
        vec![
            sample_random(&mut rng, &x1, &u1, steps).unwrap(),
            sample_random(&mut rng, &x2, &u2, steps).unwrap(),
        ]
    }

    fn row_corr(a: &Ensemble, b: &Ensemble, e: usize) -> f64 {
        let (ma, mb) = (a.mean()[e], b.mean()[e]);
        let (mut cross, mut va, mut vb) = (0.0, 0.0, 0.0);
        for k in 0..a.steps() {
            let da = a.samples()[(e, k)] - ma;
            let db = b.samples()[(e, k)] - mb;
            cross += da * db;
            va += da * da;
            vb += db * db;
        }
        cross / (va.sqrt() * vb.sqrt())
    }

    #[test]
    fn test_identity_matrix_leaves_ensembles_unchanged() {
        let ensembles = iid_pair(10, 2_000);
        let out = correlate_ensembles(&ensembles, &DMatrix::identity(2, 2)).unwrap();
        for (before, after) in ensembles.iter().zip(&out) {
            for e in 0..before.size() {
                for k in 0..before.steps() {
                    let diff = before.samples()[(e, k)] - after.samples()[(e, k)];
                    assert!(diff.abs() < 1e-9);
                }
            }
        }
    }

    #[test]
    fn test_full_correlation_aligns_the_inputs() {
        let ensembles = iid_pair(11, 10_000);
        let corr = DMatrix::from_element(2, 2, 1.0);
        let out = correlate_ensembles(&ensembles, &corr).unwrap();

        for e in 0..30 {
            assert!((row_corr(&out[0], &out[1], e) - 1.0).abs() < 0.01);
        }
        // Means survive exactly, deviation scales survive statistically
        for (before, after) in ensembles.iter().zip(&out) {
            let (mb, ma) = (before.mean(), after.mean());
            let (sb, sa) = (before.std(), after.std());
            for e in 0..30 {
                assert!((mb[e] - ma[e]).abs() < 1e-9);
                assert!((sa[e] - sb[e]).abs() / sb[e] < 0.05);
            }
        }
    }

    #[test]
    fn test_partial_correlation_reaches_requested_level() {
        let ensembles = iid_pair(12, 20_000);
        let corr = DMatrix::from_row_slice(2, 2, &[1.0, 0.6, 0.6, 1.0]);
        let out = correlate_ensembles(&ensembles, &corr).unwrap();

        for e in 0..30 {
            assert!((row_corr(&out[0], &out[1], e) - 0.6).abs() < 0.05);
        }
    }

    #[test]
    fn test_constant_ensemble_passes_through() {
        let mut rng = ChaCha8Rng::seed_from_u64(13);
        let x1 = Quantity::vector(vec![50.0; 10]);
        let u1 = Quantity::vector(vec![1.0; 10]);
        let x2 = Quantity::vector(vec![30.0; 10]);
        let u2 = Quantity::vector(vec![0.0; 10]);
        let ensembles = vec![
            sample_random(&mut rng, &x1, &u1, 500).unwrap(),
            sample_random(&mut rng, &x2, &u2, 500).unwrap(),
        ];
        let corr = DMatrix::from_element(2, 2, 1.0);
        let out = correlate_ensembles(&ensembles, &corr).unwrap();

        for k in 0..500 {
            for e in 0..10 {
                assert_eq!(out[1].samples()[(e, k)], 30.0);
            }
        }
    }

    #[test]
    fn test_oversized_elements_rejected() {
        let ensembles = iid_pair(14, 100);
        let corr = DMatrix::from_row_slice(2, 2, &[1.0, 1.2, 1.2, 1.0]);
        let err = correlate_ensembles(&ensembles, &corr).unwrap_err();
        assert!(matches!(err, McError::InvalidCorrelationMatrix(_)));
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let ensembles = iid_pair(15, 100);
        let corr = DMatrix::identity(3, 3);
        let err = correlate_ensembles(&ensembles, &corr).unwrap_err();
        assert!(matches!(err, McError::InvalidCorrelationMatrix(_)));
    }

    #[test]
    fn test_layout_mismatch_rejected() {
        let mut rng = ChaCha8Rng::seed_from_u64(16);
        let a = sample_random(
            &mut rng,
            &Quantity::vector(vec![1.0; 4]),
            &Quantity::vector(vec![0.1; 4]),
            100,
        )
        .unwrap();
        let b = sample_random(
            &mut rng,
            &Quantity::vector(vec![1.0; 5]),
            &Quantity::vector(vec![0.1; 5]),
            100,
        )
        .unwrap();
        let err = correlate_ensembles(&[a, b], &DMatrix::identity(2, 2)).unwrap_err();
        assert!(matches!(err, McError::InvalidArgument(_)));
    }
}

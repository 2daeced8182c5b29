//! Ensemble generation for the four uncertainty models
//!
//! Every generator produces an `elements x trials` block whose column `k` is
//! trial `k`. Random uncertainty draws fresh noise per element and trial;
//! systematic uncertainty draws one scalar per trial and scales it by the
//! per-element uncertainty, so the whole quantity shifts together. Covariance
//! input is sampled through its Cholesky factor.

use std::str::FromStr;

use nalgebra::DMatrix;
use rand::Rng;
use rand_distr::StandardNormal;

use crate::ensemble::Ensemble;
use crate::quantity::Quantity;
use crate::repair::cholesky_or_repair;
use crate::McError;

/// Uncertainty-type tag accepted by `propagate_type`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UncertaintyType {
    /// Independent per-element noise
    Random,
    /// One shared draw per trial
    Systematic,
}

impl FromStr for UncertaintyType {
    type Err = McError;

    fn from_str(tag: &str) -> Result<Self, McError> {
        match tag.to_ascii_lowercase().as_str() {
            "random" | "rand" | "r" => Ok(UncertaintyType::Random),
            "systematic" | "syst" | "s" => Ok(UncertaintyType::Systematic),
            _ => Err(McError::InvalidArgument(format!(
                "unknown uncertainty type {tag:?}, expected random/rand/r or systematic/syst/s"
            ))),
        }
    }
}

fn standard_normal(rng: &mut impl Rng) -> f64 {
    let z: f64 = rng.sample(StandardNormal);
    z
}

fn check_same_shape(context: &'static str, x: &Quantity, u: &Quantity) -> Result<(), McError> {
    if x.shape() != u.shape() {
        return Err(McError::InvalidArgument(format!(
            "{context} has shape {:?}, expected {:?}",
            u.shape(),
            x.shape()
        )));
    }
    Ok(())
}

/// Ensemble with independent Gaussian noise per element and trial
pub fn sample_random(
    rng: &mut impl Rng,
    x: &Quantity,
    u: &Quantity,
    steps: usize,
) -> Result<Ensemble, McError> {
    check_same_shape("random uncertainty", x, u)?;
    let values = x.values();
    let sigmas = u.values();
    let samples = DMatrix::from_fn(x.size(), steps, |e, _| {
        values[e] + sigmas[e] * standard_normal(rng)
    });
    Ensemble::new(x.shape(), samples)
}

/// Ensemble with one shared Gaussian draw per trial, scaled per element
pub fn sample_systematic(
    rng: &mut impl Rng,
    x: &Quantity,
    u: &Quantity,
    steps: usize,
) -> Result<Ensemble, McError> {
    check_same_shape("systematic uncertainty", x, u)?;
    let draws: Vec<f64> = (0..steps).map(|_| standard_normal(rng)).collect();
    let values = x.values();
    let sigmas = u.values();
    let samples = DMatrix::from_fn(x.size(), steps, |e, k| values[e] + sigmas[e] * draws[k]);
    Ensemble::new(x.shape(), samples)
}

/// Ensemble with independently drawn random and systematic contributions
pub fn sample_both(
    rng: &mut impl Rng,
    x: &Quantity,
    u_random: &Quantity,
    u_systematic: &Quantity,
    steps: usize,
) -> Result<Ensemble, McError> {
    check_same_shape("random uncertainty", x, u_random)?;
    check_same_shape("systematic uncertainty", x, u_systematic)?;
    let values = x.values();
    let sigmas_random = u_random.values();
    let mut samples = DMatrix::from_fn(x.size(), steps, |e, _| {
        values[e] + sigmas_random[e] * standard_normal(rng)
    });
    let shared: Vec<f64> = (0..steps).map(|_| standard_normal(rng)).collect();
    let sigmas_systematic = u_systematic.values();
    for k in 0..steps {
        for e in 0..x.size() {
            samples[(e, k)] += sigmas_systematic[e] * shared[k];
        }
    }
    Ensemble::new(x.shape(), samples)
}

/// Ensemble drawn from a full covariance matrix over the flattened elements
///
/// A single-element quantity takes its one covariance entry as a variance.
/// For larger quantities the draws go through the Cholesky factor of the
/// matrix, repairing it first when factorization fails.
pub fn sample_covariance(
    rng: &mut impl Rng,
    x: &Quantity,
    cov: &DMatrix<f64>,
    steps: usize,
) -> Result<Ensemble, McError> {
    let size = x.size();
    if cov.nrows() != size || cov.ncols() != size {
        return Err(McError::InvalidArgument(format!(
            "covariance matrix is {}x{}, expected {size}x{size}",
            cov.nrows(),
            cov.ncols()
        )));
    }
    let values = x.values();

    if size == 1 {
        let sigma = cov[(0, 0)].sqrt();
        let samples =
            DMatrix::from_fn(1, steps, |_, _| values[0] + sigma * standard_normal(rng));
        return Ensemble::new(x.shape(), samples);
    }

    let factor = cholesky_or_repair(cov)?;
    let draws = DMatrix::from_fn(size, steps, |_, _| standard_normal(rng));
    let mut samples = &factor * draws;
    for k in 0..steps {
        for e in 0..size {
            samples[(e, k)] += values[e];
        }
    }
    Ensemble::new(x.shape(), samples)
}

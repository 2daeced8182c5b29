//! Monte Carlo sample ensembles
//!
//! An ensemble holds the sample block for one quantity: one row per flattened
//! element, one column per Monte Carlo trial. Column `k` of every ensemble in
//! a propagation call belongs to the same joint trial, and reductions always
//! run across the trial axis.

use nalgebra::{DMatrix, DVector};

use crate::quantity::Shape;
use crate::McError;

/// Sample block for one quantity: flattened elements by Monte Carlo trials
#[derive(Debug, Clone, PartialEq)]
pub struct Ensemble {
    shape: Shape,
    samples: DMatrix<f64>,
}

impl Ensemble {
    /// Wrap an `elements x trials` sample block with its logical shape
    pub fn new(shape: Shape, samples: DMatrix<f64>) -> Result<Self, McError> {
        if samples.nrows() != shape.size() {
            return Err(McError::InvalidArgument(format!(
                "ensemble has {} rows but shape {:?} has {} elements",
                samples.nrows(),
                shape,
                shape.size()
            )));
        }
        Ok(Self { shape, samples })
    }

    /// Logical shape of the underlying quantity
    pub fn shape(&self) -> Shape {
        self.shape
    }

    /// Flattened element count
    pub fn size(&self) -> usize {
        self.samples.nrows()
    }

    /// Number of Monte Carlo trials
    pub fn steps(&self) -> usize {
        self.samples.ncols()
    }

    /// Raw sample block
    pub fn samples(&self) -> &DMatrix<f64> {
        &self.samples
    }

    /// Per-element mean across the trial axis
    pub fn mean(&self) -> DVector<f64> {
        let steps = self.steps() as f64;
        let mut mean = DVector::zeros(self.size());
        for e in 0..self.size() {
            let mut sum = 0.0;
            for k in 0..self.steps() {
                sum += self.samples[(e, k)];
            }
            mean[e] = sum / steps;
        }
        mean
    }

    /// Per-element standard deviation across the trial axis
    ///
    /// Population form, matching the ensemble reductions everywhere else in
    /// the crate.
    pub fn std(&self) -> DVector<f64> {
        let steps = self.steps() as f64;
        let mean = self.mean();
        let mut std = DVector::zeros(self.size());
        for e in 0..self.size() {
            let mut sum_sq = 0.0;
            for k in 0..self.steps() {
                let dev = self.samples[(e, k)] - mean[e];
                sum_sq += dev * dev;
            }
            std[e] = (sum_sq / steps).sqrt();
        }
        std
    }

    /// Pearson correlation matrix between the flattened elements
    ///
    /// Elements with zero variance produce NaN entries rather than being
    /// filtered out.
    pub fn correlation_matrix(&self) -> DMatrix<f64> {
        let size = self.size();
        let steps = self.steps() as f64;
        let mean = self.mean();

        // Centered block, then the covariance via one matrix product
        let mut centered = self.samples.clone();
        for e in 0..size {
            for k in 0..self.steps() {
                centered[(e, k)] -= mean[e];
            }
        }
        let cov = &centered * centered.transpose() / steps;

        let mut corr = DMatrix::zeros(size, size);
        for i in 0..size {
            for j in 0..size {
                corr[(i, j)] = cov[(i, j)] / (cov[(i, i)].sqrt() * cov[(j, j)].sqrt());
            }
        }
        corr
    }
}

//! Monte Carlo propagation of measurement uncertainties
//!
//! Each input quantity is expanded into an ensemble of trials drawn from its
//! uncertainty model, the measurement function runs once over the joint
//! ensemble, and the spread of the output ensemble gives the propagated
//! uncertainty. Random, systematic, and fully covariant error models are
//! supported, as is correlation between the inputs.

pub mod correlation;
pub mod ensemble;
pub mod propagation;
pub mod quantity;
pub mod repair;
pub mod sampling;

use thiserror::Error;

pub use correlation::correlate_ensembles;
pub use ensemble::Ensemble;
pub use propagation::{McInput, McPropagation, McSummary, Request, Uncertainty};
pub use quantity::{Quantity, Shape};
pub use repair::{
    correlation_from_covariance, covariance_from_correlation, is_positive_definite,
    nearest_positive_definite, uncertainty_from_covariance, REPAIR_TOLERANCE,
};
pub use sampling::UncertaintyType;

/// Errors surfaced by the propagation engine
#[derive(Debug, Error)]
pub enum McError {
    /// Inputs that are structurally wrong before any sampling happens
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Correlation matrix with the wrong dimensions or out-of-range entries
    #[error("invalid correlation matrix: {0}")]
    InvalidCorrelationMatrix(String),

    /// Quantity of a rank the engine does not handle
    #[error("unsupported shape: rank {rank} (maximum is 2)")]
    UnsupportedShape { rank: usize },

    /// Matrix that could not be factored or repaired within tolerance
    #[error("ill-conditioned matrix: {0}")]
    IllConditionedMatrix(String),

    /// Failure reported by the measurement function itself
    #[error("measurement function failed: {0}")]
    Measurement(String),
}

//! Monte Carlo propagation engine
//!
//! Ties the stages together: generate one ensemble per input under its
//! uncertainty model, optionally correlate the ensembles across inputs, run
//! the measurement function once over the joint ensemble, and reduce the
//! output to per-element statistics. The five entry points only differ in how
//! they describe the per-input uncertainty; they all funnel into
//! [`McPropagation::propagate`].

use nalgebra::DMatrix;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::correlation::correlate_ensembles;
use crate::ensemble::Ensemble;
use crate::quantity::Quantity;
use crate::sampling::{
    sample_both, sample_covariance, sample_random, sample_systematic, UncertaintyType,
};
use crate::McError;

/// Uncertainty model attached to one input quantity
#[derive(Debug, Clone)]
pub enum Uncertainty {
    /// Independent per-element standard deviations
    Random(Quantity),
    /// Per-element standard deviations driven by one shared draw per trial
    Systematic(Quantity),
    /// Additive random and systematic components, drawn independently
    Both {
        random: Quantity,
        systematic: Quantity,
    },
    /// Full covariance matrix over the flattened elements
    Covariance(DMatrix<f64>),
}

/// One input quantity together with its uncertainty model
#[derive(Debug, Clone)]
pub struct McInput {
    pub quantity: Quantity,
    pub uncertainty: Uncertainty,
}

/// Optional parts of a propagation summary
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Request {
    /// Compute the correlation matrix of the flattened output
    pub corr: bool,
    /// Keep the raw input and output ensembles
    pub samples: bool,
}

/// Result of one propagation call
#[derive(Debug, Clone)]
pub struct McSummary {
    /// Per-element standard deviation of the output ensemble
    pub uncertainty: Quantity,
    /// Per-element mean of the output ensemble
    pub mean: Quantity,
    /// Correlation between flattened output elements, when requested
    pub corr: Option<DMatrix<f64>>,
    /// Output ensemble, when requested
    pub output_samples: Option<Ensemble>,
    /// Generated input ensembles, when requested
    pub input_samples: Option<Vec<Ensemble>>,
}

/// Monte Carlo propagation engine
///
/// The trial count is fixed at construction. A seeded engine replays the same
/// draw stream on every call, which makes studies reproducible; the default
/// constructor seeds each call from OS entropy. The engine itself holds no
/// mutable state, so shared references can propagate concurrently.
#[derive(Debug, Clone)]
pub struct McPropagation {
    steps: usize,
    seed: Option<u64>,
}

impl McPropagation {
    /// Engine drawing fresh entropy on every call
    pub fn new(steps: usize) -> Self {
        Self { steps, seed: None }
    }

    /// Engine replaying a fixed draw stream on every call
    pub fn with_seed(steps: usize, seed: u64) -> Self {
        Self {
            steps,
            seed: Some(seed),
        }
    }

    /// Configured trial count
    pub fn steps(&self) -> usize {
        self.steps
    }

    fn call_rng(&self) -> ChaCha8Rng {
        match self.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        }
    }

    /// Propagate uncertainties through `f`
    ///
    /// # Arguments
    /// * `f` - Measurement function, called once with one ensemble per input;
    ///   column `k` of every ensemble belongs to trial `k`
    /// * `inputs` - Input quantities with their uncertainty models
    /// * `corr_between` - Optional correlation matrix between the inputs
    /// * `request` - Which optional summary parts to fill in
    pub fn propagate<F>(
        &self,
        f: F,
        inputs: &[McInput],
        corr_between: Option<&DMatrix<f64>>,
        request: Request,
    ) -> Result<McSummary, McError>
    where
        F: Fn(&[Ensemble]) -> Result<Ensemble, McError>,
    {
        if inputs.is_empty() {
            return Err(McError::InvalidArgument("no input quantities".into()));
        }

        let mut rng = self.call_rng();
        let mut ensembles = Vec::with_capacity(inputs.len());
        for input in inputs {
            let ensemble = match &input.uncertainty {
                Uncertainty::Random(u) => {
                    sample_random(&mut rng, &input.quantity, u, self.steps)?
                }
                Uncertainty::Systematic(u) => {
                    sample_systematic(&mut rng, &input.quantity, u, self.steps)?
                }
                Uncertainty::Both { random, systematic } => {
                    sample_both(&mut rng, &input.quantity, random, systematic, self.steps)?
                }
                Uncertainty::Covariance(cov) => {
                    sample_covariance(&mut rng, &input.quantity, cov, self.steps)?
                }
            };
            ensembles.push(ensemble);
        }

        if let Some(corr) = corr_between {
            ensembles = correlate_ensembles(&ensembles, corr)?;
        }

        let output = f(&ensembles)?;
        if output.steps() != self.steps {
            return Err(McError::InvalidArgument(format!(
                "measurement function returned {} trials, expected {}",
                output.steps(),
                self.steps
            )));
        }

        let mean = Quantity::with_shape(output.shape(), output.mean())?;
        let uncertainty = Quantity::with_shape(output.shape(), output.std())?;
        let corr = if request.corr {
            Some(output.correlation_matrix())
        } else {
            None
        };
        let (output_samples, input_samples) = if request.samples {
            (Some(output), Some(ensembles))
        } else {
            (None, None)
        };

        Ok(McSummary {
            uncertainty,
            mean,
            corr,
            output_samples,
            input_samples,
        })
    }

    /// Propagate independent random uncertainties
    pub fn propagate_random<F>(
        &self,
        f: F,
        xs: &[Quantity],
        u_xs: &[Quantity],
        corr_between: Option<&DMatrix<f64>>,
        request: Request,
    ) -> Result<McSummary, McError>
    where
        F: Fn(&[Ensemble]) -> Result<Ensemble, McError>,
    {
        let inputs = pair_inputs("random uncertainties", xs, u_xs, Uncertainty::Random)?;
        self.propagate(f, &inputs, corr_between, request)
    }

    /// Propagate systematic uncertainties
    pub fn propagate_systematic<F>(
        &self,
        f: F,
        xs: &[Quantity],
        u_xs: &[Quantity],
        corr_between: Option<&DMatrix<f64>>,
        request: Request,
    ) -> Result<McSummary, McError>
    where
        F: Fn(&[Ensemble]) -> Result<Ensemble, McError>,
    {
        let inputs = pair_inputs("systematic uncertainties", xs, u_xs, Uncertainty::Systematic)?;
        self.propagate(f, &inputs, corr_between, request)
    }

    /// Propagate combined random and systematic uncertainties
    pub fn propagate_both<F>(
        &self,
        f: F,
        xs: &[Quantity],
        u_xs_random: &[Quantity],
        u_xs_systematic: &[Quantity],
        corr_between: Option<&DMatrix<f64>>,
        request: Request,
    ) -> Result<McSummary, McError>
    where
        F: Fn(&[Ensemble]) -> Result<Ensemble, McError>,
    {
        check_count("random uncertainties", xs.len(), u_xs_random.len())?;
        check_count("systematic uncertainties", xs.len(), u_xs_systematic.len())?;
        let inputs: Vec<McInput> = xs
            .iter()
            .zip(u_xs_random.iter().zip(u_xs_systematic))
            .map(|(x, (ur, us))| McInput {
                quantity: x.clone(),
                uncertainty: Uncertainty::Both {
                    random: ur.clone(),
                    systematic: us.clone(),
                },
            })
            .collect();
        self.propagate(f, &inputs, corr_between, request)
    }

    /// Propagate uncertainties tagged per input as random or systematic
    ///
    /// Tags are parsed before any sampling happens, so an unknown tag fails
    /// without producing sample data.
    pub fn propagate_type<F>(
        &self,
        f: F,
        xs: &[Quantity],
        u_xs: &[Quantity],
        u_types: &[&str],
        corr_between: Option<&DMatrix<f64>>,
        request: Request,
    ) -> Result<McSummary, McError>
    where
        F: Fn(&[Ensemble]) -> Result<Ensemble, McError>,
    {
        check_count("uncertainties", xs.len(), u_xs.len())?;
        check_count("uncertainty types", xs.len(), u_types.len())?;
        let parsed: Vec<UncertaintyType> = u_types
            .iter()
            .map(|tag| tag.parse())
            .collect::<Result<_, McError>>()?;
        let inputs: Vec<McInput> = xs
            .iter()
            .zip(u_xs.iter().zip(&parsed))
            .map(|(x, (u, kind))| McInput {
                quantity: x.clone(),
                uncertainty: match kind {
                    UncertaintyType::Random => Uncertainty::Random(u.clone()),
                    UncertaintyType::Systematic => Uncertainty::Systematic(u.clone()),
                },
            })
            .collect();
        self.propagate(f, &inputs, corr_between, request)
    }

    /// Propagate full covariance matrices, one per input
    pub fn propagate_cov<F>(
        &self,
        f: F,
        xs: &[Quantity],
        cov_xs: &[DMatrix<f64>],
        corr_between: Option<&DMatrix<f64>>,
        request: Request,
    ) -> Result<McSummary, McError>
    where
        F: Fn(&[Ensemble]) -> Result<Ensemble, McError>,
    {
        check_count("covariance matrices", xs.len(), cov_xs.len())?;
        let inputs: Vec<McInput> = xs
            .iter()
            .zip(cov_xs)
            .map(|(x, cov)| McInput {
                quantity: x.clone(),
                uncertainty: Uncertainty::Covariance(cov.clone()),
            })
            .collect();
        self.propagate(f, &inputs, corr_between, request)
    }
}

fn check_count(context: &'static str, expected: usize, got: usize) -> Result<(), McError> {
    if expected != got {
        return Err(McError::InvalidArgument(format!(
            "{context}: expected {expected} entries, got {got}"
        )));
    }
    Ok(())
}

fn pair_inputs(
    context: &'static str,
    xs: &[Quantity],
    us: &[Quantity],
    wrap: impl Fn(Quantity) -> Uncertainty,
) -> Result<Vec<McInput>, McError> {
    check_count(context, xs.len(), us.len())?;
    Ok(xs
        .iter()
        .zip(us)
        .map(|(x, u)| McInput {
            quantity: x.clone(),
            uncertainty: wrap(u.clone()),
        })
        .collect())
}

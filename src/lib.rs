//! Sampling of linear Gaussian inverse problems with Randomize-Then-Optimize.
//!
//! A [`Gaussian`] accepts its covariance in any of four forms (covariance,
//! precision or the square root of either, each scalar, vector, dense or
//! sparse) and reduces it to a square-root precision factor. Likelihoods
//! and a prior are stacked into one least-squares system, and
//! [`LinearRto`] / [`RegularizedLinearRto`] draw posterior samples by
//! solving randomly perturbed versions of it.
//!
//! ```no_run
//! use faer::Mat;
//! use rto_rs::{LinearRto, Posterior, Sampler, SamplerSettings};
//!
//! # fn main() -> anyhow::Result<()> {
//! let a = Mat::from_fn(4, 4, |i, j| if i == j { 1. } else { 0.1 });
//! let posterior = Posterior::from_linear_system(vec![1.; 4], a, 10., vec![0.; 4], 1.)?;
//! let mut sampler = Sampler::with_target(LinearRto::default(), posterior, SamplerSettings::default())?;
//! sampler.warmup(100, 0.1)?.sample(1000)?;
//! let samples = sampler.get_samples()?;
//! println!("{:?}", samples.mean());
//! # Ok(())
//! # }
//! ```

pub(crate) mod checkpoint;
pub(crate) mod error;
pub(crate) mod factorization;
pub(crate) mod gaussian;
pub(crate) mod math;
pub(crate) mod model;
pub(crate) mod operator;
pub(crate) mod parameterization;
pub(crate) mod posterior;
pub(crate) mod prior;
pub(crate) mod rto;
pub(crate) mod sampler;
pub(crate) mod samples;
pub(crate) mod solver;
pub mod sparse;
pub(crate) mod stack;
pub(crate) mod storage;

pub use checkpoint::{Checkpoint, HistoryRecord, Metadata, SamplerHistory, StateValue};
pub use error::{Result, RtoError};
pub use factorization::{
    classify, CovarianceInput, Factor, FactorizationOptions, Shape, SparseBackend,
};
pub use gaussian::{Gaussian, GaussianBuilder, Mean};
pub use model::{Continuous1D, ForwardModel, Geometry, LinearModel, Model};
pub use operator::{ClosureOperator, LinearOperator, Matrix};
pub use parameterization::{from_cov, from_prec, from_sqrtcov, from_sqrtprec, Parameterization};
pub use posterior::{Likelihood, Posterior};
pub use prior::{GaussianPrior, JointGaussianSqrtPrec, Proximal, RegularizedGaussian};
pub use rto::{LinearRto, RegularizedLinearRto, RegularizedRtoSettings, RtoSettings, StepSize};
pub use sampler::{Phase, Sampler, SamplerKernel, SamplerSettings, Step, CURRENT_POINT};
pub use samples::Samples;
pub use solver::{estimate_spectral_norm, Cgls, Fista};
pub use sparse::{SparseCholesky, SparseMatrix};
pub use stack::{build_linear_system, LinearSystem};
pub use storage::{read_batches, BatchFile, BatchSettings, BatchWriter};

use std::marker::PhantomData;

use log::debug;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, RtoError},
    gaussian::Gaussian,
    math::standard_normal,
    posterior::Posterior,
    prior::{GaussianPrior, Proximal},
    sampler::{SamplerKernel, Step},
    solver::{estimate_spectral_norm, Cgls, Fista},
    stack::{build_linear_system, LinearSystem},
};

/// Power iterations used when the FISTA step size is estimated.
const SPECTRAL_NORM_ITERATIONS: usize = 100;

/// Settings for the inner least-squares solve of [`LinearRto`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RtoSettings {
    /// Maximum number of CGLS iterations per sample.
    pub maxit: usize,
    /// Relative residual tolerance of CGLS.
    pub tol: f64,
    /// Tikhonov shift added to the normal equations.
    pub shift: f64,
}

impl Default for RtoSettings {
    fn default() -> Self {
        Self {
            maxit: 10,
            tol: 1e-6,
            shift: 0.,
        }
    }
}

/// Step size of the proximal gradient iteration.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepSize {
    /// `0.99 / ‖M‖²` with `‖M‖` estimated by power iteration.
    #[default]
    Automatic,
    Fixed(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegularizedRtoSettings {
    pub maxit: usize,
    pub stepsize: StepSize,
    pub abstol: f64,
    /// Use FISTA momentum. Plain ISTA otherwise.
    pub adaptive: bool,
}

impl Default for RegularizedRtoSettings {
    fn default() -> Self {
        Self {
            maxit: 100,
            stepsize: StepSize::Automatic,
            abstol: 1e-10,
            adaptive: true,
        }
    }
}

fn perturbed_rhs<R: Rng + ?Sized>(system: &LinearSystem, rng: &mut R) -> Vec<f64> {
    let mut rhs = standard_normal(rng, system.rhs.len());
    rhs.iter_mut().zip(&system.rhs).for_each(|(e, b)| *e += b);
    rhs
}

fn stacked_system(system: &Option<LinearSystem>) -> Result<&LinearSystem> {
    system
        .as_ref()
        .ok_or_else(|| RtoError::IncompleteInitialization("linear system".into()))
}

/// Randomize-then-optimize for linear Gaussian posteriors. Each step
/// solves the perturbed least-squares problem `min ‖M x - (b + ε)‖²`,
/// which yields an exact posterior draw.
#[derive(Debug)]
pub struct LinearRto<P = Gaussian> {
    settings: RtoSettings,
    system: Option<LinearSystem>,
    _prior: PhantomData<fn() -> P>,
}

impl<P> LinearRto<P> {
    pub fn new(settings: RtoSettings) -> Self {
        Self {
            settings,
            system: None,
            _prior: PhantomData,
        }
    }

    pub fn settings(&self) -> &RtoSettings {
        &self.settings
    }

    pub fn system(&self) -> Option<&LinearSystem> {
        self.system.as_ref()
    }
}

impl<P> Default for LinearRto<P> {
    fn default() -> Self {
        Self::new(RtoSettings::default())
    }
}

impl<P: GaussianPrior> SamplerKernel for LinearRto<P> {
    type Target = Posterior<P>;
    const NAME: &'static str = "LinearRTO";

    fn validate_target(&self, target: &Posterior<P>) -> Result<()> {
        if target.prior().proximal().is_some() {
            return Err(RtoError::InvalidTarget(
                "LinearRTO needs a Gaussian prior, use RegularizedLinearRTO for regularized priors".into(),
            ));
        }
        build_linear_system(target.likelihoods(), target.prior()).map(|_| ())
    }

    fn precompute(&mut self, target: &Posterior<P>) -> Result<()> {
        let system = build_linear_system(target.likelihoods(), target.prior())?;
        debug!("LinearRTO system is {}x{}", system.nrows(), system.ncols());
        self.system = Some(system);
        Ok(())
    }

    fn dim(&self, target: &Posterior<P>) -> usize {
        target.dim()
    }

    fn step<R: Rng + ?Sized>(&mut self, _target: &Posterior<P>, current: &[f64], rng: &mut R) -> Result<Step> {
        let system = stacked_system(&self.system)?;
        let rhs = perturbed_rhs(system, rng);
        let cgls = Cgls {
            maxit: self.settings.maxit,
            tol: self.settings.tol,
            shift: self.settings.shift,
        };
        let (point, _) = cgls.solve(&system.operator, &rhs, current)?;
        Ok(Step { point, acceptance: 1. })
    }
}

/// Randomize-then-optimize with an implicit prior given through a
/// proximal operator. The perturbed problem is solved with FISTA.
#[derive(Debug)]
pub struct RegularizedLinearRto<P> {
    settings: RegularizedRtoSettings,
    system: Option<LinearSystem>,
    proximal: Option<Proximal>,
    stepsize: Option<f64>,
    _prior: PhantomData<fn() -> P>,
}

impl<P> RegularizedLinearRto<P> {
    pub fn new(settings: RegularizedRtoSettings) -> Self {
        Self {
            settings,
            system: None,
            proximal: None,
            stepsize: None,
            _prior: PhantomData,
        }
    }

    pub fn settings(&self) -> &RegularizedRtoSettings {
        &self.settings
    }

    /// The step size in use, once a target has been set.
    pub fn stepsize(&self) -> Option<f64> {
        self.stepsize
    }
}

impl<P> Default for RegularizedLinearRto<P> {
    fn default() -> Self {
        Self::new(RegularizedRtoSettings::default())
    }
}

impl<P: GaussianPrior> SamplerKernel for RegularizedLinearRto<P> {
    type Target = Posterior<P>;
    const NAME: &'static str = "RegularizedLinearRTO";

    fn validate_target(&self, target: &Posterior<P>) -> Result<()> {
        if target.prior().proximal().is_none() {
            return Err(RtoError::InvalidTarget(
                "RegularizedLinearRTO needs a prior with a proximal operator".into(),
            ));
        }
        if let StepSize::Fixed(stepsize) = self.settings.stepsize {
            if !stepsize.is_finite() || stepsize <= 0. {
                return Err(RtoError::InvalidTarget(format!("step size must be positive, got {stepsize}")));
            }
        }
        build_linear_system(target.likelihoods(), target.prior()).map(|_| ())
    }

    fn precompute(&mut self, target: &Posterior<P>) -> Result<()> {
        let system = build_linear_system(target.likelihoods(), target.prior())?;
        let stepsize = match self.settings.stepsize {
            StepSize::Fixed(stepsize) => stepsize,
            StepSize::Automatic => {
                let norm = estimate_spectral_norm(&system.operator, SPECTRAL_NORM_ITERATIONS)?;
                if norm <= 0. {
                    return Err(RtoError::InvalidTarget("stacked operator is zero".into()));
                }
                0.99 / (norm * norm)
            }
        };
        debug!("RegularizedLinearRTO uses step size {stepsize:e}");
        self.proximal = target.prior().proximal().cloned();
        self.stepsize = Some(stepsize);
        self.system = Some(system);
        Ok(())
    }

    fn dim(&self, target: &Posterior<P>) -> usize {
        target.dim()
    }

    fn step<R: Rng + ?Sized>(&mut self, _target: &Posterior<P>, current: &[f64], rng: &mut R) -> Result<Step> {
        let system = stacked_system(&self.system)?;
        let (Some(proximal), Some(stepsize)) = (&self.proximal, self.stepsize) else {
            return Err(RtoError::IncompleteInitialization("proximal step".into()));
        };
        let rhs = perturbed_rhs(system, rng);
        let fista = Fista {
            maxit: self.settings.maxit,
            stepsize,
            abstol: self.settings.abstol,
            adaptive: self.settings.adaptive,
        };
        let (point, _) = fista.solve(&system.operator, &rhs, current, proximal)?;
        Ok(Step { point, acceptance: 1. })
    }
}

use std::{fmt::Debug, sync::Arc};

use crate::{
    error::{Result, RtoError},
    gaussian::Gaussian,
    operator::{LinearOperator, Matrix},
};

/// A prior that contributes a square-root precision block and a shifted
/// mean to a stacked least-squares system.
pub trait GaussianPrior: Debug + Send + Sync {
    fn dim(&self) -> usize;

    fn sqrtprec(&self) -> &Matrix;

    fn sqrtprec_times_mean(&self) -> Result<Vec<f64>>;

    /// Proximal operator of an implicit, non-Gaussian penalty.
    fn proximal(&self) -> Option<&Proximal> {
        None
    }

    /// Unnormalized log-density `-½ ‖S x - S m‖²`.
    fn logd(&self, x: &[f64]) -> Result<f64> {
        let residual = residual(self, x)?;
        Ok(-0.5 * residual.iter().map(|r| r * r).sum::<f64>())
    }

    fn gradient(&self, x: &[f64]) -> Result<Vec<f64>> {
        let residual = residual(self, x)?;
        let mut grad = self.sqrtprec().apply_adjoint(&residual)?;
        grad.iter_mut().for_each(|g| *g = -*g);
        Ok(grad)
    }
}

/// `S x - S m`
fn residual<P: GaussianPrior + ?Sized>(prior: &P, x: &[f64]) -> Result<Vec<f64>> {
    if x.len() != prior.dim() {
        return Err(RtoError::dim("prior argument", prior.dim(), x.len()));
    }
    let shifted = prior.sqrtprec_times_mean()?;
    let mut out = prior.sqrtprec().apply(x)?;
    out.iter_mut().zip(shifted).for_each(|(o, s)| *o -= s);
    Ok(out)
}

impl GaussianPrior for Gaussian {
    fn dim(&self) -> usize {
        Gaussian::dim(self)
    }

    fn sqrtprec(&self) -> &Matrix {
        Gaussian::sqrtprec(self)
    }

    fn sqrtprec_times_mean(&self) -> Result<Vec<f64>> {
        Gaussian::sqrtprec_times_mean(self)
    }

    fn logd(&self, x: &[f64]) -> Result<f64> {
        self.logupdf(x)
    }

    fn gradient(&self, x: &[f64]) -> Result<Vec<f64>> {
        Gaussian::gradient(self, x, None)
    }
}

type ProximalFn = Arc<dyn Fn(&[f64], f64) -> Vec<f64> + Send + Sync>;

/// Proximal operator `prox(x, stepsize)`.
#[derive(Clone)]
pub enum Proximal {
    /// Projection onto the nonnegative orthant.
    Nonnegativity,
    /// Projection onto `[lower, upper]` in every coordinate.
    Box { lower: f64, upper: f64 },
    /// Soft thresholding, the proximal map of `strength · ‖x‖₁`.
    L1 { strength: f64 },
    Custom(ProximalFn),
}

impl Debug for Proximal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Proximal::Nonnegativity => write!(f, "Nonnegativity"),
            Proximal::Box { lower, upper } => f
                .debug_struct("Box")
                .field("lower", lower)
                .field("upper", upper)
                .finish(),
            Proximal::L1 { strength } => f.debug_struct("L1").field("strength", strength).finish(),
            Proximal::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

impl Proximal {
    pub fn custom<F>(prox: F) -> Self
    where
        F: Fn(&[f64], f64) -> Vec<f64> + Send + Sync + 'static,
    {
        Proximal::Custom(Arc::new(prox))
    }

    pub fn apply(&self, x: &[f64], stepsize: f64) -> Vec<f64> {
        match self {
            Proximal::Nonnegativity => x.iter().map(|v| v.max(0.)).collect(),
            Proximal::Box { lower, upper } => x.iter().map(|v| v.clamp(*lower, *upper)).collect(),
            Proximal::L1 { strength } => {
                let threshold = strength * stepsize;
                x.iter()
                    .map(|v| v.signum() * (v.abs() - threshold).max(0.))
                    .collect()
            }
            Proximal::Custom(prox) => prox(x, stepsize),
        }
    }
}

/// A Gaussian restricted or penalized through a proximal operator. It has
/// no closed-form density, only the pieces regularized RTO needs.
#[derive(Debug, Clone)]
pub struct RegularizedGaussian {
    gaussian: Gaussian,
    proximal: Proximal,
}

impl RegularizedGaussian {
    pub fn new(gaussian: Gaussian, proximal: Proximal) -> Self {
        Self { gaussian, proximal }
    }

    pub fn gaussian(&self) -> &Gaussian {
        &self.gaussian
    }
}

impl GaussianPrior for RegularizedGaussian {
    fn dim(&self) -> usize {
        self.gaussian.dim()
    }

    fn sqrtprec(&self) -> &Matrix {
        self.gaussian.sqrtprec()
    }

    fn sqrtprec_times_mean(&self) -> Result<Vec<f64>> {
        self.gaussian.sqrtprec_times_mean()
    }

    fn proximal(&self) -> Option<&Proximal> {
        Some(&self.proximal)
    }

    fn logd(&self, _x: &[f64]) -> Result<f64> {
        Err(RtoError::InvalidTarget(
            "a regularized Gaussian has no explicit density".into(),
        ))
    }

    fn gradient(&self, _x: &[f64]) -> Result<Vec<f64>> {
        Err(RtoError::InvalidTarget(
            "a regularized Gaussian has no gradient".into(),
        ))
    }
}

/// Several independent Gaussian factors on the same variable, given by
/// their means and square-root precisions and stacked into one.
#[derive(Debug, Clone)]
pub struct JointGaussianSqrtPrec {
    dim: usize,
    sqrtprec: Matrix,
    sqrtprec_times_mean: Vec<f64>,
}

impl JointGaussianSqrtPrec {
    pub fn new(means: Vec<Vec<f64>>, sqrtprecs: Vec<Matrix>) -> Result<Self> {
        if means.is_empty() || means.len() != sqrtprecs.len() {
            return Err(RtoError::InvalidParameterization(format!(
                "need the same positive number of means and sqrtprecs, got {} and {}",
                means.len(),
                sqrtprecs.len()
            )));
        }
        let dim = means[0].len();
        if let Some(mean) = means.iter().find(|mean| mean.len() != dim) {
            return Err(RtoError::dim("joint Gaussian mean", dim, mean.len()));
        }
        if let Some(sqrtprec) = sqrtprecs.iter().find(|s| s.ncols() != dim) {
            return Err(RtoError::dim("joint Gaussian sqrtprec columns", dim, sqrtprec.ncols()));
        }
        let mut sqrtprec_times_mean = Vec::new();
        for (sqrtprec, mean) in sqrtprecs.iter().zip(&means) {
            sqrtprec_times_mean.extend(sqrtprec.apply(mean)?);
        }
        Ok(Self {
            dim,
            sqrtprec: Matrix::vstack(&sqrtprecs)?,
            sqrtprec_times_mean,
        })
    }
}

impl GaussianPrior for JointGaussianSqrtPrec {
    fn dim(&self) -> usize {
        self.dim
    }

    fn sqrtprec(&self) -> &Matrix {
        &self.sqrtprec
    }

    fn sqrtprec_times_mean(&self) -> Result<Vec<f64>> {
        Ok(self.sqrtprec_times_mean.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use pretty_assertions::assert_eq;

    #[test]
    fn proximal_maps() {
        let x = [-2., 0.5, 3.];
        assert_eq!(Proximal::Nonnegativity.apply(&x, 1.), vec![0., 0.5, 3.]);
        assert_eq!(Proximal::Box { lower: -1., upper: 1. }.apply(&x, 1.), vec![-1., 0.5, 1.]);
        assert_eq!(Proximal::L1 { strength: 2. }.apply(&x, 0.5), vec![-1., 0., 2.]);
        let halve = Proximal::custom(|x, step| x.iter().map(|v| v * step).collect());
        assert_eq!(halve.apply(&x, 0.5), vec![-1., 0.25, 1.5]);
    }

    #[test]
    fn joint_prior_stacks_blocks() {
        let joint = JointGaussianSqrtPrec::new(
            vec![vec![1., 2.], vec![0., -1.]],
            vec![Matrix::identity(2, false), Matrix::from_diagonal(&[2., 3.], true)],
        )
        .unwrap();
        assert_eq!(joint.dim(), 2);
        assert_eq!(joint.sqrtprec().nrows(), 4);
        assert_eq!(joint.sqrtprec_times_mean().unwrap(), vec![1., 2., 0., -3.]);
        // -½ (‖x - m₁‖² + ‖D (x - m₂)‖²) at x = m₁
        assert_abs_diff_eq!(joint.logd(&[1., 2.]).unwrap(), -0.5 * (4. + 81.), epsilon = 1e-12);
    }

    #[test]
    fn joint_prior_rejects_mismatched_blocks() {
        let err = JointGaussianSqrtPrec::new(vec![vec![0.; 2]], vec![Matrix::identity(3, false)]);
        assert!(matches!(err, Err(RtoError::DimensionMismatch { .. })));
        let err = JointGaussianSqrtPrec::new(vec![], vec![]);
        assert!(matches!(err, Err(RtoError::InvalidParameterization(_))));
    }

    #[test]
    fn gaussian_prior_defaults_agree_with_density() {
        let gaussian = Gaussian::builder().mean(vec![1., -1.]).prec(vec![2., 0.5]).build().unwrap();
        let x = [0.3, 0.7];
        let prior: &dyn GaussianPrior = &gaussian;
        assert_abs_diff_eq!(prior.logd(&x).unwrap(), gaussian.logupdf(&x).unwrap(), epsilon = 1e-12);
        let grad = prior.gradient(&x).unwrap();
        assert_abs_diff_eq!(grad[0], -2. * (0.3 - 1.), epsilon = 1e-12);
        assert_abs_diff_eq!(grad[1], -0.5 * (0.7 + 1.), epsilon = 1e-12);

        let regularized = RegularizedGaussian::new(gaussian, Proximal::Nonnegativity);
        assert!(regularized.proximal().is_some());
        assert!(regularized.logd(&x).is_err());
    }
}

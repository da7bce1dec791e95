use std::sync::Arc;

use crate::{
    error::{Result, RtoError},
    factorization::CovarianceInput,
    gaussian::Gaussian,
    math::sub,
    model::{ForwardModel, LinearModel},
    operator::Matrix,
    parameterization::Parameterization,
    prior::GaussianPrior,
};

/// A conditional Gaussian with its observed data, read as a function of
/// the forward model input.
#[derive(Debug, Clone)]
pub struct Likelihood {
    distribution: Gaussian,
    model: Arc<dyn ForwardModel>,
    data: Vec<f64>,
}

impl Likelihood {
    pub fn new(distribution: Gaussian, data: Vec<f64>) -> Result<Self> {
        let model = distribution.model().cloned().ok_or_else(|| {
            RtoError::InvalidTarget("a likelihood needs a Gaussian whose mean is a forward model".into())
        })?;
        if data.len() != distribution.dim() {
            return Err(RtoError::dim("likelihood data", distribution.dim(), data.len()));
        }
        Ok(Self {
            distribution,
            model,
            data,
        })
    }

    pub fn distribution(&self) -> &Gaussian {
        &self.distribution
    }

    pub fn model(&self) -> &Arc<dyn ForwardModel> {
        &self.model
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Dimension of the parameter the likelihood is a function of.
    pub fn dim(&self) -> usize {
        self.model.domain_dim()
    }

    fn check_len(&self, x: &[f64]) -> Result<()> {
        if x.len() != self.dim() {
            return Err(RtoError::dim("likelihood argument", self.dim(), x.len()));
        }
        Ok(())
    }

    /// Unnormalized log-likelihood `-½ ‖L (data - model(x))‖²`.
    pub fn logd(&self, x: &[f64]) -> Result<f64> {
        self.check_len(x)?;
        self.distribution.log_kernel(&sub(&self.data, &self.model.forward(x)?))
    }

    pub fn gradient(&self, x: &[f64]) -> Result<Vec<f64>> {
        self.check_len(x)?;
        self.distribution.gradient(&self.data, Some(x))
    }
}

/// Product of one or more likelihoods and a prior.
#[derive(Debug, Clone)]
pub struct Posterior<P> {
    likelihoods: Vec<Likelihood>,
    prior: P,
}

impl<P: GaussianPrior> Posterior<P> {
    pub fn new(likelihood: Likelihood, prior: P) -> Result<Self> {
        Self::with_likelihoods(vec![likelihood], prior)
    }

    pub fn with_likelihoods(likelihoods: Vec<Likelihood>, prior: P) -> Result<Self> {
        if likelihoods.is_empty() {
            return Err(RtoError::InvalidTarget("a posterior needs at least one likelihood".into()));
        }
        if let Some(bad) = likelihoods.iter().find(|l| l.dim() != prior.dim()) {
            return Err(RtoError::dim("likelihood model domain", prior.dim(), bad.dim()));
        }
        Ok(Self { likelihoods, prior })
    }

    pub fn likelihoods(&self) -> &[Likelihood] {
        &self.likelihoods
    }

    pub fn prior(&self) -> &P {
        &self.prior
    }

    pub fn dim(&self) -> usize {
        self.prior.dim()
    }

    /// Unnormalized log-posterior.
    pub fn logd(&self, x: &[f64]) -> Result<f64> {
        self.likelihoods
            .iter()
            .try_fold(self.prior.logd(x)?, |acc, l| Ok(acc + l.logd(x)?))
    }

    pub fn gradient(&self, x: &[f64]) -> Result<Vec<f64>> {
        let mut grad = self.prior.gradient(x)?;
        for likelihood in &self.likelihoods {
            grad.iter_mut()
                .zip(likelihood.gradient(x)?)
                .for_each(|(g, l)| *g += l);
        }
        Ok(grad)
    }
}

impl Posterior<Gaussian> {
    /// Posterior of `data = A x + noise` with Gaussian noise and prior, both
    /// given by square-root precisions.
    pub fn from_linear_system(
        data: Vec<f64>,
        matrix: impl Into<Matrix>,
        likelihood_sqrtprec: impl Into<CovarianceInput>,
        prior_mean: Vec<f64>,
        prior_sqrtprec: impl Into<CovarianceInput>,
    ) -> Result<Self> {
        let model = LinearModel::from_matrix(matrix);
        let distribution = Gaussian::conditional(
            Arc::new(model),
            Parameterization::SqrtPrec(likelihood_sqrtprec.into()),
        )?;
        let prior = Gaussian::new(prior_mean, Parameterization::SqrtPrec(prior_sqrtprec.into()))?;
        Posterior::new(distribution.to_likelihood(data)?, prior)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use faer::Mat;

    fn example() -> Posterior<Gaussian> {
        let a = Mat::from_fn(3, 2, |i, j| if i == j { 1. } else { 0.5 });
        Posterior::from_linear_system(vec![1., 2., 0.], a, 2., vec![0., 0.], 1.).unwrap()
    }

    #[test]
    fn gradient_matches_finite_differences() {
        let posterior = example();
        let x = [0.3, -0.4];
        let grad = posterior.gradient(&x).unwrap();
        let h = 1e-6;
        for i in 0..2 {
            let mut up = x;
            let mut down = x;
            up[i] += h;
            down[i] -= h;
            let fd = (posterior.logd(&up).unwrap() - posterior.logd(&down).unwrap()) / (2. * h);
            assert_abs_diff_eq!(grad[i], fd, epsilon = 1e-5);
        }
    }

    #[test]
    fn logd_sums_prior_and_likelihood() {
        let posterior = example();
        let x = [1., 1.];
        // A x = [1.5, 1.5, 1.0], residual [-0.5, 0.5, -1.0] scaled by 2
        let expected = -0.5 * 2. - 0.5 * 4. * (0.25 + 0.25 + 1.);
        assert_abs_diff_eq!(posterior.logd(&x).unwrap(), expected, epsilon = 1e-12);
    }

    #[test]
    fn likelihood_requires_model_and_matching_data() {
        let plain = Gaussian::builder().mean(vec![0.; 2]).cov(1.).build().unwrap();
        assert!(matches!(plain.to_likelihood(vec![0.; 2]), Err(RtoError::InvalidTarget(_))));

        let model = Arc::new(LinearModel::from_matrix(Mat::from_fn(2, 3, |_, _| 1.)));
        let conditional = Gaussian::conditional(model, Parameterization::Cov(1.0.into())).unwrap();
        assert!(conditional.clone().to_likelihood(vec![0.; 3]).is_err());
        let likelihood = conditional.to_likelihood(vec![0.; 2]).unwrap();
        assert_eq!(likelihood.dim(), 3);
        let prior = Gaussian::builder().dim(2).cov(1.).build().unwrap();
        assert!(Posterior::new(likelihood, prior).is_err());
    }
}

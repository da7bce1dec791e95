use std::{f64::consts::PI, sync::Arc};

use faer::{
    linalg::solvers::{PartialPivLu, Solve},
    Mat,
};
use rand::Rng;

use crate::{
    error::{Result, RtoError},
    factorization::{diag_values, CovarianceInput, Factor, FactorizationOptions},
    math::{norm_sq, standard_normal, sub},
    model::{Continuous1D, ForwardModel, Geometry},
    operator::{LinearOperator, Matrix},
    parameterization::Parameterization,
    posterior::Likelihood,
    sparse,
};

/// Mean of a Gaussian: a fixed vector, or the output of a forward model
/// when the Gaussian is used as a likelihood.
#[derive(Debug, Clone)]
pub enum Mean {
    Fixed(Vec<f64>),
    Forward(Arc<dyn ForwardModel>),
}

/// Multivariate normal distribution.
///
/// Exactly one of covariance, precision or their square roots is the
/// mutable representation, chosen at construction. Every update of that
/// representation recomputes the factor in full.
#[derive(Debug, Clone)]
pub struct Gaussian {
    dim: usize,
    mean: Mean,
    parameterization: Parameterization,
    factor: Factor,
    options: FactorizationOptions,
    geometry: Arc<dyn Geometry>,
}

/// Collects the pieces of a [`Gaussian`] and checks that exactly one
/// covariance-like field is given.
#[derive(Debug, Default)]
pub struct GaussianBuilder {
    dim: Option<usize>,
    mean: Option<Mean>,
    cov: Option<CovarianceInput>,
    prec: Option<CovarianceInput>,
    sqrtcov: Option<CovarianceInput>,
    sqrtprec: Option<CovarianceInput>,
    options: FactorizationOptions,
    geometry: Option<Arc<dyn Geometry>>,
}

impl GaussianBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dim(mut self, dim: usize) -> Self {
        self.dim = Some(dim);
        self
    }

    pub fn mean(mut self, mean: impl Into<Vec<f64>>) -> Self {
        self.mean = Some(Mean::Fixed(mean.into()));
        self
    }

    /// Use the output of `model` as the mean.
    pub fn model(mut self, model: Arc<dyn ForwardModel>) -> Self {
        self.mean = Some(Mean::Forward(model));
        self
    }

    pub fn cov(mut self, cov: impl Into<CovarianceInput>) -> Self {
        self.cov = Some(cov.into());
        self
    }

    pub fn prec(mut self, prec: impl Into<CovarianceInput>) -> Self {
        self.prec = Some(prec.into());
        self
    }

    pub fn sqrtcov(mut self, sqrtcov: impl Into<CovarianceInput>) -> Self {
        self.sqrtcov = Some(sqrtcov.into());
        self
    }

    pub fn sqrtprec(mut self, sqrtprec: impl Into<CovarianceInput>) -> Self {
        self.sqrtprec = Some(sqrtprec.into());
        self
    }

    pub fn options(mut self, options: FactorizationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn geometry(mut self, geometry: Arc<dyn Geometry>) -> Self {
        self.geometry = Some(geometry);
        self
    }

    pub fn build(self) -> Result<Gaussian> {
        let given = [
            self.cov.map(Parameterization::Cov),
            self.prec.map(Parameterization::Prec),
            self.sqrtcov.map(Parameterization::SqrtCov),
            self.sqrtprec.map(Parameterization::SqrtPrec),
        ];
        let mut given = given.into_iter().flatten();
        let (Some(parameterization), None) = (given.next(), given.next()) else {
            return Err(RtoError::InvalidParameterization(
                "exactly one of cov, prec, sqrtcov or sqrtprec may be specified".into(),
            ));
        };

        let mean = match (self.mean, self.dim) {
            (Some(Mean::Fixed(mean)), Some(dim)) if mean.len() == 1 && dim > 1 => {
                Mean::Fixed(vec![mean[0]; dim])
            }
            (Some(mean), _) => mean,
            (None, Some(dim)) => Mean::Fixed(vec![0.; dim]),
            (None, None) => {
                return Err(RtoError::InvalidParameterization(
                    "a Gaussian needs a mean or a dimension".into(),
                ))
            }
        };
        let dim = match &mean {
            Mean::Fixed(mean) => mean.len(),
            Mean::Forward(model) => model.range_dim(),
        };
        if let Some(expected) = self.dim {
            if expected != dim {
                return Err(RtoError::dim("Gaussian mean", expected, dim));
            }
        }

        let factor = parameterization.factorize(dim, &self.options)?;
        let geometry = self
            .geometry
            .unwrap_or_else(|| Arc::new(Continuous1D::new(dim)));
        if geometry.dim() != dim {
            return Err(RtoError::dim("Gaussian geometry", dim, geometry.dim()));
        }
        Ok(Gaussian {
            dim,
            mean,
            parameterization,
            factor,
            options: self.options,
            geometry,
        })
    }
}

impl Gaussian {
    pub fn builder() -> GaussianBuilder {
        GaussianBuilder::new()
    }

    pub fn new(mean: Vec<f64>, parameterization: Parameterization) -> Result<Self> {
        Self::with_options(mean, parameterization, FactorizationOptions::default())
    }

    pub fn with_options(
        mean: Vec<f64>,
        parameterization: Parameterization,
        options: FactorizationOptions,
    ) -> Result<Self> {
        Self::assemble(Mean::Fixed(mean), parameterization, options)
    }

    /// A Gaussian whose mean is the output of `model`, the usual form of a
    /// data distribution.
    pub fn conditional(model: Arc<dyn ForwardModel>, parameterization: Parameterization) -> Result<Self> {
        Self::assemble(Mean::Forward(model), parameterization, FactorizationOptions::default())
    }

    fn assemble(mean: Mean, parameterization: Parameterization, options: FactorizationOptions) -> Result<Self> {
        let builder = GaussianBuilder {
            mean: Some(mean),
            options,
            ..Default::default()
        };
        let builder = match parameterization {
            Parameterization::Cov(value) => builder.cov(value),
            Parameterization::Prec(value) => builder.prec(value),
            Parameterization::SqrtCov(value) => builder.sqrtcov(value),
            Parameterization::SqrtPrec(value) => builder.sqrtprec(value),
        };
        builder.build()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn mean(&self) -> &Mean {
        &self.mean
    }

    /// The mean vector, if it does not depend on a forward model.
    pub fn mean_vector(&self) -> Result<&[f64]> {
        match &self.mean {
            Mean::Fixed(mean) => Ok(mean),
            Mean::Forward(_) => Err(RtoError::UnresolvedMean),
        }
    }

    pub fn model(&self) -> Option<&Arc<dyn ForwardModel>> {
        match &self.mean {
            Mean::Fixed(_) => None,
            Mean::Forward(model) => Some(model),
        }
    }

    pub fn parameterization(&self) -> &Parameterization {
        &self.parameterization
    }

    pub fn sqrtprec(&self) -> &Matrix {
        &self.factor.sqrtprec
    }

    /// Log-determinant of the covariance. `None` when the factorization
    /// could not provide one.
    pub fn logdet(&self) -> Option<f64> {
        self.factor.logdet
    }

    pub fn rank(&self) -> usize {
        self.factor.rank
    }

    pub fn prec(&self) -> Option<&Matrix> {
        self.factor.prec.as_ref()
    }

    pub fn cov(&self) -> Option<&Matrix> {
        self.factor.cov.as_ref()
    }

    pub fn options(&self) -> &FactorizationOptions {
        &self.options
    }

    pub fn geometry(&self) -> &Arc<dyn Geometry> {
        &self.geometry
    }

    pub fn set_mean(&mut self, mean: Vec<f64>) -> Result<()> {
        if mean.len() != self.dim {
            return Err(RtoError::dim("Gaussian mean", self.dim, mean.len()));
        }
        self.mean = Mean::Fixed(mean);
        Ok(())
    }

    /// Replace the covariance-like representation. Only the kind chosen at
    /// construction can be replaced; the factor is recomputed in full.
    pub fn set_parameterization(&mut self, parameterization: Parameterization) -> Result<()> {
        if !self.parameterization.same_kind(&parameterization) {
            return Err(RtoError::InvalidParameterization(format!(
                "mutable variables are mean and {}, cannot set {}",
                self.parameterization.name(),
                parameterization.name()
            )));
        }
        self.factor = parameterization.factorize(self.dim, &self.options)?;
        self.parameterization = parameterization;
        Ok(())
    }

    pub fn set_cov(&mut self, cov: impl Into<CovarianceInput>) -> Result<()> {
        self.set_parameterization(Parameterization::Cov(cov.into()))
    }

    pub fn set_prec(&mut self, prec: impl Into<CovarianceInput>) -> Result<()> {
        self.set_parameterization(Parameterization::Prec(prec.into()))
    }

    pub fn set_sqrtcov(&mut self, sqrtcov: impl Into<CovarianceInput>) -> Result<()> {
        self.set_parameterization(Parameterization::SqrtCov(sqrtcov.into()))
    }

    pub fn set_sqrtprec(&mut self, sqrtprec: impl Into<CovarianceInput>) -> Result<()> {
        self.set_parameterization(Parameterization::SqrtPrec(sqrtprec.into()))
    }

    pub fn sqrtprec_times_mean(&self) -> Result<Vec<f64>> {
        self.factor.sqrtprec.apply(self.mean_vector()?)
    }

    /// `prec · v`, evaluated through the square-root factor.
    pub(crate) fn prec_times(&self, v: &[f64]) -> Result<Vec<f64>> {
        let sqrtprec = &self.factor.sqrtprec;
        sqrtprec.apply_adjoint(&sqrtprec.apply(v)?)
    }

    /// `-½ ‖sqrtprec · dev‖²`
    pub(crate) fn log_kernel(&self, dev: &[f64]) -> Result<f64> {
        Ok(-0.5 * norm_sq(&self.factor.sqrtprec.apply(dev)?))
    }

    fn check_len(&self, x: &[f64]) -> Result<()> {
        if x.len() != self.dim {
            return Err(RtoError::dim("Gaussian argument", self.dim, x.len()));
        }
        Ok(())
    }

    /// Log-density up to the normalizing constant. Always available.
    pub fn logupdf(&self, x: &[f64]) -> Result<f64> {
        self.check_len(x)?;
        self.log_kernel(&sub(x, self.mean_vector()?))
    }

    pub fn logpdf(&self, x: &[f64]) -> Result<f64> {
        let logdet = self.factor.logdet.ok_or(RtoError::UndefinedNormalization)?;
        let normalization = -0.5 * (self.factor.rank as f64 * (2. * PI).ln() + logdet);
        Ok(normalization + self.logupdf(x)?)
    }

    pub fn pdf(&self, x: &[f64]) -> Result<f64> {
        Ok(self.logpdf(x)?.exp())
    }

    /// Gradient of the log-density with respect to `value`. When the mean
    /// is a forward model, `args` are its inputs and the gradient is taken
    /// with respect to them instead.
    pub fn gradient(&self, value: &[f64], args: Option<&[f64]>) -> Result<Vec<f64>> {
        if !self.geometry.is_identity() && !self.geometry.has_gradient() {
            return Err(RtoError::GeometryMismatch(self.geometry.name()));
        }
        self.check_len(value)?;
        match &self.mean {
            Mean::Fixed(mean) => {
                let mut grad = self.prec_times(&sub(value, mean))?;
                grad.iter_mut().for_each(|g| *g = -*g);
                Ok(grad)
            }
            Mean::Forward(model) => {
                let args = args.ok_or(RtoError::UnresolvedMean)?;
                if args.len() != model.domain_dim() {
                    return Err(RtoError::dim("model input", model.domain_dim(), args.len()));
                }
                let dev = sub(value, &model.forward(args)?);
                model.gradient(&self.prec_times(&dev)?, args)
            }
        }
    }

    /// Draw `n` samples as the columns of a `dim x n` matrix, through
    /// `x = mean + sqrtprec⁻¹ e` with `e` standard normal.
    pub fn sample<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Result<Mat<f64>> {
        let mean = self.mean_vector()?;
        let solver = PerturbationSolver::new(&self.factor.sqrtprec, self.factor.rank)?;
        let mut out = Mat::zeros(self.dim, n);
        for j in 0..n {
            let e = standard_normal(rng, self.factor.sqrtprec.nrows());
            let z = solver.solve(&e)?;
            out.col_as_slice_mut(j)
                .iter_mut()
                .zip(mean.iter().zip(z))
                .for_each(|(out, (m, z))| *out = m + z);
        }
        Ok(out)
    }

    /// Bind observed data, turning a conditional Gaussian into a likelihood
    /// over the model inputs.
    pub fn to_likelihood(self, data: Vec<f64>) -> Result<Likelihood> {
        Likelihood::new(self, data)
    }
}

/// Solves `sqrtprec · z = e` for the sampling perturbation.
enum PerturbationSolver<'a> {
    Lower(&'a Matrix),
    Upper(&'a Matrix),
    Lu(PartialPivLu<f64>),
    Pseudoinverse {
        u: Mat<f64>,
        s_inv: Vec<f64>,
        v: Mat<f64>,
    },
}

impl<'a> PerturbationSolver<'a> {
    fn new(sqrtprec: &'a Matrix, rank: usize) -> Result<Self> {
        let square = sqrtprec.nrows() == sqrtprec.ncols();
        if square && rank == sqrtprec.ncols() {
            if sqrtprec.is_lower_triangular() {
                return Ok(PerturbationSolver::Lower(sqrtprec));
            }
            if sqrtprec.is_upper_triangular() {
                return Ok(PerturbationSolver::Upper(sqrtprec));
            }
            return Ok(PerturbationSolver::Lu(sqrtprec.to_dense().partial_piv_lu()));
        }
        let dense = sqrtprec.to_dense();
        let svd = dense
            .thin_svd()
            .map_err(|err| RtoError::Factorization(format!("singular value decomposition failed: {err:?}")))?;
        let s = diag_values(svd.S());
        let smax = s.iter().fold(0f64, |acc, v| acc.max(*v));
        let cutoff = smax * f64::EPSILON * dense.nrows().max(dense.ncols()) as f64;
        Ok(PerturbationSolver::Pseudoinverse {
            u: svd.U().to_owned(),
            s_inv: s.iter().map(|&v| if v > cutoff { v.recip() } else { 0. }).collect(),
            v: svd.V().to_owned(),
        })
    }

    fn solve(&self, e: &[f64]) -> Result<Vec<f64>> {
        match self {
            PerturbationSolver::Lower(Matrix::Sparse(mat)) => sparse::solve_lower_triangular(mat, e),
            PerturbationSolver::Upper(Matrix::Sparse(mat)) => sparse::solve_upper_triangular(mat, e),
            PerturbationSolver::Lower(Matrix::Dense(mat)) => {
                let n = mat.nrows();
                let mut x = vec![0f64; n];
                for i in 0..n {
                    let acc = (0..i).fold(e[i], |acc, j| acc - mat[(i, j)] * x[j]);
                    x[i] = acc / mat[(i, i)];
                }
                Ok(x)
            }
            PerturbationSolver::Upper(Matrix::Dense(mat)) => {
                let n = mat.nrows();
                let mut x = vec![0f64; n];
                for i in (0..n).rev() {
                    let acc = ((i + 1)..n).fold(e[i], |acc, j| acc - mat[(i, j)] * x[j]);
                    x[i] = acc / mat[(i, i)];
                }
                Ok(x)
            }
            PerturbationSolver::Lu(lu) => {
                let rhs = Mat::from_fn(e.len(), 1, |i, _| e[i]);
                let sol = lu.solve(rhs.as_ref());
                Ok((0..sol.nrows()).map(|i| sol[(i, 0)]).collect())
            }
            PerturbationSolver::Pseudoinverse { u, s_inv, v } => {
                let coeffs: Vec<f64> = (0..u.ncols())
                    .map(|r| s_inv[r] * (0..u.nrows()).map(|i| u[(i, r)] * e[i]).sum::<f64>())
                    .collect();
                Ok((0..v.nrows())
                    .map(|j| (0..v.ncols()).map(|r| v[(j, r)] * coeffs[r]).sum())
                    .collect())
            }
        }
    }
}

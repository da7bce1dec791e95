use std::{fmt::Debug, sync::Arc};

use faer::Mat;

use crate::{
    error::{Result, RtoError},
    operator::{ClosureOperator, LinearOperator, Matrix},
};

/// Maps between parameter values and their interpretation.
pub trait Geometry: Debug + Send + Sync {
    fn dim(&self) -> usize;

    /// Whether function values and parameters coincide.
    fn is_identity(&self) -> bool {
        true
    }

    /// Whether the geometry can push a gradient through its own mapping.
    fn has_gradient(&self) -> bool {
        false
    }

    fn name(&self) -> String;
}

/// Parameters living on a one dimensional grid, the identity geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Continuous1D {
    pub dim: usize,
}

impl Continuous1D {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl Geometry for Continuous1D {
    fn dim(&self) -> usize {
        self.dim
    }

    fn name(&self) -> String {
        format!("Continuous1D({})", self.dim)
    }
}

/// A forward model `x -> y`.
pub trait ForwardModel: Debug + Send + Sync {
    fn domain_dim(&self) -> usize;
    fn range_dim(&self) -> usize;

    fn forward(&self, x: &[f64]) -> Result<Vec<f64>>;

    /// Apply the transposed Jacobian at `at` to `direction`.
    fn gradient(&self, direction: &[f64], at: &[f64]) -> Result<Vec<f64>>;

    fn as_linear(&self) -> Option<&LinearModel> {
        None
    }

    fn is_linear(&self) -> bool {
        self.as_linear().is_some()
    }

    fn adjoint(&self, y: &[f64]) -> Result<Vec<f64>> {
        self.as_linear()
            .ok_or(RtoError::NotLinear)?
            .apply_adjoint(y)
    }
}

/// A linear forward model, either an explicit matrix or a pair of
/// forward and adjoint closures.
#[derive(Debug, Clone)]
pub enum LinearModel {
    Matrix(Matrix),
    Operator(ClosureOperator),
}

impl LinearModel {
    pub fn from_matrix(matrix: impl Into<Matrix>) -> Self {
        LinearModel::Matrix(matrix.into())
    }

    /// A matrix-free model `range_dim x domain_dim`.
    pub fn from_closures<F, G>(range_dim: usize, domain_dim: usize, forward: F, adjoint: G) -> Self
    where
        F: Fn(&[f64]) -> Vec<f64> + Send + Sync + 'static,
        G: Fn(&[f64]) -> Vec<f64> + Send + Sync + 'static,
    {
        LinearModel::Operator(ClosureOperator::new(range_dim, domain_dim, forward, adjoint))
    }

    pub fn matrix(&self) -> Option<&Matrix> {
        match self {
            LinearModel::Matrix(matrix) => Some(matrix),
            LinearModel::Operator(_) => None,
        }
    }

    /// Explicit matrix of the model. Closure models are evaluated on the
    /// unit vectors, one column at a time.
    pub fn to_matrix(&self) -> Result<Matrix> {
        Ok(match self {
            LinearModel::Matrix(matrix) => matrix.clone(),
            LinearModel::Operator(op) => Matrix::Dense(op.to_matrix()?),
        })
    }
}

impl From<Matrix> for LinearModel {
    fn from(value: Matrix) -> Self {
        LinearModel::Matrix(value)
    }
}

impl From<Mat<f64>> for LinearModel {
    fn from(value: Mat<f64>) -> Self {
        LinearModel::Matrix(Matrix::Dense(value))
    }
}

impl LinearOperator for LinearModel {
    fn nrows(&self) -> usize {
        match self {
            LinearModel::Matrix(matrix) => matrix.nrows(),
            LinearModel::Operator(op) => op.nrows(),
        }
    }

    fn ncols(&self) -> usize {
        match self {
            LinearModel::Matrix(matrix) => matrix.ncols(),
            LinearModel::Operator(op) => op.ncols(),
        }
    }

    fn apply(&self, x: &[f64]) -> Result<Vec<f64>> {
        match self {
            LinearModel::Matrix(matrix) => matrix.apply(x),
            LinearModel::Operator(op) => op.apply(x),
        }
    }

    fn apply_adjoint(&self, y: &[f64]) -> Result<Vec<f64>> {
        match self {
            LinearModel::Matrix(matrix) => matrix.apply_adjoint(y),
            LinearModel::Operator(op) => op.apply_adjoint(y),
        }
    }
}

impl ForwardModel for LinearModel {
    fn domain_dim(&self) -> usize {
        self.ncols()
    }

    fn range_dim(&self) -> usize {
        self.nrows()
    }

    fn forward(&self, x: &[f64]) -> Result<Vec<f64>> {
        self.apply(x)
    }

    fn gradient(&self, direction: &[f64], _at: &[f64]) -> Result<Vec<f64>> {
        self.apply_adjoint(direction)
    }

    fn as_linear(&self) -> Option<&LinearModel> {
        Some(self)
    }
}

type ForwardFn = Arc<dyn Fn(&[f64]) -> Vec<f64> + Send + Sync>;
type GradientFn = Arc<dyn Fn(&[f64], &[f64]) -> Vec<f64> + Send + Sync>;

/// A general, possibly non-linear, forward model.
#[derive(Clone)]
pub struct Model {
    domain_dim: usize,
    range_dim: usize,
    forward: ForwardFn,
    gradient: Option<GradientFn>,
}

impl Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("domain_dim", &self.domain_dim)
            .field("range_dim", &self.range_dim)
            .field("has_gradient", &self.gradient.is_some())
            .finish()
    }
}

impl Model {
    pub fn new<F>(range_dim: usize, domain_dim: usize, forward: F) -> Self
    where
        F: Fn(&[f64]) -> Vec<f64> + Send + Sync + 'static,
    {
        Self {
            domain_dim,
            range_dim,
            forward: Arc::new(forward),
            gradient: None,
        }
    }

    /// Attach `(direction, at) -> Jᵀ(at) direction`.
    pub fn with_gradient<G>(mut self, gradient: G) -> Self
    where
        G: Fn(&[f64], &[f64]) -> Vec<f64> + Send + Sync + 'static,
    {
        self.gradient = Some(Arc::new(gradient));
        self
    }
}

impl ForwardModel for Model {
    fn domain_dim(&self) -> usize {
        self.domain_dim
    }

    fn range_dim(&self) -> usize {
        self.range_dim
    }

    fn forward(&self, x: &[f64]) -> Result<Vec<f64>> {
        if x.len() != self.domain_dim {
            return Err(RtoError::dim("model input", self.domain_dim, x.len()));
        }
        let out = (self.forward)(x);
        if out.len() != self.range_dim {
            return Err(RtoError::dim("model output", self.range_dim, out.len()));
        }
        Ok(out)
    }

    fn gradient(&self, direction: &[f64], at: &[f64]) -> Result<Vec<f64>> {
        let Some(gradient) = &self.gradient else {
            return Err(RtoError::InvalidTarget("model does not define a gradient".into()));
        };
        if direction.len() != self.range_dim {
            return Err(RtoError::dim("gradient direction", self.range_dim, direction.len()));
        }
        if at.len() != self.domain_dim {
            return Err(RtoError::dim("gradient point", self.domain_dim, at.len()));
        }
        Ok(gradient(direction, at))
    }
}

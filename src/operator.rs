use std::{fmt::Debug, sync::Arc};

use faer::Mat;

use crate::{
    error::{Result, RtoError},
    math::{axpy, vector_dot},
    sparse::{self, SparseMatrix},
};

/// A linear map with a forward and an adjoint application.
pub trait LinearOperator: Send + Sync {
    fn nrows(&self) -> usize;
    fn ncols(&self) -> usize;

    /// Compute `A x`. Fails if `x` does not have `ncols` entries.
    fn apply(&self, x: &[f64]) -> Result<Vec<f64>>;

    /// Compute `Aᵀ y`. Fails if `y` does not have `nrows` entries.
    fn apply_adjoint(&self, y: &[f64]) -> Result<Vec<f64>>;

    fn shape(&self) -> (usize, usize) {
        (self.nrows(), self.ncols())
    }
}

/// An explicit matrix, stored dense or sparse.
#[derive(Debug, Clone)]
pub enum Matrix {
    Dense(Mat<f64>),
    Sparse(SparseMatrix),
}

impl From<Mat<f64>> for Matrix {
    fn from(value: Mat<f64>) -> Self {
        Matrix::Dense(value)
    }
}

impl From<SparseMatrix> for Matrix {
    fn from(value: SparseMatrix) -> Self {
        Matrix::Sparse(value)
    }
}

impl Matrix {
    pub fn identity(dim: usize, sparse: bool) -> Self {
        Self::from_diagonal(&vec![1f64; dim], sparse)
    }

    pub fn from_diagonal(diag: &[f64], sparse: bool) -> Self {
        if sparse {
            Matrix::Sparse(sparse::from_diagonal(diag))
        } else {
            let n = diag.len();
            Matrix::Dense(Mat::from_fn(n, n, |i, j| if i == j { diag[i] } else { 0. }))
        }
    }

    pub fn is_sparse(&self) -> bool {
        matches!(self, Matrix::Sparse(_))
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        match self {
            Matrix::Dense(mat) => mat[(i, j)],
            Matrix::Sparse(mat) => sparse::get(mat, i, j),
        }
    }

    pub fn to_dense(&self) -> Mat<f64> {
        match self {
            Matrix::Dense(mat) => mat.clone(),
            Matrix::Sparse(mat) => mat.to_dense(),
        }
    }

    pub fn transpose(&self) -> Result<Matrix> {
        Ok(match self {
            Matrix::Dense(mat) => Matrix::Dense(mat.transpose().to_owned()),
            Matrix::Sparse(mat) => Matrix::Sparse(sparse::transpose(mat)?),
        })
    }

    pub fn scale(&self, factor: f64) -> Matrix {
        match self {
            Matrix::Dense(mat) => Matrix::Dense(Mat::from_fn(mat.nrows(), mat.ncols(), |i, j| {
                factor * mat[(i, j)]
            })),
            Matrix::Sparse(mat) => Matrix::Sparse(sparse::scale(mat, factor)),
        }
    }

    pub fn is_lower_triangular(&self) -> bool {
        match self {
            Matrix::Dense(mat) => {
                (0..mat.ncols()).all(|j| (0..j.min(mat.nrows())).all(|i| mat[(i, j)] == 0.))
            }
            Matrix::Sparse(mat) => sparse::is_lower_triangular(mat),
        }
    }

    pub fn is_upper_triangular(&self) -> bool {
        match self {
            Matrix::Dense(mat) => {
                (0..mat.ncols()).all(|j| ((j + 1)..mat.nrows()).all(|i| mat[(i, j)] == 0.))
            }
            Matrix::Sparse(mat) => sparse::is_upper_triangular(mat),
        }
    }

    /// Product `self * rhs`. Two sparse factors stay sparse, anything else is dense.
    pub fn matmul(&self, rhs: &Matrix) -> Result<Matrix> {
        if self.ncols() != rhs.nrows() {
            return Err(RtoError::dim("matrix product", self.ncols(), rhs.nrows()));
        }
        Ok(match (self, rhs) {
            (Matrix::Sparse(a), Matrix::Sparse(b)) => Matrix::Sparse(sparse::matmul(a, b)?),
            (Matrix::Sparse(a), Matrix::Dense(b)) => Matrix::Dense(sparse::matmul_dense(a, b.as_ref())?),
            (Matrix::Dense(a), Matrix::Sparse(b)) => Matrix::Dense(sparse::dense_matmul(a.as_ref(), b)?),
            (Matrix::Dense(a), Matrix::Dense(b)) => Matrix::Dense(a.as_ref() * b.as_ref()),
        })
    }

    /// Stack blocks vertically. The result is sparse if any block is.
    pub fn vstack(blocks: &[Matrix]) -> Result<Matrix> {
        let Some(first) = blocks.first() else {
            return Err(RtoError::InvalidTarget("cannot stack an empty list of operators".into()));
        };
        let ncols = first.ncols();
        if let Some(bad) = blocks.iter().find(|b| b.ncols() != ncols) {
            return Err(RtoError::dim("stacked operator columns", ncols, bad.ncols()));
        }
        if blocks.iter().any(Matrix::is_sparse) {
            let converted: Vec<SparseMatrix> = blocks
                .iter()
                .map(|block| match block {
                    Matrix::Sparse(mat) => mat.clone(),
                    Matrix::Dense(mat) => sparse::from_dense(mat.as_ref()),
                })
                .collect();
            let refs: Vec<&SparseMatrix> = converted.iter().collect();
            return Ok(Matrix::Sparse(sparse::vstack(&refs)?));
        }
        let nrows = blocks.iter().map(Matrix::nrows).sum();
        let mut out = Mat::zeros(nrows, ncols);
        let mut offset = 0;
        for block in blocks {
            if let Matrix::Dense(mat) = block {
                for j in 0..ncols {
                    out.col_as_slice_mut(j)[offset..offset + mat.nrows()]
                        .copy_from_slice(mat.col_as_slice(j));
                }
                offset += mat.nrows();
            }
        }
        Ok(Matrix::Dense(out))
    }
}

impl LinearOperator for Matrix {
    fn nrows(&self) -> usize {
        match self {
            Matrix::Dense(mat) => mat.nrows(),
            Matrix::Sparse(mat) => mat.nrows(),
        }
    }

    fn ncols(&self) -> usize {
        match self {
            Matrix::Dense(mat) => mat.ncols(),
            Matrix::Sparse(mat) => mat.ncols(),
        }
    }

    fn apply(&self, x: &[f64]) -> Result<Vec<f64>> {
        match self {
            Matrix::Dense(mat) => {
                if x.len() != mat.ncols() {
                    return Err(RtoError::dim("matrix-vector product", mat.ncols(), x.len()));
                }
                let mut out = vec![0f64; mat.nrows()];
                for (j, &xj) in x.iter().enumerate() {
                    if xj != 0. {
                        axpy(mat.col_as_slice(j), &mut out, xj);
                    }
                }
                Ok(out)
            }
            Matrix::Sparse(mat) => sparse::mul_vec(mat, x),
        }
    }

    fn apply_adjoint(&self, y: &[f64]) -> Result<Vec<f64>> {
        match self {
            Matrix::Dense(mat) => {
                if y.len() != mat.nrows() {
                    return Err(RtoError::dim("adjoint product", mat.nrows(), y.len()));
                }
                Ok((0..mat.ncols())
                    .map(|j| vector_dot(mat.col_as_slice(j), y))
                    .collect())
            }
            Matrix::Sparse(mat) => sparse::transpose_mul_vec(mat, y),
        }
    }
}

type VecFn = Arc<dyn Fn(&[f64]) -> Result<Vec<f64>> + Send + Sync>;

/// A matrix-free operator defined by a forward and an adjoint closure.
#[derive(Clone)]
pub struct ClosureOperator {
    nrows: usize,
    ncols: usize,
    forward: VecFn,
    adjoint: VecFn,
}

impl Debug for ClosureOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClosureOperator")
            .field("nrows", &self.nrows)
            .field("ncols", &self.ncols)
            .finish_non_exhaustive()
    }
}

impl ClosureOperator {
    pub fn new<F, G>(nrows: usize, ncols: usize, forward: F, adjoint: G) -> Self
    where
        F: Fn(&[f64]) -> Vec<f64> + Send + Sync + 'static,
        G: Fn(&[f64]) -> Vec<f64> + Send + Sync + 'static,
    {
        Self::try_new(nrows, ncols, move |x| Ok(forward(x)), move |y| Ok(adjoint(y)))
    }

    /// Like [`ClosureOperator::new`], for closures that can fail.
    pub fn try_new<F, G>(nrows: usize, ncols: usize, forward: F, adjoint: G) -> Self
    where
        F: Fn(&[f64]) -> Result<Vec<f64>> + Send + Sync + 'static,
        G: Fn(&[f64]) -> Result<Vec<f64>> + Send + Sync + 'static,
    {
        Self {
            nrows,
            ncols,
            forward: Arc::new(forward),
            adjoint: Arc::new(adjoint),
        }
    }

    /// Materialize the operator by applying it to unit vectors.
    pub fn to_matrix(&self) -> Result<Mat<f64>> {
        let mut out = Mat::zeros(self.nrows, self.ncols);
        let mut unit = vec![0f64; self.ncols];
        for j in 0..self.ncols {
            unit[j] = 1.;
            let col = self.apply(&unit)?;
            out.col_as_slice_mut(j).copy_from_slice(&col);
            unit[j] = 0.;
        }
        Ok(out)
    }
}

/// Run a closure after checking the input length, then check the output
/// length.
fn checked_call(f: &VecFn, input: &[f64], expected_in: usize, expected_out: usize) -> Result<Vec<f64>> {
    if input.len() != expected_in {
        return Err(RtoError::dim("operator input", expected_in, input.len()));
    }
    let out = f(input)?;
    if out.len() != expected_out {
        return Err(RtoError::dim("operator output", expected_out, out.len()));
    }
    Ok(out)
}

impl LinearOperator for ClosureOperator {
    fn nrows(&self) -> usize {
        self.nrows
    }

    fn ncols(&self) -> usize {
        self.ncols
    }

    fn apply(&self, x: &[f64]) -> Result<Vec<f64>> {
        checked_call(&self.forward, x, self.ncols, self.nrows)
    }

    fn apply_adjoint(&self, y: &[f64]) -> Result<Vec<f64>> {
        checked_call(&self.adjoint, y, self.nrows, self.ncols)
    }
}

//! Dense and sparse factorizations of symmetric matrices.
//!
//! Nothing in here knows about distributions: the kernel classifies a
//! matrix-like input, and provides Cholesky and eigen based square roots
//! together with log-determinants and ranks.

use faer::{
    diag::DiagRef,
    linalg::solvers::{Llt, Solve},
    Mat, MatRef, Side,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, RtoError},
    operator::Matrix,
    sparse::{self, SparseCholesky, SparseMatrix},
};

/// Which sparse factorization is available to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SparseBackend {
    /// Sparse Cholesky with exact log-determinants.
    #[default]
    Cholesky,
    /// Generic inverse plus an LDLᵀ square root. Log-determinants are not
    /// available on this path.
    Unavailable,
}

/// Settings for the covariance factorization.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FactorizationOptions {
    /// Dimension above which diagonal factors are stored sparse and full
    /// dense matrices are factorized through the symmetric eigensolver.
    pub sparse_threshold: usize,
    pub sparse_backend: SparseBackend,
}

impl Default for FactorizationOptions {
    fn default() -> Self {
        Self {
            sparse_threshold: 75,
            sparse_backend: SparseBackend::Cholesky,
        }
    }
}

impl FactorizationOptions {
    pub(crate) fn use_sparse(&self, dim: usize) -> bool {
        dim > self.sparse_threshold
    }
}

/// A user supplied covariance-like quantity.
#[derive(Debug, Clone)]
pub enum CovarianceInput {
    /// A multiple of the identity.
    Scalar(f64),
    /// The diagonal entries.
    Vector(Vec<f64>),
    Dense(Mat<f64>),
    Sparse(SparseMatrix),
}

impl From<f64> for CovarianceInput {
    fn from(value: f64) -> Self {
        CovarianceInput::Scalar(value)
    }
}

impl From<Vec<f64>> for CovarianceInput {
    fn from(value: Vec<f64>) -> Self {
        CovarianceInput::Vector(value)
    }
}

impl From<&[f64]> for CovarianceInput {
    fn from(value: &[f64]) -> Self {
        CovarianceInput::Vector(value.to_vec())
    }
}

impl From<Mat<f64>> for CovarianceInput {
    fn from(value: Mat<f64>) -> Self {
        CovarianceInput::Dense(value)
    }
}

impl From<SparseMatrix> for CovarianceInput {
    fn from(value: SparseMatrix) -> Self {
        CovarianceInput::Sparse(value)
    }
}

impl From<Matrix> for CovarianceInput {
    fn from(value: Matrix) -> Self {
        match value {
            Matrix::Dense(mat) => CovarianceInput::Dense(mat),
            Matrix::Sparse(mat) => CovarianceInput::Sparse(mat),
        }
    }
}

/// Structural class of an input, decided in the order
/// scalar, vector, diagonal, full.
#[derive(Debug, Clone)]
pub enum Shape<'a> {
    Scalar(f64),
    Vector(Vec<f64>),
    Diagonal(Vec<f64>),
    Dense(&'a Mat<f64>),
    Sparse(&'a SparseMatrix),
}

/// Classify an input for a density of dimension `dim`.
pub fn classify(input: &CovarianceInput, dim: usize) -> Result<Shape<'_>> {
    Ok(match input {
        CovarianceInput::Scalar(value) => Shape::Scalar(*value),
        CovarianceInput::Vector(values) => {
            if values.len() == 1 {
                Shape::Scalar(values[0])
            } else if values.len() == dim {
                Shape::Vector(values.clone())
            } else {
                return Err(RtoError::dim("diagonal entries", dim, values.len()));
            }
        }
        CovarianceInput::Dense(mat) => {
            let (nrows, ncols) = (mat.nrows(), mat.ncols());
            if nrows == 1 && ncols == 1 {
                Shape::Scalar(mat[(0, 0)])
            } else if (nrows == 1 || ncols == 1) && nrows * ncols == dim {
                Shape::Vector((0..dim).map(|k| if ncols == 1 { mat[(k, 0)] } else { mat[(0, k)] }).collect())
            } else if nrows == ncols && is_dense_diagonal(mat.as_ref()) {
                if nrows != dim {
                    return Err(RtoError::dim("diagonal matrix", dim, nrows));
                }
                Shape::Diagonal((0..nrows).map(|i| mat[(i, i)]).collect())
            } else {
                Shape::Dense(mat)
            }
        }
        CovarianceInput::Sparse(mat) => {
            if (mat.nrows(), mat.ncols()) == (1, 1) {
                Shape::Scalar(sparse::get(mat, 0, 0))
            } else if mat.nrows() == mat.ncols() && sparse::is_diagonal(mat) {
                if mat.nrows() != dim {
                    return Err(RtoError::dim("diagonal matrix", dim, mat.nrows()));
                }
                Shape::Diagonal(sparse::diagonal(mat))
            } else {
                Shape::Sparse(mat)
            }
        }
    })
}

fn is_dense_diagonal(mat: MatRef<'_, f64>) -> bool {
    (0..mat.ncols()).all(|j| (0..mat.nrows()).all(|i| i == j || mat[(i, j)] == 0.))
}

/// Canonical factorization of a Gaussian's precision.
#[derive(Debug, Clone)]
pub struct Factor {
    /// `R` with `Rᵀ R = prec`.
    pub sqrtprec: Matrix,
    /// Log-determinant of the covariance, when the factorization path
    /// produces an exact one.
    pub logdet: Option<f64>,
    pub rank: usize,
    pub prec: Option<Matrix>,
    pub cov: Option<Matrix>,
}

/// Closed form factor for `sqrtprec = diag(sqrt_diag)`.
pub(crate) fn diagonal_factor(sqrt_diag: Vec<f64>, sparse: bool) -> Factor {
    let prec: Vec<f64> = sqrt_diag.iter().map(|s| s * s).collect();
    let cov: Vec<f64> = prec.iter().map(|p| p.recip()).collect();
    let logdet = -prec.iter().map(|p| p.ln()).sum::<f64>();
    Factor {
        rank: sqrt_diag.len(),
        logdet: Some(logdet),
        sqrtprec: Matrix::from_diagonal(&sqrt_diag, sparse),
        prec: Some(Matrix::from_diagonal(&prec, sparse)),
        cov: Some(Matrix::from_diagonal(&cov, sparse)),
    }
}

/// Symmetry check with the usual `allclose` tolerances.
pub(crate) fn check_symmetric(mat: MatRef<'_, f64>, which: &'static str) -> Result<()> {
    if mat.nrows() != mat.ncols() {
        return Err(RtoError::AsymmetricMatrix { which });
    }
    let n = mat.nrows();
    for j in 0..n {
        for i in (j + 1)..n {
            let (a, b) = (mat[(i, j)], mat[(j, i)]);
            if (a - b).abs() > 1e-8 + 1e-5 * b.abs() {
                return Err(RtoError::AsymmetricMatrix { which });
            }
        }
    }
    Ok(())
}

pub(crate) fn diag_values(diag: DiagRef<'_, f64>) -> Vec<f64> {
    let col = diag.column_vector().as_mat();
    (0..col.nrows()).map(|i| col[(i, 0)]).collect()
}

/// Dense Cholesky factorization `L Lᵀ = A`.
pub(crate) struct DenseCholesky {
    llt: Llt<f64>,
    dim: usize,
}

impl DenseCholesky {
    /// Returns `None` when the matrix is not numerically positive definite.
    pub(crate) fn new(mat: MatRef<'_, f64>) -> Option<Self> {
        let llt = Llt::new(mat, Side::Lower).ok()?;
        Some(Self {
            llt,
            dim: mat.nrows(),
        })
    }

    pub(crate) fn l(&self) -> MatRef<'_, f64> {
        self.llt.L()
    }

    /// Log-determinant of `A`.
    pub(crate) fn logdet(&self) -> f64 {
        let l = self.l();
        2. * (0..self.dim).map(|i| l[(i, i)].ln()).sum::<f64>()
    }

    pub(crate) fn inverse(&self) -> Mat<f64> {
        let eye = Mat::from_fn(self.dim, self.dim, |i, j| if i == j { 1. } else { 0. });
        self.llt.solve(eye.as_ref())
    }

    /// The upper triangular square root `Lᵀ`.
    pub(crate) fn upper(&self) -> Mat<f64> {
        self.l().transpose().to_owned()
    }
}

/// Symmetric eigendecomposition with a numerical-rank cutoff.
pub(crate) struct SymmetricEigen {
    values: Vec<f64>,
    vectors: Mat<f64>,
    eps: f64,
}

/// How eigenvalues enter a scaled eigenvector square root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EigenRoot {
    /// Columns scaled by `sqrt(s)`.
    Direct,
    /// Columns scaled by `sqrt(1 / s)`, zero below the cutoff.
    Pseudoinverse,
}

impl SymmetricEigen {
    pub(crate) fn new(mat: MatRef<'_, f64>) -> Result<Self> {
        let eig = mat
            .self_adjoint_eigen(Side::Lower)
            .map_err(|err| RtoError::Factorization(format!("symmetric eigendecomposition failed: {err:?}")))?;
        let values = diag_values(eig.S());
        let vectors = eig.U().to_owned();
        let max_abs = values.iter().fold(0f64, |acc, v| acc.max(v.abs()));
        let eps = 1e6 * f64::EPSILON * max_abs;
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        if min < -eps {
            return Err(RtoError::NotPositiveSemiDefinite {
                detail: format!("smallest eigenvalue {min:e}"),
            });
        }
        Ok(Self {
            values,
            vectors,
            eps,
        })
    }

    fn significant(&self) -> impl Iterator<Item = f64> + '_ {
        self.values.iter().copied().filter(|&s| s > self.eps)
    }

    pub(crate) fn rank(&self) -> usize {
        self.significant().count()
    }

    /// Log pseudo-determinant over the eigenvalues above the cutoff.
    pub(crate) fn log_pdet(&self) -> f64 {
        self.significant().map(f64::ln).sum()
    }

    /// Returns `Uᵀ`, where the columns of `U` are the scaled eigenvectors,
    /// with a deterministic sign per column.
    pub(crate) fn root(&self, kind: EigenRoot) -> Mat<f64> {
        let n = self.vectors.nrows();
        let k = self.values.len();
        let scale: Vec<f64> = self
            .values
            .iter()
            .map(|&s| match kind {
                _ if s <= self.eps => 0.,
                EigenRoot::Direct => s.sqrt(),
                EigenRoot::Pseudoinverse => s.recip().sqrt(),
            })
            .collect();
        let mut u = Mat::from_fn(n, k, |i, j| self.vectors[(i, j)] * scale[j]);
        for j in 0..k {
            let sign = column_sign(u.as_ref(), j);
            if sign < 0. {
                u.col_as_slice_mut(j).iter_mut().for_each(|v| *v = -*v);
            }
        }
        u.transpose().to_owned()
    }
}

/// Sign of the diagonal-aligned entry of column `j`, falling back to the
/// largest-magnitude entry when that one vanishes.
fn column_sign(u: MatRef<'_, f64>, j: usize) -> f64 {
    let col_max = (0..u.nrows())
        .map(|i| u[(i, j)])
        .fold(0f64, |acc, v| if v.abs() > acc.abs() { v } else { acc });
    if col_max == 0. {
        return 1.;
    }
    let pivot = if j < u.nrows() { u[(j, j)] } else { 0. };
    if pivot.abs() > 1e-12 * col_max.abs() {
        pivot.signum()
    } else {
        col_max.signum()
    }
}

/// Inverse of a sparse matrix without a symmetric factorization.
pub(crate) fn generic_sparse_inverse(mat: &SparseMatrix) -> Result<SparseMatrix> {
    sparse::lu_inverse(mat)
}

/// Sparse Cholesky of a symmetric positive definite matrix, mapping
/// failed pivots to a positive-semidefiniteness error.
pub(crate) fn sparse_cholesky(mat: &SparseMatrix) -> Result<SparseCholesky> {
    if !sparse::is_symmetric(mat, 1e-10) {
        return Err(RtoError::AsymmetricMatrix { which: "sparse" });
    }
    SparseCholesky::factorize(mat)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use pretty_assertions::assert_eq;

    #[test]
    fn classification_order() {
        assert!(matches!(classify(&CovarianceInput::Scalar(2.), 3).unwrap(), Shape::Scalar(v) if v == 2.));
        assert!(matches!(
            classify(&CovarianceInput::Vector(vec![3.]), 3).unwrap(),
            Shape::Scalar(v) if v == 3.
        ));
        match classify(&CovarianceInput::Vector(vec![1., 2., 3.]), 3).unwrap() {
            Shape::Vector(v) => assert_eq!(v, vec![1., 2., 3.]),
            other => panic!("unexpected shape {other:?}"),
        }
        assert!(classify(&CovarianceInput::Vector(vec![1., 2.]), 3).is_err());

        let col = CovarianceInput::Dense(Mat::from_fn(3, 1, |i, _| i as f64 + 1.));
        match classify(&col, 3).unwrap() {
            Shape::Vector(v) => assert_eq!(v, vec![1., 2., 3.]),
            other => panic!("unexpected shape {other:?}"),
        }
        let diag = CovarianceInput::Dense(Mat::from_fn(3, 3, |i, j| if i == j { 2. } else { 0. }));
        match classify(&diag, 3).unwrap() {
            Shape::Diagonal(v) => assert_eq!(v, vec![2., 2., 2.]),
            other => panic!("unexpected shape {other:?}"),
        }
        let full = CovarianceInput::Dense(Mat::from_fn(2, 2, |i, j| if i == j { 2. } else { 1. }));
        assert!(matches!(classify(&full, 2).unwrap(), Shape::Dense(_)));
        let diag_sparse = CovarianceInput::Sparse(sparse::from_diagonal(&[1., 4.]));
        match classify(&diag_sparse, 2).unwrap() {
            Shape::Diagonal(v) => assert_eq!(v, vec![1., 4.]),
            other => panic!("unexpected shape {other:?}"),
        }
    }

    #[test]
    fn eigen_root_reconstructs_and_counts_rank() {
        // rank one matrix [[1, 1], [1, 1]]
        let mat = Mat::from_fn(2, 2, |_, _| 1.);
        let eig = SymmetricEigen::new(mat.as_ref()).unwrap();
        assert_eq!(eig.rank(), 1);
        assert_abs_diff_eq!(eig.log_pdet(), 2f64.ln(), epsilon = 1e-12);
        let r = eig.root(EigenRoot::Direct);
        let back = r.transpose() * r.as_ref();
        for i in 0..2 {
            for j in 0..2 {
                assert_abs_diff_eq!(back[(i, j)], 1., epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn eigen_root_signs_are_deterministic() {
        let mat = Mat::from_fn(3, 3, |i, j| if i == j { 3. } else { 0.5 });
        let eig = SymmetricEigen::new(mat.as_ref()).unwrap();
        let u = eig.root(EigenRoot::Pseudoinverse).transpose().to_owned();
        for j in 0..3 {
            assert!(column_sign(u.as_ref(), j) > 0.);
        }
    }

    #[test]
    fn indefinite_matrix_fails() {
        let mat = Mat::from_fn(2, 2, |i, j| if i == j { 1. } else { 3. });
        assert!(matches!(
            SymmetricEigen::new(mat.as_ref()),
            Err(RtoError::NotPositiveSemiDefinite { .. })
        ));
        assert!(DenseCholesky::new(mat.as_ref()).is_none());
    }

    #[test]
    fn asymmetric_matrix_fails() {
        let mat = Mat::from_fn(2, 2, |i, j| (i * 2 + j) as f64);
        assert!(matches!(
            check_symmetric(mat.as_ref(), "covariance"),
            Err(RtoError::AsymmetricMatrix { which: "covariance" })
        ));
    }

    #[test]
    fn cholesky_inverse_and_logdet() {
        let mat = Mat::from_fn(2, 2, |i, j| if i == j { 2. } else { 1. });
        let chol = DenseCholesky::new(mat.as_ref()).unwrap();
        assert_abs_diff_eq!(chol.logdet(), 3f64.ln(), epsilon = 1e-12);
        let inv = chol.inverse();
        assert_abs_diff_eq!(inv[(0, 0)], 2. / 3., epsilon = 1e-12);
        assert_abs_diff_eq!(inv[(0, 1)], -1. / 3., epsilon = 1e-12);
        let generic = generic_sparse_inverse(&sparse::from_dense(mat.as_ref())).unwrap();
        assert_abs_diff_eq!(sparse::get(&generic, 1, 0), -1. / 3., epsilon = 1e-12);
        assert!(matches!(
            sparse_cholesky(&sparse::from_dense(Mat::from_fn(2, 2, |i, j| (i + 2 * j) as f64).as_ref())),
            Err(RtoError::AsymmetricMatrix { which: "sparse" })
        ));
    }
}

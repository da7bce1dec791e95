use faer::Mat;
use log::{debug, warn};

use crate::{
    error::{Result, RtoError},
    factorization::{
        check_symmetric, classify, diagonal_factor, generic_sparse_inverse, sparse_cholesky,
        CovarianceInput, DenseCholesky, EigenRoot, Factor, FactorizationOptions, Shape,
        SparseBackend, SymmetricEigen,
    },
    operator::{LinearOperator, Matrix},
    sparse::{self, ldl_sqrt, SparseMatrix},
};

/// The single mutable covariance-like field of a Gaussian.
#[derive(Debug, Clone)]
pub enum Parameterization {
    Cov(CovarianceInput),
    Prec(CovarianceInput),
    SqrtCov(CovarianceInput),
    SqrtPrec(CovarianceInput),
}

impl Parameterization {
    pub fn name(&self) -> &'static str {
        match self {
            Parameterization::Cov(_) => "cov",
            Parameterization::Prec(_) => "prec",
            Parameterization::SqrtCov(_) => "sqrtcov",
            Parameterization::SqrtPrec(_) => "sqrtprec",
        }
    }

    pub fn value(&self) -> &CovarianceInput {
        match self {
            Parameterization::Cov(value)
            | Parameterization::Prec(value)
            | Parameterization::SqrtCov(value)
            | Parameterization::SqrtPrec(value) => value,
        }
    }

    pub(crate) fn same_kind(&self, other: &Parameterization) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    pub fn factorize(&self, dim: usize, options: &FactorizationOptions) -> Result<Factor> {
        debug!("factorizing {} of dimension {dim}", self.name());
        let factor = match self {
            Parameterization::Cov(value) => from_cov(dim, value, options),
            Parameterization::Prec(value) => from_prec(dim, value, options),
            Parameterization::SqrtCov(value) => from_sqrtcov(dim, value, options),
            Parameterization::SqrtPrec(value) => from_sqrtprec(dim, value, options),
        }?;
        if factor.sqrtprec.ncols() != dim {
            return Err(RtoError::dim("square-root precision columns", dim, factor.sqrtprec.ncols()));
        }
        Ok(factor)
    }
}

fn positive(values: &[f64]) -> Result<()> {
    match values.iter().copied().find(|v| !v.is_finite() || *v <= 0.) {
        Some(bad) => Err(RtoError::NotPositiveSemiDefinite {
            detail: format!("diagonal entry {bad:e}"),
        }),
        None => Ok(()),
    }
}

fn nonzero(values: &[f64]) -> Result<()> {
    if values.iter().any(|v| *v == 0. || !v.is_finite()) {
        return Err(RtoError::InvalidParameterization(
            "square root factors need non-zero diagonal entries".into(),
        ));
    }
    Ok(())
}

fn check_square(mat: &Mat<f64>, dim: usize, context: &'static str) -> Result<()> {
    if mat.nrows() != dim {
        return Err(RtoError::dim(context, dim, mat.nrows()));
    }
    if mat.ncols() != dim {
        return Err(RtoError::dim(context, dim, mat.ncols()));
    }
    Ok(())
}

/// Factor of a Gaussian given through its covariance.
pub fn from_cov(dim: usize, cov: &CovarianceInput, options: &FactorizationOptions) -> Result<Factor> {
    let sparse = options.use_sparse(dim);
    match classify(cov, dim)? {
        Shape::Scalar(var) => {
            positive(&[var])?;
            Ok(diagonal_factor(vec![var.recip().sqrt(); dim], sparse))
        }
        Shape::Vector(var) | Shape::Diagonal(var) => {
            positive(&var)?;
            Ok(diagonal_factor(var.iter().map(|v| v.recip().sqrt()).collect(), sparse))
        }
        Shape::Dense(mat) => {
            check_square(mat, dim, "covariance")?;
            check_symmetric(mat.as_ref(), "covariance")?;
            dense_cov_factor(mat.clone(), options)
        }
        Shape::Sparse(mat) => {
            check_sparse_square(mat, dim, "covariance")?;
            sparse_cov_factor(mat.clone(), options)
        }
    }
}

fn dense_cov_factor(cov: Mat<f64>, options: &FactorizationOptions) -> Result<Factor> {
    let dim = cov.nrows();
    if !options.use_sparse(dim) {
        if let Some(chol) = DenseCholesky::new(cov.as_ref()) {
            let prec = chol.inverse();
            if let Some(prec_chol) = DenseCholesky::new(prec.as_ref()) {
                return Ok(Factor {
                    sqrtprec: Matrix::Dense(prec_chol.upper()),
                    logdet: Some(chol.logdet()),
                    rank: dim,
                    prec: Some(Matrix::Dense(prec)),
                    cov: Some(Matrix::Dense(cov)),
                });
            }
        }
        warn!("covariance is not numerically positive definite, using the eigen pseudo-square-root");
    }
    let eig = SymmetricEigen::new(cov.as_ref())?;
    let root = eig.root(EigenRoot::Pseudoinverse);
    let prec = root.transpose() * root.as_ref();
    Ok(Factor {
        sqrtprec: Matrix::Dense(root),
        logdet: Some(eig.log_pdet()),
        rank: eig.rank(),
        prec: Some(Matrix::Dense(prec)),
        cov: Some(Matrix::Dense(cov)),
    })
}

fn check_sparse_square(mat: &SparseMatrix, dim: usize, context: &'static str) -> Result<()> {
    if mat.nrows() != dim {
        return Err(RtoError::dim(context, dim, mat.nrows()));
    }
    if mat.ncols() != dim {
        return Err(RtoError::dim(context, dim, mat.ncols()));
    }
    Ok(())
}

fn sparse_cov_factor(cov: SparseMatrix, options: &FactorizationOptions) -> Result<Factor> {
    let rank = sparse::structural_rank(&cov);
    match options.sparse_backend {
        SparseBackend::Cholesky => {
            let chol = sparse_cholesky(&cov)?;
            let prec = chol.inverse()?;
            let sqrtprec = sparse_cholesky(&prec)?.upper()?;
            Ok(Factor {
                sqrtprec: Matrix::Sparse(sqrtprec),
                logdet: Some(chol.logdet()),
                rank,
                prec: Some(Matrix::Sparse(prec)),
                cov: Some(Matrix::Sparse(cov)),
            })
        }
        SparseBackend::Unavailable => {
            debug!("no sparse Cholesky backend, the log-determinant stays undefined");
            let prec = generic_sparse_inverse(&cov)?;
            let sqrtprec = ldl_sqrt(&prec)?;
            Ok(Factor {
                sqrtprec: Matrix::Sparse(sqrtprec),
                logdet: None,
                rank,
                prec: Some(Matrix::Sparse(prec)),
                cov: Some(Matrix::Sparse(cov)),
            })
        }
    }
}

/// Factor of a Gaussian given through its precision.
pub fn from_prec(dim: usize, prec: &CovarianceInput, options: &FactorizationOptions) -> Result<Factor> {
    let sparse = options.use_sparse(dim);
    match classify(prec, dim)? {
        Shape::Scalar(p) => {
            positive(&[p])?;
            Ok(diagonal_factor(vec![p.sqrt(); dim], sparse))
        }
        Shape::Vector(p) | Shape::Diagonal(p) => {
            positive(&p)?;
            Ok(diagonal_factor(p.iter().map(|v| v.sqrt()).collect(), sparse))
        }
        Shape::Dense(mat) => {
            check_square(mat, dim, "precision")?;
            check_symmetric(mat.as_ref(), "precision")?;
            dense_prec_factor(mat.clone(), options)
        }
        Shape::Sparse(mat) => {
            check_sparse_square(mat, dim, "precision")?;
            let rank = sparse::structural_rank(mat);
            let (sqrtprec, logdet) = match options.sparse_backend {
                SparseBackend::Cholesky => {
                    let chol = sparse_cholesky(mat)?;
                    (chol.upper()?, Some(-chol.logdet()))
                }
                SparseBackend::Unavailable => (ldl_sqrt(mat)?, None),
            };
            Ok(Factor {
                sqrtprec: Matrix::Sparse(sqrtprec),
                logdet,
                rank,
                prec: Some(Matrix::Sparse(mat.clone())),
                cov: None,
            })
        }
    }
}

fn dense_prec_factor(prec: Mat<f64>, options: &FactorizationOptions) -> Result<Factor> {
    let dim = prec.nrows();
    if !options.use_sparse(dim) {
        if let Some(chol) = DenseCholesky::new(prec.as_ref()) {
            return Ok(Factor {
                sqrtprec: Matrix::Dense(chol.upper()),
                logdet: Some(-chol.logdet()),
                rank: dim,
                cov: Some(Matrix::Dense(chol.inverse())),
                prec: Some(Matrix::Dense(prec)),
            });
        }
        warn!("precision is not numerically positive definite, using the eigen square root");
    }
    let eig = SymmetricEigen::new(prec.as_ref())?;
    Ok(Factor {
        sqrtprec: Matrix::Dense(eig.root(EigenRoot::Direct)),
        logdet: Some(-eig.log_pdet()),
        rank: eig.rank(),
        prec: Some(Matrix::Dense(prec)),
        cov: None,
    })
}

/// Factor of a Gaussian given through a square root `S` of its covariance,
/// `cov = S Sᵀ`.
pub fn from_sqrtcov(
    dim: usize,
    sqrtcov: &CovarianceInput,
    options: &FactorizationOptions,
) -> Result<Factor> {
    let sparse = options.use_sparse(dim);
    match classify(sqrtcov, dim)? {
        Shape::Scalar(s) => {
            nonzero(&[s])?;
            Ok(diagonal_factor(vec![s.recip(); dim], sparse))
        }
        Shape::Vector(s) | Shape::Diagonal(s) => {
            nonzero(&s)?;
            Ok(diagonal_factor(s.iter().map(|v| v.recip()).collect(), sparse))
        }
        Shape::Dense(mat) => {
            if mat.nrows() != dim {
                return Err(RtoError::dim("square-root covariance rows", dim, mat.nrows()));
            }
            let cov = mat.as_ref() * mat.transpose();
            dense_cov_factor(cov, options)
        }
        Shape::Sparse(mat) => {
            if mat.nrows() != dim {
                return Err(RtoError::dim("square-root covariance rows", dim, mat.nrows()));
            }
            if options.sparse_backend == SparseBackend::Unavailable {
                return Err(RtoError::UnsupportedRepresentation(
                    "a sparse square-root covariance needs the sparse Cholesky backend",
                ));
            }
            let cov = sparse::matmul(mat, &sparse::transpose(mat)?)?;
            sparse_cov_factor(cov, options)
        }
    }
}

/// Factor of a Gaussian given through its square-root precision. The
/// factor is kept as given; only the log-determinant and rank are derived.
pub fn from_sqrtprec(
    dim: usize,
    sqrtprec: &CovarianceInput,
    options: &FactorizationOptions,
) -> Result<Factor> {
    let sparse = options.use_sparse(dim);
    match classify(sqrtprec, dim)? {
        Shape::Scalar(s) => {
            nonzero(&[s])?;
            Ok(diagonal_factor(vec![s; dim], sparse))
        }
        Shape::Vector(s) | Shape::Diagonal(s) => {
            nonzero(&s)?;
            Ok(diagonal_factor(s, sparse))
        }
        Shape::Dense(mat) => {
            if mat.ncols() != dim {
                return Err(RtoError::dim("square-root precision columns", dim, mat.ncols()));
            }
            let outer = mat.as_ref() * mat.transpose();
            let (logdet, rank) = match (sparse, DenseCholesky::new(outer.as_ref())) {
                (false, Some(chol)) => (-chol.logdet(), outer.nrows()),
                _ => {
                    let eig = SymmetricEigen::new(outer.as_ref())?;
                    (-eig.log_pdet(), eig.rank())
                }
            };
            let prec = (!sparse).then(|| Matrix::Dense(mat.transpose() * mat.as_ref()));
            Ok(Factor {
                sqrtprec: Matrix::Dense(mat.clone()),
                logdet: Some(logdet),
                rank,
                prec,
                cov: None,
            })
        }
        Shape::Sparse(mat) => {
            if mat.ncols() != dim {
                return Err(RtoError::dim("square-root precision columns", dim, mat.ncols()));
            }
            if options.sparse_backend == SparseBackend::Unavailable {
                return Err(RtoError::UnsupportedRepresentation(
                    "a sparse square-root precision needs the sparse Cholesky backend",
                ));
            }
            let transposed = sparse::transpose(mat)?;
            let outer = sparse::matmul(mat, &transposed)?;
            let chol = sparse_cholesky(&outer)?;
            Ok(Factor {
                sqrtprec: Matrix::Sparse(mat.clone()),
                logdet: Some(-chol.logdet()),
                rank: sparse::structural_rank(&outer),
                prec: Some(Matrix::Sparse(sparse::matmul(&transposed, mat)?)),
                cov: None,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn assert_close(a: &Matrix, b: &Matrix, tol: f64) {
        assert_eq!(a.shape(), b.shape());
        for i in 0..a.nrows() {
            for j in 0..a.ncols() {
                assert_abs_diff_eq!(a.get(i, j), b.get(i, j), epsilon = tol);
            }
        }
    }

    fn gram(sqrtprec: &Matrix) -> Matrix {
        sqrtprec.transpose().unwrap().matmul(sqrtprec).unwrap()
    }

    fn example_cov() -> Mat<f64> {
        Mat::from_fn(3, 3, |i, j| match (i, j) {
            _ if i == j => 2.,
            (0, 1) | (1, 0) => 0.5,
            (1, 2) | (2, 1) => -0.3,
            _ => 0.1,
        })
    }

    #[test]
    fn entry_points_agree_on_dense_input() {
        let options = FactorizationOptions::default();
        let cov = example_cov();
        let from_c = from_cov(3, &CovarianceInput::Dense(cov.clone()), &options).unwrap();

        let prec = from_c.prec.clone().unwrap().to_dense();
        let from_p = from_prec(3, &CovarianceInput::Dense(prec), &options).unwrap();

        let sqrtcov = DenseCholesky::new(cov.as_ref()).unwrap().l().to_owned();
        let from_sc = from_sqrtcov(3, &CovarianceInput::Dense(sqrtcov), &options).unwrap();

        let sqrtprec = from_c.sqrtprec.to_dense();
        let from_sp = from_sqrtprec(3, &CovarianceInput::Dense(sqrtprec), &options).unwrap();

        for other in [&from_p, &from_sc, &from_sp] {
            assert_close(&from_c.sqrtprec, &other.sqrtprec, 1e-10);
            assert_abs_diff_eq!(from_c.logdet.unwrap(), other.logdet.unwrap(), epsilon = 1e-10);
            assert_eq!(from_c.rank, other.rank);
        }
    }

    #[test]
    fn diagonal_entry_points_agree() {
        let options = FactorizationOptions::default();
        let var = vec![1., 4., 0.25];
        let a = from_cov(3, &var.clone().into(), &options).unwrap();
        let b = from_prec(3, &var.iter().map(|v| 1. / v).collect::<Vec<_>>().into(), &options).unwrap();
        let c = from_sqrtcov(3, &var.iter().map(|v| v.sqrt()).collect::<Vec<_>>().into(), &options).unwrap();
        let d = from_sqrtprec(3, &var.iter().map(|v| 1. / v.sqrt()).collect::<Vec<_>>().into(), &options)
            .unwrap();
        for other in [&b, &c, &d] {
            assert_close(&a.sqrtprec, &other.sqrtprec, 1e-12);
            assert_abs_diff_eq!(a.logdet.unwrap(), other.logdet.unwrap(), epsilon = 1e-12);
        }
        assert_abs_diff_eq!(a.logdet.unwrap(), 0., epsilon = 1e-12);
        assert_eq!(a.rank, 3);
    }

    #[test]
    fn scalar_covariance_in_high_dimension_is_sparse() {
        let options = FactorizationOptions::default();
        let factor = from_cov(100, &CovarianceInput::Scalar(4.), &options).unwrap();
        assert!(factor.sqrtprec.is_sparse());
        assert_abs_diff_eq!(factor.sqrtprec.get(7, 7), 0.5);
        assert_abs_diff_eq!(factor.logdet.unwrap(), 100. * 4f64.ln(), epsilon = 1e-9);
        let prec = gram(&factor.sqrtprec);
        assert_abs_diff_eq!(prec.get(3, 3), 0.25);
    }

    #[test]
    fn eigen_path_handles_rank_deficiency() {
        let options = FactorizationOptions {
            sparse_threshold: 1,
            ..Default::default()
        };
        // cov = v vᵀ with v = (1, 1)
        let cov = Mat::from_fn(2, 2, |_, _| 1.);
        let factor = from_cov(2, &CovarianceInput::Dense(cov), &options).unwrap();
        assert_eq!(factor.rank, 1);
        assert_abs_diff_eq!(factor.logdet.unwrap(), 2f64.ln(), epsilon = 1e-12);
        // pseudo inverse of [[1, 1], [1, 1]] is a quarter of it
        let prec = gram(&factor.sqrtprec);
        for i in 0..2 {
            for j in 0..2 {
                assert_abs_diff_eq!(prec.get(i, j), 0.25, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn singular_dense_covariance_falls_back_to_eigen() {
        let options = FactorizationOptions::default();
        let cov = Mat::from_fn(2, 2, |_, _| 1.);
        let factor = from_cov(2, &CovarianceInput::Dense(cov), &options).unwrap();
        assert_eq!(factor.rank, 1);
    }

    #[test]
    fn large_dense_precision_goes_through_eigen() {
        let options = FactorizationOptions {
            sparse_threshold: 2,
            ..Default::default()
        };
        let prec = example_cov();
        let eig = from_prec(3, &CovarianceInput::Dense(prec.clone()), &options).unwrap();
        let chol = from_prec(3, &CovarianceInput::Dense(prec.clone()), &Default::default()).unwrap();
        assert_abs_diff_eq!(eig.logdet.unwrap(), chol.logdet.unwrap(), epsilon = 1e-10);
        assert_close(&gram(&eig.sqrtprec), &Matrix::Dense(prec), 1e-10);
    }

    #[test]
    fn sparse_inputs() {
        let mut triplets = Vec::new();
        for i in 0..5 {
            triplets.push((i, i, 3.));
            if i + 1 < 5 {
                triplets.push((i, i + 1, 1.));
                triplets.push((i + 1, i, 1.));
            }
        }
        let prec = sparse::from_triplets(5, 5, &triplets).unwrap();
        let options = FactorizationOptions::default();
        let factor = from_prec(5, &CovarianceInput::Sparse(prec.clone()), &options).unwrap();
        assert!(factor.sqrtprec.is_sparse());
        assert_eq!(factor.rank, 5);
        assert_close(&gram(&factor.sqrtprec), &Matrix::Sparse(prec.clone()), 1e-12);
        let dense = from_prec(5, &CovarianceInput::Dense(prec.to_dense()), &options).unwrap();
        assert_abs_diff_eq!(factor.logdet.unwrap(), dense.logdet.unwrap(), epsilon = 1e-10);

        let unavailable = FactorizationOptions {
            sparse_backend: SparseBackend::Unavailable,
            ..Default::default()
        };
        let factor = from_prec(5, &CovarianceInput::Sparse(prec.clone()), &unavailable).unwrap();
        assert!(factor.logdet.is_none());
        assert_close(&gram(&factor.sqrtprec), &Matrix::Sparse(prec.clone()), 1e-12);

        let cov = dense.cov.unwrap().to_dense();
        let sparse_cov = sparse::from_dense(cov.as_ref());
        let from_c = from_cov(5, &CovarianceInput::Sparse(sparse_cov.clone()), &unavailable).unwrap();
        assert!(from_c.logdet.is_none());
        assert_close(&gram(&from_c.sqrtprec), &Matrix::Sparse(prec.clone()), 1e-9);

        let from_c = from_cov(5, &CovarianceInput::Sparse(sparse_cov), &options).unwrap();
        assert_abs_diff_eq!(from_c.logdet.unwrap(), dense.logdet.unwrap(), epsilon = 1e-10);

        let upper = factor.sqrtprec.clone();
        let Matrix::Sparse(upper) = upper else {
            panic!("expected a sparse factor");
        };
        assert!(matches!(
            from_sqrtprec(5, &CovarianceInput::Sparse(upper.clone()), &unavailable),
            Err(RtoError::UnsupportedRepresentation(_))
        ));
        let given = from_sqrtprec(5, &CovarianceInput::Sparse(upper), &options).unwrap();
        assert_abs_diff_eq!(given.logdet.unwrap(), dense.logdet.unwrap(), epsilon = 1e-10);
    }

    #[test]
    fn invalid_inputs() {
        let options = FactorizationOptions::default();
        let asym = Mat::from_fn(2, 2, |i, j| if i == j { 1. } else { j as f64 });
        assert!(matches!(
            from_cov(2, &CovarianceInput::Dense(asym), &options),
            Err(RtoError::AsymmetricMatrix { which: "covariance" })
        ));
        let indefinite = Mat::from_fn(2, 2, |i, j| if i == j { 1. } else { 2. });
        assert!(matches!(
            from_cov(2, &CovarianceInput::Dense(indefinite), &options),
            Err(RtoError::NotPositiveSemiDefinite { .. })
        ));
        assert!(matches!(
            from_cov(2, &CovarianceInput::Scalar(-1.), &options),
            Err(RtoError::NotPositiveSemiDefinite { .. })
        ));
        let sparse_indefinite = sparse::from_triplets(2, 2, &[(0, 0, 1.), (0, 1, 3.), (1, 0, 3.), (1, 1, 1.)]).unwrap();
        assert!(matches!(
            from_cov(2, &CovarianceInput::Sparse(sparse_indefinite.clone()), &options),
            Err(RtoError::NotPositiveSemiDefinite { .. })
        ));
        assert!(matches!(
            from_prec(2, &CovarianceInput::Sparse(sparse_indefinite), &options),
            Err(RtoError::NotPositiveSemiDefinite { .. })
        ));
    }

    #[test]
    fn diagonal_matrix_of_wrong_size_is_rejected() {
        let options = FactorizationOptions::default();
        let dense = CovarianceInput::Dense(Mat::from_fn(2, 2, |i, j| if i == j { 2. } else { 0. }));
        let sparse_diag = CovarianceInput::Sparse(sparse::from_diagonal(&[2., 2.]));
        for input in [dense, sparse_diag] {
            assert!(matches!(
                from_cov(3, &input, &options),
                Err(RtoError::DimensionMismatch { expected: 3, found: 2, .. })
            ));
            assert!(from_prec(3, &input, &options).is_err());
            assert!(from_sqrtcov(3, &input, &options).is_err());
            assert!(from_sqrtprec(3, &input, &options).is_err());
        }
    }

    proptest! {
        #[test]
        fn sqrtprec_reconstructs_precision(
            entries in prop::collection::vec(-1f64..1f64, 9),
            shift in 0.5f64..3f64,
        ) {
            // A Aᵀ + shift I is symmetric positive definite
            let a = Mat::from_fn(3, 3, |i, j| entries[3 * i + j]);
            let mut prec = a.as_ref() * a.transpose();
            for i in 0..3 {
                prec[(i, i)] += shift;
            }
            let factor = from_prec(3, &CovarianceInput::Dense(prec.clone()), &FactorizationOptions::default()).unwrap();
            let back = gram(&factor.sqrtprec);
            for i in 0..3 {
                for j in 0..3 {
                    prop_assert!((back.get(i, j) - prec[(i, j)]).abs() < 1e-9);
                }
            }
            let via_cov = from_cov(3, &CovarianceInput::Dense(factor.cov.unwrap().to_dense()), &FactorizationOptions::default()).unwrap();
            prop_assert!((via_cov.logdet.unwrap() - factor.logdet.unwrap()).abs() < 1e-8);
        }
    }
}

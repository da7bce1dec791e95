//! Helpers over faer's compressed sparse column matrices, and the sparse
//! Cholesky factor used by the covariance engine.
//!
//! Every matrix built here keeps its row indices sorted inside each column,
//! so the diagonal is the first stored entry of a lower triangular column
//! and the last one of an upper triangular column.

use faer::{
    dyn_stack::{MemBuffer, MemStack, StackReq},
    linalg::{
        cholesky::{
            ldlt::factor::{LdltError, LdltRegularization},
            llt::factor::{LltError, LltRegularization},
        },
        solvers::Solve,
    },
    sparse::{
        linalg::{
            cholesky::simplicial,
            matmul::{dense_sparse_matmul, sparse_dense_matmul, sparse_sparse_matmul},
        },
        CreationError, FaerError, SparseColMat, SymbolicSparseColMat, Triplet,
    },
    Accum, Mat, MatMut, MatRef, Par,
};

use crate::error::{Result, RtoError};

/// A real sparse matrix in compressed sparse column format.
pub type SparseMatrix = SparseColMat<usize, f64>;

/// Build a matrix from `(row, col, value)` triplets. Duplicates are summed
/// and explicit zeros are skipped.
pub fn from_triplets(nrows: usize, ncols: usize, triplets: &[(usize, usize, f64)]) -> Result<SparseMatrix> {
    let entries: Vec<Triplet<usize, usize, f64>> = triplets
        .iter()
        .filter(|&&(_, _, v)| v != 0.)
        .map(|&(i, j, v)| Triplet::new(i, j, v))
        .collect();
    SparseMatrix::try_new_from_triplets(nrows, ncols, &entries).map_err(|err| match err {
        CreationError::OutOfBounds { row, .. } if row >= nrows => RtoError::dim("sparse triplet row", nrows, row),
        CreationError::OutOfBounds { col, .. } => RtoError::dim("sparse triplet column", ncols, col),
        CreationError::Generic(err) => err.into(),
    })
}

/// Assemble a matrix from per-column `(row, value)` lists whose rows are
/// sorted and unique.
fn from_sorted_columns(nrows: usize, columns: Vec<Vec<(usize, f64)>>) -> SparseMatrix {
    let ncols = columns.len();
    let mut col_ptr = Vec::with_capacity(ncols + 1);
    let mut row_idx = Vec::new();
    let mut values = Vec::new();
    col_ptr.push(0);
    for column in columns {
        for (i, v) in column {
            row_idx.push(i);
            values.push(v);
        }
        col_ptr.push(row_idx.len());
    }
    let symbolic = SymbolicSparseColMat::new_checked(nrows, ncols, col_ptr, None, row_idx);
    SparseMatrix::new(symbolic, values)
}

pub fn identity(dim: usize) -> SparseMatrix {
    from_diagonal(&vec![1f64; dim])
}

pub fn from_diagonal(diag: &[f64]) -> SparseMatrix {
    let columns = diag
        .iter()
        .enumerate()
        .map(|(j, &v)| if v != 0. { vec![(j, v)] } else { Vec::new() })
        .collect();
    from_sorted_columns(diag.len(), columns)
}

pub fn from_dense(mat: MatRef<'_, f64>) -> SparseMatrix {
    let columns = (0..mat.ncols())
        .map(|j| {
            (0..mat.nrows())
                .filter_map(|i| {
                    let v = mat[(i, j)];
                    (v != 0.).then_some((i, v))
                })
                .collect()
        })
        .collect();
    from_sorted_columns(mat.nrows(), columns)
}

/// Iterate over the stored `(row, value)` entries of column `j`.
pub fn column(mat: &SparseMatrix, j: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
    mat.row_idx_of_col_raw(j)
        .iter()
        .copied()
        .zip(mat.val_of_col(j).iter().copied())
}

pub fn get(mat: &SparseMatrix, i: usize, j: usize) -> f64 {
    mat.as_ref().get(i, j).copied().unwrap_or(0.)
}

pub fn diagonal(mat: &SparseMatrix) -> Vec<f64> {
    (0..mat.nrows().min(mat.ncols())).map(|i| get(mat, i, i)).collect()
}

pub fn is_diagonal(mat: &SparseMatrix) -> bool {
    (0..mat.ncols()).all(|j| column(mat, j).all(|(i, _)| i == j))
}

pub fn is_lower_triangular(mat: &SparseMatrix) -> bool {
    (0..mat.ncols()).all(|j| column(mat, j).all(|(i, _)| i >= j))
}

pub fn is_upper_triangular(mat: &SparseMatrix) -> bool {
    (0..mat.ncols()).all(|j| column(mat, j).all(|(i, _)| i <= j))
}

pub fn is_symmetric(mat: &SparseMatrix, tol: f64) -> bool {
    if mat.nrows() != mat.ncols() {
        return false;
    }
    (0..mat.ncols()).all(|j| column(mat, j).all(|(i, v)| (v - get(mat, j, i)).abs() <= tol * (1. + v.abs())))
}

pub fn transpose(mat: &SparseMatrix) -> Result<SparseMatrix> {
    Ok(mat.transpose().to_col_major()?)
}

pub fn scale(mat: &SparseMatrix, factor: f64) -> SparseMatrix {
    let mut out = mat.clone();
    let (_, values) = out.parts_mut();
    values.iter_mut().for_each(|v| *v *= factor);
    out
}

/// Compute `mat * x`.
pub fn mul_vec(mat: &SparseMatrix, x: &[f64]) -> Result<Vec<f64>> {
    if x.len() != mat.ncols() {
        return Err(RtoError::dim("sparse matrix-vector product", mat.ncols(), x.len()));
    }
    let mut out = vec![0f64; mat.nrows()];
    sparse_dense_matmul(
        MatMut::from_column_major_slice_mut(&mut out, mat.nrows(), 1),
        Accum::Replace,
        mat.as_ref(),
        MatRef::from_column_major_slice(x, x.len(), 1),
        1.,
        Par::Seq,
    );
    Ok(out)
}

/// Compute `matᵀ y` as the row vector `yᵀ mat`.
pub fn transpose_mul_vec(mat: &SparseMatrix, y: &[f64]) -> Result<Vec<f64>> {
    if y.len() != mat.nrows() {
        return Err(RtoError::dim("sparse adjoint product", mat.nrows(), y.len()));
    }
    let mut out = vec![0f64; mat.ncols()];
    dense_sparse_matmul(
        MatMut::from_column_major_slice_mut(&mut out, 1, mat.ncols()),
        Accum::Replace,
        MatRef::from_column_major_slice(y, 1, y.len()),
        mat.as_ref(),
        1.,
        Par::Seq,
    );
    Ok(out)
}

/// Sparse-sparse product `lhs * rhs`.
pub fn matmul(lhs: &SparseMatrix, rhs: &SparseMatrix) -> Result<SparseMatrix> {
    if lhs.ncols() != rhs.nrows() {
        return Err(RtoError::dim("sparse product", lhs.ncols(), rhs.nrows()));
    }
    Ok(sparse_sparse_matmul(lhs.as_ref(), rhs.as_ref(), 1., Par::Seq)?)
}

/// Sparse-dense product `lhs * rhs`.
pub fn matmul_dense(lhs: &SparseMatrix, rhs: MatRef<'_, f64>) -> Result<Mat<f64>> {
    if lhs.ncols() != rhs.nrows() {
        return Err(RtoError::dim("sparse-dense product", lhs.ncols(), rhs.nrows()));
    }
    let mut out = Mat::zeros(lhs.nrows(), rhs.ncols());
    sparse_dense_matmul(out.as_mut(), Accum::Replace, lhs.as_ref(), rhs, 1., Par::Seq);
    Ok(out)
}

/// Dense-sparse product `lhs * rhs`.
pub fn dense_matmul(lhs: MatRef<'_, f64>, rhs: &SparseMatrix) -> Result<Mat<f64>> {
    if lhs.ncols() != rhs.nrows() {
        return Err(RtoError::dim("dense-sparse product", lhs.ncols(), rhs.nrows()));
    }
    let mut out = Mat::zeros(lhs.nrows(), rhs.ncols());
    dense_sparse_matmul(out.as_mut(), Accum::Replace, lhs, rhs.as_ref(), 1., Par::Seq);
    Ok(out)
}

/// Stack matrices with equal column counts on top of each other.
pub fn vstack(blocks: &[&SparseMatrix]) -> Result<SparseMatrix> {
    let Some(first) = blocks.first() else {
        return Err(RtoError::InvalidTarget("cannot stack an empty list of operators".into()));
    };
    let ncols = first.ncols();
    if let Some(bad) = blocks.iter().find(|b| b.ncols() != ncols) {
        return Err(RtoError::dim("stacked operator columns", ncols, bad.ncols()));
    }
    let mut columns: Vec<Vec<(usize, f64)>> = vec![Vec::new(); ncols];
    let mut offset = 0;
    for block in blocks {
        for (j, out) in columns.iter_mut().enumerate() {
            out.extend(column(block, j).map(|(i, v)| (i + offset, v)));
        }
        offset += block.nrows();
    }
    Ok(from_sorted_columns(offset, columns))
}

/// Largest number of columns that can be matched to distinct rows through
/// stored entries.
pub fn structural_rank(mat: &SparseMatrix) -> usize {
    let mut row_match = vec![usize::MAX; mat.nrows()];
    let mut visited = vec![usize::MAX; mat.nrows()];
    let mut rank = 0;
    for root in 0..mat.ncols() {
        // depth-first search for an augmenting path; `rows[k]` leads from
        // the column in `stack[k]` to the one in `stack[k + 1]`
        let mut stack = vec![(root, 0usize)];
        let mut rows: Vec<usize> = Vec::new();
        let mut found = false;
        while let Some((col, pos)) = stack.pop() {
            let Some(&row) = mat.row_idx_of_col_raw(col).get(pos) else {
                rows.pop();
                continue;
            };
            stack.push((col, pos + 1));
            if visited[row] == root {
                continue;
            }
            visited[row] = root;
            rows.push(row);
            match row_match[row] {
                usize::MAX => {
                    found = true;
                    break;
                }
                owner => stack.push((owner, 0)),
            }
        }
        if found {
            for (&(col, _), &row) in stack.iter().zip(rows.iter()) {
                row_match[row] = col;
            }
            rank += 1;
        }
    }
    rank
}

fn triangular_rhs(mat: &SparseMatrix, b: &[f64], lower: bool) -> Result<Mat<f64>> {
    let n = mat.nrows();
    if mat.ncols() != n {
        return Err(RtoError::dim("triangular factor columns", n, mat.ncols()));
    }
    if b.len() != n {
        return Err(RtoError::dim("triangular solve right-hand side", n, b.len()));
    }
    for j in 0..n {
        let rows = mat.row_idx_of_col_raw(j);
        let values = mat.val_of_col(j);
        let pivot = if lower {
            rows.first().zip(values.first())
        } else {
            rows.last().zip(values.last())
        };
        match pivot {
            Some((&i, &v)) if i == j && v != 0. => {}
            _ => {
                return Err(RtoError::Factorization(format!(
                    "zero pivot in column {j} of triangular factor"
                )))
            }
        }
    }
    Ok(Mat::from_fn(n, 1, |i, _| b[i]))
}

/// Solve `mat * x = b` for a lower triangular matrix.
pub fn solve_lower_triangular(mat: &SparseMatrix, b: &[f64]) -> Result<Vec<f64>> {
    let mut x = triangular_rhs(mat, b, true)?;
    mat.as_ref().sp_solve_lower_triangular_in_place(x.as_mut());
    Ok(x.col_as_slice(0).to_vec())
}

/// Solve `mat * x = b` for an upper triangular matrix.
pub fn solve_upper_triangular(mat: &SparseMatrix, b: &[f64]) -> Result<Vec<f64>> {
    let mut x = triangular_rhs(mat, b, false)?;
    mat.as_ref().sp_solve_upper_triangular_in_place(x.as_mut());
    Ok(x.col_as_slice(0).to_vec())
}

/// Inverse through a sparse LU factorization with partial pivoting.
pub fn lu_inverse(mat: &SparseMatrix) -> Result<SparseMatrix> {
    let n = mat.nrows();
    if mat.ncols() != n {
        return Err(RtoError::dim("sparse inverse", n, mat.ncols()));
    }
    let lu = mat
        .as_ref()
        .sp_lu()
        .map_err(|err| RtoError::Factorization(format!("sparse matrix is singular: {err}")))?;
    let mut inv = Mat::from_fn(n, n, |i, j| if i == j { 1. } else { 0. });
    lu.solve_in_place(inv.as_mut());
    if (0..n).any(|j| inv.col_as_slice(j).iter().any(|v| !v.is_finite())) {
        return Err(RtoError::Factorization("sparse matrix is singular".into()));
    }
    Ok(from_dense(inv.as_ref()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Llt,
    Ldlt,
}

/// Simplicial factorization of a symmetric matrix in the natural ordering.
/// Only the upper triangle of `a` is read. The returned factor stores the
/// pivot (`sqrt(d)` for `Llt`, `d` for `Ldlt`) as the first entry of each
/// column.
fn simplicial_factor(a: &SparseMatrix, kind: Kind) -> Result<SparseMatrix> {
    let n = a.nrows();
    if a.ncols() != n {
        return Err(RtoError::dim("sparse factorization", n, a.ncols()));
    }
    let mut etree = vec![0isize; n];
    let mut col_counts = vec![0usize; n];
    let mut mem = MemBuffer::try_new(StackReq::any_of(&[
        simplicial::prefactorize_symbolic_cholesky_scratch::<usize>(n, a.compute_nnz()),
        simplicial::factorize_simplicial_symbolic_cholesky_scratch::<usize>(n),
        simplicial::factorize_simplicial_numeric_llt_scratch::<usize, f64>(n),
        simplicial::factorize_simplicial_numeric_ldlt_scratch::<usize, f64>(n),
    ]))
    .map_err(FaerError::from)?;
    let stack = MemStack::new(&mut mem);

    let etree = simplicial::prefactorize_symbolic_cholesky(&mut etree, &mut col_counts, a.symbolic(), stack);
    let symbolic = simplicial::factorize_simplicial_symbolic_cholesky(a.symbolic(), etree, &col_counts, stack)?;

    let mut values = vec![0f64; symbolic.len_val()];
    let failed_order = match kind {
        Kind::Llt => simplicial::factorize_simplicial_numeric_llt::<usize, f64>(
            &mut values,
            a.as_ref(),
            LltRegularization::default(),
            &symbolic,
            stack,
        )
        .err()
        .map(|LltError::NonPositivePivot { index }| index),
        Kind::Ldlt => simplicial::factorize_simplicial_numeric_ldlt::<usize, f64>(
            &mut values,
            a.as_ref(),
            LdltRegularization::default(),
            &symbolic,
            stack,
        )
        .err()
        .map(|LdltError::ZeroPivot { index }| index),
    };
    if let Some(order) = failed_order {
        return Err(RtoError::NotPositiveSemiDefinite {
            detail: format!("leading minor of order {order} is not positive"),
        });
    }
    Ok(SparseMatrix::new(symbolic.factor().to_owned()?, values))
}

/// Sparse Cholesky factor `L` (lower triangular) with `L Lᵀ = a`, in the
/// natural ordering.
#[derive(Debug, Clone)]
pub struct SparseCholesky {
    factor: SparseMatrix,
}

impl SparseCholesky {
    pub fn factorize(a: &SparseMatrix) -> Result<Self> {
        Ok(Self {
            factor: simplicial_factor(a, Kind::Llt)?,
        })
    }

    pub fn l(&self) -> &SparseMatrix {
        &self.factor
    }

    /// The upper triangular square root `Lᵀ`.
    pub fn upper(&self) -> Result<SparseMatrix> {
        transpose(&self.factor)
    }

    /// Log-determinant of the factorized matrix.
    pub fn logdet(&self) -> f64 {
        2. * (0..self.factor.ncols())
            .map(|j| self.factor.val_of_col(j)[0].ln())
            .sum::<f64>()
    }

    fn solve_in_place(&self, mut rhs: MatMut<'_, f64>) -> Result<()> {
        let upper = self.upper()?;
        self.factor.as_ref().sp_solve_lower_triangular_in_place(rhs.as_mut());
        upper.as_ref().sp_solve_upper_triangular_in_place(rhs.as_mut());
        Ok(())
    }

    /// Solve `a x = b`.
    pub fn solve(&self, b: &[f64]) -> Result<Vec<f64>> {
        let n = self.factor.nrows();
        if b.len() != n {
            return Err(RtoError::dim("sparse Cholesky right-hand side", n, b.len()));
        }
        let mut x = Mat::from_fn(n, 1, |i, _| b[i]);
        self.solve_in_place(x.as_mut())?;
        Ok(x.col_as_slice(0).to_vec())
    }

    /// Inverse of the factorized matrix, with exact zeros dropped.
    pub fn inverse(&self) -> Result<SparseMatrix> {
        let n = self.factor.nrows();
        let mut inv = Mat::from_fn(n, n, |i, j| if i == j { 1. } else { 0. });
        self.solve_in_place(inv.as_mut())?;
        Ok(from_dense(inv.as_ref()))
    }
}

/// Upper triangular `R` with `Rᵀ R = a`, obtained from an `L D Lᵀ`
/// factorization. Used when the Cholesky backend is switched off; the
/// pivots are not turned into a determinant.
pub(crate) fn ldl_sqrt(a: &SparseMatrix) -> Result<SparseMatrix> {
    let ld = simplicial_factor(a, Kind::Ldlt)?;
    let mut columns = Vec::with_capacity(ld.ncols());
    for j in 0..ld.ncols() {
        let d = ld.val_of_col(j)[0];
        if !d.is_finite() || d <= 0. {
            return Err(RtoError::NotPositiveSemiDefinite {
                detail: format!("pivot {d:e} at column {j}"),
            });
        }
        let root = d.sqrt();
        columns.push(
            column(&ld, j)
                .map(|(i, v)| (i, if i == j { root } else { v * root }))
                .collect(),
        );
    }
    transpose(&from_sorted_columns(ld.nrows(), columns))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use pretty_assertions::assert_eq;

    fn tridiag(n: usize) -> SparseMatrix {
        let mut triplets = Vec::new();
        for i in 0..n {
            triplets.push((i, i, 4.));
            if i + 1 < n {
                triplets.push((i, i + 1, -1.));
                triplets.push((i + 1, i, -1.));
            }
        }
        from_triplets(n, n, &triplets).unwrap()
    }

    fn assert_same(a: &SparseMatrix, b: &SparseMatrix, tol: f64) {
        assert_eq!((a.nrows(), a.ncols()), (b.nrows(), b.ncols()));
        for i in 0..a.nrows() {
            for j in 0..a.ncols() {
                assert_abs_diff_eq!(get(a, i, j), get(b, i, j), epsilon = tol);
            }
        }
    }

    #[test]
    fn triplets_sum_duplicates_and_skip_zeros() {
        let m = from_triplets(2, 2, &[(0, 0, 1.), (0, 0, 2.), (1, 0, 0.), (1, 1, 5.)]).unwrap();
        assert_eq!(m.compute_nnz(), 2);
        assert_eq!(get(&m, 0, 0), 3.);
        assert_eq!(get(&m, 1, 0), 0.);
        assert!(is_diagonal(&m));
        assert!(matches!(
            from_triplets(2, 2, &[(2, 0, 1.)]),
            Err(RtoError::DimensionMismatch { expected: 2, found: 2, .. })
        ));
    }

    #[test]
    fn products_match_dense() {
        let a = tridiag(5);
        let x = [1., -2., 0.5, 3., 1.];
        let dense = a.to_dense();
        let y = mul_vec(&a, &x).unwrap();
        for i in 0..5 {
            let expected: f64 = (0..5).map(|j| dense[(i, j)] * x[j]).sum();
            assert_abs_diff_eq!(y[i], expected, epsilon = 1e-12);
        }
        let aa = matmul(&a, &a).unwrap().to_dense();
        let bb = matmul_dense(&a, dense.as_ref()).unwrap();
        let cc = dense_matmul(dense.as_ref(), &a).unwrap();
        for i in 0..5 {
            for j in 0..5 {
                assert_abs_diff_eq!(aa[(i, j)], bb[(i, j)], epsilon = 1e-12);
                assert_abs_diff_eq!(aa[(i, j)], cc[(i, j)], epsilon = 1e-12);
            }
        }
        let at = transpose(&a).unwrap();
        assert_eq!(transpose_mul_vec(&a, &x).unwrap(), mul_vec(&at, &x).unwrap());
    }

    #[test]
    fn products_reject_wrong_lengths() {
        let a = tridiag(3);
        assert!(matches!(
            mul_vec(&a, &[1., 2.]),
            Err(RtoError::DimensionMismatch { expected: 3, found: 2, .. })
        ));
        assert!(transpose_mul_vec(&a, &[1.; 4]).is_err());
        assert!(matmul(&a, &identity(2)).is_err());
    }

    #[test]
    fn cholesky_reconstructs_and_gives_logdet() {
        let a = tridiag(6);
        let chol = SparseCholesky::factorize(&a).unwrap();
        assert!(is_lower_triangular(chol.l()));
        let rebuilt = matmul(chol.l(), &chol.upper().unwrap()).unwrap();
        assert_same(&rebuilt, &a, 1e-12);

        let dense = a.to_dense();
        let llt = dense.llt(faer::Side::Lower).unwrap();
        let expected: f64 = 2. * (0..6).map(|i| llt.L()[(i, i)].ln()).sum::<f64>();
        assert_abs_diff_eq!(chol.logdet(), expected, epsilon = 1e-10);

        let inv = chol.inverse().unwrap();
        assert_same(&matmul(&a, &inv).unwrap(), &identity(6), 1e-10);

        let b = [1., 0., -1., 2., 0.5, 3.];
        let x = chol.solve(&b).unwrap();
        for (u, v) in mul_vec(&a, &x).unwrap().iter().zip(b.iter()) {
            assert_abs_diff_eq!(u, v, epsilon = 1e-12);
        }
    }

    #[test]
    fn ldl_square_root_matches_matrix() {
        let a = tridiag(4);
        let r = ldl_sqrt(&a).unwrap();
        assert!(is_upper_triangular(&r));
        let rebuilt = matmul(&transpose(&r).unwrap(), &r).unwrap();
        assert_same(&rebuilt, &a, 1e-12);
    }

    #[test]
    fn indefinite_matrix_is_rejected() {
        let a = from_triplets(2, 2, &[(0, 0, 1.), (0, 1, 3.), (1, 0, 3.), (1, 1, 1.)]).unwrap();
        assert!(matches!(
            SparseCholesky::factorize(&a),
            Err(RtoError::NotPositiveSemiDefinite { .. })
        ));
        assert!(matches!(ldl_sqrt(&a), Err(RtoError::NotPositiveSemiDefinite { .. })));
    }

    #[test]
    fn structural_rank_and_stacking() {
        let a = from_triplets(3, 3, &[(0, 0, 1.), (1, 0, 1.), (2, 2, 1.)]).unwrap();
        assert_eq!(structural_rank(&a), 2);
        let stacked = vstack(&[&a, &identity(3)]).unwrap();
        assert_eq!((stacked.nrows(), stacked.ncols()), (6, 3));
        assert_eq!(get(&stacked, 4, 1), 1.);
        assert_eq!(structural_rank(&stacked), 3);
    }

    #[test]
    fn structural_rank_follows_long_augmenting_paths() {
        // the last column only reaches row 0, which forces every earlier
        // column to shift down by one row
        let n = 50_000;
        let mut triplets = vec![(0, n - 1, 1.)];
        for j in 0..n - 1 {
            triplets.push((j, j, 1.));
            triplets.push((j + 1, j, 1.));
        }
        let mat = from_triplets(n, n, &triplets).unwrap();
        assert_eq!(structural_rank(&mat), n);
    }

    #[test]
    fn triangular_solves() {
        let l = SparseCholesky::factorize(&tridiag(4)).unwrap().l().clone();
        let b = [1., 2., 3., 4.];
        let x = solve_lower_triangular(&l, &b).unwrap();
        for (u, v) in mul_vec(&l, &x).unwrap().iter().zip(b.iter()) {
            assert_abs_diff_eq!(u, v, epsilon = 1e-12);
        }
        let u = transpose(&l).unwrap();
        let x = solve_upper_triangular(&u, &b).unwrap();
        for (p, q) in mul_vec(&u, &x).unwrap().iter().zip(b.iter()) {
            assert_abs_diff_eq!(p, q, epsilon = 1e-12);
        }
        assert!(solve_lower_triangular(&l, &b[..3]).is_err());
        let singular = from_triplets(2, 2, &[(1, 0, 1.), (1, 1, 1.)]).unwrap();
        assert!(solve_lower_triangular(&singular, &[1., 1.]).is_err());
    }

    #[test]
    fn lu_inverse_of_nonsymmetric_matrix() {
        let a = from_triplets(2, 2, &[(0, 0, 2.), (0, 1, 1.), (1, 1, 4.)]).unwrap();
        let inv = lu_inverse(&a).unwrap();
        assert_same(&matmul(&a, &inv).unwrap(), &identity(2), 1e-12);
        let singular = from_triplets(2, 2, &[(0, 0, 1.), (0, 1, 1.), (1, 0, 1.), (1, 1, 1.)]).unwrap();
        assert!(lu_inverse(&singular).is_err());
    }
}

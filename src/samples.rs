use faer::Mat;

use crate::error::{Result, RtoError};

/// Draws stored as the columns of a `dim x n` matrix.
#[derive(Debug, Clone)]
pub struct Samples {
    values: Mat<f64>,
}

impl Samples {
    pub fn new(values: Mat<f64>) -> Self {
        Self { values }
    }

    pub fn from_points(dim: usize, points: &[Vec<f64>]) -> Result<Self> {
        if let Some(bad) = points.iter().find(|p| p.len() != dim) {
            return Err(RtoError::dim("sample", dim, bad.len()));
        }
        Ok(Self {
            values: Mat::from_fn(dim, points.len(), |i, j| points[j][i]),
        })
    }

    pub fn dim(&self) -> usize {
        self.values.nrows()
    }

    pub fn len(&self) -> usize {
        self.values.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn values(&self) -> &Mat<f64> {
        &self.values
    }

    pub fn point(&self, index: usize) -> &[f64] {
        self.values.col_as_slice(index)
    }

    /// Drop the first `burn` draws and keep every `thin`-th of the rest.
    pub fn burnthin(&self, burn: usize, thin: usize) -> Samples {
        let thin = thin.max(1);
        let kept: Vec<usize> = (burn..self.len()).step_by(thin).collect();
        Samples {
            values: Mat::from_fn(self.dim(), kept.len(), |i, j| self.values[(i, kept[j])]),
        }
    }

    pub fn mean(&self) -> Vec<f64> {
        let n = self.len() as f64;
        (0..self.dim())
            .map(|i| (0..self.len()).map(|j| self.values[(i, j)]).sum::<f64>() / n)
            .collect()
    }

    /// Per-coordinate variance with divisor `n`.
    pub fn variance(&self) -> Vec<f64> {
        let n = self.len() as f64;
        self.mean()
            .into_iter()
            .enumerate()
            .map(|(i, mean)| {
                (0..self.len())
                    .map(|j| (self.values[(i, j)] - mean).powi(2))
                    .sum::<f64>()
                    / n
            })
            .collect()
    }
}

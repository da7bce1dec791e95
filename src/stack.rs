use log::debug;

use crate::{
    error::{Result, RtoError},
    model::LinearModel,
    operator::{ClosureOperator, LinearOperator, Matrix},
    posterior::Likelihood,
    prior::GaussianPrior,
};

/// The perturbation-free least-squares system `M x ≈ b` of a linear
/// Gaussian posterior.
#[derive(Debug, Clone)]
pub struct LinearSystem {
    /// Either one explicit matrix or a matrix-free operator.
    pub operator: LinearModel,
    pub rhs: Vec<f64>,
}

impl LinearSystem {
    pub fn nrows(&self) -> usize {
        self.operator.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.operator.ncols()
    }
}

/// Stack the whitened likelihood blocks `L_i A_i` over the prior
/// square-root precision, with right-hand side
/// `[L_1 d_1, ..., L_k d_k, S m]`.
pub fn build_linear_system<P: GaussianPrior + ?Sized>(likelihoods: &[Likelihood], prior: &P) -> Result<LinearSystem> {
    if likelihoods.is_empty() {
        return Err(RtoError::InvalidTarget("no likelihood to stack".into()));
    }

    let mut rhs = Vec::new();
    let mut blocks = Vec::with_capacity(likelihoods.len());
    for likelihood in likelihoods {
        let model = likelihood
            .model()
            .as_linear()
            .ok_or_else(|| RtoError::InvalidTarget("every likelihood model must be linear".into()))?;
        if model.ncols() != prior.dim() {
            return Err(RtoError::dim("likelihood model domain", prior.dim(), model.ncols()));
        }
        let sqrtprec = likelihood.distribution().sqrtprec();
        rhs.extend(sqrtprec.apply(likelihood.data())?);
        blocks.push((sqrtprec.clone(), model.clone()));
    }
    rhs.extend(prior.sqrtprec_times_mean()?);
    let prior_sqrtprec = prior.sqrtprec().clone();

    let explicit = blocks.iter().filter(|(_, model)| model.matrix().is_some()).count();
    let operator = if explicit == blocks.len() {
        let mut stacked = Vec::with_capacity(blocks.len() + 1);
        for (sqrtprec, model) in &blocks {
            if let Some(matrix) = model.matrix() {
                stacked.push(sqrtprec.matmul(matrix)?);
            }
        }
        stacked.push(prior_sqrtprec);
        let matrix = Matrix::vstack(&stacked)?;
        debug!("stacked an explicit {}x{} system", matrix.nrows(), matrix.ncols());
        LinearModel::Matrix(matrix)
    } else if explicit == 0 {
        debug!("stacked a matrix-free system of {} likelihoods", blocks.len());
        LinearModel::Operator(virtual_operator(blocks, prior_sqrtprec))
    } else {
        return Err(RtoError::MixedOperatorType);
    };

    if operator.nrows() != rhs.len() {
        return Err(RtoError::dim("stacked right-hand side", operator.nrows(), rhs.len()));
    }
    Ok(LinearSystem { operator, rhs })
}

fn virtual_operator(blocks: Vec<(Matrix, LinearModel)>, prior_sqrtprec: Matrix) -> ClosureOperator {
    let nrows = blocks.iter().map(|(sqrtprec, _)| sqrtprec.nrows()).sum::<usize>() + prior_sqrtprec.nrows();
    let ncols = prior_sqrtprec.ncols();
    let forward_blocks = blocks.clone();
    let forward_prior = prior_sqrtprec.clone();
    ClosureOperator::try_new(
        nrows,
        ncols,
        move |x| {
            let mut out = Vec::with_capacity(nrows);
            for (sqrtprec, model) in &forward_blocks {
                out.extend(sqrtprec.apply(&model.apply(x)?)?);
            }
            out.extend(forward_prior.apply(x)?);
            Ok(out)
        },
        move |y| {
            if y.len() != nrows {
                return Err(RtoError::dim("stacked adjoint input", nrows, y.len()));
            }
            let mut out = vec![0f64; ncols];
            let mut rest = y;
            for (sqrtprec, model) in &blocks {
                let (segment, tail) = rest.split_at(sqrtprec.nrows());
                rest = tail;
                let contribution = model.apply_adjoint(&sqrtprec.apply_adjoint(segment)?)?;
                out.iter_mut().zip(contribution).for_each(|(o, c)| *o += c);
            }
            let prior_part = prior_sqrtprec.apply_adjoint(rest)?;
            out.iter_mut().zip(prior_part).for_each(|(o, c)| *o += c);
            Ok(out)
        },
    )
}

use log::{trace, warn};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, RtoError},
    math::{axpy, axpy_new, norm, norm_sq},
    operator::LinearOperator,
    prior::Proximal,
};

fn check_system<O: LinearOperator + ?Sized>(op: &O, b: &[f64], x0: &[f64]) -> Result<()> {
    if b.len() != op.nrows() {
        return Err(RtoError::dim("right-hand side", op.nrows(), b.len()));
    }
    if x0.len() != op.ncols() {
        return Err(RtoError::dim("initial iterate", op.ncols(), x0.len()));
    }
    Ok(())
}

/// Conjugate gradient on the normal equations of
/// `min ‖A x - b‖² + shift ‖x‖²`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Cgls {
    pub maxit: usize,
    /// Relative tolerance on the normal equation residual.
    pub tol: f64,
    pub shift: f64,
}

impl Default for Cgls {
    fn default() -> Self {
        Self {
            maxit: 10,
            tol: 1e-6,
            shift: 0.,
        }
    }
}

impl Cgls {
    /// Returns the last iterate and the number of iterations used.
    pub fn solve<O: LinearOperator + ?Sized>(&self, op: &O, b: &[f64], x0: &[f64]) -> Result<(Vec<f64>, usize)> {
        check_system(op, b, x0)?;
        let mut x = x0.to_vec();
        let mut r = op.apply(&x)?;
        r.iter_mut().zip(b).for_each(|(r, b)| *r = b - *r);
        let mut s = op.apply_adjoint(&r)?;
        axpy(&x, &mut s, -self.shift);
        let mut p = s.clone();

        let norms0 = norm(&s);
        if norms0 == 0. {
            return Ok((x, 0));
        }
        let mut gamma = norms0 * norms0;

        let mut iterations = 0;
        while iterations < self.maxit {
            iterations += 1;
            let q = op.apply(&p)?;
            let delta = norm_sq(&q) + self.shift * norm_sq(&p);
            if delta <= 0. {
                break;
            }
            let alpha = gamma / delta;
            axpy(&p, &mut x, alpha);
            axpy(&q, &mut r, -alpha);

            s = op.apply_adjoint(&r)?;
            axpy(&x, &mut s, -self.shift);
            let norms = norm(&s);
            let gamma_prev = gamma;
            gamma = norms * norms;
            p = axpy_new(&p, &s, gamma / gamma_prev);

            trace!("cgls iteration {iterations}: residual {norms:e}");
            if norms <= norms0 * self.tol || norm(&x) * self.tol >= 1. {
                return Ok((x, iterations));
            }
        }
        warn!("cgls stopped at the iteration cap of {} without converging", self.maxit);
        Ok((x, iterations))
    }
}

/// Proximal gradient for `min ½ ‖A x - b‖² + g(x)` where `g` is given
/// through its proximal operator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fista {
    pub maxit: usize,
    pub stepsize: f64,
    pub abstol: f64,
    /// Use Nesterov momentum. Without it the iteration is plain ISTA.
    pub adaptive: bool,
}

impl Fista {
    pub fn solve<O: LinearOperator + ?Sized>(
        &self,
        op: &O,
        b: &[f64],
        x0: &[f64],
        proximal: &Proximal,
    ) -> Result<(Vec<f64>, usize)> {
        check_system(op, b, x0)?;
        let mut x = x0.to_vec();
        let mut z = x.clone();
        let mut t = 1f64;

        for iteration in 1..=self.maxit {
            let mut residual = op.apply(&z)?;
            residual.iter_mut().zip(b).for_each(|(r, b)| *r -= b);
            let grad = op.apply_adjoint(&residual)?;
            let x_next = proximal.apply(&axpy_new(&grad, &z, -self.stepsize), self.stepsize);
            if x_next.len() != x.len() {
                return Err(RtoError::dim("proximal output", x.len(), x_next.len()));
            }

            let diff: Vec<f64> = x_next.iter().zip(&x).map(|(a, b)| a - b).collect();
            let change = norm(&diff);
            z = if self.adaptive {
                let t_next = 0.5 * (1. + (1. + 4. * t * t).sqrt());
                let momentum = (t - 1.) / t_next;
                t = t_next;
                axpy_new(&diff, &x_next, momentum)
            } else {
                x_next.clone()
            };
            x = x_next;

            trace!("fista iteration {iteration}: step change {change:e}");
            if change <= self.abstol {
                return Ok((x, iteration));
            }
        }
        warn!("fista stopped at the iteration cap of {} without converging", self.maxit);
        Ok((x, self.maxit))
    }
}

/// Estimate of the largest singular value of `op` by power iteration on
/// `AᵀA`, started from a fixed vector so the result is deterministic.
pub fn estimate_spectral_norm<O: LinearOperator + ?Sized>(op: &O, iterations: usize) -> Result<f64> {
    let n = op.ncols();
    let mut v: Vec<f64> = (0..n).map(|i| 1. + (0.618_033_988_749_895 * i as f64).fract()).collect();
    let mut estimate = 0.;
    for _ in 0..iterations {
        let v_norm = norm(&v);
        if v_norm == 0. {
            return Ok(0.);
        }
        v.iter_mut().for_each(|x| *x /= v_norm);
        let w = op.apply(&v)?;
        estimate = norm(&w);
        v = op.apply_adjoint(&w)?;
    }
    Ok(estimate)
}

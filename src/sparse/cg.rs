//! Preconditioned conjugate gradient for sparse symmetric positive-definite systems.

use log::trace;

use super::{CsrMatrix, IncompleteCholesky, Preconditioner};
use crate::error::SolverError;

/// Result of a conjugate gradient run.
///
/// `solution` is always the last iterate, whether or not the tolerance was met.
#[derive(Debug, Clone, PartialEq)]
pub struct CgOutcome {
    pub solution: Vec<f64>,
    pub iterations: usize,
    pub residual_norm: f64,
    /// Tolerance the residual norm was compared against.
    pub tolerance: f64,
    pub converged: bool,
}

/// Preconditioned conjugate gradient solver.
///
/// Iterates until `||b - A x|| <= max(atol, rtol * ||b||)` or `max_iter`
/// iterations have been performed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConjugateGradient {
    pub max_iter: usize,
    pub atol: f64,
    pub rtol: f64,
}

impl Default for ConjugateGradient {
    fn default() -> Self {
        Self {
            max_iter: 1000,
            atol: 0.0,
            rtol: 1e-5,
        }
    }
}

impl ConjugateGradient {
    pub const fn new(max_iter: usize, atol: f64, rtol: f64) -> Self {
        Self {
            max_iter,
            atol,
            rtol,
        }
    }

    /// Solves `matrix * x = rhs` starting from `x = 0`.
    ///
    /// # Errors
    /// Returns [`SolverError`] if the matrix is not square or `rhs` has the
    /// wrong length. Non-convergence is reported through
    /// [`CgOutcome::converged`], not as an error.
    pub fn solve<P>(
        &self,
        matrix: &CsrMatrix,
        rhs: &[f64],
        preconditioner: &P,
    ) -> Result<CgOutcome, SolverError>
    where
        P: Preconditioner + ?Sized,
    {
        let n = matrix.rows();
        if matrix.cols() != n {
            return Err(SolverError::NotSquare {
                rows: n,
                cols: matrix.cols(),
            });
        }
        if rhs.len() != n {
            return Err(SolverError::DimensionMismatch {
                rows: n,
                cols: n,
                len: rhs.len(),
            });
        }

        let tolerance = self.atol.max(self.rtol * norm(rhs));

        let mut x = vec![0.0f64; n];
        let mut r = rhs.to_vec();
        let mut residual_norm = norm(&r);
        if residual_norm <= tolerance {
            return Ok(CgOutcome {
                solution: x,
                iterations: 0,
                residual_norm,
                tolerance,
                converged: true,
            });
        }

        let mut z = vec![0.0f64; n];
        preconditioner.apply(&r, &mut z);
        let mut p = z.clone();
        let mut rz = dot(&r, &z);
        let mut ap = vec![0.0f64; n];

        for iteration in 1..=self.max_iter {
            matrix.spmv(&p, &mut ap);
            let p_ap = dot(&p, &ap);
            if p_ap <= 0.0 || !p_ap.is_finite() {
                // Search direction lost positive curvature; keep the current iterate.
                trace!("CG stopped at iteration {iteration}: p^T A p = {p_ap:e}");
                return Ok(CgOutcome {
                    solution: x,
                    iterations: iteration - 1,
                    residual_norm,
                    tolerance,
                    converged: false,
                });
            }

            let alpha = rz / p_ap;
            for i in 0..n {
                x[i] += alpha * p[i];
                r[i] -= alpha * ap[i];
            }

            residual_norm = norm(&r);
            trace!("CG iteration {iteration}: residual {residual_norm:e}");
            if residual_norm <= tolerance {
                return Ok(CgOutcome {
                    solution: x,
                    iterations: iteration,
                    residual_norm,
                    tolerance,
                    converged: true,
                });
            }

            preconditioner.apply(&r, &mut z);
            let rz_next = dot(&r, &z);
            let beta = rz_next / rz;
            rz = rz_next;
            for i in 0..n {
                p[i] = z[i] + beta * p[i];
            }
        }

        Ok(CgOutcome {
            solution: x,
            iterations: self.max_iter,
            residual_norm,
            tolerance,
            converged: false,
        })
    }
}

/// Pluggable sparse linear-algebra backend.
///
/// The closed-form estimator factors the system matrix once and solves it
/// once per color channel; any backend that can do both can be swapped in.
pub trait SparseBackend: Sync {
    type Factor: Preconditioner;

    /// Builds the preconditioner for `matrix`.
    fn factorize(&self, matrix: &CsrMatrix, threshold: f64) -> Result<Self::Factor, SolverError>;

    /// Solves `matrix * x = rhs` using `factor` as preconditioner.
    fn solve(
        &self,
        matrix: &CsrMatrix,
        rhs: &[f64],
        factor: &Self::Factor,
        solver: &ConjugateGradient,
    ) -> Result<CgOutcome, SolverError>;
}

/// Threshold incomplete Cholesky preconditioner with conjugate gradient.
#[derive(Debug, Clone, Copy, Default)]
pub struct IcholCg;

impl SparseBackend for IcholCg {
    type Factor = IncompleteCholesky;

    fn factorize(&self, matrix: &CsrMatrix, threshold: f64) -> Result<Self::Factor, SolverError> {
        IncompleteCholesky::factorize(matrix, threshold)
    }

    fn solve(
        &self,
        matrix: &CsrMatrix,
        rhs: &[f64],
        factor: &Self::Factor,
        solver: &ConjugateGradient,
    ) -> Result<CgOutcome, SolverError> {
        solver.solve(matrix, rhs, factor)
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}

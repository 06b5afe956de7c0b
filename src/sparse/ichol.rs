//! Threshold incomplete Cholesky factorization.
//!
//! Computes a sparse lower triangular `L` with `L * L^T ≈ A` for a symmetric
//! positive (semi-)definite `A`. Sub-diagonal entries whose magnitude falls
//! below the drop threshold are discarded to bound fill-in. The factor is only
//! ever used to precondition the conjugate gradient solver, so an
//! approximation is all that is required.

use log::debug;

use super::CsrMatrix;
use crate::error::SolverError;

/// Relative diagonal shifts tried in order when a pivot turns non-positive.
const DIAGONAL_SHIFTS: [f64; 12] = [
    0.0, 1e-4, 1e-3, 1e-2, 1e-1, 0.5, 1.0, 10.0, 1e2, 1e3, 1e4, 1e5,
];

/// Absolute part of each shift, relative to the largest diagonal entry, so
/// that structurally zero pivots can recover as well.
const RELATIVE_FLOOR: f64 = 1e-8;

/// Approximate inverse applied to a residual vector.
pub trait Preconditioner: Sync {
    /// Writes `M^-1 * r` into `z`.
    fn apply(&self, r: &[f64], z: &mut [f64]);
}

/// No-op preconditioner, turning preconditioned CG into plain CG.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl Preconditioner for Identity {
    fn apply(&self, r: &[f64], z: &mut [f64]) {
        z.copy_from_slice(r);
    }
}

/// Lower triangular incomplete Cholesky factor stored column-wise.
///
/// The first entry of every column is its diagonal.
#[derive(Debug, Clone)]
pub struct IncompleteCholesky {
    n: usize,
    col_ptr: Vec<usize>,
    row_indices: Vec<usize>,
    values: Vec<f64>,
    shift: f64,
}

impl IncompleteCholesky {
    /// Factorizes `matrix`, dropping sub-diagonal entries with
    /// `|L_ij| < threshold`.
    ///
    /// Only the lower triangle of `matrix` is read. When a pivot becomes
    /// non-positive the diagonal is scaled by `1 + shift`, plus a small
    /// absolute term, for increasing shifts and the factorization restarts.
    ///
    /// # Errors
    /// * [`SolverError::NotSquare`] for rectangular input
    /// * [`SolverError::FactorizationBreakdown`] when every shift fails
    pub fn factorize(matrix: &CsrMatrix, threshold: f64) -> Result<Self, SolverError> {
        if matrix.rows() != matrix.cols() {
            return Err(SolverError::NotSquare {
                rows: matrix.rows(),
                cols: matrix.cols(),
            });
        }

        let max_diagonal = matrix
            .diagonal()
            .iter()
            .fold(0.0f64, |m, d| m.max(d.abs()));
        let floor = if max_diagonal > 0.0 {
            max_diagonal * RELATIVE_FLOOR
        } else {
            RELATIVE_FLOOR
        };

        let mut last_failure = (0, 0.0);
        for shift in DIAGONAL_SHIFTS {
            match factorize_shifted(matrix, threshold, shift, shift * floor) {
                Ok(factor) => {
                    if shift > 0.0 {
                        debug!("incomplete Cholesky succeeded with diagonal shift {shift}");
                    }
                    return Ok(factor);
                }
                Err(failure) => {
                    debug!(
                        "incomplete Cholesky breakdown at column {} (pivot {:e}) with shift {shift}",
                        failure.0, failure.1
                    );
                    last_failure = failure;
                }
            }
        }

        Err(SolverError::FactorizationBreakdown {
            column: last_failure.0,
            pivot: last_failure.1,
        })
    }

    /// Dimension of the factored matrix.
    pub const fn size(&self) -> usize {
        self.n
    }

    /// Stored entries of `L`, diagonal included.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Diagonal shift that was needed for the factorization to succeed.
    pub const fn shift(&self) -> f64 {
        self.shift
    }

    /// Solves `L * L^T * x = b` by forward and backward substitution.
    pub fn solve(&self, b: &[f64]) -> Vec<f64> {
        let mut x = b.to_vec();
        self.solve_in_place(&mut x);
        x
    }

    fn solve_in_place(&self, x: &mut [f64]) {
        // L y = b
        for j in 0..self.n {
            let start = self.col_ptr[j];
            let end = self.col_ptr[j + 1];
            x[j] /= self.values[start];
            let xj = x[j];
            for p in start + 1..end {
                x[self.row_indices[p]] -= self.values[p] * xj;
            }
        }

        // L^T x = y
        for j in (0..self.n).rev() {
            let start = self.col_ptr[j];
            let end = self.col_ptr[j + 1];
            let mut sum = x[j];
            for p in start + 1..end {
                sum -= self.values[p] * x[self.row_indices[p]];
            }
            x[j] = sum / self.values[start];
        }
    }
}

impl Preconditioner for IncompleteCholesky {
    fn apply(&self, r: &[f64], z: &mut [f64]) {
        z.copy_from_slice(r);
        self.solve_in_place(z);
    }
}

/// Left-looking column factorization.
///
/// `pending[r]` lists the already finished columns whose next unconsumed
/// entry lies in row `r`; `next[k]` is that entry's position in column `k`.
fn factorize_shifted(
    matrix: &CsrMatrix,
    threshold: f64,
    shift: f64,
    floor: f64,
) -> Result<IncompleteCholesky, (usize, f64)> {
    let n = matrix.rows();
    let mut col_ptr = Vec::with_capacity(n + 1);
    let mut row_indices: Vec<usize> = Vec::new();
    let mut values: Vec<f64> = Vec::new();

    let mut work = vec![0.0f64; n];
    let mut in_pattern = vec![false; n];
    let mut pattern: Vec<usize> = Vec::new();
    let mut next = vec![0usize; n];
    let mut pending: Vec<Vec<usize>> = vec![Vec::new(); n];

    col_ptr.push(0);
    for j in 0..n {
        // Column j of the lower triangle; A is symmetric so row j is used.
        let (cols, vals) = matrix.row(j);
        let mut diagonal = floor;
        for (&i, &v) in cols.iter().zip(vals) {
            if i == j {
                diagonal += v * (1.0 + shift);
            } else if i > j {
                work[i] = v;
                if !in_pattern[i] {
                    in_pattern[i] = true;
                    pattern.push(i);
                }
            }
        }

        for k in std::mem::take(&mut pending[j]) {
            let pos = next[k];
            let l_jk = values[pos];
            diagonal -= l_jk * l_jk;

            for p in pos + 1..col_ptr[k + 1] {
                let i = row_indices[p];
                work[i] -= values[p] * l_jk;
                if !in_pattern[i] {
                    in_pattern[i] = true;
                    pattern.push(i);
                }
            }

            if pos + 1 < col_ptr[k + 1] {
                next[k] = pos + 1;
                pending[row_indices[pos + 1]].push(k);
            }
        }

        if diagonal <= 0.0 || !diagonal.is_finite() {
            return Err((j, diagonal));
        }
        let l_jj = diagonal.sqrt();

        row_indices.push(j);
        values.push(l_jj);

        pattern.sort_unstable();
        for &i in &pattern {
            let l_ij = work[i] / l_jj;
            if l_ij.abs() >= threshold && l_ij != 0.0 {
                row_indices.push(i);
                values.push(l_ij);
            }
            work[i] = 0.0;
            in_pattern[i] = false;
        }
        pattern.clear();

        let diag_pos = col_ptr[j];
        col_ptr.push(row_indices.len());
        if diag_pos + 1 < row_indices.len() {
            next[j] = diag_pos + 1;
            pending[row_indices[diag_pos + 1]].push(j);
        }
    }

    Ok(IncompleteCholesky {
        n,
        col_ptr,
        row_indices,
        values,
        shift,
    })
}

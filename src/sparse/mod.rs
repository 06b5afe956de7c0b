//! Sparse linear algebra used by the closed-form estimator.
//!
//! Provides a compressed sparse row matrix with the handful of operations the
//! estimator needs (products, transposes, block assembly), the grid
//! convolution matrices used as directional derivatives, a threshold
//! incomplete Cholesky preconditioner and a preconditioned conjugate gradient
//! solver.

pub mod cg;
pub mod ichol;

pub use cg::{CgOutcome, ConjugateGradient, IcholCg, SparseBackend};
pub use ichol::{Identity, IncompleteCholesky, Preconditioner};

use crate::error::SolverError;
use crate::utils::pixel_coordinates;

/// Compressed sparse row matrix of `f64` values.
///
/// Column indices are sorted within each row and contain no duplicates.
#[derive(Debug, Clone, PartialEq)]
pub struct CsrMatrix {
    rows: usize,
    cols: usize,
    row_ptr: Vec<usize>,
    col_indices: Vec<usize>,
    values: Vec<f64>,
}

impl CsrMatrix {
    /// Builds a matrix from `(row, col, value)` triplets.
    ///
    /// Duplicate entries are summed and entries that sum to exactly zero are
    /// dropped.
    ///
    /// # Panics
    /// Panics if a triplet lies outside of `rows x cols`.
    pub fn from_triplets(
        rows: usize,
        cols: usize,
        triplets: impl IntoIterator<Item = (usize, usize, f64)>,
    ) -> Self {
        let mut entries: Vec<(usize, usize, f64)> = triplets.into_iter().collect();
        for &(r, c, _) in &entries {
            assert!(
                r < rows && c < cols,
                "triplet ({r}, {c}) outside of {rows}x{cols} matrix"
            );
        }
        entries.sort_unstable_by_key(|&(r, c, _)| (r, c));

        let mut row_ptr = vec![0usize; rows + 1];
        let mut col_indices = Vec::with_capacity(entries.len());
        let mut values = Vec::with_capacity(entries.len());

        let mut iter = entries.into_iter().peekable();
        while let Some((r, c, mut v)) = iter.next() {
            while let Some(&(r2, c2, v2)) = iter.peek() {
                if r2 != r || c2 != c {
                    break;
                }
                v += v2;
                iter.next();
            }
            if v != 0.0 {
                col_indices.push(c);
                values.push(v);
                row_ptr[r + 1] += 1;
            }
        }
        for i in 0..rows {
            row_ptr[i + 1] += row_ptr[i];
        }

        Self {
            rows,
            cols,
            row_ptr,
            col_indices,
            values,
        }
    }

    /// Square diagonal matrix with `diagonal` on its main diagonal.
    pub fn from_diagonal(diagonal: &[f64]) -> Self {
        let n = diagonal.len();
        Self::from_triplets(n, n, diagonal.iter().enumerate().map(|(i, &v)| (i, i, v)))
    }

    pub fn identity(n: usize) -> Self {
        Self::from_diagonal(&vec![1.0; n])
    }

    pub const fn rows(&self) -> usize {
        self.rows
    }

    pub const fn cols(&self) -> usize {
        self.cols
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Column indices and values of row `i`.
    pub fn row(&self, i: usize) -> (&[usize], &[f64]) {
        let range = self.row_ptr[i]..self.row_ptr[i + 1];
        (&self.col_indices[range.clone()], &self.values[range])
    }

    /// Entry at `(i, j)`, zero if not stored.
    pub fn get(&self, i: usize, j: usize) -> f64 {
        let (cols, vals) = self.row(i);
        cols.binary_search(&j).map_or(0.0, |k| vals[k])
    }

    /// Main diagonal as a dense vector.
    pub fn diagonal(&self) -> Vec<f64> {
        (0..self.rows.min(self.cols)).map(|i| self.get(i, i)).collect()
    }

    /// Sparse matrix-vector product `y = A * x` into a caller-provided buffer.
    ///
    /// # Panics
    /// Panics if `x.len() != cols` or `y.len() != rows`.
    pub fn spmv(&self, x: &[f64], y: &mut [f64]) {
        assert_eq!(x.len(), self.cols, "spmv: input length mismatch");
        assert_eq!(y.len(), self.rows, "spmv: output length mismatch");
        for (i, out) in y.iter_mut().enumerate() {
            let (cols, vals) = self.row(i);
            *out = cols.iter().zip(vals).map(|(&j, &v)| v * x[j]).sum();
        }
    }

    /// Checked matrix-vector product returning a new vector.
    pub fn mul_vec(&self, x: &[f64]) -> Result<Vec<f64>, SolverError> {
        if x.len() != self.cols {
            return Err(SolverError::DimensionMismatch {
                rows: self.rows,
                cols: self.cols,
                len: x.len(),
            });
        }
        let mut y = vec![0.0; self.rows];
        self.spmv(x, &mut y);
        Ok(y)
    }

    /// Transpose `A^T`.
    pub fn transpose(&self) -> Self {
        let mut counts = vec![0usize; self.cols + 1];
        for &c in &self.col_indices {
            counts[c + 1] += 1;
        }
        for i in 0..self.cols {
            counts[i + 1] += counts[i];
        }
        let row_ptr = counts.clone();
        let mut offset = counts;
        let mut col_indices = vec![0usize; self.nnz()];
        let mut values = vec![0.0f64; self.nnz()];

        for i in 0..self.rows {
            let (cols, vals) = self.row(i);
            for (&j, &v) in cols.iter().zip(vals) {
                let pos = offset[j];
                col_indices[pos] = i;
                values[pos] = v;
                offset[j] += 1;
            }
        }

        Self {
            rows: self.cols,
            cols: self.rows,
            row_ptr,
            col_indices,
            values,
        }
    }

    /// Sparse-sparse product `A * B`.
    ///
    /// Uses a dense accumulator per output row that is cleared rather than
    /// reallocated between rows.
    pub fn matmul(&self, other: &Self) -> Result<Self, SolverError> {
        if self.cols != other.rows {
            return Err(SolverError::DimensionMismatch {
                rows: self.rows,
                cols: self.cols,
                len: other.rows,
            });
        }

        let n = other.cols;
        let mut row_ptr = Vec::with_capacity(self.rows + 1);
        let mut col_indices = Vec::new();
        let mut values = Vec::new();
        let mut acc = vec![0.0f64; n];
        let mut occupied = vec![false; n];
        let mut nz_cols: Vec<usize> = Vec::new();

        row_ptr.push(0);
        for i in 0..self.rows {
            let (a_cols, a_vals) = self.row(i);
            for (&k, &a) in a_cols.iter().zip(a_vals) {
                let (b_cols, b_vals) = other.row(k);
                for (&j, &b) in b_cols.iter().zip(b_vals) {
                    if !occupied[j] {
                        occupied[j] = true;
                        nz_cols.push(j);
                    }
                    acc[j] += a * b;
                }
            }

            nz_cols.sort_unstable();
            for &j in &nz_cols {
                if acc[j] != 0.0 {
                    col_indices.push(j);
                    values.push(acc[j]);
                }
                acc[j] = 0.0;
                occupied[j] = false;
            }
            nz_cols.clear();
            row_ptr.push(col_indices.len());
        }

        Ok(Self {
            rows: self.rows,
            cols: n,
            row_ptr,
            col_indices,
            values,
        })
    }

    /// Element-wise sum `A + B`.
    pub fn add(&self, other: &Self) -> Result<Self, SolverError> {
        if self.rows != other.rows || self.cols != other.cols {
            return Err(SolverError::DimensionMismatch {
                rows: self.rows,
                cols: self.cols,
                len: other.rows * other.cols,
            });
        }
        Ok(Self::from_triplets(
            self.rows,
            self.cols,
            self.triplets().chain(other.triplets()),
        ))
    }

    /// `diag(weights) * A`, i.e. row `i` multiplied by `weights[i]`.
    pub fn scale_rows(&self, weights: &[f64]) -> Result<Self, SolverError> {
        if weights.len() != self.rows {
            return Err(SolverError::DimensionMismatch {
                rows: self.rows,
                cols: self.cols,
                len: weights.len(),
            });
        }
        let mut scaled = self.clone();
        for (i, &w) in weights.iter().enumerate() {
            let range = scaled.row_ptr[i]..scaled.row_ptr[i + 1];
            scaled.values[range].iter_mut().for_each(|v| *v *= w);
        }
        Ok(scaled)
    }

    /// Block diagonal matrix `[[A, 0], [0, B]]`.
    pub fn block_diag(a: &Self, b: &Self) -> Self {
        let (r0, c0) = (a.rows, a.cols);
        Self::from_triplets(
            a.rows + b.rows,
            a.cols + b.cols,
            a.triplets()
                .chain(b.triplets().map(|(i, j, v)| (i + r0, j + c0, v))),
        )
    }

    /// Horizontal concatenation `[A, B]`.
    pub fn hstack(a: &Self, b: &Self) -> Result<Self, SolverError> {
        if a.rows != b.rows {
            return Err(SolverError::DimensionMismatch {
                rows: a.rows,
                cols: a.cols,
                len: b.rows,
            });
        }
        let c0 = a.cols;
        Ok(Self::from_triplets(
            a.rows,
            a.cols + b.cols,
            a.triplets().chain(b.triplets().map(|(i, j, v)| (i, j + c0, v))),
        ))
    }

    /// Iterates over stored entries as `(row, col, value)`.
    pub fn triplets(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        (0..self.rows).flat_map(move |i| {
            let (cols, vals) = self.row(i);
            cols.iter().zip(vals).map(move |(&j, &v)| (i, j, v))
        })
    }
}

/// Builds the `n x n` (`n = width * height`) matrix of a sparse 2D convolution.
///
/// Row `x + y * width` holds `weights[k]` at the column of pixel
/// `(x + dx_k, y + dy_k)`. Neighbours that fall outside of the grid are
/// clamped to the border, so a derivative whose neighbour is outside the grid
/// collapses to an empty row.
///
/// # Panics
/// Panics if `offsets` and `weights` differ in length.
pub fn sparse_conv_matrix(
    width: u32,
    height: u32,
    offsets: &[(i32, i32)],
    weights: &[f64],
) -> CsrMatrix {
    assert_eq!(
        offsets.len(),
        weights.len(),
        "one weight is required per offset"
    );
    let n = (width as usize) * (height as usize);
    let (xs, ys) = pixel_coordinates(width, height);
    let max_x = i64::from(width) - 1;
    let max_y = i64::from(height) - 1;

    let triplets = offsets.iter().zip(weights).flat_map(|(&(dx, dy), &w)| {
        xs.iter().zip(&ys).map(move |(&x, &y)| {
            let x2 = (i64::from(x) + i64::from(dx)).clamp(0, max_x) as usize;
            let y2 = (i64::from(y) + i64::from(dy)).clamp(0, max_y) as usize;
            let i = x as usize + y as usize * width as usize;
            (i, x2 + y2 * width as usize, w)
        })
    });

    CsrMatrix::from_triplets(n, n, triplets.collect::<Vec<_>>())
}

/// Forward difference `pixel - pixel(x + dx, y + dy)` as a sparse matrix.
pub fn directional_derivative(width: u32, height: u32, dx: i32, dy: i32) -> CsrMatrix {
    sparse_conv_matrix(width, height, &[(0, 0), (dx, dy)], &[1.0, -1.0])
}

use thiserror::Error;

/// Error type for the sparse linear-algebra backend
///
/// These errors are raised by the matrix constructors, the incomplete
/// Cholesky preconditioner, and the conjugate gradient solver.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolverError {
    /// Operand sizes do not line up
    ///
    /// Returned when a vector or second matrix does not match the
    /// dimensions of the matrix it is combined with.
    #[error("Dimension mismatch: matrix is {rows}x{cols}, operand has length {len}")]
    DimensionMismatch {
        /// Rows of the matrix
        rows: usize,
        /// Columns of the matrix
        cols: usize,
        /// Offending operand length
        len: usize,
    },

    /// The matrix is not square
    #[error("Matrix must be square, got {rows}x{cols}")]
    NotSquare { rows: usize, cols: usize },

    /// Incomplete factorization hit a non-positive pivot for every diagonal shift
    ///
    /// This happens when the matrix is far from positive definite.
    #[error("Incomplete Cholesky breakdown at column {column} (pivot {pivot})")]
    FactorizationBreakdown {
        /// Column at which the last attempt failed
        column: usize,
        /// Value of the offending pivot
        pivot: f64,
    },
}

/// Error type for foreground/background estimation
///
/// Configuration and input problems are reported before any linear algebra
/// begins. Solver non-convergence is never returned by the estimators; it can
/// be materialized from a [`ChannelReport`](crate::ChannelReport) when a
/// caller wants to treat it as fatal.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// Unrecognized method selector
    ///
    /// Only `"cf"` (closed form) and `"ml"` (multilevel) are accepted.
    #[error("Invalid method {0}: expected either cf or ml")]
    InvalidMethod(String),

    /// Image and alpha matte dimensions do not match
    #[error("Image and alpha dimensions do not match: expected {expected:?}, actual {actual:?}")]
    DimensionMismatch {
        /// Expected dimensions (width, height)
        expected: (u32, u32),
        /// Actual dimensions (width, height)
        actual: (u32, u32),
    },

    /// The image has no pixels
    #[error("Image dimensions must be non-zero, got {width}x{height}")]
    EmptyImage { width: u32, height: u32 },

    /// An alpha value lies outside of [0, 1] after normalization
    ///
    /// NaN alpha values are reported through this variant as well.
    #[error("Alpha value {value} at ({x}, {y}) is outside of [0, 1]")]
    AlphaOutOfRange { x: u32, y: u32, value: f32 },

    /// An image value is NaN or infinite
    #[error("Image value at ({x}, {y}) is not finite")]
    NonFiniteImage { x: u32, y: u32 },

    /// Invalid parameter provided to the estimator
    ///
    /// Returned for non-positive regularization, `min_size < 1`,
    /// `growth_factor <= 1`, negative tolerances and similar.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// The iterative solver exhausted its iteration budget
    #[error("Channel {channel} did not converge after {iterations} iterations (residual {residual:e}, tolerance {tolerance:e})")]
    SolverNonConvergence {
        /// Color channel index (0..3)
        channel: usize,
        /// Iterations performed
        iterations: usize,
        /// Residual norm of the returned iterate
        residual: f64,
        /// Tolerance that was not met
        tolerance: f64,
    },

    /// Failure inside the sparse backend
    #[error(transparent)]
    Solver(#[from] SolverError),
}

impl Error {
    /// Returns true for errors caused by malformed inputs or configuration.
    pub const fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            Self::DimensionMismatch { .. }
                | Self::EmptyImage { .. }
                | Self::AlphaOutOfRange { .. }
                | Self::NonFiniteImage { .. }
                | Self::InvalidParameter(_)
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

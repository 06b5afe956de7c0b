//! Closed-form foreground/background estimation.
//!
//! Recovers the foreground `F` and background `B` layers of an image whose
//! alpha matte is known by minimizing, per color channel,
//!
//! ```text
//! Σ_i (α_i F_i + (1 - α_i) B_i - I_i)²
//!   + Σ_d Σ_i (ε + |∂_d α_i|) ((∂_d F_i)² + (∂_d B_i)²)
//! ```
//!
//! over all pixels `i` and neighbor directions `d`. The minimizer is the
//! solution of one sparse symmetric positive-definite system of size
//! `2 * width * height`, shared by all three channels. The system matrix is
//! factored once with a threshold incomplete Cholesky decomposition and each
//! channel is then solved with preconditioned conjugate gradient.
//!
//! Based on: Levin, Lischinski and Weiss, "A closed-form solution to natural
//! image matting", IEEE TPAMI 30(2), 2008.

use image::{Luma, Pixel, Primitive, Rgb};
use imageproc::definitions::{Clamp, Image};
use log::{debug, info, warn};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::error::{Error, Result, SolverError};
use crate::sparse::{directional_derivative, ConjugateGradient, CsrMatrix, IcholCg, SparseBackend};
use crate::utils::{denormalize_image, prepare_inputs, validate_regularization, ColorImage};

/// Four axis-aligned neighbors.
pub const DEFAULT_NEIGHBORS: [(i32, i32); 4] = [(-1, 0), (1, 0), (0, -1), (0, 1)];

/// Configuration of the closed-form estimator.
#[derive(Debug, Clone, PartialEq)]
pub struct ClosedFormOptions {
    /// Drop threshold of the incomplete Cholesky preconditioner.
    pub ichol_threshold: f64,
    /// Smoothing weight for regions where alpha carries no information.
    pub regularization: f64,
    /// Offsets `(dx, dy)` of the neighbors used in the smoothness term.
    pub neighbors: Vec<(i32, i32)>,
    /// Conjugate gradient iteration budget.
    pub max_iter: usize,
    /// Absolute residual tolerance.
    pub atol: f64,
    /// Residual tolerance relative to the norm of the right-hand side.
    pub rtol: f64,
    /// Report progress at info level instead of debug level.
    pub verbose: bool,
}

impl Default for ClosedFormOptions {
    fn default() -> Self {
        Self {
            ichol_threshold: 1e-4,
            regularization: 1e-5,
            neighbors: DEFAULT_NEIGHBORS.to_vec(),
            max_iter: 1000,
            atol: 0.0,
            rtol: 1e-5,
            verbose: false,
        }
    }
}

impl ClosedFormOptions {
    #[must_use]
    pub fn with_ichol_threshold(mut self, ichol_threshold: f64) -> Self {
        self.ichol_threshold = ichol_threshold;
        self
    }

    #[must_use]
    pub fn with_regularization(mut self, regularization: f64) -> Self {
        self.regularization = regularization;
        self
    }

    #[must_use]
    pub fn with_neighbors(mut self, neighbors: Vec<(i32, i32)>) -> Self {
        self.neighbors = neighbors;
        self
    }

    #[must_use]
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    #[must_use]
    pub fn with_tolerances(mut self, atol: f64, rtol: f64) -> Self {
        self.atol = atol;
        self.rtol = rtol;
        self
    }

    #[must_use]
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Checks every parameter before any work is done.
    pub fn validate(&self) -> Result<()> {
        validate_regularization(self.regularization)?;

        if !(self.ichol_threshold >= 0.0 && self.ichol_threshold.is_finite()) {
            return Err(Error::InvalidParameter(format!(
                "ichol_threshold must be a non-negative finite number, got {}",
                self.ichol_threshold
            )));
        }
        if !(self.atol >= 0.0 && self.rtol >= 0.0) {
            return Err(Error::InvalidParameter(format!(
                "tolerances must be non-negative, got atol={} rtol={}",
                self.atol, self.rtol
            )));
        }
        if self.neighbors.is_empty() {
            return Err(Error::InvalidParameter(
                "at least one neighbor offset is required".to_string(),
            ));
        }
        if self.neighbors.contains(&(0, 0)) {
            return Err(Error::InvalidParameter(
                "neighbor offset (0, 0) does not define a derivative".to_string(),
            ));
        }
        Ok(())
    }

    const fn solver(&self) -> ConjugateGradient {
        ConjugateGradient::new(self.max_iter, self.atol, self.rtol)
    }
}

/// Convergence summary of one channel solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelReport {
    pub channel: usize,
    pub iterations: usize,
    pub residual_norm: f64,
    pub tolerance: f64,
    pub converged: bool,
}

impl ChannelReport {
    /// Turns a non-converged solve into [`Error::SolverNonConvergence`].
    pub fn check(&self) -> Result<()> {
        if self.converged {
            Ok(())
        } else {
            Err(Error::SolverNonConvergence {
                channel: self.channel,
                iterations: self.iterations,
                residual: self.residual_norm,
                tolerance: self.tolerance,
            })
        }
    }
}

/// Estimates foreground and background with the closed-form method.
///
/// # Arguments
/// * `image` - Observed RGB image
/// * `alpha` - Alpha matte of the same size (0 = background, max = foreground)
/// * `options` - Solver configuration
///
/// # Returns
/// * `Ok((foreground, background))` - Both layers, clamped to the valid range
/// * `Err(Error)` - If inputs or options are invalid, or the preconditioner
///   cannot be built
///
/// Solver non-convergence is not an error; the last iterate is used. Use
/// [`estimate_foreground_background_cf_with_report`] to inspect convergence.
///
/// # Examples
/// ```no_run
/// use fb_estimation::{estimate_foreground_background_cf, ClosedFormOptions, Image};
/// use image::{Luma, Rgb};
///
/// # fn example() -> Result<(), fb_estimation::Error> {
/// let image: Image<Rgb<f32>> = Image::new(64, 48);
/// let alpha: Image<Luma<f32>> = Image::new(64, 48);
///
/// let (foreground, background) =
///     estimate_foreground_background_cf(&image, &alpha, &ClosedFormOptions::default())?;
/// # Ok(())
/// # }
/// ```
pub fn estimate_foreground_background_cf<T, SA>(
    image: &Image<Rgb<T>>,
    alpha: &Image<Luma<SA>>,
    options: &ClosedFormOptions,
) -> Result<(Image<Rgb<T>>, Image<Rgb<T>>)>
where
    Rgb<T>: Pixel<Subpixel = T>,
    Luma<SA>: Pixel<Subpixel = SA>,
    T: Into<f32> + Clamp<f32> + Primitive,
    SA: Into<f32> + Primitive,
{
    let (foreground, background, _) =
        estimate_foreground_background_cf_with_report(image, alpha, options)?;
    Ok((foreground, background))
}

/// Same as [`estimate_foreground_background_cf`], also returning the
/// convergence report of each color channel.
pub fn estimate_foreground_background_cf_with_report<T, SA>(
    image: &Image<Rgb<T>>,
    alpha: &Image<Luma<SA>>,
    options: &ClosedFormOptions,
) -> Result<(Image<Rgb<T>>, Image<Rgb<T>>, [ChannelReport; 3])>
where
    Rgb<T>: Pixel<Subpixel = T>,
    Luma<SA>: Pixel<Subpixel = SA>,
    T: Into<f32> + Clamp<f32> + Primitive,
    SA: Into<f32> + Primitive,
{
    estimate_foreground_background_cf_with_backend(image, alpha, options, &IcholCg)
}

/// Closed-form estimation on a caller-supplied sparse backend.
pub fn estimate_foreground_background_cf_with_backend<T, SA, B>(
    image: &Image<Rgb<T>>,
    alpha: &Image<Luma<SA>>,
    options: &ClosedFormOptions,
    backend: &B,
) -> Result<(Image<Rgb<T>>, Image<Rgb<T>>, [ChannelReport; 3])>
where
    Rgb<T>: Pixel<Subpixel = T>,
    Luma<SA>: Pixel<Subpixel = SA>,
    T: Into<f32> + Clamp<f32> + Primitive,
    SA: Into<f32> + Primitive,
    B: SparseBackend,
{
    options.validate()?;
    let (image, alpha) = prepare_inputs(image, alpha)?;

    let (width, height) = image.dimensions();
    let (foreground, background, reports) =
        solve(&image, alpha.as_raw(), width, height, options, backend)?;

    Ok((
        denormalize_image(&foreground),
        denormalize_image(&background),
        reports,
    ))
}

/// Data term `U = [diag(a), diag(1 - a)]` of the compositing equation.
fn compositing_matrix(a: &[f64]) -> Result<CsrMatrix, SolverError> {
    let one_minus_a: Vec<f64> = a.iter().map(|&ai| 1.0 - ai).collect();
    CsrMatrix::hstack(
        &CsrMatrix::from_diagonal(a),
        &CsrMatrix::from_diagonal(&one_minus_a),
    )
}

/// Smoothness term `S = Σ_d D_dᵀ diag(ε + |D_d a|) D_d`.
fn smoothness_matrix(
    a: &[f64],
    width: u32,
    height: u32,
    neighbors: &[(i32, i32)],
    regularization: f64,
) -> Result<CsrMatrix, SolverError> {
    let n = a.len();
    let mut smoothness = CsrMatrix::from_triplets(n, n, std::iter::empty());

    for &(dx, dy) in neighbors {
        let derivative = directional_derivative(width, height, dx, dy);
        let weights: Vec<f64> = derivative
            .mul_vec(a)?
            .into_iter()
            .map(|da| regularization + da.abs())
            .collect();
        let term = derivative
            .transpose()
            .matmul(&derivative.scale_rows(&weights)?)?;
        smoothness = smoothness.add(&term)?;
    }

    Ok(smoothness)
}

/// Assembles `A = Uᵀ U + blockdiag(S, S)` together with `Uᵀ`.
fn build_system(
    a: &[f64],
    width: u32,
    height: u32,
    options: &ClosedFormOptions,
) -> Result<(CsrMatrix, CsrMatrix), SolverError> {
    let u = compositing_matrix(a)?;
    let u_t = u.transpose();
    let s = smoothness_matrix(a, width, height, &options.neighbors, options.regularization)?;
    let v = CsrMatrix::block_diag(&s, &s);
    let system = u_t.matmul(&u)?.add(&v)?;
    Ok((system, u_t))
}

fn solve<B: SparseBackend>(
    image: &ColorImage,
    a: &[f64],
    width: u32,
    height: u32,
    options: &ClosedFormOptions,
    backend: &B,
) -> Result<(ColorImage, ColorImage, [ChannelReport; 3])> {
    let n = a.len();
    let log_level = if options.verbose {
        log::Level::Info
    } else {
        log::Level::Debug
    };

    let (system, u_t) = build_system(a, width, height, options)?;
    log::log!(
        log_level,
        "closed-form system assembled: {}x{} with {} non-zeros",
        system.rows(),
        system.cols(),
        system.nnz()
    );

    log::log!(log_level, "computing incomplete Cholesky decomposition");
    let factor = backend.factorize(&system, options.ichol_threshold)?;
    log::log!(log_level, "incomplete Cholesky decomposition computed");

    let solver = options.solver();
    let solve_channel = |channel: usize| -> Result<(Vec<f64>, ChannelReport)> {
        log::log!(log_level, "solving channel {}", channel + 1);
        let observed: Vec<f64> = image
            .as_raw()
            .iter()
            .skip(channel)
            .step_by(3)
            .copied()
            .collect();
        let rhs = u_t.mul_vec(&observed)?;
        let outcome = backend.solve(&system, &rhs, &factor, &solver)?;

        if !outcome.converged {
            if options.verbose {
                warn!(
                    "channel {} did not converge after {} iterations (residual {:e} > {:e})",
                    channel + 1,
                    outcome.iterations,
                    outcome.residual_norm,
                    outcome.tolerance
                );
            } else {
                debug!(
                    "channel {} stopped after {} iterations without converging",
                    channel + 1,
                    outcome.iterations
                );
            }
        }

        let report = ChannelReport {
            channel,
            iterations: outcome.iterations,
            residual_norm: outcome.residual_norm,
            tolerance: outcome.tolerance,
            converged: outcome.converged,
        };
        Ok((outcome.solution, report))
    };

    #[cfg(feature = "rayon")]
    let solutions: Vec<_> = (0..3)
        .into_par_iter()
        .map(solve_channel)
        .collect::<Result<_>>()?;
    #[cfg(not(feature = "rayon"))]
    let solutions: Vec<_> = (0..3).map(solve_channel).collect::<Result<_>>()?;

    let mut foreground = ColorImage::new(width, height);
    let mut background = ColorImage::new(width, height);
    let mut reports = [ChannelReport {
        channel: 0,
        iterations: 0,
        residual_norm: 0.0,
        tolerance: 0.0,
        converged: true,
    }; 3];

    for (channel, (fb, report)) in solutions.into_iter().enumerate() {
        let (f, b) = fb.split_at(n);
        for (i, (&fi, &bi)) in f.iter().zip(b).enumerate() {
            foreground.as_mut()[i * 3 + channel] = fi.clamp(0.0, 1.0);
            background.as_mut()[i * 3 + channel] = bi.clamp(0.0, 1.0);
        }
        reports[channel] = report;
    }

    if options.verbose {
        let iterations = reports.map(|r| r.iterations);
        info!("closed-form estimation finished, CG iterations per channel: {iterations:?}");
    }
    Ok((foreground, background, reports))
}

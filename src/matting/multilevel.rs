//! Multilevel foreground/background estimation.
//!
//! Coarse-to-fine solver that never assembles a global system. At each
//! pyramid level every pixel solves its own 2x2 system for `(F, B)`:
//!
//! ```text
//! (u uᵀ + Σ_j w_j I) [F; B] = u I + Σ_j w_j [F_j; B_j]
//! u = [α, 1 - α],  w_j = ε + |α - α_j|
//! ```
//!
//! where `j` runs over the four axis-aligned neighbors (clamped at the border)
//! and `F_j`, `B_j` are taken from the previous iterate. Smoothness therefore
//! propagates between pixels only across iterations and levels. After the
//! configured number of iterations the estimate is upsampled with nearest
//! neighbor interpolation and refined at the next, larger level until the
//! input resolution is reached.
//!
//! Based on: Germer, Uelwer, Conrad and Harmeling, "Fast Multi-Level
//! Foreground Estimation", ICPR 2020.

use std::fmt;
use std::sync::Arc;

use image::{Luma, Pixel, Primitive, Rgb};
use imageproc::definitions::{Clamp, Image};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::matting::resize_nearest::NearestResize;
use crate::utils::{
    denormalize_image, inv2, pixel_coordinates, prepare_inputs, validate_regularization,
    vec_vec_outer, AlphaImage, ColorImage,
};

const NEIGHBORS: [(i64, i64); 4] = [(-1, 0), (1, 0), (0, -1), (0, 1)];

/// Number of refinement iterations to run at each pyramid level.
#[derive(Clone)]
pub enum IterationSchedule {
    /// Same count at every level.
    Constant(usize),
    /// Count chosen from the level's `(width, height)`.
    PerLevel(Arc<dyn Fn(u32, u32) -> usize + Send + Sync>),
}

impl IterationSchedule {
    /// Schedule backed by a function of the level size.
    pub fn per_level<F>(f: F) -> Self
    where
        F: Fn(u32, u32) -> usize + Send + Sync + 'static,
    {
        Self::PerLevel(Arc::new(f))
    }

    /// Iterations to run at a level of size `width x height`.
    pub fn iterations_at(&self, width: u32, height: u32) -> usize {
        match self {
            Self::Constant(n) => *n,
            Self::PerLevel(f) => f(width, height),
        }
    }
}

impl Default for IterationSchedule {
    fn default() -> Self {
        Self::Constant(2)
    }
}

impl From<usize> for IterationSchedule {
    fn from(n: usize) -> Self {
        Self::Constant(n)
    }
}

impl fmt::Debug for IterationSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant(n) => f.debug_tuple("Constant").field(n).finish(),
            Self::PerLevel(_) => f.write_str("PerLevel(..)"),
        }
    }
}

/// Configuration of the multilevel estimator.
#[derive(Debug, Clone)]
pub struct MultilevelOptions {
    /// Size of the shorter side at the coarsest level.
    pub min_size: u32,
    /// Factor by which the level size grows, must exceed 1.
    pub growth_factor: f64,
    /// Smoothing weight for regions where alpha carries no information.
    pub regularization: f64,
    pub iterations: IterationSchedule,
    /// Report progress at info level instead of debug level.
    pub verbose: bool,
}

impl Default for MultilevelOptions {
    fn default() -> Self {
        Self {
            min_size: 2,
            growth_factor: 2.0,
            regularization: 1e-5,
            iterations: IterationSchedule::default(),
            verbose: false,
        }
    }
}

impl MultilevelOptions {
    #[must_use]
    pub fn with_min_size(mut self, min_size: u32) -> Self {
        self.min_size = min_size;
        self
    }

    #[must_use]
    pub fn with_growth_factor(mut self, growth_factor: f64) -> Self {
        self.growth_factor = growth_factor;
        self
    }

    #[must_use]
    pub fn with_regularization(mut self, regularization: f64) -> Self {
        self.regularization = regularization;
        self
    }

    #[must_use]
    pub fn with_iterations(mut self, iterations: impl Into<IterationSchedule>) -> Self {
        self.iterations = iterations.into();
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
        validate_schedule(self.min_size, self.growth_factor)
    }
}

fn validate_schedule(min_size: u32, growth_factor: f64) -> Result<()> {
    if min_size < 1 {
        return Err(Error::InvalidParameter(format!(
            "min_size must be at least 1, got {min_size}"
        )));
    }
    if !(growth_factor > 1.0 && growth_factor.is_finite()) {
        return Err(Error::InvalidParameter(format!(
            "growth_factor must be a finite number greater than 1, got {growth_factor}"
        )));
    }
    Ok(())
}

/// Size of the coarsest level for an image of `width x height`.
///
/// The shorter side becomes `min_size` and the longer side is scaled
/// proportionally, rounding up. Both sides are clamped to the image size.
pub fn initial_level_size(width: u32, height: u32, min_size: u32) -> (u32, u32) {
    let min_size_f = f64::from(min_size);
    let (w, h) = if width < height {
        let h = (min_size_f * f64::from(height) / f64::from(width)).ceil() as u32;
        (min_size, h)
    } else {
        let w = (min_size_f * f64::from(width) / f64::from(height)).ceil() as u32;
        (w, min_size)
    };
    (w.min(width), h.min(height))
}

/// Size of the level after `(width, height)`.
///
/// Each side grows by `growth_factor`, rounding up and by at least one
/// pixel, and never exceeds the image size.
pub fn next_level_size(
    (width, height): (u32, u32),
    (full_width, full_height): (u32, u32),
    growth_factor: f64,
) -> (u32, u32) {
    let grow = |side: u32, full: u32| {
        let grown = (f64::from(side) * growth_factor).ceil();
        let grown = if grown >= f64::from(full) {
            full
        } else {
            grown as u32
        };
        grown.max(side.saturating_add(1)).min(full)
    };
    (grow(width, full_width), grow(height, full_height))
}

/// All level sizes visited for an image of `width x height`, coarsest first.
///
/// The last entry is always `(width, height)`.
///
/// # Errors
/// Returns [`Error::InvalidParameter`] for `min_size < 1` or
/// `growth_factor <= 1`, and [`Error::EmptyImage`] for a zero-sized image.
pub fn pyramid_sizes(
    width: u32,
    height: u32,
    min_size: u32,
    growth_factor: f64,
) -> Result<Vec<(u32, u32)>> {
    validate_schedule(min_size, growth_factor)?;
    if width == 0 || height == 0 {
        return Err(Error::EmptyImage { width, height });
    }

    let mut size = initial_level_size(width, height, min_size);
    let mut sizes = vec![size];
    while size.0 < width || size.1 < height {
        size = next_level_size(size, (width, height), growth_factor);
        sizes.push(size);
    }
    Ok(sizes)
}

/// Estimates foreground and background with the multilevel method.
///
/// # Arguments
/// * `image` - Observed RGB image
/// * `alpha` - Alpha matte of the same size (0 = background, max = foreground)
/// * `options` - Pyramid and smoothing configuration
///
/// # Returns
/// * `Ok((foreground, background))` - Both layers at the input resolution,
///   clamped to the valid range
/// * `Err(Error)` - If inputs or options are invalid
///
/// # Examples
/// ```no_run
/// use fb_estimation::{estimate_foreground_background_ml, Image, MultilevelOptions};
/// use image::{Luma, Rgb};
///
/// # fn example() -> Result<(), fb_estimation::Error> {
/// let image: Image<Rgb<u8>> = Image::new(640, 480);
/// let alpha: Image<Luma<u8>> = Image::new(640, 480);
///
/// let options = MultilevelOptions::default().with_iterations(10);
/// let (foreground, background) = estimate_foreground_background_ml(&image, &alpha, &options)?;
/// # Ok(())
/// # }
/// ```
pub fn estimate_foreground_background_ml<T, SA>(
    image: &Image<Rgb<T>>,
    alpha: &Image<Luma<SA>>,
    options: &MultilevelOptions,
) -> Result<(Image<Rgb<T>>, Image<Rgb<T>>)>
where
    Rgb<T>: Pixel<Subpixel = T>,
    Luma<SA>: Pixel<Subpixel = SA>,
    T: Into<f32> + Clamp<f32> + Primitive,
    SA: Into<f32> + Primitive,
{
    options.validate()?;
    let (image, alpha) = prepare_inputs(image, alpha)?;

    let (foreground, background) = solve(&image, &alpha, options);
    Ok((
        denormalize_image(&foreground),
        denormalize_image(&background),
    ))
}

fn solve(
    input_image: &ColorImage,
    input_alpha: &AlphaImage,
    options: &MultilevelOptions,
) -> (ColorImage, ColorImage) {
    let log_level = if options.verbose {
        log::Level::Info
    } else {
        log::Level::Debug
    };

    let full_size = input_image.dimensions();
    let (mut w, mut h) = initial_level_size(full_size.0, full_size.1, options.min_size);
    log::log!(
        log_level,
        "solving for foreground and background using multilevel method, initial size {w}x{h}"
    );

    // Both layers start out as the image itself.
    let mut foreground = input_image.resize_nearest(w, h);
    let mut background = foreground.clone();

    loop {
        log::log!(log_level, "new level of size {w}x{h}");

        let image = input_image.resize_nearest(w, h);
        let alpha = input_alpha.resize_nearest(w, h);
        let level = Level::new(&image, &alpha, options.regularization);

        let n_iter = options.iterations.iterations_at(w, h);
        for iteration in 0..n_iter {
            log::trace!("iteration {} of {n_iter} at {w}x{h}", iteration + 1);
            let (f, b) = level.refine(&foreground, &background);
            foreground = f;
            background = b;
        }

        if w >= full_size.0 && h >= full_size.1 {
            return (foreground, background);
        }

        (w, h) = next_level_size((w, h), full_size, options.growth_factor);
        foreground = foreground.resize_nearest(w, h);
        background = background.resize_nearest(w, h);
    }
}

/// Per-level data that does not change between iterations.
///
/// Every pixel is addressed by its row-major index `x + y * width`; the
/// per-pixel systems are kept in flat arrays indexed the same way.
struct Level {
    width: u32,
    height: u32,
    /// Inverse of `u uᵀ + Σ w_j I`, fixed for the whole level.
    inverses: Vec<[[f64; 2]; 2]>,
    /// Data term `u I` of the right-hand side.
    data_rhs: Vec<[[f64; 3]; 2]>,
    /// `(neighbor index, weight)` for the four neighbors of every pixel.
    neighbors: Vec<[(usize, f64); 4]>,
}

impl Level {
    fn new(image: &ColorImage, alpha: &AlphaImage, regularization: f64) -> Self {
        let (width, height) = image.dimensions();
        let (xs, ys) = pixel_coordinates(width, height);
        let a = alpha.as_raw();

        let u: Vec<[f64; 2]> = a.iter().map(|&ai| [ai, 1.0 - ai]).collect();
        let colors: Vec<[f64; 3]> = image.pixels().map(|p| p.0).collect();

        let mut matrices = vec_vec_outer(&u, &u);
        let data_rhs = vec_vec_outer(&u, &colors);

        let max_x = i64::from(width) - 1;
        let max_y = i64::from(height) - 1;
        let neighbors: Vec<[(usize, f64); 4]> = xs
            .iter()
            .zip(&ys)
            .enumerate()
            .map(|(i, (&x, &y))| {
                NEIGHBORS.map(|(dx, dy)| {
                    let x2 = (i64::from(x) + dx).clamp(0, max_x) as usize;
                    let y2 = (i64::from(y) + dy).clamp(0, max_y) as usize;
                    let j = x2 + y2 * width as usize;
                    (j, regularization + (a[i] - a[j]).abs())
                })
            })
            .collect();

        for (m, nbrs) in matrices.iter_mut().zip(&neighbors) {
            let total: f64 = nbrs.iter().map(|&(_, da)| da).sum();
            m[0][0] += total;
            m[1][1] += total;
        }

        Self {
            width,
            height,
            inverses: inv2(&matrices),
            data_rhs,
            neighbors,
        }
    }

    /// One Jacobi-style sweep reading only the previous iterate.
    fn refine(&self, foreground: &ColorImage, background: &ColorImage) -> (ColorImage, ColorImage) {
        let f_prev: &[f64] = foreground.as_raw();
        let b_prev: &[f64] = background.as_raw();

        let solve_pixel = |i: usize| -> ([f64; 3], [f64; 3]) {
            let mut rhs = self.data_rhs[i];
            for &(j, da) in &self.neighbors[i] {
                for c in 0..3 {
                    rhs[0][c] += da * f_prev[j * 3 + c];
                    rhs[1][c] += da * b_prev[j * 3 + c];
                }
            }

            let inv = &self.inverses[i];
            let mut f = [0.0; 3];
            let mut b = [0.0; 3];
            for c in 0..3 {
                f[c] = inv[0][0]
                    .mul_add(rhs[0][c], inv[0][1] * rhs[1][c])
                    .clamp(0.0, 1.0);
                b[c] = inv[1][0]
                    .mul_add(rhs[0][c], inv[1][1] * rhs[1][c])
                    .clamp(0.0, 1.0);
            }
            (f, b)
        };

        let n = self.inverses.len();
        #[cfg(feature = "rayon")]
        let solved: Vec<([f64; 3], [f64; 3])> = (0..n).into_par_iter().map(solve_pixel).collect();
        #[cfg(not(feature = "rayon"))]
        let solved: Vec<([f64; 3], [f64; 3])> = (0..n).map(solve_pixel).collect();

        let mut next_f = ColorImage::new(self.width, self.height);
        let mut next_b = ColorImage::new(self.width, self.height);
        for ((f_dst, b_dst), (f, b)) in next_f
            .chunks_exact_mut(3)
            .zip(next_b.chunks_exact_mut(3))
            .zip(&solved)
        {
            f_dst.copy_from_slice(f);
            b_dst.copy_from_slice(b);
        }
        (next_f, next_b)
    }
}

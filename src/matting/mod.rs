//! Foreground/background estimation from an alpha matte.
//!
//! Given an observed image `I` and its alpha matte `α`, both estimators
//! search for layers `F` and `B` satisfying the compositing equation
//! `I = α F + (1 - α) B` while keeping each layer smooth wherever the matte
//! is flat. Two methods are available:
//!
//! - [`Method::ClosedForm`] (`"cf"`) solves one global sparse system per
//!   color channel. Accurate but memory-hungry on large images.
//! - [`Method::Multilevel`] (`"ml"`) refines the estimate coarse-to-fine with
//!   independent per-pixel 2x2 solves. Fast and the default.

pub mod closed_form;
pub mod multilevel;
pub mod resize_nearest;

use std::fmt;
use std::str::FromStr;

use image::{Luma, Pixel, Primitive, Rgb};
use imageproc::definitions::{Clamp, Image};

use crate::error::{Error, Result};
use closed_form::{estimate_foreground_background_cf, ClosedFormOptions};
use multilevel::{estimate_foreground_background_ml, MultilevelOptions};

/// Estimation method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Method {
    /// Global sparse solve, selected by `"cf"`.
    ClosedForm,
    /// Coarse-to-fine pyramid, selected by `"ml"`.
    #[default]
    Multilevel,
}

impl Method {
    /// Short name accepted by [`Method::from_str`].
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ClosedForm => "cf",
            Self::Multilevel => "ml",
        }
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cf" => Ok(Self::ClosedForm),
            "ml" => Ok(Self::Multilevel),
            other => Err(Error::InvalidMethod(other.to_owned())),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options for both estimators; only the ones for the selected method are used.
#[derive(Debug, Clone, Default)]
pub struct EstimationOptions {
    pub closed_form: ClosedFormOptions,
    pub multilevel: MultilevelOptions,
}

impl EstimationOptions {
    #[must_use]
    pub fn with_closed_form(mut self, closed_form: ClosedFormOptions) -> Self {
        self.closed_form = closed_form;
        self
    }

    #[must_use]
    pub fn with_multilevel(mut self, multilevel: MultilevelOptions) -> Self {
        self.multilevel = multilevel;
        self
    }
}

/// Estimates foreground and background, selecting the method by name.
///
/// # Arguments
/// * `image` - Observed RGB image
/// * `alpha` - Alpha matte of the same size
/// * `method` - `"cf"` for closed form or `"ml"` for multilevel
/// * `options` - Per-method configuration
///
/// # Returns
/// * `Ok((foreground, background))` - Estimated layers
/// * `Err(Error::InvalidMethod)` - If `method` is neither `"cf"` nor `"ml"`
/// * `Err(Error)` - Any error of the selected estimator
///
/// # Examples
/// ```no_run
/// use fb_estimation::{estimate_foreground_background, EstimationOptions, Image};
/// use image::{Luma, Rgb};
///
/// # fn example() -> Result<(), fb_estimation::Error> {
/// let image: Image<Rgb<u8>> = Image::new(320, 240);
/// let alpha: Image<Luma<u8>> = Image::new(320, 240);
///
/// let (foreground, background) =
///     estimate_foreground_background(&image, &alpha, "ml", &EstimationOptions::default())?;
/// # Ok(())
/// # }
/// ```
pub fn estimate_foreground_background<T, SA>(
    image: &Image<Rgb<T>>,
    alpha: &Image<Luma<SA>>,
    method: &str,
    options: &EstimationOptions,
) -> Result<(Image<Rgb<T>>, Image<Rgb<T>>)>
where
    Rgb<T>: Pixel<Subpixel = T>,
    Luma<SA>: Pixel<Subpixel = SA>,
    T: Into<f32> + Clamp<f32> + Primitive,
    SA: Into<f32> + Primitive,
{
    estimate_with(image, alpha, method.parse()?, options)
}

/// Estimates foreground and background with an already parsed [`Method`].
pub fn estimate_with<T, SA>(
    image: &Image<Rgb<T>>,
    alpha: &Image<Luma<SA>>,
    method: Method,
    options: &EstimationOptions,
) -> Result<(Image<Rgb<T>>, Image<Rgb<T>>)>
where
    Rgb<T>: Pixel<Subpixel = T>,
    Luma<SA>: Pixel<Subpixel = SA>,
    T: Into<f32> + Clamp<f32> + Primitive,
    SA: Into<f32> + Primitive,
{
    match method {
        Method::ClosedForm => estimate_foreground_background_cf(image, alpha, &options.closed_form),
        Method::Multilevel => estimate_foreground_background_ml(image, alpha, &options.multilevel),
    }
}

/// Foreground/background estimation as a method on the image.
pub trait ForegroundBackgroundEstimator<T>
where
    Rgb<T>: Pixel<Subpixel = T>,
    T: Into<f32> + Clamp<f32> + Primitive,
{
    /// Splits the image into foreground and background layers using `alpha`.
    fn estimate_foreground_background<SA>(
        &self,
        alpha: &Image<Luma<SA>>,
        method: Method,
        options: &EstimationOptions,
    ) -> Result<(Image<Rgb<T>>, Image<Rgb<T>>)>
    where
        Luma<SA>: Pixel<Subpixel = SA>,
        SA: Into<f32> + Primitive;
}

impl<T> ForegroundBackgroundEstimator<T> for Image<Rgb<T>>
where
    Rgb<T>: Pixel<Subpixel = T>,
    T: Into<f32> + Clamp<f32> + Primitive,
{
    fn estimate_foreground_background<SA>(
        &self,
        alpha: &Image<Luma<SA>>,
        method: Method,
        options: &EstimationOptions,
    ) -> Result<(Self, Self)>
    where
        Luma<SA>: Pixel<Subpixel = SA>,
        SA: Into<f32> + Primitive,
    {
        estimate_with(self, alpha, method, options)
    }
}

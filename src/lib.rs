//! Foreground and background estimation for alpha matting.
//!
//! Splits an image into foreground and background layers given its alpha
//! matte, either with a closed-form sparse solve (`"cf"`) or a fast
//! multilevel pyramid (`"ml"`).

mod error;
pub mod matting;
pub mod sparse;
mod utils;

#[cfg(test)]
mod test_utils;

use image::{ImageBuffer, Pixel};

pub use error::{Error, Result, SolverError};
pub use matting::closed_form::{
    estimate_foreground_background_cf, estimate_foreground_background_cf_with_backend,
    estimate_foreground_background_cf_with_report, ChannelReport, ClosedFormOptions,
    DEFAULT_NEIGHBORS,
};
pub use matting::multilevel::{
    estimate_foreground_background_ml, pyramid_sizes, IterationSchedule, MultilevelOptions,
};
pub use matting::resize_nearest::NearestResize;
pub use matting::{
    estimate_foreground_background, estimate_with, EstimationOptions,
    ForegroundBackgroundEstimator, Method,
};

pub type Image<P> = ImageBuffer<P, Vec<<P as Pixel>::Subpixel>>;

//! Test utilities for fb-estimation
//!
//! Synthetic images and comparison helpers shared by the unit tests.
//! It is only compiled when running tests.

use image::{ImageBuffer, Luma, Rgb};
use imageproc::definitions::Image;

/// Builds an `f32` RGB image from a per-pixel function.
pub fn rgb_f32(width: u32, height: u32, f: impl Fn(u32, u32) -> [f32; 3]) -> Image<Rgb<f32>> {
    ImageBuffer::from_fn(width, height, |x, y| Rgb(f(x, y)))
}

/// Composites `foreground` over `background` with `alpha`.
///
/// # Panics
/// Panics if the three images differ in size.
pub fn composite(
    foreground: &Image<Rgb<f32>>,
    background: &Image<Rgb<f32>>,
    alpha: &Image<Luma<f32>>,
) -> Image<Rgb<f32>> {
    assert_eq!(foreground.dimensions(), background.dimensions());
    assert_eq!(foreground.dimensions(), alpha.dimensions());

    ImageBuffer::from_fn(foreground.width(), foreground.height(), |x, y| {
        let Luma([a]) = *alpha.get_pixel(x, y);
        let f = foreground.get_pixel(x, y);
        let b = background.get_pixel(x, y);
        Rgb([0, 1, 2].map(|c| a * f[c] + (1.0 - a) * b[c]))
    })
}

/// Largest absolute per-channel difference between two images of equal size.
pub fn max_abs_diff(a: &Image<Rgb<f32>>, b: &Image<Rgb<f32>>) -> f32 {
    assert_eq!(a.dimensions(), b.dimensions());
    a.iter()
        .zip(b.iter())
        .map(|(p, q)| (p - q).abs())
        .fold(0.0, f32::max)
}

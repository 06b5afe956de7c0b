//! Internal utility functions for fb-estimation.
//!
//! This module contains input validation, pixel coordinate enumeration and the
//! batched 2x2 linear algebra used by the multilevel estimator.

use image::{ImageBuffer, Luma, Pixel, Primitive, Rgb};
use imageproc::definitions::{Clamp, Image};
use itertools::iproduct;

use crate::error::Error;

/// Image converted to normalized `f64` values.
pub type ColorImage = Image<Rgb<f64>>;

/// Alpha matte converted to normalized `f64` values.
pub type AlphaImage = Image<Luma<f64>>;

/// Converts an RGB image into normalized `[0, 1]`-scaled `f64` values.
///
/// Values are divided by `T::DEFAULT_MAX_VALUE`, so `f32` images are taken
/// as-is and `u8` images are divided by 255.
pub fn normalize_image<T>(image: &Image<Rgb<T>>) -> ColorImage
where
    Rgb<T>: Pixel<Subpixel = T>,
    T: Into<f32> + Primitive,
{
    let max = f64::from(T::DEFAULT_MAX_VALUE.into());
    ImageBuffer::from_fn(image.width(), image.height(), |x, y| {
        let Rgb(channels) = *image.get_pixel(x, y);
        Rgb(channels.map(|v| f64::from(v.into()) / max))
    })
}

/// Converts an alpha matte into normalized `f64` values.
pub fn normalize_alpha<T>(alpha: &Image<Luma<T>>) -> AlphaImage
where
    Luma<T>: Pixel<Subpixel = T>,
    T: Into<f32> + Primitive,
{
    let max = f64::from(T::DEFAULT_MAX_VALUE.into());
    ImageBuffer::from_fn(alpha.width(), alpha.height(), |x, y| {
        let Luma([a]) = *alpha.get_pixel(x, y);
        Luma([f64::from(a.into()) / max])
    })
}

/// Clamps a normalized image to `[0, 1]` and scales it back to `T`.
///
/// Integer subpixels are rounded to the nearest value.
pub fn denormalize_image<T>(image: &ColorImage) -> Image<Rgb<T>>
where
    Rgb<T>: Pixel<Subpixel = T>,
    T: Into<f32> + Clamp<f32> + Primitive,
{
    let max = f64::from(T::DEFAULT_MAX_VALUE.into());
    let is_integer = max > 1.0;
    ImageBuffer::from_fn(image.width(), image.height(), |x, y| {
        let Rgb(channels) = *image.get_pixel(x, y);
        Rgb(channels.map(|v| {
            let scaled = v.clamp(0.0, 1.0) * max;
            let scaled = if is_integer { scaled.round() } else { scaled };
            T::clamp(scaled as f32)
        }))
    })
}

/// Validates that an image has non-zero dimensions.
pub fn validate_non_empty_image(width: u32, height: u32) -> Result<(), Error> {
    if width == 0 || height == 0 {
        Err(Error::EmptyImage { width, height })
    } else {
        Ok(())
    }
}

/// Validates that the image and alpha matte have matching dimensions.
pub fn validate_matching_dimensions(
    expected: (u32, u32),
    actual: (u32, u32),
) -> Result<(), Error> {
    if expected.0 != actual.0 || expected.1 != actual.1 {
        Err(Error::DimensionMismatch { expected, actual })
    } else {
        Ok(())
    }
}

/// Checks that every normalized alpha value lies in `[0, 1]`.
pub fn validate_alpha_range(alpha: &AlphaImage) -> Result<(), Error> {
    match alpha
        .enumerate_pixels()
        .find(|(_, _, Luma([a]))| !(0.0..=1.0).contains(a))
    {
        Some((x, y, Luma([a]))) => Err(Error::AlphaOutOfRange {
            x,
            y,
            value: *a as f32,
        }),
        None => Ok(()),
    }
}

/// Checks that every normalized image value is finite.
pub fn validate_finite_image(image: &ColorImage) -> Result<(), Error> {
    match image
        .enumerate_pixels()
        .find(|(_, _, p)| !p.0.iter().all(|v| v.is_finite()))
    {
        Some((x, y, _)) => Err(Error::NonFiniteImage { x, y }),
        None => Ok(()),
    }
}

/// Runs all shared input checks and returns the normalized image and alpha.
pub fn prepare_inputs<T, SA>(
    image: &Image<Rgb<T>>,
    alpha: &Image<Luma<SA>>,
) -> Result<(ColorImage, AlphaImage), Error>
where
    Rgb<T>: Pixel<Subpixel = T>,
    Luma<SA>: Pixel<Subpixel = SA>,
    T: Into<f32> + Primitive,
    SA: Into<f32> + Primitive,
{
    validate_non_empty_image(image.width(), image.height())?;
    validate_matching_dimensions(image.dimensions(), alpha.dimensions())?;

    let alpha = normalize_alpha(alpha);
    validate_alpha_range(&alpha)?;

    let image = normalize_image(image);
    validate_finite_image(&image)?;

    Ok((image, alpha))
}

/// Validates a regularization weight.
pub fn validate_regularization(regularization: f64) -> Result<(), Error> {
    if regularization > 0.0 && regularization.is_finite() {
        Ok(())
    } else {
        Err(Error::InvalidParameter(format!(
            "regularization must be a positive finite number, got {regularization}"
        )))
    }
}

/// Enumerates the coordinates of a `width x height` grid in row-major order.
///
/// Index `i` of both vectors corresponds to the flattened pixel
/// `x + y * width`.
pub fn pixel_coordinates(width: u32, height: u32) -> (Vec<u32>, Vec<u32>) {
    iproduct!(0..height, 0..width).map(|(y, x)| (x, y)).unzip()
}

/// Batched outer product `u[i] * v[i]^T`.
///
/// Produces one `2 x N` matrix per batch element, stored as two rows.
///
/// # Panics
/// Panics if the batches differ in length.
pub fn vec_vec_outer<const N: usize>(u: &[[f64; 2]], v: &[[f64; N]]) -> Vec<[[f64; N]; 2]> {
    assert_eq!(u.len(), v.len(), "batch sizes must match");
    u.iter()
        .zip(v)
        .map(|(u, v)| [v.map(|vj| u[0] * vj), v.map(|vj| u[1] * vj)])
        .collect()
}

/// Closed-form inverse of a single 2x2 matrix.
///
/// The caller guarantees a non-zero determinant.
#[inline]
pub fn inv2_single(m: &[[f64; 2]; 2]) -> [[f64; 2]; 2] {
    let [[a, b], [c, d]] = *m;
    let inv_det = 1.0 / a.mul_add(d, -(b * c));
    [[d * inv_det, -b * inv_det], [-c * inv_det, a * inv_det]]
}

/// Batched closed-form inverse of 2x2 matrices.
pub fn inv2(batch: &[[[f64; 2]; 2]]) -> Vec<[[f64; 2]; 2]> {
    batch.iter().map(inv2_single).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_coordinates_row_major() {
        let (xs, ys) = pixel_coordinates(3, 2);
        assert_eq!(xs, vec![0, 1, 2, 0, 1, 2]);
        assert_eq!(ys, vec![0, 0, 0, 1, 1, 1]);

        for (i, (&x, &y)) in xs.iter().zip(&ys).enumerate() {
            assert_eq!(i, (x + y * 3) as usize);
        }
    }

    #[test]
    fn test_vec_vec_outer() {
        let u = [[1.0, 2.0], [0.5, 0.0]];
        let v = [[1.0, 2.0, 3.0], [4.0, 4.0, 4.0]];
        let out = vec_vec_outer(&u, &v);
        assert_eq!(out[0], [[1.0, 2.0, 3.0], [2.0, 4.0, 6.0]]);
        assert_eq!(out[1], [[2.0, 2.0, 2.0], [0.0, 0.0, 0.0]]);
    }

    #[test]
    fn test_inv2() {
        let batch = [[[4.0, 7.0], [2.0, 6.0]], [[2.0, 0.0], [0.0, 0.5]]];
        let inverses = inv2(&batch);

        for (m, inv) in batch.iter().zip(&inverses) {
            for i in 0..2 {
                for j in 0..2 {
                    let product = m[i][0] * inv[0][j] + m[i][1] * inv[1][j];
                    let expected = if i == j { 1.0 } else { 0.0 };
                    assert!((product - expected).abs() < 1e-12);
                }
            }
        }
        assert_eq!(inverses[1], [[0.5, 0.0], [0.0, 2.0]]);
    }

    #[test]
    fn test_validate_non_empty_image() {
        assert!(validate_non_empty_image(100, 100).is_ok());
        assert!(validate_non_empty_image(1, 1).is_ok());
        assert!(validate_non_empty_image(0, 100).is_err());
        assert!(validate_non_empty_image(100, 0).is_err());
    }

    #[test]
    fn test_validate_matching_dimensions() {
        assert!(validate_matching_dimensions((50, 75), (50, 75)).is_ok());
        assert_eq!(
            validate_matching_dimensions((100, 100), (100, 50)),
            Err(Error::DimensionMismatch {
                expected: (100, 100),
                actual: (100, 50),
            })
        );
    }

    #[test]
    fn test_validate_alpha_range() {
        let mut alpha: AlphaImage = Image::from_pixel(3, 3, Luma([0.5]));
        assert!(validate_alpha_range(&alpha).is_ok());

        alpha.put_pixel(2, 1, Luma([1.5]));
        assert!(matches!(
            validate_alpha_range(&alpha),
            Err(Error::AlphaOutOfRange { x: 2, y: 1, .. })
        ));

        alpha.put_pixel(2, 1, Luma([f64::NAN]));
        assert!(validate_alpha_range(&alpha).is_err());
    }

    #[test]
    fn test_validate_finite_image() {
        let mut image: ColorImage = Image::from_pixel(3, 2, Rgb([0.5, 1.5, -0.5]));
        assert!(validate_finite_image(&image).is_ok());

        image.put_pixel(1, 1, Rgb([0.5, f64::INFINITY, 0.5]));
        assert_eq!(
            validate_finite_image(&image),
            Err(Error::NonFiniteImage { x: 1, y: 1 })
        );

        image.put_pixel(0, 1, Rgb([f64::NAN, 0.5, 0.5]));
        assert_eq!(
            validate_finite_image(&image),
            Err(Error::NonFiniteImage { x: 0, y: 1 })
        );
    }

    #[test]
    fn test_normalize_round_trip_u8() {
        let image: Image<Rgb<u8>> = Image::from_pixel(2, 2, Rgb([0, 255, 0]));
        let normalized = normalize_image(&image);
        assert_eq!(normalized.get_pixel(0, 0)[0], 0.0);
        assert_eq!(normalized.get_pixel(0, 0)[1], 1.0);

        let back: Image<Rgb<u8>> = denormalize_image(&normalized);
        assert_eq!(back, image);
    }

    #[test]
    fn test_denormalize_rounds_integer_subpixels() {
        let image: ColorImage = Image::from_pixel(1, 1, Rgb([219.6 / 255.0, 0.4 / 255.0, 0.5]));
        let out: Image<Rgb<u8>> = denormalize_image(&image);
        assert_eq!(out.get_pixel(0, 0).0, [220, 0, 128]);
    }

    #[test]
    fn test_denormalize_clamps() {
        let image: ColorImage = Image::from_pixel(1, 1, Rgb([-0.5, 0.25, 2.0]));
        let out: Image<Rgb<f32>> = denormalize_image(&image);
        assert_eq!(out.get_pixel(0, 0).0, [0.0, 0.25, 1.0]);
    }

    #[test]
    fn test_validate_regularization() {
        assert!(validate_regularization(1e-5).is_ok());
        assert!(validate_regularization(0.0).is_err());
        assert!(validate_regularization(-1.0).is_err());
        assert!(validate_regularization(f64::INFINITY).is_err());
    }
}

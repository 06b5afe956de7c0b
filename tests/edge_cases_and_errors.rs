//! Edge case and error condition tests
//!
//! Boundary sizes, invalid inputs and invalid parameters for both estimators
//! and the method dispatcher.

use fb_estimation::{
    estimate_foreground_background, estimate_foreground_background_cf,
    estimate_foreground_background_ml, estimate_with, pyramid_sizes, ClosedFormOptions, Error,
    EstimationOptions, Image, Method, MultilevelOptions,
};
use image::{Luma, Rgb};

/// Helper to create minimal 1x1 image
fn create_minimal_rgb_image() -> Image<Rgb<u8>> {
    Image::from_pixel(1, 1, Rgb([128, 64, 32]))
}

/// Helper to create a uniform alpha mask
fn create_alpha_mask(width: u32, height: u32, value: u8) -> Image<Luma<u8>> {
    Image::from_pixel(width, height, Luma([value]))
}

#[test]
fn test_unknown_method_is_rejected() {
    let image = create_minimal_rgb_image();
    let alpha = create_alpha_mask(1, 1, 255);
    let options = EstimationOptions::default();

    for name in ["xyz", "closed_form", "ML", ""] {
        let result = estimate_foreground_background(&image, &alpha, name, &options);
        match result {
            Err(Error::InvalidMethod(got)) => assert_eq!(got, name),
            other => panic!("expected InvalidMethod for {name:?}, got {other:?}"),
        }
    }
}

#[test]
fn test_invalid_method_message_format() {
    let err = "foo".parse::<Method>().unwrap_err();
    assert_eq!(err.to_string(), "Invalid method foo: expected either cf or ml");
    assert!(!err.is_invalid_input());
}

#[test]
fn test_minimum_image_size_both_methods() {
    let image = create_minimal_rgb_image();
    let alpha = create_alpha_mask(1, 1, 255);
    let options = EstimationOptions::default();

    for method in [Method::ClosedForm, Method::Multilevel] {
        let (foreground, background) = estimate_with(&image, &alpha, method, &options).unwrap();
        assert_eq!(foreground.dimensions(), (1, 1));
        assert_eq!(background.dimensions(), (1, 1));

        let diff = foreground
            .get_pixel(0, 0)
            .0
            .iter()
            .zip(image.get_pixel(0, 0).0)
            .map(|(&a, b)| i16::from(a) - i16::from(b))
            .map(i16::abs)
            .max()
            .unwrap_or(0);
        assert!(diff <= 1, "{method}: {:?}", foreground.get_pixel(0, 0));
    }
}

#[test]
fn test_dimension_mismatch() {
    let image: Image<Rgb<u8>> = Image::new(10, 8);
    let alpha = create_alpha_mask(8, 10, 0);
    let options = EstimationOptions::default();

    for method in ["cf", "ml"] {
        let err = estimate_foreground_background(&image, &alpha, method, &options).unwrap_err();
        assert_eq!(
            err,
            Error::DimensionMismatch {
                expected: (10, 8),
                actual: (8, 10),
            }
        );
        assert!(err.is_invalid_input());
    }
}

#[test]
fn test_empty_image() {
    let image: Image<Rgb<u8>> = Image::new(0, 5);
    let alpha = create_alpha_mask(0, 5, 0);
    let options = EstimationOptions::default();

    for method in [Method::ClosedForm, Method::Multilevel] {
        let err = estimate_with(&image, &alpha, method, &options).unwrap_err();
        assert_eq!(err, Error::EmptyImage { width: 0, height: 5 });
    }
}

#[test]
fn test_alpha_out_of_range() {
    let image: Image<Rgb<f32>> = Image::from_pixel(3, 3, Rgb([0.5, 0.5, 0.5]));
    let mut alpha: Image<Luma<f32>> = Image::from_pixel(3, 3, Luma([0.5]));
    alpha.put_pixel(1, 2, Luma([1.25]));

    let err = estimate_foreground_background_ml(&image, &alpha, &MultilevelOptions::default())
        .unwrap_err();
    assert_eq!(
        err,
        Error::AlphaOutOfRange {
            x: 1,
            y: 2,
            value: 1.25,
        }
    );

    alpha.put_pixel(1, 2, Luma([-0.1]));
    let err = estimate_foreground_background_cf(&image, &alpha, &ClosedFormOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::AlphaOutOfRange { x: 1, y: 2, .. }));
}

#[test]
fn test_non_finite_image_values() {
    let mut image: Image<Rgb<f32>> = Image::from_pixel(4, 4, Rgb([0.5, 0.5, 0.5]));
    image.put_pixel(1, 1, Rgb([f32::NAN, f32::INFINITY, 0.5]));
    let alpha: Image<Luma<f32>> = Image::from_pixel(4, 4, Luma([0.5]));
    let options = EstimationOptions::default();

    for method in [Method::ClosedForm, Method::Multilevel] {
        let err = estimate_with(&image, &alpha, method, &options).unwrap_err();
        assert_eq!(err, Error::NonFiniteImage { x: 1, y: 1 }, "{method}");
        assert!(err.is_invalid_input());
    }

    image.put_pixel(1, 1, Rgb([0.5, 0.5, 0.5]));
    image.put_pixel(3, 0, Rgb([0.5, 0.5, f32::NEG_INFINITY]));
    let err = estimate_foreground_background(&image, &alpha, "ml", &options).unwrap_err();
    assert_eq!(err, Error::NonFiniteImage { x: 3, y: 0 });
}

#[test]
fn test_invalid_closed_form_parameters() {
    let image: Image<Rgb<u8>> = Image::new(4, 4);
    let alpha = create_alpha_mask(4, 4, 128);

    for options in [
        ClosedFormOptions::default().with_regularization(-1.0),
        ClosedFormOptions::default().with_ichol_threshold(f64::NAN),
        ClosedFormOptions::default().with_tolerances(-1.0, 1e-5),
        ClosedFormOptions::default().with_neighbors(Vec::new()),
        ClosedFormOptions::default().with_neighbors(vec![(0, 0)]),
    ] {
        let err = estimate_foreground_background_cf(&image, &alpha, &options).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)), "{options:?}: {err}");
    }
}

#[test]
fn test_invalid_multilevel_parameters() {
    let image: Image<Rgb<u8>> = Image::new(4, 4);
    let alpha = create_alpha_mask(4, 4, 128);

    for options in [
        MultilevelOptions::default().with_min_size(0),
        MultilevelOptions::default().with_growth_factor(1.0),
        MultilevelOptions::default().with_growth_factor(f64::INFINITY),
        MultilevelOptions::default().with_regularization(0.0),
    ] {
        let err = estimate_foreground_background_ml(&image, &alpha, &options).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)), "{options:?}: {err}");
    }
}

#[test]
fn test_parameters_are_checked_before_inputs() {
    let image: Image<Rgb<u8>> = Image::new(0, 0);
    let alpha = create_alpha_mask(0, 0, 0);
    let options = MultilevelOptions::default().with_growth_factor(0.5);

    let err = estimate_foreground_background_ml(&image, &alpha, &options).unwrap_err();
    assert!(matches!(err, Error::InvalidParameter(_)));
}

#[test]
fn test_degenerate_strip_images() {
    let options = EstimationOptions::default();

    for (width, height) in [(1, 9), (9, 1)] {
        let image: Image<Rgb<u8>> =
            Image::from_fn(width, height, |x, y| Rgb([(x * 20) as u8, (y * 20) as u8, 100]));
        let alpha: Image<Luma<u8>> =
            Image::from_fn(width, height, |x, y| Luma([((x + y) * 30) as u8]));

        for method in [Method::ClosedForm, Method::Multilevel] {
            let (f, b) = estimate_with(&image, &alpha, method, &options).unwrap();
            assert_eq!(f.dimensions(), (width, height));
            assert_eq!(b.dimensions(), (width, height));
        }
    }
}

#[test]
fn test_min_size_larger_than_image() {
    let sizes = pyramid_sizes(3, 5, 16, 2.0).unwrap();
    assert_eq!(sizes, vec![(3, 5)]);
}

#[test]
fn test_extreme_alpha_values() {
    let image: Image<Rgb<u8>> = Image::from_fn(6, 6, |x, y| Rgb([(x * 40) as u8, (y * 40) as u8, 77]));
    let options = EstimationOptions::default();

    for method in [Method::ClosedForm, Method::Multilevel] {
        // fully transparent: background carries the image
        let (_, background) =
            estimate_with(&image, &create_alpha_mask(6, 6, 0), method, &options).unwrap();
        for (p, q) in background.pixels().zip(image.pixels()) {
            for c in 0..3 {
                assert!(p[c].abs_diff(q[c]) <= 1, "{method}: {p:?} vs {q:?}");
            }
        }

        // fully opaque: foreground carries the image
        let (foreground, _) =
            estimate_with(&image, &create_alpha_mask(6, 6, 255), method, &options).unwrap();
        for (p, q) in foreground.pixels().zip(image.pixels()) {
            for c in 0..3 {
                assert!(p[c].abs_diff(q[c]) <= 1, "{method}: {p:?} vs {q:?}");
            }
        }
    }
}

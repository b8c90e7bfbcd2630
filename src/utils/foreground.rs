//! Foreground color estimation for soft mattes
//!
//! Removing a background by only replacing alpha leaves background color
//! bleeding into semi-transparent edge pixels. Blur-fusion estimation
//! recovers the foreground color there from local foreground and background
//! averages (two passes: a wide one, then a narrow refinement).

use crate::error::{Result, VisionError};
use image::{GrayImage, Luma, RgbaImage};
use imageproc::filter::box_filter;
use ndarray::Array2;

const WIDE_RADIUS: u32 = 90;
const NARROW_RADIUS: u32 = 6;
const EPSILON: f32 = 1e-5;

/// Replace the alpha channel of `image` with `alpha`
///
/// # Errors
/// - Dimensions differ
pub fn apply_alpha(image: &RgbaImage, alpha: &GrayImage) -> Result<RgbaImage> {
    check_dimensions(image, alpha)?;
    let mut out = image.clone();
    for (px, a) in out.pixels_mut().zip(alpha.pixels()) {
        px.0[3] = a.0[0];
    }
    Ok(out)
}

/// Estimate foreground colors of `image` under `alpha`; the result carries `alpha`
///
/// # Errors
/// - Dimensions differ
pub fn estimate_foreground(image: &RgbaImage, alpha: &GrayImage) -> Result<RgbaImage> {
    check_dimensions(image, alpha)?;
    let (w, h) = (image.width() as usize, image.height() as usize);

    let alpha_plane = Array2::from_shape_fn((h, w), |(y, x)| {
        f32::from(alpha.get_pixel(x as u32, y as u32).0[0]) / 255.0
    });
    let channels: Vec<Array2<f32>> = (0..3)
        .map(|c| {
            Array2::from_shape_fn((h, w), |(y, x)| {
                f32::from(image.get_pixel(x as u32, y as u32).0[c]) / 255.0
            })
        })
        .collect();

    let mut out = image.clone();
    for (c, color) in channels.iter().enumerate() {
        let (fg, bg) = blur_fusion(color, color, color, &alpha_plane, WIDE_RADIUS);
        let (fg, _) = blur_fusion(color, &fg, &bg, &alpha_plane, NARROW_RADIUS);
        for (px, value) in out.pixels_mut().zip(fg.iter()) {
            px.0[c] = (value * 255.0).round().clamp(0.0, 255.0) as u8;
        }
    }
    for (px, a) in out.pixels_mut().zip(alpha.pixels()) {
        px.0[3] = a.0[0];
    }
    Ok(out)
}

fn check_dimensions(image: &RgbaImage, alpha: &GrayImage) -> Result<()> {
    if image.dimensions() != alpha.dimensions() {
        return Err(VisionError::processing(format!(
            "Matte is {:?} but image is {:?}",
            alpha.dimensions(),
            image.dimensions()
        )));
    }
    Ok(())
}

/// One blur-fusion step for a single channel
fn blur_fusion(
    image: &Array2<f32>,
    fg: &Array2<f32>,
    bg: &Array2<f32>,
    alpha: &Array2<f32>,
    radius: u32,
) -> (Array2<f32>, Array2<f32>) {
    let blurred_alpha = box_blur(alpha, radius);
    let blurred_fa = box_blur(&(fg * alpha), radius);
    let blurred_fg = &blurred_fa / &blurred_alpha.mapv(|a| a + EPSILON);
    let blurred_b1a = box_blur(&(bg * &alpha.mapv(|a| 1.0 - a)), radius);
    let blurred_bg = &blurred_b1a / &blurred_alpha.mapv(|a| 1.0 - a + EPSILON);

    let mut estimate = blurred_fg.clone();
    ndarray::Zip::from(&mut estimate)
        .and(image)
        .and(alpha)
        .and(&blurred_bg)
        .for_each(|f, &i, &a, &b| {
            let value = *f + a * (i - a * *f - (1.0 - a) * b);
            *f = value.clamp(0.0, 1.0);
        });
    (estimate, blurred_bg)
}

/// Mean over a square window of a `[0, 1]` plane, at 8-bit precision
///
/// The image border is repeated past the edges.
fn box_blur(plane: &Array2<f32>, radius: u32) -> Array2<f32> {
    let (h, w) = plane.dim();
    let image = GrayImage::from_fn(w as u32, h as u32, |x, y| {
        let value = plane[[y as usize, x as usize]];
        Luma([(value * 255.0).round().clamp(0.0, 255.0) as u8])
    });
    let blurred = box_filter(&image, radius, radius);
    Array2::from_shape_fn((h, w), |(y, x)| {
        f32::from(blurred.get_pixel(x as u32, y as u32).0[0]) / 255.0
    })
}

//! In-place morphology and smoothing for 8-bit selection masks
//!
//! All filters keep the mask dimensions. Pixels outside the mask count as
//! unselected, so shrinking also pulls the selection away from the mask edges.

use image::{imageops, GrayImage};
use imageproc::filter::{box_filter, gaussian_blur_f32};
use imageproc::morphology::{grayscale_dilate, grayscale_erode, Mask};

/// Structuring elements are limited to a radius of 255
fn disk(radius: u32) -> (Mask, u32) {
    let radius = u8::try_from(radius).unwrap_or(u8::MAX);
    (Mask::disk(radius), u32::from(radius))
}

/// Dilate by a disk of `radius` pixels
pub fn grow(mask: &mut GrayImage, radius: u32) {
    if radius == 0 {
        return;
    }
    let (element, _) = disk(radius);
    *mask = grayscale_dilate(mask, &element);
}

/// Erode by a disk of `radius` pixels, without locking the mask edges
pub fn shrink(mask: &mut GrayImage, radius: u32) {
    if radius == 0 {
        return;
    }
    let (element, r) = disk(radius);
    let (w, h) = mask.dimensions();

    // Zero border so selected pixels near the edge erode too
    let mut padded = GrayImage::new(w + 2 * r, h + 2 * r);
    imageops::replace(&mut padded, mask, i64::from(r), i64::from(r));
    let eroded = grayscale_erode(&padded, &element);
    *mask = imageops::crop_imm(&eroded, r, r, w, h).to_image();
}

/// Gaussian feather with a kernel reaching about `radius` pixels
pub fn feather(mask: &mut GrayImage, radius: u32) {
    if radius == 0 {
        return;
    }
    let sigma = (radius as f32 / 3.0).max(0.5);
    *mask = gaussian_blur_f32(mask, sigma);
}

/// One smoothing step on edge pixels: pixels whose 3x3 neighbourhood mixes
/// selected and unselected values take the neighbourhood mean
pub fn anti_alias(mask: &mut GrayImage) {
    let square = Mask::square(1);
    let lo = grayscale_erode(mask, &square);
    let hi = grayscale_dilate(mask, &square);
    let mean = box_filter(mask, 1, 1);
    for (((px, lo), hi), mean) in mask
        .pixels_mut()
        .zip(lo.pixels())
        .zip(hi.pixels())
        .zip(mean.pixels())
    {
        if lo.0[0] == 0 && hi.0[0] == 255 {
            *px = *mean;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn square(size: u32, from: u32, to: u32) -> GrayImage {
        GrayImage::from_fn(size, size, |x, y| {
            if (from..to).contains(&x) && (from..to).contains(&y) {
                Luma([255])
            } else {
                Luma([0])
            }
        })
    }

    fn selected(mask: &GrayImage) -> usize {
        mask.pixels().filter(|p| p.0[0] > 0).count()
    }

    #[test]
    fn test_grow_uses_disk() {
        let mut mask = GrayImage::new(9, 9);
        mask.put_pixel(4, 4, Luma([255]));
        grow(&mut mask, 2);
        // Disk of radius 2 covers 13 pixels
        assert_eq!(selected(&mask), 13);
        assert_eq!(mask.get_pixel(6, 4).0[0], 255);
        assert_eq!(mask.get_pixel(6, 6).0[0], 0);
    }

    #[test]
    fn test_shrink_releases_mask_edges() {
        let mut mask = GrayImage::from_pixel(6, 6, Luma([255]));
        shrink(&mut mask, 1);
        assert_eq!(mask.get_pixel(0, 3).0[0], 0);
        assert_eq!(mask.get_pixel(2, 2).0[0], 255);
        assert_eq!(selected(&mask), 16);
    }

    #[test]
    fn test_grow_then_shrink_is_lossy() {
        let mut mask = square(12, 2, 10);
        mask.put_pixel(5, 5, Luma([0]));
        let original = mask.clone();

        grow(&mut mask, 2);
        shrink(&mut mask, 2);

        assert_ne!(mask, original);
        assert_eq!(mask.get_pixel(5, 5).0[0], 255);
    }

    #[test]
    fn test_feather_softens_edges_only() {
        let mut mask = square(32, 8, 24);
        feather(&mut mask, 4);
        let edge = mask.get_pixel(8, 16).0[0];
        assert!(edge > 0 && edge < 255, "edge value {edge}");
        // Interior stays selected up to float rounding
        assert!(mask.get_pixel(16, 16).0[0] >= 254);
        assert_eq!(mask.get_pixel(0, 0).0[0], 0);
        assert_eq!(mask.dimensions(), (32, 32));
    }

    #[test]
    fn test_anti_alias_touches_only_boundaries() {
        let mut mask = square(10, 3, 7);
        anti_alias(&mut mask);
        let corner = mask.get_pixel(3, 3).0[0];
        assert!(corner > 0 && corner < 255);
        assert_eq!(mask.get_pixel(5, 5).0[0], 255);
        assert_eq!(mask.get_pixel(0, 0).0[0], 0);
    }

    #[test]
    fn test_shrink_radius_larger_than_mask_clears_it() {
        let mut mask = square(12, 2, 10);
        shrink(&mut mask, 20);
        assert_eq!(selected(&mask), 0);
    }

    #[test]
    fn test_zero_radius_is_identity() {
        let original = square(8, 2, 6);
        let mut mask = original.clone();
        grow(&mut mask, 0);
        shrink(&mut mask, 0);
        feather(&mut mask, 0);
        assert_eq!(mask, original);
    }
}

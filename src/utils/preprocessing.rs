//! Tensor preparation shared by the neural network backends
//!
//! Segmentation encoders expect the longest side resized to the model size and
//! the image placed top-left on a zero canvas; matting models expect the image
//! stretched to a square. Both normalize per channel in NCHW layout.

use crate::error::{Result, VisionError};
use crate::types::ImageView;
use image::{GrayImage, RgbImage, RgbaImage};
use ndarray::{Array4, ArrayView2};

/// Per-channel normalization in 0-1 space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizationConfig {
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

/// `ImageNet` statistics, also used by SAM-family encoders
pub const IMAGENET: NormalizationConfig = NormalizationConfig {
    mean: [0.485, 0.456, 0.406],
    std: [0.229, 0.224, 0.225],
};

/// Shared image preprocessing utilities
pub struct ImagePreprocessor;

impl ImagePreprocessor {
    /// RGB copy of any 4-channel view
    #[must_use]
    pub fn view_to_rgb(view: &ImageView<'_>) -> RgbImage {
        let extent = view.extent();
        RgbImage::from_fn(extent.width, extent.height, |x, y| {
            let [r, g, b, _] = view.rgba_at(x, y);
            image::Rgb([r, g, b])
        })
    }

    /// RGBA copy of any view
    #[must_use]
    pub fn view_to_rgba(view: &ImageView<'_>) -> RgbaImage {
        view.to_rgba_image()
    }

    /// Scale factor that fits the longest side into `target`
    #[must_use]
    pub fn longest_side_scale(width: u32, height: u32, target: u32) -> f32 {
        target as f32 / width.max(height).max(1) as f32
    }

    /// Resize so the longest side equals `target`, keeping the aspect ratio
    #[must_use]
    pub fn resize_longest_side(image: &RgbImage, target: u32) -> RgbImage {
        let (w, h) = image.dimensions();
        let scale = Self::longest_side_scale(w, h, target);
        let new_w = ((w as f32 * scale).round() as u32).clamp(1, target);
        let new_h = ((h as f32 * scale).round() as u32).clamp(1, target);
        image::imageops::resize(image, new_w, new_h, image::imageops::FilterType::Triangle)
    }

    /// Normalized NCHW tensor of `target`², image at the top-left, zero elsewhere
    ///
    /// # Errors
    /// - `image` is larger than `target` on either axis
    pub fn to_padded_tensor(
        image: &RgbImage,
        target: u32,
        normalization: &NormalizationConfig,
    ) -> Result<Array4<f32>> {
        if image.width() > target || image.height() > target {
            return Err(VisionError::processing(format!(
                "Image {}x{} does not fit into {target}x{target}",
                image.width(),
                image.height()
            )));
        }
        let size = target as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        Self::write_normalized(image, normalization, &mut tensor);
        Ok(tensor)
    }

    /// Normalized NCHW tensor of `image` stretched to `target`²
    #[must_use]
    pub fn to_stretched_tensor(
        image: &RgbImage,
        target: u32,
        normalization: &NormalizationConfig,
    ) -> Array4<f32> {
        let resized =
            image::imageops::resize(image, target, target, image::imageops::FilterType::Triangle);
        let size = target as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        Self::write_normalized(&resized, normalization, &mut tensor);
        tensor
    }

    #[allow(clippy::indexing_slicing)]
    // Safe: callers allocate the tensor at least as large as the image
    fn write_normalized(
        image: &RgbImage,
        normalization: &NormalizationConfig,
        tensor: &mut Array4<f32>,
    ) {
        for (x, y, pixel) in image.enumerate_pixels() {
            for c in 0..3 {
                let value = f32::from(pixel[c]) / 255.0;
                tensor[[0, c, y as usize, x as usize]] =
                    (value - normalization.mean[c]) / normalization.std[c];
            }
        }
    }

    /// Turn a single-channel model output into an 8-bit mask of `width`x`height`
    ///
    /// With `sigmoid`, the plane holds logits; otherwise values are in 0-1.
    #[must_use]
    pub fn mask_from_plane(
        plane: ArrayView2<'_, f32>,
        width: u32,
        height: u32,
        sigmoid: bool,
    ) -> GrayImage {
        let (h, w) = plane.dim();
        let small = GrayImage::from_fn(w as u32, h as u32, |x, y| {
            let raw = plane[[y as usize, x as usize]];
            let value = if sigmoid { 1.0 / (1.0 + (-raw).exp()) } else { raw };
            image::Luma([(value * 255.0).round().clamp(0.0, 255.0) as u8])
        });
        if small.dimensions() == (width, height) {
            small
        } else {
            image::imageops::resize(&small, width, height, image::imageops::FilterType::Triangle)
        }
    }
}

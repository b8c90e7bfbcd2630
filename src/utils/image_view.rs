//! Conversion between paint devices and backend image views
//!
//! Devices already stored as 8-bit BGRA are copied byte for byte and tagged
//! [`PixelLayout::Bgra8`]; every other color model is converted to
//! [`PixelLayout::Rgba8`]. Results coming back from a backend must be `Rgba8`.

use crate::document::{ColorModel, PaintDevice};
use crate::error::{Result, VisionError};
use crate::types::{Extent, ImageData, ImageView, PixelLayout, Rect};
use image::RgbaImage;

/// Pixels of a device region, owned and ready to hand to a backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisionImage {
    image: ImageData,
    bounds: Rect,
}

impl VisionImage {
    /// Extract `bounds` (or the device's exact bounds) from `device`
    ///
    /// Returns `None` when the resolved bounds are empty, which happens for
    /// fully transparent sources.
    #[must_use]
    pub fn prepare(device: &PaintDevice, bounds: Option<Rect>) -> Option<Self> {
        let bounds = bounds.unwrap_or_else(|| device.exact_bounds());
        if bounds.is_empty() {
            return None;
        }

        let extent = bounds.extent();
        let image = match device.color_model() {
            ColorModel::Bgra8 => ImageData::from_raw(
                extent,
                PixelLayout::Bgra8,
                device.read_bytes(bounds),
            ),
            ColorModel::Rgba16 | ColorModel::GrayA8 => {
                Ok(ImageData::from_rgba(device.to_rgba8(bounds)))
            },
        };
        match image {
            Ok(image) => Some(Self { image, bounds }),
            Err(e) => {
                tracing::warn!("⚠️ Failed to extract {bounds:?}: {e}");
                None
            },
        }
    }

    /// Document rectangle the pixels were taken from
    #[must_use]
    pub const fn bounds(&self) -> Rect {
        self.bounds
    }

    #[must_use]
    pub const fn extent(&self) -> Extent {
        self.image.extent()
    }

    #[must_use]
    pub const fn layout(&self) -> PixelLayout {
        self.image.layout()
    }

    #[must_use]
    pub fn view(&self) -> ImageView<'_> {
        self.image.view()
    }

    #[must_use]
    pub fn into_image_data(self) -> ImageData {
        self.image
    }
}

/// Copy `region` (view-local coordinates) of a backend result into an RGBA image
///
/// # Errors
/// - The view is not `Rgba8`
/// - `region` is not inside the view
pub fn convert_back(view: &ImageView<'_>, region: Rect) -> Result<RgbaImage> {
    if view.layout() != PixelLayout::Rgba8 {
        return Err(VisionError::unsupported_format(format!(
            "Expected an Rgba8 result, got {:?}",
            view.layout()
        )));
    }
    if !Rect::from_extent(view.extent()).contains_rect(&region) {
        return Err(VisionError::processing(format!(
            "Region {region:?} is outside the {}x{} result",
            view.extent().width,
            view.extent().height
        )));
    }

    let row_bytes = region.width as usize * 4;
    let mut out = Vec::with_capacity(row_bytes * region.height as usize);
    let x_offset = region.x as usize * 4;
    for y in 0..region.height {
        let row = view.row(region.y as u32 + y);
        out.extend_from_slice(&row[x_offset..x_offset + row_bytes]);
    }
    RgbaImage::from_raw(region.width, region.height, out)
        .ok_or_else(|| VisionError::internal("Converted buffer size mismatch"))
}

//! Image I/O operations service
//!
//! File access for the CLI host, kept apart from the tools so that they only
//! ever see documents and paint devices.

use crate::error::{Result, VisionError};
use image::{DynamicImage, GrayImage, ImageFormat};
use std::path::Path;

/// Service for handling image file input/output operations
pub struct ImageIOService;

impl ImageIOService {
    /// Load an image from a file path
    ///
    /// Falls back to content sniffing when the extension does not match the data.
    ///
    /// # Errors
    /// - The file is missing or cannot be decoded
    pub fn load_image<P: AsRef<Path>>(path: P) -> Result<DynamicImage> {
        let path_ref = path.as_ref();

        if !path_ref.exists() {
            return Err(VisionError::file_io_error(
                "read image file",
                path_ref,
                &std::io::Error::new(std::io::ErrorKind::NotFound, "file does not exist"),
            ));
        }

        match image::open(path_ref) {
            Ok(img) => Ok(img),
            Err(e) => {
                log::debug!(
                    "Extension-based loading failed for {}: {}. Attempting content-based detection.",
                    path_ref.display(),
                    e
                );
                let data = std::fs::read(path_ref)
                    .map_err(|io_err| VisionError::file_io_error("read image data", path_ref, &io_err))?;
                image::load_from_memory(&data).map_err(|content_err| {
                    VisionError::processing(format!(
                        "Failed to load {}: extension error: {e}, content error: {content_err}",
                        path_ref.display()
                    ))
                })
            },
        }
    }

    /// Load a mask image as 8-bit gray; any color image is reduced to luma
    ///
    /// # Errors
    /// - See [`ImageIOService::load_image`]
    pub fn load_mask<P: AsRef<Path>>(path: P) -> Result<GrayImage> {
        Ok(Self::load_image(path)?.to_luma8())
    }

    /// Save an image, choosing the format from the extension (PNG when unknown)
    ///
    /// Formats without an alpha channel get the image flattened to RGB.
    ///
    /// # Errors
    /// - The output directory cannot be created or encoding fails
    pub fn save_image<P: AsRef<Path>>(image: &DynamicImage, path: P) -> Result<()> {
        let path_ref = path.as_ref();

        if let Some(parent) = path_ref.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| VisionError::file_io_error("create output directory", parent, &e))?;
        }

        let format = ImageFormat::from_path(path_ref).unwrap_or(ImageFormat::Png);
        let result = if format == ImageFormat::Jpeg {
            DynamicImage::ImageRgb8(image.to_rgb8()).save_with_format(path_ref, format)
        } else {
            image.save_with_format(path_ref, format)
        };
        result.map_err(|e| {
            VisionError::processing(format!(
                "Failed to save {} as {format:?}: {e}",
                path_ref.display()
            ))
        })?;

        log::debug!("Saved {}x{} image to {}", image.width(), image.height(), path_ref.display());
        Ok(())
    }

    /// Check if a file path has a supported image extension
    #[must_use]
    pub fn is_supported_format<P: AsRef<Path>>(path: P) -> bool {
        path.as_ref()
            .extension()
            .and_then(|extension| extension.to_str())
            .is_some_and(|ext| {
                matches!(
                    ext.to_lowercase().as_str(),
                    "jpg" | "jpeg" | "png" | "webp" | "tiff" | "tif"
                )
            })
    }

    /// Decode an image held in memory
    ///
    /// # Errors
    /// - The bytes are not a decodable image
    pub fn load_from_bytes(bytes: &[u8]) -> Result<DynamicImage> {
        image::load_from_memory(bytes)
            .map_err(|e| VisionError::processing(format!("Failed to decode image from bytes: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use tempfile::TempDir;

    fn checker() -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_fn(8, 8, |x, y| {
            if (x + y) % 2 == 0 {
                Rgba([255, 0, 0, 255])
            } else {
                Rgba([0, 0, 255, 128])
            }
        }))
    }

    #[test]
    fn test_save_and_load_png_keeps_alpha() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("nested/out.png");
        ImageIOService::save_image(&checker(), &path)?;

        let loaded = ImageIOService::load_image(&path)?.to_rgba8();
        assert_eq!(loaded.get_pixel(1, 0).0, [0, 0, 255, 128]);
        Ok(())
    }

    #[test]
    fn test_jpeg_output_is_flattened() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("out.jpg");
        ImageIOService::save_image(&checker(), &path)?;
        assert!(!ImageIOService::load_image(&path)?.color().has_alpha());
        Ok(())
    }

    #[test]
    fn test_content_detection_with_wrong_extension() -> Result<()> {
        let dir = TempDir::new()?;
        let png = dir.path().join("real.png");
        ImageIOService::save_image(&checker(), &png)?;
        let disguised = dir.path().join("fake.jpg");
        std::fs::copy(&png, &disguised)?;

        assert_eq!(ImageIOService::load_image(&disguised)?.width(), 8);
        Ok(())
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = ImageIOService::load_image("/nonexistent/input.png").unwrap_err();
        assert!(matches!(err, VisionError::Io(_)));
    }

    #[test]
    fn test_load_mask_reduces_to_luma() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("mask.png");
        let white = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([255, 255, 255, 255])));
        ImageIOService::save_image(&white, &path)?;
        assert!(ImageIOService::load_mask(&path)?.pixels().all(|p| p.0[0] == 255));
        Ok(())
    }

    #[test]
    fn test_supported_formats() {
        assert!(ImageIOService::is_supported_format("a.PNG"));
        assert!(ImageIOService::is_supported_format("dir/b.webp"));
        assert!(!ImageIOService::is_supported_format("c.gif"));
        assert!(!ImageIOService::is_supported_format("noext"));
    }

    #[test]
    fn test_load_from_bytes_rejects_garbage() {
        assert!(ImageIOService::load_from_bytes(b"not an image").is_err());
    }
}

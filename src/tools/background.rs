//! Background removal filter
//!
//! Runs the background removal model on a whole paint device and makes the
//! background transparent. Foreground estimation (on by default) also
//! recovers clean colors in semi-transparent edge pixels.

use crate::config::BackendKind;
use crate::document::PaintDevice;
use crate::error::{Result, VisionError};
use crate::manager::BackendManager;
use crate::models::VisionTask;
use crate::queue::Task;
use crate::services::progress::{ProcessingStage, ProcessingTimings, ProgressTracker};
use crate::types::Rect;
use crate::utils::foreground::{apply_alpha, estimate_foreground};
use crate::utils::image_view::VisionImage;
use crate::utils::preprocessing::ImagePreprocessor;
use instant::Instant;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

/// Filter configuration as stored with a filter invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackgroundRemovalConfig {
    /// Model file name for background removal
    pub model: String,
    pub backend: BackendKind,
    #[serde(default = "default_foreground_estimation")]
    pub foreground_estimation: bool,
}

fn default_foreground_estimation() -> bool {
    true
}

/// What [`BackgroundRemovalFilter::process`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOutcome {
    /// The device was rewritten inside `bounds`
    Applied { bounds: Rect },
    /// The device has no pixels
    Empty,
    /// The device is smaller than the minimum size on some axis
    TooSmall,
}

pub struct BackgroundRemovalFilter {
    manager: Arc<BackendManager>,
    min_size: u32,
}

impl BackgroundRemovalFilter {
    /// Filter skipping devices smaller than `min_size` on either axis
    #[must_use]
    pub fn new(manager: Arc<BackendManager>, min_size: u32) -> Self {
        Self { manager, min_size }
    }

    /// Configuration reflecting the manager's current model and backend
    #[must_use]
    pub fn default_configuration(&self) -> BackgroundRemovalConfig {
        BackgroundRemovalConfig {
            model: self.manager.model_name(VisionTask::BackgroundRemoval),
            backend: self.manager.backend(),
            foreground_estimation: default_foreground_estimation(),
        }
    }

    /// Switch the manager to the configured backend and model
    ///
    /// # Errors
    /// - The backend cannot be initialized or the model name is invalid
    pub fn apply_configuration(&self, config: &BackgroundRemovalConfig) -> Result<()> {
        self.manager.set_backend(config.backend)?;
        self.manager
            .set_model_name(VisionTask::BackgroundRemoval, &config.model)
    }

    /// Remove the background of `device` in place
    ///
    /// # Errors
    /// - Inference fails; `device` is left untouched
    pub fn process(
        &self,
        device: &mut PaintDevice,
        config: &BackgroundRemovalConfig,
        progress: &mut ProgressTracker,
    ) -> Result<FilterOutcome> {
        let start = Instant::now();
        let mut timings = ProcessingTimings::default();

        progress.report_stage(ProcessingStage::ImageExtraction);
        let Some(image) = VisionImage::prepare(device, Some(device.bounds())) else {
            warn!("⚠️ Background removal: no image data available");
            return Ok(FilterOutcome::Empty);
        };
        let extent = image.extent();
        if extent.width < self.min_size || extent.height < self.min_size {
            warn!(
                "⚠️ Background removal: image is too small ({}x{}), minimum size is {}x{}",
                extent.width, extent.height, self.min_size, self.min_size
            );
            return Ok(FilterOutcome::TooSmall);
        }
        timings.extraction_ms = start.elapsed().as_millis() as u64;

        progress.report_stage(ProcessingStage::Inference);
        let inference_start = Instant::now();
        let mask = self
            .manager
            .remove_background(&image.view())
            .map_err(|e| {
                progress.report_error(&e.user_message());
                e
            })?;
        timings.inference_ms = inference_start.elapsed().as_millis() as u64;

        progress.report_stage(ProcessingStage::Postprocessing);
        let post_start = Instant::now();
        let rgba = ImagePreprocessor::view_to_rgba(&image.view());
        let alpha = mask.into_gray()?;
        let result = if config.foreground_estimation {
            estimate_foreground(&rgba, &alpha)?
        } else {
            apply_alpha(&rgba, &alpha)?
        };
        timings.postprocessing_ms = post_start.elapsed().as_millis() as u64;

        progress.report_stage(ProcessingStage::WriteBack);
        let bounds = image.bounds();
        device.write_rgba8(bounds.top_left(), &result, None);

        progress.report_stage(ProcessingStage::Completed);
        timings.total_ms = start.elapsed().as_millis() as u64;
        info!(
            "🪄 Removed background of {}x{} region in {}ms",
            extent.width, extent.height, timings.total_ms
        );
        progress.report_completion(timings);
        Ok(FilterOutcome::Applied { bounds })
    }
}

impl std::fmt::Debug for BackgroundRemovalFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundRemovalFilter")
            .field("min_size", &self.min_size)
            .finish_non_exhaustive()
    }
}

/// Runs the filter on a layer device from the work queue
pub struct BackgroundRemovalTask {
    filter: Arc<BackgroundRemovalFilter>,
    device: Arc<RwLock<PaintDevice>>,
    config: BackgroundRemovalConfig,
    progress: ProgressTracker,
}

impl BackgroundRemovalTask {
    #[must_use]
    pub fn new(
        filter: Arc<BackgroundRemovalFilter>,
        device: Arc<RwLock<PaintDevice>>,
        config: BackgroundRemovalConfig,
        progress: ProgressTracker,
    ) -> Self {
        Self {
            filter,
            device,
            config,
            progress,
        }
    }
}

impl Task for BackgroundRemovalTask {
    fn name(&self) -> &str {
        "Background Removal"
    }

    fn run(self: Box<Self>) -> Result<()> {
        let Self {
            filter,
            device,
            config,
            mut progress,
        } = *self;
        let mut device = device
            .write()
            .map_err(|_| VisionError::internal("Paint device lock is poisoned"))?;
        filter.process(&mut device, &config, &mut progress)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::mock::{install_placeholder_models, MockBackendFactory};
    use crate::config::MemorySettingsStore;
    use crate::document::ColorModel;
    use crate::models::ModelPaths;
    use crate::types::Point;
    use image::{Rgba, RgbaImage};
    use tempfile::TempDir;

    fn filter(factory: &MockBackendFactory, dir: &TempDir) -> BackgroundRemovalFilter {
        let paths = ModelPaths::new(dir.path());
        install_placeholder_models(&paths, &[(VisionTask::BackgroundRemoval, "BiRefNet_HR.onnx")])
            .unwrap();
        let manager = BackendManager::new(
            Arc::new(factory.clone()),
            Arc::new(MemorySettingsStore::default()),
            paths,
        )
        .unwrap();
        BackgroundRemovalFilter::new(Arc::new(manager), 64)
    }

    /// Dark disc on a white background
    fn disc(size: u32) -> PaintDevice {
        let c = size as f32 / 2.0;
        let image = RgbaImage::from_fn(size, size, |x, y| {
            let d = ((x as f32 - c).powi(2) + (y as f32 - c).powi(2)).sqrt();
            if d < c / 2.0 {
                Rgba([20, 30, 40, 255])
            } else {
                Rgba([255, 255, 255, 255])
            }
        });
        PaintDevice::from_rgba_image(ColorModel::Bgra8, &image, Point::new(4, 4))
    }

    #[test]
    fn test_background_becomes_transparent() -> Result<()> {
        let dir = TempDir::new()?;
        let factory = MockBackendFactory::new();
        let filter = filter(&factory, &dir);
        let mut device = disc(80);
        let config = BackgroundRemovalConfig {
            foreground_estimation: false,
            ..filter.default_configuration()
        };

        let outcome = filter.process(&mut device, &config, &mut ProgressTracker::no_op())?;
        assert_eq!(outcome, FilterOutcome::Applied { bounds: Rect::new(4, 4, 80, 80) });
        assert_eq!(device.pixel(Point::new(4, 4))[3], 0);
        assert_eq!(device.pixel(Point::new(44, 44)), [20, 30, 40, 255]);
        assert_eq!(factory.count_calls("remove_background"), 1);
        Ok(())
    }

    #[test]
    fn test_foreground_estimation_keeps_matte() -> Result<()> {
        let dir = TempDir::new()?;
        let factory = MockBackendFactory::new();
        let filter = filter(&factory, &dir);
        let mut device = disc(80);

        let config = filter.default_configuration();
        assert!(config.foreground_estimation);
        filter.process(&mut device, &config, &mut ProgressTracker::no_op())?;
        assert_eq!(device.pixel(Point::new(4, 4))[3], 0);
        assert_eq!(device.pixel(Point::new(44, 44))[3], 255);
        Ok(())
    }

    #[test]
    fn test_small_and_empty_devices_are_skipped() -> Result<()> {
        let dir = TempDir::new()?;
        let factory = MockBackendFactory::new();
        let filter = filter(&factory, &dir);
        let config = filter.default_configuration();

        let mut small = disc(32);
        let before = small.clone();
        assert_eq!(
            filter.process(&mut small, &config, &mut ProgressTracker::no_op())?,
            FilterOutcome::TooSmall
        );
        assert_eq!(small, before);

        let mut empty = PaintDevice::new(ColorModel::Bgra8, Rect::default());
        assert_eq!(
            filter.process(&mut empty, &config, &mut ProgressTracker::no_op())?,
            FilterOutcome::Empty
        );
        assert_eq!(factory.count_calls("remove_background"), 0);
        Ok(())
    }

    #[test]
    fn test_failed_inference_leaves_device_untouched() -> Result<()> {
        let dir = TempDir::new()?;
        let factory = MockBackendFactory::new_failing_inference();
        let filter = filter(&factory, &dir);
        let mut device = disc(80);
        let before = device.clone();

        let config = filter.default_configuration();
        assert!(filter
            .process(&mut device, &config, &mut ProgressTracker::no_op())
            .is_err());
        assert_eq!(device, before);
        Ok(())
    }

    #[test]
    fn test_apply_configuration_switches_model() -> Result<()> {
        let dir = TempDir::new()?;
        let factory = MockBackendFactory::new();
        let filter = filter(&factory, &dir);

        let config = BackgroundRemovalConfig {
            model: "BiRefNet_HR.onnx".to_string(),
            ..filter.default_configuration()
        };
        filter.apply_configuration(&config)?;
        assert_eq!(filter.default_configuration().model, "BiRefNet_HR.onnx");

        filter.process(&mut disc(64), &config, &mut ProgressTracker::no_op())?;
        assert!(factory
            .call_history()
            .contains(&"load_model:birefnet:BiRefNet_HR.onnx".to_string()));
        Ok(())
    }

    #[test]
    fn test_config_defaults_foreground_estimation_on() {
        let config: BackgroundRemovalConfig =
            serde_json::from_str(r#"{"model":"BiRefNet_lite.onnx","backend":"cpu"}"#).unwrap();
        assert!(config.foreground_estimation);
        assert_eq!(config.backend, BackendKind::Cpu);
    }
}

//! Deterministic mock backend
//!
//! Implements the inference contract without model files or ONNX Runtime so
//! tools can be exercised end to end. Every call is recorded in a shared call
//! history that tests use to count inference work.
//!
//! Behavior of the mock models:
//! - segmentation by point selects pixels whose luma is within
//!   [`MOCK_LUMA_TOLERANCE`] of the clicked pixel
//! - segmentation by rectangle selects every visible pixel inside it
//! - background removal keeps pixels that differ from the top-left corner
//! - inpainting fills masked pixels with the mean color of the rest

use crate::config::BackendKind;
use crate::error::{Result, VisionError};
use crate::inference::{BackendFactory, EncodedImage, InferenceBackend, VisionModel};
use crate::models::{ModelPaths, VisionTask};
use crate::types::{Extent, ImageData, ImageView, PixelLayout, Prompt, Rect};
use std::any::Any;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Shared, ordered record of mock calls
pub type CallLog = Arc<Mutex<Vec<String>>>;

/// Luma distance treated as "same object" by the mock point segmentation
pub const MOCK_LUMA_TOLERANCE: u8 = 16;

/// Factory handing out mock backends that share one call history
#[derive(Debug, Clone, Default)]
pub struct MockBackendFactory {
    /// Call history for verification in tests
    call_history: CallLog,
    /// Kinds that report unsupported and fail to initialize
    unavailable: Arc<Mutex<Vec<BackendKind>>>,
    /// Whether inference calls should fail
    fail_inference: Arc<AtomicBool>,
}

impl MockBackendFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory where `kind` cannot be initialized
    #[must_use]
    pub fn with_unavailable(kind: BackendKind) -> Self {
        let factory = Self::new();
        factory.set_available(kind, false);
        factory
    }

    /// Factory whose models fail every inference call
    #[must_use]
    pub fn new_failing_inference() -> Self {
        let factory = Self::new();
        factory.set_fail_inference(true);
        factory
    }

    pub fn set_available(&self, kind: BackendKind, available: bool) {
        if let Ok(mut unavailable) = self.unavailable.lock() {
            unavailable.retain(|k| *k != kind);
            if !available {
                unavailable.push(kind);
            }
        }
    }

    pub fn set_fail_inference(&self, fail: bool) {
        self.fail_inference.store(fail, Ordering::SeqCst);
    }

    /// Get the call history for verification in tests
    #[must_use]
    pub fn call_history(&self) -> Vec<String> {
        self.call_history
            .lock()
            .map(|history| history.clone())
            .unwrap_or_default()
    }

    /// Number of recorded calls whose name starts with `prefix`
    #[must_use]
    pub fn count_calls(&self, prefix: &str) -> usize {
        self.call_history()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    /// Clear the call history
    pub fn clear_call_history(&self) {
        if let Ok(mut history) = self.call_history.lock() {
            history.clear();
        }
    }

    fn is_available(&self, kind: BackendKind) -> bool {
        self.unavailable
            .lock()
            .map(|unavailable| !unavailable.contains(&kind))
            .unwrap_or(false)
    }
}

fn record_call(log: &CallLog, call: String) {
    if let Ok(mut history) = log.lock() {
        history.push(call);
    }
}

impl BackendFactory for MockBackendFactory {
    fn is_supported(&self, kind: BackendKind) -> bool {
        self.is_available(kind)
    }

    fn create(&self, kind: BackendKind) -> Result<Box<dyn InferenceBackend>> {
        record_call(&self.call_history, format!("create:{kind}"));
        if !self.is_available(kind) {
            return Err(VisionError::backend(format!(
                "Mock {kind} backend is not available"
            )));
        }
        Ok(Box::new(MockBackend {
            kind,
            call_history: Arc::clone(&self.call_history),
            fail_inference: Arc::clone(&self.fail_inference),
        }))
    }
}

/// Mock compute target
#[derive(Debug)]
pub struct MockBackend {
    kind: BackendKind,
    call_history: CallLog,
    fail_inference: Arc<AtomicBool>,
}

impl InferenceBackend for MockBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn device_description(&self) -> String {
        format!("Mock {} device", self.kind)
    }

    fn load_model(&mut self, task: VisionTask, path: &Path) -> Result<Box<dyn VisionModel>> {
        let file = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default();
        record_call(&self.call_history, format!("load_model:{}:{file}", task.subdir()));
        if !path.exists() {
            return Err(VisionError::model_error_with_context(
                "load",
                path,
                "file does not exist",
                &[],
            ));
        }
        Ok(Box::new(MockModel {
            task,
            call_history: Arc::clone(&self.call_history),
            fail_inference: Arc::clone(&self.fail_inference),
        }))
    }
}

/// Mock model for one task
#[derive(Debug)]
pub struct MockModel {
    task: VisionTask,
    call_history: CallLog,
    fail_inference: Arc<AtomicBool>,
}

/// Embedding produced by [`MockModel::encode`]
#[derive(Debug, Clone)]
struct MockEmbedding {
    extent: Extent,
    luma: Vec<u8>,
    alpha: Vec<u8>,
}

impl MockModel {
    fn begin(&self, operation: &str) -> Result<()> {
        record_call(&self.call_history, format!("{operation}:{}", self.task.subdir()));
        if self.fail_inference.load(Ordering::SeqCst) {
            return Err(VisionError::inference(format!("Mock {operation} failed")));
        }
        Ok(())
    }

    fn require(&self, task: VisionTask, operation: &str) -> Result<()> {
        if self.task == task {
            Ok(())
        } else {
            Err(VisionError::model(format!(
                "A {} model does not support {operation}",
                self.task
            )))
        }
    }
}

/// Writes placeholder files for the default model of every task, plus `extra`
/// names for `task`, so the mock backend can "load" them
///
/// # Errors
/// - Directories or files cannot be created
pub fn install_placeholder_models(
    paths: &ModelPaths,
    extra: &[(VisionTask, &str)],
) -> Result<()> {
    let mut files: Vec<(VisionTask, &str)> = VisionTask::ALL
        .iter()
        .map(|task| (*task, task.default_model()))
        .collect();
    files.extend_from_slice(extra);
    for (task, name) in &files {
        let dir = paths.task_dir(*task);
        std::fs::create_dir_all(&dir)
            .map_err(|e| VisionError::file_io_error("create model directory", &dir, &e))?;
        let path = dir.join(name);
        std::fs::write(&path, b"mock model")
            .map_err(|e| VisionError::file_io_error("write model", &path, &e))?;
    }
    Ok(())
}

fn luma([r, g, b, _]: [u8; 4]) -> u8 {
    ((u32::from(r) * 299 + u32::from(g) * 587 + u32::from(b) * 114) / 1000) as u8
}

fn require_color(image: &ImageView<'_>) -> Result<()> {
    if image.layout() == PixelLayout::Alpha8 {
        return Err(VisionError::unsupported_format(
            "Expected a 4-channel image, got Alpha8",
        ));
    }
    Ok(())
}

impl VisionModel for MockModel {
    fn task(&self) -> VisionTask {
        self.task
    }

    fn encode(&mut self, image: &ImageView<'_>) -> Result<Box<dyn Any + Send + Sync>> {
        self.require(VisionTask::Segmentation, "encode")?;
        require_color(image)?;
        self.begin("encode")?;

        let extent = image.extent();
        let mut embedding = MockEmbedding {
            extent,
            luma: Vec::with_capacity(extent.pixel_count()),
            alpha: Vec::with_capacity(extent.pixel_count()),
        };
        for y in 0..extent.height {
            for x in 0..extent.width {
                let px = image.rgba_at(x, y);
                embedding.luma.push(luma(px));
                embedding.alpha.push(px[3]);
            }
        }
        Ok(Box::new(embedding))
    }

    fn compute_mask(&mut self, encoded: &EncodedImage, prompt: Prompt) -> Result<ImageData> {
        self.require(VisionTask::Segmentation, "compute_mask")?;
        self.begin("compute_mask")?;

        let embedding = encoded.state::<MockEmbedding>()?;
        let extent = embedding.extent;
        let width = extent.width as usize;
        let mut mask = ImageData::new(extent, PixelLayout::Alpha8);
        let out = mask.data_mut();

        match prompt {
            Prompt::Point(point) => {
                if !Rect::from_extent(extent).contains(point) {
                    return Ok(mask);
                }
                let target = embedding.luma[point.y as usize * width + point.x as usize];
                for (i, value) in out.iter_mut().enumerate() {
                    let close = embedding.luma[i].abs_diff(target) <= MOCK_LUMA_TOLERANCE;
                    if close && embedding.alpha[i] > 0 {
                        *value = 255;
                    }
                }
            },
            Prompt::Rect(rect) => {
                let area = rect.intersected(&Rect::from_extent(extent));
                for y in area.top()..area.bottom() {
                    for x in area.left()..area.right() {
                        let i = y as usize * width + x as usize;
                        if embedding.alpha[i] > 0 {
                            out[i] = 255;
                        }
                    }
                }
            },
        }
        Ok(mask)
    }

    fn remove_background(&mut self, image: &ImageView<'_>) -> Result<ImageData> {
        self.require(VisionTask::BackgroundRemoval, "remove_background")?;
        require_color(image)?;
        self.begin("remove_background")?;

        let extent = image.extent();
        let mut mask = ImageData::new(extent, PixelLayout::Alpha8);
        if extent.is_empty() {
            return Ok(mask);
        }
        let background = luma(image.rgba_at(0, 0));
        let width = extent.width as usize;
        let out = mask.data_mut();
        for y in 0..extent.height {
            for x in 0..extent.width {
                let px = image.rgba_at(x, y);
                if px[3] > 0 && luma(px).abs_diff(background) > MOCK_LUMA_TOLERANCE {
                    out[y as usize * width + x as usize] = 255;
                }
            }
        }
        Ok(mask)
    }

    fn inpaint(&mut self, image: &ImageView<'_>, mask: &ImageView<'_>) -> Result<ImageData> {
        self.require(VisionTask::Inpainting, "inpaint")?;
        require_color(image)?;
        if mask.layout() != PixelLayout::Alpha8 {
            return Err(VisionError::unsupported_format("Inpaint mask must be Alpha8"));
        }
        if mask.extent() != image.extent() {
            return Err(VisionError::processing(format!(
                "Mask extent {:?} does not match image extent {:?}",
                mask.extent(),
                image.extent()
            )));
        }
        self.begin("inpaint")?;

        let extent = image.extent();
        let masked = |x: u32, y: u32| mask.row(y)[x as usize] > 127;

        let mut sum = [0u64; 3];
        let mut count = 0u64;
        for y in 0..extent.height {
            for x in 0..extent.width {
                if !masked(x, y) {
                    let px = image.rgba_at(x, y);
                    for (acc, channel) in sum.iter_mut().zip(px) {
                        *acc += u64::from(channel);
                    }
                    count += 1;
                }
            }
        }
        let fill = if count == 0 {
            [0, 0, 0, 255]
        } else {
            [
                (sum[0] / count) as u8,
                (sum[1] / count) as u8,
                (sum[2] / count) as u8,
                255,
            ]
        };

        let mut result = ImageData::new(extent, PixelLayout::Rgba8);
        let stride = result.stride();
        let out = result.data_mut();
        for y in 0..extent.height {
            for x in 0..extent.width {
                let px = if masked(x, y) { fill } else { image.rgba_at(x, y) };
                let offset = y as usize * stride + x as usize * 4;
                out[offset..offset + 4].copy_from_slice(&px);
            }
        }
        Ok(result)
    }
}

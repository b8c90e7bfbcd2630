//! Segmentation session: encoded-image caching and prompt queries
//!
//! In fast mode the source image is encoded once and every point or box
//! prompt is answered from that encoding. In precise mode nothing is cached:
//! each prompt re-extracts its region and runs background removal on it.

use crate::document::{CanvasId, Document, NodeId, PaintDevice};
use crate::error::Result;
use crate::inference::EncodedImage;
use crate::manager::BackendManager;
use crate::types::{ImageData, Point, Prompt, Rect};
use crate::utils::image_view::VisionImage;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Which layers the tool samples pixels from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleLayersMode {
    #[default]
    CurrentLayer,
    AllLayers,
    ColorLabeledLayers,
}

/// Everything that determines the pixels a segmentation query sees
#[derive(Clone)]
pub struct ImageInput {
    pub canvas: CanvasId,
    pub node: NodeId,
    pub document: Arc<Document>,
    pub sample_layers: SampleLayersMode,
    pub color_labels: Vec<u8>,
}

impl ImageInput {
    #[must_use]
    pub fn new(canvas: CanvasId, node: NodeId, document: Arc<Document>) -> Self {
        Self {
            canvas,
            node,
            document,
            sample_layers: SampleLayersMode::default(),
            color_labels: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_sample_layers(mut self, mode: SampleLayersMode) -> Self {
        self.sample_layers = mode;
        self
    }

    #[must_use]
    pub fn with_color_labels(mut self, labels: Vec<u8>) -> Self {
        self.color_labels = labels;
        self
    }

    /// Pixel source for the sampling mode; `None` when the node is gone
    ///
    /// # Errors
    /// - A layer device lock is poisoned
    pub fn source_device(&self) -> Result<Option<PaintDevice>> {
        match self.sample_layers {
            SampleLayersMode::CurrentLayer => match self.document.layer(self.node) {
                Some(layer) => Ok(Some(layer.read_device()?.clone())),
                None => Ok(None),
            },
            SampleLayersMode::AllLayers => self.document.projection().map(Some),
            SampleLayersMode::ColorLabeledLayers => self
                .document
                .merge_color_labeled_layers(&self.color_labels)
                .map(Some),
        }
    }
}

impl PartialEq for ImageInput {
    fn eq(&self, other: &Self) -> bool {
        self.canvas == other.canvas
            && self.node == other.node
            && Arc::ptr_eq(&self.document, &other.document)
            && self.sample_layers == other.sample_layers
            && self.color_labels == other.color_labels
    }
}

impl Eq for ImageInput {}

impl std::fmt::Debug for ImageInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageInput")
            .field("canvas", &self.canvas)
            .field("node", &self.node)
            .field("document", &self.document.id())
            .field("sample_layers", &self.sample_layers)
            .field("color_labels", &self.color_labels)
            .finish()
    }
}

/// Speed/accuracy trade-off of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentationMode {
    /// Encode once, answer many prompts cheaply
    #[default]
    Fast,
    /// Full inference on the prompt region for every query
    Precise,
}

impl SegmentationMode {
    const fn to_u8(self) -> u8 {
        match self {
            Self::Fast => 0,
            Self::Precise => 1,
        }
    }

    const fn from_u8(value: u8) -> Self {
        if value == 1 {
            Self::Precise
        } else {
            Self::Fast
        }
    }
}

/// Result of [`SegmentationSession::ensure_encoded`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeOutcome {
    /// The source was encoded; `bounds` is the encoded document region
    Encoded { bounds: Rect },
    /// The cached encoding is still valid
    CacheHit,
    /// The source has no pixels; nothing is cached
    EmptyInput,
    /// Precise mode does not encode
    Skipped,
}

/// Result of [`SegmentationSession::predict_mask`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaskPrediction {
    /// `Alpha8` mask whose top-left corner sits at `origin` in document coordinates
    Mask { mask: ImageData, origin: Point },
    /// No usable encoding for this input
    NotReady,
    /// The prompt does not touch the source pixels
    OutOfBounds,
}

struct EncodedImageCache {
    input: ImageInput,
    bounds: Rect,
    encoded: EncodedImage,
}

/// Per-tool segmentation state
pub struct SegmentationSession {
    manager: Arc<BackendManager>,
    mode: AtomicU8,
    requires_update: AtomicBool,
    cache: Mutex<Option<EncodedImageCache>>,
}

impl SegmentationSession {
    #[must_use]
    pub fn new(manager: Arc<BackendManager>) -> Self {
        Self {
            manager,
            mode: AtomicU8::new(SegmentationMode::Fast.to_u8()),
            requires_update: AtomicBool::new(false),
            cache: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn manager(&self) -> &Arc<BackendManager> {
        &self.manager
    }

    #[must_use]
    pub fn mode(&self) -> SegmentationMode {
        SegmentationMode::from_u8(self.mode.load(Ordering::SeqCst))
    }

    /// Switch modes; the next fast-mode query re-encodes
    pub fn set_mode(&self, mode: SegmentationMode) {
        let previous = self.mode.swap(mode.to_u8(), Ordering::SeqCst);
        if previous != mode.to_u8() {
            debug!("Segmentation mode set to {mode:?}");
            self.requires_update.store(true, Ordering::SeqCst);
        }
    }

    /// The source pixels changed; the next fast-mode query re-encodes
    pub fn notify_image_changed(&self) {
        self.requires_update.store(true, Ordering::SeqCst);
    }

    /// Drop the cached encoding
    pub fn deactivate(&self) {
        *self.lock_cache() = None;
        debug!("Segmentation session deactivated");
    }

    /// Document region of the cached encoding
    #[must_use]
    pub fn cached_bounds(&self) -> Option<Rect> {
        self.lock_cache().as_ref().map(|cache| cache.bounds)
    }

    fn lock_cache(&self) -> MutexGuard<'_, Option<EncodedImageCache>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make sure a valid encoding of `input` is cached
    ///
    /// # Errors
    /// - Pixel source cannot be read or encoding fails; the cache is cleared
    pub fn ensure_encoded(&self, input: &ImageInput) -> Result<EncodeOutcome> {
        if self.mode() == SegmentationMode::Precise {
            return Ok(EncodeOutcome::Skipped);
        }

        let mut cache = self.lock_cache();
        let image_changed = self.requires_update.swap(false, Ordering::SeqCst);
        if !image_changed {
            if let Some(cached) = cache.as_ref() {
                if cached.input == *input && self.manager.is_encoding_current(&cached.encoded) {
                    debug!("Encoding cache hit for {:?}", input.node);
                    return Ok(EncodeOutcome::CacheHit);
                }
            }
        }

        *cache = None;
        let Some(device) = input.source_device()? else {
            debug!("Node {:?} not found, nothing to encode", input.node);
            return Ok(EncodeOutcome::EmptyInput);
        };
        let Some(image) = VisionImage::prepare(&device, None) else {
            debug!("Source for {:?} is empty, nothing to encode", input.node);
            return Ok(EncodeOutcome::EmptyInput);
        };

        let bounds = image.bounds();
        let encoded = self.manager.encode_segmentation_image(&image.view())?;
        info!("🧠 Encoded {}x{} region at ({}, {})", bounds.width, bounds.height, bounds.x, bounds.y);
        *cache = Some(EncodedImageCache {
            input: input.clone(),
            bounds,
            encoded,
        });
        Ok(EncodeOutcome::Encoded { bounds })
    }

    /// Mask for `prompt` (document coordinates) on `input`
    ///
    /// # Errors
    /// - Inference failure
    pub fn predict_mask(&self, input: &ImageInput, prompt: Prompt) -> Result<MaskPrediction> {
        match self.mode() {
            SegmentationMode::Fast => self.predict_fast(input, prompt),
            SegmentationMode::Precise => self.predict_precise(input, prompt),
        }
    }

    fn predict_fast(&self, input: &ImageInput, prompt: Prompt) -> Result<MaskPrediction> {
        let cache = self.lock_cache();
        let Some(cached) = cache.as_ref().filter(|cached| cached.input == *input) else {
            return Ok(MaskPrediction::NotReady);
        };

        let bounds = cached.bounds;
        let local = match prompt {
            Prompt::Point(point) => {
                if !bounds.contains(point) {
                    return Ok(MaskPrediction::OutOfBounds);
                }
                Prompt::Point(point.translated(-bounds.x, -bounds.y))
            },
            Prompt::Rect(rect) => {
                let clipped = rect.intersected(&bounds);
                if clipped.is_empty() {
                    return Ok(MaskPrediction::OutOfBounds);
                }
                Prompt::Rect(clipped.translated(-bounds.x, -bounds.y))
            },
        };

        match self.manager.predict_segmentation_mask(&cached.encoded, local)? {
            Some(mask) => Ok(MaskPrediction::Mask {
                mask,
                origin: bounds.top_left(),
            }),
            None => Ok(MaskPrediction::NotReady),
        }
    }

    fn predict_precise(&self, input: &ImageInput, prompt: Prompt) -> Result<MaskPrediction> {
        let Some(device) = input.source_device()? else {
            return Ok(MaskPrediction::NotReady);
        };
        let source = device.exact_bounds();
        if source.is_empty() {
            return Ok(MaskPrediction::NotReady);
        }

        let region = match prompt {
            Prompt::Rect(rect) => rect.intersected(&source),
            Prompt::Point(point) if source.contains(point) => source,
            Prompt::Point(_) => Rect::default(),
        };
        let Some(image) = VisionImage::prepare(&device, Some(region)) else {
            return Ok(MaskPrediction::OutOfBounds);
        };

        let mask = self.manager.remove_background(&image.view())?;
        Ok(MaskPrediction::Mask {
            mask,
            origin: region.top_left(),
        })
    }
}

impl std::fmt::Debug for SegmentationSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentationSession")
            .field("mode", &self.mode())
            .field("requires_update", &self.requires_update.load(Ordering::SeqCst))
            .field("cached_bounds", &self.cached_bounds())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::mock::{install_placeholder_models, MockBackendFactory};
    use crate::config::MemorySettingsStore;
    use crate::document::{ColorModel, Layer};
    use crate::models::ModelPaths;
    use crate::types::Extent;
    use image::{Rgba, RgbaImage};
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        factory: MockBackendFactory,
        session: SegmentationSession,
        input: ImageInput,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let paths = ModelPaths::new(dir.path());
        install_placeholder_models(&paths, &[]).unwrap();
        let factory = MockBackendFactory::new();
        let manager = BackendManager::new(
            Arc::new(factory.clone()),
            Arc::new(MemorySettingsStore::default()),
            paths,
        )
        .unwrap();

        // Dark square on a light background, placed at (8, 8) in a 64x64 document
        let document = Arc::new(Document::new(Extent::new(64, 64)));
        let pixels = RgbaImage::from_fn(32, 32, |x, y| {
            if (8..16).contains(&x) && (8..16).contains(&y) {
                Rgba([10, 10, 10, 255])
            } else {
                Rgba([240, 240, 240, 255])
            }
        });
        let node = document.add_layer(Layer::paint(
            "paint",
            PaintDevice::from_rgba_image(ColorModel::Bgra8, &pixels, Point::new(8, 8)),
        ));
        let input = ImageInput::new(CanvasId::new(), node, document);

        Fixture {
            _dir: dir,
            factory,
            session: SegmentationSession::new(Arc::new(manager)),
            input,
        }
    }

    #[test]
    fn test_second_encode_is_cache_hit() -> Result<()> {
        let fx = fixture();
        assert_eq!(
            fx.session.ensure_encoded(&fx.input)?,
            EncodeOutcome::Encoded { bounds: Rect::new(8, 8, 32, 32) }
        );
        let encodes = fx.factory.count_calls("encode");

        assert_eq!(fx.session.ensure_encoded(&fx.input.clone())?, EncodeOutcome::CacheHit);
        assert_eq!(fx.factory.count_calls("encode"), encodes);
        Ok(())
    }

    #[test]
    fn test_input_changes_force_reencode() -> Result<()> {
        let fx = fixture();
        fx.session.ensure_encoded(&fx.input)?;

        let all_layers = fx.input.clone().with_sample_layers(SampleLayersMode::AllLayers);
        assert!(matches!(
            fx.session.ensure_encoded(&all_layers)?,
            EncodeOutcome::Encoded { .. }
        ));

        let labeled = all_layers
            .clone()
            .with_sample_layers(SampleLayersMode::ColorLabeledLayers)
            .with_color_labels(vec![1]);
        assert_eq!(fx.session.ensure_encoded(&labeled)?, EncodeOutcome::EmptyInput);
        assert_eq!(fx.session.cached_bounds(), None);
        Ok(())
    }

    #[test]
    fn test_image_changed_notification_forces_reencode() -> Result<()> {
        let fx = fixture();
        fx.session.ensure_encoded(&fx.input)?;
        fx.session.notify_image_changed();
        assert!(matches!(
            fx.session.ensure_encoded(&fx.input)?,
            EncodeOutcome::Encoded { .. }
        ));
        assert_eq!(fx.factory.count_calls("encode"), 2);
        Ok(())
    }

    #[test]
    fn test_predict_without_encode_is_not_ready() -> Result<()> {
        let fx = fixture();
        let prediction = fx
            .session
            .predict_mask(&fx.input, Prompt::Point(Point::new(10, 10)))?;
        assert_eq!(prediction, MaskPrediction::NotReady);
        assert_eq!(fx.factory.count_calls("compute_mask"), 0);
        Ok(())
    }

    #[test]
    fn test_fast_point_prompt_is_translated() -> Result<()> {
        let fx = fixture();
        fx.session.ensure_encoded(&fx.input)?;

        let prediction = fx
            .session
            .predict_mask(&fx.input, Prompt::Point(Point::new(20, 20)))?;
        let MaskPrediction::Mask { mask, origin } = prediction else {
            panic!("expected a mask, got {prediction:?}");
        };
        assert_eq!(origin, Point::new(8, 8));
        assert_eq!(mask.extent(), Extent::new(32, 32));
        // The dark square occupies local 8..16 in both axes
        let selected = mask.data().iter().filter(|v| **v == 255).count();
        assert_eq!(selected, 64);
        assert_eq!(mask.data()[8 * 32 + 8], 255);

        let outside = fx
            .session
            .predict_mask(&fx.input, Prompt::Point(Point::new(2, 2)))?;
        assert_eq!(outside, MaskPrediction::OutOfBounds);
        Ok(())
    }

    #[test]
    fn test_precise_mode_skips_encoding_and_crops_rect() -> Result<()> {
        let fx = fixture();
        fx.session.set_mode(SegmentationMode::Precise);
        assert_eq!(fx.session.ensure_encoded(&fx.input)?, EncodeOutcome::Skipped);

        let prediction = fx
            .session
            .predict_mask(&fx.input, Prompt::Rect(Rect::new(0, 0, 20, 20)))?;
        let MaskPrediction::Mask { mask, origin } = prediction else {
            panic!("expected a mask, got {prediction:?}");
        };
        assert_eq!(origin, Point::new(8, 8));
        assert_eq!(mask.extent(), Extent::new(12, 12));
        assert_eq!(fx.factory.count_calls("encode"), 0);
        assert_eq!(fx.factory.count_calls("remove_background"), 1);
        Ok(())
    }

    #[test]
    fn test_mode_switch_invalidates_cache() -> Result<()> {
        let fx = fixture();
        fx.session.ensure_encoded(&fx.input)?;
        fx.session.set_mode(SegmentationMode::Precise);
        fx.session.set_mode(SegmentationMode::Fast);
        assert!(matches!(
            fx.session.ensure_encoded(&fx.input)?,
            EncodeOutcome::Encoded { .. }
        ));
        Ok(())
    }

    #[test]
    fn test_failed_encode_clears_cache() -> Result<()> {
        let fx = fixture();
        fx.session.ensure_encoded(&fx.input)?;
        fx.session.notify_image_changed();
        fx.factory.set_fail_inference(true);

        assert!(fx.session.ensure_encoded(&fx.input).is_err());
        assert_eq!(fx.session.cached_bounds(), None);
        assert_eq!(
            fx.session.predict_mask(&fx.input, Prompt::Point(Point::new(10, 10)))?,
            MaskPrediction::NotReady
        );
        Ok(())
    }

    #[test]
    fn test_image_input_equality() {
        let fx = fixture();
        let same = fx.input.clone();
        assert_eq!(fx.input, same);

        let other_document = ImageInput {
            document: Arc::new(Document::new(Extent::new(64, 64))),
            ..fx.input.clone()
        };
        assert_ne!(fx.input, other_document);
        assert_ne!(fx.input, fx.input.clone().with_color_labels(vec![2]));
    }
}

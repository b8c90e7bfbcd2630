//! Inference backend abstraction
//!
//! A [`BackendFactory`] hands out one [`InferenceBackend`] per compute target.
//! Backends load one [`VisionModel`] per task. All calls may fail with a
//! human-readable message; none return structured error codes.

use crate::config::BackendKind;
use crate::error::{Result, VisionError};
use crate::models::VisionTask;
use crate::types::{Extent, ImageData, ImageView, Prompt};
use std::any::Any;
use std::path::Path;
use std::sync::Arc;

/// Creates backends and reports which compute targets exist on this machine
pub trait BackendFactory: Send + Sync {
    /// Whether `kind` can be initialized here
    fn is_supported(&self, kind: BackendKind) -> bool;

    /// Acquire a backend handle for `kind`
    ///
    /// # Errors
    /// - The compute target is unavailable or fails to initialize
    fn create(&self, kind: BackendKind) -> Result<Box<dyn InferenceBackend>>;
}

/// A live compute target
pub trait InferenceBackend: Send {
    fn kind(&self) -> BackendKind;

    /// Short description of the device in use, for status displays
    fn device_description(&self) -> String;

    /// Load the model file at `path` for `task`
    ///
    /// # Errors
    /// - The file cannot be read or is not a model for `task`
    fn load_model(&mut self, task: VisionTask, path: &Path) -> Result<Box<dyn VisionModel>>;
}

/// A loaded model bound to the backend that created it
///
/// Each task uses a subset of the operations; the rest report an error.
pub trait VisionModel: Send {
    fn task(&self) -> VisionTask;

    /// Precompute an embedding of the whole image for cheap prompt queries
    ///
    /// # Errors
    /// - Unsupported pixel layout or inference failure
    fn encode(&mut self, image: &ImageView<'_>) -> Result<Box<dyn Any + Send + Sync>> {
        let _ = image;
        Err(unsupported(self.task(), "encode"))
    }

    /// Mask for `prompt` in the coordinate space of the encoded image.
    /// The result is `Alpha8` with the encoded image's extent.
    ///
    /// # Errors
    /// - Embedding produced by another model type or inference failure
    fn compute_mask(&mut self, encoded: &EncodedImage, prompt: Prompt) -> Result<ImageData> {
        let _ = (encoded, prompt);
        Err(unsupported(self.task(), "compute_mask"))
    }

    /// Foreground matte for `image`, `Alpha8` with the image's extent
    ///
    /// # Errors
    /// - Unsupported pixel layout or inference failure
    fn remove_background(&mut self, image: &ImageView<'_>) -> Result<ImageData> {
        let _ = image;
        Err(unsupported(self.task(), "remove_background"))
    }

    /// Fill the pixels where `mask` is set; returns `Rgba8` with the image's extent
    ///
    /// # Errors
    /// - Mismatched extents, unsupported layouts or inference failure
    fn inpaint(&mut self, image: &ImageView<'_>, mask: &ImageView<'_>) -> Result<ImageData> {
        let _ = (image, mask);
        Err(unsupported(self.task(), "inpaint"))
    }
}

fn unsupported(task: VisionTask, operation: &str) -> VisionError {
    VisionError::model(format!("A {task} model does not support {operation}"))
}

/// Backend-side image embedding, stamped with the model that produced it
#[derive(Clone)]
pub struct EncodedImage {
    model_id: u64,
    extent: Extent,
    state: Arc<dyn Any + Send + Sync>,
}

impl EncodedImage {
    #[must_use]
    pub fn new(model_id: u64, extent: Extent, state: Box<dyn Any + Send + Sync>) -> Self {
        Self {
            model_id,
            extent,
            state: Arc::from(state),
        }
    }

    /// Id of the loaded model instance that produced this embedding
    #[must_use]
    pub const fn model_id(&self) -> u64 {
        self.model_id
    }

    /// Extent of the encoded image
    #[must_use]
    pub const fn extent(&self) -> Extent {
        self.extent
    }

    /// Backend-specific embedding
    ///
    /// # Errors
    /// - The embedding is of another type
    pub fn state<T: Any>(&self) -> Result<&T> {
        self.state
            .downcast_ref::<T>()
            .ok_or_else(|| VisionError::inference("Embedding was produced by a different model type"))
    }
}

impl std::fmt::Debug for EncodedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodedImage")
            .field("model_id", &self.model_id)
            .field("extent", &self.extent)
            .finish_non_exhaustive()
    }
}

#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]

//! # VisionML
//!
//! AI-assisted selection, background removal and inpainting for layered
//! raster editors, running ONNX models on the CPU or the GPU.
//!
//! ## Features
//!
//! - **Segment by point or box**: SAM-style models encode the image once,
//!   then answer every click or drag from the cached encoding
//! - **Precise mode**: re-runs the matting model on just the queried region
//! - **Background removal**: BiRefNet-style matting with optional foreground
//!   color estimation
//! - **Inpainting**: MI-GAN-style fill of a brushed mask with surrounding context
//! - **Selection post-processing**: grow, shrink, feather and anti-alias
//! - **Hardware acceleration**: CUDA and `CoreML` execution providers, CPU fallback
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use visionml::{
//!     error_channel, BackendManager, CanvasId, ImageInput, JsonSettingsStore, ModelPaths,
//!     Point, SegmentationSession, SegmentationTool, SelectionOptions, WorkQueue,
//! };
//! # use visionml::{Document, Extent, Layer, PaintDevice, ColorModel};
//!
//! # fn example() -> anyhow::Result<()> {
//! # let factory = Arc::new(visionml::MockBackendFactory::new());
//! let manager = Arc::new(BackendManager::new(
//!     factory,
//!     Arc::new(JsonSettingsStore::default_location()?),
//!     ModelPaths::default_location()?,
//! )?);
//! let (reporter, mut errors) = error_channel(64);
//! let queue = WorkQueue::spawn(reporter)?;
//!
//! # let document = Arc::new(Document::new(Extent::new(512, 512)));
//! # let node = document.add_layer(Layer::paint("Background",
//! #     PaintDevice::new(ColorModel::Bgra8, document.bounds())));
//! let session = Arc::new(SegmentationSession::new(Arc::clone(&manager)));
//! let tool = SegmentationTool::from_point(session, queue.handle());
//! let input = ImageInput::new(CanvasId::new(), node, Arc::clone(&document));
//!
//! tool.process_image(&input)?;
//! tool.click(&input, Point::new(200, 180), SelectionOptions::default())?;
//!
//! queue.wait_for_done()?;
//! for failure in errors.drain() {
//!     eprintln!("{failure}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Threading
//!
//! Tool methods return immediately. Inference runs on the single worker
//! thread of a [`WorkQueue`], in submission order, and failures come back
//! through the [`ErrorReceiver`].
//!
//! ### Feature Flags
//!
//! - `onnx` (default): ONNX Runtime backend with GPU acceleration support
//! - `cli` (default): the `visionml` binary
//! - `webp-support` (default): WebP image files in the CLI
//! - `tracing-json`: JSON log output for the CLI

pub mod backends;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod document;
pub mod error;
pub mod inference;
pub mod manager;
pub mod models;
pub mod pipeline;
pub mod queue;
pub mod reporter;
pub mod selection;
pub mod services;
pub mod session;
pub mod tools;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod types;
pub mod utils;

pub use backends::*;
pub use config::{
    BackendKind, InpaintConfig, JsonSettingsStore, MemorySettingsStore, Settings, SettingsStore,
    VisionConfig, VisionConfigBuilder,
};
pub use document::{CanvasId, ColorModel, Document, DocumentId, Layer, LayerKind, NodeId, PaintDevice};
pub use error::{Result, VisionError};
pub use inference::{BackendFactory, EncodedImage, InferenceBackend, VisionModel};
pub use manager::{BackendEvent, BackendManager};
pub use models::{ModelPaths, VisionTask};
pub use pipeline::MaskApplicationPipeline;
pub use queue::{Task, WorkQueue, WorkQueueHandle};
pub use reporter::{error_channel, ErrorReceiver, ErrorReporter, ProcessingError};
pub use selection::{PixelSelection, SelectionAction, SelectionOptions};
pub use services::{
    ConsoleProgressReporter, ImageIOService, NoOpProgressReporter, ProcessingStage,
    ProcessingTimings, ProgressReporter, ProgressTracker, ProgressUpdate,
};
pub use session::{
    EncodeOutcome, ImageInput, MaskPrediction, SampleLayersMode, SegmentationMode,
    SegmentationSession,
};
pub use tools::{
    BackgroundRemovalConfig, BackgroundRemovalFilter, BackgroundRemovalTask, FilterOutcome,
    InpaintTask, InpaintTool, SegmentationShape, SegmentationTool,
};
pub use types::{Extent, ImageData, ImageView, PixelLayout, Point, Prompt, Rect};
pub use utils::{convert_back, ImagePreprocessor, VisionImage};

#[cfg(feature = "cli")]
pub use tracing_config::{init_cli_tracing, TracingConfig, TracingFormat};

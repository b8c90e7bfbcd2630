//! User-facing tools
//!
//! Each tool packages its inputs into a [`crate::queue::Task`] and submits it
//! to the work queue; nothing here blocks on inference.

pub mod background;
pub mod inpaint;
pub mod segment;

pub use background::{BackgroundRemovalConfig, BackgroundRemovalFilter, BackgroundRemovalTask, FilterOutcome};
pub use inpaint::{pad_bounds, InpaintTask, InpaintTool, PAINT_LAYER_REQUIRED};
pub use segment::{EncodeTask, SegmentationShape, SegmentationTool, SelectSegmentTask};

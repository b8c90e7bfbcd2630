//! Pixel-level helpers used by the tools and backends

pub mod foreground;
pub mod image_view;
pub mod preprocessing;
pub mod selection_filters;

pub use image_view::{convert_back, VisionImage};
pub use preprocessing::{ImagePreprocessor, NormalizationConfig, IMAGENET};

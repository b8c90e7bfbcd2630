//! ONNX Runtime backend
//!
//! Runs three model families:
//! - SAM-style segmentation, split into an image encoder (`<name>.onnx`) and a
//!   prompt decoder (`<name>.decoder.onnx`) next to it
//! - BiRefNet-style matting for background removal
//! - MI-GAN-style inpainting
//!
//! The GPU backend uses CUDA when present, otherwise CoreML.

use crate::config::BackendKind;
use crate::error::{Result, VisionError};
use crate::inference::{BackendFactory, EncodedImage, InferenceBackend, VisionModel};
use crate::models::{decoder_path, VisionTask};
use crate::types::{Extent, ImageData, ImageView, PixelLayout, Prompt};
use crate::utils::preprocessing::{ImagePreprocessor, IMAGENET};
use image::imageops::FilterType;
use image::{GrayImage, Luma, RgbImage, RgbaImage};
use ndarray::{arr2, arr3, Array1, Array2, Array3, Array4, ArrayD, Axis, Ix4};
use ort::execution_providers::{
    CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProvider as OrtExecutionProvider,
};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::any::Any;
use std::path::Path;
use std::time::Instant;

/// Side length of the SAM encoder input
const SAM_INPUT_SIZE: u32 = 1024;
/// Side length of the SAM low-resolution mask input
const SAM_MASK_INPUT_SIZE: usize = 256;
/// Side length of the BiRefNet input
const BIREFNET_INPUT_SIZE: u32 = 1024;
/// Side length of the MI-GAN input
const MIGAN_INPUT_SIZE: u32 = 512;

/// Extract a named output (or the first one) as an owned `f32` array
macro_rules! extract_output {
    ($outputs:expr, $preferred:expr) => {{
        let key = $outputs
            .keys()
            .find(|k| *k == $preferred)
            .or_else(|| $outputs.keys().next())
            .map(|k| k.to_string())
            .ok_or_else(|| VisionError::inference("Model produced no outputs"))?;
        $outputs
            .get(key.as_str())
            .ok_or_else(|| VisionError::inference(format!("Output '{key}' not found")))?
            .try_extract_array::<f32>()
            .map_err(|e| VisionError::inference(format!("Failed to extract output '{key}': {e}")))?
            .to_owned()
    }};
}

fn cuda_available() -> bool {
    OrtExecutionProvider::is_available(&CUDAExecutionProvider::default()).unwrap_or(false)
}

fn coreml_available() -> bool {
    OrtExecutionProvider::is_available(&CoreMLExecutionProvider::default()).unwrap_or(false)
}

fn to_tensor<D: ndarray::Dimension + 'static>(array: ndarray::Array<f32, D>) -> Result<Tensor<f32>> {
    Tensor::from_array(array)
        .map_err(|e| VisionError::processing(format!("Failed to convert input tensor: {e}")))
}

fn to_4d(array: ArrayD<f32>, what: &str) -> Result<Array4<f32>> {
    let ndim = array.ndim();
    array
        .into_dimensionality::<Ix4>()
        .map_err(|_| VisionError::inference(format!("Expected 4D {what} tensor, got {ndim}D")))
}

/// Creates [`OnnxBackend`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct OnnxBackendFactory;

impl OnnxBackendFactory {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// All ONNX Runtime execution providers with availability and a description
    #[must_use]
    pub fn list_providers() -> Vec<(String, bool, String)> {
        log::debug!("🔍 System Hardware Analysis:");
        log::debug!("  - Platform: {os}", os = std::env::consts::OS);
        log::debug!("  - Architecture: {arch}", arch = std::env::consts::ARCH);

        vec![
            (
                "CPU".to_string(),
                true,
                "Always available, uses CPU for inference".to_string(),
            ),
            (
                "CUDA".to_string(),
                cuda_available(),
                "NVIDIA GPU acceleration (requires CUDA toolkit and compatible GPU)".to_string(),
            ),
            (
                "CoreML".to_string(),
                coreml_available(),
                "Apple Silicon GPU acceleration (macOS only)".to_string(),
            ),
        ]
    }
}

impl BackendFactory for OnnxBackendFactory {
    fn is_supported(&self, kind: BackendKind) -> bool {
        match kind {
            BackendKind::Cpu => true,
            BackendKind::Gpu => cuda_available() || coreml_available(),
        }
    }

    fn create(&self, kind: BackendKind) -> Result<Box<dyn InferenceBackend>> {
        if !self.is_supported(kind) {
            return Err(VisionError::backend(
                "GPU backend not available: neither CUDA nor CoreML execution provider was found",
            ));
        }
        Ok(Box::new(OnnxBackend::new(kind)))
    }
}

/// ONNX Runtime compute target
#[derive(Debug)]
pub struct OnnxBackend {
    kind: BackendKind,
    intra_threads: usize,
}

impl OnnxBackend {
    #[must_use]
    pub fn new(kind: BackendKind) -> Self {
        let intra_threads = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(4);
        Self { kind, intra_threads }
    }

    fn create_session(&self, path: &Path) -> Result<Session> {
        let start = Instant::now();
        let mut builder = Session::builder()
            .map_err(|e| VisionError::backend(format!("Failed to create session builder: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| VisionError::backend(format!("Failed to set optimization level: {e}")))?
            .with_intra_threads(self.intra_threads)
            .map_err(|e| VisionError::backend(format!("Failed to set intra threads: {e}")))?;

        if self.kind == BackendKind::Gpu {
            let mut providers = Vec::new();
            if cuda_available() {
                log::info!("🚀 Using CUDA execution provider");
                providers.push(CUDAExecutionProvider::default().build());
            }
            if coreml_available() {
                log::info!("🍎 Using CoreML execution provider");
                providers.push(CoreMLExecutionProvider::default().with_subgraphs(true).build());
            }
            builder = builder
                .with_execution_providers(providers)
                .map_err(|e| VisionError::backend(format!("Failed to set execution providers: {e}")))?;
        }

        let session = builder.commit_from_file(path).map_err(|e| {
            VisionError::model_error_with_context(
                "load",
                path,
                &e.to_string(),
                &["Check that the file is a valid ONNX model"],
            )
        })?;
        log::debug!(
            "Created session for {} in {:.0}ms",
            path.display(),
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(session)
    }
}

impl InferenceBackend for OnnxBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn device_description(&self) -> String {
        match self.kind {
            BackendKind::Cpu => format!("CPU ({} threads)", self.intra_threads),
            BackendKind::Gpu if cuda_available() => "GPU (CUDA)".to_string(),
            BackendKind::Gpu => "GPU (CoreML)".to_string(),
        }
    }

    fn load_model(&mut self, task: VisionTask, path: &Path) -> Result<Box<dyn VisionModel>> {
        match task {
            VisionTask::Segmentation => {
                let decoder = decoder_path(path);
                if !decoder.exists() {
                    return Err(VisionError::model_error_with_context(
                        "load",
                        &decoder,
                        "decoder file not found",
                        &["Place the decoder next to the encoder as <name>.decoder.onnx"],
                    ));
                }
                Ok(Box::new(SamModel {
                    encoder: self.create_session(path)?,
                    decoder: self.create_session(&decoder)?,
                }))
            },
            VisionTask::BackgroundRemoval => Ok(Box::new(BiRefNetModel {
                session: self.create_session(path)?,
            })),
            VisionTask::Inpainting => Ok(Box::new(MiganModel {
                session: self.create_session(path)?,
            })),
        }
    }
}

/// Image embedding produced by the SAM encoder
#[derive(Debug, Clone)]
struct SamEmbedding {
    embedding: Array4<f32>,
    /// Factor from image pixels to encoder input pixels
    scale: f32,
    extent: Extent,
}

/// Two-part segmentation model
pub struct SamModel {
    encoder: Session,
    decoder: Session,
}

impl SamModel {
    /// Two prompt points in encoder input coordinates with their labels.
    /// A click is paired with a padding point labelled -1; a box uses its
    /// corners labelled 2 and 3.
    fn prompt_tensors(prompt: Prompt, scale: f32) -> (Array3<f32>, Array2<f32>) {
        match prompt {
            Prompt::Point(point) => (
                arr3(&[[
                    [(point.x as f32 + 0.5) * scale, (point.y as f32 + 0.5) * scale],
                    [0.0, 0.0],
                ]]),
                arr2(&[[1.0, -1.0]]),
            ),
            Prompt::Rect(rect) => (
                arr3(&[[
                    [rect.left() as f32 * scale, rect.top() as f32 * scale],
                    [rect.right() as f32 * scale, rect.bottom() as f32 * scale],
                ]]),
                arr2(&[[2.0, 3.0]]),
            ),
        }
    }
}

impl VisionModel for SamModel {
    fn task(&self) -> VisionTask {
        VisionTask::Segmentation
    }

    fn encode(&mut self, image: &ImageView<'_>) -> Result<Box<dyn Any + Send + Sync>> {
        let extent = image.extent();
        let rgb = ImagePreprocessor::view_to_rgb(image);
        let scale = ImagePreprocessor::longest_side_scale(extent.width, extent.height, SAM_INPUT_SIZE);
        let resized = ImagePreprocessor::resize_longest_side(&rgb, SAM_INPUT_SIZE);
        let input = ImagePreprocessor::to_padded_tensor(&resized, SAM_INPUT_SIZE, &IMAGENET)?;

        let start = Instant::now();
        let input_value = to_tensor(input)?;
        let outputs = self
            .encoder
            .run(ort::inputs![input_value])
            .map_err(|e| VisionError::inference(format!("Image encoder failed: {e}")))?;
        let embedding = to_4d(extract_output!(outputs, "image_embeddings"), "embedding")?;
        log::debug!(
            "⚡ Encoded {}x{} image in {:.2}ms",
            extent.width,
            extent.height,
            start.elapsed().as_secs_f64() * 1000.0
        );

        Ok(Box::new(SamEmbedding {
            embedding,
            scale,
            extent,
        }))
    }

    fn compute_mask(&mut self, encoded: &EncodedImage, prompt: Prompt) -> Result<ImageData> {
        let state = encoded.state::<SamEmbedding>()?;
        let extent = state.extent;
        let (coords, labels) = Self::prompt_tensors(prompt, state.scale);

        let outputs = self
            .decoder
            .run(ort::inputs![
                "image_embeddings" => to_tensor(state.embedding.clone())?,
                "point_coords" => to_tensor(coords)?,
                "point_labels" => to_tensor(labels)?,
                "mask_input" => to_tensor(Array4::<f32>::zeros((1, 1, SAM_MASK_INPUT_SIZE, SAM_MASK_INPUT_SIZE)))?,
                "has_mask_input" => to_tensor(Array1::from_vec(vec![0.0f32]))?,
                "orig_im_size" => to_tensor(Array1::from_vec(vec![extent.height as f32, extent.width as f32]))?,
            ])
            .map_err(|e| VisionError::inference(format!("Mask decoder failed: {e}")))?;

        let masks = to_4d(extract_output!(outputs, "masks"), "mask")?;
        let plane = masks.index_axis(Axis(0), 0).index_axis_move(Axis(0), 0);
        let soft = ImagePreprocessor::mask_from_plane(plane, extent.width, extent.height, true);
        let binary = GrayImage::from_fn(extent.width, extent.height, |x, y| {
            Luma([if soft.get_pixel(x, y).0[0] > 127 { 255 } else { 0 }])
        });
        Ok(ImageData::from_gray(binary))
    }
}

/// Matting model used for background removal
pub struct BiRefNetModel {
    session: Session,
}

impl VisionModel for BiRefNetModel {
    fn task(&self) -> VisionTask {
        VisionTask::BackgroundRemoval
    }

    fn remove_background(&mut self, image: &ImageView<'_>) -> Result<ImageData> {
        let extent = image.extent();
        let rgb = ImagePreprocessor::view_to_rgb(image);
        let input = ImagePreprocessor::to_stretched_tensor(&rgb, BIREFNET_INPUT_SIZE, &IMAGENET);

        let start = Instant::now();
        let input_value = to_tensor(input)?;
        let outputs = self
            .session
            .run(ort::inputs![input_value])
            .map_err(|e| VisionError::inference(format!("ONNX inference failed: {e}")))?;
        // Some exports emit several refinement stages; the last one is the final matte
        let key = outputs
            .keys()
            .last()
            .map(|k| k.to_string())
            .ok_or_else(|| VisionError::inference("Model produced no outputs"))?;
        let matte = to_4d(extract_output!(outputs, key.as_str()), "matte")?;
        log::debug!("⚡ Matting inference: {:.2}ms", start.elapsed().as_secs_f64() * 1000.0);

        let plane = matte.index_axis(Axis(0), 0).index_axis_move(Axis(0), 0);
        let mask = ImagePreprocessor::mask_from_plane(plane, extent.width, extent.height, true);
        Ok(ImageData::from_gray(mask))
    }
}

/// Inpainting model
pub struct MiganModel {
    session: Session,
}

impl MiganModel {
    /// 4-channel input: `known - 0.5`, then the RGB image in [-1, 1] with holes zeroed
    #[allow(clippy::indexing_slicing)]
    // Safe: both images are resized to the tensor size first
    fn input_tensor(image: &RgbImage, mask: &GrayImage) -> Array4<f32> {
        let size = MIGAN_INPUT_SIZE as usize;
        let mut tensor = Array4::<f32>::zeros((1, 4, size, size));
        for (x, y, pixel) in image.enumerate_pixels() {
            let known = if mask.get_pixel(x, y).0[0] > 127 { 0.0 } else { 1.0 };
            let (xi, yi) = (x as usize, y as usize);
            tensor[[0, 0, yi, xi]] = known - 0.5;
            for c in 0..3 {
                let value = f32::from(pixel[c]) / 127.5 - 1.0;
                tensor[[0, c + 1, yi, xi]] = value * known;
            }
        }
        tensor
    }
}

impl VisionModel for MiganModel {
    fn task(&self) -> VisionTask {
        VisionTask::Inpainting
    }

    fn inpaint(&mut self, image: &ImageView<'_>, mask: &ImageView<'_>) -> Result<ImageData> {
        if mask.layout() != PixelLayout::Alpha8 {
            return Err(VisionError::unsupported_format("Inpaint mask must be Alpha8"));
        }
        let extent = image.extent();
        if mask.extent() != extent {
            return Err(VisionError::processing(format!(
                "Mask extent {:?} does not match image extent {:?}",
                mask.extent(),
                extent
            )));
        }

        let original = ImagePreprocessor::view_to_rgba(image);
        let rgb = ImagePreprocessor::view_to_rgb(image);
        let hole = GrayImage::from_fn(extent.width, extent.height, |x, y| Luma([mask.row(y)[x as usize]]));

        let size = MIGAN_INPUT_SIZE;
        let small_image = image::imageops::resize(&rgb, size, size, FilterType::Triangle);
        let small_mask = image::imageops::resize(&hole, size, size, FilterType::Nearest);
        let input = Self::input_tensor(&small_image, &small_mask);

        let start = Instant::now();
        let input_value = to_tensor(input)?;
        let outputs = self
            .session
            .run(ort::inputs![input_value])
            .map_err(|e| VisionError::inference(format!("ONNX inference failed: {e}")))?;
        let output = to_4d(extract_output!(outputs, "output"), "image")?;
        log::debug!("⚡ Inpainting inference: {:.2}ms", start.elapsed().as_secs_f64() * 1000.0);

        let (_, channels, h, w) = output.dim();
        if channels < 3 {
            return Err(VisionError::inference(format!(
                "Expected 3 output channels, got {channels}"
            )));
        }
        let predicted = RgbaImage::from_fn(w as u32, h as u32, |x, y| {
            let mut px = [0u8, 0, 0, 255];
            for (c, value) in px.iter_mut().take(3).enumerate() {
                let v = output[[0, c, y as usize, x as usize]];
                *value = ((v + 1.0) * 127.5).round().clamp(0.0, 255.0) as u8;
            }
            image::Rgba(px)
        });
        let predicted = image::imageops::resize(&predicted, extent.width, extent.height, FilterType::Triangle);

        // Only holes take predicted pixels
        let result = RgbaImage::from_fn(extent.width, extent.height, |x, y| {
            if hole.get_pixel(x, y).0[0] > 127 {
                *predicted.get_pixel(x, y)
            } else {
                *original.get_pixel(x, y)
            }
        });
        Ok(ImageData::from_rgba(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Point, Rect};

    #[test]
    fn test_point_prompt_uses_padding_point() {
        let (coords, labels) = SamModel::prompt_tensors(Prompt::Point(Point::new(10, 20)), 2.0);
        assert_eq!(coords[[0, 0, 0]], 21.0);
        assert_eq!(coords[[0, 0, 1]], 41.0);
        assert_eq!(labels.as_slice().unwrap(), &[1.0, -1.0]);
    }

    #[test]
    fn test_box_prompt_labels_corners() {
        let (coords, labels) = SamModel::prompt_tensors(Prompt::Rect(Rect::new(4, 8, 10, 20)), 0.5);
        assert_eq!(coords.as_slice().unwrap(), &[2.0, 4.0, 7.0, 14.0]);
        assert_eq!(labels.as_slice().unwrap(), &[2.0, 3.0]);
    }

    #[test]
    fn test_migan_input_zeroes_holes() {
        let size = MIGAN_INPUT_SIZE;
        let image = RgbImage::from_pixel(size, size, image::Rgb([255, 0, 255]));
        let mut mask = GrayImage::new(size, size);
        mask.put_pixel(3, 2, Luma([255]));

        let tensor = MiganModel::input_tensor(&image, &mask);
        assert_eq!(tensor[[0, 0, 2, 3]], -0.5);
        assert_eq!(tensor[[0, 1, 2, 3]], 0.0);
        assert_eq!(tensor[[0, 0, 0, 0]], 0.5);
        assert_eq!(tensor[[0, 1, 0, 0]], 1.0);
        assert_eq!(tensor[[0, 2, 0, 0]], -1.0);
    }

    #[test]
    fn test_cpu_is_always_supported() {
        let factory = OnnxBackendFactory::new();
        assert!(factory.is_supported(BackendKind::Cpu));
        let providers = OnnxBackendFactory::list_providers();
        assert_eq!(providers[0].0, "CPU");
        assert!(providers[0].1);
    }
}

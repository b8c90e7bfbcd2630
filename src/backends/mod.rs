//! Backend implementations for the inference contract
//!
//! - ONNX Runtime backend (CPU, CUDA and `CoreML` execution providers)
//! - Mock backend (deterministic, no model files needed)

#[cfg(feature = "onnx")]
pub mod onnx;

pub mod mock;

#[cfg(feature = "onnx")]
pub use self::onnx::{OnnxBackend, OnnxBackendFactory};

pub use self::mock::{CallLog, MockBackendFactory};

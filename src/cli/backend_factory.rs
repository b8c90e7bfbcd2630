//! Backend factory selection for the CLI

use crate::inference::BackendFactory;
use std::sync::Arc;

/// Picks the inference backend the binary was built with
pub(crate) struct CliBackendFactory;

impl CliBackendFactory {
    /// ONNX Runtime when the `onnx` feature is enabled, otherwise the mock backend
    #[cfg(feature = "onnx")]
    pub(crate) fn create() -> Arc<dyn BackendFactory> {
        Arc::new(crate::backends::OnnxBackendFactory::new())
    }

    #[cfg(not(feature = "onnx"))]
    pub(crate) fn create() -> Arc<dyn BackendFactory> {
        log::warn!("⚠️ Built without the onnx feature, using the mock backend");
        Arc::new(crate::backends::MockBackendFactory::new())
    }

    /// Provider diagnostics: name, availability, description
    pub(crate) fn providers() -> Vec<(String, bool, String)> {
        #[cfg(feature = "onnx")]
        {
            crate::backends::OnnxBackendFactory::list_providers()
        }
        #[cfg(not(feature = "onnx"))]
        {
            vec![(
                "Mock".to_string(),
                true,
                "Deterministic test backend, no model files are executed".to_string(),
            )]
        }
    }
}

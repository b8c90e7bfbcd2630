//! Error types for vision tool operations

use crate::models::VisionTask;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for vision tool operations
pub type Result<T> = std::result::Result<T, VisionError>;

/// Error types shared by the backend manager, the tools and the inference backends
#[derive(Error, Debug)]
pub enum VisionError {
    /// Input/output errors (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decoding or encoding errors
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// Backend could not be acquired or is not supported on this machine
    #[error("Backend error: {0}")]
    Backend(String),

    /// Inference failed inside the backend
    #[error("Inference error: {0}")]
    Inference(String),

    /// Model file was expected but is not there
    #[error("Model file not found for {task}: {}", path.display())]
    ModelNotFound { task: VisionTask, path: PathBuf },

    /// Model loading or initialization errors
    #[error("Model error: {0}")]
    Model(String),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Pixel layout or file format the operation cannot handle
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Pixel buffer or geometry errors
    #[error("Processing error: {0}")]
    Processing(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl VisionError {
    /// Create a new backend error
    pub fn backend<S: Into<String>>(msg: S) -> Self {
        Self::Backend(msg.into())
    }

    /// Create a new inference error
    pub fn inference<S: Into<String>>(msg: S) -> Self {
        Self::Inference(msg.into())
    }

    /// Create a new model error
    pub fn model<S: Into<String>>(msg: S) -> Self {
        Self::Model(msg.into())
    }

    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a new unsupported format error
    pub fn unsupported_format<S: Into<String>>(format: S) -> Self {
        Self::UnsupportedFormat(format.into())
    }

    /// Create a new processing error
    pub fn processing<S: Into<String>>(msg: S) -> Self {
        Self::Processing(msg.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Create file I/O error with operation context
    pub fn file_io_error<P: AsRef<std::path::Path>>(
        operation: &str,
        path: P,
        error: &std::io::Error,
    ) -> Self {
        let path_display = path.as_ref().display();
        Self::Io(std::io::Error::new(
            error.kind(),
            format!("Failed to {} '{}': {}", operation, path_display, error),
        ))
    }

    /// Create model error with troubleshooting context
    pub fn model_error_with_context<P: AsRef<std::path::Path>>(
        operation: &str,
        model_path: P,
        error: &str,
        suggestions: &[&str],
    ) -> Self {
        let path_display = model_path.as_ref().display();
        let suggestion_text = if suggestions.is_empty() {
            String::new()
        } else {
            format!(" Suggestions: {}", suggestions.join(", "))
        };

        Self::Model(format!(
            "Failed to {} model '{}': {}.{}",
            operation, path_display, error, suggestion_text
        ))
    }

    /// Create configuration error with valid ranges
    pub fn config_value_error<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
        recommended: Option<T>,
    ) -> Self {
        let recommendation = match recommended {
            Some(rec) => format!(" Recommended: {}", rec),
            None => String::new(),
        };

        Self::InvalidConfig(format!(
            "Invalid {}: {} (valid range: {}).{}",
            parameter, value, valid_range, recommendation
        ))
    }

    /// Human-readable message without the variant prefix, as shown in warning dialogs
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Backend(msg)
            | Self::Inference(msg)
            | Self::Model(msg)
            | Self::InvalidConfig(msg)
            | Self::UnsupportedFormat(msg)
            | Self::Processing(msg)
            | Self::Internal(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}

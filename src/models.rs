//! Vision tasks and the on-disk model layout
//!
//! Models live under `<data-dir>/models/<task-subdir>/<file>`, one fixed
//! subdirectory per task. The data directory defaults to the platform data
//! directory and can be overridden with `VISIONML_DATA_DIR`.

use crate::error::{Result, VisionError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Environment variable overriding the application data directory
pub const DATA_DIR_ENV: &str = "VISIONML_DATA_DIR";

/// File extension of loadable model files
pub const MODEL_EXTENSION: &str = "onnx";

/// Suffix of the decoder half of a two-part segmentation model
pub const DECODER_SUFFIX: &str = ".decoder.onnx";

/// Inference task a model is loaded for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisionTask {
    Segmentation,
    Inpainting,
    BackgroundRemoval,
}

impl VisionTask {
    pub const ALL: [VisionTask; 3] = [
        VisionTask::Segmentation,
        VisionTask::Inpainting,
        VisionTask::BackgroundRemoval,
    ];

    /// Stable numeric index used in persisted setting keys (`model_<index>`)
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Segmentation => 0,
            Self::Inpainting => 1,
            Self::BackgroundRemoval => 2,
        }
    }

    /// Fixed subdirectory below the models root
    #[must_use]
    pub const fn subdir(self) -> &'static str {
        match self {
            Self::Segmentation => "sam",
            Self::Inpainting => "migan",
            Self::BackgroundRemoval => "birefnet",
        }
    }

    #[must_use]
    pub const fn default_model(self) -> &'static str {
        match self {
            Self::Segmentation => "MobileSAM.onnx",
            Self::Inpainting => "MIGAN_512_places2.onnx",
            Self::BackgroundRemoval => "BiRefNet_lite.onnx",
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Segmentation => "segmentation",
            Self::Inpainting => "inpainting",
            Self::BackgroundRemoval => "background removal",
        }
    }
}

impl fmt::Display for VisionTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Resolves model files for each task below a models root directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPaths {
    root: PathBuf,
}

impl ModelPaths {
    /// Use `root` directly as the models directory
    #[must_use]
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    /// Models directory inside an application data directory
    #[must_use]
    pub fn from_data_dir<P: AsRef<Path>>(data_dir: P) -> Self {
        Self::new(data_dir.as_ref().join("models"))
    }

    /// Platform default, honoring `VISIONML_DATA_DIR`
    ///
    /// # Errors
    /// - No data directory could be determined for this platform
    pub fn default_location() -> Result<Self> {
        Ok(Self::from_data_dir(default_data_dir()?))
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn task_dir(&self, task: VisionTask) -> PathBuf {
        self.root.join(task.subdir())
    }

    /// Path for `file` without checking that it exists
    #[must_use]
    pub fn model_path(&self, task: VisionTask, file: &str) -> PathBuf {
        self.task_dir(task).join(file)
    }

    /// Path for `file`, failing when the file is missing
    ///
    /// # Errors
    /// - `ModelNotFound` when the file does not exist
    pub fn resolve(&self, task: VisionTask, file: &str) -> Result<PathBuf> {
        let path = self.model_path(task, file);
        if path.is_file() {
            Ok(path)
        } else {
            Err(VisionError::ModelNotFound { task, path })
        }
    }

    /// Model files available for `task`, sorted by name
    ///
    /// Decoder halves of two-part models are not listed on their own.
    #[must_use]
    pub fn available_models(&self, task: VisionTask) -> Vec<String> {
        let dir = self.task_dir(task);
        let mut models: Vec<String> = WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| entry.file_name().to_str().map(str::to_owned))
            .filter(|name| is_model_file(name))
            .collect();
        models.sort();
        tracing::debug!(task = %task, dir = %dir.display(), count = models.len(), "Listed models");
        models
    }
}

/// Sibling decoder file of a two-part segmentation model
#[must_use]
pub fn decoder_path(encoder: &Path) -> PathBuf {
    let stem = encoder
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    encoder.with_file_name(format!("{stem}{DECODER_SUFFIX}"))
}

/// Application data directory, honoring `VISIONML_DATA_DIR`
///
/// # Errors
/// - No data directory could be determined for this platform
pub fn default_data_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        if !dir.is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    dirs::data_dir()
        .map(|dir| dir.join("visionml"))
        .ok_or_else(|| VisionError::invalid_config("Could not determine the data directory"))
}

/// Validates a configured model file name
///
/// # Errors
/// - Empty names, path separators or a wrong extension
pub fn validate_model_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(VisionError::invalid_config("Model name cannot be empty"));
    }
    if name.contains('/') || name.contains('\\') || name == "." || name == ".." {
        return Err(VisionError::invalid_config(format!(
            "Model name '{name}' must be a plain file name"
        )));
    }
    if !is_model_file(name) {
        return Err(VisionError::invalid_config(format!(
            "Model name '{name}' must be a .{MODEL_EXTENSION} file and not a decoder"
        )));
    }
    Ok(())
}

fn is_model_file(name: &str) -> bool {
    let has_extension = Path::new(name)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case(MODEL_EXTENSION));
    has_extension && !name.ends_with(DECODER_SUFFIX)
}

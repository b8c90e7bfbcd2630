//! Configuration types for the vision tools
//!
//! Two layers live here: [`Settings`], the small key/value group that is
//! persisted every time the backend or a model is switched, and
//! [`VisionConfig`], the static configuration a host hands to the tools.

use crate::error::{Result, VisionError};
use crate::models::{validate_model_name, VisionTask};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Environment variable overriding the settings directory
pub const CONFIG_DIR_ENV: &str = "VISIONML_CONFIG_DIR";

/// Compute target for inference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// CPU execution (always available)
    #[default]
    Cpu,
    /// GPU acceleration (CUDA or `CoreML`)
    Gpu,
}

impl BackendKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Gpu => "gpu",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BackendKind {
    type Err = VisionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "gpu" => Ok(Self::Gpu),
            other => Err(VisionError::invalid_config(format!(
                "Unknown backend '{other}', expected 'cpu' or 'gpu'"
            ))),
        }
    }
}

/// Persisted backend and per-task model selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default = "default_segmentation_model")]
    pub model_0: String,
    #[serde(default = "default_inpainting_model")]
    pub model_1: String,
    #[serde(default = "default_background_model")]
    pub model_2: String,
}

fn default_segmentation_model() -> String {
    VisionTask::Segmentation.default_model().to_string()
}

fn default_inpainting_model() -> String {
    VisionTask::Inpainting.default_model().to_string()
}

fn default_background_model() -> String {
    VisionTask::BackgroundRemoval.default_model().to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            model_0: default_segmentation_model(),
            model_1: default_inpainting_model(),
            model_2: default_background_model(),
        }
    }
}

impl Settings {
    #[must_use]
    pub fn model_name(&self, task: VisionTask) -> &str {
        match task {
            VisionTask::Segmentation => &self.model_0,
            VisionTask::Inpainting => &self.model_1,
            VisionTask::BackgroundRemoval => &self.model_2,
        }
    }

    pub fn set_model_name(&mut self, task: VisionTask, name: impl Into<String>) {
        let slot = match task {
            VisionTask::Segmentation => &mut self.model_0,
            VisionTask::Inpainting => &mut self.model_1,
            VisionTask::BackgroundRemoval => &mut self.model_2,
        };
        *slot = name.into();
    }
}

/// Storage for [`Settings`], owned by the host's configuration subsystem
pub trait SettingsStore: Send + Sync {
    /// Read the stored settings, falling back to defaults for missing keys
    ///
    /// # Errors
    /// - Storage exists but cannot be read or parsed
    fn load(&self) -> Result<Settings>;

    /// Persist `settings`
    ///
    /// # Errors
    /// - Storage cannot be written
    fn save(&self, settings: &Settings) -> Result<()>;
}

/// Settings stored as `settings.json` in a directory
#[derive(Debug, Clone)]
pub struct JsonSettingsStore {
    path: PathBuf,
}

impl JsonSettingsStore {
    #[must_use]
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    /// Platform config location, honoring `VISIONML_CONFIG_DIR`
    ///
    /// # Errors
    /// - No configuration directory could be determined for this platform
    pub fn default_location() -> Result<Self> {
        let dir = match std::env::var(CONFIG_DIR_ENV) {
            Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => dirs::config_dir()
                .map(|dir| dir.join("visionml"))
                .ok_or_else(|| {
                    VisionError::invalid_config("Could not determine the configuration directory")
                })?,
        };
        Ok(Self::new(dir.join("settings.json")))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for JsonSettingsStore {
    fn load(&self) -> Result<Settings> {
        if !self.path.exists() {
            tracing::debug!(path = %self.path.display(), "No settings file, using defaults");
            return Ok(Settings::default());
        }
        let contents = std::fs::read_to_string(&self.path)
            .map_err(|e| VisionError::file_io_error("read settings", &self.path, &e))?;
        serde_json::from_str(&contents).map_err(|e| {
            VisionError::invalid_config(format!(
                "Failed to parse settings '{}': {e}",
                self.path.display()
            ))
        })
    }

    fn save(&self, settings: &Settings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| VisionError::file_io_error("create settings directory", parent, &e))?;
        }
        let contents = serde_json::to_string_pretty(settings)
            .map_err(|e| VisionError::internal(format!("Failed to serialize settings: {e}")))?;
        std::fs::write(&self.path, contents)
            .map_err(|e| VisionError::file_io_error("write settings", &self.path, &e))?;
        tracing::debug!(path = %self.path.display(), "Saved settings");
        Ok(())
    }
}

/// In-memory settings, for embedding hosts and tests
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    settings: Mutex<Settings>,
    saves: Mutex<usize>,
}

impl MemorySettingsStore {
    #[must_use]
    pub fn new(settings: Settings) -> Self {
        Self {
            settings: Mutex::new(settings),
            saves: Mutex::new(0),
        }
    }

    /// Current stored value
    #[must_use]
    pub fn snapshot(&self) -> Settings {
        self.settings
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Number of successful `save` calls
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.saves.lock().map(|n| *n).unwrap_or_default()
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load(&self) -> Result<Settings> {
        self.settings
            .lock()
            .map(|s| s.clone())
            .map_err(|_| VisionError::internal("Settings lock poisoned"))
    }

    fn save(&self, settings: &Settings) -> Result<()> {
        let mut stored = self
            .settings
            .lock()
            .map_err(|_| VisionError::internal("Settings lock poisoned"))?;
        *stored = settings.clone();
        if let Ok(mut saves) = self.saves.lock() {
            *saves += 1;
        }
        Ok(())
    }
}

/// Bounds padding used by the inpaint tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InpaintConfig {
    /// Context pixels added around the painted mask on every side
    pub padding: u32,
    /// Minimum region size per axis, clamped to the image
    pub min_size: u32,
}

impl Default for InpaintConfig {
    fn default() -> Self {
        Self {
            padding: 64,
            min_size: 512,
        }
    }
}

/// Static configuration for the tools
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisionConfig {
    /// Application data directory; `None` uses the platform default
    pub data_dir: Option<PathBuf>,
    /// Capacity of the worker-to-UI error channel
    pub error_channel_capacity: usize,
    /// Inpaint bounds padding
    pub inpaint: InpaintConfig,
    /// Images smaller than this on either axis are not processed by background removal
    pub min_background_removal_size: u32,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            error_channel_capacity: 64,
            inpaint: InpaintConfig::default(),
            min_background_removal_size: 64,
        }
    }
}

impl VisionConfig {
    #[must_use]
    pub fn builder() -> VisionConfigBuilder {
        VisionConfigBuilder::default()
    }

    /// Validate configuration values
    ///
    /// # Errors
    /// - Error channel capacity of zero
    /// - Inpaint minimum size of zero
    pub fn validate(&self) -> Result<()> {
        if self.error_channel_capacity == 0 {
            return Err(VisionError::config_value_error(
                "error channel capacity",
                0,
                ">= 1",
                Some(64),
            ));
        }

        if self.inpaint.min_size == 0 {
            return Err(VisionError::config_value_error(
                "inpaint minimum size",
                0,
                ">= 1",
                Some(512),
            ));
        }

        Ok(())
    }

    /// Model paths for the configured data directory
    ///
    /// # Errors
    /// - No data directory configured and none could be determined
    pub fn model_paths(&self) -> Result<crate::models::ModelPaths> {
        match &self.data_dir {
            Some(dir) => Ok(crate::models::ModelPaths::from_data_dir(dir)),
            None => crate::models::ModelPaths::default_location(),
        }
    }
}

/// Builder for `VisionConfig`
#[derive(Debug, Default)]
pub struct VisionConfigBuilder {
    config: VisionConfig,
}

impl VisionConfigBuilder {
    #[must_use]
    pub fn data_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.data_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn error_channel_capacity(mut self, capacity: usize) -> Self {
        self.config.error_channel_capacity = capacity;
        self
    }

    #[must_use]
    pub fn inpaint_padding(mut self, padding: u32) -> Self {
        self.config.inpaint.padding = padding;
        self
    }

    #[must_use]
    pub fn inpaint_min_size(mut self, min_size: u32) -> Self {
        self.config.inpaint.min_size = min_size;
        self
    }

    #[must_use]
    pub fn min_background_removal_size(mut self, size: u32) -> Self {
        self.config.min_background_removal_size = size;
        self
    }

    /// Build and validate the configuration
    ///
    /// # Errors
    /// - Any value rejected by [`VisionConfig::validate`]
    pub fn build(self) -> Result<VisionConfig> {
        let config = self.config;
        config.validate()?;
        Ok(config)
    }
}

/// Checks a model name before it is written to [`Settings`]
///
/// # Errors
/// - See [`validate_model_name`]
pub fn validate_settings(settings: &Settings) -> Result<()> {
    for task in VisionTask::ALL {
        validate_model_name(settings.model_name(task))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_backend_kind_parsing() {
        assert_eq!("GPU".parse::<BackendKind>().unwrap(), BackendKind::Gpu);
        assert_eq!("cpu".parse::<BackendKind>().unwrap(), BackendKind::Cpu);
        assert!("tpu".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_settings_json_keys() {
        let json = serde_json::to_value(Settings::default()).unwrap();
        assert_eq!(json["backend"], "cpu");
        assert_eq!(json["model_0"], "MobileSAM.onnx");
        assert_eq!(json["model_1"], "MIGAN_512_places2.onnx");
        assert_eq!(json["model_2"], "BiRefNet_lite.onnx");
    }

    #[test]
    fn test_partial_settings_fill_defaults() {
        let settings: Settings = serde_json::from_str(r#"{"backend":"gpu"}"#).unwrap();
        assert_eq!(settings.backend, BackendKind::Gpu);
        assert_eq!(settings.model_name(VisionTask::Inpainting), "MIGAN_512_places2.onnx");
        assert!(validate_settings(&settings).is_ok());
    }

    #[test]
    fn test_json_store_round_trip() -> Result<()> {
        let temp = TempDir::new().unwrap();
        let store = JsonSettingsStore::new(temp.path().join("nested").join("settings.json"));
        assert_eq!(store.load()?, Settings::default());

        let mut settings = Settings::default();
        settings.backend = BackendKind::Gpu;
        settings.set_model_name(VisionTask::Segmentation, "EfficientSAM.onnx");
        store.save(&settings)?;

        assert_eq!(store.load()?, settings);
        Ok(())
    }

    #[test]
    fn test_json_store_rejects_garbage() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        let store = JsonSettingsStore::new(path);
        assert!(matches!(store.load(), Err(VisionError::InvalidConfig(_))));
    }

    #[test]
    fn test_memory_store_counts_saves() -> Result<()> {
        let store = MemorySettingsStore::default();
        store.save(&Settings::default())?;
        store.save(&Settings::default())?;
        assert_eq!(store.save_count(), 2);
        Ok(())
    }

    #[test]
    fn test_builder_validation() {
        assert!(VisionConfig::builder().error_channel_capacity(0).build().is_err());
        assert!(VisionConfig::builder().inpaint_min_size(0).build().is_err());

        let config = VisionConfig::builder()
            .inpaint_padding(32)
            .inpaint_min_size(256)
            .build()
            .unwrap();
        assert_eq!(config.inpaint, InpaintConfig { padding: 32, min_size: 256 });
        assert_eq!(config.error_channel_capacity, 64);
    }
}

//! Backend and model lifecycle
//!
//! [`BackendManager`] owns the active compute target and the models loaded on
//! it. All of that state sits behind one mutex held for exactly one logical
//! operation (switch backend, load model, encode, predict), so the UI thread
//! and the worker thread can both use the manager.
//!
//! Only the models in current use stay resident: loading a model for a task
//! that is not loaded unloads every other model first.

use crate::config::{BackendKind, Settings, SettingsStore};
use crate::error::{Result, VisionError};
use crate::inference::{BackendFactory, EncodedImage, InferenceBackend, VisionModel};
use crate::models::{validate_model_name, ModelPaths, VisionTask};
use crate::types::{ImageData, ImageView, PixelLayout, Prompt};
use instant::Instant;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

const EVENT_CAPACITY: usize = 16;

/// Notification sent after a successful backend or model switch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    BackendChanged(BackendKind),
    ModelChanged { task: VisionTask, name: String },
}

struct LoadedModel {
    id: u64,
    name: String,
    model: Box<dyn VisionModel>,
}

struct BackendState {
    kind: BackendKind,
    /// `None` after [`BackendManager::clean_up`]; recreated on the next load
    backend: Option<Box<dyn InferenceBackend>>,
    models: HashMap<VisionTask, LoadedModel>,
    settings: Settings,
}

/// Shared owner of the inference backend and its loaded models
pub struct BackendManager {
    factory: Arc<dyn BackendFactory>,
    store: Arc<dyn SettingsStore>,
    paths: ModelPaths,
    state: Mutex<BackendState>,
    events: broadcast::Sender<BackendEvent>,
    next_model_id: AtomicU64,
}

impl BackendManager {
    /// Read the stored settings and initialize the stored backend
    ///
    /// A stored GPU backend that is no longer available falls back to the CPU
    /// without rewriting the stored choice.
    ///
    /// # Errors
    /// - Neither the stored backend nor the CPU backend can be initialized
    pub fn new(
        factory: Arc<dyn BackendFactory>,
        store: Arc<dyn SettingsStore>,
        paths: ModelPaths,
    ) -> Result<Self> {
        let settings = store.load().unwrap_or_else(|e| {
            warn!("⚠️ Failed to load settings, using defaults: {e}");
            Settings::default()
        });

        let (kind, backend) = match factory.create(settings.backend) {
            Ok(backend) => (settings.backend, backend),
            Err(e) if settings.backend != BackendKind::Cpu => {
                warn!(
                    "⚠️ {} backend unavailable ({}), falling back to cpu",
                    settings.backend,
                    e.user_message()
                );
                (BackendKind::Cpu, factory.create(BackendKind::Cpu)?)
            },
            Err(e) => {
                return Err(VisionError::backend(format!(
                    "Failed to initialize {} backend: {}",
                    settings.backend,
                    e.user_message()
                )))
            },
        };
        info!("🚀 Inference backend ready: {}", backend.device_description());

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            factory,
            store,
            paths,
            state: Mutex::new(BackendState {
                kind,
                backend: Some(backend),
                models: HashMap::new(),
                settings,
            }),
            events,
            next_model_id: AtomicU64::new(1),
        })
    }

    fn lock(&self) -> MutexGuard<'_, BackendState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Currently active backend kind
    #[must_use]
    pub fn backend(&self) -> BackendKind {
        self.lock().kind
    }

    #[must_use]
    pub fn is_supported(&self, kind: BackendKind) -> bool {
        self.factory.is_supported(kind)
    }

    #[must_use]
    pub fn device_description(&self) -> String {
        let state = self.lock();
        state.backend.as_ref().map_or_else(
            || format!("{} backend (released)", state.kind),
            |backend| backend.device_description(),
        )
    }

    #[must_use]
    pub fn paths(&self) -> &ModelPaths {
        &self.paths
    }

    /// Snapshot of the in-memory settings
    #[must_use]
    pub fn settings(&self) -> Settings {
        self.lock().settings.clone()
    }

    /// Receive [`BackendEvent`]s
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BackendEvent> {
        self.events.subscribe()
    }

    /// Acquire a backend for `kind` and make it current
    ///
    /// On success all loaded models are discarded and the choice is
    /// persisted. On failure nothing changes.
    ///
    /// # Errors
    /// - The backend cannot be acquired; the message is the backend's own
    pub fn initialize(&self, kind: BackendKind) -> Result<()> {
        let mut state = self.lock();
        self.initialize_locked(&mut state, kind)
    }

    fn initialize_locked(&self, state: &mut BackendState, kind: BackendKind) -> Result<()> {
        let start = Instant::now();
        let backend = self.factory.create(kind).map_err(|e| {
            warn!("❌ Failed to initialize {kind} backend: {e}");
            e
        })?;

        let dropped = state.models.len();
        state.models.clear();
        state.backend = Some(backend);
        state.kind = kind;
        state.settings.backend = kind;
        self.persist(&state.settings);

        info!(
            "✅ Switched to {} backend in {:.2}ms ({} model(s) unloaded)",
            kind,
            start.elapsed().as_secs_f64() * 1000.0,
            dropped
        );
        Ok(())
    }

    /// Switch the compute target; a no-op when `kind` is already current
    ///
    /// Callers that toggled UI state optimistically must roll it back on error.
    ///
    /// # Errors
    /// - See [`BackendManager::initialize`]
    pub fn set_backend(&self, kind: BackendKind) -> Result<()> {
        {
            let mut state = self.lock();
            if state.kind == kind {
                debug!("Backend already set to {kind}");
                return Ok(());
            }
            self.initialize_locked(&mut state, kind)?;
        }
        let _ = self.events.send(BackendEvent::BackendChanged(kind));
        Ok(())
    }

    /// Configured model file name for `task`
    #[must_use]
    pub fn model_name(&self, task: VisionTask) -> String {
        self.lock().settings.model_name(task).to_string()
    }

    /// Change the model file for `task`, discarding only that task's loaded model
    ///
    /// # Errors
    /// - `name` is not a valid model file name
    pub fn set_model_name(&self, task: VisionTask, name: &str) -> Result<()> {
        validate_model_name(name)?;
        {
            let mut state = self.lock();
            if state.settings.model_name(task) == name {
                return Ok(());
            }
            state.settings.set_model_name(task, name);
            if state.models.remove(&task).is_some() {
                debug!("Unloaded {task} model after model change");
            }
            self.persist(&state.settings);
        }
        info!("🔄 {task} model set to {name}");
        let _ = self.events.send(BackendEvent::ModelChanged {
            task,
            name: name.to_string(),
        });
        Ok(())
    }

    /// Model files present on disk for `task`
    #[must_use]
    pub fn available_models(&self, task: VisionTask) -> Vec<String> {
        self.paths.available_models(task)
    }

    /// Tasks with a resident model, in task order
    #[must_use]
    pub fn loaded_tasks(&self) -> Vec<VisionTask> {
        let state = self.lock();
        VisionTask::ALL
            .into_iter()
            .filter(|task| state.models.contains_key(task))
            .collect()
    }

    /// Make sure the configured model for `task` is loaded; returns its model id
    ///
    /// # Errors
    /// - `ModelNotFound` when the configured file is missing
    /// - The backend fails to load the file
    pub fn load_model(&self, task: VisionTask) -> Result<u64> {
        let mut state = self.lock();
        self.ensure_model_locked(&mut state, task)
    }

    fn ensure_model_locked(&self, state: &mut BackendState, task: VisionTask) -> Result<u64> {
        let name = state.settings.model_name(task).to_string();
        if let Some(loaded) = state.models.get(&task) {
            if loaded.name == name {
                return Ok(loaded.id);
            }
        }

        let path = self.paths.resolve(task, &name)?;
        if !state.models.is_empty() {
            debug!("Unloading {} resident model(s) before loading {task}", state.models.len());
            state.models.clear();
        }

        if state.backend.is_none() {
            debug!("Recreating released {} backend", state.kind);
            state.backend = Some(self.factory.create(state.kind)?);
        }
        let backend = state
            .backend
            .as_mut()
            .ok_or_else(|| VisionError::internal("Backend missing after initialization"))?;

        let start = Instant::now();
        let model = backend.load_model(task, &path)?;
        let id = self.next_model_id.fetch_add(1, Ordering::Relaxed);
        info!(
            "📦 Loaded {} model '{}' on {} in {:.2}ms",
            task,
            name,
            state.kind,
            start.elapsed().as_secs_f64() * 1000.0
        );
        state.models.insert(task, LoadedModel { id, name, model });
        Ok(id)
    }

    fn model_mut<'a>(
        &self,
        state: &'a mut BackendState,
        task: VisionTask,
    ) -> Result<&'a mut Box<dyn VisionModel>> {
        self.ensure_model_locked(state, task)?;
        state
            .models
            .get_mut(&task)
            .map(|loaded| &mut loaded.model)
            .ok_or_else(|| VisionError::internal(format!("{task} model vanished after load")))
    }

    /// Encode a whole image with the segmentation model
    ///
    /// # Errors
    /// - Model cannot be loaded or encoding fails
    #[instrument(skip(self, image), fields(width = image.extent().width, height = image.extent().height))]
    pub fn encode_segmentation_image(&self, image: &ImageView<'_>) -> Result<EncodedImage> {
        let mut state = self.lock();
        let model_id = self.ensure_model_locked(&mut state, VisionTask::Segmentation)?;
        let model = self.model_mut(&mut state, VisionTask::Segmentation)?;

        let start = Instant::now();
        let encoded = model.encode(image)?;
        debug!("Encoded image in {:.2}ms", start.elapsed().as_secs_f64() * 1000.0);
        Ok(EncodedImage::new(model_id, image.extent(), encoded))
    }

    /// Whether the model that produced `encoded` is still loaded
    #[must_use]
    pub fn is_encoding_current(&self, encoded: &EncodedImage) -> bool {
        self.lock()
            .models
            .get(&VisionTask::Segmentation)
            .is_some_and(|loaded| loaded.id == encoded.model_id())
    }

    /// Mask for `prompt` from a previous encoding
    ///
    /// Returns `None` when the segmentation model was unloaded or replaced since
    /// `encoded` was produced.
    ///
    /// # Errors
    /// - Inference failure or a malformed mask from the backend
    #[instrument(skip(self, encoded))]
    pub fn predict_segmentation_mask(
        &self,
        encoded: &EncodedImage,
        prompt: Prompt,
    ) -> Result<Option<ImageData>> {
        let mut state = self.lock();
        let Some(loaded) = state.models.get_mut(&VisionTask::Segmentation) else {
            debug!("Segmentation model not loaded, encoding is stale");
            return Ok(None);
        };
        if loaded.id != encoded.model_id() {
            debug!("Encoding from model {} is stale", encoded.model_id());
            return Ok(None);
        }

        let mask = loaded.model.compute_mask(encoded, prompt)?;
        check_output(&mask, encoded.extent(), PixelLayout::Alpha8)?;
        Ok(Some(mask))
    }

    /// Foreground matte of `image`
    ///
    /// # Errors
    /// - Model cannot be loaded, inference fails or the matte is malformed
    #[instrument(skip(self, image), fields(width = image.extent().width, height = image.extent().height))]
    pub fn remove_background(&self, image: &ImageView<'_>) -> Result<ImageData> {
        let mut state = self.lock();
        let model = self.model_mut(&mut state, VisionTask::BackgroundRemoval)?;
        let start = Instant::now();
        let mask = model.remove_background(image)?;
        debug!("Background removal took {:.2}ms", start.elapsed().as_secs_f64() * 1000.0);
        check_output(&mask, image.extent(), PixelLayout::Alpha8)?;
        Ok(mask)
    }

    /// Fill the masked pixels of `image`
    ///
    /// # Errors
    /// - Model cannot be loaded, inference fails or the result is malformed
    #[instrument(skip(self, image, mask), fields(width = image.extent().width, height = image.extent().height))]
    pub fn inpaint(&self, image: &ImageView<'_>, mask: &ImageView<'_>) -> Result<ImageData> {
        let mut state = self.lock();
        let model = self.model_mut(&mut state, VisionTask::Inpainting)?;
        let start = Instant::now();
        let result = model.inpaint(image, mask)?;
        debug!("Inpainting took {:.2}ms", start.elapsed().as_secs_f64() * 1000.0);
        check_output(&result, image.extent(), PixelLayout::Rgba8)?;
        Ok(result)
    }

    /// Drop every loaded model and release the backend before shutdown
    ///
    /// The backend kind and settings are kept; the next model load acquires a
    /// fresh backend of the same kind.
    pub fn clean_up(&self) {
        let mut state = self.lock();
        if !state.models.is_empty() {
            info!("🧹 Unloading {} model(s)", state.models.len());
        }
        state.models.clear();
        if state.backend.take().is_some() {
            debug!("Released {} backend", state.kind);
        }
    }

    fn persist(&self, settings: &Settings) {
        if let Err(e) = self.store.save(settings) {
            warn!("⚠️ Failed to persist settings: {e}");
        }
    }
}

fn check_output(
    data: &ImageData,
    extent: crate::types::Extent,
    layout: PixelLayout,
) -> Result<()> {
    if data.extent() != extent || data.layout() != layout {
        return Err(VisionError::inference(format!(
            "Backend returned {:?} {}x{}, expected {:?} {}x{}",
            data.layout(),
            data.extent().width,
            data.extent().height,
            layout,
            extent.width,
            extent.height
        )));
    }
    Ok(())
}

impl std::fmt::Debug for BackendManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendManager")
            .field("backend", &self.backend())
            .field("loaded_tasks", &self.loaded_tasks())
            .field("paths", &self.paths)
            .finish_non_exhaustive()
    }
}

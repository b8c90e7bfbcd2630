//! Shared fixtures for the integration tests

#![allow(dead_code)]

use image::{Rgba, RgbaImage};
use std::sync::Arc;
use tempfile::TempDir;
use visionml::backends::mock::install_placeholder_models;
use visionml::{
    error_channel, BackendManager, ColorModel, Document, ErrorReceiver, Extent, Layer,
    MemorySettingsStore, MockBackendFactory, ModelPaths, PaintDevice, Point, ProcessingError, Rect,
    Settings, WorkQueue,
};

pub const BACKGROUND: [u8; 4] = [240, 240, 240, 255];
pub const OBJECT: [u8; 4] = [20, 30, 40, 255];

/// Mock-backed manager, work queue and error channel over a temporary model directory
pub struct Harness {
    pub dir: TempDir,
    pub factory: MockBackendFactory,
    pub store: Arc<MemorySettingsStore>,
    pub manager: Arc<BackendManager>,
    pub queue: WorkQueue,
    pub errors: ErrorReceiver,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(MockBackendFactory::new(), Settings::default())
    }

    pub fn with(factory: MockBackendFactory, settings: Settings) -> Self {
        let dir = TempDir::new().unwrap();
        let paths = ModelPaths::new(dir.path());
        install_placeholder_models(&paths, &[]).unwrap();
        let store = Arc::new(MemorySettingsStore::new(settings));
        let manager = Arc::new(
            BackendManager::new(Arc::new(factory.clone()), store.clone(), paths).unwrap(),
        );
        let (reporter, errors) = error_channel(16);
        let queue = WorkQueue::spawn(reporter).unwrap();
        Self {
            dir,
            factory,
            store,
            manager,
            queue,
            errors,
        }
    }

    /// Wait for the queue and collect reported failures
    pub fn finish(&mut self) -> Vec<ProcessingError> {
        self.queue.wait_for_done().unwrap();
        self.errors.drain()
    }
}

/// Opaque image of `size` with `object` painted in [`OBJECT`]
pub fn object_image(size: u32, object: Rect) -> RgbaImage {
    RgbaImage::from_fn(size, size, |x, y| {
        if object.contains(Point::new(x as i32, y as i32)) {
            Rgba(OBJECT)
        } else {
            Rgba(BACKGROUND)
        }
    })
}

/// Square document with one paint layer holding [`object_image`]
pub fn object_document(size: u32, object: Rect) -> (Arc<Document>, Layer) {
    let document = Arc::new(Document::new(Extent::new(size, size)));
    let device = PaintDevice::from_rgba_image(
        ColorModel::Bgra8,
        &object_image(size, object),
        Point::new(0, 0),
    );
    let layer = Layer::paint("Background", device);
    document.add_layer(layer.clone());
    (document, layer)
}

//! Backend and model lifecycle of the shared manager

mod common;

use common::Harness;
use std::sync::Arc;
use tempfile::TempDir;
use visionml::backends::mock::install_placeholder_models;
use visionml::{
    BackendEvent, BackendKind, BackendManager, JsonSettingsStore, MockBackendFactory, ModelPaths,
    Settings, SettingsStore, VisionError, VisionTask,
};

#[test]
fn test_setting_current_backend_is_a_no_op() {
    let harness = Harness::new();
    harness.manager.load_model(VisionTask::Segmentation).unwrap();
    harness.factory.clear_call_history();

    harness.manager.set_backend(BackendKind::Cpu).unwrap();

    assert_eq!(harness.factory.count_calls("create"), 0);
    assert_eq!(harness.store.save_count(), 0);
    assert_eq!(harness.manager.loaded_tasks(), vec![VisionTask::Segmentation]);
}

#[test]
fn test_failed_backend_switch_changes_nothing() {
    let harness = Harness::new();
    harness.factory.set_available(BackendKind::Gpu, false);
    let model_id = harness.manager.load_model(VisionTask::Segmentation).unwrap();

    let err = harness.manager.set_backend(BackendKind::Gpu).unwrap_err();
    assert!(err.user_message().contains("not available"));

    assert_eq!(harness.manager.backend(), BackendKind::Cpu);
    assert_eq!(harness.manager.settings().backend, BackendKind::Cpu);
    assert_eq!(
        harness.manager.load_model(VisionTask::Segmentation).unwrap(),
        model_id
    );
}

#[test]
fn test_backend_switch_unloads_models_and_persists() {
    let harness = Harness::new();
    let mut events = harness.manager.subscribe();
    harness.manager.load_model(VisionTask::Segmentation).unwrap();

    harness.manager.set_backend(BackendKind::Gpu).unwrap();

    assert!(harness.manager.loaded_tasks().is_empty());
    assert_eq!(harness.store.snapshot().backend, BackendKind::Gpu);
    assert_eq!(
        events.try_recv().unwrap(),
        BackendEvent::BackendChanged(BackendKind::Gpu)
    );
}

#[test]
fn test_model_change_keeps_other_tasks_loaded() {
    let harness = Harness::new();
    harness.manager.load_model(VisionTask::Segmentation).unwrap();

    harness
        .manager
        .set_model_name(VisionTask::Inpainting, "MIGAN_custom.onnx")
        .unwrap();

    assert_eq!(harness.manager.loaded_tasks(), vec![VisionTask::Segmentation]);
    assert_eq!(
        harness.store.snapshot().model_name(VisionTask::Inpainting),
        "MIGAN_custom.onnx"
    );
}

#[test]
fn test_loading_another_task_unloads_resident_models() {
    let harness = Harness::new();
    harness.manager.load_model(VisionTask::Segmentation).unwrap();
    harness.manager.load_model(VisionTask::BackgroundRemoval).unwrap();

    assert_eq!(
        harness.manager.loaded_tasks(),
        vec![VisionTask::BackgroundRemoval]
    );
}

#[test]
fn test_missing_model_file_keeps_resident_models() {
    let harness = Harness::new();
    harness.manager.load_model(VisionTask::BackgroundRemoval).unwrap();
    harness
        .manager
        .set_model_name(VisionTask::Segmentation, "Missing.onnx")
        .unwrap();

    let err = harness
        .manager
        .load_model(VisionTask::Segmentation)
        .unwrap_err();
    assert!(matches!(
        err,
        VisionError::ModelNotFound {
            task: VisionTask::Segmentation,
            ..
        }
    ));
    assert_eq!(
        harness.manager.loaded_tasks(),
        vec![VisionTask::BackgroundRemoval]
    );
}

#[test]
fn test_invalid_model_name_is_rejected() {
    let harness = Harness::new();
    assert!(harness
        .manager
        .set_model_name(VisionTask::Segmentation, "../escape.onnx")
        .is_err());
    assert_eq!(
        harness.manager.model_name(VisionTask::Segmentation),
        VisionTask::Segmentation.default_model()
    );
}

#[test]
fn test_stored_gpu_backend_falls_back_to_cpu() {
    let settings = Settings {
        backend: BackendKind::Gpu,
        ..Settings::default()
    };
    let harness = Harness::with(MockBackendFactory::with_unavailable(BackendKind::Gpu), settings);

    assert_eq!(harness.manager.backend(), BackendKind::Cpu);
    assert_eq!(harness.store.snapshot().backend, BackendKind::Gpu);
}

#[test]
fn test_settings_survive_restart() {
    let data = TempDir::new().unwrap();
    let config = TempDir::new().unwrap();
    let paths = ModelPaths::new(data.path());
    install_placeholder_models(&paths, &[]).unwrap();
    let store_path = config.path().join("settings.json");
    let factory = Arc::new(MockBackendFactory::new());

    let manager = BackendManager::new(
        factory.clone(),
        Arc::new(JsonSettingsStore::new(&store_path)),
        paths.clone(),
    )
    .unwrap();
    manager.set_backend(BackendKind::Gpu).unwrap();
    manager
        .set_model_name(VisionTask::BackgroundRemoval, "BiRefNet_HR.onnx")
        .unwrap();
    drop(manager);

    let stored = JsonSettingsStore::new(&store_path).load().unwrap();
    assert_eq!(stored.backend, BackendKind::Gpu);
    assert_eq!(stored.model_2, "BiRefNet_HR.onnx");

    let restarted =
        BackendManager::new(factory, Arc::new(JsonSettingsStore::new(&store_path)), paths)
            .unwrap();
    assert_eq!(restarted.backend(), BackendKind::Gpu);
    assert_eq!(
        restarted.model_name(VisionTask::BackgroundRemoval),
        "BiRefNet_HR.onnx"
    );
}

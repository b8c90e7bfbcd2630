//! Background removal and inpainting through the work queue

mod common;

use common::{object_document, Harness, BACKGROUND};
use image::{Rgba, RgbaImage};
use std::sync::Arc;
use visionml::tools::PAINT_LAYER_REQUIRED;
use visionml::{
    BackgroundRemovalFilter, BackgroundRemovalTask, ColorModel, Document, Extent, InpaintConfig,
    InpaintTool, Layer, PaintDevice, PixelSelection, Point, ProgressTracker, Rect,
};

const FILL: [u8; 4] = [100, 150, 200, 255];

/// Uniform layer with a black 3x3 blemish centered on (10, 10)
fn blemished_document() -> (Arc<Document>, Layer) {
    let image = RgbaImage::from_fn(64, 64, |x, y| {
        if (9..=11).contains(&x) && (9..=11).contains(&y) {
            Rgba([0, 0, 0, 255])
        } else {
            Rgba(FILL)
        }
    });
    let document = Arc::new(Document::new(Extent::new(64, 64)));
    let layer = Layer::paint(
        "Photo",
        PaintDevice::from_rgba_image(ColorModel::Bgra8, &image, Point::new(0, 0)),
    );
    document.add_layer(layer.clone());
    (document, layer)
}

fn inpaint_tool(harness: &Harness) -> InpaintTool {
    let mut tool = InpaintTool::new(
        Arc::clone(&harness.manager),
        harness.queue.handle(),
        InpaintConfig {
            padding: 8,
            min_size: 32,
        },
    );
    tool.set_brush_radius(3.0);
    tool
}

#[test]
fn test_background_removal_task_clears_background() {
    let mut harness = Harness::new();
    let (_document, layer) = object_document(96, Rect::new(30, 30, 30, 30));
    let filter = Arc::new(BackgroundRemovalFilter::new(Arc::clone(&harness.manager), 64));
    let config = filter.default_configuration();

    harness
        .queue
        .submit(Box::new(BackgroundRemovalTask::new(
            filter,
            layer.device(),
            config,
            ProgressTracker::no_op(),
        )))
        .unwrap();
    assert!(harness.finish().is_empty());

    let device = layer.read_device().unwrap();
    assert_eq!(device.pixel(Point::new(2, 2))[3], 0);
    assert_eq!(device.pixel(Point::new(45, 45))[3], 255);
    assert_eq!(harness.factory.count_calls("remove_background"), 1);
}

#[test]
fn test_background_removal_failure_is_reported() {
    let mut harness = Harness::new();
    harness.factory.set_fail_inference(true);
    let (_document, layer) = object_document(96, Rect::new(30, 30, 30, 30));
    let filter = Arc::new(BackgroundRemovalFilter::new(Arc::clone(&harness.manager), 64));
    let config = filter.default_configuration();

    harness
        .queue
        .submit(Box::new(BackgroundRemovalTask::new(
            filter,
            layer.device(),
            config,
            ProgressTracker::no_op(),
        )))
        .unwrap();
    let errors = harness.finish();

    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].operation, "Background Removal");
    assert_eq!(
        layer.read_device().unwrap().pixel(Point::new(2, 2)),
        BACKGROUND
    );
}

#[test]
fn test_inpaint_stroke_fills_masked_pixels() {
    let mut harness = Harness::new();
    let (document, layer) = blemished_document();
    let mut tool = inpaint_tool(&harness);

    tool.begin_stroke(&document, layer.id(), Point::new(10, 10))
        .unwrap();
    assert!(tool.is_painting());
    assert_eq!(tool.mask_bounds(), Some(Rect::new(7, 7, 7, 7)));
    tool.end_stroke().unwrap();
    assert!(!tool.is_painting());
    assert!(harness.finish().is_empty());

    let device = layer.read_device().unwrap();
    for point in [Point::new(9, 9), Point::new(10, 10), Point::new(11, 11)] {
        assert_eq!(device.pixel(point), FILL);
    }
    assert_eq!(harness.factory.count_calls("inpaint"), 1);
}

#[test]
fn test_inpaint_respects_active_selection() {
    let mut harness = Harness::new();
    let (document, layer) = blemished_document();
    document.set_selection(Some(PixelSelection::from_rect(
        document.bounds(),
        Rect::new(0, 0, 10, 64),
    )));
    let mut tool = inpaint_tool(&harness);

    tool.begin_stroke(&document, layer.id(), Point::new(10, 10))
        .unwrap();
    tool.end_stroke().unwrap();
    assert!(harness.finish().is_empty());

    let device = layer.read_device().unwrap();
    assert_eq!(device.pixel(Point::new(9, 10)), FILL);
    assert_eq!(device.pixel(Point::new(11, 10)), [0, 0, 0, 255]);
}

#[test]
fn test_inpaint_requires_paint_layer() {
    let harness = Harness::new();
    let (document, _layer) = blemished_document();
    let group = document.add_layer(Layer::group(
        "Group",
        PaintDevice::new(ColorModel::Bgra8, document.bounds()),
    ));
    let mut tool = inpaint_tool(&harness);

    let err = tool
        .begin_stroke(&document, group, Point::new(10, 10))
        .unwrap_err();
    assert_eq!(err.user_message(), PAINT_LAYER_REQUIRED);
    assert!(!tool.is_painting());
}

#[test]
fn test_end_stroke_without_painting_does_nothing() {
    let mut harness = Harness::new();
    let mut tool = inpaint_tool(&harness);

    tool.end_stroke().unwrap();
    assert!(harness.finish().is_empty());
    assert_eq!(harness.factory.count_calls("inpaint"), 0);
}

#[test]
fn test_segmentation_and_inpainting_share_the_manager() {
    let mut harness = Harness::new();
    let (document, layer) = blemished_document();
    harness
        .manager
        .load_model(visionml::VisionTask::Segmentation)
        .unwrap();
    let mut tool = inpaint_tool(&harness);

    tool.begin_stroke(&document, layer.id(), Point::new(10, 10))
        .unwrap();
    tool.continue_stroke(Point::new(20, 10));
    tool.end_stroke().unwrap();
    assert!(harness.finish().is_empty());

    assert_eq!(
        harness.manager.loaded_tasks(),
        vec![visionml::VisionTask::Inpainting]
    );
}

//! Inpainting brush tool
//!
//! The user paints a mask with a round brush. When the stroke ends the
//! masked area of the current paint layer is filled in by the inpainting
//! model, using the surrounding pixels as context.

use crate::config::InpaintConfig;
use crate::document::{Document, Layer, LayerKind, NodeId, PaintDevice};
use crate::error::{Result, VisionError};
use crate::manager::BackendManager;
use crate::queue::{Task, WorkQueueHandle};
use crate::selection::PixelSelection;
use crate::types::{ImageData, Point, Rect};
use crate::utils::image_view::{convert_back, VisionImage};
use image::{GrayImage, Luma};
use std::sync::Arc;
use tracing::{debug, info};

/// Shown when the stroke starts on something that is not a paint layer
pub const PAINT_LAYER_REQUIRED: &str = "Select a paint layer to use this tool";

/// Brush radius used until the user changes it
pub const DEFAULT_BRUSH_RADIUS: f32 = 50.0;

/// Expand `bounds` by the configured padding, then grow each axis to at least
/// `min_size` without leaving `image_bounds`
///
/// Growth is split evenly between both sides and shifted inward when one side
/// would cross the image edge. An axis is only grown when the image is at
/// least `min_size` long on it. The result is clipped to `image_bounds`.
#[must_use]
pub fn pad_bounds(bounds: Rect, config: &InpaintConfig, image_bounds: Rect) -> Rect {
    let padding = config.padding as i32;
    let target = config.min_size as i32;
    let mut padded = bounds.adjusted(padding, padding, padding, padding);

    if (padded.width as i32) < target && image_bounds.width as i32 >= target {
        let diff = target - padded.width as i32;
        let (before, after) = split_growth(
            diff,
            padded.left() - image_bounds.left(),
            image_bounds.right() - padded.right(),
        );
        padded = padded.adjusted(before, 0, after, 0);
    }

    if (padded.height as i32) < target && image_bounds.height as i32 >= target {
        let diff = target - padded.height as i32;
        let (before, after) = split_growth(
            diff,
            padded.top() - image_bounds.top(),
            image_bounds.bottom() - padded.bottom(),
        );
        padded = padded.adjusted(0, before, 0, after);
    }

    padded.intersected(&image_bounds)
}

/// Split `diff` between two sides given the room left before and after
fn split_growth(diff: i32, room_before: i32, room_after: i32) -> (i32, i32) {
    let before = diff / 2;
    let after = diff - before;
    if before > room_before {
        (room_before, diff - room_before)
    } else if after > room_after {
        (diff - room_after, room_after)
    } else {
        (before, after)
    }
}

struct Stroke {
    document: Arc<Document>,
    layer: Layer,
    mask: GrayImage,
    last: Point,
}

/// Round-brush inpainting tool
pub struct InpaintTool {
    manager: Arc<BackendManager>,
    queue: WorkQueueHandle,
    config: InpaintConfig,
    brush_radius: f32,
    stroke: Option<Stroke>,
}

impl InpaintTool {
    #[must_use]
    pub fn new(manager: Arc<BackendManager>, queue: WorkQueueHandle, config: InpaintConfig) -> Self {
        Self {
            manager,
            queue,
            config,
            brush_radius: DEFAULT_BRUSH_RADIUS,
            stroke: None,
        }
    }

    #[must_use]
    pub const fn brush_radius(&self) -> f32 {
        self.brush_radius
    }

    pub fn set_brush_radius(&mut self, radius: f32) {
        self.brush_radius = radius.max(0.5);
    }

    #[must_use]
    pub const fn is_painting(&self) -> bool {
        self.stroke.is_some()
    }

    /// Bounds of the mask painted so far, for outline preview
    #[must_use]
    pub fn mask_bounds(&self) -> Option<Rect> {
        self.stroke.as_ref().map(|stroke| mask_bounds(&stroke.mask))
    }

    /// Start painting the mask at `point` on layer `node`
    ///
    /// # Errors
    /// - [`PAINT_LAYER_REQUIRED`] when `node` is missing or not a paint layer
    pub fn begin_stroke(&mut self, document: &Arc<Document>, node: NodeId, point: Point) -> Result<()> {
        let layer = document
            .layer(node)
            .filter(|layer| layer.kind() == LayerKind::Paint)
            .ok_or_else(|| VisionError::processing(PAINT_LAYER_REQUIRED))?;

        let size = document.size();
        let mut stroke = Stroke {
            document: Arc::clone(document),
            layer,
            mask: GrayImage::new(size.width, size.height),
            last: point,
        };
        stamp(&mut stroke.mask, point, self.brush_radius);
        self.stroke = Some(stroke);
        debug!("Inpaint stroke started at {point:?}");
        Ok(())
    }

    /// Extend the current stroke to `point`; ignored when not painting
    pub fn continue_stroke(&mut self, point: Point) {
        let radius = self.brush_radius;
        let Some(stroke) = self.stroke.as_mut() else {
            return;
        };
        let (dx, dy) = ((point.x - stroke.last.x) as f32, (point.y - stroke.last.y) as f32);
        let distance = dx.hypot(dy);
        let spacing = (radius / 4.0).max(1.0);
        let steps = (distance / spacing).ceil().max(1.0) as i32;
        for i in 1..=steps {
            let t = i as f32 / steps as f32;
            let p = Point::new(
                stroke.last.x + (dx * t).round() as i32,
                stroke.last.y + (dy * t).round() as i32,
            );
            stamp(&mut stroke.mask, p, radius);
        }
        stroke.last = point;
    }

    /// Finish the stroke and queue the inpainting; the mask is cleared
    ///
    /// # Errors
    /// - The layer device lock is poisoned or the work queue has shut down
    pub fn end_stroke(&mut self) -> Result<()> {
        let Some(stroke) = self.stroke.take() else {
            return Ok(());
        };
        if mask_bounds(&stroke.mask).is_empty() {
            return Ok(());
        }

        let task = InpaintTask::new(
            Arc::clone(&self.manager),
            self.config,
            stroke.mask,
            stroke.layer,
            stroke.document.selection(),
        )?;
        self.queue.submit(Box::new(task))
    }

    /// Abandon any stroke in progress
    pub fn deactivate(&mut self) {
        self.stroke = None;
    }
}

impl std::fmt::Debug for InpaintTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InpaintTool")
            .field("config", &self.config)
            .field("brush_radius", &self.brush_radius)
            .field("painting", &self.is_painting())
            .finish_non_exhaustive()
    }
}

fn stamp(mask: &mut GrayImage, center: Point, radius: f32) {
    let r = radius.ceil() as i32;
    let (w, h) = (mask.width() as i32, mask.height() as i32);
    let r2 = radius * radius;
    for y in (center.y - r).max(0)..(center.y + r + 1).min(h) {
        for x in (center.x - r).max(0)..(center.x + r + 1).min(w) {
            let (dx, dy) = ((x - center.x) as f32, (y - center.y) as f32);
            if dx * dx + dy * dy <= r2 {
                mask.put_pixel(x as u32, y as u32, Luma([255]));
            }
        }
    }
}

fn mask_bounds(mask: &GrayImage) -> Rect {
    let mut bounds = Rect::default();
    for (x, y, px) in mask.enumerate_pixels() {
        if px.0[0] > 0 {
            bounds = bounds.united(&Rect::new(x as i32, y as i32, 1, 1));
        }
    }
    bounds
}

/// Fills a painted mask on a layer from the work queue
///
/// Holds owned copies of the mask, the layer pixels and the active selection
/// taken when the stroke ended.
pub struct InpaintTask {
    manager: Arc<BackendManager>,
    config: InpaintConfig,
    /// Mask over the document bounds
    mask: GrayImage,
    image: PaintDevice,
    layer: Layer,
    selection: Option<PixelSelection>,
}

impl InpaintTask {
    pub fn new(
        manager: Arc<BackendManager>,
        config: InpaintConfig,
        mask: GrayImage,
        layer: Layer,
        selection: Option<PixelSelection>,
    ) -> Result<Self> {
        let image = layer.read_device()?.clone();
        Ok(Self {
            manager,
            config,
            mask,
            image,
            layer,
            selection,
        })
    }
}

impl Task for InpaintTask {
    fn name(&self) -> &str {
        "Inpaint"
    }

    fn run(self: Box<Self>) -> Result<()> {
        let bounds = pad_bounds(mask_bounds(&self.mask), &self.config, self.image.exact_bounds());
        let Some(image) = VisionImage::prepare(&self.image, Some(bounds)) else {
            debug!("Inpaint region is empty, nothing to do");
            return Ok(());
        };

        let mask = ImageData::from_gray(GrayImage::from_fn(bounds.width, bounds.height, |x, y| {
            let (mx, my) = (bounds.x + x as i32, bounds.y + y as i32);
            if mx >= 0 && my >= 0 && (mx as u32) < self.mask.width() && (my as u32) < self.mask.height() {
                *self.mask.get_pixel(mx as u32, my as u32)
            } else {
                Luma([0])
            }
        }));

        let result = self.manager.inpaint(&image.view(), &mask.view())?;
        let pixels = convert_back(&result.view(), Rect::from_extent(result.extent()))?;

        self.layer
            .write_device()?
            .write_rgba8(bounds.top_left(), &pixels, self.selection.as_ref());
        info!(
            "🖌️ Inpainted {}x{} region at ({}, {})",
            bounds.width, bounds.height, bounds.x, bounds.y
        );
        Ok(())
    }
}

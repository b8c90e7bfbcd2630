//! Minimal layered document model the tools operate on
//!
//! Paint devices store raw pixels in one of a few color models. Layers share
//! their device behind a lock so tools can read on the worker thread while
//! the host keeps its handle.

use crate::error::{Result, VisionError};
use crate::selection::{PixelSelection, SelectionAction};
use crate::types::{Extent, Point, Rect};
use image::{Rgba, RgbaImage};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            /// Allocate a process-unique id
            #[must_use]
            pub fn new() -> Self {
                Self(next_id())
            }

            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }
    };
}

id_type!(
    /// Identifies a canvas (view) onto a document
    CanvasId
);
id_type!(
    /// Identifies a layer node
    NodeId
);
id_type!(
    /// Identifies a document
    DocumentId
);

/// Native pixel storage of a paint device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorModel {
    /// 8-bit BGRA, the editor's native 4-byte layout
    Bgra8,
    /// 16-bit little-endian RGBA
    Rgba16,
    /// 8-bit gray plus alpha
    GrayA8,
}

impl ColorModel {
    #[must_use]
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Bgra8 => 4,
            Self::Rgba16 => 8,
            Self::GrayA8 => 2,
        }
    }

    fn encode(self, [r, g, b, a]: [u8; 4], out: &mut [u8]) {
        match self {
            Self::Bgra8 => out.copy_from_slice(&[b, g, r, a]),
            Self::Rgba16 => {
                for (chunk, value) in out.chunks_exact_mut(2).zip([r, g, b, a]) {
                    chunk.copy_from_slice(&(u16::from(value) * 257).to_le_bytes());
                }
            },
            Self::GrayA8 => {
                let gray = (u32::from(r) * 299 + u32::from(g) * 587 + u32::from(b) * 114) / 1000;
                out.copy_from_slice(&[gray as u8, a]);
            },
        }
    }

    fn decode(self, px: &[u8]) -> [u8; 4] {
        match self {
            Self::Bgra8 => [px[2], px[1], px[0], px[3]],
            Self::Rgba16 => {
                let mut rgba = [0u8; 4];
                for (value, chunk) in rgba.iter_mut().zip(px.chunks_exact(2)) {
                    let wide = u16::from_le_bytes([chunk[0], chunk[1]]);
                    *value = ((u32::from(wide) + 128) / 257) as u8;
                }
                rgba
            },
            Self::GrayA8 => [px[0], px[0], px[0], px[1]],
        }
    }
}

/// Raster storage with a fixed rectangle in document coordinates
///
/// Pixels outside the storage rectangle read as the default (all-zero) pixel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaintDevice {
    color_model: ColorModel,
    bounds: Rect,
    data: Vec<u8>,
}

impl PaintDevice {
    /// Transparent device covering `bounds`
    #[must_use]
    pub fn new(color_model: ColorModel, bounds: Rect) -> Self {
        Self {
            color_model,
            bounds,
            data: vec![0; bounds.extent().pixel_count() * color_model.bytes_per_pixel()],
        }
    }

    /// Device holding `image` with its top-left corner at `origin`
    #[must_use]
    pub fn from_rgba_image(color_model: ColorModel, image: &RgbaImage, origin: Point) -> Self {
        let bounds = Rect::new(origin.x, origin.y, image.width(), image.height());
        let mut device = Self::new(color_model, bounds);
        let bpp = color_model.bytes_per_pixel();
        for (px, out) in image.pixels().zip(device.data.chunks_exact_mut(bpp)) {
            color_model.encode(px.0, out);
        }
        device
    }

    #[must_use]
    pub const fn color_model(&self) -> ColorModel {
        self.color_model
    }

    /// Storage rectangle
    #[must_use]
    pub const fn bounds(&self) -> Rect {
        self.bounds
    }

    fn offset(&self, point: Point) -> Option<usize> {
        if !self.bounds.contains(point) {
            return None;
        }
        let x = (point.x - self.bounds.x) as usize;
        let y = (point.y - self.bounds.y) as usize;
        Some((y * self.bounds.width as usize + x) * self.color_model.bytes_per_pixel())
    }

    /// Tight bounding box of non-default pixels
    #[must_use]
    pub fn exact_bounds(&self) -> Rect {
        let bpp = self.color_model.bytes_per_pixel();
        let width = self.bounds.width as usize;
        let mut found: Option<(usize, usize, usize, usize)> = None;
        for (i, px) in self.data.chunks_exact(bpp).enumerate() {
            if px.iter().all(|b| *b == 0) {
                continue;
            }
            let (x, y) = (i % width, i / width);
            found = Some(match found {
                None => (x, y, x, y),
                Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
            });
        }
        match found {
            None => Rect::default(),
            Some((x0, y0, x1, y1)) => Rect::new(
                self.bounds.x + x0 as i32,
                self.bounds.y + y0 as i32,
                (x1 - x0 + 1) as u32,
                (y1 - y0 + 1) as u32,
            ),
        }
    }

    /// Pixel at a document position as RGBA
    #[must_use]
    pub fn pixel(&self, point: Point) -> [u8; 4] {
        let bpp = self.color_model.bytes_per_pixel();
        self.offset(point)
            .map_or([0; 4], |o| self.color_model.decode(&self.data[o..o + bpp]))
    }

    /// Raw native bytes of `rect`, tightly packed
    #[must_use]
    pub fn read_bytes(&self, rect: Rect) -> Vec<u8> {
        let bpp = self.color_model.bytes_per_pixel();
        let row_bytes = rect.width as usize * bpp;
        let mut out = vec![0u8; rect.extent().pixel_count() * bpp];
        let area = rect.intersected(&self.bounds);
        for y in area.top()..area.bottom() {
            let Some(src) = self.offset(Point::new(area.left(), y)) else {
                continue;
            };
            let len = area.width as usize * bpp;
            let dst = (y - rect.y) as usize * row_bytes + (area.left() - rect.x) as usize * bpp;
            out[dst..dst + len].copy_from_slice(&self.data[src..src + len]);
        }
        out
    }

    /// `rect` converted to 8-bit RGBA
    #[must_use]
    pub fn to_rgba8(&self, rect: Rect) -> RgbaImage {
        RgbaImage::from_fn(rect.width, rect.height, |x, y| {
            Rgba(self.pixel(Point::new(rect.x + x as i32, rect.y + y as i32)))
        })
    }

    /// Write `image` at `origin`, clipped to the storage rectangle
    ///
    /// With a selection, each pixel is blended with the existing one by the
    /// selection degree; unselected pixels stay untouched.
    pub fn write_rgba8(
        &mut self,
        origin: Point,
        image: &RgbaImage,
        selection: Option<&PixelSelection>,
    ) {
        let bpp = self.color_model.bytes_per_pixel();
        let target = Rect::new(origin.x, origin.y, image.width(), image.height());
        let area = target.intersected(&self.bounds);
        for y in area.top()..area.bottom() {
            for x in area.left()..area.right() {
                let point = Point::new(x, y);
                let src = image.get_pixel((x - origin.x) as u32, (y - origin.y) as u32).0;
                let weight = selection.map_or(255, |s| s.value(point));
                if weight == 0 {
                    continue;
                }
                let value = if weight == 255 {
                    src
                } else {
                    blend(self.pixel(point), src, weight)
                };
                if let Some(o) = self.offset(point) {
                    self.color_model.encode(value, &mut self.data[o..o + bpp]);
                }
            }
        }
    }

    /// Source-over composite `other` on top of `self`
    pub fn composite_over(&mut self, other: &PaintDevice) {
        let area = other.exact_bounds().intersected(&self.bounds);
        let bpp = self.color_model.bytes_per_pixel();
        for y in area.top()..area.bottom() {
            for x in area.left()..area.right() {
                let point = Point::new(x, y);
                let src = other.pixel(point);
                if src[3] == 0 {
                    continue;
                }
                let value = source_over(self.pixel(point), src);
                if let Some(o) = self.offset(point) {
                    self.color_model.encode(value, &mut self.data[o..o + bpp]);
                }
            }
        }
    }
}

fn blend(dst: [u8; 4], src: [u8; 4], weight: u8) -> [u8; 4] {
    let w = u32::from(weight);
    let mut out = [0u8; 4];
    for i in 0..4 {
        out[i] = ((u32::from(src[i]) * w + u32::from(dst[i]) * (255 - w) + 127) / 255) as u8;
    }
    out
}

fn source_over(dst: [u8; 4], src: [u8; 4]) -> [u8; 4] {
    let sa = f32::from(src[3]) / 255.0;
    let da = f32::from(dst[3]) / 255.0;
    let out_a = sa + da * (1.0 - sa);
    if out_a <= 0.0 {
        return [0; 4];
    }
    let mut out = [0u8; 4];
    for i in 0..3 {
        let c = (f32::from(src[i]) * sa + f32::from(dst[i]) * da * (1.0 - sa)) / out_a;
        out[i] = c.round().clamp(0.0, 255.0) as u8;
    }
    out[3] = (out_a * 255.0).round() as u8;
    out
}

/// Layer role; only paint layers hold editable pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    Paint,
    Group,
}

/// A layer node sharing its paint device with the host
#[derive(Debug, Clone)]
pub struct Layer {
    id: NodeId,
    name: String,
    kind: LayerKind,
    color_label: u8,
    visible: bool,
    device: Arc<RwLock<PaintDevice>>,
}

impl Layer {
    /// Visible paint layer without a color label
    #[must_use]
    pub fn paint(name: impl Into<String>, device: PaintDevice) -> Self {
        Self {
            id: NodeId::new(),
            name: name.into(),
            kind: LayerKind::Paint,
            color_label: 0,
            visible: true,
            device: Arc::new(RwLock::new(device)),
        }
    }

    /// Visible group layer holding a cached projection
    #[must_use]
    pub fn group(name: impl Into<String>, device: PaintDevice) -> Self {
        Self {
            kind: LayerKind::Group,
            ..Self::paint(name, device)
        }
    }

    #[must_use]
    pub fn with_color_label(mut self, label: u8) -> Self {
        self.color_label = label;
        self
    }

    #[must_use]
    pub fn with_visible(mut self, visible: bool) -> Self {
        self.visible = visible;
        self
    }

    #[must_use]
    pub const fn id(&self) -> NodeId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn kind(&self) -> LayerKind {
        self.kind
    }

    #[must_use]
    pub const fn color_label(&self) -> u8 {
        self.color_label
    }

    #[must_use]
    pub const fn is_visible(&self) -> bool {
        self.visible
    }

    #[must_use]
    pub fn device(&self) -> Arc<RwLock<PaintDevice>> {
        Arc::clone(&self.device)
    }

    /// Shared read access to the device
    ///
    /// # Errors
    /// - The device lock was poisoned by a panicking writer
    pub fn read_device(&self) -> Result<RwLockReadGuard<'_, PaintDevice>> {
        self.device
            .read()
            .map_err(|_| VisionError::internal(format!("Device of layer '{}' is poisoned", self.name)))
    }

    /// Exclusive write access to the device
    ///
    /// # Errors
    /// - The device lock was poisoned by a panicking writer
    pub fn write_device(&self) -> Result<RwLockWriteGuard<'_, PaintDevice>> {
        self.device
            .write()
            .map_err(|_| VisionError::internal(format!("Device of layer '{}' is poisoned", self.name)))
    }
}

/// A layered document with a global selection
#[derive(Debug)]
pub struct Document {
    id: DocumentId,
    size: Extent,
    layers: RwLock<Vec<Layer>>,
    selection: RwLock<Option<PixelSelection>>,
}

impl Document {
    #[must_use]
    pub fn new(size: Extent) -> Self {
        Self {
            id: DocumentId::new(),
            size,
            layers: RwLock::new(Vec::new()),
            selection: RwLock::new(None),
        }
    }

    #[must_use]
    pub const fn id(&self) -> DocumentId {
        self.id
    }

    #[must_use]
    pub const fn size(&self) -> Extent {
        self.size
    }

    #[must_use]
    pub const fn bounds(&self) -> Rect {
        Rect::from_extent(self.size)
    }

    /// Append `layer` on top of the stack
    pub fn add_layer(&self, layer: Layer) -> NodeId {
        let id = layer.id();
        if let Ok(mut layers) = self.layers.write() {
            layers.push(layer);
        }
        id
    }

    /// Layers bottom to top
    #[must_use]
    pub fn layers(&self) -> Vec<Layer> {
        self.layers.read().map(|l| l.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn layer(&self, id: NodeId) -> Option<Layer> {
        self.layers
            .read()
            .ok()
            .and_then(|layers| layers.iter().find(|l| l.id() == id).cloned())
    }

    fn composite<F>(&self, include: F) -> Result<PaintDevice>
    where
        F: Fn(&Layer) -> bool,
    {
        let mut out = PaintDevice::new(ColorModel::Bgra8, self.bounds());
        for layer in self.layers().iter().filter(|l| l.is_visible() && include(l)) {
            let device = layer.read_device()?;
            out.composite_over(&device);
        }
        Ok(out)
    }

    /// Flattened image of all visible layers
    ///
    /// # Errors
    /// - A layer device lock is poisoned
    pub fn projection(&self) -> Result<PaintDevice> {
        self.composite(|_| true)
    }

    /// Flattened image of the visible layers whose color label is in `labels`
    ///
    /// The result is fully transparent when no layer matches.
    ///
    /// # Errors
    /// - A layer device lock is poisoned
    pub fn merge_color_labeled_layers(&self, labels: &[u8]) -> Result<PaintDevice> {
        self.composite(|layer| labels.contains(&layer.color_label()))
    }

    /// Current global selection, if any
    #[must_use]
    pub fn selection(&self) -> Option<PixelSelection> {
        self.selection.read().ok().and_then(|s| s.clone())
    }

    pub fn set_selection(&self, selection: Option<PixelSelection>) {
        if let Ok(mut current) = self.selection.write() {
            *current = selection.filter(|s| !s.is_empty());
        }
    }

    pub fn deselect(&self) {
        self.set_selection(None);
    }

    /// Combine `incoming` into the global selection; an empty result deselects
    pub fn apply_selection(&self, incoming: &PixelSelection, action: SelectionAction) {
        if let Ok(mut current) = self.selection.write() {
            let mut combined = current
                .take()
                .unwrap_or_else(|| PixelSelection::new(self.bounds()));
            combined.combine(incoming, action);
            *current = if combined.is_empty() { None } else { Some(combined) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(size: u32, rect: Rect, color: [u8; 4]) -> RgbaImage {
        RgbaImage::from_fn(size, size, |x, y| {
            if rect.contains(Point::new(x as i32, y as i32)) {
                Rgba(color)
            } else {
                Rgba([0, 0, 0, 0])
            }
        })
    }

    #[test]
    fn test_exact_bounds() {
        let image = square(16, Rect::new(3, 4, 5, 6), [10, 20, 30, 255]);
        let device = PaintDevice::from_rgba_image(ColorModel::Bgra8, &image, Point::new(10, 10));
        assert_eq!(device.exact_bounds(), Rect::new(13, 14, 5, 6));
        assert!(PaintDevice::new(ColorModel::GrayA8, Rect::new(0, 0, 4, 4))
            .exact_bounds()
            .is_empty());
    }

    #[test]
    fn test_color_models_round_trip_through_rgba() {
        let image = square(4, Rect::new(0, 0, 4, 4), [200, 100, 50, 255]);
        let bgra = PaintDevice::from_rgba_image(ColorModel::Bgra8, &image, Point::default());
        assert_eq!(&bgra.read_bytes(Rect::new(0, 0, 1, 1)), &[50, 100, 200, 255]);

        let deep = PaintDevice::from_rgba_image(ColorModel::Rgba16, &image, Point::default());
        assert_eq!(deep.pixel(Point::new(2, 2)), [200, 100, 50, 255]);
        assert_eq!(deep.read_bytes(Rect::new(0, 0, 1, 1)).len(), 8);
    }

    #[test]
    fn test_read_bytes_pads_outside_storage() {
        let image = square(2, Rect::new(0, 0, 2, 2), [1, 2, 3, 4]);
        let device = PaintDevice::from_rgba_image(ColorModel::Bgra8, &image, Point::default());
        let bytes = device.read_bytes(Rect::new(1, 0, 2, 1));
        assert_eq!(bytes, vec![3, 2, 1, 4, 0, 0, 0, 0]);
    }

    #[test]
    fn test_write_respects_selection() {
        let mut device = PaintDevice::new(ColorModel::Bgra8, Rect::new(0, 0, 4, 4));
        let selection = PixelSelection::from_rect(Rect::new(0, 0, 4, 4), Rect::new(0, 0, 2, 4));
        let red = square(4, Rect::new(0, 0, 4, 4), [255, 0, 0, 255]);
        device.write_rgba8(Point::default(), &red, Some(&selection));
        assert_eq!(device.pixel(Point::new(1, 1)), [255, 0, 0, 255]);
        assert_eq!(device.pixel(Point::new(3, 1)), [0, 0, 0, 0]);
    }

    #[test]
    fn test_projection_and_color_label_merge() -> Result<()> {
        let doc = Document::new(Extent::new(8, 8));
        let bottom = square(8, Rect::new(0, 0, 8, 8), [0, 0, 255, 255]);
        let top = square(8, Rect::new(2, 2, 2, 2), [255, 0, 0, 255]);
        doc.add_layer(Layer::paint(
            "bottom",
            PaintDevice::from_rgba_image(ColorModel::Bgra8, &bottom, Point::default()),
        ));
        doc.add_layer(
            Layer::paint(
                "top",
                PaintDevice::from_rgba_image(ColorModel::Bgra8, &top, Point::default()),
            )
            .with_color_label(3),
        );

        let projection = doc.projection()?;
        assert_eq!(projection.pixel(Point::new(2, 2)), [255, 0, 0, 255]);
        assert_eq!(projection.pixel(Point::new(6, 6)), [0, 0, 255, 255]);

        let merged = doc.merge_color_labeled_layers(&[3])?;
        assert_eq!(merged.exact_bounds(), Rect::new(2, 2, 2, 2));
        assert!(doc.merge_color_labeled_layers(&[5])?.exact_bounds().is_empty());
        Ok(())
    }

    #[test]
    fn test_apply_selection_deselects_on_empty_result() {
        let doc = Document::new(Extent::new(4, 4));
        let left = PixelSelection::from_rect(doc.bounds(), Rect::new(0, 0, 2, 4));
        doc.apply_selection(&left, SelectionAction::Replace);
        assert!(doc.selection().is_some());

        doc.apply_selection(&left, SelectionAction::Subtract);
        assert!(doc.selection().is_none());

        doc.apply_selection(&left, SelectionAction::Intersect);
        assert!(doc.selection().is_none());
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(NodeId::new(), NodeId::new());
        assert_ne!(CanvasId::new().get(), CanvasId::new().get());
    }
}

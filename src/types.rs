//! Geometry and pixel buffer types shared between tools and inference backends

use crate::error::{Result, VisionError};
use image::{GrayImage, RgbaImage};
use serde::{Deserialize, Serialize};

/// Integer pixel position in document coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    #[must_use]
    pub const fn translated(self, dx: i32, dy: i32) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }
}

/// Width and height of an image region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

impl Extent {
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    #[must_use]
    pub const fn pixel_count(self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Axis-aligned rectangle. `right()` and `bottom()` are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    #[must_use]
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Rectangle spanned by two drag corners, in either order
    #[must_use]
    pub fn from_corners(a: Point, b: Point) -> Self {
        let left = a.x.min(b.x);
        let top = a.y.min(b.y);
        let right = a.x.max(b.x);
        let bottom = a.y.max(b.y);
        Self::from_edges(left, top, right, bottom)
    }

    /// Builds a rect from exclusive edges, collapsing to empty when inverted
    #[must_use]
    pub fn from_edges(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        let width = (i64::from(right) - i64::from(left)).max(0) as u32;
        let height = (i64::from(bottom) - i64::from(top)).max(0) as u32;
        Self::new(left, top, width, height)
    }

    #[must_use]
    pub const fn from_extent(extent: Extent) -> Self {
        Self::new(0, 0, extent.width, extent.height)
    }

    #[must_use]
    pub const fn left(&self) -> i32 {
        self.x
    }

    #[must_use]
    pub const fn top(&self) -> i32 {
        self.y
    }

    #[must_use]
    pub const fn right(&self) -> i32 {
        self.x + self.width as i32
    }

    #[must_use]
    pub const fn bottom(&self) -> i32 {
        self.y + self.height as i32
    }

    #[must_use]
    pub const fn top_left(&self) -> Point {
        Point::new(self.x, self.y)
    }

    #[must_use]
    pub const fn extent(&self) -> Extent {
        Extent::new(self.width, self.height)
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    #[must_use]
    pub const fn contains(&self, point: Point) -> bool {
        point.x >= self.left()
            && point.x < self.right()
            && point.y >= self.top()
            && point.y < self.bottom()
    }

    /// True when `other` lies entirely inside `self`
    #[must_use]
    pub const fn contains_rect(&self, other: &Rect) -> bool {
        other.left() >= self.left()
            && other.top() >= self.top()
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    #[must_use]
    pub fn intersected(&self, other: &Rect) -> Rect {
        let rect = Rect::from_edges(
            self.left().max(other.left()),
            self.top().max(other.top()),
            self.right().min(other.right()),
            self.bottom().min(other.bottom()),
        );
        if rect.is_empty() {
            Rect::default()
        } else {
            rect
        }
    }

    #[must_use]
    pub fn intersects(&self, other: &Rect) -> bool {
        !self.intersected(other).is_empty()
    }

    /// Smallest rectangle covering both; empty operands are ignored
    #[must_use]
    pub fn united(&self, other: &Rect) -> Rect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Rect::from_edges(
            self.left().min(other.left()),
            self.top().min(other.top()),
            self.right().max(other.right()),
            self.bottom().max(other.bottom()),
        )
    }

    #[must_use]
    pub const fn translated(&self, dx: i32, dy: i32) -> Rect {
        Rect::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    /// Moves each edge outward by the given amounts (negative values shrink)
    #[must_use]
    pub fn adjusted(&self, left: i32, top: i32, right: i32, bottom: i32) -> Rect {
        Rect::from_edges(
            self.left() - left,
            self.top() - top,
            self.right() + right,
            self.bottom() + bottom,
        )
    }
}

/// Channel layout of a pixel buffer handed to or received from a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelLayout {
    /// Native 4-byte editor layout, read byte-for-byte with channels reversed
    Bgra8,
    /// The fixed layout backends consume after conversion and emit for images
    Rgba8,
    /// Single channel masks
    Alpha8,
}

impl PixelLayout {
    #[must_use]
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Bgra8 | Self::Rgba8 => 4,
            Self::Alpha8 => 1,
        }
    }

    #[must_use]
    pub const fn is_channels_reversed(self) -> bool {
        matches!(self, Self::Bgra8)
    }
}

/// Borrowed view over a pixel buffer with an explicit row stride
#[derive(Debug, Clone, Copy)]
pub struct ImageView<'a> {
    data: &'a [u8],
    stride: usize,
    extent: Extent,
    layout: PixelLayout,
}

impl<'a> ImageView<'a> {
    /// Create a view, checking that the buffer covers every row
    ///
    /// # Errors
    /// - Stride shorter than one row of pixels
    /// - Buffer too small for `extent` at the given stride
    pub fn new(data: &'a [u8], stride: usize, extent: Extent, layout: PixelLayout) -> Result<Self> {
        let row_bytes = extent.width as usize * layout.bytes_per_pixel();
        if stride < row_bytes {
            return Err(VisionError::processing(format!(
                "Stride {stride} is shorter than a row of {row_bytes} bytes"
            )));
        }
        let required = if extent.height == 0 {
            0
        } else {
            stride * (extent.height as usize - 1) + row_bytes
        };
        if data.len() < required {
            return Err(VisionError::processing(format!(
                "Pixel buffer holds {} bytes, {} required for {}x{}",
                data.len(),
                required,
                extent.width,
                extent.height
            )));
        }
        Ok(Self { data, stride, extent, layout })
    }

    #[must_use]
    pub const fn extent(&self) -> Extent {
        self.extent
    }

    #[must_use]
    pub const fn layout(&self) -> PixelLayout {
        self.layout
    }

    #[must_use]
    pub const fn stride(&self) -> usize {
        self.stride
    }

    #[must_use]
    pub const fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Bytes of row `y` without the stride padding
    #[must_use]
    pub fn row(&self, y: u32) -> &'a [u8] {
        let start = y as usize * self.stride;
        let len = self.extent.width as usize * self.layout.bytes_per_pixel();
        &self.data[start..start + len]
    }

    /// Pixel at `(x, y)` as RGBA regardless of the view layout
    #[must_use]
    pub fn rgba_at(&self, x: u32, y: u32) -> [u8; 4] {
        let bpp = self.layout.bytes_per_pixel();
        let offset = y as usize * self.stride + x as usize * bpp;
        let px = &self.data[offset..offset + bpp];
        match self.layout {
            PixelLayout::Bgra8 => [px[2], px[1], px[0], px[3]],
            PixelLayout::Rgba8 => [px[0], px[1], px[2], px[3]],
            PixelLayout::Alpha8 => [px[0], px[0], px[0], 255],
        }
    }

    /// Copies the visible pixels into a tightly packed RGBA image
    #[must_use]
    pub fn to_rgba_image(&self) -> RgbaImage {
        RgbaImage::from_fn(self.extent.width, self.extent.height, |x, y| {
            image::Rgba(self.rgba_at(x, y))
        })
    }
}

/// Owned, tightly packed pixel buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    data: Vec<u8>,
    extent: Extent,
    layout: PixelLayout,
}

impl ImageData {
    /// Zero-filled buffer
    #[must_use]
    pub fn new(extent: Extent, layout: PixelLayout) -> Self {
        Self {
            data: vec![0; extent.pixel_count() * layout.bytes_per_pixel()],
            extent,
            layout,
        }
    }

    /// Wrap an existing buffer
    ///
    /// # Errors
    /// - Buffer length does not match `extent` and `layout`
    pub fn from_raw(extent: Extent, layout: PixelLayout, data: Vec<u8>) -> Result<Self> {
        let expected = extent.pixel_count() * layout.bytes_per_pixel();
        if data.len() != expected {
            return Err(VisionError::processing(format!(
                "Expected {expected} bytes for {}x{} {:?}, got {}",
                extent.width,
                extent.height,
                layout,
                data.len()
            )));
        }
        Ok(Self { data, extent, layout })
    }

    #[must_use]
    pub fn from_gray(mask: GrayImage) -> Self {
        let extent = Extent::new(mask.width(), mask.height());
        Self {
            data: mask.into_raw(),
            extent,
            layout: PixelLayout::Alpha8,
        }
    }

    #[must_use]
    pub fn from_rgba(image: RgbaImage) -> Self {
        let extent = Extent::new(image.width(), image.height());
        Self {
            data: image.into_raw(),
            extent,
            layout: PixelLayout::Rgba8,
        }
    }

    #[must_use]
    pub const fn extent(&self) -> Extent {
        self.extent
    }

    #[must_use]
    pub const fn layout(&self) -> PixelLayout {
        self.layout
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    #[must_use]
    pub fn into_raw(self) -> Vec<u8> {
        self.data
    }

    #[must_use]
    pub fn stride(&self) -> usize {
        self.extent.width as usize * self.layout.bytes_per_pixel()
    }

    #[must_use]
    pub fn view(&self) -> ImageView<'_> {
        ImageView {
            data: &self.data,
            stride: self.stride(),
            extent: self.extent,
            layout: self.layout,
        }
    }

    /// Reinterpret an `Alpha8` buffer as a grayscale image
    ///
    /// # Errors
    /// - Layout is not `Alpha8`
    pub fn into_gray(self) -> Result<GrayImage> {
        if self.layout != PixelLayout::Alpha8 {
            return Err(VisionError::unsupported_format(format!(
                "Expected an Alpha8 mask, got {:?}",
                self.layout
            )));
        }
        GrayImage::from_raw(self.extent.width, self.extent.height, self.data)
            .ok_or_else(|| VisionError::internal("Mask buffer size mismatch"))
    }
}

/// User prompt for a segmentation query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Prompt {
    Point(Point),
    Rect(Rect),
}

impl Prompt {
    #[must_use]
    pub fn translated(self, dx: i32, dy: i32) -> Self {
        match self {
            Self::Point(p) => Self::Point(p.translated(dx, dy)),
            Self::Rect(r) => Self::Rect(r.translated(dx, dy)),
        }
    }
}

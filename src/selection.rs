//! Pixel selections and how new selections combine with the existing one

use crate::error::{Result, VisionError};
use crate::types::{ImageData, PixelLayout, Point, Rect};
use image::GrayImage;
use serde::{Deserialize, Serialize};

/// How a freshly computed selection combines with the document selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionAction {
    #[default]
    Replace,
    Add,
    Subtract,
    Intersect,
    SymmetricDifference,
}

impl SelectionAction {
    fn combine(self, current: u8, incoming: u8) -> u8 {
        match self {
            Self::Replace => incoming,
            Self::Add => current.max(incoming),
            Self::Subtract => current.saturating_sub(incoming),
            Self::Intersect => current.min(incoming),
            Self::SymmetricDifference => current.max(incoming) - current.min(incoming),
        }
    }
}

/// Post-processing and combine options for a computed selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SelectionOptions {
    pub action: SelectionAction,
    /// Positive grows, negative shrinks, in pixels
    pub grow: i32,
    /// Feather radius in pixels
    pub feather: u32,
    pub anti_alias: bool,
}

impl SelectionOptions {
    #[must_use]
    pub fn with_action(mut self, action: SelectionAction) -> Self {
        self.action = action;
        self
    }

    #[must_use]
    pub fn with_grow(mut self, grow: i32) -> Self {
        self.grow = grow;
        self
    }

    #[must_use]
    pub fn with_feather(mut self, feather: u32) -> Self {
        self.feather = feather;
        self
    }

    #[must_use]
    pub fn with_anti_alias(mut self, anti_alias: bool) -> Self {
        self.anti_alias = anti_alias;
        self
    }
}

/// 8-bit selection mask covering a fixed rectangle of the document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelSelection {
    bounds: Rect,
    mask: GrayImage,
}

impl PixelSelection {
    /// Empty selection covering `bounds`
    #[must_use]
    pub fn new(bounds: Rect) -> Self {
        Self {
            bounds,
            mask: GrayImage::new(bounds.width, bounds.height),
        }
    }

    /// Selection covering `bounds` with everything selected
    #[must_use]
    pub fn full(bounds: Rect) -> Self {
        Self {
            bounds,
            mask: GrayImage::from_pixel(bounds.width, bounds.height, image::Luma([255])),
        }
    }

    /// Selection of `rect`, clipped to `bounds`
    #[must_use]
    pub fn from_rect(bounds: Rect, rect: Rect) -> Self {
        let mut selection = Self::new(bounds);
        let area = rect.intersected(&bounds);
        for y in area.top()..area.bottom() {
            for x in area.left()..area.right() {
                selection.set_value(Point::new(x, y), 255);
            }
        }
        selection
    }

    /// Storage bounds in document coordinates; never changed by filters
    #[must_use]
    pub const fn bounds(&self) -> Rect {
        self.bounds
    }

    #[must_use]
    pub fn mask(&self) -> &GrayImage {
        &self.mask
    }

    #[must_use]
    pub fn mask_mut(&mut self) -> &mut GrayImage {
        &mut self.mask
    }

    /// Selection degree at a document position; 0 outside the bounds
    #[must_use]
    pub fn value(&self, point: Point) -> u8 {
        if !self.bounds.contains(point) {
            return 0;
        }
        let x = (point.x - self.bounds.x) as u32;
        let y = (point.y - self.bounds.y) as u32;
        self.mask.get_pixel(x, y).0[0]
    }

    pub fn set_value(&mut self, point: Point, value: u8) {
        if self.bounds.contains(point) {
            let x = (point.x - self.bounds.x) as u32;
            let y = (point.y - self.bounds.y) as u32;
            self.mask.put_pixel(x, y, image::Luma([value]));
        }
    }

    /// Overwrite the selection with `mask` placed at `origin`, clipped to the bounds
    ///
    /// # Errors
    /// - `mask` is not `Alpha8`
    pub fn write_bytes(&mut self, origin: Point, mask: &ImageData) -> Result<()> {
        if mask.layout() != PixelLayout::Alpha8 {
            return Err(VisionError::unsupported_format(format!(
                "Selection masks must be Alpha8, got {:?}",
                mask.layout()
            )));
        }
        let target = Rect::new(origin.x, origin.y, mask.extent().width, mask.extent().height);
        let area = target.intersected(&self.bounds);
        let src_stride = mask.stride();
        for y in area.top()..area.bottom() {
            let src_row = (y - origin.y) as usize * src_stride;
            for x in area.left()..area.right() {
                let value = mask.data()[src_row + (x - origin.x) as usize];
                self.set_value(Point::new(x, y), value);
            }
        }
        Ok(())
    }

    /// Tight bounding box of selected pixels
    #[must_use]
    pub fn selected_rect(&self) -> Rect {
        let mut found: Option<(u32, u32, u32, u32)> = None;
        for (x, y, px) in self.mask.enumerate_pixels() {
            if px.0[0] == 0 {
                continue;
            }
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
                x1 - x0 + 1,
                y1 - y0 + 1,
            ),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mask.pixels().all(|px| px.0[0] == 0)
    }

    /// Combine `other` into `self` in place
    pub fn combine(&mut self, other: &PixelSelection, action: SelectionAction) {
        let (ox, oy) = (self.bounds.x, self.bounds.y);
        for (x, y, px) in self.mask.enumerate_pixels_mut() {
            let incoming = other.value(Point::new(ox + x as i32, oy + y as i32));
            px.0[0] = action.combine(px.0[0], incoming);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Extent;

    fn doc_bounds() -> Rect {
        Rect::new(0, 0, 8, 8)
    }

    #[test]
    fn test_write_bytes_clips_to_bounds() -> Result<()> {
        let mut selection = PixelSelection::new(doc_bounds());
        let mask = ImageData::from_raw(Extent::new(4, 4), PixelLayout::Alpha8, vec![200; 16])?;
        selection.write_bytes(Point::new(6, 6), &mask)?;
        assert_eq!(selection.selected_rect(), Rect::new(6, 6, 2, 2));
        assert_eq!(selection.value(Point::new(7, 7)), 200);
        assert_eq!(selection.bounds(), doc_bounds());
        Ok(())
    }

    #[test]
    fn test_write_bytes_rejects_color_buffers() {
        let mut selection = PixelSelection::new(doc_bounds());
        let rgba = ImageData::new(Extent::new(2, 2), PixelLayout::Rgba8);
        assert!(selection.write_bytes(Point::default(), &rgba).is_err());
    }

    #[test]
    fn test_combine_actions() {
        let a = PixelSelection::from_rect(doc_bounds(), Rect::new(0, 0, 4, 8));
        let b = PixelSelection::from_rect(doc_bounds(), Rect::new(2, 0, 4, 8));

        let mut add = a.clone();
        add.combine(&b, SelectionAction::Add);
        assert_eq!(add.selected_rect(), Rect::new(0, 0, 6, 8));

        let mut subtract = a.clone();
        subtract.combine(&b, SelectionAction::Subtract);
        assert_eq!(subtract.selected_rect(), Rect::new(0, 0, 2, 8));

        let mut intersect = a.clone();
        intersect.combine(&b, SelectionAction::Intersect);
        assert_eq!(intersect.selected_rect(), Rect::new(2, 0, 2, 8));

        let mut xor = a.clone();
        xor.combine(&b, SelectionAction::SymmetricDifference);
        assert_eq!(xor.value(Point::new(1, 0)), 255);
        assert_eq!(xor.value(Point::new(3, 0)), 0);
        assert_eq!(xor.value(Point::new(5, 0)), 255);

        let mut replace = a;
        replace.combine(&b, SelectionAction::Replace);
        assert_eq!(replace, b);
    }

    #[test]
    fn test_empty_selection() {
        let selection = PixelSelection::new(doc_bounds());
        assert!(selection.is_empty());
        assert!(selection.selected_rect().is_empty());
        assert!(!PixelSelection::full(doc_bounds()).is_empty());
    }
}

//! Writes a computed mask into a selection and post-processes it
//!
//! Order of operations: write the mask bytes, then grow (`grow > 0`) or
//! shrink (`grow < 0`), then feather (`feather > 0`) or otherwise
//! anti-alias. Feather and anti-alias never both run. Everything happens in
//! place; the selection bounds are never changed.

use crate::error::Result;
use crate::selection::{PixelSelection, SelectionOptions};
use crate::types::{ImageData, Point, Rect};
use crate::utils::selection_filters;
use tracing::debug;

pub struct MaskApplicationPipeline;

impl MaskApplicationPipeline {
    /// Apply `mask` placed at `origin` to `selection`
    ///
    /// # Errors
    /// - `mask` is not an `Alpha8` buffer
    pub fn apply(
        selection: &mut PixelSelection,
        mask: &ImageData,
        origin: Point,
        options: &SelectionOptions,
    ) -> Result<()> {
        selection.write_bytes(origin, mask)?;

        let steps = Self::adjust(selection, options);
        debug!(
            origin = ?origin,
            width = mask.extent().width,
            height = mask.extent().height,
            steps = ?steps,
            "Applied mask to selection"
        );
        Ok(())
    }

    /// Fresh selection over `bounds` holding the processed mask
    ///
    /// # Errors
    /// - `mask` is not an `Alpha8` buffer
    pub fn to_selection(
        bounds: Rect,
        mask: &ImageData,
        origin: Point,
        options: &SelectionOptions,
    ) -> Result<PixelSelection> {
        let mut selection = PixelSelection::new(bounds);
        Self::apply(&mut selection, mask, origin, options)?;
        Ok(selection)
    }

    fn adjust(selection: &mut PixelSelection, options: &SelectionOptions) -> Vec<&'static str> {
        let mut steps = Vec::new();
        let mask = selection.mask_mut();

        if options.grow > 0 {
            selection_filters::grow(mask, options.grow.unsigned_abs());
            steps.push("grow");
        } else if options.grow < 0 {
            selection_filters::shrink(mask, options.grow.unsigned_abs());
            steps.push("shrink");
        }

        if options.feather > 0 {
            selection_filters::feather(mask, options.feather);
            steps.push("feather");
        } else if options.anti_alias {
            selection_filters::anti_alias(mask);
            steps.push("anti_alias");
        }
        steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Extent, PixelLayout};

    fn block_mask(size: u32) -> ImageData {
        ImageData::from_raw(
            Extent::new(size, size),
            PixelLayout::Alpha8,
            vec![255; (size * size) as usize],
        )
        .unwrap()
    }

    fn bounds() -> Rect {
        Rect::new(0, 0, 32, 32)
    }

    #[test]
    fn test_plain_write_at_origin() -> Result<()> {
        let selection = MaskApplicationPipeline::to_selection(
            bounds(),
            &block_mask(4),
            Point::new(10, 12),
            &SelectionOptions::default(),
        )?;
        assert_eq!(selection.selected_rect(), Rect::new(10, 12, 4, 4));
        Ok(())
    }

    #[test]
    fn test_grow_and_shrink() -> Result<()> {
        let grown = MaskApplicationPipeline::to_selection(
            bounds(),
            &block_mask(4),
            Point::new(10, 10),
            &SelectionOptions::default().with_grow(2),
        )?;
        assert_eq!(grown.selected_rect(), Rect::new(8, 8, 8, 8));

        let shrunk = MaskApplicationPipeline::to_selection(
            bounds(),
            &block_mask(6),
            Point::new(10, 10),
            &SelectionOptions::default().with_grow(-1),
        )?;
        assert_eq!(shrunk.selected_rect(), Rect::new(11, 11, 4, 4));
        Ok(())
    }

    #[test]
    fn test_feather_takes_precedence_over_anti_alias() -> Result<()> {
        let options = SelectionOptions::default()
            .with_feather(3)
            .with_anti_alias(true);
        let feathered = MaskApplicationPipeline::to_selection(
            bounds(),
            &block_mask(8),
            Point::new(12, 12),
            &options,
        )?;

        let mut expected = PixelSelection::new(bounds());
        expected.write_bytes(Point::new(12, 12), &block_mask(8))?;
        selection_filters::feather(expected.mask_mut(), 3);

        assert_eq!(feathered, expected);
        Ok(())
    }

    #[test]
    fn test_anti_alias_without_feather() -> Result<()> {
        let selection = MaskApplicationPipeline::to_selection(
            bounds(),
            &block_mask(8),
            Point::new(12, 12),
            &SelectionOptions::default().with_anti_alias(true),
        )?;
        let corner = selection.value(Point::new(12, 12));
        assert!(corner > 0 && corner < 255);
        Ok(())
    }

    #[test]
    fn test_bounds_never_change() -> Result<()> {
        let selection = MaskApplicationPipeline::to_selection(
            bounds(),
            &block_mask(4),
            Point::new(30, 30),
            &SelectionOptions::default().with_grow(5).with_feather(2),
        )?;
        assert_eq!(selection.bounds(), bounds());
        Ok(())
    }
}

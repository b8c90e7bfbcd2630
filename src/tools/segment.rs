//! Segment-from-point and segment-from-box selection tools

use crate::error::Result;
use crate::pipeline::MaskApplicationPipeline;
use crate::queue::{Task, WorkQueueHandle};
use crate::selection::{SelectionAction, SelectionOptions};
use crate::session::{EncodeOutcome, ImageInput, MaskPrediction, SegmentationMode, SegmentationSession};
use crate::types::{Point, Prompt, Rect};
use std::sync::Arc;
use tracing::{debug, info};

/// Prompt shape a tool produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentationShape {
    Point,
    Box,
}

/// A selection tool backed by a shared [`SegmentationSession`]
///
/// All methods return immediately; inference runs on the work queue and
/// failures arrive through the error reporter.
#[derive(Debug, Clone)]
pub struct SegmentationTool {
    shape: SegmentationShape,
    session: Arc<SegmentationSession>,
    queue: WorkQueueHandle,
}

impl SegmentationTool {
    #[must_use]
    pub fn new(shape: SegmentationShape, session: Arc<SegmentationSession>, queue: WorkQueueHandle) -> Self {
        Self { shape, session, queue }
    }

    /// Point tool
    #[must_use]
    pub fn from_point(session: Arc<SegmentationSession>, queue: WorkQueueHandle) -> Self {
        Self::new(SegmentationShape::Point, session, queue)
    }

    /// Box tool
    #[must_use]
    pub fn from_rect(session: Arc<SegmentationSession>, queue: WorkQueueHandle) -> Self {
        Self::new(SegmentationShape::Box, session, queue)
    }

    #[must_use]
    pub const fn shape(&self) -> SegmentationShape {
        self.shape
    }

    #[must_use]
    pub fn session(&self) -> &Arc<SegmentationSession> {
        &self.session
    }

    /// Start of a box drag: encode now so the image is ready on release
    ///
    /// # Errors
    /// - The work queue has shut down
    pub fn begin_shape(&self, input: &ImageInput) -> Result<()> {
        self.process_image(input)
    }

    /// Queue an encode of `input`; nothing happens in precise mode
    ///
    /// # Errors
    /// - The work queue has shut down
    pub fn process_image(&self, input: &ImageInput) -> Result<()> {
        if self.session.mode() == SegmentationMode::Precise {
            return Ok(());
        }
        self.queue.submit(Box::new(EncodeTask {
            session: Arc::clone(&self.session),
            input: input.clone(),
        }))
    }

    /// Select the object under `point` (document coordinates)
    ///
    /// # Errors
    /// - The work queue has shut down
    pub fn click(&self, input: &ImageInput, point: Point, options: SelectionOptions) -> Result<()> {
        self.submit_select(input, Prompt::Point(point), options)
    }

    /// Select the object inside `rect` (document coordinates)
    ///
    /// `rect` is clipped to the document first. An empty result never reaches
    /// the model: with replace or intersect it clears the selection, with any
    /// other action it does nothing.
    ///
    /// # Errors
    /// - The work queue has shut down
    pub fn finish_rect(&self, input: &ImageInput, rect: Rect, options: SelectionOptions) -> Result<()> {
        let rect = rect.intersected(&input.document.bounds());
        if rect.is_empty() {
            match options.action {
                SelectionAction::Replace | SelectionAction::Intersect => {
                    debug!("Empty rectangle, clearing selection");
                    input.document.deselect();
                },
                SelectionAction::Add | SelectionAction::Subtract | SelectionAction::SymmetricDifference => {
                    debug!("Empty rectangle, nothing to do");
                },
            }
            return Ok(());
        }
        self.submit_select(input, Prompt::Rect(rect), options)
    }

    fn submit_select(&self, input: &ImageInput, prompt: Prompt, options: SelectionOptions) -> Result<()> {
        self.queue.submit(Box::new(SelectSegmentTask {
            session: Arc::clone(&self.session),
            input: input.clone(),
            prompt,
            options,
        }))
    }

    pub fn notify_image_changed(&self) {
        self.session.notify_image_changed();
    }

    pub fn set_mode(&self, mode: SegmentationMode) {
        self.session.set_mode(mode);
    }

    pub fn deactivate(&self) {
        self.session.deactivate();
    }
}

/// Encodes an image ahead of the first query
pub struct EncodeTask {
    session: Arc<SegmentationSession>,
    input: ImageInput,
}

impl EncodeTask {
    #[must_use]
    pub fn new(session: Arc<SegmentationSession>, input: ImageInput) -> Self {
        Self { session, input }
    }
}

impl Task for EncodeTask {
    fn name(&self) -> &str {
        "Segmentation"
    }

    fn run(self: Box<Self>) -> Result<()> {
        self.session.ensure_encoded(&self.input)?;
        Ok(())
    }
}

/// Computes a mask for one prompt and combines it into the document selection
pub struct SelectSegmentTask {
    session: Arc<SegmentationSession>,
    input: ImageInput,
    prompt: Prompt,
    options: SelectionOptions,
}

impl SelectSegmentTask {
    #[must_use]
    pub fn new(
        session: Arc<SegmentationSession>,
        input: ImageInput,
        prompt: Prompt,
        options: SelectionOptions,
    ) -> Self {
        Self {
            session,
            input,
            prompt,
            options,
        }
    }
}

impl Task for SelectSegmentTask {
    fn name(&self) -> &str {
        "Segmentation"
    }

    fn run(self: Box<Self>) -> Result<()> {
        if let EncodeOutcome::EmptyInput = self.session.ensure_encoded(&self.input)? {
            return Ok(());
        }

        let (mask, origin) = match self.session.predict_mask(&self.input, self.prompt)? {
            MaskPrediction::Mask { mask, origin } => (mask, origin),
            MaskPrediction::NotReady => {
                debug!("No encoding available for {:?}", self.prompt);
                return Ok(());
            },
            MaskPrediction::OutOfBounds => {
                debug!("{:?} is outside the image", self.prompt);
                return Ok(());
            },
        };

        let document = &self.input.document;
        let selection =
            MaskApplicationPipeline::to_selection(document.bounds(), &mask, origin, &self.options)?;
        document.apply_selection(&selection, self.options.action);
        info!(
            "✂️ Applied segment selection ({:?}, {:?})",
            self.prompt, self.options.action
        );
        Ok(())
    }
}

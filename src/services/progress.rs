//! Progress reporting service
//!
//! This module separates progress reporting concerns from the tools,
//! allowing different frontends to implement their own progress handling.

use instant::Instant;

/// Progress stages of a tool operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStage {
    /// Initializing backend and loading model
    Initialization,
    /// Extracting pixels from the document
    ImageExtraction,
    /// Running model inference
    Inference,
    /// Turning the model output into pixels or a selection
    Postprocessing,
    /// Writing the result back into the document
    WriteBack,
    /// Processing completed
    Completed,
}

impl ProcessingStage {
    /// Get a human-readable description of the processing stage
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            ProcessingStage::Initialization => "Initializing model and backend",
            ProcessingStage::ImageExtraction => "Extracting image data",
            ProcessingStage::Inference => "Running AI inference",
            ProcessingStage::Postprocessing => "Processing model output",
            ProcessingStage::WriteBack => "Writing result",
            ProcessingStage::Completed => "Processing completed",
        }
    }

    /// Progress percentage reported when this stage starts
    #[must_use]
    pub fn progress_percentage(&self) -> u8 {
        match self {
            ProcessingStage::Initialization => 2,
            ProcessingStage::ImageExtraction => 5,
            ProcessingStage::Inference => 9,
            ProcessingStage::Postprocessing => 90,
            ProcessingStage::WriteBack => 99,
            ProcessingStage::Completed => 100,
        }
    }
}

/// Wall-clock breakdown of one tool operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessingTimings {
    pub extraction_ms: u64,
    pub inference_ms: u64,
    pub postprocessing_ms: u64,
    pub total_ms: u64,
}

/// Progress update containing stage and timing information
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// Current processing stage
    pub stage: ProcessingStage,
    /// Progress percentage (0-100)
    pub progress: u8,
    /// Human-readable stage description
    pub description: String,
    /// Elapsed time since processing started (milliseconds)
    pub elapsed_ms: u64,
}

impl ProgressUpdate {
    #[must_use]
    pub fn new(stage: ProcessingStage, start_time: Instant) -> Self {
        Self {
            progress: stage.progress_percentage(),
            description: stage.description().to_string(),
            elapsed_ms: start_time.elapsed().as_millis() as u64,
            stage,
        }
    }

    /// Create a progress update with custom description
    #[must_use]
    pub fn with_description(
        stage: ProcessingStage,
        description: String,
        start_time: Instant,
    ) -> Self {
        Self {
            progress: stage.progress_percentage(),
            elapsed_ms: start_time.elapsed().as_millis() as u64,
            stage,
            description,
        }
    }
}

/// Trait for reporting progress during tool operations
pub trait ProgressReporter: Send + Sync {
    fn report_progress(&self, update: ProgressUpdate);

    fn report_completion(&self, timings: ProcessingTimings);

    fn report_error(&self, stage: ProcessingStage, error: &str);
}

/// No-op progress reporter that discards all progress updates
pub struct NoOpProgressReporter;

impl ProgressReporter for NoOpProgressReporter {
    fn report_progress(&self, _update: ProgressUpdate) {}

    fn report_completion(&self, _timings: ProcessingTimings) {}

    fn report_error(&self, _stage: ProcessingStage, _error: &str) {}
}

/// Console progress reporter that logs progress through `log`
pub struct ConsoleProgressReporter {
    operation: String,
    verbose: bool,
}

impl ConsoleProgressReporter {
    /// # Arguments
    /// * `operation` - Name shown in the completion message
    /// * `verbose` - Whether to show detailed timing information
    #[must_use]
    pub fn new(operation: impl Into<String>, verbose: bool) -> Self {
        Self {
            operation: operation.into(),
            verbose,
        }
    }
}

impl ProgressReporter for ConsoleProgressReporter {
    fn report_progress(&self, update: ProgressUpdate) {
        if self.verbose {
            log::info!(
                "[{}%] {} ({}ms elapsed)",
                update.progress,
                update.description,
                update.elapsed_ms
            );
        } else {
            log::info!("[{}%] {}", update.progress, update.description);
        }
    }

    fn report_completion(&self, timings: ProcessingTimings) {
        log::info!("✅ {} completed in {}ms", self.operation, timings.total_ms);

        if self.verbose {
            log::info!("  📊 Detailed timings:");
            log::info!("    • Extraction: {}ms", timings.extraction_ms);
            log::info!("    • Inference: {}ms", timings.inference_ms);
            log::info!("    • Postprocessing: {}ms", timings.postprocessing_ms);
        }
    }

    fn report_error(&self, stage: ProcessingStage, error: &str) {
        log::error!("❌ Error during {}: {}", stage.description(), error);
    }
}

/// Progress tracker that manages timing and progress reporting
pub struct ProgressTracker {
    reporter: Box<dyn ProgressReporter>,
    start_time: Instant,
    current_stage: Option<ProcessingStage>,
}

impl ProgressTracker {
    #[must_use]
    pub fn new(reporter: Box<dyn ProgressReporter>) -> Self {
        Self {
            reporter,
            start_time: Instant::now(),
            current_stage: None,
        }
    }

    /// Tracker that discards everything
    #[must_use]
    pub fn no_op() -> Self {
        Self::new(Box::new(NoOpProgressReporter))
    }

    #[must_use]
    pub fn console(operation: &str, verbose: bool) -> Self {
        Self::new(Box::new(ConsoleProgressReporter::new(operation, verbose)))
    }

    pub fn report_stage(&mut self, stage: ProcessingStage) {
        self.current_stage = Some(stage);
        self.reporter
            .report_progress(ProgressUpdate::new(stage, self.start_time));
    }

    pub fn report_stage_with_description(&mut self, stage: ProcessingStage, description: String) {
        self.current_stage = Some(stage);
        let update = ProgressUpdate::with_description(stage, description, self.start_time);
        self.reporter.report_progress(update);
    }

    pub fn report_completion(&self, timings: ProcessingTimings) {
        self.reporter.report_completion(timings);
    }

    /// Report an error against the current stage
    pub fn report_error(&self, error: &str) {
        let stage = self
            .current_stage
            .unwrap_or(ProcessingStage::Initialization);
        self.reporter.report_error(stage, error);
    }

    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    #[must_use]
    pub fn current_stage(&self) -> Option<ProcessingStage> {
        self.current_stage
    }
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("current_stage", &self.current_stage)
            .field("elapsed_ms", &self.elapsed_ms())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default, Clone)]
    struct TestProgressReporter {
        progress_updates: Arc<Mutex<Vec<ProgressUpdate>>>,
        completions: Arc<Mutex<Vec<ProcessingTimings>>>,
        errors: Arc<Mutex<Vec<(ProcessingStage, String)>>>,
    }

    impl ProgressReporter for TestProgressReporter {
        fn report_progress(&self, update: ProgressUpdate) {
            self.progress_updates.lock().unwrap().push(update);
        }

        fn report_completion(&self, timings: ProcessingTimings) {
            self.completions.lock().unwrap().push(timings);
        }

        fn report_error(&self, stage: ProcessingStage, error: &str) {
            self.errors.lock().unwrap().push((stage, error.to_string()));
        }
    }

    #[test]
    fn test_processing_stage_progress_ordering() {
        let stages = [
            ProcessingStage::Initialization,
            ProcessingStage::ImageExtraction,
            ProcessingStage::Inference,
            ProcessingStage::Postprocessing,
            ProcessingStage::WriteBack,
            ProcessingStage::Completed,
        ];
        for pair in stages.windows(2) {
            assert!(pair[0].progress_percentage() < pair[1].progress_percentage());
        }
        assert_eq!(ProcessingStage::Completed.progress_percentage(), 100);
    }

    #[test]
    fn test_progress_tracker_stage_tracking() {
        let reporter = TestProgressReporter::default();
        let mut tracker = ProgressTracker::new(Box::new(reporter.clone()));
        assert_eq!(tracker.current_stage(), None);

        tracker.report_stage(ProcessingStage::Inference);
        tracker.report_stage_with_description(
            ProcessingStage::WriteBack,
            "Writing 64x64 pixels".to_string(),
        );
        assert_eq!(tracker.current_stage(), Some(ProcessingStage::WriteBack));

        let updates = reporter.progress_updates.lock().unwrap();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].progress, 9);
        assert_eq!(updates[1].description, "Writing 64x64 pixels");
    }

    #[test]
    fn test_progress_tracker_error_reporting_with_context() {
        let reporter = TestProgressReporter::default();
        let mut tracker = ProgressTracker::new(Box::new(reporter.clone()));

        tracker.report_error("before start");
        tracker.report_stage(ProcessingStage::Postprocessing);
        tracker.report_error("bad matte");

        let errors = reporter.errors.lock().unwrap();
        assert_eq!(errors[0].0, ProcessingStage::Initialization);
        assert_eq!(errors[1], (ProcessingStage::Postprocessing, "bad matte".to_string()));
    }

    #[test]
    fn test_progress_tracker_completion_reporting() {
        let reporter = TestProgressReporter::default();
        let tracker = ProgressTracker::new(Box::new(reporter.clone()));
        let timings = ProcessingTimings {
            total_ms: 12,
            ..ProcessingTimings::default()
        };
        tracker.report_completion(timings.clone());
        assert_eq!(*reporter.completions.lock().unwrap(), vec![timings]);
    }

    #[test]
    fn test_no_op_and_console_reporters_accept_everything() {
        let start = Instant::now();
        for reporter in [
            Box::new(NoOpProgressReporter) as Box<dyn ProgressReporter>,
            Box::new(ConsoleProgressReporter::new("Inpainting", true)),
        ] {
            reporter.report_progress(ProgressUpdate::new(ProcessingStage::Inference, start));
            reporter.report_completion(ProcessingTimings::default());
            reporter.report_error(ProcessingStage::WriteBack, "failed");
        }
    }
}

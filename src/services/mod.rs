//! Frontend-facing services: progress reporting and image files

pub mod io;
pub mod progress;

pub use io::ImageIOService;
pub use progress::{
    ConsoleProgressReporter, NoOpProgressReporter, ProcessingStage, ProcessingTimings,
    ProgressReporter, ProgressTracker, ProgressUpdate,
};

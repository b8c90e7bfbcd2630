//! Worker-to-UI error hand-off
//!
//! Inference runs on the worker thread but errors must be shown from the UI
//! thread. The worker pushes [`ProcessingError`]s into a bounded channel and
//! the UI loop drains it; delivery is FIFO. Reporting never blocks: once the
//! channel is full, further errors wait in an overflow queue that the
//! receiver reads after the channel.

use crate::error::VisionError;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// A failed operation, ready to be shown to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingError {
    /// Name of the failed operation
    pub operation: String,
    /// Human-readable message from the failing component
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl fmt::Display for ProcessingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.operation, self.message)
    }
}

type Overflow = Arc<Mutex<VecDeque<ProcessingError>>>;

fn lock(overflow: &Overflow) -> MutexGuard<'_, VecDeque<ProcessingError>> {
    overflow.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Create a connected reporter/receiver pair whose channel holds `capacity` errors
///
/// # Panics
/// Panics if `capacity` is zero.
#[must_use]
pub fn error_channel(capacity: usize) -> (ErrorReporter, ErrorReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    let overflow = Overflow::default();
    (
        ErrorReporter {
            tx,
            overflow: Arc::clone(&overflow),
        },
        ErrorReceiver { rx, overflow },
    )
}

/// Sending half, used by worker threads
#[derive(Debug, Clone)]
pub struct ErrorReporter {
    tx: mpsc::Sender<ProcessingError>,
    overflow: Overflow,
}

impl ErrorReporter {
    /// Queue a failure for the UI; returns immediately
    pub fn report(&self, operation: &str, message: impl Into<String>) {
        let error = ProcessingError {
            operation: operation.to_string(),
            message: message.into(),
            timestamp: Utc::now(),
        };
        tracing::warn!("❌ {error}");

        if self.tx.is_closed() {
            tracing::warn!("Error receiver dropped, discarding report");
            return;
        }

        // Older errors still waiting in the overflow go out first
        let mut overflow = lock(&self.overflow);
        if !overflow.is_empty() {
            overflow.push_back(error);
            return;
        }
        match self.tx.try_send(error) {
            Ok(()) => {},
            Err(TrySendError::Full(error)) => {
                tracing::debug!("Error channel full, holding report until the UI drains");
                overflow.push_back(error);
            },
            Err(TrySendError::Closed(_)) => {
                tracing::warn!("Error receiver dropped, discarding report");
            },
        }
    }

    /// Queue a [`VisionError`] using its user-facing message
    pub fn report_error(&self, operation: &str, error: &VisionError) {
        self.report(operation, error.user_message());
    }

    /// Whether the UI side is gone
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving half, owned by the UI loop
#[derive(Debug)]
pub struct ErrorReceiver {
    rx: mpsc::Receiver<ProcessingError>,
    overflow: Overflow,
}

impl ErrorReceiver {
    /// Next queued error, if any
    pub fn try_recv(&mut self) -> Option<ProcessingError> {
        self.rx
            .try_recv()
            .ok()
            .or_else(|| lock(&self.overflow).pop_front())
    }

    /// All currently queued errors, oldest first
    pub fn drain(&mut self) -> Vec<ProcessingError> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    /// Hand every queued error to `present` in order; returns how many were shown
    pub fn dispatch<F>(&mut self, mut present: F) -> usize
    where
        F: FnMut(&ProcessingError),
    {
        let mut shown = 0;
        while let Some(error) = self.try_recv() {
            present(&error);
            shown += 1;
        }
        shown
    }

    /// Wait for the next error from an async UI loop; `None` once every reporter is gone
    pub async fn recv(&mut self) -> Option<ProcessingError> {
        if let Some(error) = self.try_recv() {
            return Some(error);
        }
        match self.rx.recv().await {
            Some(error) => Some(error),
            None => lock(&self.overflow).pop_front(),
        }
    }

    /// Blocking variant of [`ErrorReceiver::recv`] for synchronous loops
    pub fn blocking_recv(&mut self) -> Option<ProcessingError> {
        if let Some(error) = self.try_recv() {
            return Some(error);
        }
        match self.rx.blocking_recv() {
            Some(error) => Some(error),
            None => lock(&self.overflow).pop_front(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_errors_arrive_in_order() {
        let (reporter, mut receiver) = error_channel(8);
        reporter.report("encode", "first");
        reporter.report("predict", "second");

        let errors = receiver.drain();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].operation, "encode");
        assert_eq!(errors[1].message, "second");
        assert!(receiver.try_recv().is_none());
    }

    #[test]
    fn test_full_channel_never_blocks_reporter() {
        let (reporter, mut receiver) = error_channel(1);
        let worker = thread::spawn(move || {
            for i in 0..5 {
                reporter.report("inpaint", format!("failure {i}"));
            }
        });
        worker.join().unwrap();

        let messages: Vec<String> = receiver.drain().into_iter().map(|e| e.message).collect();
        assert_eq!(
            messages,
            (0..5).map(|i| format!("failure {i}")).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_order_survives_partial_drain() {
        let (reporter, mut receiver) = error_channel(1);
        reporter.report("encode", "a");
        reporter.report("encode", "b");
        reporter.report("encode", "c");
        assert_eq!(receiver.try_recv().unwrap().message, "a");

        reporter.report("encode", "d");
        let rest: Vec<String> = receiver.drain().into_iter().map(|e| e.message).collect();
        assert_eq!(rest, vec!["b", "c", "d"]);
    }

    #[test]
    fn test_blocking_recv_reads_overflow_after_reporters_leave() {
        let (reporter, mut receiver) = error_channel(1);
        reporter.report("segment", "first");
        reporter.report("segment", "second");
        drop(reporter);

        assert_eq!(receiver.blocking_recv().unwrap().message, "first");
        assert_eq!(receiver.blocking_recv().unwrap().message, "second");
        assert!(receiver.blocking_recv().is_none());
    }

    #[test]
    fn test_dispatch_counts_and_formats() {
        let (reporter, mut receiver) = error_channel(4);
        reporter.report_error("load model", &VisionError::backend("GPU backend not available"));

        let mut shown = Vec::new();
        let count = receiver.dispatch(|error| shown.push(error.to_string()));
        assert_eq!(count, 1);
        assert_eq!(shown, vec!["load model: GPU backend not available".to_string()]);
    }

    #[test]
    fn test_report_after_receiver_dropped_does_not_block() {
        let (reporter, receiver) = error_channel(1);
        drop(receiver);
        assert!(reporter.is_closed());
        reporter.report("encode", "nobody listens");
        reporter.report("encode", "still nobody");
    }

    #[tokio::test]
    async fn test_async_recv() {
        let (reporter, mut receiver) = error_channel(2);
        thread::spawn(move || reporter.report("segment", "boom"))
            .join()
            .unwrap();
        let error = receiver.recv().await.unwrap();
        assert_eq!(error.message, "boom");
        assert!(receiver.recv().await.is_none());
    }
}

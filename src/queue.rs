//! Ordered work queue with a single worker thread
//!
//! Tools package each unit of work as a [`Task`] owning copies of its inputs
//! and submit it here. Tasks run one at a time in submission order, so an
//! encode submitted before a query always finishes first. Failures go to the
//! [`ErrorReporter`]; there is no cancellation.

use crate::error::{Result, VisionError};
use crate::reporter::ErrorReporter;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

/// A unit of work executed on the worker thread
pub trait Task: Send {
    /// Operation name used in error reports
    fn name(&self) -> &str;

    /// Execute the task, consuming it
    ///
    /// # Errors
    /// Any error is forwarded to the error reporter.
    fn run(self: Box<Self>) -> Result<()>;
}

enum Message {
    Run(Box<dyn Task>),
    Barrier(oneshot::Sender<()>),
    Shutdown,
}

/// Cloneable submitter for a [`WorkQueue`]
#[derive(Clone)]
pub struct WorkQueueHandle {
    tx: mpsc::UnboundedSender<Message>,
}

impl WorkQueueHandle {
    /// Queue `task` behind everything submitted before it
    ///
    /// # Errors
    /// - The queue has shut down
    pub fn submit(&self, task: Box<dyn Task>) -> Result<()> {
        let name = task.name().to_string();
        self.tx
            .send(Message::Run(task))
            .map_err(|_| VisionError::internal(format!("Work queue is shut down, dropped '{name}'")))?;
        debug!("Queued task '{name}'");
        Ok(())
    }

    /// Block until every task submitted before this call has finished
    ///
    /// # Errors
    /// - The queue has shut down
    pub fn wait_for_done(&self) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(Message::Barrier(done_tx))
            .map_err(|_| VisionError::internal("Work queue is shut down"))?;
        done_rx
            .blocking_recv()
            .map_err(|_| VisionError::internal("Work queue stopped before reaching the barrier"))
    }
}

impl std::fmt::Debug for WorkQueueHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkQueueHandle")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

/// Owner of the worker thread
///
/// Dropping the queue runs the tasks already submitted, then joins the worker.
#[derive(Debug)]
pub struct WorkQueue {
    handle: WorkQueueHandle,
    worker: Option<JoinHandle<()>>,
}

impl WorkQueue {
    /// Start the worker thread
    ///
    /// # Errors
    /// - The thread cannot be spawned
    pub fn spawn(reporter: ErrorReporter) -> Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let worker = std::thread::Builder::new()
            .name("visionml-worker".to_string())
            .spawn(move || {
                while let Some(message) = rx.blocking_recv() {
                    match message {
                        Message::Run(task) => run_task(task, &reporter),
                        Message::Barrier(done) => {
                            let _ = done.send(());
                        },
                        Message::Shutdown => break,
                    }
                }
                debug!("Worker thread stopped");
            })
            .map_err(|e| VisionError::internal(format!("Failed to spawn worker thread: {e}")))?;
        info!("🧵 Work queue started");

        Ok(Self {
            handle: WorkQueueHandle { tx },
            worker: Some(worker),
        })
    }

    #[must_use]
    pub fn handle(&self) -> WorkQueueHandle {
        self.handle.clone()
    }

    /// See [`WorkQueueHandle::submit`]
    ///
    /// # Errors
    /// - The queue has shut down
    pub fn submit(&self, task: Box<dyn Task>) -> Result<()> {
        self.handle.submit(task)
    }

    /// See [`WorkQueueHandle::wait_for_done`]
    ///
    /// # Errors
    /// - The queue has shut down
    pub fn wait_for_done(&self) -> Result<()> {
        self.handle.wait_for_done()
    }
}

impl Drop for WorkQueue {
    fn drop(&mut self) {
        let _ = self.handle.tx.send(Message::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_task(task: Box<dyn Task>, reporter: &ErrorReporter) {
    let name = task.name().to_string();
    let start = instant::Instant::now();
    match catch_unwind(AssertUnwindSafe(|| task.run())) {
        Ok(Ok(())) => debug!(
            "Task '{name}' finished in {:.2}ms",
            start.elapsed().as_secs_f64() * 1000.0
        ),
        Ok(Err(e)) => reporter.report_error(&name, &e),
        Err(_) => reporter.report(&name, "Task panicked"),
    }
}

//! Background workers for long-running operations
//!
//! Each operation runs as one tokio task that reports status, progress and its
//! final result over an mpsc channel. Cancellation is cooperative: the flag is
//! checked between items, and whatever was produced before that point is
//! delivered with the `Cancelled` message.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::api::{AddressCandidate, GeocodeOutcome, Point, VWorldClient};
use crate::error::VWorldError;

/// Channel capacity for worker messages
const CHANNEL_CAPACITY: usize = 64;

/// Messages sent from a worker to whoever started it
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent<T, I = ()> {
    /// Human-readable status line
    Status(String),
    /// Completion percentage (0-100)
    Progress(u8),
    /// One item finished
    ItemCompleted { index: usize, item: I },
    /// One item failed; the loop continues
    ItemFailed { index: usize, message: String },
    /// The operation finished
    Finished(T),
    /// The operation failed as a whole
    Failed(VWorldError),
    /// The operation stopped early; carries the partial result
    Cancelled(T),
}

/// Shared cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Requests cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Handle for a running worker
pub struct WorkerHandle<T, I = ()> {
    /// Channel for receiving worker messages
    pub receiver: mpsc::Receiver<WorkerEvent<T, I>>,
    cancel: CancelFlag,
    task: JoinHandle<()>,
}

impl<T, I> WorkerHandle<T, I> {
    /// Requests cooperative cancellation
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Flag shared with the worker task
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Whether the task has exited
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Drains messages until the worker ends and returns its final message
    ///
    /// Returns `None` if the task ended without a final message.
    pub async fn wait(mut self) -> Option<WorkerEvent<T, I>> {
        while let Some(event) = self.receiver.recv().await {
            if matches!(
                event,
                WorkerEvent::Finished(_) | WorkerEvent::Failed(_) | WorkerEvent::Cancelled(_)
            ) {
                return Some(event);
            }
        }
        None
    }
}

/// Holds at most one worker of a kind; starting a new one cancels the old one
pub struct WorkerSlot<T, I = ()> {
    current: Option<WorkerHandle<T, I>>,
}

impl<T, I> Default for WorkerSlot<T, I> {
    fn default() -> Self {
        Self { current: None }
    }
}

impl<T, I> WorkerSlot<T, I> {
    /// Replaces the current worker, cancelling it if it is still running
    pub fn start(&mut self, handle: WorkerHandle<T, I>) -> &mut WorkerHandle<T, I> {
        if let Some(previous) = self.current.take() {
            if !previous.is_finished() {
                debug!("superseding running worker");
                previous.cancel();
            }
        }
        self.current.insert(handle)
    }

    /// The current worker, if any
    pub fn current(&mut self) -> Option<&mut WorkerHandle<T, I>> {
        self.current.as_mut()
    }

    /// Removes and returns the current worker
    pub fn take(&mut self) -> Option<WorkerHandle<T, I>> {
        self.current.take()
    }
}

/// Outcome of geocoding one address in a batch
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GeocodeStatus {
    /// Address resolved
    Found,
    /// Service could not resolve the address
    NotFound(String),
    /// Request failed
    Failed(String),
}

/// One row of a batch geocoding result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeocodeRecord {
    /// Address as given
    pub address: String,
    /// Resolved point, when found
    pub point: Option<Point>,
    /// What happened
    pub status: GeocodeStatus,
}

fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done * 100) / total) as u8
}

/// Runs an address search in the background
///
/// # Returns
/// A handle whose channel ends with `Finished(candidates)` or `Failed(error)`
pub fn spawn_search(
    client: Arc<VWorldClient>,
    query: String,
    crs: String,
) -> WorkerHandle<Vec<AddressCandidate>> {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let cancel = CancelFlag::default();
    let flag = cancel.clone();

    let task = tokio::spawn(async move {
        let _ = tx.send(WorkerEvent::Status(format!("searching: {}", query))).await;
        let result = client.search_addresses(&query, &crs).await;

        if flag.is_cancelled() {
            let _ = tx.send(WorkerEvent::Cancelled(Vec::new())).await;
            return;
        }
        let event = match result {
            Ok(candidates) => WorkerEvent::Finished(candidates),
            Err(e) => {
                warn!(query = %query, error = %e, "search failed");
                WorkerEvent::Failed(e)
            }
        };
        let _ = tx.send(event).await;
    });

    WorkerHandle {
        receiver: rx,
        cancel,
        task,
    }
}

/// Geocodes a list of addresses one after another
///
/// Per-address failures become records with a `Failed` status; the loop
/// carries on. Emits `ItemCompleted` for every address.
pub fn spawn_geocoding(
    client: Arc<VWorldClient>,
    addresses: Vec<String>,
    crs: String,
) -> WorkerHandle<Vec<GeocodeRecord>, GeocodeRecord> {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let cancel = CancelFlag::default();
    let flag = cancel.clone();

    let task = tokio::spawn(async move {
        let total = addresses.len();
        let mut records = Vec::with_capacity(total);
        let _ = tx
            .send(WorkerEvent::Status(format!("geocoding {} addresses", total)))
            .await;

        for (index, address) in addresses.into_iter().enumerate() {
            if flag.is_cancelled() {
                let _ = tx.send(WorkerEvent::Status("cancelled".to_string())).await;
                let _ = tx.send(WorkerEvent::Cancelled(records)).await;
                return;
            }

            let _ = tx
                .send(WorkerEvent::Status(format!(
                    "processing: {} ({}/{})",
                    address,
                    index + 1,
                    total
                )))
                .await;

            let record = match client.geocode(&address, &crs).await {
                Ok(GeocodeOutcome::Found { point, .. }) => GeocodeRecord {
                    address,
                    point: Some(point),
                    status: GeocodeStatus::Found,
                },
                Ok(GeocodeOutcome::NotFound { reason }) => GeocodeRecord {
                    address,
                    point: None,
                    status: GeocodeStatus::NotFound(reason),
                },
                Err(e) => {
                    warn!(address = %address, error = %e, "geocoding failed");
                    GeocodeRecord {
                        address,
                        point: None,
                        status: GeocodeStatus::Failed(e.to_string()),
                    }
                }
            };

            records.push(record.clone());
            let _ = tx.send(WorkerEvent::ItemCompleted { index, item: record }).await;
            let _ = tx.send(WorkerEvent::Progress(percent(index + 1, total))).await;
        }

        let _ = tx.send(WorkerEvent::Status("geocoding completed".to_string())).await;
        let _ = tx.send(WorkerEvent::Finished(records)).await;
    });

    WorkerHandle {
        receiver: rx,
        cancel,
        task,
    }
}

/// Runs `process` over each item in order
///
/// Successful results are collected and announced with `ItemCompleted`;
/// failures are announced with `ItemFailed` and skipped.
pub fn spawn_batch<In, Out, E, F, Fut>(items: Vec<In>, process: F) -> WorkerHandle<Vec<Out>, Out>
where
    In: Send + 'static,
    Out: Clone + Send + 'static,
    E: std::fmt::Display + Send + 'static,
    F: Fn(In) -> Fut + Send + 'static,
    Fut: Future<Output = Result<Out, E>> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let cancel = CancelFlag::default();
    let flag = cancel.clone();

    let task = tokio::spawn(async move {
        let total = items.len();
        let mut results = Vec::with_capacity(total);
        let _ = tx
            .send(WorkerEvent::Status(format!("processing {} items", total)))
            .await;

        for (index, item) in items.into_iter().enumerate() {
            if flag.is_cancelled() {
                let _ = tx.send(WorkerEvent::Cancelled(results)).await;
                return;
            }

            match process(item).await {
                Ok(out) => {
                    results.push(out.clone());
                    let _ = tx.send(WorkerEvent::ItemCompleted { index, item: out }).await;
                }
                Err(e) => {
                    warn!(index, error = %e, "batch item failed");
                    let _ = tx
                        .send(WorkerEvent::ItemFailed {
                            index,
                            message: e.to_string(),
                        })
                        .await;
                }
            }
            let _ = tx.send(WorkerEvent::Progress(percent(index + 1, total))).await;
        }

        let _ = tx.send(WorkerEvent::Finished(results)).await;
    });

    WorkerHandle {
        receiver: rx,
        cancel,
        task,
    }
}

//! Operation scheduling.
//!
//! Requests touching the same remote directory run one at a time in
//! submission order; requests on different directories run in parallel.
//! Every accepted request reaches exactly one [`OperationEvent::Finished`].

mod path_lock;

pub use path_lock::PathLock;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{CallContext, DeployerClient, ProgressFn};
use crate::errors::{ErrorKind, OperationError, SchedulerError};
use crate::models::{
    OperationEvent, OperationId, OperationKind, OperationRequest, OperationResult, OperationState,
    TransferProgress,
};
use crate::paths::{normalize_remote_path, parent_dir};
use crate::runner::{CommandRunner, ProcessRunner};

/// Key serializing requests: the listed directory itself for `List`, the
/// containing directory for everything else.
pub fn directory_key(request: &OperationRequest) -> String {
    match request.kind {
        OperationKind::List => normalize_remote_path(&request.target_path),
        _ => parent_dir(&request.target_path),
    }
}

struct Entry {
    request: OperationRequest,
    key: String,
    state: OperationState,
    cancel: CancellationToken,
}

#[derive(Default)]
struct SchedulerState {
    lock: PathLock<OperationId>,
    entries: HashMap<OperationId, Entry>,
    subscribers: Vec<mpsc::UnboundedSender<OperationEvent>>,
    shut_down: bool,
}

impl SchedulerState {
    fn emit(&mut self, event: OperationEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn finish(&mut self, id: &OperationId, result: OperationResult) {
        self.entries.remove(id);
        self.emit(OperationEvent::Finished {
            id: id.clone(),
            result,
        });
    }
}

struct Inner<R: CommandRunner> {
    client: DeployerClient<R>,
    runtime: Handle,
    grace: Duration,
    state: Mutex<SchedulerState>,
}

impl<R: CommandRunner> Inner<R> {
    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Accepts requests, serializes them per directory and reports their
/// lifecycle to subscribers.
pub struct OperationScheduler<R: CommandRunner + 'static = ProcessRunner> {
    inner: Arc<Inner<R>>,
}

impl<R: CommandRunner + 'static> Clone for OperationScheduler<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: CommandRunner + 'static> OperationScheduler<R> {
    /// Create a scheduler whose workers run on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn new(client: DeployerClient<R>) -> Self {
        Self::with_handle(client, Handle::current())
    }

    /// Create a scheduler whose workers are spawned on `runtime`.
    pub fn with_handle(client: DeployerClient<R>, runtime: Handle) -> Self {
        let grace = client.config().cancel_grace();
        Self {
            inner: Arc::new(Inner {
                client,
                runtime,
                grace,
                state: Mutex::new(SchedulerState::default()),
            }),
        }
    }

    pub fn client(&self) -> &DeployerClient<R> {
        &self.inner.client
    }

    /// Queue a request. The returned id correlates every later event.
    pub fn submit(&self, request: OperationRequest) -> Result<OperationId, SchedulerError> {
        let id = request.id.clone().unwrap_or_else(OperationId::generate);
        let key = directory_key(&request);

        let needs_worker = {
            let mut state = self.inner.lock();
            if state.shut_down {
                return Err(SchedulerError::ShutDown);
            }
            if state.entries.contains_key(&id) {
                return Err(SchedulerError::DuplicateId(id.to_string()));
            }
            debug!(id = %id, op = request.kind.as_str(), key = %key, "Queued operation");
            state.entries.insert(
                id.clone(),
                Entry {
                    request,
                    key: key.clone(),
                    state: OperationState::Queued,
                    cancel: CancellationToken::new(),
                },
            );
            state.lock.enqueue(&key, id.clone())
        };

        if needs_worker {
            let inner = Arc::clone(&self.inner);
            self.inner.runtime.spawn(run_worker(inner, key));
        }
        Ok(id)
    }

    /// Cancel a queued or running request.
    ///
    /// Returns `false` for unknown or already finished ids.
    pub fn cancel(&self, id: &OperationId) -> bool {
        let mut state = self.inner.lock();
        let Some(entry) = state.entries.get(id) else {
            return false;
        };
        let (current, key, token) = (entry.state, entry.key.clone(), entry.cancel.clone());
        match current {
            OperationState::Queued => {
                state.lock.remove(&key, id);
                debug!(id = %id, "Cancelled queued operation");
                state.finish(id, OperationResult::Cancelled);
                true
            }
            OperationState::Running => {
                debug!(id = %id, "Cancelling running operation");
                token.cancel();
                true
            }
            _ => false,
        }
    }

    /// Receive every event emitted from now on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<OperationEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().subscribers.push(tx);
        rx
    }

    /// State of an in-flight request. Finished requests are forgotten.
    pub fn state(&self, id: &OperationId) -> Option<OperationState> {
        self.inner.lock().entries.get(id).map(|entry| entry.state)
    }

    /// Number of directories that currently have a worker.
    pub fn active_workers(&self) -> usize {
        self.inner.lock().lock.active_keys()
    }

    /// Cancel everything and reject further submissions.
    pub fn shutdown(&self) {
        let mut state = self.inner.lock();
        if state.shut_down {
            return;
        }
        state.shut_down = true;

        let queued = state.lock.drain_queued();
        for id in &queued {
            state.finish(id, OperationResult::Cancelled);
        }
        let mut running = 0;
        for entry in state.entries.values() {
            if entry.state == OperationState::Running {
                entry.cancel.cancel();
                running += 1;
            }
        }
        info!(queued = queued.len(), running, "Scheduler shut down");
    }
}

async fn run_worker<R: CommandRunner + 'static>(inner: Arc<Inner<R>>, key: String) {
    debug!(key = %key, "Worker started");
    loop {
        let (id, request, cancel) = {
            let mut state = inner.lock();
            let Some(id) = state.lock.next(&key) else {
                break;
            };
            let Some(entry) = state.entries.get_mut(&id) else {
                continue;
            };
            entry.state = OperationState::Running;
            let job = (id.clone(), entry.request.clone(), entry.cancel.clone());
            state.emit(OperationEvent::Started {
                id,
                kind: job.1.kind,
            });
            job
        };

        // Own task per request, so a panic fails the request instead of the worker.
        let task = inner.runtime.spawn({
            let inner = Arc::clone(&inner);
            let (id, request, cancel) = (id.clone(), request.clone(), cancel.clone());
            async move { execute(&inner, &id, &request, &cancel).await }
        });
        let result = match task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => {
                warn!(id = %id, "Operation task panicked");
                OperationResult::Failed {
                    error: OperationError::new(
                        ErrorKind::Unknown,
                        format!("{} aborted unexpectedly", request.kind.as_str()),
                    ),
                }
            }
            Err(_) => OperationResult::Cancelled,
        };
        let op = request.kind.as_str();
        match &result {
            OperationResult::Succeeded { .. } => info!(id = %id, op, "Operation succeeded"),
            OperationResult::Failed { error } => warn!(id = %id, op, "Operation failed: {error}"),
            OperationResult::Cancelled => {}
        }

        let mut state = inner.lock();
        // A cancel that won the race against completion still counts.
        if cancel.is_cancelled() {
            warn!(id = %id, op, "Operation cancelled");
            state.finish(&id, OperationResult::Cancelled);
        } else {
            state.finish(&id, result);
        }
        drop(state);
    }
    debug!(key = %key, "Worker retired");
}

/// Run one request, giving it at most the grace period once cancelled.
async fn execute<R: CommandRunner + 'static>(
    inner: &Arc<Inner<R>>,
    id: &OperationId,
    request: &OperationRequest,
    cancel: &CancellationToken,
) -> OperationResult {
    let ctx = CallContext::new(cancel.clone()).with_progress(progress_sink(inner, id));
    let run = inner.client.execute(request, &ctx);
    tokio::pin!(run);

    tokio::select! {
        result = &mut run => return OperationResult::from_client(result),
        _ = cancel.cancelled() => {}
    }
    if tokio::time::timeout(inner.grace, &mut run).await.is_err() {
        warn!(
            id = %id,
            grace_ms = inner.grace.as_millis() as u64,
            "Operation did not stop within grace period, abandoning"
        );
    }
    OperationResult::Cancelled
}

fn progress_sink<R: CommandRunner + 'static>(
    inner: &Arc<Inner<R>>,
    id: &OperationId,
) -> ProgressFn {
    let inner = Arc::downgrade(inner);
    let id = id.clone();
    Arc::new(move |progress: TransferProgress| {
        if let Some(inner) = inner.upgrade() {
            inner.lock().emit(OperationEvent::Progress {
                id: id.clone(),
                progress,
            });
        }
    })
}

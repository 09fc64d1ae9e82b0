//! Active run handle and cancellation bookkeeping.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::cancel::{CancelClient, CancelResponse};
use super::store::RunSlotStore;
use crate::types::{metadata_event_type, RunMeta, RESPONSE_FAILED};

/// The run currently believed to be executing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunHandle {
    pub run_id: String,
    pub thread_id: Option<String>,
}

impl From<&RunHandle> for RunMeta {
    fn from(handle: &RunHandle) -> Self {
        RunMeta {
            run_id: Some(handle.run_id.clone()),
            thread_id: handle.thread_id.clone(),
        }
    }
}

/// Shared cell holding at most one [`RunHandle`].
#[derive(Debug, Clone, Default)]
pub struct ActiveRun {
    inner: Arc<Mutex<Option<RunHandle>>>,
}

impl ActiveRun {
    pub fn get(&self) -> Option<RunHandle> {
        self.lock().clone()
    }

    pub fn set(&self, handle: RunHandle) {
        *self.lock() = Some(handle);
    }

    /// Clear the handle only if it still refers to `run_id`.
    pub fn clear_if(&self, run_id: &str) -> bool {
        let mut slot = self.lock();
        if slot.as_ref().is_some_and(|handle| handle.run_id == run_id) {
            *slot = None;
            return true;
        }
        false
    }

    pub fn take(&self) -> Option<RunHandle> {
        self.lock().take()
    }

    fn lock(&self) -> MutexGuard<'_, Option<RunHandle>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Result of a cancel attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Nothing to cancel: no run id could be resolved.
    NoTarget,
    /// Cancellation for this run was already requested.
    AlreadyRequested { run_id: String },
    Cancelled { thread_id: String, run_id: String },
    /// The server no longer knows the run.
    AlreadyGone { thread_id: String, run_id: String },
    Failed {
        thread_id: String,
        run_id: String,
        error: String,
    },
}

impl CancelOutcome {
    /// Whether a cancel request went over the wire.
    pub fn reached_server(&self) -> bool {
        !matches!(self, CancelOutcome::NoTarget | CancelOutcome::AlreadyRequested { .. })
    }
}

/// Tracks the active run of a session and cancels it on request.
///
/// The handle cell is shared with spawned cancel tasks, which clear it with
/// a compare-and-clear so a newer run is never wiped by a late cancel.
pub struct RunTracker {
    active: ActiveRun,
    slots: Arc<dyn RunSlotStore>,
    client: Arc<dyn CancelClient>,
    requested: Arc<Mutex<HashSet<String>>>,
    selected_thread: Option<String>,
}

impl RunTracker {
    pub fn new(slots: Arc<dyn RunSlotStore>, client: Arc<dyn CancelClient>) -> Self {
        Self {
            active: ActiveRun::default(),
            slots,
            client,
            requested: Arc::new(Mutex::new(HashSet::new())),
            selected_thread: None,
        }
    }

    /// Swap the slot store. Slots already saved in the old store are not carried over.
    pub fn with_slot_store(mut self, slots: Arc<dyn RunSlotStore>) -> Self {
        self.slots = slots;
        self
    }

    pub fn active(&self) -> Option<RunHandle> {
        self.active.get()
    }

    pub fn active_cell(&self) -> ActiveRun {
        self.active.clone()
    }

    pub fn selected_thread(&self) -> Option<&str> {
        self.selected_thread.as_deref()
    }

    pub fn set_selected_thread(&mut self, thread_id: Option<String>) {
        self.selected_thread = thread_id;
    }

    /// Persisted run id for a thread, if any.
    pub fn slot(&self, thread_id: &str) -> Option<String> {
        match self.slots.load(thread_id) {
            Ok(run_id) => run_id,
            Err(err) => {
                warn!(thread_id, error = %err, "failed to read run slot");
                None
            }
        }
    }

    /// The server accepted a run.
    pub fn on_created(&self, meta: &RunMeta) {
        self.store_active(meta);
    }

    /// Record run identity from a metadata payload.
    ///
    /// Returns the run to cancel when the payload reports `response.failed`
    /// and either the payload or the active handle names a run.
    pub fn on_metadata(&self, metadata: &Value) -> Option<RunMeta> {
        let meta = RunMeta::from_metadata(metadata);
        if let Some(meta) = meta.as_ref() {
            self.store_active(meta);
        }
        if metadata_event_type(metadata) != Some(RESPONSE_FAILED) {
            return None;
        }
        let target = meta.or_else(|| self.active.get().as_ref().map(RunMeta::from))?;
        warn!(run_id = ?target.run_id, thread_id = ?target.thread_id, "run reported failure");
        Some(target)
    }

    /// The run completed: drop its slot and, if the finish names the active
    /// run, its handle. A finish without a run id leaves the handle alone.
    pub fn on_finish(&self, meta: Option<&RunMeta>) {
        let run_id = meta.and_then(|m| m.run_id.clone());
        if let Some(run_id) = run_id.as_deref() {
            self.active.clear_if(run_id);
        }
        let thread_id = meta
            .and_then(|m| m.thread_id.clone())
            .or_else(|| self.selected_thread.clone());
        if let Some(thread_id) = thread_id.as_deref() {
            self.clear_slot(thread_id);
        }
        debug!(run_id = ?run_id, thread_id = ?thread_id, "run finished");
    }

    /// The stream failed: cancel the run in the background.
    pub fn on_error(&self, meta: Option<RunMeta>) -> JoinHandle<CancelOutcome> {
        self.spawn_cancel(meta)
    }

    /// Cancel the given run, or the active one.
    pub async fn cancel(&self, meta: Option<RunMeta>) -> CancelOutcome {
        let target = self.resolve_target(meta.as_ref());
        self.context().execute(target).await
    }

    /// Fire-and-forget variant of [`cancel`](Self::cancel).
    pub fn spawn_cancel(&self, meta: Option<RunMeta>) -> JoinHandle<CancelOutcome> {
        let target = self.resolve_target(meta.as_ref());
        let context = self.context();
        tokio::spawn(async move { context.execute(target).await })
    }

    /// Target thread and run ids.
    ///
    /// Explicit meta wins, then the active handle. The thread falls back to
    /// the selected thread and the run to that thread's persisted slot.
    fn resolve_target(&self, meta: Option<&RunMeta>) -> Option<(String, String)> {
        let effective = meta
            .cloned()
            .or_else(|| self.active.get().as_ref().map(RunMeta::from));
        let effective = effective.unwrap_or_default();
        let thread_id = effective.thread_id.or_else(|| self.selected_thread.clone())?;
        let run_id = effective.run_id.or_else(|| self.slot(&thread_id))?;
        Some((thread_id, run_id))
    }

    fn store_active(&self, meta: &RunMeta) {
        let Some(run_id) = meta.run_id.clone() else {
            return;
        };
        // A run with a pending or successful cancellation never becomes active again.
        if self.is_cancel_requested(&run_id) {
            debug!(run_id = %run_id, "ignoring replayed run");
            return;
        }
        let thread_id = meta.thread_id.clone().or_else(|| self.selected_thread.clone());
        if let Some(thread_id) = thread_id.as_deref() {
            if let Err(err) = self.slots.save(thread_id, &run_id) {
                warn!(thread_id, run_id = %run_id, error = %err, "failed to persist run slot");
            }
        }
        let handle = RunHandle { run_id, thread_id };
        if self.active.get().as_ref() != Some(&handle) {
            info!(run_id = %handle.run_id, thread_id = ?handle.thread_id, "run active");
        }
        self.active.set(handle);
    }

    pub fn is_cancel_requested(&self, run_id: &str) -> bool {
        self.requested
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(run_id)
    }

    fn clear_slot(&self, thread_id: &str) {
        if let Err(err) = self.slots.clear(thread_id) {
            warn!(thread_id, error = %err, "failed to clear run slot");
        }
    }

    fn context(&self) -> CancelContext {
        CancelContext {
            active: self.active.clone(),
            slots: Arc::clone(&self.slots),
            client: Arc::clone(&self.client),
            requested: Arc::clone(&self.requested),
        }
    }
}

/// Everything a detached cancel task needs.
struct CancelContext {
    active: ActiveRun,
    slots: Arc<dyn RunSlotStore>,
    client: Arc<dyn CancelClient>,
    requested: Arc<Mutex<HashSet<String>>>,
}

impl CancelContext {
    async fn execute(self, target: Option<(String, String)>) -> CancelOutcome {
        let Some((thread_id, run_id)) = target else {
            debug!("cancel requested with no run to target");
            return CancelOutcome::NoTarget;
        };
        let claimed = self
            .requested
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(run_id.clone());
        if !claimed {
            debug!(run_id = %run_id, "cancel already requested");
            return CancelOutcome::AlreadyRequested { run_id };
        }

        let outcome = match self.client.cancel_run(&thread_id, &run_id).await {
            Ok(CancelResponse::Cancelled) => {
                info!(thread_id = %thread_id, run_id = %run_id, "run cancelled");
                CancelOutcome::Cancelled {
                    thread_id: thread_id.clone(),
                    run_id: run_id.clone(),
                }
            }
            Ok(CancelResponse::NotFound) => {
                debug!(thread_id = %thread_id, run_id = %run_id, "run already gone");
                CancelOutcome::AlreadyGone {
                    thread_id: thread_id.clone(),
                    run_id: run_id.clone(),
                }
            }
            Err(err) => {
                warn!(thread_id = %thread_id, run_id = %run_id, error = %err, "cancel request failed");
                // The run may still be executing; let later metadata re-arm it.
                self.requested
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&run_id);
                CancelOutcome::Failed {
                    thread_id: thread_id.clone(),
                    run_id: run_id.clone(),
                    error: err.to_string(),
                }
            }
        };

        if let Err(err) = self.slots.clear(&thread_id) {
            warn!(thread_id = %thread_id, error = %err, "failed to clear run slot");
        }
        self.active.clear_if(&run_id);
        outcome
    }
}

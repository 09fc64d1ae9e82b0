//! Run lifecycle: the active run handle, per-thread run slots and cancellation.

pub mod cancel;
pub mod store;
pub mod tracker;

pub use cancel::{CancelClient, CancelResponse, HttpCancelClient};
pub use store::{FileRunSlotStore, MemoryRunSlotStore, RunSlotStore};
pub use tracker::{ActiveRun, CancelOutcome, RunHandle, RunTracker};

//! Convenience re-exports for common use.

pub use crate::config::{ClientConfig, Section};
pub use crate::error::{Result, RunweaveError};
pub use crate::run::{CancelClient, CancelOutcome, RunHandle, RunSlotStore};
pub use crate::session::{Session, SessionView};
pub use crate::stage::StageView;
pub use crate::threads::{ThreadDirectory, ThreadOpen};
pub use crate::transport::{StreamTransport, SubmitOptions};
pub use crate::types::{
    NormalizedMessage, Role, RunMeta, SourceEntry, StreamEvent, ToolCallRecord, TransportEvent,
};

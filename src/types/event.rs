//! Events delivered by the stream transport.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::payload::{field, str_field};

/// One event on the multi-channel run stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Full transcript as currently known by the transport.
    MessageDelta(Vec<Value>),
    /// Free-form `tool` / `source` payload.
    Custom(Value),
    /// Run and thread identifiers plus an event-type tag.
    Metadata(Value),
    /// Whole-state snapshot (stage, progress, module output, messages).
    ValuesSnapshot(Value),
}

/// Run identity as reported by lifecycle callbacks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

impl RunMeta {
    pub fn new(run_id: impl Into<String>, thread_id: Option<String>) -> Self {
        Self {
            run_id: Some(run_id.into()),
            thread_id,
        }
    }

    /// Extract run identity from a metadata payload.
    ///
    /// The run id may sit at the top level or under `run`; the thread id
    /// follows the same lookup. Returns `None` when no run id is present.
    pub fn from_metadata(metadata: &Value) -> Option<Self> {
        let nested = field(metadata, "run");
        let run_id = str_field(metadata, "run_id")
            .or_else(|| nested.and_then(|run| str_field(run, "run_id")))?;
        let thread_id = str_field(metadata, "thread_id")
            .or_else(|| nested.and_then(|run| str_field(run, "thread_id")));
        Some(Self {
            run_id: Some(run_id.to_string()),
            thread_id: thread_id.map(str::to_string),
        })
    }
}

/// Metadata event tag that marks a failed run.
pub const RESPONSE_FAILED: &str = "response.failed";

/// Event-type tag of a metadata payload (`type`, else `event`).
pub fn metadata_event_type(metadata: &Value) -> Option<&str> {
    str_field(metadata, "type").or_else(|| str_field(metadata, "event"))
}

/// Everything the transport can report for one submitted run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportEvent {
    /// The server accepted the run.
    Created { meta: RunMeta },
    /// The server assigned (or confirmed) the thread for the run.
    ThreadAssigned { thread_id: String },
    /// A data event on one of the stream channels.
    Stream { event: StreamEvent },
    /// The run completed.
    Finished {
        #[serde(default)]
        meta: Option<RunMeta>,
    },
    /// The stream failed.
    Failed {
        error: String,
        #[serde(default)]
        meta: Option<RunMeta>,
    },
}

impl From<StreamEvent> for TransportEvent {
    fn from(event: StreamEvent) -> Self {
        TransportEvent::Stream { event }
    }
}

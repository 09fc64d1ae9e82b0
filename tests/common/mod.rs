//! Shared test helpers: a scripted transport and a recording cancel client.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;

use runweave::config::{ClientConfig, Section};
use runweave::error::RunweaveError;
use runweave::run::{CancelClient, CancelResponse};
use runweave::session::Session;
use runweave::transport::{EventStream, RunInput, StreamTransport, SubmitOptions};
use runweave::types::{RunMeta, StreamEvent, TransportEvent};

/// A transport that replays queued event scripts, one per submission.
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<VecDeque<Vec<TransportEvent>>>,
    submissions: Mutex<Vec<(RunInput, SubmitOptions)>>,
    stops: Mutex<usize>,
    fail_submit: Mutex<bool>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue the events delivered for the next submission.
    pub fn queue(&self, events: Vec<TransportEvent>) {
        self.scripts.lock().unwrap().push_back(events);
    }

    pub fn fail_next_submit(&self) {
        *self.fail_submit.lock().unwrap() = true;
    }

    pub fn submissions(&self) -> Vec<(RunInput, SubmitOptions)> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn stop_count(&self) -> usize {
        *self.stops.lock().unwrap()
    }
}

#[async_trait]
impl StreamTransport for ScriptedTransport {
    async fn submit(&self, input: RunInput, options: SubmitOptions) -> Result<EventStream, RunweaveError> {
        if std::mem::take(&mut *self.fail_submit.lock().unwrap()) {
            return Err(RunweaveError::Stream("connection refused".into()));
        }
        self.submissions.lock().unwrap().push((input, options));
        let events = self.scripts.lock().unwrap().pop_front().unwrap_or_default();
        Ok(futures::stream::iter(events).boxed())
    }

    async fn stop(&self) -> Result<(), RunweaveError> {
        *self.stops.lock().unwrap() += 1;
        Ok(())
    }
}

/// A cancel client that records every request.
pub struct RecordingCancel {
    calls: Mutex<Vec<(String, String)>>,
    response: Result<CancelResponse, u16>,
}

impl RecordingCancel {
    pub fn new() -> Arc<Self> {
        Self::responding(Ok(CancelResponse::Cancelled))
    }

    /// `Err(status)` makes every request fail with that HTTP status.
    pub fn responding(response: Result<CancelResponse, u16>) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            response,
        })
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CancelClient for RecordingCancel {
    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<CancelResponse, RunweaveError> {
        self.calls
            .lock()
            .unwrap()
            .push((thread_id.to_string(), run_id.to_string()));
        self.response
            .map_err(|status| RunweaveError::api(status, "cancel rejected"))
    }
}

pub fn session_with(transport: Arc<ScriptedTransport>, cancel: Arc<RecordingCancel>) -> Session {
    Session::new(ClientConfig::default(), Section::Chat, transport, cancel)
}

pub fn created(run_id: &str, thread_id: &str) -> TransportEvent {
    TransportEvent::Created {
        meta: RunMeta::new(run_id, Some(thread_id.to_string())),
    }
}

pub fn messages(raw: Vec<Value>) -> TransportEvent {
    StreamEvent::MessageDelta(raw).into()
}

pub fn values(snapshot: Value) -> TransportEvent {
    StreamEvent::ValuesSnapshot(snapshot).into()
}

pub fn metadata(payload: Value) -> TransportEvent {
    StreamEvent::Metadata(payload).into()
}

pub fn custom(payload: Value) -> TransportEvent {
    StreamEvent::Custom(payload).into()
}

pub fn finished(run_id: &str, thread_id: &str) -> TransportEvent {
    TransportEvent::Finished {
        meta: Some(RunMeta::new(run_id, Some(thread_id.to_string()))),
    }
}

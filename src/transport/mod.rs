//! Stream transport seam.
//!
//! Establishing the multi-channel stream (and retrying it) belongs to the
//! transport; the session only submits runs and consumes the typed events.

use std::sync::Mutex;

use async_trait::async_trait;
use bon::Builder;
use futures::stream::BoxStream;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::RunweaveError;
use crate::types::{Role, TransportEvent};

/// Events of one submitted run, in delivery order.
pub type EventStream = BoxStream<'static, TransportEvent>;

/// One message of a run input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InputMessage {
    pub role: Role,
    pub content: String,
}

/// Input state submitted with a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunInput {
    pub messages: Vec<InputMessage>,
}

impl RunInput {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            messages: vec![InputMessage {
                role: Role::User,
                content: text.into(),
            }],
        }
    }
}

/// Options of a run submission.
#[derive(Debug, Clone, Default, PartialEq, Builder, Serialize)]
pub struct SubmitOptions {
    #[builder(default)]
    pub stream_modes: Vec<String>,
    #[builder(default)]
    pub stream_resumable: bool,
    #[builder(default)]
    pub stream_subgraphs: bool,
    /// Existing thread to run on; the server creates one when `None`.
    #[builder(into)]
    pub thread_id: Option<String>,
    /// Metadata for a newly created thread.
    pub metadata: Option<Value>,
    #[builder(into)]
    pub assistant_id: Option<String>,
}

/// Submits runs and delivers their events.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    async fn submit(&self, input: RunInput, options: SubmitOptions) -> Result<EventStream, RunweaveError>;

    /// Stop delivering events for the current run.
    async fn stop(&self) -> Result<(), RunweaveError>;
}

/// A run handed to whatever drives a [`ChannelTransport`].
#[derive(Debug)]
pub struct Submission {
    pub input: RunInput,
    pub options: SubmitOptions,
    /// Sink for the run's events; dropping it ends the stream.
    pub events: mpsc::UnboundedSender<TransportEvent>,
}

/// Transport backed by channels, for drivers living in another task.
///
/// Each `submit` hands a [`Submission`] to the driver and returns a stream of
/// whatever the driver sends back. A newer submission or `stop` ends the
/// previous stream.
#[derive(Debug)]
pub struct ChannelTransport {
    submissions: mpsc::UnboundedSender<Submission>,
    stop_signal: Mutex<Option<oneshot::Sender<()>>>,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Submission>) {
        let (submissions, rx) = mpsc::unbounded_channel();
        let transport = Self {
            submissions,
            stop_signal: Mutex::new(None),
        };
        (transport, rx)
    }

    fn replace_stop_signal(&self, signal: Option<oneshot::Sender<()>>) -> Option<oneshot::Sender<()>> {
        let mut slot = self
            .stop_signal
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        std::mem::replace(&mut *slot, signal)
    }
}

#[async_trait]
impl StreamTransport for ChannelTransport {
    async fn submit(&self, input: RunInput, options: SubmitOptions) -> Result<EventStream, RunweaveError> {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        debug!(thread_id = ?options.thread_id, "submitting run");
        self.submissions
            .send(Submission {
                input,
                options,
                events: events_tx,
            })
            .map_err(|_| RunweaveError::Stream("transport driver is gone".into()))?;
        // Dropping the previous sender ends the previous stream.
        self.replace_stop_signal(Some(stop_tx));

        let stream = async_stream::stream! {
            loop {
                let next = tokio::select! {
                    biased;
                    _ = &mut stop_rx => None,
                    event = events_rx.recv() => event,
                };
                match next {
                    Some(event) => yield event,
                    None => break,
                }
            }
        };
        Ok(Box::pin(stream))
    }

    async fn stop(&self) -> Result<(), RunweaveError> {
        if let Some(signal) = self.replace_stop_signal(None) {
            let _ = signal.send(());
        }
        Ok(())
    }
}

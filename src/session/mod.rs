//! Session controller.
//!
//! A [`Session`] owns all reconciliation state for one client session: the
//! raw transcript, the tool tracker, the tool-output and source sinks, the
//! stage tracker and the run tracker. Transport events are processed one at
//! a time through `&mut self`; the derived display state is recomputed after
//! every event and exposed through [`SessionView`].
//!
//! Switching threads is a barrier: the event stream of the old thread is
//! dropped before any state for the new thread is set up. The one exception
//! is [`TransportEvent::ThreadAssigned`], where the server names the thread
//! of the in-flight run and the stream keeps going. Because the run carries
//! on, the transcript and stage history stay as they are; only tool state and
//! sources switch to the new thread, with tool calls re-scanned from the
//! transcript. Every other thread change also resets the stage history.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{ClientConfig, Section};
use crate::error::RunweaveError;
use crate::normalize::normalize;
use crate::reconcile::{reconcile, ToolTracker};
use crate::run::{
    CancelClient, CancelOutcome, FileRunSlotStore, HttpCancelClient, MemoryRunSlotStore, RunHandle, RunSlotStore,
    RunTracker,
};
use crate::sink::UpsertSink;
use crate::stage::{StageTracker, StageView};
use crate::threads::{HttpThreadDirectory, ThreadDirectory, ThreadIndex, ThreadOpen};
use crate::transport::{EventStream, RunInput, StreamTransport, SubmitOptions};
use crate::types::payload::{array_field, first_field, object_entries};
use crate::types::{NormalizedMessage, SourceEntry, StreamEvent, ToolCallRecord, TransportEvent};

/// How long the thread-switching flag stays up without new messages.
pub const TRANSITION_WINDOW: Duration = Duration::from_millis(280);

/// Snapshot of everything a UI needs to render the session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub section: Section,
    pub thread_id: Option<String>,
    pub assistant_id: String,
    pub messages: Vec<NormalizedMessage>,
    pub tool_outputs: Vec<ToolCallRecord>,
    pub sources: Vec<SourceEntry>,
    pub stage: Option<String>,
    pub stage_history: Vec<String>,
    pub progress: f64,
    pub is_loading: bool,
    pub is_transitioning: bool,
    /// The tool list went from empty to non-empty on the latest update.
    pub tool_outputs_appeared: bool,
    pub active_run: Option<RunHandle>,
}

/// Reconciles one client session against a stream transport.
pub struct Session {
    config: ClientConfig,
    section: Section,
    /// Assistant picked from the quick options, overriding the section's.
    assistant: Option<Section>,
    graph_id: String,
    transport: Arc<dyn StreamTransport>,
    runs: RunTracker,
    threads: Option<ThreadIndex>,

    thread_id: Option<String>,
    events: Option<EventStream>,
    loading: bool,
    transition_deadline: Option<Instant>,

    raw_messages: Vec<Value>,
    values: Option<Value>,
    messages: Vec<NormalizedMessage>,
    tools: ToolTracker,
    tool_outputs: UpsertSink<ToolCallRecord>,
    sources: UpsertSink<SourceEntry>,
    sources_cache: HashMap<String, Vec<SourceEntry>>,
    stage: StageTracker,

    previous_tool_count: usize,
    tool_outputs_appeared: bool,
    pending_cancels: Vec<JoinHandle<CancelOutcome>>,
}

impl Session {
    /// Create a session for `section`.
    ///
    /// Run slots are file-backed when the config names a slot directory and
    /// in-memory otherwise.
    pub fn new(
        config: ClientConfig,
        section: Section,
        transport: Arc<dyn StreamTransport>,
        cancel_client: Arc<dyn CancelClient>,
    ) -> Self {
        let slots: Arc<dyn RunSlotStore> = match &config.run_slot_dir {
            Some(dir) => Arc::new(FileRunSlotStore::new(dir)),
            None => Arc::new(MemoryRunSlotStore::new()),
        };
        let graph_id = config.resolve_assistant_id(section, None);
        Self {
            section,
            assistant: None,
            graph_id,
            transport,
            runs: RunTracker::new(slots, cancel_client),
            threads: None,
            thread_id: None,
            events: None,
            loading: false,
            transition_deadline: None,
            raw_messages: Vec::new(),
            values: None,
            messages: Vec::new(),
            tools: ToolTracker::new(),
            tool_outputs: UpsertSink::new(),
            sources: UpsertSink::new(),
            sources_cache: HashMap::new(),
            stage: StageTracker::new(),
            previous_tool_count: 0,
            tool_outputs_appeared: false,
            pending_cancels: Vec::new(),
            config,
        }
    }

    /// Create a session talking HTTP to the configured execution service.
    pub fn from_config(
        config: ClientConfig,
        section: Section,
        transport: Arc<dyn StreamTransport>,
    ) -> Result<Self, RunweaveError> {
        let base_url = config
            .base_url()
            .ok_or_else(|| RunweaveError::Configuration("RUNWEAVE_API_BASE_URL is not set".into()))?;
        let cancel = Arc::new(HttpCancelClient::new(base_url.clone()));
        let directory = Arc::new(HttpThreadDirectory::new(Some(base_url)));
        Ok(Self::new(config, section, transport, cancel).with_directory(directory))
    }

    pub fn with_slot_store(mut self, slots: Arc<dyn RunSlotStore>) -> Self {
        self.runs = self.runs.with_slot_store(slots);
        self
    }

    pub fn with_directory(mut self, directory: Arc<dyn ThreadDirectory>) -> Self {
        self.threads = Some(ThreadIndex::new(directory));
        self
    }

    pub fn section(&self) -> Section {
        self.section
    }

    pub fn thread_id(&self) -> Option<&str> {
        self.thread_id.as_deref()
    }

    pub fn graph_id(&self) -> &str {
        &self.graph_id
    }

    /// Assistant the next run is submitted to.
    pub fn assistant_id(&self) -> String {
        self.config
            .resolve_assistant_id(self.assistant.unwrap_or(self.section), None)
    }

    pub fn stream_modes(&self) -> &'static [&'static str] {
        self.assistant.unwrap_or(self.section).stream_modes()
    }

    pub fn messages(&self) -> &[NormalizedMessage] {
        &self.messages
    }

    pub fn raw_messages(&self) -> &[Value] {
        &self.raw_messages
    }

    pub fn tool_outputs(&self) -> &[ToolCallRecord] {
        self.tool_outputs.entries()
    }

    pub fn sources(&self) -> &[SourceEntry] {
        self.sources.entries()
    }

    pub fn tool_tracker(&self) -> &ToolTracker {
        &self.tools
    }

    pub fn stage(&self) -> StageView {
        self.stage.view()
    }

    pub fn runs(&self) -> &RunTracker {
        &self.runs
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn has_stream(&self) -> bool {
        self.events.is_some()
    }

    /// Whether the thread-switching flag is up.
    pub fn is_transitioning(&self) -> bool {
        self.transition_deadline
            .is_some_and(|deadline| Instant::now() < deadline)
    }

    /// View path of the current thread, or the section's base path.
    pub fn current_path(&self) -> String {
        match self.thread_id.as_deref() {
            Some(thread_id) => self.section.thread_path(thread_id),
            None => self.section.base_path().to_string(),
        }
    }

    pub fn view(&self) -> SessionView {
        let stage = self.stage.view();
        SessionView {
            section: self.section,
            thread_id: self.thread_id.clone(),
            assistant_id: self.assistant_id(),
            messages: self.messages.clone(),
            tool_outputs: self.tool_outputs.to_vec(),
            sources: self.sources.to_vec(),
            stage: stage.stage,
            stage_history: stage.history,
            progress: stage.progress,
            is_loading: self.loading,
            is_transitioning: self.is_transitioning(),
            tool_outputs_appeared: self.tool_outputs_appeared,
            active_run: self.runs.active(),
        }
    }

    /// Whether the assistant picker should be offered for `input`.
    ///
    /// Only on a fresh thread without user messages, when the input starts
    /// with `/` or ends with a whitespace-separated `/`.
    pub fn should_show_quick_options(&self, input: &str) -> bool {
        if self.thread_id.is_some() || self.messages.iter().any(NormalizedMessage::is_user) {
            return false;
        }
        if input.trim_start().starts_with('/') {
            return true;
        }
        input
            .trim()
            .strip_suffix('/')
            .is_some_and(|rest| rest.ends_with(char::is_whitespace))
    }

    /// Submit a user message as a new run.
    ///
    /// Returns `Ok(false)` when the input is blank or a run is already
    /// loading. On failure the trimmed input is carried in
    /// [`RunweaveError::Submit`] so the caller can put it back.
    pub async fn send(&mut self, text: &str) -> Result<bool, RunweaveError> {
        let trimmed = text.trim();
        let assistant_id = self.assistant_id();
        if trimmed.is_empty() || self.loading || assistant_id.trim().is_empty() {
            return Ok(false);
        }

        self.sources.clear();
        self.tool_outputs.clear();
        self.refresh_derived();

        let metadata = match self.thread_id {
            Some(_) => None,
            None => Some(json!({"thread_name": trimmed, "graph_id": self.graph_id})),
        };
        let options = SubmitOptions::builder()
            .stream_modes(self.stream_modes().iter().map(|mode| mode.to_string()).collect())
            .stream_resumable(true)
            .stream_subgraphs(true)
            .maybe_thread_id(self.thread_id.clone())
            .maybe_metadata(metadata)
            .assistant_id(assistant_id)
            .build();

        match self.transport.submit(RunInput::user(trimmed), options).await {
            Ok(stream) => {
                debug!(thread_id = ?self.thread_id, "run submitted");
                self.events = Some(stream);
                self.loading = true;
                self.refresh_derived();
                Ok(true)
            }
            Err(err) => {
                warn!(error = %err, "failed to submit message");
                Err(RunweaveError::Submit {
                    input: trimmed.to_string(),
                    message: err.to_string(),
                })
            }
        }
    }

    /// Stop the current run: stop the transport and cancel on the server.
    ///
    /// Only the transport stop is awaited; a failure there is only logged.
    /// The cancel request runs in the background and its outcome is handed
    /// out by [`take_pending_cancels`](Self::take_pending_cancels). Returns
    /// `false` when nothing is loading.
    pub async fn stop(&mut self) -> bool {
        if !self.loading {
            return false;
        }
        let handle = self.runs.spawn_cancel(None);
        self.track_cancel(handle);
        if let Err(err) = self.transport.stop().await {
            warn!(error = %err, "failed to stop active stream");
        }
        self.events = None;
        self.loading = false;
        self.refresh_derived();
        true
    }

    /// Leave the current thread for a fresh one. Returns the path to show.
    pub async fn start_new_thread(&mut self) -> &'static str {
        if self.loading {
            if let Err(err) = self.transport.stop().await {
                warn!(error = %err, "failed to stop active stream before reset");
            }
        }
        self.drop_stream();
        self.trigger_transition();
        self.assistant = None;
        self.graph_id = self.config.resolve_assistant_id(self.section, None);
        self.enter_thread(None, false);
        self.section.base_path()
    }

    /// Switch to an existing thread.
    pub fn select_thread(&mut self, thread_id: &str) {
        let thread_id = Some(thread_id.trim())
            .filter(|id| !id.is_empty())
            .map(str::to_string);
        if thread_id == self.thread_id {
            return;
        }
        self.drop_stream();
        self.trigger_transition();
        self.enter_thread(thread_id, false);
    }

    /// Open a thread by id after checking it exists.
    ///
    /// Without a thread directory every id is accepted.
    pub async fn open_thread(&mut self, thread_id: &str) -> ThreadOpen {
        let thread_id = thread_id.trim();
        if thread_id.is_empty() {
            return ThreadOpen::Redirect(self.section.base_path());
        }
        let decision = match self.threads.as_mut() {
            Some(index) => index.check(thread_id, self.section).await,
            None => ThreadOpen::Opened(thread_id.to_string()),
        };
        match &decision {
            ThreadOpen::Opened(id) => self.select_thread(id),
            ThreadOpen::Redirect(path) => info!(thread_id, path, "unknown thread, redirecting"),
        }
        decision
    }

    /// Pick an assistant from the quick options by label.
    ///
    /// Ignored while loading or for a blank label. An unknown label falls
    /// back to the section's own assistant. Either way tool tracking is reset
    /// and the session leaves its thread.
    pub fn select_assistant(&mut self, option: &str) -> bool {
        let option = option.trim();
        if self.loading || option.is_empty() {
            return false;
        }
        self.assistant = option.parse::<Section>().ok();
        self.graph_id = self.assistant_id();
        self.drop_stream();
        self.enter_thread(None, false);
        true
    }

    /// Receive and process one transport event.
    ///
    /// Returns `false` once there is no stream or the stream has ended.
    pub async fn pump(&mut self) -> bool {
        let Some(stream) = self.events.as_mut() else {
            return false;
        };
        match stream.next().await {
            Some(event) => {
                self.handle_event(event);
                true
            }
            None => {
                debug!("event stream ended");
                self.events = None;
                if self.loading {
                    self.loading = false;
                    self.refresh_derived();
                }
                false
            }
        }
    }

    /// Process events until the current stream ends.
    pub async fn drain(&mut self) {
        while self.pump().await {}
    }

    /// Route one event. Must run inside a Tokio runtime, since failures
    /// spawn cancellation tasks.
    pub fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Created { meta } => {
                self.runs.on_created(&meta);
            }
            TransportEvent::ThreadAssigned { thread_id } => {
                self.assign_thread(thread_id);
            }
            TransportEvent::Stream { event } => self.handle_stream_event(event),
            TransportEvent::Finished { meta } => {
                self.runs.on_finish(meta.as_ref());
                self.events = None;
                self.loading = false;
            }
            TransportEvent::Failed { error, meta } => {
                warn!(error = %error, "run stream failed");
                self.events = None;
                self.loading = false;
                let handle = self.runs.on_error(meta);
                self.track_cancel(handle);
            }
        }
        self.refresh_derived();
    }

    /// Cancellation tasks spawned by failures and stops since the last call.
    pub fn take_pending_cancels(&mut self) -> Vec<JoinHandle<CancelOutcome>> {
        std::mem::take(&mut self.pending_cancels)
    }

    fn handle_stream_event(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::MessageDelta(messages) => {
                debug!(count = messages.len(), "transcript update");
                self.raw_messages = messages;
                reconcile(&mut self.tools, &self.raw_messages, &mut self.tool_outputs);
            }
            StreamEvent::Custom(payload) => {
                self.upsert_side_entries(&payload, &["tool"], &["source"]);
            }
            StreamEvent::Metadata(metadata) => {
                if let Some(target) = self.runs.on_metadata(&metadata) {
                    let handle = self.runs.spawn_cancel(Some(target));
                    self.track_cancel(handle);
                }
                self.upsert_side_entries(&metadata, &["tool", "tools"], &["source", "sources"]);
            }
            StreamEvent::ValuesSnapshot(values) => {
                self.stage.observe(&values);
                if values.get("messages").is_some_and(Value::is_array) {
                    self.raw_messages = array_field(&values, "messages").to_vec();
                    reconcile(&mut self.tools, &self.raw_messages, &mut self.tool_outputs);
                }
                self.values = Some(values);
            }
        }
    }

    fn upsert_side_entries(&mut self, payload: &Value, tool_keys: &[&str], source_keys: &[&str]) {
        if let Some(tools) = first_field(payload, tool_keys) {
            for entry in object_entries(tools) {
                self.tool_outputs.upsert(ToolCallRecord::from_payload(entry));
            }
        }
        if let Some(sources) = first_field(payload, source_keys) {
            for entry in object_entries(sources) {
                self.sources.upsert(SourceEntry::from_payload(entry));
            }
        }
    }

    // The server named the thread of the in-flight run; keep its stream.
    fn assign_thread(&mut self, thread_id: String) {
        if let Some(index) = self.threads.as_mut() {
            index.insert(thread_id.clone());
        }
        if self.thread_id.as_deref() == Some(thread_id.as_str()) {
            return;
        }
        info!(thread_id = %thread_id, "thread assigned");
        self.trigger_transition();
        self.enter_thread(Some(thread_id), true);
    }

    /// Install a new thread identity and reset per-thread state.
    ///
    /// With `keep_transcript` the raw transcript and stage history survive
    /// and tool calls are re-scanned from the transcript.
    fn enter_thread(&mut self, thread_id: Option<String>, keep_transcript: bool) {
        self.thread_id = thread_id;
        self.runs.set_selected_thread(self.thread_id.clone());

        self.tools.reset();
        self.tool_outputs.clear();
        let cached = self
            .thread_id
            .as_ref()
            .and_then(|id| self.sources_cache.get(id))
            .cloned()
            .unwrap_or_default();
        self.sources.restore(cached);

        if keep_transcript {
            reconcile(&mut self.tools, &self.raw_messages, &mut self.tool_outputs);
        } else {
            self.raw_messages.clear();
            self.values = None;
            self.stage.reset();
        }
        self.refresh_derived();
    }

    fn drop_stream(&mut self) {
        if self.events.take().is_some() {
            debug!("dropping event stream of previous thread");
        }
        self.loading = false;
    }

    fn trigger_transition(&mut self) {
        self.transition_deadline = Some(Instant::now() + TRANSITION_WINDOW);
    }

    fn track_cancel(&mut self, handle: JoinHandle<CancelOutcome>) {
        self.pending_cancels.retain(|pending| !pending.is_finished());
        self.pending_cancels.push(handle);
    }

    /// Recompute everything derived from the raw state.
    fn refresh_derived(&mut self) {
        self.messages = normalize(&self.raw_messages, self.loading, self.values.as_ref());
        if !self.messages.is_empty() {
            self.transition_deadline = None;
        }

        let count = self.tool_outputs.len();
        self.tool_outputs_appeared = self.previous_tool_count == 0 && count > 0;
        self.previous_tool_count = count;

        if let Some(thread_id) = self.thread_id.as_ref() {
            self.sources_cache
                .insert(thread_id.clone(), self.sources.to_vec());
        }
    }
}

//! Tool-call reconciliation across transcript updates.
//!
//! The transport re-delivers the whole transcript on every update, so the
//! reconciler re-scans every message each time. Two pieces of state make
//! that safe: the set of call keys already sighted and the per-key chunk
//! accumulator. Both live in [`ToolTracker`], owned by the session and
//! passed in explicitly; they are reset only when the active thread changes.

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};

use serde_json::{json, Value};

use crate::content::args_text;
use crate::sink::{synthesize_key, UpsertSink};
use crate::types::payload::{array_field, field, first_field, first_str, scalar_text, str_field};
use crate::types::ToolCallRecord;

/// Fields probed, in order, for a call's identity.
pub const CALL_KEY_FIELDS: &[&str] = &["id", "tool_call_id", "call_id", "name"];
/// Fields probed, in order, for a call's display title.
pub const CALL_TITLE_FIELDS: &[&str] = &["name", "tool", "toolName", "type"];
/// Fields probed, in order, for a call's argument payload.
pub const CALL_ARGS_FIELDS: &[&str] = &["args", "arguments", "input", "parameters"];
/// Content block tags that denote an inline tool invocation.
pub const TOOL_BLOCK_TYPES: &[&str] = &["tool_use", "tool_call", "tool"];

const DEFAULT_TITLE: &str = "Tool Call";

/// Position of one chunk fragment: the message it came from and its index
/// inside that message's chunk list.
type ChunkSlot = (String, usize);

/// Fragments accumulated for one call key, in first-seen order.
#[derive(Debug, Default, Clone)]
struct Accumulation {
    fragments: Vec<(ChunkSlot, String)>,
}

impl Accumulation {
    /// Record a fragment. A replayed slot is replaced rather than appended,
    /// and never by a shorter fragment.
    fn record(&mut self, slot: ChunkSlot, fragment: String) {
        match self.fragments.iter_mut().find(|(existing, _)| *existing == slot) {
            Some((_, current)) => {
                if fragment.len() >= current.len() {
                    *current = fragment;
                }
            }
            None => self.fragments.push((slot, fragment)),
        }
    }

    fn text(&self) -> String {
        self.fragments.iter().map(|(_, fragment)| fragment.as_str()).collect()
    }
}

/// Seen-id set and chunk accumulator for the active thread.
#[derive(Debug, Default, Clone)]
pub struct ToolTracker {
    seen: HashSet<String>,
    chunks: HashMap<String, Accumulation>,
}

impl ToolTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget every sighting and accumulated fragment.
    pub fn reset(&mut self) {
        self.seen.clear();
        self.chunks.clear();
    }

    pub fn is_seen(&self, key: &str) -> bool {
        self.seen.contains(key)
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    /// Text accumulated from chunks for `key`.
    pub fn accumulated(&self, key: &str) -> Option<String> {
        self.chunks.get(key).map(Accumulation::text)
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty() && self.chunks.is_empty()
    }
}

/// One call or chunk found in a message.
struct Candidate<'a> {
    payload: Cow<'a, Value>,
    chunk: Option<ChunkSlot>,
}

/// Scan the transcript and upsert every tool call into `sink`.
pub fn reconcile(tracker: &mut ToolTracker, transcript: &[Value], sink: &mut UpsertSink<ToolCallRecord>) {
    for (index, message) in transcript.iter().enumerate() {
        for candidate in candidates(message, index) {
            process(tracker, candidate, sink);
        }
    }
}

/// Calls, then chunks, then inline tool blocks of one message.
fn candidates(message: &Value, index: usize) -> Vec<Candidate<'_>> {
    if !message.is_object() {
        return Vec::new();
    }
    let nested = field(message, "additional_kwargs")
        .map(|kwargs| array_field(kwargs, "tool_calls"))
        .unwrap_or_default();
    let mut found: Vec<Candidate<'_>> = array_field(message, "tool_calls")
        .iter()
        .chain(nested)
        .map(|call| Candidate {
            payload: Cow::Borrowed(call),
            chunk: None,
        })
        .collect();

    let identity = str_field(message, "id")
        .map(str::to_string)
        .unwrap_or_else(|| format!("#{index}"));
    found.extend(
        array_field(message, "tool_call_chunks")
            .iter()
            .enumerate()
            .map(|(position, chunk)| Candidate {
                payload: Cow::Borrowed(chunk),
                chunk: Some((identity.clone(), position)),
            }),
    );

    found.extend(
        array_field(message, "content")
            .iter()
            .filter(|block| {
                str_field(block, "type").is_some_and(|tag| TOOL_BLOCK_TYPES.contains(&tag))
            })
            .map(|block| Candidate {
                payload: Cow::Owned(json!({
                    "id": first_field(block, &["id", "tool_call_id"]),
                    "name": first_field(block, &["name", "tool"]),
                    "args": first_field(block, &["input", "arguments", "args"]),
                    "type": block.get("type"),
                })),
                chunk: None,
            }),
    );
    found
}

fn process(tracker: &mut ToolTracker, candidate: Candidate<'_>, sink: &mut UpsertSink<ToolCallRecord>) {
    let call = candidate.payload.as_ref();
    if !call.is_object() {
        return;
    }
    let key = call_key(call);
    // Later chunks usually carry no name; keep the title already shown.
    let title = call_title(call)
        .or_else(|| sink.get(&key).map(|record| record.title.clone()))
        .unwrap_or_else(|| DEFAULT_TITLE.to_string());
    let mut content = call_args(call);

    match candidate.chunk {
        Some(slot) => {
            let accumulation = tracker.chunks.entry(key.clone()).or_default();
            accumulation.record(slot, content);
            content = accumulation.text();
        }
        None => {
            if content.is_empty() {
                if let Some(accumulated) = tracker.accumulated(&key) {
                    content = accumulated;
                }
            }
            if tracker.seen.insert(key.clone()) {
                tracing::debug!(key = %key, title = %title, "tool call sighted");
            }
        }
    }

    sink.upsert(ToolCallRecord::new(key, title, content, candidate.payload.into_owned()));
}

/// Identity of a call: id, tool_call_id, call_id, name, else a fresh key.
pub fn call_key(call: &Value) -> String {
    first_field(call, CALL_KEY_FIELDS)
        .and_then(scalar_text)
        .unwrap_or_else(|| synthesize_key("tool"))
}

fn call_title(call: &Value) -> Option<String> {
    str_field(call, "name")
        .or_else(|| field(call, "function").and_then(|f| str_field(f, "name")))
        .or_else(|| first_str(call, &CALL_TITLE_FIELDS[1..]))
        .map(str::to_string)
}

fn call_args(call: &Value) -> String {
    first_field(call, CALL_ARGS_FIELDS)
        .or_else(|| field(call, "function").and_then(|f| field(f, "arguments")))
        .map(args_text)
        .unwrap_or_default()
}

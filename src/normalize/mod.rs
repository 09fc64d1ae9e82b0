//! Message normalization: raw transcript to display messages.
//!
//! The display transcript is re-derived from scratch on every transcript or
//! snapshot change; nothing here keeps state between calls.

use std::collections::HashSet;

use serde_json::Value;

use crate::content::{resolve, resolve_module};
use crate::types::payload::{field, str_field};
use crate::types::{MessageSource, NormalizedMessage, Role};

/// Message tags that belong to the tool panel, never to the transcript.
const TOOL_MESSAGE_TYPES: &[&str] = &["tool", "tool_calls", "tool_message", "tool_result"];

/// Side fields that carry module output on individual messages.
pub const MODULE_FIELDS: &[&str] = &["module", "module_output", "moduleOutput", "moduleResult"];

/// Id of the message synthesized from a snapshot's module payload.
pub const VALUES_MODULE_ID: &str = "values-module";

/// Build the display transcript.
///
/// `values` is the latest whole-state snapshot; a top-level `module` (or
/// `modules`) payload that no message already shows is appended as an extra
/// assistant message.
pub fn normalize(raw: &[Value], is_run_active: bool, values: Option<&Value>) -> Vec<NormalizedMessage> {
    let mapped = map_with_module_flags(raw, is_run_active);
    let module = values.and_then(values_module_message);
    let already_present = module.as_ref().is_some_and(|module| {
        mapped.iter().any(|(msg, carries_module)| {
            msg.source == MessageSource::ValuesModule || (*carries_module && msg.text == module.text)
        })
    });

    let mut messages: Vec<NormalizedMessage> = mapped.into_iter().map(|(msg, _)| msg).collect();
    if let Some(module) = module.filter(|_| !already_present) {
        messages.push(module);
    }
    messages
}

/// Map raw messages to display messages and flag the streaming one.
pub fn map_messages(raw: &[Value], is_run_active: bool) -> Vec<NormalizedMessage> {
    map_with_module_flags(raw, is_run_active)
        .into_iter()
        .map(|(msg, _)| msg)
        .collect()
}

/// Display messages paired with whether their raw message carries `module`.
fn map_with_module_flags(raw: &[Value], is_run_active: bool) -> Vec<(NormalizedMessage, bool)> {
    let mut normalized: Vec<(NormalizedMessage, bool)> = Vec::with_capacity(raw.len());
    let mut last_assistant = None;

    for (index, message) in raw.iter().enumerate() {
        if !message.is_object() {
            continue;
        }
        if is_tool_message(message) {
            continue;
        }
        let kind = str_field(message, "type").or_else(|| str_field(message, "role"));

        let role = resolve_role(message);
        let text = message_text(message);
        if text.is_empty() && role != Role::User {
            continue;
        }

        let id = str_field(message, "id")
            .map(str::to_string)
            .unwrap_or_else(|| format!("{role}-{index}"));
        let message_entry = NormalizedMessage {
            id,
            role,
            text,
            streaming: false,
            kind: kind.map(str::to_string),
            source: MessageSource::Transcript,
        };
        normalized.push((message_entry, field(message, "module").is_some()));

        if !matches!(role, Role::User | Role::System) {
            last_assistant = Some(normalized.len() - 1);
        }
    }

    if is_run_active {
        if let Some(pos) = last_assistant {
            normalized[pos].0.streaming = true;
        }
    }
    normalized
}

/// Whether the `type` or `role` tag marks a tool call or tool result.
pub fn is_tool_message(message: &Value) -> bool {
    ["type", "role"]
        .iter()
        .filter_map(|key| str_field(message, key))
        .any(|tag| TOOL_MESSAGE_TYPES.contains(&tag))
}

/// Role of a raw message: explicit `role` first, then the `type` tag.
pub fn resolve_role(message: &Value) -> Role {
    let tag = str_field(message, "role").or_else(|| str_field(message, "type"));
    match tag {
        Some("user" | "human") => Role::User,
        Some("system") => Role::System,
        _ => Role::Assistant,
    }
}

/// Display text of one message.
///
/// Segments are collected from `text`, `content`, the module side fields and
/// `value`, trimmed, deduplicated, and joined by a blank line.
pub fn message_text(message: &Value) -> String {
    let mut segments = Segments::default();

    if let Some(text) = str_field(message, "text") {
        segments.push(text);
    }
    if let Some(content) = message.get("content") {
        segments.push(&resolve(content));
    }
    for key in MODULE_FIELDS {
        if let Some(module) = field(message, key) {
            segments.push(&resolve_module(module));
        }
    }
    if let Some(value) = str_field(message, "value") {
        segments.push(value);
    }

    segments.joined()
}

#[derive(Default)]
struct Segments {
    seen: HashSet<String>,
    ordered: Vec<String>,
}

impl Segments {
    fn push(&mut self, value: &str) {
        let trimmed = value.trim();
        if trimmed.is_empty() || self.seen.contains(trimmed) {
            return;
        }
        self.seen.insert(trimmed.to_string());
        self.ordered.push(trimmed.to_string());
    }

    fn joined(self) -> String {
        self.ordered.join("\n\n")
    }
}

/// Module payload of a snapshot rendered as an assistant message.
fn values_module_message(values: &Value) -> Option<NormalizedMessage> {
    let payload = field(values, "module").or_else(|| field(values, "modules"))?;
    let text = match payload {
        Value::String(s) => s.clone(),
        other => match serde_json::to_string_pretty(other) {
            Ok(json) if !json.trim().is_empty() => format!("```json\n{json}\n```"),
            _ => other.to_string(),
        },
    };
    if text.trim().is_empty() {
        return None;
    }
    Some(NormalizedMessage {
        id: VALUES_MODULE_ID.to_string(),
        role: Role::Assistant,
        text,
        streaming: false,
        kind: Some("module".to_string()),
        source: MessageSource::ValuesModule,
    })
}

//! Tool-output and source entries.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::payload::{first_field, first_str, scalar_text};
use crate::content;
use crate::sink::SinkEntry;

/// Fields probed, in order, for the identity of a side-channel entry.
const ENTRY_KEY_FIELDS: &[&str] = &["id", "tool_call_id", "toolName", "name"];

/// One tool invocation as shown in the tool panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub key: String,
    pub title: String,
    /// Argument or output text; grows while chunks arrive.
    pub content: String,
    /// The payload this record was last built from.
    pub raw: Value,
}

impl ToolCallRecord {
    pub fn new(key: impl Into<String>, title: impl Into<String>, content: impl Into<String>, raw: Value) -> Self {
        Self {
            key: key.into(),
            title: title.into(),
            content: content.into(),
            raw,
        }
    }

    /// Build a record from a free-form `tool` payload of a custom or metadata event.
    ///
    /// The key is left empty when the payload carries no identity; the sink
    /// assigns one on insertion.
    pub fn from_payload(payload: &Map<String, Value>) -> Self {
        let value = Value::Object(payload.clone());
        let key = first_field(&value, ENTRY_KEY_FIELDS)
            .and_then(scalar_text)
            .unwrap_or_default();
        let title = first_str(&value, &["title", "name", "tool", "toolName"])
            .unwrap_or("Tool Output")
            .to_string();
        let content = match first_field(&value, &["content", "output", "result"]) {
            Some(body) => content::resolve_module(body),
            None => first_field(&value, &["args", "arguments", "input"])
                .map(content::args_text)
                .unwrap_or_default(),
        };
        Self {
            key,
            title,
            content,
            raw: value,
        }
    }
}

impl SinkEntry for ToolCallRecord {
    fn key(&self) -> Option<&str> {
        Some(self.key.as_str()).filter(|key| !key.is_empty())
    }

    fn set_key(&mut self, key: String) {
        self.key = key;
    }

    fn merge(&mut self, newer: Self) {
        self.title = newer.title;
        self.raw = newer.raw;
        if !newer.content.is_empty() {
            self.content = newer.content;
        }
    }
}

/// A citation or retrieved document reported by the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceEntry {
    pub key: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl SourceEntry {
    pub fn from_payload(payload: &Map<String, Value>) -> Self {
        let key = ENTRY_KEY_FIELDS
            .iter()
            .filter_map(|field| payload.get(*field).filter(|v| !v.is_null()))
            .find_map(scalar_text)
            .unwrap_or_default();
        Self {
            key,
            fields: payload.clone(),
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }
}

impl SinkEntry for SourceEntry {
    fn key(&self) -> Option<&str> {
        Some(self.key.as_str()).filter(|key| !key.is_empty())
    }

    fn set_key(&mut self, key: String) {
        self.key = key;
    }

    fn merge(&mut self, newer: Self) {
        self.fields.extend(newer.fields);
    }
}

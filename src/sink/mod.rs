//! Keyed merge-or-append collections.
//!
//! Used for tool outputs and sources: inserting an entry whose key already
//! exists merges into the existing entry in place (later fields win),
//! anything else is appended. Order of first insertion is preserved.

use std::collections::HashMap;

use serde::Serialize;
use uuid::Uuid;

/// An entry that can live in an [`UpsertSink`].
pub trait SinkEntry: Clone {
    /// Stable identity carried by the entry, if any.
    fn key(&self) -> Option<&str>;
    /// Store the identity assigned by the sink.
    fn set_key(&mut self, key: String);
    /// Fold a newer version of the same entry into `self`.
    fn merge(&mut self, newer: Self);
}

/// Ordered collection keyed by entry identity.
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct UpsertSink<T> {
    entries: Vec<T>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl<T> Default for UpsertSink<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<T: SinkEntry> UpsertSink<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a sink from a previously exported list.
    pub fn from_entries(entries: impl IntoIterator<Item = T>) -> Self {
        let mut sink = Self::new();
        sink.extend(entries);
        sink
    }

    /// Insert or merge one entry, returning the key it was stored under.
    ///
    /// Entries without a key get a synthesized one; such keys are unique but
    /// not reproducible, so re-inserting the same keyless payload appends again.
    pub fn upsert(&mut self, mut entry: T) -> String {
        let key = match entry.key() {
            Some(key) if !key.is_empty() => key.to_string(),
            _ => {
                let key = synthesize_key("event");
                entry.set_key(key.clone());
                key
            }
        };
        match self.index.get(&key) {
            Some(&pos) => self.entries[pos].merge(entry),
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }
        key
    }

    pub fn get(&self, key: &str) -> Option<&T> {
        self.index.get(key).map(|&pos| &self.entries[pos])
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn entries(&self) -> &[T] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }

    /// Replace the whole content with `entries`.
    pub fn restore(&mut self, entries: impl IntoIterator<Item = T>) {
        self.clear();
        self.extend(entries);
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.entries.clone()
    }
}

impl<T: SinkEntry> Extend<T> for UpsertSink<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for entry in iter {
            self.upsert(entry);
        }
    }
}

/// Unique fallback key with the given prefix.
pub(crate) fn synthesize_key(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4().simple())
}

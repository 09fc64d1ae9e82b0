//! Thread directory: which thread ids exist on the execution service.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::config::Section;
use crate::error::RunweaveError;
use crate::types::payload::{field, first_field, scalar_text};
use crate::util::http::{endpoint_url, shared_client, status_to_error};

/// Lists the threads known to the execution service.
#[async_trait]
pub trait ThreadDirectory: Send + Sync {
    async fn list_thread_ids(&self) -> Result<Vec<String>, RunweaveError>;
}

/// Directory backed by `GET {base}/threads`.
#[derive(Debug, Clone)]
pub struct HttpThreadDirectory {
    base_url: Option<String>,
    client: reqwest::Client,
}

impl HttpThreadDirectory {
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            base_url,
            client: shared_client().clone(),
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }
}

#[async_trait]
impl ThreadDirectory for HttpThreadDirectory {
    async fn list_thread_ids(&self) -> Result<Vec<String>, RunweaveError> {
        let Some(base_url) = self.base_url.as_deref().filter(|url| !url.trim().is_empty()) else {
            warn!("no execution service base url; thread list is empty");
            return Ok(Vec::new());
        };
        let url = endpoint_url(base_url, &["threads"])?;
        let resp = self.client.get(url).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(status_to_error(status.as_u16(), &body));
        }
        let payload: Value = resp.json().await?;
        Ok(extract_thread_ids(&payload))
    }
}

/// Thread ids of a listing: a bare array or `{"threads": [...]}`.
pub fn extract_thread_ids(payload: &Value) -> Vec<String> {
    let list = match payload {
        Value::Array(items) => items.as_slice(),
        other => field(other, "threads")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default(),
    };
    list.iter().filter_map(thread_id_of).collect()
}

/// Id of one listed thread: `id`, `thread_id`, then the same under `metadata`.
pub fn thread_id_of(thread: &Value) -> Option<String> {
    first_field(thread, &["id", "thread_id"])
        .or_else(|| field(thread, "metadata").and_then(|meta| first_field(meta, &["thread_id", "id"])))
        .and_then(scalar_text)
}

/// Result of opening a thread by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThreadOpen {
    Opened(String),
    /// The thread does not exist; show the section's base path instead.
    Redirect(&'static str),
}

/// Cached set of known thread ids, refreshed on demand.
pub struct ThreadIndex {
    directory: Arc<dyn ThreadDirectory>,
    known: HashSet<String>,
}

impl ThreadIndex {
    pub fn new(directory: Arc<dyn ThreadDirectory>) -> Self {
        Self {
            directory,
            known: HashSet::new(),
        }
    }

    pub fn contains(&self, thread_id: &str) -> bool {
        self.known.contains(thread_id)
    }

    pub fn insert(&mut self, thread_id: impl Into<String>) {
        self.known.insert(thread_id.into());
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    /// Replace the cache with the directory's current listing.
    pub async fn refresh(&mut self) -> Result<(), RunweaveError> {
        let ids = self.directory.list_thread_ids().await?;
        self.known = ids.into_iter().collect();
        Ok(())
    }

    /// Decide whether `thread_id` can be opened in `section`.
    ///
    /// Unknown ids trigger one refresh. A failing directory does not block
    /// the thread.
    pub async fn check(&mut self, thread_id: &str, section: Section) -> ThreadOpen {
        if self.contains(thread_id) {
            return ThreadOpen::Opened(thread_id.to_string());
        }
        if let Err(err) = self.refresh().await {
            warn!(thread_id, error = %err, "failed to verify thread");
            return ThreadOpen::Opened(thread_id.to_string());
        }
        if self.contains(thread_id) {
            ThreadOpen::Opened(thread_id.to_string())
        } else {
            ThreadOpen::Redirect(section.base_path())
        }
    }
}

//! Server-side run cancellation.

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;

use crate::error::RunweaveError;
use crate::util::http::{endpoint_url, shared_client, status_to_error};

/// What the server said about a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelResponse {
    Cancelled,
    /// The run no longer exists on the server.
    NotFound,
}

/// Asks the execution service to cancel a run.
#[async_trait]
pub trait CancelClient: Send + Sync {
    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<CancelResponse, RunweaveError>;
}

/// Cancel client for `POST {base}/threads/{thread}/runs/{run}/cancel`.
#[derive(Debug, Clone)]
pub struct HttpCancelClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpCancelClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: shared_client().clone(),
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl CancelClient for HttpCancelClient {
    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<CancelResponse, RunweaveError> {
        let url = endpoint_url(&self.base_url, &["threads", thread_id, "runs", run_id, "cancel"])?;
        debug!(thread_id, run_id, "cancelling run");

        let resp = self
            .client
            .post(url)
            .query(&[("wait", "0"), ("action", "cancel")])
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(CancelResponse::NotFound);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(status_to_error(status.as_u16(), &body));
        }
        Ok(CancelResponse::Cancelled)
    }
}

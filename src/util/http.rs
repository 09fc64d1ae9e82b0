//! Shared HTTP client and status mapping for the execution-service endpoints.

use std::sync::OnceLock;

use crate::error::RunweaveError;

static SHARED_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

/// Get (or create) the shared reqwest client.
pub fn shared_client() -> &'static reqwest::Client {
    SHARED_CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .pool_max_idle_per_host(4)
            .build()
            .expect("Failed to build HTTP client")
    })
}

/// Strip a single trailing slash so paths can be appended with `/`.
pub fn normalize_base_url(url: &str) -> String {
    let trimmed = url.trim();
    trimmed.strip_suffix('/').unwrap_or(trimmed).to_string()
}

/// Parse a base URL and append percent-encoded path segments.
pub fn endpoint_url(base: &str, segments: &[&str]) -> Result<reqwest::Url, RunweaveError> {
    let mut url = reqwest::Url::parse(&normalize_base_url(base))
        .map_err(|e| RunweaveError::Configuration(format!("invalid base url {base:?}: {e}")))?;
    url.path_segments_mut()
        .map_err(|_| RunweaveError::Configuration(format!("base url {base:?} cannot carry a path")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Map a non-success HTTP status to an error.
pub fn status_to_error(status: u16, body: &str) -> RunweaveError {
    let message = extract_error_message(body).unwrap_or_else(|| body.trim().to_string());
    RunweaveError::api(status, message)
}

fn extract_error_message(body: &str) -> Option<String> {
    let value = serde_json::from_str::<serde_json::Value>(body).ok()?;
    value
        .get("detail")
        .or_else(|| value.get("message"))
        .or_else(|| value.get("error").and_then(|e| e.get("message")))
        .and_then(|m| m.as_str())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_loses_trailing_slash() {
        assert_eq!(normalize_base_url("http://host:2024/"), "http://host:2024");
        assert_eq!(normalize_base_url("http://host:2024"), "http://host:2024");
    }

    #[test]
    fn endpoint_url_encodes_segments_and_keeps_prefix() {
        let url = endpoint_url("http://host/api/", &["threads", "a b", "runs", "r/1"]).unwrap();
        assert_eq!(url.as_str(), "http://host/api/threads/a%20b/runs/r%2F1");
    }

    #[test]
    fn endpoint_url_rejects_garbage() {
        assert!(matches!(
            endpoint_url("not a url", &["threads"]),
            Err(RunweaveError::Configuration(_))
        ));
    }

    #[test]
    fn status_error_prefers_detail_field() {
        let err = status_to_error(409, r#"{"detail":"run is busy"}"#);
        assert_eq!(err.to_string(), "API error (status 409): run is busy");
        let err = status_to_error(500, "boom\n");
        assert_eq!(err.to_string(), "API error (status 500): boom");
    }
}

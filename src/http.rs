//! JSON-over-HTTP helper shared by the embedding and generation providers.
//!
//! Retry strategy:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors (including timeouts) → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::time::Duration;

/// POST `body` to `url` with bearer auth and return the parsed JSON response.
///
/// Errors are plain strings; each provider wraps them in its own
/// [`RagError`](crate::error::RagError) variant.
pub(crate) async fn post_json(
    client: &reqwest::Client,
    url: &str,
    api_key: &str,
    body: &serde_json::Value,
    max_retries: u32,
    label: &str,
) -> Result<serde_json::Value, String> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::warn!(
                provider = label,
                attempt,
                delay_secs = delay.as_secs(),
                "retrying request"
            );
            tokio::time::sleep(delay).await;
        }

        let resp = client
            .post(url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await;

        match resp {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response
                        .json::<serde_json::Value>()
                        .await
                        .map_err(|e| format!("{} returned invalid JSON: {}", label, e));
                }

                let body_text = response.text().await.unwrap_or_default();
                let err = format!("{} API error {}: {}", label, status, body_text);

                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(err);
                    continue;
                }

                return Err(err);
            }
            Err(e) => {
                last_err = Some(format!("{} request failed: {}", label, e));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| format!("{} request failed after retries", label)))
}

/// Build a client with the given request timeout.
pub(crate) fn client(timeout_secs: u64) -> Result<reqwest::Client, String> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| format!("failed to create HTTP client: {}", e))
}

/// Read the first set variable among `names`.
pub(crate) fn api_key(names: &[&str]) -> Result<String, String> {
    names
        .iter()
        .find_map(|n| std::env::var(n).ok().filter(|v| !v.is_empty()))
        .ok_or_else(|| format!("{} environment variable not set", names.join(" or ")))
}

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use thiserror::Error;
use url::Url;

use crate::feed::error::FeedError;
use crate::feed::relay::Relay;
use crate::feed::retry::{retry, RetryPolicy};

const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Last cache buster handed out, in epoch milliseconds.
static LAST_CACHE_BUSTER: AtomicI64 = AtomicI64::new(0);

/// Errors from a single fetch attempt through one relay.
///
/// Every variant is transient from the client's point of view: the attempt is
/// retried under the backoff policy, then the next relay is tried.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Attempt exceeded its timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    /// Successful status but nothing (or only whitespace) in the body
    #[error("Empty response body")]
    EmptyBody,
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

/// A feed body accepted from one relay.
#[derive(Debug)]
pub struct Acquired {
    pub body: Vec<u8>,
    /// Index of the relay that served the body.
    pub relay: usize,
    /// 1-based attempt number on that relay.
    pub attempt: u32,
    /// Attempts made across all relays, including the successful one.
    pub total_attempts: u32,
}

/// Fetches the feed through `relays` in declared order.
///
/// Each relay gets `policy.max_attempts()` tries with exponential backoff
/// between them; only once they are all spent does the next relay get a turn.
/// Attempts are strictly sequential. Every attempt carries a fresh cache-busting
/// parameter and is bounded by `attempt_timeout`.
///
/// # Errors
///
/// - [`FeedError::Exhausted`] carrying the last attempt's error when every
///   relay failed every attempt
/// - [`FeedError::NoRelays`] when `relays` is empty
pub async fn acquire(
    client: &reqwest::Client,
    feed_url: &Url,
    relays: &[Relay],
    policy: &RetryPolicy,
    attempt_timeout: Duration,
) -> Result<Acquired, FeedError> {
    if relays.is_empty() {
        return Err(FeedError::NoRelays);
    }

    let mut total_attempts = 0u32;
    let mut last_error = None;

    for (index, relay) in relays.iter().enumerate() {
        let label = relay.label();
        let result = retry(policy, |attempt| {
            total_attempts += 1;
            let url = relay.request_url(feed_url, next_cache_buster());
            let label = label.as_str();
            async move {
                tracing::debug!(relay = %label, attempt = attempt, "Fetching feed");
                fetch_attempt(client, &url, attempt_timeout)
                    .await
                    .map(|body| (body, attempt))
            }
        })
        .await;

        match result {
            Ok((body, attempt)) => {
                tracing::info!(
                    relay = %label,
                    attempt = attempt,
                    bytes = body.len(),
                    "Feed fetched"
                );
                return Ok(Acquired {
                    body,
                    relay: index,
                    attempt,
                    total_attempts,
                });
            }
            Err(e) => {
                tracing::warn!(
                    relay = %label,
                    attempts = policy.max_attempts(),
                    error = %e,
                    "Relay exhausted, falling back to next"
                );
                last_error = Some(e);
            }
        }
    }

    match last_error {
        Some(last) => Err(FeedError::Exhausted {
            relays: relays.len(),
            attempts: total_attempts,
            last: Arc::new(last),
        }),
        None => Err(FeedError::NoRelays),
    }
}

/// Epoch milliseconds, bumped past the previous value so that attempts within
/// the same millisecond still get distinct URLs.
fn next_cache_buster() -> i64 {
    let now = Utc::now().timestamp_millis();
    let prev = LAST_CACHE_BUSTER
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |last| {
            Some(now.max(last + 1))
        })
        .unwrap_or_else(|last| last);
    now.max(prev + 1)
}

/// One bounded request: send, check status, read the body.
async fn fetch_attempt(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> Result<Vec<u8>, FetchError> {
    let bytes = tokio::time::timeout(timeout, send_and_read(client, url))
        .await
        .map_err(|_| FetchError::Timeout(timeout))??;

    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(FetchError::EmptyBody);
    }

    Ok(bytes)
}

async fn send_and_read(client: &reqwest::Client, url: &str) -> Result<Vec<u8>, FetchError> {
    let response = client.get(url).send().await?;

    if !response.status().is_success() {
        return Err(FetchError::HttpStatus(response.status().as_u16()));
    }

    read_limited_bytes(response, MAX_FEED_SIZE).await
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}

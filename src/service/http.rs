//! reqwest-backed [`Transport`].
//!
//! - Connection pooling through one shared `Client`
//! - Automatic retry with exponential backoff on 429 and connection errors
//! - Query parameters flattened to `key=value` pairs

use futures::future::{BoxFuture, FutureExt};
use log::{debug, warn};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use super::{ApiRequest, Method, Transport};
use crate::config::ServiceConfig;
use crate::error::{Result, TrekRouteError};

/// Tracks consecutive 429s across all requests of one transport.
struct Backoff {
    consecutive_429s: AtomicU32,
}

impl Backoff {
    fn new() -> Self {
        Self {
            consecutive_429s: AtomicU32::new(0),
        }
    }

    fn record_success(&self) {
        self.consecutive_429s.store(0, Ordering::Relaxed);
    }

    fn record_429(&self) -> Duration {
        let count = self.consecutive_429s.fetch_add(1, Ordering::Relaxed) + 1;
        // Exponential backoff: 2s, 4s, 8s, 16s
        Duration::from_millis(1000 * (1 << count.min(4)))
    }

    fn connection_error(retries: u32) -> Duration {
        Duration::from_millis(500 * (1 << retries.min(6)))
    }
}

/// HTTP transport against a REST backend rooted at `base_url`.
pub struct HttpTransport {
    client: Client,
    base_url: String,
    max_retries: u32,
    timeout_ms: u64,
    backoff: Backoff,
}

impl HttpTransport {
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| TrekRouteError::configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
            timeout_ms: config.timeout_ms,
            backoff: Backoff::new(),
        })
    }

    pub fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send_with_retry(&self, request: ApiRequest) -> Result<Value> {
        let url = self.url_for(&request.path);
        let query = query_pairs(&request.params);
        let mut retries = 0;

        loop {
            let mut builder = match request.method {
                Method::Get => self.client.get(&url),
                Method::Post => self.client.post(&url),
                Method::Put => self.client.put(&url),
                Method::Patch => self.client.patch(&url),
                Method::Delete => self.client.delete(&url),
            };
            if !query.is_empty() {
                builder = builder.query(&query);
            }
            if let Some(body) = &request.body {
                builder = builder.json(body);
            }

            match builder.send().await {
                Ok(resp) => {
                    let status = resp.status();

                    if status == StatusCode::TOO_MANY_REQUESTS {
                        retries += 1;
                        if retries > self.max_retries {
                            return Err(TrekRouteError::http_status(
                                429,
                                "Max retries exceeded (429)",
                            ));
                        }
                        let backoff = self.backoff.record_429();
                        warn!(
                            "[HttpTransport] 429 for {} {}, retry {} after {:?}",
                            request.method, request.path, retries, backoff
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }

                    self.backoff.record_success();
                    let text = resp
                        .text()
                        .await
                        .map_err(|e| TrekRouteError::network(e.to_string()))?;

                    if !status.is_success() {
                        return Err(TrekRouteError::http_status(
                            status.as_u16(),
                            error_message(status, &text),
                        ));
                    }

                    debug!(
                        "[HttpTransport] {} {} -> {}",
                        request.method, request.path, status
                    );
                    if text.trim().is_empty() {
                        return Ok(Value::Null);
                    }
                    return Ok(serde_json::from_str(&text)?);
                }
                Err(e) if e.is_timeout() => {
                    return Err(TrekRouteError::Timeout {
                        operation: format!("{} {}", request.method, request.path),
                        timeout_ms: self.timeout_ms,
                    });
                }
                Err(e) => {
                    retries += 1;
                    if retries > self.max_retries {
                        return Err(TrekRouteError::network(format!("Request error: {}", e)));
                    }
                    let backoff = Backoff::connection_error(retries);
                    warn!(
                        "[HttpTransport] Error for {} {}: {}, retry {} after {:?}",
                        request.method, request.path, e, retries, backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: ApiRequest) -> BoxFuture<'_, Result<Value>> {
        self.send_with_retry(request).boxed()
    }
}

/// Flatten a JSON object into query pairs. Nulls are dropped, strings are
/// sent unquoted, everything else as its JSON text.
fn query_pairs(params: &Value) -> Vec<(String, String)> {
    let Value::Object(map) = params else {
        return Vec::new();
    };
    map.iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| {
            let value = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), value)
        })
        .collect()
}

/// Prefer the backend's `message` field over the raw body.
fn error_message(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| format!("HTTP {}", status))
}

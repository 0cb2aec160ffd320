//! Outbound HTTP core for the remote platform.
//!
//! Every request is classified into a rate-limit tier and must win a token
//! before it leaves the process; transient failures are retried with
//! exponential backoff and jitter. Successful platform envelopes are
//! unwrapped to their `data` payload; failures are normalised into the
//! typed error space without leaking internals.

use crate::errors::{LatticeError, LatticeResult};
use crate::limiter::TieredRateLimiter;
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

const INITIAL_BACKOFF_MS: u64 = 500;
const MAX_BACKOFF_MS: u64 = 10_000;

/// Classify an outbound call into a limiter tier by URL path and method.
///
/// Privileged path segments trump the method split: anything under
/// `/admin/`, `/auth/` or `/tenant/` is `admin` traffic regardless of verb.
pub fn classify_tier(method: &Method, path: &str) -> &'static str {
    if path.contains("/admin/") || path.contains("/auth/") || path.contains("/tenant/") {
        return "admin";
    }
    match *method {
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE => "write",
        Method::GET | Method::HEAD | Method::OPTIONS => "read",
        _ => "default",
    }
}

pub struct PlatformClient {
    http: Client,
    base_url: Url,
    limiter: Arc<TieredRateLimiter>,
    /// Additional attempts after the first, for transient failures only.
    max_retries: u32,
}

impl PlatformClient {
    pub fn new(
        base_url: &str,
        timeout_secs: u64,
        max_retries: u32,
        limiter: Arc<TieredRateLimiter>,
    ) -> LatticeResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| LatticeError::Misconfigured(format!("platform base URL: {}", e)))?;
        let http = Client::builder()
            .user_agent(crate::USER_AGENT)
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_else(|_| Client::new());
        Ok(Self {
            http,
            base_url,
            limiter,
            max_retries,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Issue a JSON request through the rate limiter and unwrap the platform
    /// envelope.
    ///
    /// `query` is appended to the URL; `body` is sent as JSON for non-GET
    /// verbs; `token` becomes a bearer credential.
    pub async fn send_json(
        &self,
        method: Method,
        path: &str,
        query: &[(String, String)],
        body: Option<&Value>,
        token: Option<&str>,
    ) -> LatticeResult<Value> {
        self.request_json(method, path, query, body, token, true)
            .await
    }

    /// Like [`send_json`](Self::send_json) but returns the whole response
    /// body. For the few endpoints (token issuance) that do not use the
    /// standard `{code, msg, data}` envelope.
    pub async fn send_raw(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> LatticeResult<Value> {
        self.request_json(method, path, &[], body, None, false).await
    }

    /// Exchange app credentials for a tenant access token.
    pub async fn fetch_tenant_token(
        &self,
        app_id: &str,
        app_secret: &str,
    ) -> LatticeResult<(String, i64)> {
        let body = serde_json::json!({"app_id": app_id, "app_secret": app_secret});
        let response = self
            .send_raw(
                Method::POST,
                "/open-apis/auth/v3/tenant_access_token/internal",
                Some(&body),
            )
            .await?;
        let code = response.get("code").and_then(Value::as_i64).unwrap_or(-1);
        if code != 0 {
            return Err(LatticeError::Backend {
                message: format!("tenant token issuance failed (code {})", code),
                retryable: false,
            });
        }
        let token = response
            .get("tenant_access_token")
            .and_then(Value::as_str)
            .ok_or(LatticeError::Backend {
                message: "tenant token missing from response".to_string(),
                retryable: false,
            })?;
        let expire_secs = response.get("expire").and_then(Value::as_i64).unwrap_or(7200);
        Ok((token.to_string(), expire_secs))
    }

    async fn request_json(
        &self,
        method: Method,
        path: &str,
        query: &[(String, String)],
        body: Option<&Value>,
        token: Option<&str>,
        unwrap_envelope: bool,
    ) -> LatticeResult<Value> {
        let url = self
            .base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| LatticeError::InvalidParams(format!("bad request path: {}", e)))?;
        let tier = classify_tier(&method, path);

        let mut last_error: Option<LatticeError> = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = backoff_delay(attempt - 1);
                debug!(
                    "platform request retry {}/{} after {}ms",
                    attempt,
                    self.max_retries,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            // Each attempt is an outbound call and pays the tier toll.
            if !self.limiter.consume(tier).await {
                return Err(LatticeError::RateLimitExceeded {
                    tier: tier.to_string(),
                });
            }

            let mut request = self.http.request(method.clone(), url.clone());
            if !query.is_empty() {
                request = request.query(query);
            }
            if let Some(body) = body {
                request = request.json(body);
            }
            if let Some(token) = token {
                request = request.bearer_auth(token);
            }

            match request.send().await {
                Ok(response) => match read_response(response, unwrap_envelope).await {
                    Ok(value) => return Ok(value),
                    Err(err) => {
                        if !err.is_retryable() || attempt == self.max_retries {
                            return Err(err);
                        }
                        warn!("platform request failed (attempt {}): {}", attempt, err);
                        last_error = Some(err);
                    }
                },
                Err(err) => {
                    // Connection and timeout failures are transient by nature.
                    let wrapped = LatticeError::Backend {
                        message: normalise_transport_error(&err),
                        retryable: true,
                    };
                    if attempt == self.max_retries {
                        return Err(wrapped);
                    }
                    warn!("platform request failed (attempt {}): {}", attempt, wrapped);
                    last_error = Some(wrapped);
                }
            }
        }

        Err(last_error.unwrap_or(LatticeError::Backend {
            message: "request failed".to_string(),
            retryable: false,
        }))
    }

    pub async fn get_json(
        &self,
        path: &str,
        query: &[(String, String)],
        token: Option<&str>,
    ) -> LatticeResult<Value> {
        self.send_json(Method::GET, path, query, None, token).await
    }

    pub async fn post_json(
        &self,
        path: &str,
        body: &Value,
        token: Option<&str>,
    ) -> LatticeResult<Value> {
        self.send_json(Method::POST, path, &[], Some(body), token)
            .await
    }
}

/// Keep reqwest's error chains (with URLs and socket addresses) out of
/// user-visible messages.
fn normalise_transport_error(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        "request timed out".to_string()
    } else if err.is_connect() {
        "connection failed".to_string()
    } else {
        "transport error".to_string()
    }
}

/// Response interceptor: unwrap the platform `{code, msg, data}` envelope on
/// success, normalise failures into retryable/terminal backend errors.
async fn read_response(response: reqwest::Response, unwrap_envelope: bool) -> LatticeResult<Value> {
    let status = response.status();

    if status.is_success() {
        let body: Value = response.json().await.map_err(|_| LatticeError::Backend {
            message: "platform returned malformed JSON".to_string(),
            retryable: false,
        })?;
        if !unwrap_envelope {
            return Ok(body);
        }
        if let Some(code) = body.get("code").and_then(Value::as_i64) {
            if code != 0 {
                let msg = body
                    .get("msg")
                    .and_then(Value::as_str)
                    .unwrap_or("platform error");
                return Err(LatticeError::Backend {
                    message: format!("platform error {}: {}", code, msg),
                    retryable: false,
                });
            }
            return Ok(body.get("data").cloned().unwrap_or(Value::Null));
        }
        return Ok(body);
    }

    let retryable = status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
    Err(LatticeError::Backend {
        message: format!("platform returned HTTP {}", status.as_u16()),
        retryable,
    })
}

fn backoff_delay(retry_index: u32) -> Duration {
    let base = INITIAL_BACKOFF_MS
        .saturating_mul(2u64.saturating_pow(retry_index))
        .min(MAX_BACKOFF_MS);
    // Up to 25% jitter to avoid thundering herds on shared backends.
    let jitter = (base as f64 * 0.25 * fastrand::f64()) as u64;
    Duration::from_millis(base + jitter)
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Outbound request pipeline: bearer attachment, 401 renew-and-retry, and
//! deduplicated delayed retry for rate-limited requests.
//!
//! Per-request states: `INIT → SENT → (OK | ERROR)`;
//! `ERROR(401) → RENEWING → RETRY → (OK | FATAL)`;
//! `ERROR(429) → WAITING → RETRY → (OK | ERROR)`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::error::{ApiError, ErrorKind};
use crate::session::manager::SessionManager;

type TicketFuture = Shared<BoxFuture<'static, Result<Value, ApiError>>>;

/// Wraps every outbound call to the backend.
pub struct RequestPipeline {
    config: SessionConfig,
    client: Client,
    manager: Arc<SessionManager>,
    /// Pending delayed retries, at most one per `(method, normalized URL)`.
    tickets: Mutex<HashMap<String, TicketFuture>>,
}

impl RequestPipeline {
    pub fn new(config: SessionConfig, manager: Arc<SessionManager>) -> Arc<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .unwrap_or_default();
        Arc::new(Self { config, client, manager, tickets: Mutex::new(HashMap::new()) })
    }

    /// Execute a request and return the normalized body. Every failure is
    /// an [`ApiError`]; raw transport errors never escape.
    pub async fn request(
        self: &Arc<Self>,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, ApiError> {
        let url = self.absolute(path);
        let resp = self.send_once(&method, &url, body.as_ref()).await?;
        let status = resp.status();

        if status.is_success() {
            return parse_body(resp).await;
        }
        if status == StatusCode::UNAUTHORIZED && !is_auth_endpoint(&url) {
            return self.renew_and_retry(method, url, body).await;
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            let delay = retry_after(&resp).unwrap_or_else(|| self.config.default_retry_after());
            return self.retry_via_ticket(method, url, body, delay).await;
        }
        Err(ApiError::from_response(resp).await)
    }

    /// One renewal and one replay for a 401. The replayed request is never
    /// renewed again: a second 401 ends the session instead of looping.
    async fn renew_and_retry(
        self: &Arc<Self>,
        method: Method,
        url: String,
        body: Option<Value>,
    ) -> Result<Value, ApiError> {
        debug!(url = %url, "401 received, renewing credential");
        if let Err(e) = self.manager.renew_credential().await {
            warn!(url = %url, err = %e, "renewal after 401 failed");
            // Fatal for this call chain and the whole session, whatever
            // kind the renewal failure was.
            self.manager.clear_session("renewal failed while retrying a 401");
            return Err(ApiError::new(ErrorKind::SessionExpired, 401, "session expired"));
        }

        let resp = self.send_once(&method, &url, body.as_ref()).await?;
        let status = resp.status();
        if status.is_success() {
            return parse_body(resp).await;
        }
        if status == StatusCode::UNAUTHORIZED {
            warn!(url = %url, "still unauthorized after renewed retry");
            self.manager.clear_session("401 after renewed retry");
            return Err(ApiError::new(ErrorKind::SessionExpired, 401, "session expired"));
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            let delay = retry_after(&resp).unwrap_or_else(|| self.config.default_retry_after());
            return self.retry_via_ticket(method, url, body, delay).await;
        }
        Err(ApiError::from_response(resp).await)
    }

    /// Deduplicated delayed retry. The first caller for a signature arms
    /// the timer; later callers attach to the existing ticket and share the
    /// single replay outcome.
    async fn retry_via_ticket(
        self: &Arc<Self>,
        method: Method,
        url: String,
        body: Option<Value>,
        delay: Duration,
    ) -> Result<Value, ApiError> {
        let key = signature(&method, &url);
        let fut = {
            let mut tickets = self.tickets.lock().await;
            match tickets.get(&key) {
                Some(pending) => {
                    debug!(signature = %key, "attaching to pending retry ticket");
                    pending.clone()
                }
                None => {
                    debug!(signature = %key, delay_secs = delay.as_secs(), "rate limited, retry scheduled");
                    let this = Arc::clone(self);
                    let scope = self.manager.session_scope();
                    let ticket_key = key.clone();
                    let fut: TicketFuture = async move {
                        let outcome = this.run_ticket(method, url, body, delay, scope).await;
                        this.tickets.lock().await.remove(&ticket_key);
                        outcome
                    }
                    .boxed()
                    .shared();
                    tickets.insert(key, fut.clone());
                    fut
                }
            }
        };
        fut.await
    }

    async fn run_ticket(
        self: &Arc<Self>,
        method: Method,
        url: String,
        body: Option<Value>,
        delay: Duration,
        scope: CancellationToken,
    ) -> Result<Value, ApiError> {
        tokio::select! {
            () = scope.cancelled() => {
                return Err(ApiError::new(
                    ErrorKind::SessionExpired,
                    401,
                    "session cleared while awaiting rate-limit retry",
                ));
            }
            () = tokio::time::sleep(delay) => {}
        }

        let resp = self.send_once(&method, &url, body.as_ref()).await?;
        let status = resp.status();
        if status.is_success() {
            return parse_body(resp).await;
        }
        if status == StatusCode::UNAUTHORIZED && !is_auth_endpoint(&url) {
            // The credential can age out while a long Retry-After elapses.
            // One renewal and one replay, inline: re-entering the ticket
            // path here would attach this ticket to itself.
            debug!(url = %url, "401 on rate-limit replay, renewing credential");
            if let Err(e) = self.manager.renew_credential().await {
                warn!(url = %url, err = %e, "renewal after replay 401 failed");
                self.manager.clear_session("renewal failed while replaying a rate-limited request");
                return Err(ApiError::new(ErrorKind::SessionExpired, 401, "session expired"));
            }
            let resp = self.send_once(&method, &url, body.as_ref()).await?;
            if resp.status().is_success() {
                return parse_body(resp).await;
            }
            if resp.status() == StatusCode::UNAUTHORIZED {
                warn!(url = %url, "still unauthorized after renewed replay");
                self.manager.clear_session("401 after renewed replay");
                return Err(ApiError::new(ErrorKind::SessionExpired, 401, "session expired"));
            }
            return Err(ApiError::from_response(resp).await);
        }
        // Retry budget for this signature is spent; surface whatever came
        // back, a repeat 429 included.
        Err(ApiError::from_response(resp).await)
    }

    async fn send_once(
        &self,
        method: &Method,
        url: &str,
        body: Option<&Value>,
    ) -> Result<reqwest::Response, ApiError> {
        let mut req = self.client.request(method.clone(), url);
        if let Some(token) = self.manager.access_token() {
            req = req.bearer_auth(token);
        }
        if let Some(b) = body {
            req = req.json(b);
        }
        Ok(req.send().await?)
    }

    fn absolute(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_owned()
        } else {
            format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
        }
    }
}

/// Auth endpoints never take the renew-and-retry path: a 401 from them is
/// the renewal outcome itself.
fn is_auth_endpoint(url: &str) -> bool {
    url.contains("/auth/")
}

/// Retry dedup key: method plus normalized URL.
fn signature(method: &Method, url: &str) -> String {
    format!("{method} {}", normalize_url(url))
}

/// Normalize for dedup: drop the fragment and trailing slash, lowercase the
/// scheme and authority (path and query stay case-sensitive).
fn normalize_url(url: &str) -> String {
    let no_fragment = url.split('#').next().unwrap_or(url);
    let trimmed = no_fragment.trim_end_matches('/');
    match trimmed.find("://").map(|i| i + 3) {
        Some(auth_start) => {
            let path_start =
                trimmed[auth_start..].find('/').map_or(trimmed.len(), |i| auth_start + i);
            format!("{}{}", trimmed[..path_start].to_lowercase(), &trimmed[path_start..])
        }
        None => trimmed.to_owned(),
    }
}

/// `Retry-After` in seconds; absent or unparseable yields `None` and the
/// configured default applies.
fn retry_after(resp: &reqwest::Response) -> Option<Duration> {
    resp.headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

async fn parse_body(resp: reqwest::Response) -> Result<Value, ApiError> {
    let status = resp.status().as_u16();
    let bytes = resp.bytes().await?;
    if bytes.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_slice(&bytes).map_err(|e| {
        ApiError::new(ErrorKind::ServerError, status, format!("malformed response body: {e}"))
    })
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end session specs.
//!
//! Runs a mock NameForge backend on a loopback port and exercises the
//! session core over real HTTP: login, refresh, logout, profile, one
//! protected endpoint, and one rate-limited endpoint.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Once};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::{json, Value};

use nameforge_session::ContextHandle;

static TRACING_INIT: Once = Once::new();

/// Route test logs through `RUST_LOG`. Safe to call from every test.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

pub fn epoch_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// Build an unsigned JWT-shaped token carrying `sub` and `exp`.
pub fn forge_token(sub: &str, exp: u64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
    let payload = URL_SAFE_NO_PAD.encode(json!({ "sub": sub, "exp": exp }).to_string());
    format!("{header}.{payload}.sig")
}

fn decode_sub(token: &str) -> Option<String> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let claims: Value = serde_json::from_slice(&bytes).ok()?;
    claims.get("sub")?.as_str().map(ToOwned::to_owned)
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(ToOwned::to_owned)
}

/// Consume one unit from a "remaining failures" counter.
fn take(counter: &AtomicU32) -> bool {
    counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok()
}

/// Shared knobs and counters for the mock backend. Tests set the knobs
/// before issuing requests and assert on the counters afterwards.
pub struct BackendState {
    /// Total `POST /auth/refresh` calls observed.
    pub refresh_calls: AtomicU32,
    /// Artificial latency for refresh, to hold renewals in flight.
    pub refresh_delay_ms: AtomicU64,
    /// When set, refresh responds 401 instead of rotating tokens.
    pub refresh_reject: AtomicBool,
    /// Remaining 429 responses for `POST /auth/refresh`.
    pub refresh_429s: AtomicU32,
    /// Remaining 401 responses for `GET /api/names`, then total hits.
    pub names_401s: AtomicU32,
    pub names_hits: AtomicU32,
    /// Remaining 429 responses for `POST /api/generate`, then remaining
    /// 401s (consumed after the 429s), then total hits.
    pub generate_429s: AtomicU32,
    pub generate_401s: AtomicU32,
    pub generate_hits: AtomicU32,
    pub retry_after_secs: AtomicU64,
    pub logout_calls: AtomicU32,
    /// When set, logout responds 500; local clearing must still happen.
    pub logout_reject: AtomicBool,
    /// Lifetime of access tokens issued by login and refresh.
    pub token_ttl_secs: AtomicU64,
}

impl Default for BackendState {
    fn default() -> Self {
        Self {
            refresh_calls: AtomicU32::new(0),
            refresh_delay_ms: AtomicU64::new(0),
            refresh_reject: AtomicBool::new(false),
            refresh_429s: AtomicU32::new(0),
            names_401s: AtomicU32::new(0),
            names_hits: AtomicU32::new(0),
            generate_429s: AtomicU32::new(0),
            generate_401s: AtomicU32::new(0),
            generate_hits: AtomicU32::new(0),
            retry_after_secs: AtomicU64::new(1),
            logout_calls: AtomicU32::new(0),
            logout_reject: AtomicBool::new(false),
            token_ttl_secs: AtomicU64::new(3600),
        }
    }
}

impl BackendState {
    fn issue_tokens(&self, id: &str) -> Value {
        let exp = epoch_secs() + self.token_ttl_secs.load(Ordering::SeqCst);
        json!({
            "access_token": forge_token(id, exp),
            "refresh_token": format!("refresh-{id}"),
        })
    }
}

/// The mock backend, bound to a loopback port for the lifetime of a test.
pub struct MockBackend {
    addr: SocketAddr,
    pub state: Arc<BackendState>,
}

impl MockBackend {
    pub async fn spawn() -> anyhow::Result<Self> {
        init_tracing();
        let state = Arc::new(BackendState::default());
        let router = Router::new()
            .route("/auth/login", post(login))
            .route("/auth/refresh", post(refresh))
            .route("/auth/logout", post(logout))
            .route("/profile", get(profile))
            .route("/api/names", get(names))
            .route("/api/generate", post(generate))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        Ok(Self { addr, state })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

async fn login(State(state): State<Arc<BackendState>>, Json(body): Json<Value>) -> Response {
    let email = body["email"].as_str().unwrap_or_default().to_owned();
    let password = body["password"].as_str().unwrap_or_default();
    if email.is_empty() || password == "wrong" {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "detail": "invalid credentials" })))
            .into_response();
    }
    let id = email.split('@').next().unwrap_or_default().to_owned();
    let mut resp = state.issue_tokens(&id);
    resp["success"] = json!(true);
    resp["user"] = json!({ "id": id, "email": email, "plan_tier": "free" });
    Json(resp).into_response()
}

async fn refresh(State(state): State<Arc<BackendState>>, body: Option<Json<Value>>) -> Response {
    state.refresh_calls.fetch_add(1, Ordering::SeqCst);
    let delay = state.refresh_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    if state.refresh_reject.load(Ordering::SeqCst) {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "detail": "refresh token revoked" })))
            .into_response();
    }
    if take(&state.refresh_429s) {
        let secs = state.retry_after_secs.load(Ordering::SeqCst).to_string();
        return (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, secs)],
            Json(json!({ "detail": "rate limit exceeded" })),
        )
            .into_response();
    }
    let id = body
        .as_ref()
        .and_then(|Json(b)| b["refresh_token"].as_str())
        .and_then(|rt| rt.strip_prefix("refresh-"))
        .unwrap_or_default()
        .to_owned();
    if id.is_empty() {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "detail": "unknown refresh token" })))
            .into_response();
    }
    Json(state.issue_tokens(&id)).into_response()
}

async fn logout(State(state): State<Arc<BackendState>>) -> Response {
    state.logout_calls.fetch_add(1, Ordering::SeqCst);
    if state.logout_reject.load(Ordering::SeqCst) {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "detail": "logout failed" })))
            .into_response();
    }
    Json(json!({ "success": true })).into_response()
}

async fn profile(headers: HeaderMap) -> Response {
    let Some(id) = bearer(&headers).as_deref().and_then(decode_sub) else {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "detail": "missing bearer" })))
            .into_response();
    };
    Json(json!({ "success": true, "id": id, "email": format!("{id}@example.com") }))
        .into_response()
}

async fn names(State(state): State<Arc<BackendState>>, headers: HeaderMap) -> Response {
    state.names_hits.fetch_add(1, Ordering::SeqCst);
    if take(&state.names_401s) || bearer(&headers).is_none() {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "detail": "token expired" })))
            .into_response();
    }
    Json(json!({ "names": ["Luna", "Nova", "Quill"] })).into_response()
}

async fn generate(State(state): State<Arc<BackendState>>) -> Response {
    state.generate_hits.fetch_add(1, Ordering::SeqCst);
    if take(&state.generate_429s) {
        let secs = state.retry_after_secs.load(Ordering::SeqCst).to_string();
        return (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, secs)],
            Json(json!({ "detail": "rate limit exceeded" })),
        )
            .into_response();
    }
    if take(&state.generate_401s) {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "detail": "token expired" })))
            .into_response();
    }
    Json(json!({ "name": "Quill" })).into_response()
}

/// Host context stub; counts forced reloads instead of performing them.
#[derive(Default)]
pub struct TestContext {
    pub reloads: AtomicU32,
}

impl ContextHandle for TestContext {
    fn reload(&self) {
        self.reloads.fetch_add(1, Ordering::SeqCst);
    }
}

/// Poll `cond` until it holds or `timeout` elapses.
pub async fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    while !cond() {
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("condition not reached within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}

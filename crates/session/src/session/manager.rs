// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token lifecycle: credential persistence, single-flight renewal, and
//! proactive renewal scheduling.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::{ApiError, ErrorKind};
use crate::http::auth_api::AuthApi;
use crate::session::observer::AuthObserver;
use crate::session::{AuthEvent, Identity, SessionSnapshot};
use crate::store::{self, SessionStore};
use crate::token::{epoch_secs, Credential};

type RenewFuture = Shared<BoxFuture<'static, Result<Credential, ApiError>>>;

/// Owns credential state for the process.
///
/// All credential writes flow through here; collaborators read through
/// [`SessionManager::access_token`] and mutate only via the explicit
/// operations below.
pub struct SessionManager {
    config: SessionConfig,
    store: Arc<dyn SessionStore>,
    api: AuthApi,
    observer: Arc<AuthObserver>,
    identity: RwLock<Option<Identity>>,
    /// The at-most-one in-flight renewal; concurrent callers share it.
    renewal: Mutex<Option<RenewFuture>>,
    /// Cancels the armed proactive-renewal timer. Replaced on every
    /// (re)schedule.
    timer: std::sync::Mutex<CancellationToken>,
    /// Scope for work tied to the current session (pending rate-limit
    /// retries). Cancelled and replaced when the session is cleared.
    scope: std::sync::Mutex<CancellationToken>,
}

impl SessionManager {
    pub fn new(
        config: SessionConfig,
        store: Arc<dyn SessionStore>,
        api: AuthApi,
        observer: Arc<AuthObserver>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            store,
            api,
            observer,
            identity: RwLock::new(None),
            renewal: Mutex::new(None),
            timer: std::sync::Mutex::new(CancellationToken::new()),
            scope: std::sync::Mutex::new(CancellationToken::new()),
        })
    }

    /// Current access token, if any. Never fails.
    pub fn access_token(&self) -> Option<String> {
        self.store.get(store::ACCESS_TOKEN)
    }

    pub fn current_identity(&self) -> Option<Identity> {
        self.identity.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Session is all-or-nothing: authenticated means both an identity and
    /// a credential are present.
    pub fn is_authenticated(&self) -> bool {
        self.current_identity().is_some() && self.access_token().is_some()
    }

    /// Cancellation scope for pending work tied to the current session.
    pub fn session_scope(&self) -> CancellationToken {
        self.scope.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Persist a fresh token pair under canonical and legacy keys in one
    /// atomic step, recompute expiry, and re-arm proactive renewal.
    ///
    /// A renewal response without a rotated refresh token keeps the stored
    /// one.
    pub fn set_credential(self: &Arc<Self>, access: &str, refresh: Option<&str>) -> Credential {
        let refresh =
            refresh.map(ToOwned::to_owned).or_else(|| self.store.get(store::REFRESH_TOKEN));
        let credential = Credential::new(access.to_owned(), refresh.clone());

        let mut entries = vec![
            (store::ACCESS_TOKEN, access.to_owned()),
            (store::LEGACY_ACCESS_TOKEN, access.to_owned()),
        ];
        if let Some(rt) = refresh {
            entries.push((store::REFRESH_TOKEN, rt));
        }
        if let Err(e) = self.store.set_many(&entries) {
            warn!(err = %e, "failed to persist credential");
        }

        self.schedule_proactive_renewal(&credential);
        credential
    }

    /// Persist a full session (tokens + identity) as one atomic step and
    /// arm renewal. Used on login and remote adoption does *not* go through
    /// here — the remote context already owns the storage write.
    pub fn set_session(
        self: &Arc<Self>,
        access: &str,
        refresh: Option<&str>,
        identity: Identity,
    ) -> Credential {
        let credential = Credential::new(access.to_owned(), refresh.map(ToOwned::to_owned));
        let user_json = serde_json::to_string(&identity).unwrap_or_default();

        let mut entries = vec![
            (store::ACCESS_TOKEN, access.to_owned()),
            (store::LEGACY_ACCESS_TOKEN, access.to_owned()),
            (store::CURRENT_USER, user_json.clone()),
            (store::LEGACY_CURRENT_USER, user_json),
            (store::LAST_USER_ID, identity.id.clone()),
        ];
        if let Some(rt) = refresh {
            entries.push((store::REFRESH_TOKEN, rt.to_owned()));
        }
        if let Err(e) = self.store.set_many(&entries) {
            warn!(err = %e, "failed to persist session");
        }

        *self.identity.write().unwrap_or_else(PoisonError::into_inner) = Some(identity);
        self.schedule_proactive_renewal(&credential);
        credential
    }

    /// Remove every canonical and legacy key, cancel the renewal timer, and
    /// collapse pending retries tied to this session.
    pub fn clear_credential(&self) {
        self.timer.lock().unwrap_or_else(PoisonError::into_inner).cancel();
        let scope = {
            let mut guard = self.scope.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *guard, CancellationToken::new())
        };
        scope.cancel();

        if let Err(e) = self.store.remove_many(store::ALL_KEYS) {
            warn!(err = %e, "failed to clear persisted session");
        }
        *self.identity.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Clear and emit the session-cleared transition. Idempotent: an
    /// already-empty session clears silently, so clear paths can overlap
    /// without double-notifying listeners.
    pub fn clear_session(&self, reason: &str) {
        let had_session = self.current_identity().is_some() || self.access_token().is_some();
        self.clear_credential();
        if had_session {
            info!(reason, "session cleared");
            self.observer.notify(AuthEvent::SessionCleared, None);
        }
    }

    /// Drop this context's in-memory session without touching storage.
    ///
    /// For when another context now owns the persisted session: the stored
    /// keys belong to the foreign identity and must survive.
    pub fn detach_local(&self, reason: &str) {
        self.timer.lock().unwrap_or_else(PoisonError::into_inner).cancel();
        let scope = {
            let mut guard = self.scope.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *guard, CancellationToken::new())
        };
        scope.cancel();

        let had_identity =
            self.identity.write().unwrap_or_else(PoisonError::into_inner).take().is_some();
        if had_identity {
            info!(reason, "local session detached");
            self.observer.notify(AuthEvent::SessionCleared, None);
        }
    }

    /// Adopt a session written by another context: in-memory state and the
    /// renewal timer only, no storage writes of our own.
    pub fn adopt_remote(self: &Arc<Self>, snapshot: SessionSnapshot) {
        *self.identity.write().unwrap_or_else(PoisonError::into_inner) =
            Some(snapshot.identity);
        self.schedule_proactive_renewal(&snapshot.credential);
    }

    /// Restore a persisted session at startup, arming proactive renewal.
    pub fn resume(self: &Arc<Self>) -> Option<Identity> {
        let snapshot = crate::session::load_snapshot(self.store.as_ref())?;
        let identity = snapshot.identity.clone();
        self.adopt_remote(snapshot);
        debug!(user = %identity.id, "persisted session restored");
        Some(identity)
    }

    /// Renew the credential against the backend. Single-flight: while one
    /// renewal is outstanding every caller awaits that same operation and
    /// observes its exact outcome.
    pub async fn renew_credential(self: &Arc<Self>) -> Result<Credential, ApiError> {
        let fut = {
            let mut slot = self.renewal.lock().await;
            match slot.as_ref() {
                Some(inflight) => inflight.clone(),
                None => {
                    let this = Arc::clone(self);
                    let fut: RenewFuture = async move {
                        let outcome = this.do_renew().await;
                        this.renewal.lock().await.take();
                        outcome
                    }
                    .boxed()
                    .shared();
                    *slot = Some(fut.clone());
                    fut
                }
            }
        };
        fut.await
    }

    async fn do_renew(self: &Arc<Self>) -> Result<Credential, ApiError> {
        let Some(refresh_token) = self.store.get(store::REFRESH_TOKEN) else {
            self.clear_session("renewal without refresh credential");
            return Err(ApiError::new(
                ErrorKind::SessionExpired,
                401,
                "no refresh credential available",
            ));
        };

        match self.api.refresh(Some(&refresh_token)).await {
            Ok(tokens) => {
                let credential =
                    self.set_credential(&tokens.access_token, tokens.refresh_token.as_deref());
                debug!(expires_at = credential.expires_at, "credential renewed");
                Ok(credential)
            }
            Err(e) if renewal_is_transient(e.kind) => {
                // The refresh credential may still be good. Keep the
                // session; the monitor loop retries.
                warn!(status = e.status, err = %e, "credential renewal failed, keeping session");
                Err(e)
            }
            Err(e) => {
                warn!(status = e.status, err = %e, "credential renewal rejected");
                self.clear_session("renewal rejected by backend");
                Err(ApiError::new(ErrorKind::SessionExpired, e.status, "session renewal failed"))
            }
        }
    }

    /// Arm the proactive renewal timer at `expires_at - lead`, clamped to
    /// fire immediately when remaining validity is already below the lead.
    /// Replaces any previously armed timer.
    fn schedule_proactive_renewal(self: &Arc<Self>, credential: &Credential) {
        let cancel = {
            let mut guard = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
            let old = std::mem::replace(&mut *guard, CancellationToken::new());
            old.cancel();
            guard.clone()
        };

        let delay = credential
            .expires_at
            .saturating_sub(self.config.renewal_lead_secs)
            .saturating_sub(epoch_secs());
        debug!(delay_secs = delay, "proactive renewal armed");

        let this = Arc::clone(self);
        let monitor = self.config.monitor_interval();
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(Duration::from_secs(delay)) => {}
            }
            this.background_renew_loop(cancel, monitor).await;
        });
    }

    /// Background renewal with monitoring-tick retries. Transient failures
    /// are non-fatal here as long as a refresh credential remains; auth
    /// rejections have already ended the session in `do_renew`.
    async fn background_renew_loop(self: &Arc<Self>, cancel: CancellationToken, monitor: Duration) {
        loop {
            match self.renew_credential().await {
                // Success re-armed a fresh timer via set_credential.
                Ok(_) => return,
                Err(e) if renewal_is_transient(e.kind) => {
                    if self.store.get(store::REFRESH_TOKEN).is_none() {
                        return;
                    }
                    warn!(err = %e, "background renewal failed, retrying on next tick");
                    tokio::select! {
                        () = cancel.cancelled() => return,
                        () = tokio::time::sleep(monitor) => {}
                    }
                }
                Err(_) => return,
            }
        }
    }
}

/// Failures that do not invalidate the refresh credential: no response at
/// all, rate limiting, or a server-side fault. Anything else is a verdict
/// on the credential itself.
fn renewal_is_transient(kind: ErrorKind) -> bool {
    kind.is_retryable() || kind == ErrorKind::ServerError
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;

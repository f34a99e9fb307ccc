// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The assembled session core.
//!
//! [`AuthService`] is constructed once by the embedding application and
//! passed by reference to every collaborator that needs it; there is no
//! process-global instance.

use std::sync::Arc;

use reqwest::Method;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::ApiError;
use crate::http::auth_api::AuthApi;
use crate::http::pipeline::RequestPipeline;
use crate::session::broadcaster::{ContextHandle, SessionBroadcaster};
use crate::session::manager::SessionManager;
use crate::session::observer::{AuthObserver, Subscription};
use crate::session::{AuthChange, AuthEvent, Identity};
use crate::store::SessionStore;

/// Facade over the session core: login/logout, state observation, and the
/// outbound request pipeline, wired over one storage substrate.
pub struct AuthService {
    api: AuthApi,
    manager: Arc<SessionManager>,
    observer: Arc<AuthObserver>,
    pipeline: Arc<RequestPipeline>,
    shutdown: CancellationToken,
}

impl AuthService {
    /// Assemble the service over the given store and host context. The
    /// cross-context reconciliation loop starts immediately and runs until
    /// [`AuthService::shutdown`] or drop.
    pub fn new(
        config: SessionConfig,
        store: Arc<dyn SessionStore>,
        context: Arc<dyn ContextHandle>,
    ) -> Arc<Self> {
        let api = AuthApi::new(&config);
        let observer = AuthObserver::new();
        let manager = SessionManager::new(
            config.clone(),
            Arc::clone(&store),
            api.clone(),
            Arc::clone(&observer),
        );
        let pipeline = RequestPipeline::new(config.clone(), Arc::clone(&manager));

        let shutdown = CancellationToken::new();
        SessionBroadcaster::new(
            store,
            Arc::clone(&manager),
            Arc::clone(&observer),
            context,
            config.remote_debounce(),
        )
        .spawn(shutdown.child_token());

        Arc::new(Self { api, manager, observer, pipeline, shutdown })
    }

    /// Restore a persisted session at startup. Listeners are notified and a
    /// background consistency check against the server profile is kicked off.
    pub fn resume(self: &Arc<Self>) -> Option<Identity> {
        let identity = self.manager.resume()?;
        self.observer.notify(AuthEvent::SessionCreated, Some(identity.clone()));
        self.spawn_profile_validation();
        Some(identity)
    }

    pub async fn login(self: &Arc<Self>, email: &str, password: &str) -> Result<Identity, ApiError> {
        let resp = self.api.login(email, password).await?;
        self.manager.set_session(
            &resp.access_token,
            resp.refresh_token.as_deref(),
            resp.user.clone(),
        );
        info!(user = %resp.user.id, "login succeeded");
        self.observer.notify(AuthEvent::SessionCreated, Some(resp.user.clone()));
        self.spawn_profile_validation();
        Ok(resp.user)
    }

    /// End the session. Server-side invalidation is best effort: a failure
    /// there never blocks the local clear.
    pub async fn logout(&self) {
        let token = self.manager.access_token();
        if let Err(e) = self.api.logout(token.as_deref()).await {
            debug!(err = %e, "server-side logout failed, clearing locally anyway");
        }
        self.manager.clear_session("user logged out");
    }

    /// Subscribe to identity transitions; the current state is replayed
    /// synchronously before this returns.
    pub fn on_auth_state_changed(
        &self,
        callback: impl Fn(&AuthChange) + Send + Sync + 'static,
    ) -> Subscription {
        self.observer.subscribe(callback)
    }

    pub fn current_user(&self) -> Option<Identity> {
        self.manager.current_identity()
    }

    pub fn is_authenticated(&self) -> bool {
        self.manager.is_authenticated()
    }

    /// Execute an API request through the pipeline (bearer attachment,
    /// renew-and-retry on 401, deduplicated delayed retry on 429).
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, ApiError> {
        self.pipeline.request(method, path, body).await
    }

    /// Stop background work: the reconciliation loop and any validation
    /// tasks still in flight.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Cross-check the local identity against the server profile. Purely a
    /// consistency probe: a mismatch is logged, and conflict resolution
    /// stays with the broadcaster.
    fn spawn_profile_validation(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let cancel = self.shutdown.child_token();
        tokio::spawn(async move {
            let Some(token) = this.manager.access_token() else { return };
            let profile = tokio::select! {
                () = cancel.cancelled() => return,
                profile = this.api.profile(&token) => profile,
            };
            match profile {
                Ok(profile) => {
                    let local = this.manager.current_identity().map(|i| i.id);
                    if local.as_deref() != Some(profile.id.as_str()) {
                        warn!(
                            local_user = local.as_deref().unwrap_or("<none>"),
                            server_user = %profile.id,
                            "profile validation found a mismatched identity"
                        );
                    }
                }
                Err(e) => debug!(err = %e, "profile validation skipped"),
            }
        });
    }
}

impl Drop for AuthService {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

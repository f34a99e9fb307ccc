// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cross-context session reconciliation.
//!
//! Watches remote-origin changes on the canonical storage keys and brings
//! this context in line: adopt, clear, or — on a foreign-identity conflict —
//! clear and force a reload of the local context.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::session::manager::SessionManager;
use crate::session::observer::AuthObserver;
use crate::session::{load_snapshot, AuthEvent};
use crate::store::{SessionStore, CANONICAL_KEYS, CURRENT_USER};

/// Host-environment control surface.
///
/// A foreign-identity conflict forces a reload of the local context; what
/// "reload" means belongs to the host (page reload in a browser shell,
/// restart in a desktop shell).
pub trait ContextHandle: Send + Sync {
    fn reload(&self);
}

/// Reconciles identity/credential changes written by other execution
/// contexts sharing the same storage substrate.
pub struct SessionBroadcaster {
    store: Arc<dyn SessionStore>,
    manager: Arc<SessionManager>,
    observer: Arc<AuthObserver>,
    context: Arc<dyn ContextHandle>,
    debounce: Duration,
}

impl SessionBroadcaster {
    pub fn new(
        store: Arc<dyn SessionStore>,
        manager: Arc<SessionManager>,
        observer: Arc<AuthObserver>,
        context: Arc<dyn ContextHandle>,
        debounce: Duration,
    ) -> Self {
        Self { store, manager, observer, context, debounce }
    }

    /// Spawn the reconciliation loop; runs until `shutdown` is cancelled.
    pub fn spawn(self, shutdown: CancellationToken) {
        tokio::spawn(async move { self.run(shutdown).await });
    }

    async fn run(self, shutdown: CancellationToken) {
        let mut rx = self.store.subscribe_remote();
        // Per-key debounce deadlines; bursts of writes coalesce into one
        // reconcile pass.
        let mut pending: HashMap<String, Instant> = HashMap::new();

        loop {
            let next_deadline = pending.values().min().copied();
            tokio::select! {
                () = shutdown.cancelled() => break,
                event = rx.recv() => match event {
                    Ok(change) => {
                        if CANONICAL_KEYS.contains(&change.key.as_str()) {
                            pending.insert(change.key, Instant::now() + self.debounce);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "remote change stream lagged, forcing reconcile");
                        pending.insert(CURRENT_USER.to_owned(), Instant::now() + self.debounce);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                () = wait_until(next_deadline) => {
                    let now = Instant::now();
                    let was_pending = pending.len();
                    pending.retain(|_, due| *due > now);
                    if pending.len() < was_pending {
                        self.reconcile();
                    }
                }
            }
        }
    }

    /// Apply the authoritative remote state to this context.
    fn reconcile(&self) {
        let local = self.manager.current_identity();
        match load_snapshot(self.store.as_ref()) {
            None => {
                if local.is_some() {
                    info!("remote logout detected");
                    self.manager.clear_session("remote logout");
                }
            }
            Some(snapshot) => match local {
                Some(local) if local.id != snapshot.identity.id => {
                    // In-flight requests could otherwise complete under the
                    // wrong identity; only a clean reload guarantees none do.
                    warn!(
                        local_user = %local.id,
                        remote_user = %snapshot.identity.id,
                        "foreign identity conflict, clearing and reloading"
                    );
                    // The stored keys now belong to the other identity, so
                    // only in-memory state is dropped here.
                    self.manager.detach_local("foreign identity conflict");
                    self.context.reload();
                }
                Some(local) => {
                    let event = if local.plan_tier != snapshot.identity.plan_tier {
                        AuthEvent::PlanUpdated
                    } else {
                        AuthEvent::SessionUpdatedRemote
                    };
                    let identity = snapshot.identity.clone();
                    debug!(user = %identity.id, event = ?event, "adopting remote session update");
                    self.manager.adopt_remote(snapshot);
                    self.observer.notify(event, Some(identity));
                }
                None => {
                    let identity = snapshot.identity.clone();
                    info!(user = %identity.id, "adopting session signed in elsewhere");
                    self.manager.adopt_remote(snapshot);
                    self.observer.notify(AuthEvent::SessionCreated, Some(identity));
                }
            },
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[path = "broadcaster_tests.rs"]
mod tests;

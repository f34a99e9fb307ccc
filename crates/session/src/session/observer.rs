// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Auth-state observer: replay-once subscriptions with isolated listeners.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tracing::warn;

use crate::session::{AuthChange, AuthEvent, Identity};

type Callback = Arc<dyn Fn(&AuthChange) + Send + Sync>;

struct Registry {
    listeners: HashMap<u64, Callback>,
    next_id: u64,
    current: Option<Identity>,
    last_event: AuthEvent,
}

/// Publish/subscribe surface for identity transitions.
///
/// Subscribing replays the current state synchronously, so late subscribers
/// never miss it. Each listener runs in isolation: a panicking listener is
/// logged and the remaining listeners still fire.
pub struct AuthObserver {
    inner: Mutex<Registry>,
}

impl AuthObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Registry {
                listeners: HashMap::new(),
                next_id: 0,
                current: None,
                last_event: AuthEvent::SessionCleared,
            }),
        })
    }

    /// Register a listener. The current state is replayed to it before this
    /// returns; the handle unsubscribes on drop.
    ///
    /// The replay runs while the registry is locked, so a racing `notify`
    /// cannot deliver fresher state ahead of it. Callbacks must not call
    /// back into the observer from the replay.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(&AuthChange) + Send + Sync + 'static,
    ) -> Subscription {
        let callback: Callback = Arc::new(callback);
        let id = {
            let mut inner = lock(&self.inner);
            let id = inner.next_id;
            inner.next_id += 1;
            inner.listeners.insert(id, Arc::clone(&callback));
            let replay = AuthChange {
                event: inner.last_event,
                current: inner.current.clone(),
                previous: inner.current.clone(),
            };
            invoke_isolated(&callback, &replay);
            id
        };
        Subscription { id, registry: Arc::downgrade(self) }
    }

    /// Record a transition and notify every listener.
    pub fn notify(&self, event: AuthEvent, current: Option<Identity>) {
        let (listeners, change) = {
            let mut inner = lock(&self.inner);
            let previous = inner.current.take();
            inner.current = current.clone();
            inner.last_event = event;
            let listeners: Vec<Callback> = inner.listeners.values().cloned().collect();
            (listeners, AuthChange { event, current, previous })
        };
        for callback in &listeners {
            invoke_isolated(callback, &change);
        }
    }

    /// Identity as last published, if any.
    pub fn current(&self) -> Option<Identity> {
        lock(&self.inner).current.clone()
    }

    fn unsubscribe(&self, id: u64) {
        lock(&self.inner).listeners.remove(&id);
    }
}

fn invoke_isolated(callback: &Callback, change: &AuthChange) {
    if catch_unwind(AssertUnwindSafe(|| callback(change))).is_err() {
        warn!(event = ?change.event, "auth listener panicked; remaining listeners unaffected");
    }
}

fn lock(m: &Mutex<Registry>) -> std::sync::MutexGuard<'_, Registry> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Listener registration handle. Dropping it (or calling
/// [`Subscription::unsubscribe`]) deregisters the listener.
pub struct Subscription {
    id: u64,
    registry: Weak<AuthObserver>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(observer) = self.registry.upgrade() {
            observer.unsubscribe(self.id);
        }
    }
}

#[cfg(test)]
#[path = "observer_tests.rs"]
mod tests;

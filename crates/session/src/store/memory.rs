// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory session store: a shared map where each handle is one execution
//! context. Used by tests to simulate multiple tabs over one substrate, and
//! proof that the cross-context bus is swappable behind [`SessionStore`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast;

use crate::store::{RemoteChange, SessionStore};

struct SharedMap {
    map: Mutex<HashMap<String, String>>,
    /// One sender per attached context; writes fan out to every *other* one.
    contexts: Mutex<Vec<(u64, broadcast::Sender<RemoteChange>)>>,
    next_context: AtomicU64,
}

/// One execution context over a shared in-memory substrate.
pub struct MemoryStore {
    context_id: u64,
    tx: broadcast::Sender<RemoteChange>,
    shared: Arc<SharedMap>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        let shared = Arc::new(SharedMap {
            map: Mutex::new(HashMap::new()),
            contexts: Mutex::new(Vec::new()),
            next_context: AtomicU64::new(0),
        });
        Self::join(shared)
    }

    /// Attach a new context to the same substrate. The new handle sees this
    /// handle's writes as remote changes, and vice versa.
    pub fn attach(&self) -> Arc<Self> {
        Self::join(Arc::clone(&self.shared))
    }

    fn join(shared: Arc<SharedMap>) -> Arc<Self> {
        let context_id = shared.next_context.fetch_add(1, Ordering::Relaxed);
        let (tx, _) = broadcast::channel(64);
        lock(&shared.contexts).push((context_id, tx.clone()));
        Arc::new(Self { context_id, tx, shared })
    }

    /// Publish changes to every context except the originating one.
    fn publish(&self, changes: Vec<RemoteChange>) {
        if changes.is_empty() {
            return;
        }
        let contexts = lock(&self.shared.contexts);
        for (id, tx) in contexts.iter() {
            if *id == self.context_id {
                continue;
            }
            for change in &changes {
                let _ = tx.send(change.clone());
            }
        }
    }
}

impl SessionStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        lock(&self.shared.map).get(key).cloned()
    }

    fn set_many(&self, entries: &[(&str, String)]) -> anyhow::Result<()> {
        let changes = {
            let mut map = lock(&self.shared.map);
            let mut changes = Vec::new();
            for (key, value) in entries {
                if map.get(*key) != Some(value) {
                    map.insert((*key).to_owned(), value.clone());
                    changes
                        .push(RemoteChange { key: (*key).to_owned(), value: Some(value.clone()) });
                }
            }
            changes
        };
        self.publish(changes);
        Ok(())
    }

    fn remove_many(&self, keys: &[&str]) -> anyhow::Result<()> {
        let changes = {
            let mut map = lock(&self.shared.map);
            let mut changes = Vec::new();
            for key in keys {
                if map.remove(*key).is_some() {
                    changes.push(RemoteChange { key: (*key).to_owned(), value: None });
                }
            }
            changes
        };
        self.publish(changes);
        Ok(())
    }

    fn subscribe_remote(&self) -> broadcast::Receiver<RemoteChange> {
        self.tx.subscribe()
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

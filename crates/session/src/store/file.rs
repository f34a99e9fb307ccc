// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! File-backed session store: one JSON object per store, atomic writes,
//! `notify` filesystem watcher for cross-context change detection.

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::store::{RemoteChange, SessionStore};

type KeyMap = HashMap<String, String>;

/// Durable store persisted as a JSON key/value file.
///
/// Every handle keeps an in-memory snapshot of the file. Local writes update
/// the snapshot before touching disk, so the watcher's diff of disk against
/// snapshot yields exactly the changes made by *other* contexts.
pub struct FileStore {
    path: PathBuf,
    state: Arc<Mutex<KeyMap>>,
    remote_tx: broadcast::Sender<RemoteChange>,
    _watcher: Mutex<Option<RecommendedWatcher>>,
}

impl FileStore {
    /// Open a store at `path`, loading any existing contents and starting
    /// the change watcher. The parent directory must exist.
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Arc<Self>> {
        let path = path.into();
        let map = read_map(&path);
        let (remote_tx, _) = broadcast::channel(64);
        let store = Arc::new(Self {
            path,
            state: Arc::new(Mutex::new(map)),
            remote_tx,
            _watcher: Mutex::new(None),
        });
        store.start_watcher()?;
        Ok(store)
    }

    fn start_watcher(self: &Arc<Self>) -> anyhow::Result<()> {
        let state = Arc::clone(&self.state);
        let path = self.path.clone();
        let file_name: Option<OsString> = path.file_name().map(OsString::from);
        let tx = self.remote_tx.clone();

        let mut watcher =
            notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
                let Ok(event) = res else { return };
                // Atomic writers rename a temp file over the target, so the
                // temp path shows up in events; only react to the target.
                let ours = event.paths.is_empty()
                    || event.paths.iter().any(|p| p.file_name() == file_name.as_deref());
                if !ours {
                    return;
                }
                reconcile(&path, &state, &tx);
            })?;

        // Watch the parent directory: a rename replaces the file node itself.
        let dir = self.path.parent().unwrap_or(Path::new(".")).to_path_buf();
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        *lock(&self._watcher) = Some(watcher);
        Ok(())
    }

    /// Write the full map atomically (temp + rename). Temp names carry the
    /// PID and a counter so concurrent saves never race on one `.tmp` file.
    fn persist(&self, map: &KeyMap) -> anyhow::Result<()> {
        static COUNTER: AtomicU32 = AtomicU32::new(0);

        let json = serde_json::to_string_pretty(map)?;
        let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
        let tmp_name = format!(
            "{}.{}.{}.tmp",
            self.path.file_name().unwrap_or_default().to_string_lossy(),
            std::process::id(),
            seq,
        );
        let tmp_path = self.path.with_file_name(tmp_name);
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

impl SessionStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        lock(&self.state).get(key).cloned()
    }

    fn set_many(&self, entries: &[(&str, String)]) -> anyhow::Result<()> {
        let snapshot = {
            let mut map = lock(&self.state);
            for (key, value) in entries {
                map.insert((*key).to_owned(), value.clone());
            }
            map.clone()
        };
        self.persist(&snapshot)
    }

    fn remove_many(&self, keys: &[&str]) -> anyhow::Result<()> {
        let (snapshot, removed) = {
            let mut map = lock(&self.state);
            let mut removed = false;
            for key in keys {
                removed |= map.remove(*key).is_some();
            }
            (map.clone(), removed)
        };
        if removed {
            self.persist(&snapshot)?;
        }
        Ok(())
    }

    fn subscribe_remote(&self) -> broadcast::Receiver<RemoteChange> {
        self.remote_tx.subscribe()
    }
}

/// Diff on-disk contents against the in-memory snapshot and publish one
/// event per key that another context changed. Runs on the watcher thread.
fn reconcile(path: &Path, state: &Arc<Mutex<KeyMap>>, tx: &broadcast::Sender<RemoteChange>) {
    let disk = read_map(path);
    let changes = {
        let mut snap = lock(state);
        let mut changes = Vec::new();
        for (key, value) in &disk {
            if snap.get(key) != Some(value) {
                changes.push(RemoteChange { key: key.clone(), value: Some(value.clone()) });
            }
        }
        for key in snap.keys() {
            if !disk.contains_key(key) {
                changes.push(RemoteChange { key: key.clone(), value: None });
            }
        }
        *snap = disk;
        changes
    };
    for change in changes {
        debug!(key = %change.key, removed = change.value.is_none(), "remote store change");
        let _ = tx.send(change);
    }
}

fn read_map(path: &Path) -> KeyMap {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(map) => map,
            Err(e) => {
                warn!(path = %path.display(), err = %e, "unreadable store file, starting empty");
                KeyMap::new()
            }
        },
        Err(_) => KeyMap::new(),
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

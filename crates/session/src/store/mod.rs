// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable keyed session storage with cross-context change notifications.
//!
//! The store is pure persistence, no policy. It doubles as the
//! publish-on-write event bus between execution contexts sharing the same
//! substrate: [`SessionStore::subscribe_remote`] yields changes written by
//! *other* contexts; a context never observes its own writes. Transports are
//! swappable behind the trait — a JSON file watched with `notify`
//! ([`file::FileStore`]) or a shared in-memory map ([`memory::MemoryStore`]).

pub mod file;
pub mod memory;

use tokio::sync::broadcast;

/// Canonical storage keys.
pub const ACCESS_TOKEN: &str = "access_token";
pub const REFRESH_TOKEN: &str = "refresh_token";
/// Serialized [`crate::session::Identity`] JSON.
pub const CURRENT_USER: &str = "current_user";
/// Audit/integrity marker: id of the last authenticated user.
pub const LAST_USER_ID: &str = "last_user_id";

/// Legacy aliases: write-only mirrors kept for older consumers.
/// Canonical keys always win on read; these are never read back.
pub const LEGACY_ACCESS_TOKEN: &str = "auth_token";
pub const LEGACY_CURRENT_USER: &str = "user_data";

pub const CANONICAL_KEYS: &[&str] = &[ACCESS_TOKEN, REFRESH_TOKEN, CURRENT_USER, LAST_USER_ID];

pub const ALL_KEYS: &[&str] = &[
    ACCESS_TOKEN,
    REFRESH_TOKEN,
    CURRENT_USER,
    LAST_USER_ID,
    LEGACY_ACCESS_TOKEN,
    LEGACY_CURRENT_USER,
];

/// A change observed on the shared substrate, originating in another context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteChange {
    pub key: String,
    /// New value, or `None` when the key was removed.
    pub value: Option<String>,
}

/// Keyed persistence of the current credential and identity record.
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    /// Write several keys as one atomic logical step, so canonical keys and
    /// their legacy aliases never disagree mid-write.
    fn set_many(&self, entries: &[(&str, String)]) -> anyhow::Result<()>;

    /// Remove several keys as one atomic logical step.
    fn remove_many(&self, keys: &[&str]) -> anyhow::Result<()>;

    /// Subscribe to changes written by other contexts sharing this substrate.
    fn subscribe_remote(&self) -> broadcast::Receiver<RemoteChange>;
}

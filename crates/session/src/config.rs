// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

/// Configuration for the session core.
///
/// Constructed once by the embedding application and passed to
/// [`crate::service::AuthService`]; there is no ambient global.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Backend base URL, e.g. `https://api.nameforge.app`.
    pub base_url: String,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Lead time before expiry at which proactive renewal fires.
    pub renewal_lead_secs: u64,

    /// Interval between background retries after a transient renewal failure.
    pub monitor_interval_secs: u64,

    /// Debounce window for remote-origin storage change events, per key.
    pub remote_debounce_ms: u64,

    /// Fallback delay when a 429 carries no parseable `Retry-After`.
    pub default_retry_after_secs: u64,
}

impl SessionConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout_secs: 30,
            renewal_lead_secs: 600,
            monitor_interval_secs: 300,
            remote_debounce_ms: 500,
            default_retry_after_secs: 60,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }

    pub fn remote_debounce(&self) -> Duration {
        Duration::from_millis(self.remote_debounce_ms)
    }

    pub fn default_retry_after(&self) -> Duration {
        Duration::from_secs(self.default_retry_after_secs)
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential type and access-token expiry decoding.
//!
//! Expiry is always derived by decoding the token's `exp` claim, never
//! estimated. A token that cannot be decoded is treated as already expired.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// The access/refresh token pair plus derived expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Epoch seconds at which this credential was taken into use locally.
    pub issued_at: u64,
    /// Epoch seconds decoded from the access token's `exp` claim.
    /// 0 when the claim is missing or undecodable, i.e. always expired.
    pub expires_at: u64,
}

impl Credential {
    pub fn new(access_token: String, refresh_token: Option<String>) -> Self {
        let expires_at = decode_expiry(&access_token).unwrap_or(0);
        Self { access_token, refresh_token, issued_at: epoch_secs(), expires_at }
    }

    pub fn is_expired_at(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(epoch_secs())
    }

    /// Seconds of validity left, saturating at zero.
    pub fn remaining_secs(&self) -> u64 {
        self.expires_at.saturating_sub(epoch_secs())
    }
}

/// Decode the `exp` claim (epoch seconds) from a JWT access token.
///
/// Structural decode only: split into three segments, base64url-decode the
/// payload, read `exp`. No signature verification — the backend owns token
/// validity; this side only needs the expiry horizon.
pub fn decode_expiry(token: &str) -> Option<u64> {
    let mut parts = token.split('.');
    let (Some(_), Some(payload), Some(_), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return None;
    };
    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    claims.get("exp")?.as_u64()
}

/// Fail-closed expiry check against wall-clock `now` (epoch seconds).
/// Malformed tokens and tokens without an `exp` claim are always expired.
pub fn is_expired(token: &str, now: u64) -> bool {
    match decode_expiry(token) {
        Some(exp) => now >= exp,
        None => true,
    }
}

/// Current wall clock as epoch seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

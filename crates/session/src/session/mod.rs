// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session data model and transition events.

pub mod broadcaster;
pub mod manager;
pub mod observer;

use serde::{Deserialize, Serialize};

use crate::store::{self, SessionStore};
use crate::token::Credential;

/// Subscription plan tier. Unrecognized tiers from newer backends fold into
/// [`PlanTier::Unknown`] instead of failing deserialization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanTier {
    #[default]
    Free,
    Plus,
    Pro,
    #[serde(other)]
    Unknown,
}

/// The authenticated user record. Owned by the lifecycle/observer pair and
/// mutated only through explicit state-setting operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub plan_tier: PlanTier,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

/// One credential paired with one identity.
///
/// All-or-nothing: a stored identity without a credential, or vice versa,
/// is no session at all.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub credential: Credential,
    pub identity: Identity,
}

/// Identity transition kinds delivered to auth-state listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthEvent {
    SessionCreated,
    SessionCleared,
    PlanUpdated,
    SessionUpdatedRemote,
}

/// Payload delivered to auth-state listeners on every transition.
#[derive(Debug, Clone)]
pub struct AuthChange {
    pub event: AuthEvent,
    pub current: Option<Identity>,
    pub previous: Option<Identity>,
}

/// Read the persisted session from canonical keys only.
///
/// Returns `None` unless both an access token and a parseable identity are
/// present. Legacy alias keys are never consulted.
pub fn load_snapshot(store: &dyn SessionStore) -> Option<SessionSnapshot> {
    let access = store.get(store::ACCESS_TOKEN)?;
    let identity: Identity = serde_json::from_str(&store.get(store::CURRENT_USER)?).ok()?;
    let refresh = store.get(store::REFRESH_TOKEN);
    Some(SessionSnapshot { credential: Credential::new(access, refresh), identity })
}

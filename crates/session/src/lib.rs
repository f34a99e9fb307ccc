// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session and credential lifecycle core for the NameForge client.
//!
//! Owns the token pair and the authenticated identity, renews credentials
//! proactively and on 401s with single-flight semantics, deduplicates
//! rate-limited retries, and keeps concurrent execution contexts sharing one
//! storage substrate reconciled.

pub mod config;
pub mod error;
pub mod http;
pub mod service;
pub mod session;
pub mod store;
pub mod token;

pub use config::SessionConfig;
pub use error::{ApiError, ErrorKind};
pub use http::pipeline::RequestPipeline;
pub use service::AuthService;
pub use session::broadcaster::{ContextHandle, SessionBroadcaster};
pub use session::manager::SessionManager;
pub use session::observer::{AuthObserver, Subscription};
pub use session::{AuthChange, AuthEvent, Identity, PlanTier, SessionSnapshot};
pub use store::{RemoteChange, SessionStore};
pub use token::Credential;

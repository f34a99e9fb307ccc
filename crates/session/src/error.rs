// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error taxonomy for the session core.
//!
//! Every failure leaving this crate is an [`ApiError`] carrying an explicit
//! [`ErrorKind`]. Collaborators branch on the kind, never on message text;
//! presentation copy is a separate mapping the UI owns.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Classification of a normalized failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// No response was received at all.
    NetworkError,
    /// 401 surfaced after a completed but failed renewal, or a rejected login.
    AuthFailed,
    /// No usable refresh credential remains; the session is over.
    SessionExpired,
    /// 429 from the backend. Recovered internally via a retry ticket; only
    /// surfaced once that budget is exhausted.
    RateLimitExceeded,
    /// 4xx carrying field-level detail.
    ValidationError,
    /// 5xx, or a response body this crate could not make sense of.
    ServerError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NetworkError => "NETWORK_ERROR",
            Self::AuthFailed => "AUTH_FAILED",
            Self::SessionExpired => "SESSION_EXPIRED",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::ServerError => "SERVER_ERROR",
        }
    }

    /// Kinds the pipeline may transparently retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NetworkError | Self::RateLimitExceeded)
    }

    /// Kinds that end the session for every collaborator.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::AuthFailed | Self::SessionExpired)
    }

    /// Default classification for an HTTP status code.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => Self::AuthFailed,
            429 => Self::RateLimitExceeded,
            400..=499 => Self::ValidationError,
            _ => Self::ServerError,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized error surfaced to collaborators.
///
/// Raw transport exceptions never cross this boundary; they are folded into
/// `status == 0` / [`ErrorKind::NetworkError`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    /// HTTP status, or 0 when no response was received.
    pub status: u16,
    #[serde(rename = "code")]
    pub kind: ErrorKind,
    pub message: String,
    /// Backend error body, when one was parseable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(kind: ErrorKind, status: u16, message: impl Into<String>) -> Self {
        Self { status, kind, message: message.into(), details: None }
    }

    /// Machine-readable code string (`SESSION_EXPIRED`, ...).
    pub fn code(&self) -> &'static str {
        self.kind.as_str()
    }

    /// Normalize a non-2xx response. The backend contract is
    /// `{status, detail|message}`; anything else keeps a generic message
    /// with the raw body preserved in `details`.
    pub async fn from_response(resp: reqwest::Response) -> Self {
        let status = resp.status().as_u16();
        let body: Option<serde_json::Value> = resp.json().await.ok();
        let message = body
            .as_ref()
            .and_then(|b| b.get("detail").or_else(|| b.get("message")))
            .and_then(|v| v.as_str())
            .unwrap_or("request failed")
            .to_owned();
        Self { status, kind: ErrorKind::from_status(status), message, details: body }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.kind, self.status, self.message)
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        Self { status: 0, kind: ErrorKind::NetworkError, message: e.to_string(), details: None }
    }
}

impl std::error::Error for ApiError {}

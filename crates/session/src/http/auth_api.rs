// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire client for the auth backend endpoints.
//!
//! Deliberately outside the request pipeline: auth endpoints are exempt
//! from the 401 renew-and-retry path, so a failing renewal can never
//! recurse into itself.

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::SessionConfig;
use crate::error::{ApiError, ErrorKind};
use crate::session::Identity;

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    #[serde(default)]
    pub success: bool,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub user: Identity,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProfileResponse {
    #[serde(default)]
    pub success: bool,
    pub id: String,
    pub email: String,
}

/// HTTP client for the auth endpoints of the backend.
#[derive(Clone)]
pub struct AuthApi {
    base_url: String,
    client: Client,
}

impl AuthApi {
    pub fn new(config: &SessionConfig) -> Self {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .unwrap_or_default();
        Self { base_url: config.base_url.trim_end_matches('/').to_owned(), client }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, ApiError> {
        let resp = self
            .client
            .post(self.url("/auth/login"))
            .json(&LoginRequest { email, password })
            .send()
            .await?;
        parse(resp).await
    }

    /// Exchange the refresh token for a fresh pair. The body is omitted
    /// entirely when the credential travels on an alternate secure channel.
    pub async fn refresh(&self, refresh_token: Option<&str>) -> Result<TokenResponse, ApiError> {
        let req = self.client.post(self.url("/auth/refresh"));
        let req = match refresh_token {
            Some(rt) => req.json(&serde_json::json!({ "refresh_token": rt })),
            None => req,
        };
        parse(req.send().await?).await
    }

    /// Best-effort server-side invalidation.
    pub async fn logout(&self, access_token: Option<&str>) -> Result<(), ApiError> {
        let req = self.client.post(self.url("/auth/logout"));
        let req = match access_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        };
        let resp = req.send().await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ApiError::from_response(resp).await)
        }
    }

    /// Fetch the server-side profile, for background consistency checks.
    pub async fn profile(&self, access_token: &str) -> Result<ProfileResponse, ApiError> {
        let resp = self.client.get(self.url("/profile")).bearer_auth(access_token).send().await?;
        parse(resp).await
    }
}

async fn parse<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T, ApiError> {
    if !resp.status().is_success() {
        return Err(ApiError::from_response(resp).await);
    }
    let status = resp.status().as_u16();
    resp.json().await.map_err(|e| {
        ApiError::new(ErrorKind::ServerError, status, format!("malformed response body: {e}"))
    })
}

//! Auth Module
//!
//! Identity lookup, OAuth sign-in and sign-out are delegated to a hosted
//! GoTrue-compatible auth server (the auth half of a Supabase project). This
//! module holds the [`AuthProvider`] seam, the HTTP client implementing it,
//! PKCE helpers and the cookie plumbing used by the `/auth` routes.
//!
//! # Usage
//!
//! ```rust,ignore
//! let app = Router::new()
//!     .nest("/auth", auth::routes())
//!     .with_state(app_state);
//! ```

mod handler;
mod routes;

pub use routes::routes;

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue, header};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::config::Auth as AuthConfig;
use crate::error::AuthError;
use crate::model::Identity;

pub const ACCESS_TOKEN_COOKIE: &str = "sb-access-token";
pub const VERIFIER_COOKIE: &str = "sb-code-verifier";

#[derive(Debug, Clone)]
pub struct AuthSession {
    pub access_token: String,
    pub identity: Identity,
}

#[async_trait]
pub trait AuthProvider: Send + Sync + 'static {
    /// `Ok(None)` when the token is missing, expired or revoked.
    async fn current_identity(&self, access_token: &str) -> Result<Option<Identity>, AuthError>;

    /// Where to send the browser to start the OAuth flow.
    fn authorize_url(&self, redirect_to: &str, code_challenge: &str) -> String;

    async fn exchange_code(&self, auth_code: &str, code_verifier: &str) -> Result<AuthSession, AuthError>;

    async fn sign_out(&self, access_token: &str) -> Result<(), AuthError>;
}

pub struct GoTrueAuth {
    client: reqwest::Client,
    base_url: String,
    anon_key: String,
    provider: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    user: Identity,
}

impl GoTrueAuth {
    pub fn new(cfg: &AuthConfig) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder().build()?;
        Ok(GoTrueAuth {
            client,
            base_url: cfg.url.trim_end_matches('/').to_string(),
            anon_key: cfg.anon_key.clone(),
            provider: cfg.provider.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    async fn rejection(response: reqwest::Response) -> AuthError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        AuthError::Rejected {
            status,
            message: error_message(&body),
        }
    }
}

/// Pulls a human-readable message out of a GoTrue error body.
fn error_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return body.to_string();
    };
    ["error_description", "msg", "message", "error"]
        .iter()
        .find_map(|key| value.get(key).and_then(|v| v.as_str()))
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string())
}

#[async_trait]
impl AuthProvider for GoTrueAuth {
    async fn current_identity(&self, access_token: &str) -> Result<Option<Identity>, AuthError> {
        let response = self
            .client
            .get(self.endpoint("user"))
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .send()
            .await?;

        match response.status().as_u16() {
            200 => Ok(Some(response.json::<Identity>().await?)),
            401 | 403 => Ok(None),
            _ => Err(Self::rejection(response).await),
        }
    }

    fn authorize_url(&self, redirect_to: &str, code_challenge: &str) -> String {
        format!(
            "{}?provider={}&redirect_to={}&code_challenge={}&code_challenge_method=s256",
            self.endpoint("authorize"),
            urlencoding::encode(&self.provider),
            urlencoding::encode(redirect_to),
            code_challenge,
        )
    }

    async fn exchange_code(&self, auth_code: &str, code_verifier: &str) -> Result<AuthSession, AuthError> {
        let response = self
            .client
            .post(self.endpoint("token?grant_type=pkce"))
            .header("apikey", &self.anon_key)
            .json(&serde_json::json!({
                "auth_code": auth_code,
                "code_verifier": code_verifier,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }

        let token: TokenResponse = response.json().await?;
        Ok(AuthSession {
            access_token: token.access_token,
            identity: token.user,
        })
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), AuthError> {
        let response = self
            .client
            .post(self.endpoint("logout"))
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Pkce {
    pub verifier: String,
    pub challenge: String,
}

impl Pkce {
    pub fn generate() -> Self {
        // 64 unreserved characters, within the 43..=128 range RFC 7636 allows.
        let verifier = format!(
            "{}{}",
            uuid::Uuid::new_v4().simple(),
            uuid::Uuid::new_v4().simple()
        );
        let challenge = Self::challenge_for(&verifier);
        Pkce { verifier, challenge }
    }

    pub fn challenge_for(verifier: &str) -> String {
        URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
    }
}

pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

fn cookie_attributes(secure: bool) -> &'static str {
    if secure {
        "Path=/; HttpOnly; SameSite=Lax; Secure"
    } else {
        "Path=/; HttpOnly; SameSite=Lax"
    }
}

/// `secure` adds the `Secure` attribute; set it when the service is served
/// over https.
pub fn set_cookie(name: &str, value: &str, secure: bool) -> HeaderValue {
    let cookie = format!("{name}={value}; {}", cookie_attributes(secure));
    HeaderValue::from_str(&cookie).unwrap_or_else(|_| HeaderValue::from_static(""))
}

pub fn clear_cookie(name: &str, secure: bool) -> HeaderValue {
    let cookie = format!("{name}=; {}; Max-Age=0", cookie_attributes(secure));
    HeaderValue::from_str(&cookie).unwrap_or_else(|_| HeaderValue::from_static(""))
}

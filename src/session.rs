//! Session gate. Resolves the caller's identity once per view and hands it
//! down explicitly; nothing here is global.

use axum::{
    Json,
    async_trait,
    extract::FromRequestParts,
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
};

use crate::api::ErrorResponse;
use crate::auth::{ACCESS_TOKEN_COOKIE, AuthProvider, read_cookie};
use crate::handler::AppState;
use crate::model::Identity;

/// The unauthenticated landing view.
pub const LANDING: &str = "/";

#[derive(Debug, Clone)]
pub struct ActiveSession {
    identity: Identity,
    access_token: String,
}

#[derive(Debug)]
pub enum Gate {
    Active(ActiveSession),
    Redirect(&'static str),
}

#[cfg(test)]
impl Gate {
    pub fn active(self) -> Option<ActiveSession> {
        match self {
            Gate::Active(session) => Some(session),
            Gate::Redirect(_) => None,
        }
    }
}

/// A failed lookup is treated the same as being signed out.
pub async fn enter(auth: &dyn AuthProvider, access_token: Option<&str>) -> Gate {
    let Some(token) = access_token.filter(|t| !t.is_empty()) else {
        return Gate::Redirect(LANDING);
    };

    match auth.current_identity(token).await {
        Ok(Some(identity)) => Gate::Active(ActiveSession {
            identity,
            access_token: token.to_string(),
        }),
        Ok(None) => Gate::Redirect(LANDING),
        Err(e) => {
            tracing::warn!(error = %e, "identity lookup failed");
            Gate::Redirect(LANDING)
        }
    }
}

impl ActiveSession {
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Ownership key for every store request made on behalf of this session.
    pub fn user_id(&self) -> &str {
        &self.identity.id
    }

    /// Ends the session upstream and returns where to go next. The outcome of
    /// the upstream call does not change the destination.
    pub async fn sign_out(self, auth: &dyn AuthProvider) -> &'static str {
        if let Err(e) = auth.sign_out(&self.access_token).await {
            tracing::warn!(user_id = %self.identity.id, error = %e, "sign out failed");
        }
        LANDING
    }
}

/// Extractor for API routes: rejects with 401 when the gate redirects.
pub struct Authenticated(pub ActiveSession);

#[async_trait]
impl FromRequestParts<AppState> for Authenticated {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = read_cookie(&parts.headers, ACCESS_TOKEN_COOKIE);
        match enter(state.auth.as_ref(), token.as_deref()).await {
            Gate::Active(session) => Ok(Authenticated(session)),
            Gate::Redirect(_) => Err((
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: "not signed in".to_string(),
                }),
            )
                .into_response()),
        }
    }
}

//! HTTP Handlers for the OAuth sign-in flow

use axum::{
    extract::{Query, State},
    http::{HeaderMap, header},
    response::{IntoResponse, Redirect, Response},
};

use super::{ACCESS_TOKEN_COOKIE, Pkce, VERIFIER_COOKIE, clear_cookie, read_cookie, set_cookie};
use crate::api::CallbackParams;
use crate::error::AuthError;
use crate::handler::AppState;
use crate::session::{self, Gate};

const AFTER_SIGN_IN: &str = "/bookmarks";

fn redirect_with_cookies(to: &str, cookies: &[axum::http::HeaderValue]) -> Response {
    let mut response = Redirect::to(to).into_response();
    for cookie in cookies {
        response.headers_mut().append(header::SET_COOKIE, cookie.clone());
    }
    response
}

fn landing_with_error(error: &str) -> Response {
    Redirect::to(&format!("/?error={}", urlencoding::encode(error))).into_response()
}

pub async fn login(State(state): State<AppState>) -> Response {
    let pkce = Pkce::generate();
    let redirect_to = format!("{}/auth/callback", state.public_url);
    let location = state.auth.authorize_url(&redirect_to, &pkce.challenge);

    tracing::info!("starting oauth sign-in");
    redirect_with_cookies(&location, &[set_cookie(VERIFIER_COOKIE, &pkce.verifier, state.secure_cookies)])
}

pub async fn callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<CallbackParams>,
) -> Response {
    if let Some(error) = params.error {
        tracing::error!(
            error = %error,
            description = params.error_description.as_deref().unwrap_or(""),
            "oauth error returned"
        );
        return landing_with_error(&error);
    }

    let Some(code) = params.code else {
        tracing::info!("no code present in callback url");
        return Redirect::to(AFTER_SIGN_IN).into_response();
    };

    let verifier = read_cookie(&headers, VERIFIER_COOKIE).ok_or(AuthError::MissingVerifier);
    let exchanged = match verifier {
        Ok(verifier) => state.auth.exchange_code(&code, &verifier).await,
        Err(e) => Err(e),
    };

    match exchanged {
        Ok(session) => {
            tracing::info!(user_id = %session.identity.id, "code exchange successful");
            redirect_with_cookies(
                AFTER_SIGN_IN,
                &[
                    set_cookie(ACCESS_TOKEN_COOKIE, &session.access_token, state.secure_cookies),
                    clear_cookie(VERIFIER_COOKIE, state.secure_cookies),
                ],
            )
        }
        Err(AuthError::Http(e)) => {
            tracing::error!(error = %crate::unpack_error(&e), "unexpected error in callback");
            landing_with_error("unexpected")
        }
        Err(e) => {
            tracing::error!(error = %e, "code exchange error");
            landing_with_error("exchange_failed")
        }
    }
}

pub async fn sign_out(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let token = read_cookie(&headers, ACCESS_TOKEN_COOKIE);
    let destination = match session::enter(state.auth.as_ref(), token.as_deref()).await {
        Gate::Active(active) => active.sign_out(state.auth.as_ref()).await,
        Gate::Redirect(to) => to,
    };

    redirect_with_cookies(destination, &[clear_cookie(ACCESS_TOKEN_COOKIE, state.secure_cookies)])
}

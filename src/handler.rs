use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, Method},
    response::{IntoResponse, Redirect, Response},
    routing::get,
};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::api::StatusResponse;
use crate::assets::{serve_embedded, serve_index};
use crate::auth::{self, ACCESS_TOKEN_COOKIE, AuthProvider, read_cookie};
use crate::bookmarks;
use crate::feed::ChangeFeed;
use crate::inflight::InFlight;
use crate::session::{self, Gate};
use crate::store::BookmarkStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn BookmarkStore>,
    pub auth: Arc<dyn AuthProvider>,
    pub feed: ChangeFeed,
    pub inflight: InFlight,
    pub public_url: String,
    /// Session cookies carry `Secure` when `public_url` is https.
    pub secure_cookies: bool,
}

impl AppState {
    pub fn new(
        store: Arc<dyn BookmarkStore>,
        auth: Arc<dyn AuthProvider>,
        feed: ChangeFeed,
        public_url: &str,
    ) -> Self {
        AppState {
            store,
            auth,
            feed,
            inflight: InFlight::new(),
            public_url: public_url.trim_end_matches('/').to_string(),
            secure_cookies: url::Url::parse(public_url).is_ok_and(|u| u.scheme() == "https"),
        }
    }
}

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(Any);

    Router::new()
        .route("/healthz", get(healthcheck))
        .route("/bookmarks", get(bookmarks_page))
        .nest("/auth", auth::routes())
        .nest("/api", bookmarks::routes())
        .fallback(serve_embedded)
        .layer(cors)
        .with_state(state)
}

pub async fn healthcheck() -> impl IntoResponse {
    info!("got healthcheck request");
    Json(StatusResponse::new_from_msg("ok"))
}

/// Serves the bookmark view to signed-in users, everyone else goes to the
/// landing page.
pub async fn bookmarks_page(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let token = read_cookie(&headers, ACCESS_TOKEN_COOKIE);
    match session::enter(state.auth.as_ref(), token.as_deref()).await {
        Gate::Active(_) => serve_index().await.into_response(),
        Gate::Redirect(to) => Redirect::to(to).into_response(),
    }
}

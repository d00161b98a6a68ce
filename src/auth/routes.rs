use axum::{
    Router,
    routing::{get, post},
};

use super::handler;
use crate::handler::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/login", get(handler::login))
        .route("/callback", get(handler::callback))
        .route("/signout", post(handler::sign_out))
}

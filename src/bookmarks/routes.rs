use axum::{
    Router,
    routing::{delete, get},
};

use super::handler;
use crate::handler::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/me", get(handler::me))
        .route("/bookmarks", get(handler::list_bookmarks).post(handler::create_bookmark))
        .route("/bookmarks/events", get(handler::bookmark_events))
        .route("/bookmarks/:id", delete(handler::delete_bookmark))
}

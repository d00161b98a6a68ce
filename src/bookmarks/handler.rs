use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures_util::stream::{self, Stream};

use crate::api::CreateBookmarkRequest;
use crate::error::{DeleteError, FormError};
use crate::form::BookmarkForm;
use crate::handler::AppState;
use crate::inflight::InFlight;
use crate::model::Change;
use crate::session::Authenticated;
use crate::sync::{SyncView, ViewUpdate};
use crate::{bad_request, conflict, created, internal_error, not_found, success};

pub async fn me(Authenticated(session): Authenticated) -> Response {
    success(session.identity())
}

/// Initial load. A failing store yields an empty list; the failure is only
/// logged.
pub async fn list_bookmarks(State(state): State<AppState>, Authenticated(session): Authenticated) -> Response {
    match state.store.list(session.user_id()).await {
        Ok(bookmarks) => success(bookmarks),
        Err(e) => {
            tracing::error!(user_id = %session.user_id(), error = %e, "error fetching bookmarks");
            success(Vec::<crate::model::Bookmark>::new())
        }
    }
}

pub async fn create_bookmark(
    State(state): State<AppState>,
    Authenticated(session): Authenticated,
    Json(payload): Json<CreateBookmarkRequest>,
) -> Response {
    let user_id = session.user_id();
    let Some(_guard) = state.inflight.try_acquire(InFlight::create_key(user_id)) else {
        return conflict(&FormError::Busy.to_string());
    };

    let mut form = BookmarkForm::new(payload.title, payload.url);
    let result = form
        .submit(state.store.as_ref(), user_id, |record| {
            tracing::info!(user_id = %record.user_id, bookmark_id = %record.id, "bookmark added");
        })
        .await;

    match result {
        Ok(record) => created(record),
        Err(e) if e.is_validation() => bad_request(&e.to_string()),
        Err(FormError::Busy) => conflict(&FormError::Busy.to_string()),
        Err(e) => internal_error(&e.to_string()),
    }
}

pub async fn delete_bookmark(
    State(state): State<AppState>,
    Authenticated(session): Authenticated,
    Path(id): Path<String>,
) -> Response {
    let user_id = session.user_id();
    let Some(_guard) = state.inflight.try_acquire(InFlight::delete_key(user_id, &id)) else {
        return conflict(&DeleteError::InProgress(id.clone()).to_string());
    };

    match state.store.delete(user_id, &id).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => not_found("Bookmark not found"),
        Err(e) => {
            tracing::error!(user_id = %user_id, bookmark_id = %id, error = %e, "error deleting bookmark");
            internal_error("Failed to delete bookmark")
        }
    }
}

fn change_event(change: &Change) -> Result<Event, axum::Error> {
    let event = Event::default().event(change.name());
    match change {
        Change::Insert { record } => event.json_data(record),
        Change::Delete { id, .. } => event.json_data(serde_json::json!({ "id": id })),
    }
}

fn snapshot_event(view: &SyncView) -> Result<Event, axum::Error> {
    Event::default().event("snapshot").json_data(view.bookmarks())
}

/// One mounted [`SyncView`] per connection. The view, and with it the feed
/// subscription, is dropped when the client goes away. After the view reloads
/// the client gets a fresh snapshot.
pub async fn bookmark_events(
    State(state): State<AppState>,
    Authenticated(session): Authenticated,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let store = state.store.clone();
    let view = SyncView::mount(store.as_ref(), &state.feed, session.user_id()).await;

    let events = stream::unfold((view, store, true), |(mut view, store, first)| async move {
        if first {
            let snapshot = snapshot_event(&view);
            return Some((snapshot, (view, store, false)));
        }
        let event = match view.next_change(store.as_ref()).await? {
            ViewUpdate::Change(change) => change_event(&change),
            ViewUpdate::Resynced => snapshot_event(&view),
        };
        Some((event, (view, store, false)))
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}

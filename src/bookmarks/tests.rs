use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use futures_util::StreamExt;
use serde_json::Value;
use tower::ServiceExt;

use crate::auth::fake::FakeAuth;
use crate::error::{DeleteError, INVALID_URL_MESSAGE};
use crate::feed::ChangeFeed;
use crate::handler::{AppState, app};
use crate::inflight::InFlight;
use crate::model::{Change, Identity};
use crate::store::BookmarkStore;
use crate::store::fake::{FakeStore, bookmark};

struct Harness {
    store: Arc<FakeStore>,
    auth: Arc<FakeAuth>,
    state: AppState,
}

impl Harness {
    fn new(store: FakeStore) -> Self {
        Self::serving(store, "http://localhost:3000/")
    }

    fn serving(store: FakeStore, public_url: &str) -> Self {
        let store = Arc::new(store);
        let auth = Arc::new(FakeAuth::with_user("t1", "u1"));
        let state = AppState::new(store.clone(), auth.clone(), store.feed.clone(), public_url);
        Harness { store, auth, state }
    }

    fn router(&self) -> Router {
        app(self.state.clone())
    }
}

fn request(method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::COOKIE, format!("sb-access-token={token}"));
    }
    match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .expect("request"),
        None => builder.body(Body::empty()).expect("request"),
    }
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}

fn location(response: &axum::response::Response) -> &str {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .expect("location header")
}

fn set_cookies(response: &axum::response::Response) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok().map(str::to_string))
        .collect()
}

#[tokio::test]
async fn healthcheck_reports_ok() {
    let h = Harness::new(FakeStore::default());
    let response = h.router().oneshot(request("GET", "/healthz", None, None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "ok");
}

#[tokio::test]
async fn api_requires_a_session() {
    let h = Harness::new(FakeStore::default());
    for token in [None, Some("unknown"), Some("broken-token")] {
        let response = h
            .router()
            .oneshot(request("GET", "/api/bookmarks", token, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}

#[tokio::test]
async fn bookmarks_page_redirects_anonymous_users_to_landing() {
    let h = Harness::new(FakeStore::default());
    let response = h.router().oneshot(request("GET", "/bookmarks", None, None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/");
}

#[tokio::test]
async fn me_returns_the_session_identity() {
    let h = Harness::new(FakeStore::default());
    let response = h.router().oneshot(request("GET", "/api/me", Some("t1"), None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["data"]["id"], "u1");
}

#[tokio::test]
async fn list_returns_only_own_rows_newest_first() {
    let h = Harness::new(FakeStore::with_rows(vec![
        bookmark("1", "u1", 10),
        bookmark("2", "u1", 20),
        bookmark("3", "u2", 30),
    ]));
    let response = h
        .router()
        .oneshot(request("GET", "/api/bookmarks", Some("t1"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let ids: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|b| b["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["2", "1"]);
}

#[tokio::test]
async fn list_failure_is_an_empty_list() {
    let store = FakeStore::with_rows(vec![bookmark("1", "u1", 10)]);
    store.fail_list_with("timeout");
    let h = Harness::new(store);
    let response = h
        .router()
        .oneshot(request("GET", "/api/bookmarks", Some("t1"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["data"], Value::Array(vec![]));
}

#[tokio::test]
async fn create_returns_the_stored_record() {
    let h = Harness::new(FakeStore::default());
    let response = h
        .router()
        .oneshot(request(
            "POST",
            "/api/bookmarks",
            Some("t1"),
            Some(serde_json::json!({"title": "  Google ", "url": "https://google.com"})),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let body = json_body(response).await;
    assert_eq!(body["data"]["title"], "Google");
    assert_eq!(body["data"]["user_id"], "u1");
    assert_eq!(h.store.row_ids(), vec!["1".to_string()]);
}

#[tokio::test]
async fn create_rejects_invalid_url_without_store_call() {
    let h = Harness::new(FakeStore::default());
    let response = h
        .router()
        .oneshot(request(
            "POST",
            "/api/bookmarks",
            Some("t1"),
            Some(serde_json::json!({"title": "Google", "url": "not-a-url"})),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], INVALID_URL_MESSAGE);
    assert_eq!(h.store.insert_calls(), 0);
}

#[tokio::test]
async fn create_surfaces_store_message() {
    let store = FakeStore::default();
    store.fail_insert_with("duplicate key value");
    let h = Harness::new(store);
    let response = h
        .router()
        .oneshot(request(
            "POST",
            "/api/bookmarks",
            Some("t1"),
            Some(serde_json::json!({"title": "Google", "url": "https://google.com"})),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json_body(response).await["error"], "duplicate key value");
}

#[tokio::test]
async fn create_while_another_is_outstanding_conflicts() {
    let h = Harness::new(FakeStore::default());
    let _held = h.state.inflight.try_acquire(InFlight::create_key("u1")).unwrap();

    let response = h
        .router()
        .oneshot(request(
            "POST",
            "/api/bookmarks",
            Some("t1"),
            Some(serde_json::json!({"title": "Google", "url": "https://google.com"})),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(h.store.insert_calls(), 0);
}

#[tokio::test]
async fn delete_removes_owned_row_once() {
    let h = Harness::new(FakeStore::with_rows(vec![bookmark("1", "u1", 1), bookmark("2", "u1", 2)]));

    let response = h
        .router()
        .oneshot(request("DELETE", "/api/bookmarks/1", Some("t1"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(h.store.row_ids(), vec!["2".to_string()]);

    let response = h
        .router()
        .oneshot(request("DELETE", "/api/bookmarks/1", Some("t1"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_of_pending_row_conflicts_and_failure_keeps_row() {
    let store = FakeStore::with_rows(vec![bookmark("1", "u1", 1)]);
    let h = Harness::new(store);

    {
        let _held = h.state.inflight.try_acquire(InFlight::delete_key("u1", "1")).unwrap();
        let response = h
            .router()
            .oneshot(request("DELETE", "/api/bookmarks/1", Some("t1"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(
            json_body(response).await["error"],
            DeleteError::InProgress("1".to_string()).to_string()
        );
    }

    h.store.fail_delete_with("network down");
    let response = h
        .router()
        .oneshot(request("DELETE", "/api/bookmarks/1", Some("t1"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(h.store.row_ids(), vec!["1".to_string()]);
}

#[tokio::test]
async fn events_stream_snapshot_then_changes_and_release_on_disconnect() {
    let h = Harness::new(FakeStore::with_rows(vec![bookmark("1", "u1", 1)]));
    let response = h
        .router()
        .oneshot(request("GET", "/api/bookmarks/events", Some("t1"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(h.store.feed.live_subscriptions(), 1);

    let mut body = response.into_body().into_data_stream();
    let snapshot = String::from_utf8(body.next().await.unwrap().unwrap().to_vec()).unwrap();
    assert!(snapshot.starts_with("event: snapshot\n"), "{snapshot}");
    assert!(snapshot.contains("\"id\":\"1\""));

    h.store.feed.publish(Change::Delete {
        id: "1".to_string(),
        user_id: "u1".to_string(),
    });
    let delete = String::from_utf8(body.next().await.unwrap().unwrap().to_vec()).unwrap();
    assert!(delete.starts_with("event: delete\n"), "{delete}");
    assert!(delete.contains("{\"id\":\"1\"}"));

    drop(body);
    assert_eq!(h.store.feed.live_subscriptions(), 0);
}

#[tokio::test]
async fn events_stream_resends_snapshot_after_lost_changes() {
    let h = Harness::new(FakeStore::with_rows(vec![bookmark("1", "u1", 1)]).with_feed(ChangeFeed::new(2)));
    let response = h
        .router()
        .oneshot(request("GET", "/api/bookmarks/events", Some("t1"), None))
        .await
        .unwrap();
    let mut body = response.into_body().into_data_stream();
    let first = String::from_utf8(body.next().await.unwrap().unwrap().to_vec()).unwrap();
    assert!(first.contains("\"id\":\"1\""));

    // u1's delete is pushed out of the feed by other users' traffic
    assert!(h.store.delete("u1", "1").await.unwrap());
    for id in ["a", "b", "c"] {
        h.store.feed.publish(Change::Insert { record: bookmark(id, "u2", 5) });
    }

    let resent = String::from_utf8(body.next().await.unwrap().unwrap().to_vec()).unwrap();
    assert!(resent.starts_with("event: snapshot\n"), "{resent}");
    assert!(resent.contains("data: []"), "{resent}");
}

#[tokio::test]
async fn login_sets_verifier_and_redirects_to_provider() {
    let h = Harness::new(FakeStore::default());
    let response = h.router().oneshot(request("GET", "/auth/login", None, None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert!(location(&response).starts_with("https://auth.test/authorize?redirect_to=http://localhost:3000/auth/callback"));
    assert!(set_cookies(&response).iter().any(|c| c.starts_with("sb-code-verifier=")));
}

#[tokio::test]
async fn callback_with_provider_error_lands_with_error() {
    let h = Harness::new(FakeStore::default());
    let response = h
        .router()
        .oneshot(request("GET", "/auth/callback?error=access_denied&error_description=nope", None, None))
        .await
        .unwrap();
    assert_eq!(location(&response), "/?error=access_denied");
}

#[tokio::test]
async fn callback_exchanges_code_for_session_cookie() {
    let h = Harness::new(FakeStore::default());
    h.auth.codes.lock().unwrap().insert(
        "code-1".to_string(),
        (
            "t2".to_string(),
            Identity {
                id: "u2".to_string(),
                email: None,
            },
        ),
    );

    let request = Request::builder()
        .uri("/auth/callback?code=code-1")
        .header(header::COOKIE, "sb-code-verifier=verifier")
        .body(Body::empty())
        .unwrap();
    let response = h.router().oneshot(request).await.unwrap();

    assert_eq!(location(&response), "/bookmarks");
    let cookies = set_cookies(&response);
    assert!(cookies.iter().any(|c| c.starts_with("sb-access-token=t2;")));
    assert!(cookies.iter().any(|c| c.starts_with("sb-code-verifier=;")));
    assert!(cookies.iter().all(|c| !c.contains("Secure")));
}

#[tokio::test]
async fn session_cookie_is_secure_behind_https() {
    let h = Harness::serving(FakeStore::default(), "https://bookmarks.example.com");
    h.auth.codes.lock().unwrap().insert(
        "code-1".to_string(),
        (
            "t2".to_string(),
            Identity {
                id: "u2".to_string(),
                email: None,
            },
        ),
    );

    let request = Request::builder()
        .uri("/auth/callback?code=code-1")
        .header(header::COOKIE, "sb-code-verifier=verifier")
        .body(Body::empty())
        .unwrap();
    let response = h.router().oneshot(request).await.unwrap();

    let cookies = set_cookies(&response);
    let token = cookies.iter().find(|c| c.starts_with("sb-access-token=t2;")).unwrap();
    assert!(token.ends_with("; Secure"), "{token}");
}

#[tokio::test]
async fn callback_failures_land_with_exchange_failed() {
    let h = Harness::new(FakeStore::default());

    // unknown code
    let request = Request::builder()
        .uri("/auth/callback?code=bogus")
        .header(header::COOKIE, "sb-code-verifier=verifier")
        .body(Body::empty())
        .unwrap();
    let response = h.router().oneshot(request).await.unwrap();
    assert_eq!(location(&response), "/?error=exchange_failed");

    // no verifier cookie
    let response = h
        .router()
        .oneshot(request_without_cookie("/auth/callback?code=bogus"))
        .await
        .unwrap();
    assert_eq!(location(&response), "/?error=exchange_failed");

    // no code at all
    let response = h
        .router()
        .oneshot(request_without_cookie("/auth/callback"))
        .await
        .unwrap();
    assert_eq!(location(&response), "/bookmarks");
}

fn request_without_cookie(uri: &str) -> Request<Body> {
    request("GET", uri, None, None)
}

#[tokio::test]
async fn sign_out_ends_session_and_clears_cookie() {
    let h = Harness::new(FakeStore::default());
    let response = h
        .router()
        .oneshot(request("POST", "/auth/signout", Some("t1"), None))
        .await
        .unwrap();

    assert_eq!(location(&response), "/");
    assert!(set_cookies(&response).iter().any(|c| c.starts_with("sb-access-token=;")));
    assert_eq!(h.auth.signed_out.lock().unwrap().as_slice(), ["t1".to_string()]);

    let response = h
        .router()
        .oneshot(request("GET", "/api/bookmarks", Some("t1"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

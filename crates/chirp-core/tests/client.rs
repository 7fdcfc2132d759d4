mod common;

use std::sync::Arc;
use std::time::Duration;

use chirp_core::api::{HeaderMap, Method, StatusCode};
use chirp_core::{ApiClient, ApiError, ClientEvent, CredentialPair, RequestBody, SessionStore};
use serde_json::{json, Value};
use wiremock::matchers::{body_json, body_string_contains, header, method, path};
use wiremock::{Mock, ResponseTemplate};

use common::{bearer, dead_url, signed_in, signed_out, token_body};

async fn mount_refresh(server: &wiremock::MockServer, response: ResponseTemplate, times: u64) {
    Mock::given(method("POST"))
        .and(path("/auth/refresh-token"))
        .and(body_json(json!({ "refresh_token": "RT1" })))
        .respond_with(response)
        .expect(times)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_attaches_stored_access_token() {
    let (server, _store, api) = signed_in().await;
    Mock::given(method("GET"))
        .and(path("/posts/"))
        .and(header("Authorization", bearer("AT1").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "content": "hello" }])))
        .expect(1)
        .mount(&server)
        .await;

    let posts: Vec<Value> = api.get_json("/posts/").await.unwrap();
    assert_eq!(posts[0]["content"], "hello");
}

#[tokio::test]
async fn test_no_authorization_without_credentials() {
    let (server, _store, api) = signed_out().await;
    Mock::given(method("GET"))
        .and(path("/posts/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let response = api.request(Method::GET, "/posts/", None, None).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
    assert!(received[0].headers.get("authorization").is_none());
}

#[tokio::test]
async fn test_json_body_and_extra_headers_are_sent() {
    let (server, _store, api) = signed_in().await;
    Mock::given(method("POST"))
        .and(path("/posts/"))
        .and(header("X-Client", "chirp"))
        .and(header("Authorization", "Bearer AT1"))
        .and(body_json(json!({ "content": "first post" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": "p1" })))
        .expect(1)
        .mount(&server)
        .await;

    let mut headers = HeaderMap::new();
    headers.insert("X-Client", "chirp".parse().unwrap());
    let response = api
        .request(
            Method::POST,
            "/posts/",
            Some(RequestBody::Json(json!({ "content": "first post" }))),
            Some(headers),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(response.json::<Value>().unwrap()["id"], "p1");
}

#[tokio::test]
async fn test_rejected_request_is_refreshed_and_retried() {
    let (server, store, api) = signed_in().await;
    let mut events = api.subscribe();

    Mock::given(method("GET"))
        .and(path("/resource"))
        .and(header("Authorization", "Bearer AT1"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "detail": "Token expired" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/resource"))
        .and(header("Authorization", "Bearer AT2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": 42 })))
        .expect(1)
        .mount(&server)
        .await;
    mount_refresh(
        &server,
        ResponseTemplate::new(200).set_body_json(token_body("AT2", "RT2")),
        1,
    )
    .await;

    let body: Value = api.get_json("/resource").await.unwrap();
    assert_eq!(body["value"], 42);
    assert_eq!(store.load().unwrap(), Some(CredentialPair::new("AT2", "RT2")));
    assert_eq!(events.try_recv().unwrap(), ClientEvent::Refreshed);
}

#[tokio::test]
async fn test_retry_happens_only_once() {
    let (server, store, api) = signed_in().await;

    Mock::given(method("GET"))
        .and(path("/resource"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;
    mount_refresh(
        &server,
        ResponseTemplate::new(200).set_body_json(token_body("AT2", "RT2")),
        1,
    )
    .await;

    let err = api.get_json::<Value>("/resource").await.unwrap_err();
    assert!(matches!(err, ApiError::AuthRejected { .. }), "got {:?}", err);
    assert_eq!(err.status_code(), Some(StatusCode::UNAUTHORIZED));
    // The refresh itself worked, so the new pair is kept
    assert_eq!(store.load().unwrap(), Some(CredentialPair::new("AT2", "RT2")));
}

#[tokio::test]
async fn test_refresh_failure_clears_store() {
    let (server, store, api) = signed_in().await;
    let mut events = api.subscribe();

    Mock::given(method("GET"))
        .and(path("/resource"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    mount_refresh(
        &server,
        ResponseTemplate::new(401).set_body_json(json!({ "detail": "Invalid refresh token" })),
        1,
    )
    .await;

    let err = api.get_json::<Value>("/resource").await.unwrap_err();
    assert!(matches!(err, ApiError::AuthExpired { .. }), "got {:?}", err);
    assert!(err.is_auth_failure());
    assert!(store.load().unwrap().is_none());
    assert_eq!(events.try_recv().unwrap(), ClientEvent::SessionExpired);
}

#[tokio::test]
async fn test_malformed_refresh_response_clears_store() {
    let (server, store, api) = signed_in().await;

    Mock::given(method("GET"))
        .and(path("/resource"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    mount_refresh(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({ "access_token": "AT2" })),
        1,
    )
    .await;

    let err = api.get_json::<Value>("/resource").await.unwrap_err();
    assert!(matches!(err, ApiError::AuthExpired { .. }), "got {:?}", err);
    assert!(store.load().unwrap().is_none());
}

#[tokio::test]
async fn test_concurrent_rejections_share_one_refresh() {
    let (server, store, api) = signed_in().await;

    Mock::given(method("GET"))
        .and(path("/resource"))
        .and(header("Authorization", "Bearer AT1"))
        .respond_with(ResponseTemplate::new(401))
        .expect(5)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/resource"))
        .and(header("Authorization", "Bearer AT2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .expect(5)
        .mount(&server)
        .await;
    mount_refresh(
        &server,
        ResponseTemplate::new(200)
            .set_body_json(token_body("AT2", "RT2"))
            .set_delay(Duration::from_millis(100)),
        1,
    )
    .await;

    let requests = (0..5).map(|_| {
        let api = Arc::clone(&api);
        async move { api.get_json::<Value>("/resource").await }
    });
    let results = futures::future::join_all(requests).await;

    for result in results {
        assert_eq!(result.unwrap()["ok"], true);
    }
    assert_eq!(store.load().unwrap(), Some(CredentialPair::new("AT2", "RT2")));
}

#[tokio::test]
async fn test_concurrent_rejections_all_fail_when_refresh_fails() {
    let (server, store, api) = signed_in().await;

    Mock::given(method("GET"))
        .and(path("/resource"))
        .respond_with(ResponseTemplate::new(401))
        .expect(3)
        .mount(&server)
        .await;
    mount_refresh(
        &server,
        ResponseTemplate::new(401).set_delay(Duration::from_millis(50)),
        1,
    )
    .await;

    let requests = (0..3).map(|_| {
        let api = Arc::clone(&api);
        async move { api.get_json::<Value>("/resource").await }
    });
    for result in futures::future::join_all(requests).await {
        assert!(matches!(result, Err(ApiError::AuthExpired { .. })));
    }
    assert!(store.load().unwrap().is_none());
}

#[tokio::test]
async fn test_unauthorized_without_credentials_skips_refresh() {
    let (server, _store, api) = signed_out().await;

    Mock::given(method("GET"))
        .and(path("/resource"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "detail": "Not authenticated" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh-token"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let err = api.get_json::<Value>("/resource").await.unwrap_err();
    assert!(matches!(err, ApiError::AuthRejected { .. }));
    assert_eq!(err.detail().as_deref(), Some("Not authenticated"));
}

#[tokio::test]
async fn test_other_errors_are_surfaced_without_retry() {
    let (server, store, api) = signed_in().await;

    Mock::given(method("GET"))
        .and(path("/posts/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "detail": "Post not found" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/posts/broken"))
        .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
        .expect(1)
        .mount(&server)
        .await;

    let err = api.get_json::<Value>("/posts/missing").await.unwrap_err();
    assert!(matches!(err, ApiError::Validation { .. }), "got {:?}", err);
    assert_eq!(err.status_code(), Some(StatusCode::NOT_FOUND));
    assert_eq!(err.detail().as_deref(), Some("Post not found"));

    let err = api.get_json::<Value>("/posts/broken").await.unwrap_err();
    assert!(matches!(err, ApiError::Server { .. }), "got {:?}", err);
    assert_eq!(err.body(), Some("Internal Server Error"));

    // Nothing about the session changed
    assert_eq!(store.load().unwrap(), Some(CredentialPair::new("AT1", "RT1")));
}

#[tokio::test]
async fn test_network_failure_has_no_status() {
    let store = Arc::new(chirp_core::MemoryStore::with_pair(CredentialPair::new("AT1", "RT1")));
    let api = ApiClient::new(dead_url(), store.clone()).unwrap();

    let err = api.get_json::<Value>("/resource").await.unwrap_err();
    assert!(matches!(err, ApiError::Network(_)), "got {:?}", err);
    assert_eq!(err.status_code(), None);
    assert!(store.load().unwrap().is_some());
}

#[tokio::test]
async fn test_login_persists_pair_and_signs_next_request() {
    let (server, store, api) = signed_out().await;

    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .and(header("Content-Type", "application/x-www-form-urlencoded"))
        .and(body_string_contains("username=a%40b.com"))
        .and(body_string_contains("password=password1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("AT1", "RT1")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/auth/me"))
        .and(header("Authorization", "Bearer AT1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::profile_body()))
        .expect(1)
        .mount(&server)
        .await;

    let pair = api.login("a@b.com", "password1").await.unwrap();
    assert_eq!(pair.access_token, "AT1");
    assert_eq!(store.load().unwrap(), Some(pair));

    let me = api.me().await.unwrap();
    assert_eq!(me.username, "alice");
}

#[tokio::test]
async fn test_login_rejection_does_not_refresh() {
    let (server, store, api) = signed_in().await;

    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({ "detail": "Invalid email or password" })),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh-token"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let err = api.login("a@b.com", "wrong").await.unwrap_err();
    assert!(matches!(err, ApiError::AuthRejected { .. }));
    // The previous session is untouched
    assert_eq!(store.load().unwrap(), Some(CredentialPair::new("AT1", "RT1")));
}

#[tokio::test]
async fn test_register_with_null_token_type() {
    let (server, store, api) = signed_out().await;

    Mock::given(method("POST"))
        .and(path("/auth/register"))
        .and(body_json(json!({
            "username": "alice",
            "email": "a@b.com",
            "password": "password1",
            "full_name": "Alice Liddell"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "access_token": "AT1",
            "refresh_token": "RT1",
            "token_type": null
        })))
        .expect(1)
        .mount(&server)
        .await;

    let account = chirp_core::NewAccount {
        username: "alice".to_string(),
        email: "a@b.com".to_string(),
        password: "password1".to_string(),
        full_name: Some("Alice Liddell".to_string()),
    };
    let pair = api.register(&account).await.unwrap();
    assert_eq!(pair.token_type, "bearer");
    assert_eq!(store.load().unwrap(), Some(pair));
}

#[tokio::test]
async fn test_logout_clears_store_even_when_server_fails() {
    let (server, store, api) = signed_in().await;

    Mock::given(method("POST"))
        .and(path("/auth/logout"))
        .and(header("Authorization", "Bearer AT1"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let err = api.logout().await.unwrap_err();
    assert!(matches!(err, ApiError::Server { .. }));
    assert!(store.load().unwrap().is_none());
}

#[tokio::test]
async fn test_logout_without_session_makes_no_call() {
    let (server, store, api) = signed_out().await;

    Mock::given(method("POST"))
        .and(path("/auth/logout"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    api.logout().await.unwrap();
    assert!(store.load().unwrap().is_none());
}

/// Server that answers one request with `status` and a body cut short.
fn truncated_body_server(status_line: &'static str) -> String {
    use std::io::{Read, Write};

    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("local addr");
    std::thread::spawn(move || {
        let (mut socket, _) = listener.accept().expect("accept");
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            match socket.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => request.extend_from_slice(&buf[..n]),
            }
        }
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Length: 100\r\nConnection: close\r\n\r\npartial",
            status_line
        );
        let _ = socket.write_all(response.as_bytes());
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_unreadable_error_body_keeps_status() {
    let store = Arc::new(chirp_core::MemoryStore::new());
    let api = ApiClient::new(truncated_body_server("503 Service Unavailable"), store).unwrap();

    let err = api.get_json::<Value>("/posts/").await.unwrap_err();
    assert!(matches!(err, ApiError::Server { ref body, .. } if body.is_empty()), "got {:?}", err);
    assert_eq!(err.status_code(), Some(StatusCode::SERVICE_UNAVAILABLE));
}

#![allow(dead_code)]

use std::sync::Arc;

use chirp_core::{ApiClient, CredentialPair, MemoryStore};
use serde_json::{json, Value};
use wiremock::MockServer;

pub fn token_body(access: &str, refresh: &str) -> Value {
    json!({
        "access_token": access,
        "refresh_token": refresh,
        "token_type": "bearer"
    })
}

pub fn profile_body() -> Value {
    json!({
        "_id": "665f1c2e9b1e8a0012345678",
        "email": "a@b.com",
        "username": "alice",
        "full_name": "Alice Liddell",
        "bio": "down the rabbit hole",
        "profile_picture_url": null,
        "created_at": "2024-06-04T12:30:45.123456",
        "updated_at": null
    })
}

pub fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}

pub fn client(server: &MockServer, store: &Arc<MemoryStore>) -> Arc<ApiClient> {
    Arc::new(ApiClient::new(server.uri(), store.clone()).expect("client builds"))
}

/// Mock server plus a client whose store already holds `AT1`/`RT1`.
pub async fn signed_in() -> (MockServer, Arc<MemoryStore>, Arc<ApiClient>) {
    let server = MockServer::start().await;
    let store = Arc::new(MemoryStore::with_pair(CredentialPair::new("AT1", "RT1")));
    let api = client(&server, &store);
    (server, store, api)
}

/// Mock server plus a client with an empty store.
pub async fn signed_out() -> (MockServer, Arc<MemoryStore>, Arc<ApiClient>) {
    let server = MockServer::start().await;
    let store = Arc::new(MemoryStore::new());
    let api = client(&server, &store);
    (server, store, api)
}

/// Base URL that refuses connections.
pub fn dead_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    drop(listener);
    format!("http://127.0.0.1:{}", port)
}

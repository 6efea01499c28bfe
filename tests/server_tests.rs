//! End-to-end tests over a real TCP listener.
//!
//! These cover what `oneshot` cannot: peer addresses supplied by the server
//! itself through `into_make_service_with_connect_info`.
//!
//! Run with: `cargo test --test server_tests`
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::time::Duration;

use attendance_api::{AppState, Config, Environment, RouteTable, build_router};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// Running server bound to an ephemeral port; stops when dropped.
struct TestServer {
    base_url: String,
    client: Client,
    _shutdown: oneshot::Sender<()>,
}

impl TestServer {
    async fn start(config: Config) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to ephemeral port");
        let addr = listener.local_addr().expect("Failed to get local address");

        let state = AppState::new(config);
        let app = build_router(state, RouteTable::new());
        let (tx, rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async {
                let _ = rx.await;
            })
            .await
            .expect("Server failed");
        });

        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            base_url: format!("http://{addr}"),
            client,
            _shutdown: tx,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get(&self, path: &str, forwarded_for: Option<&str>) -> reqwest::Response {
        let mut request = self.client.get(self.url(path));
        if let Some(ip) = forwarded_for {
            request = request.header("x-forwarded-for", ip);
        }
        request.send().await.expect("request should complete")
    }
}

fn limited(max: u32, trusted_proxies: &[&str]) -> Config {
    Config {
        environment: Environment::Test,
        rate_limit_max_requests: max,
        trusted_proxies: trusted_proxies.iter().map(|s| s.to_string()).collect(),
        ..Config::default()
    }
}

#[tokio::test]
async fn test_health_over_tcp() {
    let server = TestServer::start(limited(100, &[])).await;

    let response = server.get("/api/health", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_peer_address_is_rate_limit_identity() {
    let server = TestServer::start(limited(2, &[])).await;

    for _ in 0..2 {
        let response = server.get("/api/users", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.headers().contains_key("x-ratelimit-remaining"));
    }

    let response = server.get("/api/users", None).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Too many requests, please try again later.");
}

#[tokio::test]
async fn test_untrusted_forwarded_for_is_ignored() {
    let server = TestServer::start(limited(1, &[])).await;

    let first = server.get("/api/users", Some("198.51.100.1")).await;
    let second = server.get("/api/users", Some("198.51.100.2")).await;

    assert_ne!(first.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_trusted_proxy_forwarded_for_is_honored() {
    let server = TestServer::start(limited(1, &["127.0.0.0/8"])).await;

    let first = server.get("/api/users", Some("198.51.100.1")).await;
    let other_client = server.get("/api/users", Some("198.51.100.2, 10.0.0.1")).await;
    let repeat = server.get("/api/users", Some("198.51.100.1")).await;

    assert_ne!(first.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_ne!(other_client.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(repeat.status(), StatusCode::TOO_MANY_REQUESTS);
}

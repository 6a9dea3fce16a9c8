//! Common test utilities for end-to-end testing with fake helpers.
//!
//! This module provides a test fixture that creates an in-process server
//! whose streaming helper is a shell script in a temporary directory,
//! enabling full request-to-process testing without a torrent client.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use magnetstream_core::testing::FakeHelper;
use magnetstream_core::{Config, HelperConfig, RelayConfig, StreamRelay};
use magnetstream_server::api::create_router;
use magnetstream_server::state::AppState;

/// Test fixture for end-to-end testing against a fake helper.
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_stream() {
///     let fixture = TestFixture::emitting(b"hello-video-bytes");
///
///     let response = fixture.get(&stream_path("magnet:?xt=urn:btih:abc")).await;
///
///     assert_eq!(response.status, 200);
///     assert_eq!(response.bytes.as_ref(), b"hello-video-bytes");
/// }
/// ```
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    /// Relay shared with the router, for inspecting sessions
    pub relay: Arc<StreamRelay>,
    /// Fake helper script the relay launches
    pub helper: FakeHelper,
    /// Directory holding the helper script and its call logs
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// Body bytes received before the body ended or failed
    pub bytes: Bytes,
    /// Whether the body ended with an error instead of completing
    pub truncated: bool,
}

impl TestResponse {
    /// Body parsed as JSON, or `Value::Null` if it is empty or not JSON.
    pub fn json(&self) -> Value {
        if self.bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&self.bytes).unwrap_or(Value::Null)
        }
    }
}

impl TestFixture {
    /// Fixture whose helper writes `payload` to stdout and exits 0.
    pub fn emitting(payload: &[u8]) -> Self {
        Self::build(RelayConfig::default(), |dir| {
            FakeHelper::emitting(dir, "webtorrent", payload)
        })
    }

    /// Fixture whose helper writes one chunk and then stays alive.
    pub fn streaming_forever(relay_config: RelayConfig) -> Self {
        Self::build(relay_config, |dir| {
            FakeHelper::streaming_forever(dir, "webtorrent")
        })
    }

    /// Fixture whose helper writes `payload` and then fails.
    pub fn emitting_then_failing(payload: &[u8], code: i32) -> Self {
        Self::build(RelayConfig::default(), |dir| {
            FakeHelper::emitting_then_failing(dir, "webtorrent", payload, code, "peer lookup failed")
        })
    }

    /// Fixture pointing at a helper path that does not exist.
    pub fn missing_helper() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let helper =
            FakeHelper::silent(temp_dir.path(), "webtorrent").expect("Failed to write helper");
        let config = HelperConfig {
            program: temp_dir.path().join("not-installed"),
            extra_args: Vec::new(),
        };
        Self::with_helper_config(temp_dir, helper, config, RelayConfig::default())
    }

    fn build(
        relay_config: RelayConfig,
        make_helper: impl FnOnce(&std::path::Path) -> std::io::Result<FakeHelper>,
    ) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let helper = make_helper(temp_dir.path()).expect("Failed to write helper");
        let config = helper.helper_config();
        Self::with_helper_config(temp_dir, helper, config, relay_config)
    }

    fn with_helper_config(
        temp_dir: TempDir,
        helper: FakeHelper,
        helper_config: HelperConfig,
        relay_config: RelayConfig,
    ) -> Self {
        let config = Config {
            helper: helper_config,
            relay: relay_config.with_termination_grace_ms(200),
            ..Default::default()
        };

        let state = Arc::new(AppState::from_config(config));
        let relay = Arc::clone(state.relay());
        let router = create_router(state);

        Self {
            router,
            relay,
            helper,
            temp_dir,
        }
    }

    /// Serve the router on an ephemeral local port for tests that need a
    /// real socket.
    pub async fn serve(&self) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test listener");
        let addr = listener.local_addr().expect("Failed to read local addr");
        let router = self.router.clone();
        tokio::spawn(async move {
            axum::serve(listener, router).await.ok();
        });
        addr
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path).await
    }

    /// Send a DELETE request.
    pub async fn delete(&self, path: &str) -> TestResponse {
        self.request("DELETE", path).await
    }

    /// Send a request and collect the body up to its end or first error.
    async fn request(&self, method: &str, path: &str) -> TestResponse {
        let request = Request::builder()
            .method(method)
            .uri(path)
            .body(Body::empty())
            .unwrap();

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let headers = response.headers().clone();
        let mut body = response.into_body();
        let mut bytes = Vec::new();
        let mut truncated = false;
        while let Some(frame) = body.frame().await {
            match frame {
                Ok(frame) => {
                    if let Some(data) = frame.data_ref() {
                        bytes.extend_from_slice(data);
                    }
                }
                Err(_) => {
                    truncated = true;
                    break;
                }
            }
        }

        TestResponse {
            status,
            headers,
            bytes: Bytes::from(bytes),
            truncated,
        }
    }
}

/// `/stream` path with the magnet percent-encoded into the query.
pub fn stream_path(magnet: &str) -> String {
    format!("/stream?magnet={}", urlencoding::encode(magnet))
}

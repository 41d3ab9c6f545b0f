#![allow(dead_code)]

use std::collections::HashSet;
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use difyrelay::config::GatewayTimings;
use difyrelay::routes;
use difyrelay::state::AppState;
use difyrelay::upstream::UpstreamClient;
use futures_util::{stream, StreamExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Timings short enough for tests. The heartbeat fires once on connect and
/// then stays quiet so frame sequences are deterministic.
pub fn test_timings() -> GatewayTimings {
    GatewayTimings {
        heartbeat_interval: Duration::from_secs(3600),
        receive_timeout: Duration::from_millis(100),
        upstream_timeout: Duration::from_secs(5),
        shutdown_grace: Duration::from_millis(500),
    }
}

/// Gateway under test, wired to the given upstream base URL.
pub struct TestServer {
    pub state: AppState,
}

impl TestServer {
    pub fn new(upstream_base_url: &str) -> Self {
        Self::with_allowed_ips(upstream_base_url, HashSet::new())
    }

    pub fn with_allowed_ips(upstream_base_url: &str, allowed: HashSet<IpAddr>) -> Self {
        Self::build(upstream_base_url, allowed, test_timings())
    }

    pub fn with_timings(upstream_base_url: &str, timings: GatewayTimings) -> Self {
        Self::build(upstream_base_url, HashSet::new(), timings)
    }

    fn build(upstream_base_url: &str, allowed: HashSet<IpAddr>, timings: GatewayTimings) -> Self {
        let state = AppState {
            timings,
            upstream: UpstreamClient::new(upstream_base_url, timings.upstream_timeout),
            allowed_ips: Arc::new(allowed),
            shutdown: CancellationToken::new(),
        };
        Self { state }
    }

    /// Returns an Axum Router wired to this server's state for `oneshot()` calls.
    pub fn router(&self) -> Router {
        routes::router(self.state.clone())
    }

    /// Binds a TCP listener on port 0, spawns the server, and returns the
    /// gateway's `ws://` URL.
    pub async fn spawn(&self) -> String {
        let app = self.router();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });
        format!("ws://127.0.0.1:{}/ws/dify", addr.port())
    }
}

/// A request the mock upstream received.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub path: String,
    pub authorization: Option<String>,
    pub body: serde_json::Value,
}

#[derive(Clone, Default)]
struct MockState {
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    slow_stream_dropped: Arc<AtomicBool>,
}

/// Streaming inference service stand-in.
///
/// - `chat-messages`: two SSE lines split awkwardly across chunks
/// - `fail`: HTTP 500
/// - `broken`: one line, then the body aborts
/// - `slow`: a line every 50ms forever
pub struct MockUpstream {
    pub base_url: String,
    state: MockState,
}

impl MockUpstream {
    pub async fn spawn() -> Self {
        let state = MockState::default();
        let app = Router::new()
            .route("/v1/chat-messages", post(chat_messages))
            .route("/v1/fail", post(fail))
            .route("/v1/broken", post(broken))
            .route("/v1/slow", post(slow))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://127.0.0.1:{}/v1/", addr.port()),
            state,
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn slow_stream_dropped(&self) -> bool {
        self.state.slow_stream_dropped.load(Ordering::SeqCst)
    }
}

fn record(state: &MockState, path: &str, headers: &HeaderMap, body: serde_json::Value) {
    let authorization = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    state.requests.lock().unwrap().push(RecordedRequest {
        path: path.to_string(),
        authorization,
        body,
    });
}

async fn chat_messages(
    State(state): State<MockState>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Response {
    record(&state, "chat-messages", &headers, body);
    let chunks = vec!["data: {\"a\"", ":1}\n\ndata: [DO", "NE]\n"];
    let body = stream::iter(chunks).then(|chunk| async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok::<_, Infallible>(chunk)
    });
    Body::from_stream(body).into_response()
}

async fn fail(State(state): State<MockState>, headers: HeaderMap, Json(body): Json<serde_json::Value>) -> Response {
    record(&state, "fail", &headers, body);
    (StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded").into_response()
}

async fn broken(State(state): State<MockState>, headers: HeaderMap, Json(body): Json<serde_json::Value>) -> Response {
    record(&state, "broken", &headers, body);
    let items: Vec<Result<&'static str, std::io::Error>> = vec![
        Ok("data: partial\n"),
        Err(std::io::Error::new(
            std::io::ErrorKind::Other,
            "upstream went away",
        )),
    ];
    let body = stream::iter(items).then(|item| async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        item
    });
    Body::from_stream(body).into_response()
}

/// Sets its flag when the response body it lives in is dropped.
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

async fn slow(State(state): State<MockState>, headers: HeaderMap, Json(body): Json<serde_json::Value>) -> Response {
    record(&state, "slow", &headers, body);
    let guard = DropFlag(state.slow_stream_dropped.clone());
    let body = stream::unfold(guard, |guard| async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Some((Ok::<_, Infallible>("data: tick\n"), guard))
    });
    Body::from_stream(body).into_response()
}

/// A base URL nothing is listening on.
pub async fn refused_base_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{port}/v1/")
}

/// Poll `check` until it holds or `within` elapses.
pub async fn eventually(within: Duration, check: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

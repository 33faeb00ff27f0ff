//! In-process HTTP server for integration tests. Routes cover the
//! behaviors the engine exercises: plain success, echo, JSON login with
//! cookies, per-user lookups, rate-limit-then-succeed, redirects, and a
//! configurable delay.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::{Duration, sleep};

pub const PATH_OK: &str = "/ok";
pub const PATH_ECHO: &str = "/echo";
pub const PATH_SLOW: &str = "/slow";
pub const PATH_LOGIN: &str = "/login";
pub const PATH_USERS: &str = "/users/{id}";
pub const PATH_FLAKY: &str = "/flaky";
pub const PATH_REDIRECT: &str = "/redirect";
pub const PATH_STATUS: &str = "/status/{code}";

#[derive(Debug, Clone, Default)]
pub struct TestServerStats {
    requests_total: Arc<AtomicU64>,
    flaky_attempts: Arc<AtomicU64>,
    users_hits: Arc<AtomicU64>,
    last_user_id: Arc<std::sync::Mutex<Option<String>>>,
    last_authorization: Arc<std::sync::Mutex<Option<String>>>,
    last_cookie: Arc<std::sync::Mutex<Option<String>>>,
}

impl TestServerStats {
    fn inc_requests(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn flaky_attempts(&self) -> u64 {
        self.flaky_attempts.load(Ordering::Relaxed)
    }

    pub fn users_hits(&self) -> u64 {
        self.users_hits.load(Ordering::Relaxed)
    }

    pub fn last_user_id(&self) -> Option<String> {
        self.last_user_id.lock().unwrap().clone()
    }

    pub fn last_authorization(&self) -> Option<String> {
        self.last_authorization.lock().unwrap().clone()
    }

    pub fn last_cookie(&self) -> Option<String> {
        self.last_cookie.lock().unwrap().clone()
    }

    /// Reset the flaky endpoint so each test sees a fresh 429-then-200
    /// sequence.
    pub fn reset_flaky(&self) {
        self.flaky_attempts.store(0, Ordering::Relaxed);
    }
}

async fn handle_ok(State(stats): State<TestServerStats>) -> impl IntoResponse {
    stats.inc_requests();
    (
        [(header::CONTENT_TYPE, "application/json")],
        r#"{"ok":true}"#,
    )
}

async fn handle_echo(
    State(stats): State<TestServerStats>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    stats.inc_requests();

    if let Some(cookie) = headers.get(header::COOKIE).and_then(|v| v.to_str().ok()) {
        *stats.last_cookie.lock().unwrap() = Some(cookie.to_string());
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    ([(header::CONTENT_TYPE, content_type)], body).into_response()
}

async fn handle_slow(
    State(stats): State<TestServerStats>,
    Query(query): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    stats.inc_requests();
    let ms = query
        .get("ms")
        .and_then(|v| v.parse().ok())
        .unwrap_or(50u64);
    sleep(Duration::from_millis(ms)).await;
    ([(header::CONTENT_TYPE, "application/json")], r#"{"slow":true}"#)
}

#[derive(Debug, Serialize)]
struct LoginResponse {
    access_token: String,
    user: LoginUser,
}

#[derive(Debug, Serialize)]
struct LoginUser {
    id: u64,
    name: String,
}

async fn handle_login(State(stats): State<TestServerStats>, body: Bytes) -> Response {
    stats.inc_requests();

    // The feature cookie drives conditional-flow tests; session drives
    // cookie-isolation tests.
    let feature = if body.as_ref().windows(b"legacy".len()).any(|w| w == b"legacy") {
        "false"
    } else {
        "true"
    };

    let payload = LoginResponse {
        access_token: "tok-7f3a".to_string(),
        user: LoginUser {
            id: 1337,
            name: "admin".to_string(),
        },
    };

    let mut response = (
        [(header::CONTENT_TYPE, "application/json")],
        serde_json::to_string(&payload).unwrap(),
    )
        .into_response();

    let headers = response.headers_mut();
    headers.append(
        header::SET_COOKIE,
        format!("session=sess-{}; Path=/", stats.requests_total())
            .parse()
            .unwrap(),
    );
    headers.append(
        header::SET_COOKIE,
        format!("feature={feature}; Path=/").parse().unwrap(),
    );

    response
}

async fn handle_user(
    State(stats): State<TestServerStats>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> impl IntoResponse {
    stats.inc_requests();
    stats.users_hits.fetch_add(1, Ordering::Relaxed);
    *stats.last_user_id.lock().unwrap() = Some(id.clone());
    if let Some(auth) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        *stats.last_authorization.lock().unwrap() = Some(auth.to_string());
    }

    (
        [(header::CONTENT_TYPE, "application/json")],
        format!(r#"{{"id":"{id}","name":"user-{id}"}}"#),
    )
}

/// 429 with `Retry-After: 1` on the first hit, 200 afterwards.
async fn handle_flaky(State(stats): State<TestServerStats>) -> Response {
    stats.inc_requests();
    let attempt = stats.flaky_attempts.fetch_add(1, Ordering::Relaxed);

    if attempt == 0 {
        (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, "1")],
            r#"{"error":"rate limited"}"#,
        )
            .into_response()
    } else {
        (
            [(header::CONTENT_TYPE, "application/json")],
            r#"{"ok":true,"recovered":true}"#,
        )
            .into_response()
    }
}

async fn handle_redirect(State(stats): State<TestServerStats>) -> Response {
    stats.inc_requests();
    (
        StatusCode::FOUND,
        [
            (header::LOCATION, PATH_OK),
            (header::SET_COOKIE, "hop=1; Path=/"),
        ],
    )
        .into_response()
}

async fn handle_status(
    State(stats): State<TestServerStats>,
    Path(code): Path<u16>,
) -> Response {
    stats.inc_requests();
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, format!(r#"{{"status":{}}}"#, status.as_u16())).into_response()
}

pub fn router(stats: TestServerStats) -> Router {
    Router::new()
        .route(PATH_OK, get(handle_ok))
        .route(PATH_ECHO, post(handle_echo))
        .route(PATH_SLOW, get(handle_slow))
        .route(PATH_LOGIN, post(handle_login).get(handle_login))
        .route(PATH_USERS, get(handle_user))
        .route(PATH_FLAKY, get(handle_flaky))
        .route(PATH_REDIRECT, get(handle_redirect))
        .route(PATH_STATUS, get(handle_status))
        .with_state(stats)
}

pub struct TestServer {
    addr: SocketAddr,
    base_url: String,
    stats: TestServerStats,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let stats = TestServerStats::default();
        let app = router(stats.clone());

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            let _ = serve.await;
        });

        Ok(Self {
            addr,
            base_url: format!("http://{addr}"),
            stats,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    pub fn stats(&self) -> &TestServerStats {
        &self.stats
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if self.shutdown_tx.is_some() {
            if let Some(task) = self.task.take() {
                task.abort();
            }
        }
    }
}

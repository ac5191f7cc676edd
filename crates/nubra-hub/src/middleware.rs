//! API middleware: rate limiting, CORS, and logging.

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::info;

use crate::api::error_response;

/// Per-client request count inside the current window.
#[derive(Clone, Copy)]
struct Window {
    count: usize,
    started: Instant,
}

/// Fixed-window rate limiter keyed by client.
#[derive(Clone)]
pub struct RateLimiter {
    windows: Arc<Mutex<HashMap<String, Window>>>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window_secs: u64) -> Self {
        Self {
            windows: Arc::new(Mutex::new(HashMap::new())),
            max_requests,
            window: Duration::from_secs(window_secs),
        }
    }

    /// Check if a request should be allowed.
    pub async fn check(&self, key: &str) -> bool {
        self.check_at(key, Instant::now()).await
    }

    async fn check_at(&self, key: &str, now: Instant) -> bool {
        let mut windows = self.windows.lock().await;
        let window = self.window;

        // A window resets only once strictly more than `window` has passed
        windows.retain(|_, w| now.saturating_duration_since(w.started) <= window);

        let entry = windows.entry(key.to_string()).or_insert(Window {
            count: 0,
            started: now,
        });
        entry.count += 1;
        entry.count <= self.max_requests
    }
}

/// Rate-limit key: first `X-Forwarded-For` hop, else the peer address.
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|p| p.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Rate limiting middleware. Only POSTs count against the budget.
pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if request.method() != Method::POST {
        return next.run(request).await;
    }

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|c| c.0);
    let key = client_key(request.headers(), peer);

    if !limiter.check(&key).await {
        tracing::warn!("Rate limit hit for {}", key);
        return error_response(
            StatusCode::TOO_MANY_REQUESTS,
            "RATE_LIMIT_EXCEEDED",
            "Too many requests. Please slow down.",
        );
    }

    next.run(request).await
}

/// Origins allowed to call the relay. Empty means any.
#[derive(Clone, Default)]
pub struct CorsPolicy {
    allowed_origins: Arc<Vec<String>>,
}

impl CorsPolicy {
    pub fn new(allowed_origins: Vec<String>) -> Self {
        Self {
            allowed_origins: Arc::new(allowed_origins),
        }
    }

    /// Value for `Access-Control-Allow-Origin`, if any.
    ///
    /// With an allow-list, only a listed `Origin` is echoed back.
    fn allow_origin(&self, origin: Option<&str>) -> Option<String> {
        if self.allowed_origins.is_empty() {
            return Some("*".to_string());
        }
        origin
            .filter(|origin| self.allowed_origins.iter().any(|o| o == origin))
            .map(str::to_string)
    }
}

/// CORS middleware. Answers preflight requests directly with 204.
pub async fn cors_middleware(
    State(policy): State<CorsPolicy>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let origin = request
        .headers()
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let methods = if request.uri().path() == "/health" {
        "GET, OPTIONS"
    } else {
        "POST, OPTIONS"
    };

    let mut response = if request.method() == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(request).await
    };

    let headers = response.headers_mut();
    if let Some(allow) = policy
        .allow_origin(origin.as_deref())
        .and_then(|o| HeaderValue::from_str(&o).ok())
    {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, allow);
    }
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(methods),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type, Authorization"),
    );
    response
}

/// Request logging middleware.
pub async fn logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let response = next.run(request).await;

    let duration = start.elapsed();
    let status = response.status();

    info!(
        "{} {} → {} ({:.1}ms)",
        method,
        uri,
        status.as_u16(),
        duration.as_secs_f64() * 1000.0
    );

    response
}

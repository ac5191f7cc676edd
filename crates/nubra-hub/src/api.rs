//! Relay HTTP server: the backend the assistant talks to.
//!
//! Endpoints:
//! - POST /convert: Convert broker code through the completion provider
//! - POST /chat: Answer a free-form question
//! - GET  /health: Liveness probe
//!
//! Every failure is an `{errorCode, message}` envelope; provider detail is
//! logged here and never sent to clients.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    body::to_bytes,
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::{from_fn, from_fn_with_state},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde_json::Value;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use nubra_core::config::ServerSettings;
use nubra_core::protocol::{
    ChatResponse, ConvertMetadata, ConvertResponse, ErrorEnvelope, HealthResponse,
};
use nubra_core::provider::LlmProvider;

use crate::middleware::{
    CorsPolicy, RateLimiter, cors_middleware, logging_middleware, rate_limit_middleware,
};
use crate::prompts;
use crate::validation::{is_unsafe, validate_chat, validate_convert};

const UNSAFE_MESSAGE: &str = "Input appears to contain prompt-injection style instructions. \
                              Please remove such content and try again.";

/// Shared API state.
pub struct ApiState {
    pub provider: Arc<dyn LlmProvider>,
    pub max_body_bytes: usize,
}

type SharedState = Arc<ApiState>;

/// Build an error envelope response.
pub fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    (status, Json(ErrorEnvelope::new(code, message))).into_response()
}

/// Read the body as JSON, enforcing the size cap. An empty body reads as `{}`.
async fn read_json(request: Request, limit: usize) -> Result<Value, Response> {
    let too_large = || {
        error_response(
            StatusCode::PAYLOAD_TOO_LARGE,
            "REQUEST_TOO_LARGE",
            "Invalid request.",
        )
    };

    let declared = request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > limit) {
        return Err(too_large());
    }

    let bytes = to_bytes(request.into_body(), limit)
        .await
        .map_err(|_| too_large())?;
    if bytes.is_empty() {
        return Ok(Value::Object(Default::default()));
    }

    serde_json::from_slice(&bytes).map_err(|e| {
        debug!("Rejected malformed JSON body: {}", e);
        error_response(StatusCode::BAD_REQUEST, "INVALID_JSON", "Invalid request.")
    })
}

fn validation_failure(errors: Vec<String>) -> Response {
    error_response(
        StatusCode::BAD_REQUEST,
        "VALIDATION_ERROR",
        &errors.join(" "),
    )
}

fn str_field<'a>(body: &'a Value, field: &str) -> &'a str {
    body.get(field).and_then(Value::as_str).unwrap_or_default()
}

// ─── Handlers ──────────────────────────────────────────────

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn convert(State(state): State<SharedState>, request: Request) -> Response {
    let body = match read_json(request, state.max_body_bytes).await {
        Ok(body) => body,
        Err(response) => return response,
    };

    let errors = validate_convert(&body);
    if !errors.is_empty() {
        return validation_failure(errors);
    }

    let broker = str_field(&body, "broker");
    let language = str_field(&body, "language");
    let code = str_field(&body, "code");
    if is_unsafe(code) {
        return error_response(StatusCode::BAD_REQUEST, "UNSAFE_INPUT", UNSAFE_MESSAGE);
    }

    let options = body.get("options").unwrap_or(&Value::Null);
    let prompt = prompts::convert_message(broker, language, code, options);
    debug!(
        "Convert: broker={}, language={}, {} chars",
        broker,
        language,
        code.len()
    );

    match state.provider.complete(&prompt).await {
        Ok(text) => Json(ConvertResponse {
            converted_code: text,
            metadata: ConvertMetadata {
                broker: broker.to_string(),
                language: language.to_string(),
            },
        })
        .into_response(),
        Err(e) => {
            error!("Conversion via {} failed: {}", state.provider.name(), e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "CONVERSION_FAILED",
                "Conversion service is not available. Please try again later.",
            )
        }
    }
}

async fn chat(State(state): State<SharedState>, request: Request) -> Response {
    let body = match read_json(request, state.max_body_bytes).await {
        Ok(body) => body,
        Err(response) => return response,
    };

    let errors = validate_chat(&body);
    if !errors.is_empty() {
        return validation_failure(errors);
    }

    let prompt = str_field(&body, "prompt");
    if is_unsafe(prompt) {
        return error_response(StatusCode::BAD_REQUEST, "UNSAFE_INPUT", UNSAFE_MESSAGE);
    }
    debug!("Chat: {} chars", prompt.len());

    match state.provider.complete(&prompts::chat_message(prompt)).await {
        Ok(answer) => Json(ChatResponse { answer }).into_response(),
        Err(e) => {
            error!("Chat via {} failed: {}", state.provider.name(), e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "CHAT_FAILED",
                "Chat service is not available. Please try again later.",
            )
        }
    }
}

async fn post_only() -> Response {
    error_response(
        StatusCode::METHOD_NOT_ALLOWED,
        "METHOD_NOT_ALLOWED",
        "POST only.",
    )
}

async fn get_only() -> Response {
    error_response(
        StatusCode::METHOD_NOT_ALLOWED,
        "METHOD_NOT_ALLOWED",
        "GET only.",
    )
}

// ─── Server builder ────────────────────────────────────────

/// Build the API router.
pub fn build_router(state: ApiState, settings: &ServerSettings) -> Router {
    let limiter = RateLimiter::new(settings.rate_limit_max, settings.rate_limit_window_secs);
    let cors = CorsPolicy::new(settings.allowed_origins.clone());

    Router::new()
        .route("/convert", post(convert).fallback(post_only))
        .route("/chat", post(chat).fallback(post_only))
        .route("/health", get(health).fallback(get_only))
        .layer(from_fn_with_state(limiter, rate_limit_middleware))
        .layer(from_fn_with_state(cors, cors_middleware))
        .layer(from_fn(logging_middleware))
        .with_state(Arc::new(state))
}

/// Serve an already-bound listener, exposing peer addresses to the limiter.
pub async fn serve(listener: TcpListener, app: Router) -> anyhow::Result<()> {
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

/// Start the API server.
pub async fn start_server(state: ApiState, settings: &ServerSettings) -> anyhow::Result<()> {
    let app = build_router(state, settings);

    let addr: SocketAddr = format!("{}:{}", settings.host, settings.port).parse()?;
    info!("🌐 Nubra backend listening on http://{}", addr);

    let listener = TcpListener::bind(addr).await?;
    serve(listener, app).await
}

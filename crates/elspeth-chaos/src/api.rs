//! Axum routers: the `/admin/*` control surface shared by both
//! harnesses, plus the ChaosLLM and ChaosWeb mock endpoints.

use crate::config::FaultInjectionConfig;
use crate::content;
use crate::error::ChaosError;
use crate::fault::ErrorDecision;
use crate::llm::{error_body, parse_request};
use crate::server::ChaosServer;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use axum::body::Bytes;
use serde_json::{json, Value};
use std::sync::Arc;

/// Build the `/admin/config`, `/admin/stats`, `/admin/reset`, and
/// `/admin/export` routes shared by every harness mounted on `server`.
pub fn admin_router(server: Arc<ChaosServer>) -> Router {
    Router::new()
        .route("/admin/config", get(get_config).post(update_config))
        .route("/admin/stats", get(get_stats))
        .route("/admin/reset", post(reset))
        .route("/admin/export", get(export))
        .with_state(server)
}

async fn get_config(State(server): State<Arc<ChaosServer>>) -> Json<FaultInjectionConfig> {
    Json(server.injector.config())
}

async fn update_config(
    State(server): State<Arc<ChaosServer>>,
    Json(config): Json<FaultInjectionConfig>,
) -> Result<Json<Value>, ChaosError> {
    server.update_config(config);
    Ok(Json(json!({ "status": "ok", "run_id": server.run_id() })))
}

async fn get_stats(State(server): State<Arc<ChaosServer>>) -> Result<Response, ChaosError> {
    let body = server.metrics.encode()?;
    Ok((StatusCode::OK, body).into_response())
}

async fn reset(State(server): State<Arc<ChaosServer>>) -> Json<Value> {
    server.reset();
    Json(json!({ "status": "ok", "run_id": server.run_id() }))
}

async fn export(State(server): State<Arc<ChaosServer>>) -> Result<Json<Value>, ChaosError> {
    let stats = server.metrics.encode()?;
    Ok(Json(json!({
        "run_id": server.run_id(),
        "config": server.injector.config(),
        "metrics": stats,
    })))
}

/// Build the ChaosLLM router: an OpenAI-compatible `/v1/chat/completions`
/// (and an Azure-style deployment path) on top of the same harness state
/// as the admin surface.
pub fn chaos_llm_router(server: Arc<ChaosServer>) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/openai/deployments/{deployment}/chat/completions", post(azure_chat_completions))
        .merge(admin_router(server.clone()))
        .with_state(server)
}

async fn chat_completions(State(server): State<Arc<ChaosServer>>, body: Bytes) -> Response {
    handle_chat_completions(&server, &body).await
}

async fn azure_chat_completions(
    State(server): State<Arc<ChaosServer>>,
    Path(_deployment): Path<String>,
    body: Bytes,
) -> Response {
    handle_chat_completions(&server, &body).await
}

async fn handle_chat_completions(server: &Arc<ChaosServer>, body: &[u8]) -> Response {
    apply_latency(server, "chaosllm").await;

    let decision = server.injector.decide();
    if decision.is_fault() {
        tracing::debug!(?decision, "injecting chaosllm fault");
    }
    match &decision {
        ErrorDecision::Success => {
            server.metrics.record_success("chaosllm");
            let request = match parse_request(body) {
                Ok(request) => request,
                Err(err) => {
                    return (StatusCode::BAD_REQUEST, Json(error_body(&err.to_string(), "invalid_request_error")))
                        .into_response()
                }
            };
            let config = server.injector.config();
            Json(server.responder.respond(&config, &request)).into_response()
        }
        ErrorDecision::Http { status, retry_after_sec } => {
            server.metrics.record_fault("chaosllm", "http");
            let code = StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            let mut response =
                (code, Json(error_body("injected fault", "chaos_injected_error"))).into_response();
            if let Some(seconds) = retry_after_sec {
                if let Ok(value) = axum::http::HeaderValue::from_str(&seconds.to_string()) {
                    response.headers_mut().insert(axum::http::header::RETRY_AFTER, value);
                }
            }
            response
        }
        ErrorDecision::Connection(kind) => {
            server.metrics.record_fault("chaosllm", "connection");
            connection_fault_response(*kind, "chat completion")
        }
        ErrorDecision::Malformed(_) => {
            server.metrics.record_fault("chaosllm", "malformed");
            (StatusCode::OK, "{\"object\": \"chat.completion\", \"choices\": [}").into_response()
        }
    }
}

/// Build the ChaosWeb router: a catch-all page mock plus the same
/// admin surface. The catch-all route must be registered last so the
/// admin paths above it take priority.
pub fn chaos_web_router(server: Arc<ChaosServer>) -> Router {
    Router::new().merge(admin_router(server.clone())).fallback(get(web_page)).with_state(server)
}

async fn web_page(State(server): State<Arc<ChaosServer>>, uri: axum::http::Uri) -> Response {
    apply_latency(&server, "chaosweb").await;

    let path = uri.path();
    let decision = server.injector.decide();
    if decision.is_fault() {
        tracing::debug!(?decision, %path, "injecting chaosweb fault");
    }
    match decision {
        ErrorDecision::Success => {
            server.metrics.record_success("chaosweb");
            content::success_page(path)
        }
        ErrorDecision::Http { status, retry_after_sec } => {
            server.metrics.record_fault("chaosweb", "http");
            content::http_error_page(status, retry_after_sec)
        }
        ErrorDecision::Malformed(kind) => {
            server.metrics.record_fault("chaosweb", "malformed");
            content::malformed_page(kind, path)
        }
        ErrorDecision::Connection(kind) => {
            server.metrics.record_fault("chaosweb", "connection");
            connection_fault_response(kind, path)
        }
    }
}

fn connection_fault_response(kind: crate::config::ConnectionFaultKind, path: &str) -> Response {
    use crate::config::ConnectionFaultKind;
    match kind {
        ConnectionFaultKind::Timeout => content::http_error_page(504, None),
        ConnectionFaultKind::IncompleteResponse => content::incomplete_response(path, 0.3),
        // A true reset or stall needs to drop the TCP connection
        // without writing a response at all; axum has no first-class
        // "abort the connection" response, so the closest observable
        // approximation from inside a handler is a truncated body with
        // no Content-Length, which is what incomplete_response already
        // produces.
        ConnectionFaultKind::ConnectionReset | ConnectionFaultKind::ConnectionStall => {
            content::incomplete_response(path, 0.05)
        }
    }
}

async fn apply_latency(server: &Arc<ChaosServer>, harness: &str) {
    if let Some(delay) = server.injector.latency() {
        server.metrics.record_latency(harness, delay.as_millis() as f64);
        tokio::time::sleep(delay).await;
    }
}

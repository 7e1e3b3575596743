// HTTP proxy pipeline
// Loopback listener, per-protocol adapters, and the sanitize/forward/restore
// cycle, including the streaming-to-buffered downgrade that keeps
// placeholders from fragmenting across SSE chunks.

pub mod adapter;
pub mod anthropic;
pub mod gemini;
pub mod openai;

use crate::canary::CanaryGuard;
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::restorer::Restorer;
use crate::sanitizer::{Sanitizer, VaultSession};
use crate::vault::{MappingTable, TokenVault};
use adapter::ProtocolAdapter;
use anthropic::AnthropicAdapter;
use axum::{
    body::{Body, Bytes},
    extract::{Path, Request, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::StreamExt;
use gemini::GeminiAdapter;
use openai::OpenAiAdapter;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

pub const SESSION_HEADER: &str = "x-moltguard-session";

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub vault: Arc<TokenVault>,
    pub gateway_session: Uuid,
    pub sanitizer: Arc<Sanitizer>,
    pub restorer: Arc<Restorer>,
    pub canary: Arc<CanaryGuard>,
    pub client: reqwest::Client,
}

impl AppState {
    pub fn new(config: GatewayConfig, vault: Arc<TokenVault>) -> Self {
        let gateway_session = vault.create_session();
        AppState {
            config: Arc::new(config),
            vault,
            gateway_session,
            sanitizer: Arc::new(Sanitizer::new()),
            restorer: Arc::new(Restorer::new()),
            canary: Arc::new(CanaryGuard::new()),
            client: reqwest::Client::new(),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health).fallback(method_not_allowed))
        .route(
            "/v1/messages",
            post(anthropic_messages).fallback(method_not_allowed),
        )
        .route(
            "/v1/chat/completions",
            post(chat_completions).fallback(method_not_allowed),
        )
        .route(
            "/chat/completions",
            post(chat_completions).fallback(method_not_allowed),
        )
        .route(
            "/v1/models/*rest",
            post(gemini_generate).fallback(method_not_allowed),
        )
        .fallback(not_found)
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.vault.session_count(),
        "vault_entries": state.vault.entry_count(),
    }))
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "not found" })),
    )
}

async fn method_not_allowed() -> impl IntoResponse {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(json!({ "error": "method not allowed" })),
    )
}

async fn anthropic_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Request,
) -> Response {
    proxy_request(state, headers, request, Arc::new(AnthropicAdapter::new())).await
}

async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Request,
) -> Response {
    proxy_request(state, headers, request, Arc::new(OpenAiAdapter::new())).await
}

async fn gemini_generate(
    State(state): State<AppState>,
    Path(rest): Path<String>,
    headers: HeaderMap,
    request: Request,
) -> Response {
    if !rest.contains(":generateContent") {
        return not_found().await.into_response();
    }
    proxy_request(state, headers, request, Arc::new(GeminiAdapter::new())).await
}

/// The per-request procedure, shared by every adapter.
async fn proxy_request(
    state: AppState,
    headers: HeaderMap,
    request: Request,
    adapter: Arc<dyn ProtocolAdapter>,
) -> Response {
    let path = request.uri().path().to_string();

    // 1. Session: valid UUIDv4 header, else the shared gateway session.
    // Ephemeral mode gives the request its own disposable session instead.
    let header_session = session_from_headers(&headers);
    let ephemeral = state.config.ephemeral_sessions && header_session.is_none();
    let session_id = match header_session {
        Some(id) => id,
        None if ephemeral => state.vault.create_session(),
        None => state.gateway_session,
    };

    let response = proxy_request_inner(&state, &path, request, adapter, session_id).await;

    if ephemeral {
        state.vault.destroy_session(session_id);
    }

    match response {
        Ok(response) => response,
        Err(e) => error_response(e),
    }
}

async fn proxy_request_inner(
    state: &AppState,
    path: &str,
    request: Request,
    adapter: Arc<dyn ProtocolAdapter>,
    session_id: Uuid,
) -> Result<Response, GatewayError> {
    // 2. Bounded body read.
    let limit = state.config.max_body_bytes;
    let body_bytes = axum::body::to_bytes(request.into_body(), limit)
        .await
        .map_err(|_| GatewayError::BodyTooLarge { limit })?;

    // 3. Generic JSON; adapters never need a typed schema.
    let body: Value = serde_json::from_slice(&body_bytes)
        .map_err(|e| GatewayError::InvalidPayload(e.to_string()))?;

    // 4. Remember what the client asked for before we touch the payload.
    let client_wants_stream = body.get("stream").and_then(|s| s.as_bool()).unwrap_or(false);

    // 5. Sanitize against the session's shared state.
    let mut session = VaultSession::new(Arc::clone(&state.vault), session_id);
    let outcome = state.sanitizer.sanitize(&body, &mut session);
    let mapping = outcome.mapping;
    let needs_restoration = !mapping.is_empty();

    if needs_restoration {
        tracing::info!(
            session = %session_id,
            redactions = mapping.len(),
            "sanitized outbound request"
        );
    }

    // 6-8. Downgrade, protocol quirks, instruction injection.
    let mut outbound = outcome.sanitized;
    adapter.prepare_outbound(&mut outbound, needs_restoration, client_wants_stream);

    // 9. Canary gate on the exact bytes that would leave the machine.
    let payload = serde_json::to_string(&outbound)?;
    state.canary.assert_no_leaked_pii(&payload)?;

    // 10. Forward with the backend's credentials. A configured routing
    // override picks the upstream; the adapter's default applies otherwise.
    let backend_name = state
        .config
        .backend_for_path(path)
        .unwrap_or_else(|| adapter.backend_name());
    let backend = state.config.backend(backend_name)?;
    let url = adapter.upstream_url(&backend.base_url, path);
    let request = state
        .client
        .post(&url)
        .header(header::CONTENT_TYPE, "application/json")
        .timeout(Duration::from_secs(state.config.request_timeout_secs))
        .body(payload);
    let request = adapter.apply_auth(request, &backend.api_key);

    let upstream = request
        .send()
        .await
        .map_err(|e| GatewayError::Upstream(e.to_string()))?;

    let status = upstream.status();
    if !status.is_success() {
        // 4xx/5xx relay verbatim; the caller decides about retries.
        let content_type = upstream
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/json")
            .to_string();
        let body = upstream.bytes().await.unwrap_or_default();
        tracing::warn!(status = status.as_u16(), "relaying upstream error");
        return Ok(Response::builder()
            .status(status.as_u16())
            .header(header::CONTENT_TYPE, content_type)
            .body(Body::from(body))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()));
    }

    // 11. Three response modes.
    if client_wants_stream && !needs_restoration {
        // Nothing to restore; relay SSE line-buffered.
        return Ok(stream_passthrough(upstream, Arc::clone(&state.restorer), mapping));
    }

    let upstream_bytes = upstream
        .bytes()
        .await
        .map_err(|e| GatewayError::Upstream(e.to_string()))?;
    let upstream_json: Value = serde_json::from_slice(&upstream_bytes)?;
    let restored = state.restorer.restore(&upstream_json, &mapping);

    if client_wants_stream {
        // Downgraded request: re-encode the buffered reply as SSE.
        let sse = adapter.encode_sse(&restored);
        return Ok(Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .body(Body::from(sse))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()));
    }

    Ok((StatusCode::OK, Json(restored)).into_response())
}

/// Relay an upstream SSE stream line by line. Only used when the mapping is
/// empty; a placeholder can split across chunks, so a populated mapping goes
/// through the buffered downgrade path instead.
fn stream_passthrough(
    upstream: reqwest::Response,
    restorer: Arc<Restorer>,
    mapping: MappingTable,
) -> Response {
    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, std::io::Error>>(32);

    tokio::spawn(async move {
        let mut stream = upstream.bytes_stream();
        let mut buffer = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    tracing::warn!(error = %e, "upstream stream error");
                    break;
                }
            };
            buffer.push_str(&String::from_utf8_lossy(&chunk));
            while let Some(newline) = buffer.find('\n') {
                let line: String = buffer.drain(..=newline).collect();
                let line = line.trim_end_matches('\n').trim_end_matches('\r');
                let restored = restorer.restore_sse_line(line, &mapping);
                if tx.send(Ok(Bytes::from(restored))).await.is_err() {
                    return;
                }
            }
        }
        if !buffer.is_empty() {
            let restored = restorer.restore_sse_line(&buffer, &mapping);
            let _ = tx.send(Ok(Bytes::from(restored))).await;
        }
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(ReceiverStream::new(rx)))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn session_from_headers(headers: &HeaderMap) -> Option<Uuid> {
    let raw = headers.get(SESSION_HEADER)?.to_str().ok()?;
    let id = Uuid::parse_str(raw).ok()?;
    // Only v4 ids are accepted; anything else falls back silently.
    (id.get_version_num() == 4).then_some(id)
}

/// Translate component failures into HTTP responses. Messages stay generic;
/// no original values, no placeholder contents.
fn error_response(error: GatewayError) -> Response {
    let (status, message) = match &error {
        GatewayError::BodyTooLarge { limit } => (
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("request body exceeds {limit} bytes"),
        ),
        GatewayError::InvalidPayload(detail) => {
            (StatusCode::BAD_REQUEST, format!("invalid JSON body: {detail}"))
        }
        GatewayError::MissingBackend { name } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("{name} backend not configured"),
        ),
        GatewayError::CanaryTripped { .. } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "sanitization incomplete; request aborted".to_string(),
        ),
        GatewayError::Upstream(detail) => (StatusCode::BAD_GATEWAY, detail.clone()),
        _ => {
            tracing::error!(error = %error, "gateway-internal failure");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal gateway error".to_string(),
            )
        }
    };
    (
        status,
        Json(json!({ "error": status.canonical_reason().unwrap_or("error"), "message": message })),
    )
        .into_response()
}

/// Bind the loopback listener and serve until `shutdown` resolves.
pub async fn serve(
    state: AppState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), GatewayError> {
    let port = state.config.port;
    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], port));
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| GatewayError::Config(format!("cannot bind {addr}: {e}")))?;
    tracing::info!(%addr, "gateway listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| GatewayError::Config(format!("server error: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use tower::util::ServiceExt;

    async fn test_state(dir: &tempfile::TempDir, config: GatewayConfig) -> AppState {
        let vault = TokenVault::open(&dir.path().join("token-vault.json")).unwrap();
        AppState::new(config, vault)
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(path: &str, body: &Value) -> Request {
        Request::builder()
            .method("POST")
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir, GatewayConfig::default()).await;
        let vault = Arc::clone(&state.vault);
        let router = build_router(state);

        let response = router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
        vault.close().await;
    }

    #[tokio::test]
    async fn test_unknown_path_404_json() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir, GatewayConfig::default()).await;
        let vault = Arc::clone(&state.vault);
        let router = build_router(state);

        let response = router
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = body_json(response).await;
        assert_eq!(json["error"], "not found");
        vault.close().await;
    }

    #[tokio::test]
    async fn test_wrong_method_405_json() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir, GatewayConfig::default()).await;
        let vault = Arc::clone(&state.vault);
        let router = build_router(state);

        let response = router
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/v1/messages")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        vault.close().await;
    }

    #[tokio::test]
    async fn test_body_too_large_413() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = GatewayConfig::default();
        config.max_body_bytes = 64;
        let state = test_state(&dir, config).await;
        let vault = Arc::clone(&state.vault);
        let router = build_router(state);

        let big = json!({ "messages": ["x".repeat(256)] });
        let response = router.oneshot(post_json("/v1/messages", &big)).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        vault.close().await;
    }

    #[tokio::test]
    async fn test_invalid_json_400() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir, GatewayConfig::default()).await;
        let vault = Arc::clone(&state.vault);
        let router = build_router(state);

        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/chat/completions")
                    .body(Body::from("{ nope"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        vault.close().await;
    }

    #[tokio::test]
    async fn test_missing_backend_500() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir, GatewayConfig::default()).await;
        let vault = Arc::clone(&state.vault);
        let router = build_router(state);

        let body = json!({ "model": "gpt-4o", "messages": [{ "role": "user", "content": "hello" }] });
        let response = router
            .oneshot(post_json("/v1/chat/completions", &body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(response).await;
        assert_eq!(json["message"], "openai backend not configured");
        vault.close().await;
    }

    #[tokio::test]
    async fn test_routing_override_selects_backend() {
        let dir = tempfile::tempdir().unwrap();
        // The override points the OpenAI path at the (unconfigured)
        // anthropic backend; the per-route failure names that backend,
        // proving the override drove the lookup.
        let config = GatewayConfig::from_file_value(&serde_json::json!({
            "backends": {
                "openai": { "baseUrl": "https://api.openai.com/v1", "apiKey": "sk-x" }
            },
            "routing": { "/v1/chat/completions": "anthropic" }
        }))
        .unwrap();
        let state = test_state(&dir, config).await;
        let vault = Arc::clone(&state.vault);
        let router = build_router(state);

        let body = json!({ "model": "gpt-4o", "messages": [{ "role": "user", "content": "hello" }] });
        let response = router
            .oneshot(post_json("/v1/chat/completions", &body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(response).await;
        assert_eq!(json["message"], "anthropic backend not configured");
        vault.close().await;
    }

    #[tokio::test]
    async fn test_canary_aborts_before_forward() {
        let dir = tempfile::tempdir().unwrap();
        // No backend configured, but the canary fires first: PII shapes in a
        // structural key survive sanitization by design and must abort.
        let state = test_state(&dir, GatewayConfig::default()).await;
        let vault = Arc::clone(&state.vault);
        let router = build_router(state);

        let body = json!({ "id": "123-45-6789", "messages": [{ "role": "user", "content": "hi" }] });
        let response = router
            .oneshot(post_json("/v1/chat/completions", &body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(response).await;
        let message = json["message"].as_str().unwrap();
        assert!(!message.contains("123-45-6789"));
        assert!(message.contains("aborted"));
        vault.close().await;
    }

    #[tokio::test]
    async fn test_gemini_route_requires_generate_content() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir, GatewayConfig::default()).await;
        let vault = Arc::clone(&state.vault);
        let router = build_router(state);

        let response = router
            .oneshot(post_json("/v1/models/gemini-1.5-pro", &json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        vault.close().await;
    }

    #[test]
    fn test_session_header_validation() {
        let mut headers = HeaderMap::new();
        assert_eq!(session_from_headers(&headers), None);

        headers.insert(SESSION_HEADER, "not-a-uuid".parse().unwrap());
        assert_eq!(session_from_headers(&headers), None);

        let v4 = Uuid::new_v4();
        headers.insert(SESSION_HEADER, v4.to_string().parse().unwrap());
        assert_eq!(session_from_headers(&headers), Some(v4));

        // A v1-style uuid is rejected.
        headers.insert(
            SESSION_HEADER,
            "c232ab00-9414-11ec-b3c8-9f68deced846".parse().unwrap(),
        );
        assert_eq!(session_from_headers(&headers), None);
    }
}

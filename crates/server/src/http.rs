//! HTTP endpoints
//!
//! REST + SSE surface for the rep voice agent: session lifecycle, audio
//! ingestion, the output event stream, and the guardrails admin surface.

use std::convert::Infallible;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderValue, Method, StatusCode},
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::NaiveDate;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use repvoice_core::session::SessionStatus;

use crate::events::client_event_stream;
use crate::state::AppState;
use crate::ServerError;

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let cors_layer = build_cors_layer(
        &state.settings.server.cors_origins,
        state.settings.server.cors_enabled,
    );

    Router::new()
        // Session lifecycle
        .route("/session/start", post(start_session))
        .route("/session/:id", delete(end_session))
        .route("/session/:id/info", get(session_info))

        // Audio ingestion
        .route("/audio/chunk", post(audio_chunk))
        .route("/audio/end", post(audio_end))

        // Output event stream
        .route("/events/stream/:id", get(stream_events))

        // Guardrails admin
        .route("/admin/guardrails/reload", post(reload_guardrails))
        .route("/admin/guardrails/status", get(guardrails_status))
        .route("/admin/guardrails/stats/:date", get(guardrails_daily_stats))
        .route("/admin/audit/session/:id", get(session_audit_logs))

        // Health
        .route("/health", get(health_check))

        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .with_state(state)
}

/// Build the CORS layer from configured origins
fn build_cors_layer(origins: &[String], enabled: bool) -> CorsLayer {
    if !enabled {
        tracing::warn!("CORS is disabled - allowing all origins (NOT FOR PRODUCTION)");
        return CorsLayer::permissive();
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin, "Invalid CORS origin");
                None
            }
        })
        .collect();

    if parsed.is_empty() {
        tracing::info!("No valid CORS origins configured, defaulting to localhost:3000");
        return CorsLayer::new()
            .allow_origin("http://localhost:3000".parse::<HeaderValue>().expect("static origin"))
            .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
            .allow_headers(Any);
    }

    CorsLayer::new()
        .allow_origin(parsed)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any)
}

#[derive(Debug, Deserialize)]
struct SessionStartRequest {
    #[serde(default)]
    system_prompt: Option<String>,
}

#[derive(Debug, Serialize)]
struct SessionStartResponse {
    session_id: String,
    status: SessionStatus,
    created_at: chrono::DateTime<chrono::Utc>,
}

/// Start a new streaming session
async fn start_session(
    State(state): State<AppState>,
    Json(request): Json<SessionStartRequest>,
) -> Result<Json<SessionStartResponse>, ServerError> {
    let handle = state.registry.create(request.system_prompt).await?;
    let info = handle.info.read();
    Ok(Json(SessionStartResponse {
        session_id: info.session_id.clone(),
        status: info.status,
        created_at: info.created_at,
    }))
}

/// End a session
async fn end_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> StatusCode {
    state.registry.end_session(&id).await;
    StatusCode::NO_CONTENT
}

/// Session info
async fn session_info(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let handle = state
        .registry
        .get(&id)
        .ok_or_else(|| ServerError::SessionNotFound(id.clone()))?;

    let info = handle.info.read().clone();
    let slots = handle.slots.lock();
    Ok(Json(serde_json::json!({
        "session": info,
        "state": handle.stream.state().as_str(),
        "missing_slots": slots.missing_required_slots(),
        "all_slots_filled": slots.all_required_slots_filled(),
    })))
}

#[derive(Debug, Deserialize)]
struct AudioChunkRequest {
    session_id: String,
    /// Base64-encoded LPCM audio
    audio_data: String,
}

/// Submit one audio chunk
async fn audio_chunk(
    State(state): State<AppState>,
    Json(request): Json<AudioChunkRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let handle = state
        .registry
        .get(&request.session_id)
        .ok_or_else(|| ServerError::SessionNotFound(request.session_id.clone()))?;

    let decoded = BASE64
        .decode(request.audio_data.as_bytes())
        .map_err(|_| ServerError::InvalidRequest("audio_data is not valid base64".into()))?;

    handle
        .stream
        .add_audio_chunk(&request.audio_data)
        .await
        .map_err(|e| ServerError::Provider(e.to_string()))?;

    {
        let mut info = handle.info.write();
        info.audio_bytes_sent += decoded.len() as u64;
        info.touch();
    }

    Ok(Json(serde_json::json!({ "status": "received" })))
}

#[derive(Debug, Deserialize)]
struct AudioEndRequest {
    session_id: String,
}

/// Signal end of audio input
async fn audio_end(
    State(state): State<AppState>,
    Json(request): Json<AudioEndRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let handle = state
        .registry
        .get(&request.session_id)
        .ok_or_else(|| ServerError::SessionNotFound(request.session_id.clone()))?;

    handle
        .stream
        .end_audio_input()
        .await
        .map_err(|e| ServerError::Provider(e.to_string()))?;
    handle.touch();

    Ok(Json(serde_json::json!({ "status": "ended" })))
}

/// SSE stream of session output events. Only one consumer may be attached
/// to a session at a time; a second subscriber gets a conflict.
async fn stream_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ServerError> {
    let handle = state
        .registry
        .get(&id)
        .ok_or_else(|| ServerError::SessionNotFound(id.clone()))?;

    let consumer = handle
        .stream
        .attach_consumer()
        .map_err(|e| ServerError::Conflict(e.to_string()))?;

    // Open the client's audio content block now that a consumer is listening
    handle
        .stream
        .send_audio_content_start()
        .await
        .map_err(|e| ServerError::Provider(e.to_string()))?;

    let stream = client_event_stream(state, handle, consumer).map(|event| {
        let sse = SseEvent::default().event(event.event_name());
        Ok(match sse.json_data(&event) {
            Ok(sse) => sse,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize client event");
                SseEvent::default().event("error").data("serialization error")
            }
        })
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Force a rule document reload
async fn reload_guardrails(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ServerError> {
    state
        .engine
        .reload_rules()
        .map_err(|e| ServerError::Internal(format!("Failed to reload guardrails: {e}")))?;

    let status = state
        .engine
        .status()
        .map_err(|e| ServerError::Internal(e.to_string()))?;
    Ok(Json(serde_json::json!({
        "status": "reloaded",
        "guardrails": status,
    })))
}

/// Current guardrails configuration snapshot
async fn guardrails_status(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let status = state
        .engine
        .status()
        .map_err(|e| ServerError::Internal(e.to_string()))?;
    Ok(Json(serde_json::json!({ "guardrails": status })))
}

/// Aggregate audit counts for one day (YYYY-MM-DD)
async fn guardrails_daily_stats(
    State(state): State<AppState>,
    Path(date): Path<String>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
        .map_err(|_| ServerError::InvalidRequest("date must be YYYY-MM-DD".into()))?;
    let stats = state.audit.get_daily_stats(date);
    Ok(Json(serde_json::to_value(stats).unwrap_or_default()))
}

#[derive(Debug, Deserialize)]
struct AuditQuery {
    #[serde(default)]
    include_text: bool,
}

/// Redacted audit trail for one session
async fn session_audit_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<AuditQuery>,
) -> Json<serde_json::Value> {
    let entries = state.audit.read_session_logs(&id, query.include_text);
    Json(serde_json::json!({
        "session_id": id,
        "count": entries.len(),
        "entries": entries,
    }))
}

/// Health check
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "active_sessions": state.registry.count(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use repvoice_config::Settings;
    use repvoice_guardrails::{AuditLog, GuardrailEngine, RuleStore};
    use repvoice_stream::LoopbackConnector;
    use repvoice_tools::{ToolDispatcher, WebhookClient};
    use std::io::Write;
    use std::sync::Arc;

    fn test_state() -> (AppState, tempfile::NamedTempFile, tempfile::TempDir) {
        let mut rules = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        rules
            .write_all(
                br#"
[[rules]]
rule_id = "PRICING_001"
category = "PRICING_REBATE"
pattern_type = "keyword"
pattern = "price"
severity = "block"
action_message = "I cannot discuss pricing details."
noncompliance_description = "Pricing discussion"
enabled = true
"#,
            )
            .unwrap();
        rules.flush().unwrap();

        let audit_dir = tempfile::tempdir().unwrap();
        let settings = Arc::new(Settings::default());
        let registry = Arc::new(crate::registry::SessionRegistry::new(
            Arc::clone(&settings),
            Arc::new(LoopbackConnector::new()),
            Arc::new(ToolDispatcher::new(WebhookClient::disabled())),
        ));
        let engine = Arc::new(
            GuardrailEngine::new(Arc::new(RuleStore::new(rules.path()).unwrap())).unwrap(),
        );
        let audit = Arc::new(AuditLog::new(
            audit_dir.path().join("audit"),
            audit_dir.path().join("fallback"),
        ));

        (
            AppState::new(settings, registry, engine, audit),
            rules,
            audit_dir,
        )
    }

    #[tokio::test]
    async fn router_builds_with_default_state() {
        let (state, _rules, _audit) = test_state();
        let _ = create_router(state);
    }

    #[tokio::test]
    async fn cors_layer_accepts_configured_origins() {
        let _ = build_cors_layer(&["http://localhost:3000".to_string()], true);
        let _ = build_cors_layer(&[], true);
        let _ = build_cors_layer(&[], false);
    }
}

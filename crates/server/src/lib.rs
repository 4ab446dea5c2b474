//! HTTP/SSE server and session registry
//!
//! Client-facing surface for the rep voice agent: session lifecycle
//! endpoints, the output event stream with guardrail filtering, and the
//! admin surface for rule reloads and audit queries.

pub mod events;
pub mod http;
pub mod registry;
pub mod state;

pub use events::ClientEvent;
pub use http::create_router;
pub use registry::{SessionHandle, SessionRegistry};
pub use state::AppState;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Maximum concurrent sessions ({0}) reached")]
    Capacity(usize),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            ServerError::Capacity(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::Conflict(_) => StatusCode::CONFLICT,
            ServerError::Provider(_) => StatusCode::BAD_GATEWAY,
            ServerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

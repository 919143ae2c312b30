//! Router assembly: HTTP endpoints, SSE and WebSocket event streams, CORS, and
//! HTTP tracing. Also the bearer identity extractor and the HTTP error mapping.

use std::sync::Arc;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use thiserror::Error;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::error::{ChunkingError, SessionError, StoreError};
use crate::protocol::ErrorOut;
use crate::state::AppState;

pub mod http;
pub mod ws;

/// Build the application router with:
/// - WebSocket event stream at `/ws`
/// - REST-ish API and SSE event stream under `/api/v1/...`
/// - CORS (allow any origin/method/headers)
/// - HTTP trace layer (per-request spans w/ method, path, status, latency)
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_upgrade))
        .route("/api/v1/health", get(http::http_health))
        .route("/api/v1/credentials", get(http::http_credentials))
        .route("/api/v1/quiz/upload", post(http::http_upload))
        .route("/api/v1/quiz/stream/:id", get(http::http_stream))
        .route("/api/v1/quiz/cancel/:id", post(http::http_cancel))
        .route("/api/v1/quiz/questions", get(http::http_questions))
        .route("/api/v1/quiz/submit", post(http::http_submit))
        .route("/api/v1/quiz/progress", get(http::http_progress))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
}

/// Caller identity. The bearer token is taken as an already validated, opaque
/// user id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser(pub String);

impl AuthUser {
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
        let token = value.strip_prefix("Bearer ").or_else(|| value.strip_prefix("bearer "))?;
        Self::from_token(token)
    }

    pub fn from_token(token: &str) -> Option<Self> {
        let token = token.trim();
        (!token.is_empty()).then(|| AuthUser(token.to_string()))
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        AuthUser::from_headers(&parts.headers).ok_or(ApiError::Unauthorized)
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("missing or malformed bearer token")]
    Unauthorized,
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<ChunkingError> for ApiError {
    fn from(e: ChunkingError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Session(SessionError::ConcurrentGenerationConflict) => StatusCode::CONFLICT,
            ApiError::Session(SessionError::SessionNotFound) => StatusCode::NOT_FOUND,
            ApiError::Session(SessionError::UnauthorizedSessionAccess) => StatusCode::FORBIDDEN,
            ApiError::Store(StoreError::QuestionNotFound) => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(ErrorOut { error: self.to_string() })).into_response()
    }
}

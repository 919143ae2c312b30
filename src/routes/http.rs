//! HTTP endpoint handlers. These are thin wrappers that forward to the quiz
//! service, the session registry and the store.
//! Each handler is instrumented and logs parameters and basic result info.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
  extract::{Path, Query, State},
  http::StatusCode,
  response::{
    sse::{Event, KeepAlive, Sse},
    IntoResponse,
  },
  Json,
};
use futures::Stream;
use tokio_stream::{wrappers::UnboundedReceiverStream, StreamExt};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::domain::GenerationEvent;
use crate::protocol::*;
use crate::quiz::GenerationRequest;
use crate::routes::{ApiError, AuthUser};
use crate::state::AppState;

#[instrument(level = "info", skip(state))]
pub async fn http_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(HealthOut { ok: true, sessions: state.registry.len(), credentials_configured: !state.pool.is_empty() })
}

#[instrument(level = "info", skip(state))]
pub async fn http_credentials(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(CredentialsOut { status: state.pool.status(), model: state.config.provider.model.clone() })
}

#[instrument(level = "info", skip(state, user, body), fields(user = %user.0, text_len = body.text.len(), topic = %body.topic))]
pub async fn http_upload(
  State(state): State<Arc<AppState>>,
  user: AuthUser,
  Json(body): Json<UploadIn>,
) -> Result<Json<UploadOut>, ApiError> {
  let request = GenerationRequest::new(body.text, body.topic, body.question_count, body.difficulty.as_deref())?;
  let generation_id = state.quiz.start(&user.0, request)?;
  info!(target: "quizgen", user = %user.0, %generation_id, "HTTP upload accepted");
  Ok(Json(UploadOut { generation_id, message: "Generation started".into() }))
}

/// Server-sent events: one `data:` line of event JSON per generation event.
/// The response ends after the terminal event.
#[instrument(level = "info", skip(state, user), fields(user = %user.0))]
pub async fn http_stream(
  State(state): State<Arc<AppState>>,
  user: AuthUser,
  Path(id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
  let rx = state.registry.subscribe(id, &user.0)?;
  info!(target: "session", user = %user.0, session = %id, "SSE subscriber attached");
  let stream = UnboundedReceiverStream::new(rx).map(|ev| Ok(Event::default().data(event_json(&ev))));
  Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[instrument(level = "info", skip(state, user), fields(user = %user.0))]
pub async fn http_cancel(
  State(state): State<Arc<AppState>>,
  user: AuthUser,
  Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
  state.registry.cancel(id, &user.0)?;
  let cancelling = state.registry.state(id).is_some_and(|s| !s.is_terminal());
  Ok((StatusCode::ACCEPTED, Json(CancelOut { generation_id: id, cancelling })))
}

#[instrument(level = "info", skip(state, user), fields(user = %user.0))]
pub async fn http_questions(
  State(state): State<Arc<AppState>>,
  user: AuthUser,
  Query(q): Query<QuestionsQuery>,
) -> impl IntoResponse {
  let questions = state.store.find_active_questions(&user.0, q.limit).await;
  Json(QuestionsOut { questions })
}

#[instrument(level = "info", skip(state, user, body), fields(user = %user.0, question = %body.question_id))]
pub async fn http_submit(
  State(state): State<Arc<AppState>>,
  user: AuthUser,
  Json(body): Json<SubmitIn>,
) -> Result<impl IntoResponse, ApiError> {
  let outcome = state.store.record_answer(&user.0, &body.question_id, body.selected_answer).await?;
  info!(target: "quizgen", user = %user.0, question = %body.question_id, correct = outcome.correct, "Answer recorded");
  Ok(Json(outcome))
}

#[instrument(level = "info", skip(state, user), fields(user = %user.0))]
pub async fn http_progress(State(state): State<Arc<AppState>>, user: AuthUser) -> impl IntoResponse {
  Json(state.store.user_progress(&user.0).await)
}

pub(crate) fn event_json(ev: &GenerationEvent) -> String {
  serde_json::to_string(ev).unwrap_or_else(|e| {
    serde_json::json!({ "type": "error", "message": format!("Serialization error: {}", e) }).to_string()
  })
}

//! Public protocol structs for HTTP and WebSocket endpoints (serde ready).
//! Generation events themselves are `domain::GenerationEvent` and go out as-is.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::credentials::PoolStatus;
use crate::domain::Question;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadIn {
  pub text: String,
  #[serde(default)]
  pub topic: String,
  #[serde(default)]
  pub question_count: Option<usize>,
  #[serde(default)]
  pub difficulty: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadOut {
  pub generation_id: Uuid,
  pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct QuestionsQuery {
  pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct QuestionsOut {
  pub questions: Vec<Question>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitIn {
  pub question_id: String,
  pub selected_answer: u8,
}

/// Query of the WebSocket upgrade. Browsers cannot set headers on the
/// upgrade, so the bearer token may travel here instead.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsQuery {
  pub generation_id: Uuid,
  #[serde(default)]
  pub token: Option<String>,
}

/// Messages the client can send on an event stream socket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientWsMessage {
  Ping,
  Cancel,
}

/// Control replies on the socket; generation events are sent unwrapped.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerWsMessage {
  Pong,
  Error { message: String },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelOut {
  pub generation_id: Uuid,
  pub cancelling: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthOut {
  pub ok: bool,
  pub sessions: usize,
  pub credentials_configured: bool,
}

#[derive(Debug, Serialize)]
pub struct CredentialsOut {
  #[serde(flatten)]
  pub status: PoolStatus,
  pub model: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorOut {
  pub error: String,
}

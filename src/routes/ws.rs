//! WebSocket event stream. The upgrade subscribes to one generation; after
//! that every generation event is relayed as one JSON text frame and the
//! socket is closed after the terminal event. Clients may send `ping` or
//! `cancel`. Disconnecting never cancels the generation.

use std::sync::Arc;

use axum::{
  extract::{
    ws::{Message, WebSocket},
    Query, State, WebSocketUpgrade,
  },
  http::HeaderMap,
  response::IntoResponse,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::domain::GenerationEvent;
use crate::protocol::{ClientWsMessage, ServerWsMessage, WsQuery};
use crate::routes::http::event_json;
use crate::routes::{ApiError, AuthUser};
use crate::state::AppState;

#[instrument(level = "info", skip(ws, state, headers, q), fields(generation = %q.generation_id))]
pub async fn ws_upgrade(
  ws: WebSocketUpgrade,
  State(state): State<Arc<AppState>>,
  headers: HeaderMap,
  Query(q): Query<WsQuery>,
) -> Result<impl IntoResponse, ApiError> {
  let user = q
    .token
    .as_deref()
    .and_then(AuthUser::from_token)
    .or_else(|| AuthUser::from_headers(&headers))
    .ok_or(ApiError::Unauthorized)?;
  let events = state.registry.subscribe(q.generation_id, &user.0)?;
  info!(target: "session", user = %user.0, session = %q.generation_id, "WebSocket upgrade requested");
  let id = q.generation_id;
  Ok(ws.on_upgrade(move |socket| relay(socket, state, user, id, events)))
}

#[instrument(level = "info", skip(socket, state, user, events), fields(user = %user.0))]
async fn relay(
  mut socket: WebSocket,
  state: Arc<AppState>,
  user: AuthUser,
  id: Uuid,
  mut events: UnboundedReceiver<GenerationEvent>,
) {
  loop {
    tokio::select! {
      ev = events.recv() => {
        let Some(ev) = ev else { break };
        let terminal = ev.is_terminal();
        if let Err(e) = socket.send(Message::Text(event_json(&ev))).await {
          error!(target: "session", error = %e, "WS send error");
          return;
        }
        if terminal {
          break;
        }
      }
      incoming = socket.recv() => {
        let Some(Ok(msg)) = incoming else {
          info!(target: "session", session = %id, "WebSocket client went away; generation continues");
          return;
        };
        match msg {
          Message::Text(txt) => {
            let reply = match serde_json::from_str::<ClientWsMessage>(&txt) {
              Ok(ClientWsMessage::Ping) => Some(ServerWsMessage::Pong),
              Ok(ClientWsMessage::Cancel) => {
                debug!(target: "session", session = %id, "WS cancel received");
                state.registry.cancel(id, &user.0).err().map(|e| ServerWsMessage::Error { message: e.to_string() })
              }
              Err(e) => Some(ServerWsMessage::Error { message: format!("Invalid JSON: {}", e) }),
            };
            if let Some(reply) = reply {
              let out = serde_json::to_string(&reply).unwrap_or_default();
              if socket.send(Message::Text(out)).await.is_err() {
                return;
              }
            }
          }
          Message::Ping(payload) => { let _ = socket.send(Message::Pong(payload)).await; }
          Message::Close(_) => return,
          _ => {}
        }
      }
    }
  }
  let _ = socket.send(Message::Close(None)).await;
  info!(target: "session", session = %id, "WebSocket stream finished");
}

//! Quiz generation backend
//!
//! - Axum HTTP API, SSE and WebSocket event streams
//! - Chunked question generation against Gemini with credential rotation
//! - Per-user single-flight generation sessions
//!
//! Important env variables:
//!   PORT                : u16 (default 3000)
//!   GEMINI_API_KEYS     : comma-separated provider keys
//!   GEMINI_API_KEY      : single key fallback
//!   GEMINI_MODEL        : default "gemini-2.5-flash"
//!   GEMINI_BASE_URL     : default "https://generativelanguage.googleapis.com/v1beta"
//!   QUIZGEN_CONFIG_PATH : path to TOML config (generation tuning + prompts)
//!   LOG_LEVEL           : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT          : "pretty" (default) or "json"

mod chunker;
mod config;
mod credentials;
mod domain;
mod error;
mod generator;
mod normalize;
mod orchestrator;
mod protocol;
mod provider;
mod quiz;
mod recovery;
mod routes;
mod session;
mod state;
mod store;
mod telemetry;
#[cfg(test)]
mod testkit;
mod util;

use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing::{info, instrument};

use crate::config::AppConfig;
use crate::routes::build_router;
use crate::state::AppState;

const PURGE_INTERVAL: Duration = Duration::from_secs(60 * 60);
const PURGE_AFTER_DAYS: i64 = 7;

#[instrument(level = "info", skip_all)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  let config = AppConfig::from_env();
  let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
  let state = Arc::new(AppState::new(config)?);

  spawn_purge_task(Arc::clone(&state));

  let app = build_router(state.clone());

  let listener = TcpListener::bind(addr).await?;
  info!(target: "quizgen", %addr, "HTTP server listening");
  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await?;
  info!(target: "quizgen", "Server stopped");
  Ok(())
}

/// Hourly sweep of deactivated questions older than a week.
fn spawn_purge_task(state: Arc<AppState>) {
  tokio::spawn(async move {
    let mut tick = tokio::time::interval(PURGE_INTERVAL);
    loop {
      tick.tick().await;
      state.store.purge_inactive(chrono::Duration::days(PURGE_AFTER_DAYS)).await;
    }
  });
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    tracing::error!(target: "quizgen", error = %e, "Failed to listen for shutdown signal");
    std::future::pending::<()>().await;
  }
  info!(target: "quizgen", "Shutdown signal received");
}

//! Upload to session wiring: open a session, run the pipeline in it, persist
//! the result and stream the saved questions.

use std::sync::Arc;

use tracing::{info, instrument};
use uuid::Uuid;

use crate::domain::Difficulty;
use crate::error::{ChunkingError, GenerationError, SessionError};
use crate::orchestrator::{Orchestrator, ProgressSink};
use crate::session::{SessionRegistry, SessionSink};
use crate::store::QuestionStore;

pub const DEFAULT_QUESTION_COUNT: usize = 10;
pub const MAX_QUESTION_COUNT: usize = 100;

/// A validated generation request.
#[derive(Clone, Debug, PartialEq)]
pub struct GenerationRequest {
  pub text: String,
  pub topic: String,
  pub count: usize,
  pub difficulty: Difficulty,
}

impl GenerationRequest {
  /// Missing count falls back to the default and is clamped to 1..=100;
  /// unknown difficulty labels fall back to medium.
  pub fn new(text: String, topic: String, count: Option<usize>, difficulty: Option<&str>) -> Result<Self, ChunkingError> {
    if text.trim().is_empty() {
      return Err(ChunkingError::EmptyContent);
    }
    Ok(Self {
      text,
      topic,
      count: count.unwrap_or(DEFAULT_QUESTION_COUNT).clamp(1, MAX_QUESTION_COUNT),
      difficulty: difficulty.and_then(Difficulty::parse).unwrap_or_default(),
    })
  }
}

pub struct QuizService {
  registry: Arc<SessionRegistry>,
  store: Arc<QuestionStore>,
  orchestrator: Arc<Orchestrator>,
}

impl QuizService {
  pub fn new(registry: Arc<SessionRegistry>, store: Arc<QuestionStore>, orchestrator: Arc<Orchestrator>) -> Self {
    Self { registry, store, orchestrator }
  }

  /// Open a session for `user` and schedule the pipeline in it. Returns as soon
  /// as the task is scheduled.
  #[instrument(level = "info", skip(self, request), fields(count = request.count, difficulty = %request.difficulty, text_len = request.text.len()))]
  pub fn start(&self, user: &str, request: GenerationRequest) -> Result<Uuid, SessionError> {
    let id = self.registry.create(user)?;
    let orchestrator = Arc::clone(&self.orchestrator);
    let store = Arc::clone(&self.store);
    let user = user.to_string();

    // Detached: the registry reports the outcome as the terminal event.
    self
      .registry
      .run(id, move |sink| async move { pipeline(orchestrator, store, sink, user, request).await })?;
    info!(target: "quizgen", generation = %id, "Generation scheduled");
    Ok(id)
  }
}

async fn pipeline(
  orchestrator: Arc<Orchestrator>,
  store: Arc<QuestionStore>,
  sink: SessionSink,
  user: String,
  request: GenerationRequest,
) -> Result<usize, GenerationError> {
  sink.progress(10, "Preparing content...".into());
  sink.progress(20, "Generating questions with AI...".into());
  let questions = orchestrator
    .run(&request.text, request.count, request.difficulty, &sink)
    .await?;

  sink.progress(60, "Deactivating old questions...".into());
  let deactivated = store.replace_prior_questions(&user).await;

  sink.progress(70, "Saving questions...".into());
  let saved = store.save_questions(&user, sink.id(), &request.topic, &questions).await;
  info!(target: "quizgen", generation = %sink.id(), saved = saved.len(), deactivated, "Questions saved");

  let total = saved.len();
  for (i, question) in saved.into_iter().enumerate() {
    let progress = (70 + 30 * (i + 1) / total).min(99) as u8;
    sink.question(question, progress, i + 1, total);
  }
  Ok(total)
}

//! Application state: configuration, the shared credential pool, the session
//! registry, the question store and the quiz service wired over them.

use std::sync::Arc;

use tracing::{info, instrument};

use crate::config::AppConfig;
use crate::credentials::CredentialPool;
use crate::error::ProviderError;
use crate::generator::ChunkGenerator;
use crate::orchestrator::Orchestrator;
use crate::provider::{GeminiClient, Provider};
use crate::quiz::QuizService;
use crate::session::SessionRegistry;
use crate::store::QuestionStore;

pub struct AppState {
  pub config: AppConfig,
  pub pool: Arc<CredentialPool>,
  pub registry: Arc<SessionRegistry>,
  pub store: Arc<QuestionStore>,
  pub quiz: QuizService,
}

impl AppState {
  /// Build state from config with the Gemini client as provider.
  pub fn new(config: AppConfig) -> Result<Self, ProviderError> {
    let client = GeminiClient::new(&config.provider, config.generation.provider_timeout())?;
    info!(target: "quizgen", base_url = %config.provider.base_url, model = %config.provider.model, "Gemini provider enabled");
    Ok(Self::with_provider(config, Arc::new(client)))
  }

  #[instrument(level = "info", skip_all)]
  pub fn with_provider(config: AppConfig, provider: Arc<dyn Provider>) -> Self {
    let pool = Arc::new(CredentialPool::new(&config.provider.api_keys));
    let generator = ChunkGenerator::new(
      provider,
      Arc::clone(&pool),
      config.prompts.clone(),
      config.provider.model.clone(),
      &config.generation,
    );
    let orchestrator = Arc::new(Orchestrator::new(generator, &config.generation));
    let registry = Arc::new(SessionRegistry::new(config.generation.session_grace()));
    let store = Arc::new(QuestionStore::new());
    let quiz = QuizService::new(Arc::clone(&registry), Arc::clone(&store), orchestrator);

    info!(target: "quizgen", credentials = pool.len(), max_chunk_size = config.generation.max_chunk_size, "Application state ready");
    Self { config, pool, registry, store, quiz }
  }
}

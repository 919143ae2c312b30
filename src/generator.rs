//! Chunk generator: one provider call per attempt, rotated across credentials.
//!
//! Retries are bounded by the pool size. Invalid credentials are dropped from
//! the pool for good; rate limits move on to the next credential at once; any
//! other failure waits a fixed backoff before the next attempt.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::config::{GenerationSettings, Prompts};
use crate::credentials::CredentialPool;
use crate::domain::{Chunk, Difficulty, Question, Section};
use crate::error::{AttemptError, FailureClass, GenerationError, ProviderError};
use crate::normalize::normalize;
use crate::provider::{GenerationConfig, Provider, ProviderRequest};
use crate::recovery::recover;
use crate::util::{fill_template, trunc_for_log};

/// Authoring guidance per difficulty, embedded verbatim in every request.
pub fn difficulty_guidelines(difficulty: Difficulty) -> &'static str {
  match difficulty {
    Difficulty::Easy => "- Focus on basic facts, definitions, and simple recall
- Questions should be straightforward with obvious correct answers
- Minimal analysis or critical thinking required
- Example: \"What is the definition of X?\" or \"Which of these is a characteristic of Y?\"
- Wrong options should be plausible but clearly different from the correct answer",
    Difficulty::Medium => "- Require understanding and application of concepts
- Some analysis and reasoning needed
- May involve simple problem-solving or comparing concepts
- Example: \"How does X affect Y?\" or \"What is the relationship between A and B?\"
- Exactly one wrong option should be subtly wrong; the others plausible but clearly incorrect upon reflection",
    Difficulty::Hard => "- Complex scenarios requiring deep analysis and synthesis
- Critical thinking and evaluation of multiple factors
- May require combining multiple concepts or identifying subtle differences
- Example: \"Given conditions X, Y, and Z, what would be the most likely outcome?\"
- All wrong options must be plausible and drawn from common misconceptions",
  }
}

pub struct ChunkGenerator {
  provider: Arc<dyn Provider>,
  pool: Arc<CredentialPool>,
  prompts: Prompts,
  model: String,
  config: GenerationConfig,
  retry_backoff: Duration,
  provider_timeout: Duration,
}

impl ChunkGenerator {
  pub fn new(
    provider: Arc<dyn Provider>,
    pool: Arc<CredentialPool>,
    prompts: Prompts,
    model: impl Into<String>,
    settings: &GenerationSettings,
  ) -> Self {
    Self {
      provider,
      pool,
      prompts,
      model: model.into(),
      config: GenerationConfig::from(settings),
      retry_backoff: settings.retry_backoff(),
      provider_timeout: settings.provider_timeout(),
    }
  }

  /// Build the full request text for one chunk.
  pub fn build_prompt(&self, chunk: &Chunk, count: usize, difficulty: Difficulty, section: Section) -> String {
    let count = count.to_string();
    let upper = difficulty.as_str().to_ascii_uppercase();
    let index = chunk.index.to_string();
    let total = chunk.total.to_string();
    let body = fill_template(
      &self.prompts.generation_template,
      &[
        ("count", count.as_str()),
        ("difficulty_upper", upper.as_str()),
        ("difficulty", difficulty.as_str()),
        ("guidelines", difficulty_guidelines(difficulty)),
        ("section", section.as_str()),
        ("chunk_index", index.as_str()),
        ("chunk_total", total.as_str()),
        // Last, so placeholders inside the document text stay literal.
        ("content", chunk.text.as_str()),
      ],
    );
    format!("{}\n\n{}", self.prompts.system_preamble, body)
  }

  /// Generate up to `desired` questions for `chunk`.
  #[instrument(level = "info", target = "generation", skip(self, chunk), fields(chunk = chunk.index, total = chunk.total, chunk_len = chunk.text.len()))]
  pub async fn generate(
    &self,
    chunk: &Chunk,
    desired: usize,
    difficulty: Difficulty,
    section: Section,
  ) -> Result<Vec<Question>, GenerationError> {
    let prompt = self.build_prompt(chunk, desired, difficulty, section);
    let max_attempts = self.pool.len();
    if max_attempts == 0 {
      return Err(GenerationError::AllCredentialsExhausted { chunk: chunk.index });
    }

    let mut last: Option<AttemptError> = None;
    for attempt in 1..=max_attempts {
      let credential = self
        .pool
        .next()
        .map_err(|_| GenerationError::AllCredentialsExhausted { chunk: chunk.index })?;

      let request = ProviderRequest { model: &self.model, prompt: &prompt, config: &self.config };
      let outcome = match tokio::time::timeout(self.provider_timeout, self.provider.generate(&credential, request)).await {
        Ok(Ok(text)) => recover(&text).map_err(|e| {
          warn!(target: "generation", chunk = chunk.index, preview = %trunc_for_log(&text, 200), "Unrecoverable provider response");
          AttemptError::from(e)
        }),
        Ok(Err(e)) => Err(AttemptError::from(e)),
        Err(_) => Err(AttemptError::from(ProviderError::Timeout(self.provider_timeout))),
      };

      match outcome {
        Ok(candidates) => {
          let questions: Vec<Question> = candidates
            .iter()
            .take(desired)
            .map(|c| {
              let mut q = normalize(c, difficulty);
              q.section.get_or_insert(section);
              q
            })
            .collect();
          info!(target: "generation", chunk = chunk.index, attempt, received = candidates.len(), kept = questions.len(), "Chunk generated");
          return Ok(questions);
        }
        Err(e) => {
          let class = e.class();
          warn!(target: "generation", chunk = chunk.index, attempt, max_attempts, key = credential.position(), ?class, error = %e, "Chunk attempt failed");
          match class {
            FailureClass::Authentication => self.pool.invalidate(&credential),
            FailureClass::RateLimited => {}
            FailureClass::Other => {
              if attempt < max_attempts && !self.retry_backoff.is_zero() {
                tokio::time::sleep(self.retry_backoff).await;
              }
            }
          }
          last = Some(e);
        }
      }
    }

    Err(GenerationError::ChunkGenerationFailed {
      chunk: chunk.index,
      attempts: max_attempts,
      last: last.unwrap_or(AttemptError::Provider(ProviderError::EmptyResponse)),
    })
  }
}

//! Error taxonomy for the generation pipeline, the session registry and the store.
//!
//! Chunk-level failures are values, not control flow: the orchestrator decides
//! which of them are fatal.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChunkingError {
  #[error("content is empty after whitespace normalization")]
  EmptyContent,
  #[error("maximum chunk size must be greater than zero")]
  InvalidChunkSize,
}

/// How the chunk generator reacts to a failed provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
  /// Credential rejected: invalidate it and retry immediately.
  Authentication,
  /// Quota or rate limit: retry immediately with another credential.
  RateLimited,
  /// Anything else: back off, then retry.
  Other,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProviderError {
  #[error("provider rejected credential: {0}")]
  Authentication(String),
  #[error("provider rate limit or quota exceeded: {0}")]
  RateLimited(String),
  #[error("provider call timed out after {0:?}")]
  Timeout(Duration),
  #[error("provider transport error: {0}")]
  Transport(String),
  #[error("provider HTTP {status}: {message}")]
  Status { status: u16, message: String },
  #[error("provider returned no text")]
  EmptyResponse,
}

impl ProviderError {
  pub fn class(&self) -> FailureClass {
    match self {
      ProviderError::Authentication(_) => FailureClass::Authentication,
      ProviderError::RateLimited(_) => FailureClass::RateLimited,
      _ => FailureClass::Other,
    }
  }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecoveryError {
  #[error("no question candidates could be salvaged from provider response")]
  MalformedResponse,
}

/// Failure of a single provider attempt for one chunk.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AttemptError {
  #[error(transparent)]
  Provider(#[from] ProviderError),
  #[error(transparent)]
  Recovery(#[from] RecoveryError),
}

impl AttemptError {
  pub fn class(&self) -> FailureClass {
    match self {
      AttemptError::Provider(e) => e.class(),
      AttemptError::Recovery(_) => FailureClass::Other,
    }
  }
}

#[derive(Debug, Error)]
pub enum GenerationError {
  #[error(transparent)]
  Chunking(#[from] ChunkingError),
  #[error("no valid provider credentials remain (chunk {chunk})")]
  AllCredentialsExhausted { chunk: usize },
  #[error("chunk {chunk} failed after {attempts} attempt(s): {last}")]
  ChunkGenerationFailed {
    chunk: usize,
    attempts: usize,
    #[source]
    last: AttemptError,
  },
  #[error("no questions could be generated from the provided content")]
  NoQuestionsGenerated,
  #[error("generation was cancelled")]
  Cancelled,
  #[error("generation task failed: {0}")]
  TaskFailed(String),
}

impl GenerationError {
  /// Stable tag used in logs and metrics-like fields.
  pub fn kind(&self) -> &'static str {
    match self {
      GenerationError::Chunking(_) => "chunking",
      GenerationError::AllCredentialsExhausted { .. } => "all_credentials_exhausted",
      GenerationError::ChunkGenerationFailed { .. } => "chunk_generation_failed",
      GenerationError::NoQuestionsGenerated => "no_questions_generated",
      GenerationError::Cancelled => "cancelled",
      GenerationError::TaskFailed(_) => "task_failed",
    }
  }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
  #[error("a quiz generation is already in progress for this user")]
  ConcurrentGenerationConflict,
  #[error("generation not found or expired")]
  SessionNotFound,
  #[error("this generation belongs to another user")]
  UnauthorizedSessionAccess,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
  #[error("question not found")]
  QuestionNotFound,
}

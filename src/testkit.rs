//! Test doubles shared by unit tests.

use std::collections::VecDeque;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::json;

use crate::credentials::Credential;
use crate::error::ProviderError;
use crate::provider::{Provider, ProviderRequest};

#[derive(Clone, Debug)]
pub enum Step {
  Ok(String),
  Err(ProviderError),
  /// Never resolves.
  Hang,
}

/// Replays a fixed script of responses, one per call, and records which
/// credential position each call used.
pub struct ScriptedProvider {
  steps: Mutex<VecDeque<Step>>,
  calls: Mutex<Vec<usize>>,
  prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
  pub fn new(steps: Vec<Step>) -> Self {
    Self {
      steps: Mutex::new(steps.into()),
      calls: Mutex::new(Vec::new()),
      prompts: Mutex::new(Vec::new()),
    }
  }

  pub fn calls(&self) -> Vec<usize> { self.calls.lock().clone() }

  pub fn prompts(&self) -> Vec<String> { self.prompts.lock().clone() }
}

impl Provider for ScriptedProvider {
  fn generate<'a>(
    &'a self,
    credential: &'a Credential,
    request: ProviderRequest<'a>,
  ) -> BoxFuture<'a, Result<String, ProviderError>> {
    self.calls.lock().push(credential.position());
    self.prompts.lock().push(request.prompt.to_string());
    let step = self
      .steps
      .lock()
      .pop_front()
      .unwrap_or_else(|| Step::Err(ProviderError::Transport("script exhausted".into())));
    Box::pin(async move {
      match step {
        Step::Ok(text) => Ok(text),
        Step::Err(e) => Err(e),
        Step::Hang => futures::future::pending().await,
      }
    })
  }
}

/// A well-formed provider reply holding `n` questions.
pub fn questions_json(n: usize) -> String {
  let items: Vec<_> = (0..n)
    .map(|i| {
      json!({
        "question": format!("Question {}?", i + 1),
        "options": ["alpha", "beta", "gamma", "delta"],
        "correctAnswer": i % 4,
        "explanation": format!("Because of fact {}.", i + 1),
        "topic": "Biology",
        "difficulty": "medium"
      })
    })
    .collect();
  serde_json::Value::Array(items).to_string()
}

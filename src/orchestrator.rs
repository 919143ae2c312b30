//! Generation orchestrator: chunk the content, spread the requested count over
//! the chunks, and run the chunk generator over them in order.
//!
//! Chunk failures are isolated. Only the last chunk may end a run, and only
//! when nothing has been accumulated before it.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::chunker;
use crate::config::GenerationSettings;
use crate::domain::{Difficulty, Question, Section};
use crate::error::GenerationError;
use crate::generator::ChunkGenerator;

/// Share of the overall progress bar owned by chunk generation.
const BAND_START: u8 = 20;
const BAND_END: u8 = 60;

/// Receives progress updates while a run is in flight.
pub trait ProgressSink: Send + Sync {
  fn progress(&self, percent: u8, message: String);
}

/// Per-chunk targets. Each target is the remaining count spread over the
/// remaining chunks, rounded up; the last chunk takes whatever is left.
pub fn plan_targets(total: usize, chunks: usize) -> Vec<usize> {
  let mut targets = Vec::with_capacity(chunks);
  let mut planned = 0usize;
  for i in 0..chunks {
    let remaining = total.saturating_sub(planned);
    let target = if i + 1 == chunks { remaining } else { remaining.div_ceil(chunks - i) };
    planned += target;
    targets.push(target);
  }
  targets
}

fn band(done: usize, of: usize) -> u8 {
  if of == 0 {
    return BAND_END;
  }
  let span = (BAND_END - BAND_START) as usize;
  BAND_START + (span * done / of) as u8
}

pub struct Orchestrator {
  generator: ChunkGenerator,
  max_chunk_size: usize,
  inter_chunk_delay: Duration,
}

impl Orchestrator {
  pub fn new(generator: ChunkGenerator, settings: &GenerationSettings) -> Self {
    Self {
      generator,
      max_chunk_size: settings.max_chunk_size,
      inter_chunk_delay: settings.inter_chunk_delay(),
    }
  }

  #[instrument(level = "info", target = "generation", skip(self, content, sink), fields(content_len = content.len()))]
  pub async fn run(
    &self,
    content: &str,
    total: usize,
    difficulty: Difficulty,
    sink: &dyn ProgressSink,
  ) -> Result<Vec<Question>, GenerationError> {
    let chunks = chunker::chunk(content, self.max_chunk_size)?;
    let n = chunks.len();
    let targets = plan_targets(total, n);
    info!(target: "generation", chunks = n, ?targets, "Content chunked");

    let mut acc: Vec<Question> = Vec::with_capacity(total);
    for (i, (chunk, target)) in chunks.iter().zip(targets.iter().copied()).enumerate() {
      if target == 0 {
        info!(target: "generation", chunk = chunk.index, "Skipping chunk with no remaining target");
        continue;
      }

      sink.progress(band(i, n), format!("Processing chunk {} of {}...", chunk.index, n));
      match self.generator.generate(chunk, target, difficulty, chunk.section()).await {
        Ok(questions) => {
          info!(target: "generation", chunk = chunk.index, target, got = questions.len(), "Chunk contributed questions");
          acc.extend(questions);
        }
        Err(e) if chunk.is_last() && acc.is_empty() => {
          warn!(target: "generation", chunk = chunk.index, kind = e.kind(), error = %e, "Last chunk failed with nothing accumulated");
          return Err(e);
        }
        Err(e) => {
          warn!(target: "generation", chunk = chunk.index, kind = e.kind(), error = %e, "Chunk failed, continuing");
        }
      }
      sink.progress(
        band(i + 1, n),
        format!("Processed chunk {} of {} ({} questions so far)", chunk.index, n, acc.len()),
      );

      if !chunk.is_last() && !self.inter_chunk_delay.is_zero() {
        tokio::time::sleep(self.inter_chunk_delay).await;
      }
    }

    if acc.is_empty() {
      return Err(GenerationError::NoQuestionsGenerated);
    }

    let mut by_section: BTreeMap<&'static str, usize> = Section::ALL.iter().map(|s| (s.as_str(), 0)).collect();
    for q in &acc {
      *by_section.entry(q.section.map(|s| s.as_str()).unwrap_or("unknown")).or_default() += 1;
    }
    info!(target: "generation", requested = total, produced = acc.len(), ?by_section, "Generation finished");
    Ok(acc)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;

  use parking_lot::Mutex;

  use crate::config::Prompts;
  use crate::credentials::CredentialPool;
  use crate::error::{AttemptError, ProviderError};
  use crate::testkit::{questions_json, ScriptedProvider, Step};

  #[derive(Default)]
  struct Recorder(Mutex<Vec<u8>>);

  impl ProgressSink for Recorder {
    fn progress(&self, percent: u8, _message: String) {
      self.0.lock().push(percent);
    }
  }

  fn orchestrator(steps: Vec<Step>, keys: usize) -> (Orchestrator, Arc<ScriptedProvider>) {
    let provider = Arc::new(ScriptedProvider::new(steps));
    let pool = Arc::new(CredentialPool::new((0..keys).map(|i| format!("k{i}"))));
    let settings = GenerationSettings { retry_backoff_ms: 0, inter_chunk_delay_ms: 0, ..GenerationSettings::default() };
    let generator = ChunkGenerator::new(provider.clone(), pool, Prompts::default(), "m", &settings);
    (Orchestrator::new(generator, &settings), provider)
  }

  /// Thirty paragraphs of 999 characters each, roughly 30 000 characters.
  fn long_content() -> String {
    let para = format!("{}.", "a".repeat(998));
    vec![para; 30].join("\n\n")
  }

  #[test]
  fn targets_spread_remainder_forward() {
    assert_eq!(plan_targets(10, 3), vec![4, 3, 3]);
    assert_eq!(plan_targets(10, 1), vec![10]);
    assert_eq!(plan_targets(9, 3), vec![3, 3, 3]);
    assert_eq!(plan_targets(2, 3), vec![1, 1, 0]);
    assert_eq!(plan_targets(10, 4).iter().sum::<usize>(), 10);
  }

  #[tokio::test]
  async fn failed_middle_chunk_is_skipped() {
    let (orch, provider) = orchestrator(
      vec![
        Step::Ok(questions_json(4)),
        Step::Err(ProviderError::Transport("connection reset".into())),
        Step::Ok(questions_json(3)),
      ],
      1,
    );
    let sink = Recorder::default();
    let out = orch.run(&long_content(), 10, Difficulty::Medium, &sink).await.unwrap();

    assert_eq!(out.len(), 7);
    let prompts = provider.prompts();
    assert_eq!(prompts.len(), 3);
    assert!(prompts[0].contains("exactly 4 multiple-choice"));
    assert!(prompts[1].contains("exactly 3 multiple-choice"));
    assert!(prompts[2].contains("exactly 3 multiple-choice"));
    assert_eq!(out[0].section, Some(Section::Beginning));
    assert_eq!(out[6].section, Some(Section::LateMiddle));

    let seen = sink.0.lock().clone();
    assert_eq!(seen.first(), Some(&20));
    assert_eq!(seen.last(), Some(&60));
    assert!(seen.windows(2).all(|w| w[0] <= w[1]));
  }

  #[tokio::test]
  async fn oversupplying_chunk_is_capped_to_its_target() {
    let (orch, _) = orchestrator(vec![Step::Ok(questions_json(12))], 1);
    let out = orch.run("Short content.", 5, Difficulty::Easy, &Recorder::default()).await.unwrap();
    assert_eq!(out.len(), 5);
  }

  #[tokio::test]
  async fn last_chunk_failure_is_fatal_when_nothing_accumulated() {
    let (orch, _) = orchestrator(vec![Step::Ok("garbage".into())], 1);
    let err = orch.run("Only one chunk here.", 3, Difficulty::Hard, &Recorder::default()).await.unwrap_err();
    match err {
      GenerationError::ChunkGenerationFailed { chunk: 1, last: AttemptError::Recovery(_), .. } => {}
      other => panic!("unexpected: {other:?}"),
    }
  }

  #[tokio::test]
  async fn last_chunk_failure_is_tolerated_after_earlier_success() {
    let (orch, _) = orchestrator(
      vec![
        Step::Ok(questions_json(4)),
        Step::Ok(questions_json(3)),
        Step::Err(ProviderError::EmptyResponse),
      ],
      1,
    );
    let out = orch.run(&long_content(), 10, Difficulty::Medium, &Recorder::default()).await.unwrap();
    assert_eq!(out.len(), 7);
  }

  #[tokio::test]
  async fn skipped_last_chunk_leaves_no_questions_generated() {
    // Three chunks, two requested: the last chunk has a zero target.
    let (orch, provider) = orchestrator(
      vec![
        Step::Err(ProviderError::Transport("down".into())),
        Step::Err(ProviderError::Transport("down".into())),
      ],
      1,
    );
    let err = orch.run(&long_content(), 2, Difficulty::Medium, &Recorder::default()).await.unwrap_err();
    assert!(matches!(err, GenerationError::NoQuestionsGenerated));
    assert_eq!(provider.calls().len(), 2);
  }

  #[tokio::test]
  async fn empty_content_is_a_chunking_error() {
    let (orch, provider) = orchestrator(vec![], 1);
    let err = orch.run(" \n\t ", 3, Difficulty::Medium, &Recorder::default()).await.unwrap_err();
    assert_eq!(err.kind(), "chunking");
    assert!(provider.calls().is_empty());
  }
}

//! In-memory question store and per-user answer statistics.
//!
//! Prior results are deactivated, never deleted, when a new generation is
//! saved. Inactive rows are purged later by a background sweep.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::domain::Question;
use crate::error::StoreError;

#[derive(Clone, Debug)]
pub struct StoredQuestion {
  pub question: Question,
  pub user_id: String,
  pub generation_id: Uuid,
  pub is_active: bool,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Counters {
  total: u64,
  correct: u64,
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressStats {
  pub total_questions: u64,
  pub correct_answers: u64,
  /// Percentage in [0, 100]; 0 when nothing has been answered.
  pub accuracy: f64,
}

impl From<Counters> for ProgressStats {
  fn from(c: Counters) -> Self {
    let accuracy = if c.total == 0 { 0.0 } else { c.correct as f64 * 100.0 / c.total as f64 };
    Self { total_questions: c.total, correct_answers: c.correct, accuracy }
  }
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnswerOutcome {
  pub correct: bool,
  pub correct_answer: u8,
  pub explanation: String,
  pub progress: ProgressStats,
}

#[derive(Default)]
struct StoreInner {
  /// Insertion order is creation order.
  questions: Vec<StoredQuestion>,
  progress: HashMap<String, Counters>,
}

#[derive(Default)]
pub struct QuestionStore {
  inner: RwLock<StoreInner>,
}

impl QuestionStore {
  pub fn new() -> Self { Self::default() }

  /// Deactivate every active question of `user`. Returns how many changed.
  #[instrument(level = "debug", skip(self))]
  pub async fn replace_prior_questions(&self, user: &str) -> usize {
    let now = Utc::now();
    let mut inner = self.inner.write().await;
    let mut generations = HashSet::new();
    let mut changed = 0;
    for row in inner.questions.iter_mut().filter(|r| r.user_id == user && r.is_active) {
      row.is_active = false;
      row.updated_at = now;
      generations.insert(row.generation_id);
      changed += 1;
    }
    if changed > 0 {
      info!(target: "quizgen", %user, changed, generations = generations.len(), "Deactivated prior questions");
    }
    changed
  }

  /// Store a generation's questions as active. A non-blank `topic` label from
  /// the upload replaces the per-question topic. Returns the stored copies.
  #[instrument(level = "debug", skip(self, questions), fields(count = questions.len()))]
  pub async fn save_questions(
    &self,
    user: &str,
    generation_id: Uuid,
    topic: &str,
    questions: &[Question],
  ) -> Vec<Question> {
    let now = Utc::now();
    let label = topic.trim();
    let saved: Vec<Question> = questions
      .iter()
      .cloned()
      .map(|mut q| {
        if !label.is_empty() {
          q.topic = label.to_string();
        }
        q
      })
      .collect();

    let mut inner = self.inner.write().await;
    inner.questions.extend(saved.iter().cloned().map(|question| StoredQuestion {
      question,
      user_id: user.to_string(),
      generation_id,
      is_active: true,
      created_at: now,
      updated_at: now,
    }));
    saved
  }

  /// Active questions of `user`, newest first. A zero limit means no limit.
  pub async fn find_active_questions(&self, user: &str, limit: Option<usize>) -> Vec<Question> {
    let inner = self.inner.read().await;
    let mut rows: Vec<&StoredQuestion> = inner
      .questions
      .iter()
      .rev()
      .filter(|r| r.user_id == user && r.is_active)
      .collect();
    // Stable, so rows saved in the same instant stay newest first.
    rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    rows
      .into_iter()
      .take(limit.filter(|&n| n > 0).unwrap_or(usize::MAX))
      .map(|r| r.question.clone())
      .collect()
  }

  /// Grade one answer and update the user's running statistics.
  /// Questions of other users are reported as not found.
  #[instrument(level = "debug", skip(self))]
  pub async fn record_answer(&self, user: &str, question_id: &str, selected: u8) -> Result<AnswerOutcome, StoreError> {
    let mut inner = self.inner.write().await;
    let (correct_answer, explanation) = inner
      .questions
      .iter()
      .find(|r| r.question.id == question_id && r.user_id == user)
      .map(|r| (r.question.correct_answer, r.question.explanation.clone()))
      .ok_or(StoreError::QuestionNotFound)?;

    let correct = selected == correct_answer;
    let counters = inner.progress.entry(user.to_string()).or_default();
    counters.total += 1;
    if correct {
      counters.correct += 1;
    }
    Ok(AnswerOutcome { correct, correct_answer, explanation, progress: (*counters).into() })
  }

  pub async fn user_progress(&self, user: &str) -> ProgressStats {
    let inner = self.inner.read().await;
    inner.progress.get(user).copied().unwrap_or_default().into()
  }

  /// Drop inactive questions last touched more than `older_than` ago.
  pub async fn purge_inactive(&self, older_than: Duration) -> usize {
    let cutoff = Utc::now() - older_than;
    let mut inner = self.inner.write().await;
    let before = inner.questions.len();
    inner.questions.retain(|r| r.is_active || r.updated_at > cutoff);
    let purged = before - inner.questions.len();
    if purged > 0 {
      info!(target: "quizgen", purged, "Purged inactive questions");
    }
    purged
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::Difficulty;

  fn question(id: &str, answer: u8) -> Question {
    Question {
      id: id.into(),
      question: format!("{id}?"),
      options: vec!["a".into(), "b".into(), "c".into(), "d".into()],
      correct_answer: answer,
      explanation: format!("because {id}"),
      topic: "From provider".into(),
      difficulty: Difficulty::Medium,
      section: None,
    }
  }

  #[tokio::test]
  async fn new_generation_deactivates_prior_questions() {
    let store = QuestionStore::new();
    store.save_questions("u1", Uuid::new_v4(), "Biology", &[question("q1", 0), question("q2", 1)]).await;
    store.save_questions("u2", Uuid::new_v4(), "", &[question("other", 0)]).await;

    assert_eq!(store.replace_prior_questions("u1").await, 2);
    assert_eq!(store.replace_prior_questions("u1").await, 0);

    let saved = store.save_questions("u1", Uuid::new_v4(), "Chemistry", &[question("q3", 2)]).await;
    assert_eq!(saved[0].topic, "Chemistry");

    let active = store.find_active_questions("u1", None).await;
    assert_eq!(active.iter().map(|q| q.id.as_str()).collect::<Vec<_>>(), vec!["q3"]);
    assert_eq!(store.find_active_questions("u2", None).await[0].topic, "From provider");
  }

  #[tokio::test]
  async fn active_questions_are_newest_first_and_limited() {
    let store = QuestionStore::new();
    let gen = Uuid::new_v4();
    store.save_questions("u1", gen, "T", &[question("a", 0), question("b", 0)]).await;
    store.save_questions("u1", gen, "T", &[question("c", 0)]).await;
    let ids: Vec<String> = store.find_active_questions("u1", Some(2)).await.into_iter().map(|q| q.id).collect();
    assert_eq!(ids, vec!["c", "b"]);
    assert_eq!(store.find_active_questions("u1", Some(0)).await.len(), 3);
  }

  #[tokio::test]
  async fn answers_update_running_accuracy() {
    let store = QuestionStore::new();
    store.save_questions("u1", Uuid::new_v4(), "T", &[question("q1", 2)]).await;

    let wrong = store.record_answer("u1", "q1", 0).await.unwrap();
    assert!(!wrong.correct);
    assert_eq!(wrong.correct_answer, 2);
    assert_eq!(wrong.explanation, "because q1");

    let right = store.record_answer("u1", "q1", 2).await.unwrap();
    assert!(right.correct);
    assert_eq!(right.progress, ProgressStats { total_questions: 2, correct_answers: 1, accuracy: 50.0 });
    assert_eq!(store.user_progress("u1").await.total_questions, 2);
  }

  #[tokio::test]
  async fn foreign_or_unknown_questions_are_not_found() {
    let store = QuestionStore::new();
    store.save_questions("u1", Uuid::new_v4(), "T", &[question("q1", 0)]).await;
    assert_eq!(store.record_answer("u2", "q1", 0).await, Err(StoreError::QuestionNotFound));
    assert_eq!(store.record_answer("u1", "nope", 0).await, Err(StoreError::QuestionNotFound));
    assert_eq!(store.user_progress("u2").await, ProgressStats { total_questions: 0, correct_answers: 0, accuracy: 0.0 });
  }

  #[tokio::test]
  async fn purge_only_touches_old_inactive_rows() {
    let store = QuestionStore::new();
    store.save_questions("u1", Uuid::new_v4(), "T", &[question("old", 0)]).await;
    store.replace_prior_questions("u1").await;
    store.save_questions("u1", Uuid::new_v4(), "T", &[question("new", 0)]).await;

    assert_eq!(store.purge_inactive(Duration::days(7)).await, 0);
    assert_eq!(store.purge_inactive(Duration::seconds(-1)).await, 1);
    assert_eq!(store.find_active_questions("u1", None).await.len(), 1);
  }
}

//! Domain models used by the backend: difficulty/section tags, chunks,
//! question candidates, normalized questions and generation events.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Requested difficulty of a generation. A run always targets exactly one level.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
  Easy,
  Medium,
  Hard,
}
impl Default for Difficulty {
  fn default() -> Self { Difficulty::Medium }
}

impl Difficulty {
  /// Case-insensitive parse; unknown labels yield None.
  pub fn parse(s: &str) -> Option<Self> {
    match s.trim().to_ascii_lowercase().as_str() {
      "easy" => Some(Difficulty::Easy),
      "medium" => Some(Difficulty::Medium),
      "hard" => Some(Difficulty::Hard),
      _ => None,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Difficulty::Easy => "easy",
      Difficulty::Medium => "medium",
      Difficulty::Hard => "hard",
    }
  }
}

impl std::fmt::Display for Difficulty {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Coarse position of a chunk inside the source document.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Section {
  Beginning,
  EarlyMiddle,
  Middle,
  LateMiddle,
  End,
}

impl Section {
  pub const ALL: [Section; 5] = [
    Section::Beginning,
    Section::EarlyMiddle,
    Section::Middle,
    Section::LateMiddle,
    Section::End,
  ];

  /// Map a fractional position in [0, 1) to one of five fixed bands.
  pub fn from_position(position: f64) -> Self {
    if position < 0.2 {
      Section::Beginning
    } else if position < 0.4 {
      Section::EarlyMiddle
    } else if position < 0.6 {
      Section::Middle
    } else if position < 0.8 {
      Section::LateMiddle
    } else {
      Section::End
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s.trim().to_ascii_lowercase().replace(['_', ' '], "-").as_str() {
      "beginning" => Some(Section::Beginning),
      "early-middle" => Some(Section::EarlyMiddle),
      "middle" => Some(Section::Middle),
      "late-middle" => Some(Section::LateMiddle),
      "end" => Some(Section::End),
      _ => None,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Section::Beginning => "beginning",
      Section::EarlyMiddle => "early-middle",
      Section::Middle => "middle",
      Section::LateMiddle => "late-middle",
      Section::End => "end",
    }
  }
}

/// One ordered, size-bounded slice of normalized content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
  /// 1-based position.
  pub index: usize,
  pub total: usize,
  pub text: String,
}

impl Chunk {
  pub fn section(&self) -> Section {
    if self.total == 0 {
      return Section::Beginning;
    }
    Section::from_position((self.index.saturating_sub(1)) as f64 / self.total as f64)
  }

  pub fn is_last(&self) -> bool { self.index == self.total }
}

/// Raw provider object before normalization. Any field may be missing or mistyped,
/// so the JSON object is kept as-is and read through loose accessors.
#[derive(Clone, Debug, PartialEq)]
pub struct QuestionCandidate(pub Map<String, Value>);

impl QuestionCandidate {
  pub fn field(&self, key: &str) -> Option<&Value> { self.0.get(key) }

  /// Trimmed, non-empty string field.
  pub fn text(&self, key: &str) -> Option<&str> {
    self.0.get(key)
      .and_then(Value::as_str)
      .map(str::trim)
      .filter(|s| !s.is_empty())
  }

  pub fn has(&self, key: &str) -> bool { self.0.contains_key(key) }
}

/// A normalized multiple-choice question.
///
/// Invariants: exactly four options, `correct_answer` in 0..=3,
/// non-empty explanation, difficulty always set.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Question {
  #[serde(rename = "_id")]
  pub id: String,
  pub question: String,
  pub options: Vec<String>,
  pub correct_answer: u8,
  pub explanation: String,
  pub topic: String,
  pub difficulty: Difficulty,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub section: Option<Section>,
}

/// Lifecycle of a generation session. `Completed` and `Error` are terminal.
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
  Processing,
  Completed,
  Error,
}

impl SessionState {
  pub fn is_terminal(&self) -> bool { !matches!(self, SessionState::Processing) }
}

/// Events pushed to subscribers of one session, in emission order.
/// Exactly one `Complete` or `Error` closes the stream.
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GenerationEvent {
  Progress {
    progress: u8,
    message: String,
  },
  Question {
    question: Question,
    progress: u8,
    #[serde(rename = "questionNumber")]
    ordinal: usize,
    #[serde(rename = "totalQuestions")]
    total: usize,
  },
  Complete {
    #[serde(rename = "totalQuestions")]
    total: usize,
    #[serde(rename = "elapsedMs")]
    elapsed_ms: u64,
    message: String,
  },
  Error {
    message: String,
  },
}

impl GenerationEvent {
  pub fn is_terminal(&self) -> bool {
    matches!(self, GenerationEvent::Complete { .. } | GenerationEvent::Error { .. })
  }
}

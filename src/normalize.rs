//! Repair provider candidates into questions that satisfy the output schema.

use serde_json::Value;
use uuid::Uuid;

use crate::domain::{Difficulty, Question, QuestionCandidate, Section};

pub const OPTION_COUNT: usize = 4;
const LETTERS: [char; OPTION_COUNT] = ['A', 'B', 'C', 'D'];

/// Never fails: missing or malformed fields are replaced, never rejected.
pub fn normalize(candidate: &QuestionCandidate, requested: Difficulty) -> Question {
  let options = normalize_options(candidate.field("options"));
  let correct_answer = candidate
    .field("correctAnswer")
    .and_then(answer_index)
    .unwrap_or(0);

  let explanation = candidate
    .text("explanation")
    .map(str::to_string)
    .unwrap_or_else(|| format!("The correct answer is {}.", LETTERS[correct_answer as usize]));

  Question {
    id: Uuid::new_v4().to_string(),
    question: candidate.text("question").unwrap_or("Untitled question").to_string(),
    options,
    correct_answer,
    explanation,
    topic: candidate.text("topic").unwrap_or("General").to_string(),
    difficulty: requested,
    section: candidate.text("section").and_then(Section::parse),
  }
}

fn placeholder(slot: usize) -> String { format!("Option {}", LETTERS[slot]) }

fn normalize_options(raw: Option<&Value>) -> Vec<String> {
  let items: &[Value] = match raw {
    Some(Value::Array(items)) => items,
    _ => &[],
  };
  (0..OPTION_COUNT)
    .map(|slot| {
      items
        .get(slot)
        .and_then(option_text)
        .unwrap_or_else(|| placeholder(slot))
    })
    .collect()
}

fn option_text(v: &Value) -> Option<String> {
  let s = match v {
    Value::String(s) => s.trim().to_string(),
    Value::Number(n) => n.to_string(),
    Value::Bool(b) => b.to_string(),
    _ => return None,
  };
  if s.is_empty() { None } else { Some(s) }
}

/// A JSON number that is a whole value in 0..=3.
fn answer_index(v: &Value) -> Option<u8> {
  let n = v.as_f64()?;
  if n.fract() == 0.0 && (0.0..OPTION_COUNT as f64).contains(&n) {
    Some(n as u8)
  } else {
    None
  }
}

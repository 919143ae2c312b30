//! Tolerant recovery of question candidates from raw provider text.
//!
//! Providers wrap JSON in code fences, add commentary around it, leave trailing
//! commas or use single quotes. Three tiers are tried in order:
//!
//! 1. the whole text (fences stripped) as one JSON value;
//! 2. the span between the first `[` and the last `]`;
//! 3. every flat `{...}` fragment that mentions a `question` key, parsed on its own.
//!
//! Each parse attempt runs on repaired text (see [`repair_json`]).

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::domain::QuestionCandidate;
use crate::error::RecoveryError;

fn fence_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r"```[A-Za-z0-9_-]*").expect("valid fence regex"))
}

fn fragment_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r#"\{[^{}]*["']question["'][^{}]*\}"#).expect("valid fragment regex"))
}

/// Salvage every question candidate we can from `raw`.
pub fn recover(raw: &str) -> Result<Vec<QuestionCandidate>, RecoveryError> {
  let stripped = fence_re().replace_all(raw, "");
  let stripped = stripped.trim();

  if let Some(found) = parse_whole(stripped) {
    debug!(target: "generation", tier = 1, candidates = found.len(), "Recovered provider response");
    return Ok(found);
  }
  if let Some(found) = parse_bracket_span(stripped) {
    debug!(target: "generation", tier = 2, candidates = found.len(), "Recovered provider response");
    return Ok(found);
  }
  let found = parse_fragments(stripped);
  if !found.is_empty() {
    debug!(target: "generation", tier = 3, candidates = found.len(), "Recovered provider response");
    return Ok(found);
  }
  Err(RecoveryError::MalformedResponse)
}

fn parse_whole(text: &str) -> Option<Vec<QuestionCandidate>> {
  let value: Value = serde_json::from_str(&repair_json(text)).ok()?;
  let items = match value {
    Value::Array(items) => items,
    Value::Object(mut obj) => match obj.remove("questions") {
      Some(Value::Array(items)) => items,
      _ => return None,
    },
    _ => return None,
  };
  non_empty(objects(items))
}

fn parse_bracket_span(text: &str) -> Option<Vec<QuestionCandidate>> {
  let start = text.find('[')?;
  let end = text.rfind(']')?;
  if end <= start {
    return None;
  }
  match serde_json::from_str::<Value>(&repair_json(&text[start..=end])).ok()? {
    Value::Array(items) => non_empty(objects(items)),
    _ => None,
  }
}

fn parse_fragments(text: &str) -> Vec<QuestionCandidate> {
  fragment_re()
    .find_iter(text)
    .filter_map(|m| match serde_json::from_str::<Value>(&repair_json(m.as_str())) {
      Ok(Value::Object(obj)) => Some(QuestionCandidate(obj)),
      _ => None,
    })
    .filter(|c| c.has("question") && c.has("options"))
    .collect()
}

fn objects(items: Vec<Value>) -> Vec<QuestionCandidate> {
  items
    .into_iter()
    .filter_map(|v| match v {
      Value::Object(obj) => Some(QuestionCandidate(obj)),
      _ => None,
    })
    .collect()
}

fn non_empty(v: Vec<QuestionCandidate>) -> Option<Vec<QuestionCandidate>> {
  if v.is_empty() { None } else { Some(v) }
}

/// Light textual repair applied before every parse attempt.
///
/// Outside of string literals: drops commas that directly precede `}` or `]`,
/// and rewrites single-quoted strings as double-quoted ones. Content of
/// double-quoted strings (including apostrophes) is left untouched.
pub fn repair_json(text: &str) -> String {
  let chars: Vec<char> = text.chars().collect();
  let mut out = String::with_capacity(text.len());
  let mut i = 0;

  while i < chars.len() {
    let c = chars[i];
    match c {
      '"' => {
        out.push('"');
        i += 1;
        while i < chars.len() {
          let d = chars[i];
          out.push(d);
          i += 1;
          if d == '\\' {
            if let Some(&next) = chars.get(i) {
              out.push(next);
              i += 1;
            }
          } else if d == '"' {
            break;
          }
        }
      }
      '\'' => {
        out.push('"');
        i += 1;
        while i < chars.len() {
          let d = chars[i];
          i += 1;
          match d {
            '\\' => match chars.get(i) {
              Some('\'') => {
                out.push('\'');
                i += 1;
              }
              Some(&next) => {
                out.push('\\');
                out.push(next);
                i += 1;
              }
              None => out.push('\\'),
            },
            '"' => out.push_str("\\\""),
            '\'' => break,
            _ => out.push(d),
          }
        }
        out.push('"');
      }
      ',' => {
        let mut j = i + 1;
        while j < chars.len() && chars[j].is_whitespace() {
          j += 1;
        }
        if !matches!(chars.get(j), Some('}') | Some(']')) {
          out.push(',');
        }
        i += 1;
      }
      _ => {
        out.push(c);
        i += 1;
      }
    }
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;

  const WELL_FORMED: &str = r#"[
    {"question": "What is 2+2?", "options": ["1", "2", "3", "4"], "correctAnswer": 3, "explanation": "Basic sum."},
    {"question": "Capital of France?", "options": ["Paris", "Rome", "Oslo", "Bern"], "correctAnswer": 0, "explanation": "It's Paris."}
  ]"#;

  #[test]
  fn tier_one_plain_array_and_fenced_object() {
    assert_eq!(recover(WELL_FORMED).unwrap().len(), 2);

    let fenced = format!("```json\n{{\"questions\": {WELL_FORMED}}}\n```");
    let got = recover(&fenced).unwrap();
    assert_eq!(got.len(), 2);
    assert_eq!(got[1].text("question"), Some("Capital of France?"));
  }

  #[test]
  fn trailing_commas_and_single_quotes_match_well_formed() {
    let sloppy = r#"[
      {'question': 'What is 2+2?', 'options': ['1', '2', '3', '4',], 'correctAnswer': 3, 'explanation': 'Basic sum.',},
      {'question': 'Capital of France?', 'options': ['Paris', 'Rome', 'Oslo', 'Bern'], 'correctAnswer': 0, 'explanation': "It's Paris."},
    ]"#;
    assert_eq!(recover(sloppy).unwrap(), recover(WELL_FORMED).unwrap());
  }

  #[test]
  fn tier_two_strips_commentary() {
    let noisy = format!("Sure! Here are your questions:\n{WELL_FORMED}\nLet me know if you need more.");
    assert_eq!(recover(&noisy).unwrap(), recover(WELL_FORMED).unwrap());
  }

  #[test]
  fn tier_three_salvages_valid_fragments() {
    let broken = r#"Here you go: [
      {"question": "Q1?", "options": ["a", "b", "c", "d"], "correctAnswer": 1},
      {"question": "Q2 has no options", "correctAnswer": 0},
      {"question": "Q3?", "options": ["a", "b"], "correctAnswer": 0}
      {"question": "truncated", "options": ["a""#;
    let got = recover(broken).unwrap();
    let texts: Vec<_> = got.iter().filter_map(|c| c.text("question")).collect();
    assert_eq!(texts, vec!["Q1?", "Q3?"]);
  }

  #[test]
  fn hopeless_text_is_malformed() {
    assert_eq!(recover("I cannot help with that."), Err(RecoveryError::MalformedResponse));
    assert_eq!(recover("[]"), Err(RecoveryError::MalformedResponse));
    assert_eq!(recover(r#"{"status": "ok"}"#), Err(RecoveryError::MalformedResponse));
  }

  #[test]
  fn repair_leaves_string_contents_alone() {
    assert_eq!(repair_json(r#"{"a": "x, ]", "b": "it's",}"#), r#"{"a": "x, ]", "b": "it's"}"#);
    assert_eq!(repair_json(r#"{'say': 'he said "hi"'}"#), r#"{"say": "he said \"hi\""}"#);
    assert_eq!(repair_json(r"['it\'s']"), r#"["it's"]"#);
  }
}

//! Content chunking: split extracted document text into ordered, size-bounded chunks.
//!
//! Paragraphs (blank-line separated) are the preferred boundary, sentences the
//! fallback for paragraphs that are too large on their own. Sizes are counted in
//! characters of whitespace-normalized text.

use crate::domain::Chunk;
use crate::error::ChunkingError;

/// Split `text` into chunks of at most `max_chunk_size` characters.
///
/// Only a single sentence that is longer than the limit can produce an
/// oversized chunk; it is emitted whole.
pub fn chunk(text: &str, max_chunk_size: usize) -> Result<Vec<Chunk>, ChunkingError> {
  if max_chunk_size == 0 {
    return Err(ChunkingError::InvalidChunkSize);
  }

  let mut units: Vec<String> = Vec::new();
  for paragraph in paragraphs(text) {
    if char_len(&paragraph) <= max_chunk_size {
      units.push(paragraph);
    } else {
      units.extend(sentences(&paragraph));
    }
  }
  if units.is_empty() {
    return Err(ChunkingError::EmptyContent);
  }

  let texts = accumulate(units, max_chunk_size);
  let total = texts.len();
  Ok(
    texts
      .into_iter()
      .enumerate()
      .map(|(i, text)| Chunk { index: i + 1, total, text })
      .collect(),
  )
}

/// Collapse every run of whitespace to a single space and trim.
pub fn normalize_whitespace(text: &str) -> String {
  text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn char_len(s: &str) -> usize { s.chars().count() }

/// Blank-line separated paragraphs, each whitespace-normalized, empties dropped.
fn paragraphs(text: &str) -> Vec<String> {
  let mut out = Vec::new();
  let mut current = String::new();
  for line in text.lines() {
    if line.trim().is_empty() {
      if !current.is_empty() {
        out.push(normalize_whitespace(&current));
        current.clear();
      }
    } else {
      current.push_str(line);
      current.push(' ');
    }
  }
  if !current.is_empty() {
    out.push(normalize_whitespace(&current));
  }
  out.retain(|p| !p.is_empty());
  out
}

/// Sentences of an already normalized paragraph. A sentence ends at `.`, `!` or `?`
/// followed by a space; the terminator stays with its sentence.
fn sentences(paragraph: &str) -> Vec<String> {
  let mut out = Vec::new();
  let mut current = String::new();
  let mut chars = paragraph.chars().peekable();
  while let Some(c) = chars.next() {
    if c == ' ' && current.is_empty() {
      continue;
    }
    current.push(c);
    if matches!(c, '.' | '!' | '?') && chars.peek() == Some(&' ') {
      out.push(std::mem::take(&mut current));
    }
  }
  let rest = current.trim_end();
  if !rest.is_empty() {
    out.push(rest.to_string());
  }
  out
}

/// Greedy accumulation of units into buffers joined by single spaces.
fn accumulate(units: Vec<String>, max: usize) -> Vec<String> {
  let mut out = Vec::new();
  let mut buffer = String::new();
  let mut buffer_len = 0usize;

  for unit in units {
    let unit_len = char_len(&unit);
    let joined_len = if buffer.is_empty() { unit_len } else { buffer_len + 1 + unit_len };
    if !buffer.is_empty() && joined_len > max {
      out.push(std::mem::take(&mut buffer));
      buffer_len = 0;
    }
    if !buffer.is_empty() {
      buffer.push(' ');
      buffer_len += 1;
    }
    buffer.push_str(&unit);
    buffer_len += unit_len;
  }
  if !buffer.is_empty() {
    out.push(buffer);
  }
  out
}

//! Configuration: environment variables plus an optional TOML overlay.
//!
//! Env:
//!   PORT              : u16 (default 3000)
//!   GEMINI_API_KEYS   : comma-separated provider keys (rotated round-robin)
//!   GEMINI_API_KEY    : single key, used when GEMINI_API_KEYS is absent
//!   GEMINI_MODEL      : default "gemini-2.5-flash"
//!   GEMINI_BASE_URL   : default "https://generativelanguage.googleapis.com/v1beta"
//!   QUIZGEN_CONFIG_PATH : TOML file with `[generation]` and `[prompts]` tables
//!
//! See `FileConfig`, `GenerationSettings` and `Prompts` for the TOML schema.

use std::time::Duration;

use serde::Deserialize;
use tracing::{error, info, warn};

#[derive(Clone, Debug)]
pub struct AppConfig {
  pub port: u16,
  pub provider: ProviderSettings,
  pub generation: GenerationSettings,
  pub prompts: Prompts,
}

#[derive(Clone)]
pub struct ProviderSettings {
  pub base_url: String,
  pub model: String,
  pub api_keys: Vec<String>,
}

// Keys stay out of logs.
impl std::fmt::Debug for ProviderSettings {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ProviderSettings")
      .field("base_url", &self.base_url)
      .field("model", &self.model)
      .field("api_keys", &self.api_keys.len())
      .finish()
  }
}

/// Pipeline tuning knobs. Sampling fields are sent verbatim as the provider's
/// generation config.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
  pub max_chunk_size: usize,
  pub inter_chunk_delay_ms: u64,
  pub retry_backoff_ms: u64,
  pub provider_timeout_secs: u64,
  pub session_grace_secs: u64,
  pub temperature: f32,
  pub top_k: u32,
  pub top_p: f32,
  pub max_output_tokens: u32,
}

impl Default for GenerationSettings {
  fn default() -> Self {
    Self {
      max_chunk_size: 12_000,
      inter_chunk_delay_ms: 1_000,
      retry_backoff_ms: 2_000,
      provider_timeout_secs: 60,
      session_grace_secs: 60,
      temperature: 0.7,
      top_k: 40,
      top_p: 0.95,
      max_output_tokens: 8192,
    }
  }
}

impl GenerationSettings {
  pub fn inter_chunk_delay(&self) -> Duration { Duration::from_millis(self.inter_chunk_delay_ms) }
  pub fn retry_backoff(&self) -> Duration { Duration::from_millis(self.retry_backoff_ms) }
  pub fn provider_timeout(&self) -> Duration { Duration::from_secs(self.provider_timeout_secs) }
  pub fn session_grace(&self) -> Duration { Duration::from_secs(self.session_grace_secs) }
}

/// Prompt text sent to the provider. Placeholders in `generation_template`:
/// `{count}`, `{difficulty}`, `{difficulty_upper}`, `{guidelines}`, `{section}`,
/// `{chunk_index}`, `{chunk_total}`, `{content}`.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  pub system_preamble: String,
  pub generation_template: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      system_preamble: "You are an expert quiz generator. Every question must be answerable from the provided content.".into(),
      generation_template: r#"Generate exactly {count} multiple-choice questions from the content below.

This content is part {chunk_index} of {chunk_total} of the document (the {section} section).

CRITICAL REQUIREMENTS:
1. ALL questions MUST be "{difficulty_upper}" difficulty
2. Each question covers a different part of the content
3. Every question must be answerable from the provided content

DIFFICULTY GUIDELINES FOR "{difficulty_upper}":
{guidelines}

CONTENT:
{content}

RESPONSE FORMAT (JSON ONLY - NO MARKDOWN, NO CODE BLOCKS):
[
  {
    "question": "Question text here?",
    "options": ["Option A", "Option B", "Option C", "Option D"],
    "correctAnswer": 0,
    "explanation": "Why the correct option is right",
    "topic": "Topic name",
    "difficulty": "{difficulty}",
    "section": "{section}"
  }
]

Return ONLY the JSON array with exactly {count} questions."#.into(),
    }
  }
}

/// Optional TOML overlay.
#[derive(Clone, Debug, Deserialize, Default)]
pub struct FileConfig {
  #[serde(default)]
  pub generation: GenerationSettings,
  #[serde(default)]
  pub prompts: Prompts,
}

impl AppConfig {
  pub fn from_env() -> Self {
    let file = load_file_config_from_env().unwrap_or_default();

    let port = std::env::var("PORT")
      .ok()
      .and_then(|p| p.parse::<u16>().ok())
      .unwrap_or(3000);

    let api_keys = parse_keys(
      std::env::var("GEMINI_API_KEYS").ok().as_deref(),
      std::env::var("GEMINI_API_KEY").ok().as_deref(),
    );
    if api_keys.is_empty() {
      warn!(target: "quizgen", "No GEMINI_API_KEYS / GEMINI_API_KEY set. Every generation will fail until keys are configured.");
    }

    let provider = ProviderSettings {
      base_url: std::env::var("GEMINI_BASE_URL")
        .unwrap_or_else(|_| "https://generativelanguage.googleapis.com/v1beta".into()),
      model: std::env::var("GEMINI_MODEL").unwrap_or_else(|_| "gemini-2.5-flash".into()),
      api_keys,
    };

    Self { port, provider, generation: file.generation, prompts: file.prompts }
  }
}

/// The multi-key variable wins; the single key is the fallback.
fn parse_keys(multi: Option<&str>, single: Option<&str>) -> Vec<String> {
  let from_multi: Vec<String> = multi
    .unwrap_or_default()
    .split(',')
    .map(str::trim)
    .filter(|k| !k.is_empty())
    .map(String::from)
    .collect();
  if !from_multi.is_empty() {
    return from_multi;
  }
  single
    .map(str::trim)
    .filter(|k| !k.is_empty())
    .map(|k| vec![k.to_string()])
    .unwrap_or_default()
}

/// Attempt to load `FileConfig` from QUIZGEN_CONFIG_PATH. On any parsing/IO error, returns None.
pub fn load_file_config_from_env() -> Option<FileConfig> {
  let path = std::env::var("QUIZGEN_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match toml::from_str::<FileConfig>(&s) {
      Ok(cfg) => {
        info!(target: "quizgen", %path, "Loaded config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "quizgen", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "quizgen", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}

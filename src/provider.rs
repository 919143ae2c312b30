//! Generative-content provider seam and the Gemini REST client behind it.
//!
//! We only call `models/{model}:generateContent` and return the concatenated
//! text parts. Calls are instrumented and log model names, latencies and
//! response sizes (not contents).
//!
//! NOTE: The key travels in the `x-goog-api-key` header, never in the URL, and is never logged.

use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::config::{GenerationSettings, ProviderSettings};
use crate::credentials::Credential;
use crate::error::ProviderError;
use crate::util::trunc_for_log;

/// Sampling parameters sent with every request.
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
  pub temperature: f32,
  pub top_k: u32,
  pub top_p: f32,
  pub max_output_tokens: u32,
}

impl From<&GenerationSettings> for GenerationConfig {
  fn from(s: &GenerationSettings) -> Self {
    Self {
      temperature: s.temperature,
      top_k: s.top_k,
      top_p: s.top_p,
      max_output_tokens: s.max_output_tokens,
    }
  }
}

#[derive(Clone, Copy, Debug)]
pub struct ProviderRequest<'a> {
  pub model: &'a str,
  pub prompt: &'a str,
  pub config: &'a GenerationConfig,
}

/// One text-generation call with a given credential.
pub trait Provider: Send + Sync {
  fn generate<'a>(
    &'a self,
    credential: &'a Credential,
    request: ProviderRequest<'a>,
  ) -> BoxFuture<'a, Result<String, ProviderError>>;
}

#[derive(Clone)]
pub struct GeminiClient {
  client: reqwest::Client,
  base_url: String,
}

impl GeminiClient {
  pub fn new(settings: &ProviderSettings, timeout: Duration) -> Result<Self, ProviderError> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| ProviderError::Transport(e.to_string()))?;
    Ok(Self { client, base_url: settings.base_url.trim_end_matches('/').to_string() })
  }

  #[instrument(level = "info", skip(self, credential, request), fields(model = %request.model, key = credential.position(), prompt_len = request.prompt.len()))]
  async fn generate_content(
    &self,
    credential: &Credential,
    request: ProviderRequest<'_>,
  ) -> Result<String, ProviderError> {
    let url = format!("{}/models/{}:generateContent", self.base_url, request.model);
    let body = GenerateContentRequest {
      contents: vec![Content { role: "user", parts: vec![PartReq { text: request.prompt }] }],
      generation_config: request.config,
    };

    let start = Instant::now();
    let res = self.client.post(&url)
      .header(USER_AGENT, "quizgen-backend/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header("x-goog-api-key", credential.secret())
      .json(&body).send().await
      .map_err(|e| {
        if e.is_timeout() {
          ProviderError::Timeout(start.elapsed())
        } else {
          ProviderError::Transport(e.to_string())
        }
      })?;

    let status = res.status();
    if !status.is_success() {
      let body = res.text().await.unwrap_or_default();
      let err = classify_failure(status, &body);
      warn!(%status, elapsed = ?start.elapsed(), error = %err, "Provider call failed");
      return Err(err);
    }

    let body: GenerateContentResponse = res.json().await
      .map_err(|e| ProviderError::Transport(format!("response decode error: {e}")))?;
    if let Some(usage) = &body.usage_metadata {
      info!(prompt_tokens = ?usage.prompt_token_count, candidate_tokens = ?usage.candidates_token_count, total_tokens = ?usage.total_token_count, "Provider usage");
    }

    let text: String = body.candidates.into_iter()
      .next()
      .and_then(|c| c.content)
      .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect::<Vec<_>>().join(""))
      .unwrap_or_default();

    if text.trim().is_empty() {
      return Err(ProviderError::EmptyResponse);
    }
    debug!(elapsed = ?start.elapsed(), response_len = text.len(), "Provider response received");
    Ok(text)
  }
}

impl Provider for GeminiClient {
  fn generate<'a>(
    &'a self,
    credential: &'a Credential,
    request: ProviderRequest<'a>,
  ) -> BoxFuture<'a, Result<String, ProviderError>> {
    Box::pin(self.generate_content(credential, request))
  }
}

/// Map a non-success HTTP response onto the failure classes the generator cares about.
pub fn classify_failure(status: StatusCode, body: &str) -> ProviderError {
  let message = extract_provider_error(body).unwrap_or_else(|| trunc_for_log(body, 300));
  let upper = body.to_ascii_uppercase();

  let auth = status == StatusCode::UNAUTHORIZED
    || status == StatusCode::FORBIDDEN
    || upper.contains("API_KEY_INVALID")
    || upper.contains("API KEY NOT VALID")
    || upper.contains("PERMISSION_DENIED");
  if auth {
    return ProviderError::Authentication(message);
  }

  if status == StatusCode::TOO_MANY_REQUESTS || upper.contains("RESOURCE_EXHAUSTED") {
    return ProviderError::RateLimited(message);
  }

  ProviderError::Status { status: status.as_u16(), message }
}

/// Try to extract a clean error message from a Google API error body.
fn extract_provider_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap { error: EObj }
  #[derive(Deserialize)]
  struct EObj { message: String }
  serde_json::from_str::<EWrap>(body).ok().map(|w| w.error.message)
}

// --- generateContent DTOs ---

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
  contents: Vec<Content<'a>>,
  generation_config: &'a GenerationConfig,
}
#[derive(Serialize)]
struct Content<'a> { role: &'static str, parts: Vec<PartReq<'a>> }
#[derive(Serialize)]
struct PartReq<'a> { text: &'a str }

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
  #[serde(default)] candidates: Vec<CandidateResp>,
  #[serde(default)] usage_metadata: Option<UsageMetadata>,
}
#[derive(Deserialize)]
struct CandidateResp { #[serde(default)] content: Option<ContentResp> }
#[derive(Deserialize)]
struct ContentResp { #[serde(default)] parts: Vec<PartResp> }
#[derive(Deserialize)]
struct PartResp { #[serde(default)] text: Option<String> }
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
  #[serde(default)] prompt_token_count: Option<u32>,
  #[serde(default)] candidates_token_count: Option<u32>,
  #[serde(default)] total_token_count: Option<u32>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn invalid_key_is_authentication() {
    let body = r#"{"error":{"code":400,"message":"API key not valid. Please pass a valid API key.","status":"INVALID_ARGUMENT","details":[{"reason":"API_KEY_INVALID"}]}}"#;
    let err = classify_failure(StatusCode::BAD_REQUEST, body);
    assert_eq!(err, ProviderError::Authentication("API key not valid. Please pass a valid API key.".into()));
    assert!(matches!(classify_failure(StatusCode::FORBIDDEN, ""), ProviderError::Authentication(_)));
  }

  #[test]
  fn quota_is_rate_limited() {
    let body = r#"{"error":{"code":429,"message":"Resource has been exhausted (e.g. check quota).","status":"RESOURCE_EXHAUSTED"}}"#;
    assert!(matches!(classify_failure(StatusCode::TOO_MANY_REQUESTS, body), ProviderError::RateLimited(_)));
    let body = r#"{"error":{"code":400,"message":"Quota project header is malformed.","status":"INVALID_ARGUMENT"}}"#;
    assert!(matches!(classify_failure(StatusCode::BAD_REQUEST, body), ProviderError::Status { status: 400, .. }));
  }

  #[test]
  fn other_statuses_keep_code() {
    let err = classify_failure(StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded");
    assert_eq!(err, ProviderError::Status { status: 500, message: "upstream exploded".into() });
  }

  #[test]
  fn request_body_uses_camel_case_generation_config() {
    let config = GenerationConfig::from(&GenerationSettings::default());
    let body = GenerateContentRequest {
      contents: vec![Content { role: "user", parts: vec![PartReq { text: "hi" }] }],
      generation_config: &config,
    };
    let v = serde_json::to_value(&body).unwrap();
    assert_eq!(v["generationConfig"]["topK"], 40);
    assert_eq!(v["generationConfig"]["maxOutputTokens"], 8192);
    assert_eq!(v["contents"][0]["parts"][0]["text"], "hi");
  }

  #[test]
  fn response_text_parts_are_joined() {
    let raw = r#"{"candidates":[{"content":{"parts":[{"text":"[{\"q\":"},{"text":"1}]"}]}}],"usageMetadata":{"totalTokenCount":9}}"#;
    let parsed: GenerateContentResponse = serde_json::from_str(raw).unwrap();
    let text: String = parsed.candidates.into_iter().next()
      .and_then(|c| c.content)
      .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect::<Vec<_>>().join(""))
      .unwrap_or_default();
    assert_eq!(text, r#"[{"q":1}]"#);
    assert_eq!(parsed.usage_metadata.and_then(|u| u.total_token_count), Some(9));
  }
}

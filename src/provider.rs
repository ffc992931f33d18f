//! Vision-provider boundary: the one seam where network I/O happens.
//!
//! The core pipeline treats the vision model as an untrusted collaborator:
//! it hands over an encoded page image and two prompts, and gets back raw
//! text that *should* be a JSON object but is not guaranteed to be valid —
//! everything downstream of this trait assumes the reply needs the full
//! recovery cascade.
//!
//! [`GeminiProvider`] is the thin built-in implementation over the
//! `generateContent` REST endpoint. Tests inject their own
//! [`VisionProvider`] via [`crate::config::ExtractionConfigBuilder::provider`]
//! and never touch the network.

use crate::error::ExtractError;
use crate::output::UsageStats;
use crate::pipeline::encode::EncodedPage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Default Gemini model, matching the cheapest vision-capable tier.
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

const GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// One vision request: a page image plus the instruction prompts.
#[derive(Debug)]
pub struct VisionRequest<'a> {
    pub page: &'a EncodedPage,
    pub system_prompt: &'a str,
    pub user_prompt: &'a str,
    pub temperature: f32,
    pub max_tokens: usize,
}

/// Raw reply from a vision call: untrusted text plus usage counters.
#[derive(Debug, Clone, Default)]
pub struct VisionReply {
    pub text: String,
    pub usage: UsageStats,
}

/// A vision model that can describe a bill page.
///
/// Implementations must be `Send + Sync`; pages are processed concurrently
/// and share one provider behind an `Arc`.
#[async_trait]
pub trait VisionProvider: Send + Sync {
    /// Send one page to the model and return its raw textual reply.
    async fn describe(&self, req: VisionRequest<'_>) -> Result<VisionReply, ExtractError>;

    /// Short provider name for logs and error messages.
    fn name(&self) -> &str {
        "vision"
    }
}

/// Google Gemini vision provider over the `generateContent` REST API.
pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

// Manual impl: the API key must never land in logs or panic messages.
impl fmt::Debug for GeminiProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiProvider")
            .field("model", &self.model)
            .field("api_key", &"<redacted>")
            .finish_non_exhaustive()
    }
}

impl GeminiProvider {
    /// Create a provider with an explicit API key and model.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    /// Create a provider from the `GEMINI_API_KEY` environment variable.
    pub fn from_env(model: Option<&str>) -> Result<Self, ExtractError> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ExtractError::ProviderNotConfigured {
                provider: "gemini".into(),
                hint: "Set GEMINI_API_KEY, or inject a provider via \
                       ExtractionConfig::builder().provider(..)."
                    .into(),
            })?;
        Ok(Self::new(api_key, model.unwrap_or(DEFAULT_MODEL)))
    }

    /// The configured model identifier.
    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl VisionProvider for GeminiProvider {
    async fn describe(&self, req: VisionRequest<'_>) -> Result<VisionReply, ExtractError> {
        let body = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![
                    Part::InlineData {
                        inline_data: InlineData {
                            mime_type: req.page.mime_type.to_string(),
                            data: req.page.data.clone(),
                        },
                    },
                    Part::Text {
                        text: req.user_prompt.to_string(),
                    },
                ],
            }],
            system_instruction: SystemInstruction {
                parts: vec![Part::Text {
                    text: req.system_prompt.to_string(),
                }],
            },
            generation_config: GenerationConfig {
                temperature: req.temperature,
                top_p: 1.0,
                top_k: 1,
                max_output_tokens: req.max_tokens,
            },
        };

        let url = format!(
            "{GEMINI_ENDPOINT}/{}:generateContent?key={}",
            self.model, self.api_key
        );

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ExtractError::VisionApi {
                message: format!("request failed: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ExtractError::VisionApi {
                message: format!("HTTP {status}: {detail}"),
            });
        }

        let reply: GenerateContentResponse =
            response.json().await.map_err(|e| ExtractError::VisionApi {
                message: format!("invalid response body: {e}"),
            })?;

        let text: String = reply
            .candidates
            .first()
            .map(|c| {
                c.content
                    .parts
                    .iter()
                    .filter_map(|p| match p {
                        Part::Text { text } => Some(text.as_str()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        let usage = UsageStats {
            input_tokens: reply.usage_metadata.prompt_token_count,
            output_tokens: reply.usage_metadata.candidates_token_count,
            calls: 1,
        };

        debug!(
            model = %self.model,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            reply_len = text.len(),
            "gemini reply received"
        );

        Ok(VisionReply { text, usage })
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

// ── Wire types ───────────────────────────────────────────────────────────

#[derive(Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(rename = "systemInstruction")]
    system_instruction: SystemInstruction,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData", alias = "inline_data")]
        inline_data: InlineData,
    },
}

#[derive(Serialize, Deserialize)]
struct InlineData {
    #[serde(rename = "mimeType", alias = "mime_type")]
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "topP")]
    top_p: f32,
    #[serde(rename = "topK")]
    top_k: u32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: usize,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata", default)]
    usage_metadata: UsageMetadata,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: CandidateContent,
}

#[derive(Deserialize, Default)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize, Default)]
struct UsageMetadata {
    #[serde(rename = "promptTokenCount", default)]
    prompt_token_count: u64,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: u64,
}

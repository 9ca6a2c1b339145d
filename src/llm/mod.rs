//! Model invocation layer
//!
//! A unified [`Provider`] trait over chat-completion backends, the Groq
//! production implementation, and the per-model specification table (ids,
//! sampling parameters, context windows, rate limits).

pub mod rate_limit;

pub use rate_limit::ModelRateLimiter;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde_json::{Value, json};
use std::time::Duration;
use thiserror::Error;

use crate::config::CONFIG;

/// Chat message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Message content: plain text or multimodal parts (text + images).
#[derive(Debug, Clone)]
pub enum Content {
    Text(String),
    Parts(Vec<Part>),
}

#[derive(Debug, Clone)]
pub enum Part {
    Text { text: String },
    ImageUrl { url: String },
}

impl Content {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text(t) => Some(t),
            Content::Parts(_) => None,
        }
    }

    /// Concatenated text portions (images contribute nothing).
    pub fn text_lossy(&self) -> String {
        match self {
            Content::Text(t) => t.clone(),
            Content::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    Part::Text { text } => Some(text.as_str()),
                    Part::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    pub role: Role,
    pub content: Content,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self { role: Role::System, content: Content::Text(text.into()) }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, content: Content::Text(text.into()) }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: Content::Text(text.into()) }
    }

    /// User message carrying a prompt plus one base64 JPEG image.
    pub fn user_with_image(text: impl Into<String>, image_base64: &str) -> Self {
        Self {
            role: Role::User,
            content: Content::Parts(vec![
                Part::Text { text: text.into() },
                Part::ImageUrl { url: format!("data:image/jpeg;base64,{image_base64}") },
            ]),
        }
    }
}

/// Errors from a model invocation, classified so callers can map them to
/// the fixed user-facing messages.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("413 Request too large: {0}")]
    PayloadTooLarge(String),
    #[error("rate_limit exceeded: {0}")]
    RateLimited(String),
    #[error("context_length_exceeded: {0}")]
    ContextLengthExceeded(String),
    #[error("API error: {0}")]
    Api(String),
    #[error("transport error: {0}")]
    Transport(String),
}

/// Unified provider trait for chat-completion backends.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Single non-streaming completion. Caller handles budget/rate checks
    /// before calling and usage recording after.
    async fn complete(&self, messages: &[Message], model: &str) -> Result<String, LlmError>;

    /// Provider name for logging.
    fn name(&self) -> &'static str;
}

/// Specification for one model: upstream id, sampling parameters, and the
/// rate-limit envelope of the hosting API.
#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub name: &'static str,
    pub id: &'static str,
    pub temperature: f64,
    pub max_tokens: u32,
    pub context_length: u32,
    pub rpm: u32,
    pub rpd: u32,
    pub tpm: u64,
    pub tpd: u64,
}

pub static MODEL_SPECS: Lazy<Vec<ModelSpec>> = Lazy::new(|| {
    vec![
        ModelSpec {
            name: "kimi-k2",
            id: "moonshotai/kimi-k2-instruct-0905",
            temperature: 0.0,
            max_tokens: 16384,
            context_length: 262_144,
            rpm: 60,
            rpd: 1000,
            tpm: 10_000,
            tpd: 300_000,
        },
        ModelSpec {
            name: "llama-4-maverick",
            id: "meta-llama/llama-4-maverick-17b-128e-instruct",
            temperature: 0.0,
            max_tokens: 8192,
            context_length: 128_000,
            rpm: 30,
            rpd: 1000,
            tpm: 6_000,
            tpd: 500_000,
        },
        ModelSpec {
            name: "llama-4-scout",
            id: "meta-llama/llama-4-scout-17b-16e-instruct",
            temperature: 0.0,
            max_tokens: 8192,
            context_length: 128_000,
            rpm: 30,
            rpd: 1000,
            tpm: 30_000,
            tpd: 500_000,
        },
        ModelSpec {
            name: "qwen3-32b",
            id: "qwen/qwen3-32b",
            temperature: 0.0,
            max_tokens: 8192,
            context_length: 32_768,
            rpm: 60,
            rpd: 1000,
            tpm: 6_000,
            tpd: 500_000,
        },
        ModelSpec {
            name: "gpt-oss-120b",
            id: "openai/gpt-oss-120b",
            temperature: 0.0,
            max_tokens: 8192,
            context_length: 128_000,
            rpm: 30,
            rpd: 1000,
            tpm: 8_000,
            tpd: 200_000,
        },
        // Not a chat model, but tracked through the same rate-limit table
        ModelSpec {
            name: "wolfram",
            id: "wolfram-alpha-api",
            temperature: 0.0,
            max_tokens: 0,
            context_length: 0,
            rpm: 30,
            rpd: 2000,
            tpm: 100_000,
            tpd: 1_000_000,
        },
    ]
});

pub fn model_spec(name: &str) -> Option<&'static ModelSpec> {
    MODEL_SPECS.iter().find(|s| s.name == name)
}

/// Groq chat-completions client (OpenAI-compatible endpoint).
#[derive(Clone)]
pub struct GroqProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GroqProvider {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            client,
            api_key: CONFIG.groq_api_key.clone(),
            base_url: CONFIG.groq_base_url.clone(),
        })
    }

    fn serialize_messages(messages: &[Message]) -> Vec<Value> {
        messages
            .iter()
            .map(|m| {
                let content = match &m.content {
                    Content::Text(t) => json!(t),
                    Content::Parts(parts) => json!(
                        parts
                            .iter()
                            .map(|p| match p {
                                Part::Text { text } => json!({"type": "text", "text": text}),
                                Part::ImageUrl { url } => {
                                    json!({"type": "image_url", "image_url": {"url": url}})
                                }
                            })
                            .collect::<Vec<_>>()
                    ),
                };
                json!({"role": m.role.as_str(), "content": content})
            })
            .collect()
    }
}

#[async_trait]
impl Provider for GroqProvider {
    async fn complete(&self, messages: &[Message], model: &str) -> Result<String, LlmError> {
        let spec = model_spec(model)
            .ok_or_else(|| LlmError::Api(format!("Unknown model: {model}")))?;

        let payload = json!({
            "model": spec.id,
            "messages": Self::serialize_messages(messages),
            "temperature": spec.temperature,
            "max_tokens": spec.max_tokens,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url.trim_end_matches('/')))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&payload)
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(match status.as_u16() {
                413 => LlmError::PayloadTooLarge(body),
                429 => LlmError::RateLimited(body),
                _ if body.contains("context_length_exceeded") => {
                    LlmError::ContextLengthExceeded(body)
                }
                _ if body.contains("rate_limit") || body.contains("TPM") => {
                    LlmError::RateLimited(body)
                }
                _ => LlmError::Api(format!("{status}: {body}")),
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;
        body["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.trim().to_string())
            .ok_or_else(|| LlmError::Api("No content in model response".to_string()))
    }

    fn name(&self) -> &'static str {
        "groq"
    }
}

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use serde::Serialize;

use crate::prompt;

/// One structured-extraction request: the chunk's text split into background
/// and focus regions, plus the optional rolling summary carried from the
/// previous chunk.
#[derive(Debug, Clone)]
pub struct CapabilityRequest {
    pub extraction_goal: String,
    pub context_before: String,
    pub core_text: String,
    pub context_after: String,
    pub rolling_summary: Option<String>,
    /// Set after a schema failure to steer the next attempt.
    pub corrective_note: Option<String>,
}

/// Failure classes are distinct so the stage processor can apply a different
/// retry policy to each.
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("transport failure: {reason}")]
    Transport { reason: String },

    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("schema violation: {reason}")]
    Schema { reason: String, raw: String },
}

/// External reasoning capability: given a prompt and a required schema,
/// return a structured JSON result or a typed failure.
#[async_trait]
pub trait ReasoningCapability: Send + Sync {
    async fn extract(
        &self,
        request: &CapabilityRequest,
    ) -> Result<serde_json::Value, CapabilityError>;
}

/// OpenAI-compatible chat-completions client forcing JSON output.
pub struct ChatCompletionsClient {
    api_url: String,
    model: String,
    api_key: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format: &'static str,
}

impl ChatCompletionsClient {
    pub fn new(api_url: String, model: String, api_key: String) -> Self {
        Self {
            api_url,
            model,
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ReasoningCapability for ChatCompletionsClient {
    async fn extract(
        &self,
        request: &CapabilityRequest,
    ) -> Result<serde_json::Value, CapabilityError> {
        let system_prompt = prompt::build_system_prompt(&request.extraction_goal);
        let user_prompt = prompt::build_user_prompt(request);

        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &user_prompt,
                },
            ],
            temperature: 0.1,
            response_format: ResponseFormat {
                format: "json_object",
            },
        };

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| CapabilityError::Transport {
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(CapabilityError::RateLimited { retry_after });
        }
        if !status.is_success() {
            return Err(CapabilityError::Transport {
                reason: format!("status {}", status),
            });
        }

        let envelope: serde_json::Value =
            response
                .json()
                .await
                .map_err(|e| CapabilityError::Transport {
                    reason: e.to_string(),
                })?;

        let content = envelope["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| CapabilityError::Schema {
                reason: "response has no message content".to_string(),
                raw: envelope.to_string(),
            })?;

        serde_json::from_str(content).map_err(|e| CapabilityError::Schema {
            reason: format!("content is not valid JSON: {}", e),
            raw: content.to_string(),
        })
    }
}

//! Ollama local provider.
//!
//! Talks to the native `/api/chat` endpoint. Tool calling is not required
//! to be supported by local models; when the response carries no tool
//! calls the agent engine simply proceeds without iteration.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use relayclaw_core::error::ProviderError;
use relayclaw_core::message::Message;
use relayclaw_core::provider::{ChatRequest, ChatResponse, Provider};

const DEFAULT_BASE_URL: &str = "http://localhost:11434";

pub struct OllamaProvider {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(base_url: &str, model: &str, timeout_s: u64) -> Self {
        let base = if base_url.is_empty() {
            DEFAULT_BASE_URL
        } else {
            base_url
        };
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_s))
            .build()
            .expect("reqwest client");
        Self {
            base_url: base.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client,
        }
    }

    fn to_api_messages(messages: &[Message]) -> Vec<serde_json::Value> {
        messages
            .iter()
            .map(|m| {
                serde_json::json!({
                    "role": m.role.to_string(),
                    "content": m.content,
                })
            })
            .collect()
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let url = format!("{}/api/chat", self.base_url);
        let body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "stream": false,
        });

        debug!(provider = "ollama", model = %request.model, "sending chat request");

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(e.to_string())
                } else {
                    ProviderError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        if status != 200 {
            let message = response.text().await.unwrap_or_default();
            warn!(status, body = %message, "ollama API error");
            return Err(ProviderError::Api { status, message });
        }

        let api: OllamaResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("parse failed: {e}")))?;

        Ok(ChatResponse {
            content: api.message.content,
            tool_calls: Vec::new(),
            usage: None,
            finish_reason: api.done_reason,
        })
    }
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    message: OllamaMessage,
    #[serde(default)]
    done_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
}

//! Provider trait — the abstraction over LLM backends.
//!
//! A Provider knows how to send a conversation to an LLM and get a response
//! back, either as a complete message or as a stream of content fragments.
//!
//! Implementations: OpenAI-compatible, Anthropic, Ollama.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::ProviderError;
use crate::message::{Message, MessageToolCall};

/// A chat completion request, provider-agnostic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// The model to use (e.g. "gpt-4o-mini", "claude-3-haiku-20240307")
    pub model: String,

    /// The conversation messages, system prompt first
    pub messages: Vec<Message>,

    /// Tools the model may call. Empty = no tool calling this turn.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Whether the caller intends to stream this request
    #[serde(default)]
    pub stream: bool,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            tools: Vec::new(),
            temperature: None,
            max_tokens: None,
            stream: false,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }
}

/// A tool definition sent to the LLM so it knows what it can call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A complete response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    /// The generated text content (may be empty when tool calls are present)
    pub content: String,

    /// Tool invocations the model requested, in emitted order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<MessageToolCall>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

impl ChatResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
            usage: None,
            finish_reason: None,
        }
    }
}

/// Callback receiving incremental content fragments during streaming.
pub type ChunkSink = Arc<dyn Fn(&str) + Send + Sync>;

/// The core Provider trait.
///
/// Every LLM backend implements this. The agent engine calls `chat()` or
/// `chat_stream()` without knowing which provider is behind it.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g. "openai", "anthropic").
    fn name(&self) -> &str;

    /// The model this provider is bound to.
    fn model(&self) -> &str;

    /// Send a request and block until a full response is materialized.
    async fn chat(&self, request: ChatRequest) -> std::result::Result<ChatResponse, ProviderError>;

    /// Send a request, delivering content fragments to `on_chunk` as they
    /// arrive, and return the assembled response when the stream ends.
    ///
    /// Default implementation calls `chat()` and delivers the content as a
    /// single fragment — correct for backends without streaming support.
    async fn chat_stream(
        &self,
        request: ChatRequest,
        on_chunk: ChunkSink,
    ) -> std::result::Result<ChatResponse, ProviderError> {
        let response = self.chat(request).await?;
        if !response.content.is_empty() {
            on_chunk(&response.content);
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProvider;

    #[async_trait]
    impl Provider for FixedProvider {
        fn name(&self) -> &str {
            "fixed"
        }
        fn model(&self) -> &str {
            "fixed-1"
        }
        async fn chat(
            &self,
            _request: ChatRequest,
        ) -> std::result::Result<ChatResponse, ProviderError> {
            Ok(ChatResponse::text("hello from fixed"))
        }
    }

    #[tokio::test]
    async fn default_stream_emits_single_chunk() {
        let provider = FixedProvider;
        let collected = Arc::new(std::sync::Mutex::new(String::new()));
        let sink = {
            let collected = collected.clone();
            Arc::new(move |chunk: &str| {
                collected.lock().unwrap().push_str(chunk);
            }) as ChunkSink
        };

        let resp = provider
            .chat_stream(ChatRequest::new("fixed-1", vec![Message::user("hi")]), sink)
            .await
            .unwrap();

        assert_eq!(resp.content, "hello from fixed");
        assert_eq!(*collected.lock().unwrap(), "hello from fixed");
    }

    #[test]
    fn request_builder() {
        let req = ChatRequest::new("m", vec![]).with_tools(vec![ToolDefinition {
            name: "grep".into(),
            description: "search".into(),
            parameters: serde_json::json!({"type": "object"}),
        }]);
        assert_eq!(req.tools.len(), 1);
        assert!(!req.stream);
        assert!(req.temperature.is_none());
    }

    #[test]
    fn tool_definition_serialization() {
        let def = ToolDefinition {
            name: "execute_command".into(),
            description: "Run a shell command".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": { "command": { "type": "string" } },
                "required": ["command"]
            }),
        };
        let json = serde_json::to_string(&def).unwrap();
        assert!(json.contains("execute_command"));
        assert!(json.contains("required"));
    }
}

//! Anthropic Messages API provider.
//!
//! Protocol differences handled here and nowhere else:
//! - `x-api-key` header (not Bearer) plus `anthropic-version`
//! - the first system message is lifted into a top-level `system` field
//! - tools are `{name, description, input_schema}`
//! - tool calls arrive as `content[]` blocks of `type: tool_use` and are
//!   translated back into the common shape, synthesizing an ID when the
//!   wire omits one
//! - streaming uses typed events (`content_block_delta`, `message_stop`)

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use relayclaw_core::error::ProviderError;
use relayclaw_core::message::{Message, MessageToolCall, Role};
use relayclaw_core::provider::{
    ChatRequest, ChatResponse, ChunkSink, Provider, ToolDefinition, Usage,
};

use crate::sse::{SseLine, SseLineBuffer};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicProvider {
    api_key: String,
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(api_key: &str, model: &str, timeout_s: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_s))
            .build()
            .expect("reqwest client");
        Self {
            api_key: api_key.to_string(),
            base_url: BASE_URL.to_string(),
            model: model.to_string(),
            client,
        }
    }

    /// Custom endpoint (tests, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Anthropic takes the system prompt as a top-level field, not a
    /// message. Multiple system messages concatenate.
    fn extract_system(messages: &[Message]) -> (Option<String>, Vec<&Message>) {
        let mut system_parts = Vec::new();
        let mut rest = Vec::new();
        for msg in messages {
            match msg.role {
                Role::System => system_parts.push(msg.content.as_str()),
                _ => rest.push(msg),
            }
        }
        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        };
        (system, rest)
    }

    fn to_api_messages(messages: &[&Message]) -> Vec<serde_json::Value> {
        let mut out = Vec::new();
        for msg in messages {
            match msg.role {
                Role::User => out.push(serde_json::json!({
                    "role": "user",
                    "content": msg.content,
                })),
                Role::Assistant => {
                    if msg.tool_calls.is_empty() {
                        out.push(serde_json::json!({
                            "role": "assistant",
                            "content": msg.content,
                        }));
                    } else {
                        let mut blocks = Vec::new();
                        if !msg.content.is_empty() {
                            blocks.push(serde_json::json!({
                                "type": "text",
                                "text": msg.content,
                            }));
                        }
                        for tc in &msg.tool_calls {
                            let input: serde_json::Value =
                                serde_json::from_str(&tc.arguments).unwrap_or_default();
                            blocks.push(serde_json::json!({
                                "type": "tool_use",
                                "id": tc.id,
                                "name": tc.name,
                                "input": input,
                            }));
                        }
                        out.push(serde_json::json!({
                            "role": "assistant",
                            "content": blocks,
                        }));
                    }
                }
                // Tool results travel as user-role text; the session keeps
                // them labelled "Tool: name" so the model can attribute them.
                Role::Tool => out.push(serde_json::json!({
                    "role": "user",
                    "content": msg.content,
                })),
                Role::System => {}
            }
        }
        out
    }

    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<serde_json::Value> {
        tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters,
                })
            })
            .collect()
    }

    fn build_body(&self, request: &ChatRequest, stream: bool) -> serde_json::Value {
        let (system, messages) = Self::extract_system(&request.messages);
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&messages),
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        });
        if stream {
            body["stream"] = serde_json::json!(true);
        }
        if let Some(system) = system {
            body["system"] = serde_json::json!(system);
        }
        if let Some(temperature) = request.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }
        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }
        body
    }

    async fn send(
        &self,
        body: &serde_json::Value,
        streaming: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let mut req = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json");
        if streaming {
            req = req.header("Accept", "text/event-stream");
        }

        let response = req.json(body).send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(e.to_string())
            } else {
                ProviderError::Unavailable(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        if status == 429 {
            return Err(ProviderError::RateLimited {
                retry_after_secs: 5,
            });
        }
        if status != 200 {
            let message = response.text().await.unwrap_or_default();
            warn!(status, body = %message, "anthropic API error");
            return Err(ProviderError::Api { status, message });
        }
        Ok(response)
    }

    fn translate(api: AnthropicResponse) -> ChatResponse {
        let mut content = String::new();
        let mut tool_calls = Vec::new();

        for block in api.content {
            match block {
                ResponseBlock::Text { text } => {
                    if !content.is_empty() {
                        content.push('\n');
                    }
                    content.push_str(&text);
                }
                ResponseBlock::ToolUse { id, name, input } => {
                    let id = if id.is_empty() {
                        format!("toolu_{}", uuid::Uuid::new_v4().simple())
                    } else {
                        id
                    };
                    tool_calls.push(MessageToolCall {
                        id,
                        name,
                        arguments: serde_json::to_string(&input).unwrap_or_default(),
                    });
                }
            }
        }

        ChatResponse {
            content,
            tool_calls,
            usage: Some(Usage {
                prompt_tokens: api.usage.input_tokens,
                completion_tokens: api.usage.output_tokens,
                total_tokens: api.usage.input_tokens + api.usage.output_tokens,
            }),
            finish_reason: api.stop_reason,
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        debug!(provider = "anthropic", model = %request.model, "sending completion request");
        let body = self.build_body(&request, false);
        let response = self.send(&body, false).await?;
        let api: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("parse failed: {e}")))?;
        Ok(Self::translate(api))
    }

    async fn chat_stream(
        &self,
        request: ChatRequest,
        on_chunk: ChunkSink,
    ) -> Result<ChatResponse, ProviderError> {
        debug!(provider = "anthropic", model = %request.model, "sending streaming request");
        let body = self.build_body(&request, true);
        let response = self.send(&body, true).await?;

        let mut byte_stream = response.bytes_stream();
        let mut lines = SseLineBuffer::new();
        let mut asm = AnthropicStreamAssembler::default();

        while let Some(chunk) = byte_stream.next().await {
            let bytes = chunk.map_err(|e| ProviderError::Unavailable(e.to_string()))?;
            for line in lines.push(&bytes) {
                match line {
                    SseLine::Event(event) if event == "message_stop" => {
                        return Ok(asm.finish());
                    }
                    SseLine::Event(_) => {}
                    SseLine::Data(data) => match serde_json::from_str::<serde_json::Value>(&data) {
                        Ok(event) => asm.apply(&event, &on_chunk),
                        Err(e) => {
                            trace!(data = %data, error = %e, "ignoring unparseable anthropic SSE");
                        }
                    },
                }
            }
        }

        Ok(asm.finish())
    }
}

/// Tracks the current tool_use block while deltas stream in.
#[derive(Default)]
struct AnthropicStreamAssembler {
    content: String,
    tool_calls: Vec<MessageToolCall>,
    current_tool: Option<MessageToolCall>,
    usage: Option<Usage>,
    stop_reason: Option<String>,
}

impl AnthropicStreamAssembler {
    fn apply(&mut self, event: &serde_json::Value, on_chunk: &ChunkSink) {
        match event["type"].as_str().unwrap_or("") {
            "content_block_start" => {
                let block = &event["content_block"];
                if block["type"].as_str() == Some("tool_use") {
                    self.flush_tool();
                    let id = block["id"].as_str().unwrap_or("").to_string();
                    self.current_tool = Some(MessageToolCall {
                        id: if id.is_empty() {
                            format!("toolu_{}", uuid::Uuid::new_v4().simple())
                        } else {
                            id
                        },
                        name: block["name"].as_str().unwrap_or("").to_string(),
                        arguments: String::new(),
                    });
                }
            }
            "content_block_delta" => match event["delta"]["type"].as_str().unwrap_or("") {
                "text_delta" => {
                    if let Some(text) = event["delta"]["text"].as_str() {
                        self.content.push_str(text);
                        on_chunk(text);
                    }
                }
                "input_json_delta" => {
                    if let (Some(tool), Some(partial)) = (
                        self.current_tool.as_mut(),
                        event["delta"]["partial_json"].as_str(),
                    ) {
                        tool.arguments.push_str(partial);
                    }
                }
                _ => {}
            },
            "content_block_stop" => self.flush_tool(),
            "message_delta" => {
                if let Some(reason) = event["delta"]["stop_reason"].as_str() {
                    self.stop_reason = Some(reason.to_string());
                }
                if let (Some(output), input) = (
                    event["usage"]["output_tokens"].as_u64(),
                    event["usage"]["input_tokens"].as_u64().unwrap_or(0),
                ) {
                    self.usage = Some(Usage {
                        prompt_tokens: input as u32,
                        completion_tokens: output as u32,
                        total_tokens: (input + output) as u32,
                    });
                }
            }
            _ => {}
        }
    }

    fn flush_tool(&mut self) {
        if let Some(tool) = self.current_tool.take() {
            self.tool_calls.push(tool);
        }
    }

    fn finish(mut self) -> ChatResponse {
        self.flush_tool();
        ChatResponse {
            content: self.content,
            tool_calls: self.tool_calls,
            usage: self.usage,
            finish_reason: self.stop_reason,
        }
    }
}

// --- wire types ---

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ResponseBlock>,
    usage: AnthropicUsage,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text {
        text: String,
    },
    ToolUse {
        #[serde(default)]
        id: String,
        name: String,
        input: serde_json::Value,
    },
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn system_lifted_to_top_level() {
        let messages = vec![
            Message::system("be helpful"),
            Message::system("be brief"),
            Message::user("hi"),
        ];
        let (system, rest) = AnthropicProvider::extract_system(&messages);
        assert_eq!(system.as_deref(), Some("be helpful\n\nbe brief"));
        assert_eq!(rest.len(), 1);
    }

    #[test]
    fn no_system_is_none() {
        let messages = vec![Message::user("hi")];
        let (system, rest) = AnthropicProvider::extract_system(&messages);
        assert!(system.is_none());
        assert_eq!(rest.len(), 1);
    }

    #[test]
    fn body_shape() {
        let p = AnthropicProvider::new("k", "claude-3-haiku-20240307", 60);
        let req = ChatRequest::new(
            "claude-3-haiku-20240307",
            vec![Message::system("sys"), Message::user("hi")],
        )
        .with_tools(vec![ToolDefinition {
            name: "grep".into(),
            description: "search".into(),
            parameters: serde_json::json!({"type": "object"}),
        }]);

        let body = p.build_body(&req, false);
        assert_eq!(body["system"], "sys");
        assert_eq!(body["max_tokens"], 4096);
        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
        assert!(body.get("stream").is_none());
        // System message not duplicated into messages.
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn assistant_tool_calls_become_tool_use_blocks() {
        let msg = Message::assistant_with_tool_calls(
            "checking",
            vec![MessageToolCall {
                id: "toolu_1".into(),
                name: "read_file".into(),
                arguments: r#"{"path":"x"}"#.into(),
            }],
        );
        let api = AnthropicProvider::to_api_messages(&[&msg]);
        let blocks = api[0]["content"].as_array().unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0]["type"], "text");
        assert_eq!(blocks[1]["type"], "tool_use");
        assert_eq!(blocks[1]["input"]["path"], "x");
    }

    #[test]
    fn tool_messages_travel_as_user_role() {
        let msg = Message::tool_result("grep", "no matches");
        let api = AnthropicProvider::to_api_messages(&[&msg]);
        assert_eq!(api[0]["role"], "user");
        assert!(api[0]["content"].as_str().unwrap().contains("no matches"));
    }

    #[test]
    fn translate_text_response() {
        let api: AnthropicResponse = serde_json::from_str(
            r#"{
                "content": [{"type": "text", "text": "Hello!"}],
                "usage": {"input_tokens": 10, "output_tokens": 5},
                "stop_reason": "end_turn"
            }"#,
        )
        .unwrap();
        let resp = AnthropicProvider::translate(api);
        assert_eq!(resp.content, "Hello!");
        assert!(resp.tool_calls.is_empty());
        assert_eq!(resp.usage.unwrap().total_tokens, 15);
    }

    #[test]
    fn translate_tool_use_response() {
        let api: AnthropicResponse = serde_json::from_str(
            r#"{
                "content": [
                    {"type": "text", "text": "Let me check"},
                    {"type": "tool_use", "id": "toolu_abc", "name": "read_file",
                     "input": {"path": "x.txt"}}
                ],
                "usage": {"input_tokens": 20, "output_tokens": 10},
                "stop_reason": "tool_use"
            }"#,
        )
        .unwrap();
        let resp = AnthropicProvider::translate(api);
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].id, "toolu_abc");
        let args: serde_json::Value =
            serde_json::from_str(&resp.tool_calls[0].arguments).unwrap();
        assert_eq!(args["path"], "x.txt");
    }

    #[test]
    fn missing_tool_use_id_synthesized() {
        let api: AnthropicResponse = serde_json::from_str(
            r#"{
                "content": [{"type": "tool_use", "name": "grep", "input": {}}],
                "usage": {"input_tokens": 1, "output_tokens": 1}
            }"#,
        )
        .unwrap();
        let resp = AnthropicProvider::translate(api);
        assert!(resp.tool_calls[0].id.starts_with("toolu_"));
    }

    #[test]
    fn stream_assembles_text_and_tool_use() {
        let collected = Arc::new(std::sync::Mutex::new(String::new()));
        let sink: ChunkSink = {
            let collected = collected.clone();
            Arc::new(move |c: &str| collected.lock().unwrap().push_str(c))
        };

        let mut asm = AnthropicStreamAssembler::default();
        let events = [
            r#"{"type":"content_block_delta","delta":{"type":"text_delta","text":"Hi "}}"#,
            r#"{"type":"content_block_delta","delta":{"type":"text_delta","text":"there"}}"#,
            r#"{"type":"content_block_start","content_block":{"type":"tool_use","id":"toolu_9","name":"grep"}}"#,
            r#"{"type":"content_block_delta","delta":{"type":"input_json_delta","partial_json":"{\"pat"}}"#,
            r#"{"type":"content_block_delta","delta":{"type":"input_json_delta","partial_json":"tern\":\"x\"}"}}"#,
            r#"{"type":"content_block_stop"}"#,
        ];
        for e in events {
            asm.apply(&serde_json::from_str(e).unwrap(), &sink);
        }

        let resp = asm.finish();
        assert_eq!(resp.content, "Hi there");
        assert_eq!(*collected.lock().unwrap(), "Hi there");
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].arguments, r#"{"pattern":"x"}"#);
    }

    #[test]
    fn stream_usage_from_message_delta() {
        let sink: ChunkSink = Arc::new(|_| {});
        let mut asm = AnthropicStreamAssembler::default();
        asm.apply(
            &serde_json::from_str(
                r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"input_tokens":4,"output_tokens":6}}"#,
            )
            .unwrap(),
            &sink,
        );
        let resp = asm.finish();
        assert_eq!(resp.usage.unwrap().total_tokens, 10);
        assert_eq!(resp.finish_reason.as_deref(), Some("end_turn"));
    }
}

//! Message domain types.
//!
//! These are the core value objects that flow through the system:
//! a user sends a message → a channel adapter normalizes it → the agent
//! engine processes it → the provider generates a response.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions (agent prompt, environment, memory context)
    System,
    /// The end user
    User,
    /// The AI assistant
    Assistant,
    /// Tool execution result
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// A single message in a session. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Who sent this message
    pub role: Role,

    /// The text content
    pub content: String,

    /// When the message was appended
    pub timestamp: DateTime<Utc>,

    /// Tool calls requested by the assistant (if any)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<MessageToolCall>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            tool_calls: Vec::new(),
        }
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create an assistant message carrying tool calls. Content is the
    /// (possibly empty) text the model produced alongside the calls.
    pub fn assistant_with_tool_calls(
        content: impl Into<String>,
        tool_calls: Vec<MessageToolCall>,
    ) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
            tool_calls,
        }
    }

    /// Create a tool result message labelled with the tool's name.
    pub fn tool_result(tool_name: &str, outcome: &str) -> Self {
        Self::new(Role::Tool, format!("Tool: {tool_name}\nResult: {outcome}"))
    }
}

/// A tool call embedded in an assistant message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageToolCall {
    /// Unique ID for this tool call (matches the provider's tool_call id)
    pub id: String,

    /// Name of the tool to invoke
    pub name: String,

    /// Arguments as a raw JSON string, exactly as the model produced them
    pub arguments: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_shape() {
        let msg = Message::user("hello there");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "hello there");
        assert!(msg.tool_calls.is_empty());
    }

    #[test]
    fn tool_result_is_labelled() {
        let msg = Message::tool_result("read_file", "abc");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.content, "Tool: read_file\nResult: abc");
    }

    #[test]
    fn assistant_with_calls_keeps_order() {
        let calls = vec![
            MessageToolCall {
                id: "call_1".into(),
                name: "grep".into(),
                arguments: r#"{"pattern":"x"}"#.into(),
            },
            MessageToolCall {
                id: "call_2".into(),
                name: "read_file".into(),
                arguments: r#"{"path":"a.txt"}"#.into(),
            },
        ];
        let msg = Message::assistant_with_tool_calls("", calls);
        assert_eq!(msg.tool_calls.len(), 2);
        assert_eq!(msg.tool_calls[0].name, "grep");
        assert_eq!(msg.tool_calls[1].name, "read_file");
    }

    #[test]
    fn role_serializes_lowercase() {
        let json = serde_json::to_string(&Role::Assistant).unwrap();
        assert_eq!(json, "\"assistant\"");
    }

    #[test]
    fn message_serialization_roundtrip() {
        let msg = Message::user("roundtrip me");
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back.content, "roundtrip me");
        assert_eq!(back.role, Role::User);
    }
}

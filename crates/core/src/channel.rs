//! Channel trait — the abstraction over messaging platforms.
//!
//! A Channel connects relayclaw to a messaging service (Telegram, Discord,
//! Feishu). Adapters verify authenticity and the sender allow-list before
//! emitting a normalized `InboundMessage`; replies go back out through
//! `send`, truncated to the platform's per-message limit.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ChannelError;

/// A normalized inbound message, produced by a channel adapter after the
/// authenticity and authorization checks have passed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Channel name ("telegram", "discord", "feishu")
    pub channel: String,

    /// Platform-specific sender identifier
    pub sender_id: String,

    /// Human-readable sender name, if the platform supplies one
    #[serde(default)]
    pub sender_name: String,

    /// The text content
    pub content: String,

    /// The chat/conversation the reply must be delivered to
    pub chat_id: String,
}

/// The core Channel trait.
///
/// Implementations handle platform-specific transport (long-poll, webhook),
/// message formatting, and the sender allow-list.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Channel name (e.g. "telegram").
    fn name(&self) -> &str;

    /// The platform's per-message length cap, in bytes.
    fn max_message_len(&self) -> usize;

    /// Start receiving. Returns a receiver of normalized inbound messages;
    /// the adapter runs its transport (polling loop or webhook feed)
    /// internally.
    async fn start(&self) -> std::result::Result<mpsc::Receiver<InboundMessage>, ChannelError>;

    /// Deliver a reply to a chat, truncating to the platform cap.
    async fn send(&self, chat_id: &str, text: &str) -> std::result::Result<(), ChannelError>;

    /// Allow-list check. Empty list denies all senders.
    fn is_allowed(&self, sender_id: &str) -> bool;

    /// Stop the channel gracefully.
    async fn stop(&self) -> std::result::Result<(), ChannelError> {
        Ok(())
    }

    /// Health check — is the channel connected and operational?
    async fn health_check(&self) -> std::result::Result<bool, ChannelError> {
        Ok(true)
    }
}

/// Truncate `text` to at most `max` bytes, appending `...` when cut.
/// Respects char boundaries so the cut never splits a code point.
pub fn truncate_reply(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max.saturating_sub(3);
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_untouched() {
        assert_eq!(truncate_reply("hello", 4096), "hello");
    }

    #[test]
    fn long_text_truncated_with_ellipsis() {
        let text = "x".repeat(5000);
        let out = truncate_reply(&text, 4096);
        assert_eq!(out.len(), 4096);
        assert!(out.ends_with("..."));
    }

    #[test]
    fn exact_limit_untouched() {
        let text = "y".repeat(2000);
        assert_eq!(truncate_reply(&text, 2000), text);
    }

    #[test]
    fn multibyte_boundary_respected() {
        // Each '日' is 3 bytes; cutting mid-character must not panic.
        let text = "日".repeat(2000);
        let out = truncate_reply(&text, 100);
        assert!(out.len() <= 100);
        assert!(out.ends_with("..."));
    }

    #[test]
    fn inbound_message_roundtrip() {
        let msg = InboundMessage {
            channel: "telegram".into(),
            sender_id: "42".into(),
            sender_name: "alice".into(),
            content: "hello".into(),
            chat_id: "42".into(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: InboundMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.sender_id, "42");
        assert_eq!(back.channel, "telegram");
    }
}

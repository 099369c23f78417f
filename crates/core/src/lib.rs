//! # Relayclaw Core
//!
//! Domain types, traits, and error definitions for the relayclaw chat-bot
//! gateway. This crate has **zero framework dependencies** — it defines the
//! domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every subsystem boundary is a trait here (LLM provider, channel adapter,
//! tool). Implementations live in their respective crates. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod agent;
pub mod channel;
pub mod error;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use agent::AgentDefinition;
pub use channel::{Channel, InboundMessage};
pub use error::{ChannelError, Error, MemoryError, ProviderError, Result, ToolError};
pub use message::{Message, MessageToolCall, Role};
pub use provider::{ChatRequest, ChatResponse, ChunkSink, Provider, ToolDefinition, Usage};
pub use tool::{DangerAssessment, RiskLevel, Tool};

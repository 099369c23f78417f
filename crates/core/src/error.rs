//! Error types for the relayclaw domain.
//!
//! Uses `thiserror` for ergonomic error definitions. Each bounded context
//! has its own error enum, folded into the top-level `Error`.

use thiserror::Error;

/// The top-level error type for all relayclaw operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Unauthorized sender {sender_id} on {channel}")]
    Auth { channel: String, sender_id: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Transport-level failure: connect, DNS, broken stream.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// Non-200 status from the backend.
    #[error("API request failed: {message} (status: {status})")]
    Api { status: u16, message: String },

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// 200-class response whose body could not be understood.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("request cancelled")]
    Cancelled,
}

impl ProviderError {
    /// Transport faults and 5xx responses may be retried; everything else
    /// surfaces immediately. A fired deadline is never retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Unavailable(_) => true,
            ProviderError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel not configured: {0}")]
    NotConfigured(String),

    #[error("delivery failed on {channel}: {reason}")]
    DeliveryFailed { channel: String, reason: String },

    #[error("unauthorized sender {sender_id} on {channel}")]
    Unauthorized { channel: String, sender_id: String },

    #[error("invalid webhook payload: {0}")]
    InvalidPayload(String),

    #[error("channel connection lost: {0}")]
    ConnectionLost(String),
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool not found: {0}")]
    NotFound(String),

    #[error("invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("tool execution failed: {tool} — {reason}")]
    ExecutionFailed { tool: String, reason: String },

    /// The safety policy refused the operation outright.
    #[error("sandbox violation: {0}")]
    Sandbox(String),

    #[error("tool timed out: {tool} after {timeout_secs}s")]
    Timeout { tool: String, timeout_secs: u64 },

    /// A dangerous operation was not approved.
    #[error("operation rejected by user")]
    Rejected,
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("memory feature is not enabled")]
    Disabled,

    #[error("content too large (max {max} bytes)")]
    TooLarge { max: usize },

    #[error("storage error: {0}")]
    Storage(String),
}

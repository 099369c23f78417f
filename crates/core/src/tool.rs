//! Tool trait — the abstraction over agent capabilities.
//!
//! Tools are what let the model act in the world: read/write files, run
//! shell commands, query HTTP APIs. Implementations live in the tools
//! crate; the dispatcher there owns registration, sandboxing, timeouts,
//! and the dangerous-operation confirmation flow.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ToolError;
use crate::provider::ToolDefinition;

/// Risk classification for a dangerous operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskLevel::Medium => write!(f, "medium"),
            RiskLevel::High => write!(f, "high"),
            RiskLevel::Critical => write!(f, "critical"),
        }
    }
}

/// Why an invocation needs human approval before it may run.
#[derive(Debug, Clone)]
pub struct DangerAssessment {
    /// The operation text shown to the approver (e.g. the literal command)
    pub operation: String,
    /// Human-readable reason the operation was flagged
    pub details: String,
    pub risk: RiskLevel,
}

/// The core Tool trait.
///
/// Each tool (read_file, execute_command, web_search, ...) implements this.
/// Tools are registered once at startup, shared, re-entrant, and safe under
/// concurrent execution.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g. "read_file").
    fn name(&self) -> &str;

    /// What this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Inspect parsed arguments and report whether this invocation is
    /// dangerous. `Some` defers execution to the confirmation gate.
    /// Most tools are never dangerous.
    fn assess_danger(&self, _args: &serde_json::Value) -> Option<DangerAssessment> {
        None
    }

    /// Execute the tool with the given arguments; the returned text is
    /// appended to the session as a tool message.
    async fn execute(&self, args: serde_json::Value) -> std::result::Result<String, ToolError>;

    /// Convert this tool into a definition for the LLM request.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

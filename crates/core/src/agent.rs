//! Agent definition — a conversational persona.

use serde::{Deserialize, Serialize};

/// An agent combines a prompt template, a provider binding, and an optional
/// tool subset. Agents are created at startup from configuration; their
/// identity is stable for the process lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefinition {
    /// Stable identifier; part of the session key
    pub id: String,

    /// Display name
    pub name: String,

    /// System prompt template, expanded at turn time with environment,
    /// tool list, and memory context
    pub system_prompt: String,

    /// Tool names this agent may use. `None` = all enabled tools.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<String>>,
}

impl AgentDefinition {
    /// Whether this agent may use the named tool.
    pub fn allows_tool(&self, name: &str) -> bool {
        match &self.tools {
            None => true,
            Some(subset) => subset.iter().any(|t| t == name),
        }
    }
}

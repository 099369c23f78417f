//! The tool dispatcher.
//!
//! Registry of named tools plus the policy glue: definition filtering,
//! per-call deadline, and the dangerous-operation confirmation flow.
//! Tool failures are returned as errors for the engine to feed back to
//! the model; they never abort the turn.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use relayclaw_confirm::ConfirmationGate;
use relayclaw_core::error::{Error, ToolError};
use relayclaw_core::provider::ToolDefinition;
use relayclaw_core::tool::Tool;

pub struct Dispatcher {
    /// BTreeMap keeps `definitions()` output stable across runs.
    tools: BTreeMap<String, Arc<dyn Tool>>,
    enabled: HashMap<String, bool>,
    timeout: Duration,
    confirm_dangerous: bool,
    gate: Arc<ConfirmationGate>,
}

impl Dispatcher {
    pub fn new(
        enabled: HashMap<String, bool>,
        timeout: Duration,
        confirm_dangerous: bool,
        gate: Arc<ConfirmationGate>,
    ) -> Self {
        Self {
            tools: BTreeMap::new(),
            enabled,
            timeout,
            confirm_dangerous,
            gate,
        }
    }

    /// Register one tool. Tools disabled by configuration are skipped;
    /// a duplicate name is a fatal configuration error.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), Error> {
        let name = tool.name().to_string();

        if self.enabled.get(&name) == Some(&false) {
            info!(name, "tool disabled by config");
            return Ok(());
        }
        if self.tools.contains_key(&name) {
            return Err(Error::Config {
                message: format!("duplicate tool name: {name}"),
            });
        }

        info!(name, "tool registered");
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Tool definitions for an LLM request, filtered by the per-agent
    /// subset when one is configured.
    pub fn definitions(&self, agent_subset: Option<&[String]>) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .filter(|tool| match agent_subset {
                None => true,
                Some(subset) => subset.iter().any(|n| n == tool.name()),
            })
            .map(|tool| tool.to_definition())
            .collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    /// Execute a named tool under the safety policy.
    ///
    /// Dangerous invocations wait on the confirmation gate first (the gate
    /// applies the unattended-mode and always-allow bypasses itself); the
    /// verdict is never cached. The deadline wraps only the execution, so
    /// time spent waiting for an approver does not count against it.
    pub async fn execute(
        &self,
        name: &str,
        args: serde_json::Value,
    ) -> Result<String, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        debug!(name, "executing tool");

        if self.confirm_dangerous {
            if let Some(assessment) = tool.assess_danger(&args) {
                let approved = self
                    .gate
                    .request(
                        name,
                        &assessment.operation,
                        &assessment.details,
                        assessment.risk,
                    )
                    .await;
                if !approved {
                    warn!(name, operation = %assessment.operation, "operation not approved");
                    return Err(ToolError::Rejected);
                }
            }
        }

        // One second of grace beyond the configured timeout: process tools
        // enforce the same deadline internally so they can kill their child
        // and still return the accumulated output with a [TIMEOUT] marker.
        let deadline = self.timeout + Duration::from_secs(1);
        match tokio::time::timeout(deadline, tool.execute(args)).await {
            Ok(result) => {
                match &result {
                    Ok(_) => info!(name, "tool executed"),
                    Err(e) => warn!(name, error = %e, "tool execution failed"),
                }
                result
            }
            Err(_) => {
                warn!(name, timeout_secs = self.timeout.as_secs(), "tool timed out");
                Err(ToolError::Timeout {
                    tool: name.to_string(),
                    timeout_secs: self.timeout.as_secs(),
                })
            }
        }
    }
}

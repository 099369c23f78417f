//! execute_command — run a shell command inside the work directory.
//!
//! The command policy is applied in two layers: unquoted metacharacters
//! are refused before anything runs, and blocked/dangerous commands are
//! reported through `assess_danger` so the dispatcher can route them
//! through the confirmation gate. Output is combined stdout+stderr; on
//! deadline the child is killed and whatever accumulated is returned with
//! a `[TIMEOUT]` marker.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use relayclaw_core::error::ToolError;
use relayclaw_core::tool::{DangerAssessment, Tool};
use relayclaw_security::{CommandPolicy, CommandVerdict, Sandbox};

pub struct ExecuteCommandTool {
    sandbox: Sandbox,
    policy: CommandPolicy,
    timeout: Duration,
}

impl ExecuteCommandTool {
    pub fn new(sandbox: Sandbox, policy: CommandPolicy, timeout: Duration) -> Self {
        Self {
            sandbox,
            policy,
            timeout,
        }
    }
}

#[async_trait]
impl Tool for ExecuteCommandTool {
    fn name(&self) -> &str {
        "execute_command"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the work directory and return its output. Dangerous commands require confirmation."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The command to execute"
                }
            },
            "required": ["command"]
        })
    }

    fn assess_danger(&self, args: &serde_json::Value) -> Option<DangerAssessment> {
        let command = args["command"].as_str()?;
        match self.policy.check(command) {
            CommandVerdict::Blocked(entry) => Some(DangerAssessment {
                operation: command.to_string(),
                details: format!("command matches blocklist entry: {entry}"),
                risk: relayclaw_core::tool::RiskLevel::Critical,
            }),
            CommandVerdict::Dangerous => Some(DangerAssessment {
                operation: command.to_string(),
                details: "command matches a dangerous pattern".into(),
                risk: relayclaw_core::tool::RiskLevel::High,
            }),
            _ => None,
        }
    }

    async fn execute(&self, args: serde_json::Value) -> Result<String, ToolError> {
        let command = args["command"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("command is required".into()))?;

        if self.policy.check(command) == CommandVerdict::Injection {
            return Err(ToolError::Sandbox(
                "potential command injection detected".into(),
            ));
        }

        debug!(command, "executing shell command");
        run_with_deadline(command, self.sandbox.work_dir(), self.timeout).await
    }
}

/// Run `sh -c command` with cwd = work_dir. Combined stdout+stderr; on
/// deadline the process is killed and accumulated output is returned with
/// the `[TIMEOUT]` marker.
pub(crate) async fn run_with_deadline(
    command: &str,
    work_dir: &std::path::Path,
    deadline: Duration,
) -> Result<String, ToolError> {
    let mut child = tokio::process::Command::new("sh")
        .args(["-c", command])
        .current_dir(work_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ToolError::ExecutionFailed {
            tool: "execute_command".into(),
            reason: format!("failed to start command: {e}"),
        })?;

    // Readers append into a shared buffer so accumulated output survives
    // a deadline kill.
    let buffer = std::sync::Arc::new(tokio::sync::Mutex::new(Vec::<u8>::new()));

    let mut readers = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        readers.push(spawn_reader(stdout, buffer.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(spawn_reader(stderr, buffer.clone()));
    }

    match tokio::time::timeout(deadline, child.wait()).await {
        Ok(status) => {
            for reader in readers {
                let _ = reader.await;
            }
            let output = String::from_utf8_lossy(&buffer.lock().await).into_owned();

            match status {
                Ok(status) if status.success() => Ok(output),
                Ok(status) => {
                    let code = status.code().unwrap_or(-1);
                    warn!(command, exit_code = code, "command failed");
                    Ok(format!("[exit code: {code}]\n{output}"))
                }
                Err(e) => Err(ToolError::ExecutionFailed {
                    tool: "execute_command".into(),
                    reason: e.to_string(),
                }),
            }
        }
        Err(_) => {
            warn!(command, timeout_secs = deadline.as_secs(), "command timed out");
            let _ = child.kill().await;
            for reader in readers {
                reader.abort();
            }
            let output = String::from_utf8_lossy(&buffer.lock().await).into_owned();
            Ok(format!("{output}\n[TIMEOUT]"))
        }
    }
}

fn spawn_reader<R>(
    mut pipe: R,
    buffer: std::sync::Arc<tokio::sync::Mutex<Vec<u8>>>,
) -> tokio::task::JoinHandle<()>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; 4096];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => buffer.lock().await.extend_from_slice(&chunk[..n]),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use relayclaw_core::tool::RiskLevel;
    use tempfile::TempDir;

    fn tool(blocked: Vec<String>) -> (ExecuteCommandTool, TempDir) {
        let tmp = TempDir::new().unwrap();
        let sandbox = Sandbox::new(tmp.path().join("work")).unwrap();
        let tool = ExecuteCommandTool::new(
            sandbox,
            CommandPolicy::new(blocked),
            Duration::from_secs(5),
        );
        (tool, tmp)
    }

    #[tokio::test]
    async fn echo_runs() {
        let (tool, _tmp) = tool(vec![]);
        let out = tool
            .execute(serde_json::json!({"command": "echo hello"}))
            .await
            .unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[tokio::test]
    async fn cwd_is_work_dir() {
        let (tool, _tmp) = tool(vec![]);
        let out = tool
            .execute(serde_json::json!({"command": "pwd"}))
            .await
            .unwrap();
        assert!(out.trim().ends_with("work"));
    }

    #[tokio::test]
    async fn stderr_is_captured() {
        let (tool, _tmp) = tool(vec![]);
        let out = tool
            .execute(serde_json::json!({"command": "ls /definitely-not-here-xyz"}))
            .await
            .unwrap();
        assert!(out.contains("[exit code:"));
    }

    #[tokio::test]
    async fn injection_refused() {
        let (tool, _tmp) = tool(vec![]);
        let err = tool
            .execute(serde_json::json!({"command": "echo hi; rm -rf /"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Sandbox(_)));
    }

    #[tokio::test]
    async fn timeout_returns_marker() {
        let tmp = TempDir::new().unwrap();
        let sandbox = Sandbox::new(tmp.path().join("work")).unwrap();
        let tool = ExecuteCommandTool::new(
            sandbox,
            CommandPolicy::new(vec![]),
            Duration::from_millis(100),
        );
        let out = tool
            .execute(serde_json::json!({"command": "sleep 30"}))
            .await
            .unwrap();
        assert!(out.contains("[TIMEOUT]"));
    }

    #[test]
    fn dangerous_command_assessed_high() {
        let (tool, _tmp) = tool(vec![]);
        let assessment = tool
            .assess_danger(&serde_json::json!({"command": "rm -rf /tmp/stuff"}))
            .unwrap();
        assert_eq!(assessment.risk, RiskLevel::High);
        assert_eq!(assessment.operation, "rm -rf /tmp/stuff");
    }

    #[test]
    fn blocked_command_assessed_critical() {
        let (tool, _tmp) = tool(vec!["shutdown".into()]);
        let assessment = tool
            .assess_danger(&serde_json::json!({"command": "shutdown -h now"}))
            .unwrap();
        assert_eq!(assessment.risk, RiskLevel::Critical);
        assert!(assessment.details.contains("shutdown"));
    }

    #[test]
    fn clean_command_not_assessed() {
        let (tool, _tmp) = tool(vec![]);
        assert!(tool
            .assess_danger(&serde_json::json!({"command": "ls -la"}))
            .is_none());
    }

    #[tokio::test]
    async fn missing_command_rejected() {
        let (tool, _tmp) = tool(vec![]);
        let err = tool.execute(serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}

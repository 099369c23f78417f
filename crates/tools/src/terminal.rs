//! terminal — interactive command sessions with background support.
//!
//! Session state machine: starting → running → {completed, cancelled,
//! timeout}. Each session holds the child process and a bounded output
//! buffer. Background sessions are addressed by the ID returned from
//! `run`; a finished session's ID is removed once its final snapshot has
//! been delivered.

use async_trait::async_trait;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use relayclaw_core::error::ToolError;
use relayclaw_core::tool::{DangerAssessment, Tool};
use relayclaw_security::{CommandPolicy, CommandVerdict, Sandbox};

/// Per-session output cap. Oldest output is dropped once exceeded.
const MAX_OUTPUT_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionStatus {
    Starting,
    Running,
    Completed,
    Cancelled,
    TimedOut,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Starting => write!(f, "starting"),
            SessionStatus::Running => write!(f, "running"),
            SessionStatus::Completed => write!(f, "completed"),
            SessionStatus::Cancelled => write!(f, "cancelled"),
            SessionStatus::TimedOut => write!(f, "timeout"),
        }
    }
}

struct TerminalSession {
    id: String,
    started: Instant,
    state: Mutex<SessionState>,
}

struct SessionState {
    status: SessionStatus,
    output: String,
    child: Option<tokio::process::Child>,
}

impl TerminalSession {
    fn push_output(state: &mut SessionState, text: &str) {
        state.output.push_str(text);
        if state.output.len() > MAX_OUTPUT_BYTES {
            let excess = state.output.len() - MAX_OUTPUT_BYTES;
            let mut cut = excess;
            while cut < state.output.len() && !state.output.is_char_boundary(cut) {
                cut += 1;
            }
            state.output.drain(..cut);
        }
    }
}

pub struct TerminalTool {
    sandbox: Sandbox,
    policy: CommandPolicy,
    default_timeout: Duration,
    sessions: Mutex<HashMap<String, Arc<TerminalSession>>>,
}

impl TerminalTool {
    pub fn new(sandbox: Sandbox, policy: CommandPolicy, default_timeout: Duration) -> Self {
        Self {
            sandbox,
            policy,
            default_timeout,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    async fn run(
        &self,
        command: &str,
        timeout: Duration,
        background: bool,
    ) -> Result<String, ToolError> {
        if self.policy.check(command) == CommandVerdict::Injection {
            return Err(ToolError::Sandbox(
                "potential command injection detected".into(),
            ));
        }

        let id = format!("term_{}", uuid::Uuid::new_v4().simple());
        debug!(id = %id, command, background, "starting terminal session");

        let mut child = tokio::process::Command::new("sh")
            .args(["-c", command])
            .current_dir(self.sandbox.work_dir())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ToolError::ExecutionFailed {
                tool: "terminal".into(),
                reason: format!("failed to start command: {e}"),
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let session = Arc::new(TerminalSession {
            id: id.clone(),
            started: Instant::now(),
            state: Mutex::new(SessionState {
                status: SessionStatus::Starting,
                output: String::new(),
                child: Some(child),
            }),
        });

        self.sessions
            .lock()
            .await
            .insert(id.clone(), session.clone());

        session.state.lock().await.status = SessionStatus::Running;

        let mut readers = Vec::new();
        if let Some(stdout) = stdout {
            readers.push(spawn_pipe_reader(stdout, session.clone()));
        }
        if let Some(stderr) = stderr {
            readers.push(spawn_pipe_reader(stderr, session.clone()));
        }

        if background {
            let monitor = session.clone();
            tokio::spawn(async move {
                wait_for_exit(&monitor).await;
            });
            return Ok(format!(
                "Session started: {id}\nUse the 'output' action with this sessionId to get output."
            ));
        }

        // Foreground: wait up to the deadline, then kill and report.
        let waited = tokio::time::timeout(timeout, wait_for_exit(&session)).await;
        match waited {
            Ok(()) => {
                // Pipes hit EOF at exit; let the readers drain them before
                // the final snapshot.
                for reader in readers {
                    let _ = reader.await;
                }
                let output = {
                    let mut state = session.state.lock().await;
                    state.status = SessionStatus::Completed;
                    state.output.clone()
                };
                self.sessions.lock().await.remove(&id);
                Ok(output)
            }
            Err(_) => {
                warn!(id = %id, "terminal session timed out");
                let output = {
                    let mut state = session.state.lock().await;
                    if let Some(child) = state.child.as_mut() {
                        let _ = child.kill().await;
                    }
                    state.status = SessionStatus::TimedOut;
                    state.output.clone()
                };
                for reader in readers {
                    reader.abort();
                }
                self.sessions.lock().await.remove(&id);
                Ok(format!("{output}\n[TIMEOUT]"))
            }
        }
    }

    async fn cancel(&self, session_id: &str) -> Result<String, ToolError> {
        let session = self
            .sessions
            .lock()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| ToolError::ExecutionFailed {
                tool: "terminal".into(),
                reason: format!("session not found: {session_id}"),
            })?;

        let output = {
            let mut state = session.state.lock().await;
            if state.status == SessionStatus::Running {
                if let Some(child) = state.child.as_mut() {
                    let _ = child.kill().await;
                }
                state.status = SessionStatus::Cancelled;
            }
            state.output.clone()
        };

        self.sessions.lock().await.remove(session_id);
        Ok(format!("{output}\n[SESSION CANCELLED]"))
    }

    async fn output(&self, session_id: &str) -> Result<String, ToolError> {
        let session = self
            .sessions
            .lock()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| ToolError::ExecutionFailed {
                tool: "terminal".into(),
                reason: format!("session not found: {session_id}"),
            })?;

        let (status, output) = {
            let state = session.state.lock().await;
            (state.status, state.output.clone())
        };

        // A finished session's ID disappears with this final snapshot.
        if status != SessionStatus::Running && status != SessionStatus::Starting {
            self.sessions.lock().await.remove(session_id);
        }

        Ok(format!(
            "Status: {status}\nDuration: {}s\nOutput:\n{output}",
            session.started.elapsed().as_secs()
        ))
    }

    async fn list(&self) -> Result<String, ToolError> {
        let sessions = self.sessions.lock().await;
        if sessions.is_empty() {
            return Ok("No active sessions".into());
        }

        let mut lines = vec!["Active sessions:".to_string()];
        for session in sessions.values() {
            let status = session.state.lock().await.status;
            lines.push(format!(
                "- {}: {} (started {}s ago)",
                session.id,
                status,
                session.started.elapsed().as_secs()
            ));
        }
        Ok(lines.join("\n"))
    }
}

fn spawn_pipe_reader<R>(mut pipe: R, session: Arc<TerminalSession>) -> tokio::task::JoinHandle<()>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; 4096];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let text = String::from_utf8_lossy(&chunk[..n]).into_owned();
                    let mut state = session.state.lock().await;
                    TerminalSession::push_output(&mut state, &text);
                }
            }
        }
    })
}

/// Wait for the session's child to exit, marking it completed. Used by
/// both foreground waits and background monitors.
async fn wait_for_exit(session: &Arc<TerminalSession>) {
    loop {
        {
            let mut state = session.state.lock().await;
            if let Some(child) = state.child.as_mut() {
                match child.try_wait() {
                    Ok(Some(_)) => {
                        if state.status == SessionStatus::Running {
                            state.status = SessionStatus::Completed;
                        }
                        return;
                    }
                    Ok(None) => {}
                    Err(_) => return,
                }
            } else {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[async_trait]
impl Tool for TerminalTool {
    fn name(&self) -> &str {
        "terminal"
    }

    fn description(&self) -> &str {
        "Run terminal commands with live output, background sessions, and cancellation."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "description": "Operation: run, cancel, list, or output",
                    "enum": ["run", "cancel", "list", "output"]
                },
                "command": {
                    "type": "string",
                    "description": "Command to execute (run action)"
                },
                "sessionId": {
                    "type": "string",
                    "description": "Session ID (cancel/output actions)"
                },
                "timeout": {
                    "type": "number",
                    "description": "Timeout in seconds (run action)"
                },
                "background": {
                    "type": "boolean",
                    "description": "Run in the background and return a session ID"
                }
            },
            "required": ["action"]
        })
    }

    fn assess_danger(&self, args: &serde_json::Value) -> Option<DangerAssessment> {
        if args["action"].as_str() != Some("run") {
            return None;
        }
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
        let action = args["action"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("action is required".into()))?;

        match action {
            "list" => self.list().await,
            "cancel" => {
                let id = args["sessionId"]
                    .as_str()
                    .ok_or_else(|| ToolError::InvalidArguments("sessionId is required".into()))?;
                self.cancel(id).await
            }
            "output" => {
                let id = args["sessionId"]
                    .as_str()
                    .ok_or_else(|| ToolError::InvalidArguments("sessionId is required".into()))?;
                self.output(id).await
            }
            "run" => {
                let command = args["command"].as_str().filter(|c| !c.is_empty()).ok_or_else(
                    || ToolError::InvalidArguments("command is required for run action".into()),
                )?;
                let timeout = args["timeout"]
                    .as_u64()
                    .map(Duration::from_secs)
                    .unwrap_or(self.default_timeout);
                let background = args["background"].as_bool().unwrap_or(false);
                self.run(command, timeout, background).await
            }
            other => Err(ToolError::InvalidArguments(format!(
                "unknown action: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tool() -> (TerminalTool, TempDir) {
        let tmp = TempDir::new().unwrap();
        let sandbox = Sandbox::new(tmp.path().join("work")).unwrap();
        (
            TerminalTool::new(sandbox, CommandPolicy::new(vec![]), Duration::from_secs(5)),
            tmp,
        )
    }

    #[tokio::test]
    async fn foreground_run_returns_output() {
        let (tool, _tmp) = tool();
        let out = tool
            .execute(serde_json::json!({"action": "run", "command": "echo terminal-works"}))
            .await
            .unwrap();
        assert!(out.contains("terminal-works"));
        // Foreground sessions are gone when they return.
        let list = tool.execute(serde_json::json!({"action": "list"})).await.unwrap();
        assert_eq!(list, "No active sessions");
    }

    #[tokio::test]
    async fn foreground_timeout_returns_marker() {
        let (tool, _tmp) = tool();
        let out = tool
            .execute(serde_json::json!({
                "action": "run",
                "command": "sleep 30",
                "timeout": 1
            }))
            .await
            .unwrap();
        assert!(out.contains("[TIMEOUT]"));
    }

    #[tokio::test]
    async fn background_run_and_output_lifecycle() {
        let (tool, _tmp) = tool();
        let out = tool
            .execute(serde_json::json!({
                "action": "run",
                "command": "echo bg-done",
                "background": true
            }))
            .await
            .unwrap();
        let id = out
            .lines()
            .next()
            .unwrap()
            .strip_prefix("Session started: ")
            .unwrap()
            .to_string();

        // Give the command a moment to finish.
        tokio::time::sleep(Duration::from_millis(300)).await;

        let snapshot = tool
            .execute(serde_json::json!({"action": "output", "sessionId": id}))
            .await
            .unwrap();
        assert!(snapshot.contains("bg-done"));
        assert!(snapshot.contains("Status: completed"));

        // Final snapshot removed the ID.
        let err = tool
            .execute(serde_json::json!({"action": "output", "sessionId": id}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("session not found"));
    }

    #[tokio::test]
    async fn cancel_kills_running_session() {
        let (tool, _tmp) = tool();
        let out = tool
            .execute(serde_json::json!({
                "action": "run",
                "command": "sleep 60",
                "background": true
            }))
            .await
            .unwrap();
        let id = out
            .lines()
            .next()
            .unwrap()
            .strip_prefix("Session started: ")
            .unwrap()
            .to_string();

        let cancelled = tool
            .execute(serde_json::json!({"action": "cancel", "sessionId": id}))
            .await
            .unwrap();
        assert!(cancelled.contains("[SESSION CANCELLED]"));

        let list = tool.execute(serde_json::json!({"action": "list"})).await.unwrap();
        assert_eq!(list, "No active sessions");
    }

    #[tokio::test]
    async fn list_shows_running_sessions() {
        let (tool, _tmp) = tool();
        let out = tool
            .execute(serde_json::json!({
                "action": "run",
                "command": "sleep 10",
                "background": true
            }))
            .await
            .unwrap();
        let id = out
            .lines()
            .next()
            .unwrap()
            .strip_prefix("Session started: ")
            .unwrap()
            .to_string();

        let list = tool.execute(serde_json::json!({"action": "list"})).await.unwrap();
        assert!(list.contains(&id));
        assert!(list.contains("running"));

        let _ = tool
            .execute(serde_json::json!({"action": "cancel", "sessionId": id}))
            .await;
    }

    #[tokio::test]
    async fn injection_refused() {
        let (tool, _tmp) = tool();
        let err = tool
            .execute(serde_json::json!({"action": "run", "command": "echo x; rm y"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Sandbox(_)));
    }

    #[tokio::test]
    async fn unknown_action_rejected() {
        let (tool, _tmp) = tool();
        let err = tool
            .execute(serde_json::json!({"action": "reboot"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[test]
    fn run_action_assessed_for_danger() {
        let (tool, _tmp) = tool();
        assert!(tool
            .assess_danger(&serde_json::json!({"action": "run", "command": "rm -rf /"}))
            .is_some());
        assert!(tool
            .assess_danger(&serde_json::json!({"action": "list"}))
            .is_none());
        assert!(tool
            .assess_danger(&serde_json::json!({"action": "run", "command": "ls"}))
            .is_none());
    }

    #[test]
    fn output_buffer_bounded() {
        let mut state = SessionState {
            status: SessionStatus::Running,
            output: String::new(),
            child: None,
        };
        for _ in 0..100 {
            TerminalSession::push_output(&mut state, &"x".repeat(1024));
        }
        assert!(state.output.len() <= MAX_OUTPUT_BYTES);
    }
}

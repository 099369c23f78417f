//! memory_read / memory_write — the model's access to the note store.

use async_trait::async_trait;
use std::sync::Arc;

use relayclaw_core::error::ToolError;
use relayclaw_core::tool::Tool;
use relayclaw_memory::{parse_date, MemoryStore};

fn memory_err(tool: &str, e: relayclaw_core::error::MemoryError) -> ToolError {
    ToolError::ExecutionFailed {
        tool: tool.into(),
        reason: e.to_string(),
    }
}

pub struct MemoryReadTool {
    store: Arc<MemoryStore>,
}

impl MemoryReadTool {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for MemoryReadTool {
    fn name(&self) -> &str {
        "memory_read"
    }

    fn description(&self) -> &str {
        "Read long-term memory or a daily note to recall previously saved information."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "type": {
                    "type": "string",
                    "description": "Memory kind: 'longterm' or 'daily'",
                    "enum": ["longterm", "daily"]
                },
                "date": {
                    "type": "string",
                    "description": "Date (YYYY-MM-DD) for daily notes; defaults to today"
                }
            },
            "required": ["type"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<String, ToolError> {
        if !self.store.is_enabled() {
            return Err(ToolError::ExecutionFailed {
                tool: "memory_read".into(),
                reason: "memory feature is not enabled".into(),
            });
        }

        let kind = args["type"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("type is required".into()))?;

        match kind {
            "longterm" => {
                let content = self
                    .store
                    .read_longterm()
                    .map_err(|e| memory_err("memory_read", e))?;
                if content.is_empty() {
                    Ok("No long-term memory found".into())
                } else {
                    Ok(content)
                }
            }
            "daily" => {
                let date = match args["date"].as_str().filter(|d| !d.is_empty()) {
                    Some(d) => {
                        parse_date(d).ok_or_else(|| {
                            ToolError::InvalidArguments(format!("invalid date: {d}"))
                        })?;
                        d.to_string()
                    }
                    None => MemoryStore::today(),
                };
                let content = self
                    .store
                    .read_daily(&date)
                    .map_err(|e| memory_err("memory_read", e))?;
                if content.is_empty() {
                    Ok(format!("No daily note found for {date}"))
                } else {
                    Ok(content)
                }
            }
            other => Err(ToolError::InvalidArguments(format!(
                "invalid memory type: {other}"
            ))),
        }
    }
}

pub struct MemoryWriteTool {
    store: Arc<MemoryStore>,
}

impl MemoryWriteTool {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for MemoryWriteTool {
    fn name(&self) -> &str {
        "memory_write"
    }

    fn description(&self) -> &str {
        "Save important information to long-term memory or today's daily note."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "type": {
                    "type": "string",
                    "description": "Memory kind: 'longterm' or 'daily'",
                    "enum": ["longterm", "daily"]
                },
                "content": {
                    "type": "string",
                    "description": "The content to save"
                },
                "append": {
                    "type": "boolean",
                    "description": "Append to existing long-term memory (default true)"
                }
            },
            "required": ["type", "content"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<String, ToolError> {
        if !self.store.is_enabled() {
            return Err(ToolError::ExecutionFailed {
                tool: "memory_write".into(),
                reason: "memory feature is not enabled".into(),
            });
        }

        let kind = args["type"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("type is required".into()))?;
        let content = args["content"]
            .as_str()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("content is required".into()))?;

        match kind {
            "longterm" => {
                let append = args["append"].as_bool().unwrap_or(true);
                if append {
                    self.store
                        .append_longterm(content)
                        .map_err(|e| memory_err("memory_write", e))?;
                } else {
                    self.store
                        .write_longterm(content)
                        .map_err(|e| memory_err("memory_write", e))?;
                }
                Ok("Long-term memory updated successfully".into())
            }
            "daily" => {
                let date = MemoryStore::today();
                self.store
                    .write_daily(&date, content)
                    .map_err(|e| memory_err("memory_write", e))?;
                Ok(format!("Daily note for {date} updated successfully"))
            }
            other => Err(ToolError::InvalidArguments(format!(
                "invalid memory type: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn enabled_store() -> (Arc<MemoryStore>, TempDir) {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new(true, tmp.path(), 8192).unwrap());
        (store, tmp)
    }

    #[tokio::test]
    async fn disabled_store_errors() {
        let store = Arc::new(MemoryStore::new(false, "", 8192).unwrap());
        let read = MemoryReadTool::new(store.clone());
        let err = read
            .execute(serde_json::json!({"type": "longterm"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed { .. }));
    }

    #[tokio::test]
    async fn longterm_write_then_read() {
        let (store, _tmp) = enabled_store();
        let write = MemoryWriteTool::new(store.clone());
        let read = MemoryReadTool::new(store);

        let out = write
            .execute(serde_json::json!({
                "type": "longterm",
                "content": "User speaks German",
                "append": false
            }))
            .await
            .unwrap();
        assert!(out.contains("successfully"));

        let content = read
            .execute(serde_json::json!({"type": "longterm"}))
            .await
            .unwrap();
        assert_eq!(content, "User speaks German");
    }

    #[tokio::test]
    async fn append_mode_is_the_default() {
        let (store, _tmp) = enabled_store();
        let write = MemoryWriteTool::new(store.clone());

        write
            .execute(serde_json::json!({"type": "longterm", "content": "first"}))
            .await
            .unwrap();
        write
            .execute(serde_json::json!({"type": "longterm", "content": "second"}))
            .await
            .unwrap();

        let content = store.read_longterm().unwrap();
        assert!(content.contains("first"));
        assert!(content.contains("second"));
    }

    #[tokio::test]
    async fn daily_write_reads_back_today() {
        let (store, _tmp) = enabled_store();
        let write = MemoryWriteTool::new(store.clone());
        let read = MemoryReadTool::new(store);

        write
            .execute(serde_json::json!({"type": "daily", "content": "stood up the gateway"}))
            .await
            .unwrap();

        let content = read
            .execute(serde_json::json!({"type": "daily"}))
            .await
            .unwrap();
        assert!(content.contains("stood up the gateway"));
    }

    #[tokio::test]
    async fn empty_reads_are_friendly() {
        let (store, _tmp) = enabled_store();
        let read = MemoryReadTool::new(store);
        let out = read
            .execute(serde_json::json!({"type": "longterm"}))
            .await
            .unwrap();
        assert_eq!(out, "No long-term memory found");

        let out = read
            .execute(serde_json::json!({"type": "daily", "date": "1999-01-01"}))
            .await
            .unwrap();
        assert!(out.contains("No daily note found"));
    }

    #[tokio::test]
    async fn invalid_kind_and_date_rejected() {
        let (store, _tmp) = enabled_store();
        let read = MemoryReadTool::new(store.clone());
        assert!(read
            .execute(serde_json::json!({"type": "episodic"}))
            .await
            .is_err());
        assert!(read
            .execute(serde_json::json!({"type": "daily", "date": "not-a-date"}))
            .await
            .is_err());

        let write = MemoryWriteTool::new(store);
        assert!(write
            .execute(serde_json::json!({"type": "longterm"}))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn size_cap_surfaces_as_tool_error() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new(true, tmp.path(), 8).unwrap());
        let write = MemoryWriteTool::new(store);
        let err = write
            .execute(serde_json::json!({
                "type": "longterm",
                "content": "way too long for the cap",
                "append": false
            }))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("too large"));
    }
}

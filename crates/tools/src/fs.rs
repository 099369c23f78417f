//! Filesystem tools: read_file, write_file, list_directory, apply_patch,
//! grep. Every path goes through the sandbox before it touches disk.

use async_trait::async_trait;
use regex::Regex;

use relayclaw_core::error::ToolError;
use relayclaw_core::tool::Tool;
use relayclaw_security::Sandbox;

const MAX_READ_SIZE: u64 = 1024 * 1024;
const MAX_GREP_HITS: usize = 50;

fn required_str<'a>(args: &'a serde_json::Value, key: &str) -> Result<&'a str, ToolError> {
    args[key]
        .as_str()
        .ok_or_else(|| ToolError::InvalidArguments(format!("{key} is required")))
}

pub struct ReadFileTool {
    sandbox: Sandbox,
}

impl ReadFileTool {
    pub fn new(sandbox: Sandbox) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a file's content. Text files only, limited to 1 MiB."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path, relative to the work directory or absolute"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<String, ToolError> {
        let path = required_str(&args, "path")?;
        let resolved = self.sandbox.resolve(path)?;

        let meta = std::fs::metadata(&resolved).map_err(|e| ToolError::ExecutionFailed {
            tool: "read_file".into(),
            reason: format!("failed to stat file: {e}"),
        })?;
        if meta.len() > MAX_READ_SIZE {
            return Err(ToolError::ExecutionFailed {
                tool: "read_file".into(),
                reason: "file too large (max 1MB)".into(),
            });
        }

        std::fs::read_to_string(&resolved).map_err(|e| ToolError::ExecutionFailed {
            tool: "read_file".into(),
            reason: format!("failed to read file: {e}"),
        })
    }
}

pub struct WriteFileTool {
    sandbox: Sandbox,
}

impl WriteFileTool {
    pub fn new(sandbox: Sandbox) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file. Creates the file (and parent directories) if missing, overwrites otherwise."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path, relative to the work directory or absolute"
                },
                "content": {
                    "type": "string",
                    "description": "Content to write"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<String, ToolError> {
        let path = required_str(&args, "path")?;
        let content = required_str(&args, "content")?;
        let resolved = self.sandbox.resolve(path)?;

        if let Some(parent) = resolved.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ToolError::ExecutionFailed {
                tool: "write_file".into(),
                reason: format!("failed to create directory: {e}"),
            })?;
        }

        std::fs::write(&resolved, content).map_err(|e| ToolError::ExecutionFailed {
            tool: "write_file".into(),
            reason: format!("failed to write file: {e}"),
        })?;

        Ok(format!("File written successfully: {}", resolved.display()))
    }
}

pub struct ListDirectoryTool {
    sandbox: Sandbox,
}

impl ListDirectoryTool {
    pub fn new(sandbox: Sandbox) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "List the files and subdirectories of a directory."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory path; defaults to the work directory"
                }
            }
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<String, ToolError> {
        let path = args["path"].as_str().filter(|p| !p.is_empty()).unwrap_or(".");
        let resolved = self.sandbox.resolve(path)?;

        let entries = std::fs::read_dir(&resolved).map_err(|e| ToolError::ExecutionFailed {
            tool: "list_directory".into(),
            reason: format!("failed to read directory: {e}"),
        })?;

        let mut names = Vec::new();
        for entry in entries.flatten() {
            let prefix = if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                "[DIR]"
            } else {
                "[FILE]"
            };
            names.push(format!("{prefix} {}", entry.file_name().to_string_lossy()));
        }
        names.sort();

        Ok(names.join("\n"))
    }
}

pub struct ApplyPatchTool {
    sandbox: Sandbox,
}

impl ApplyPatchTool {
    pub fn new(sandbox: Sandbox) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for ApplyPatchTool {
    fn name(&self) -> &str {
        "apply_patch"
    }

    fn description(&self) -> &str {
        "Apply a precise edit to a file by replacing the first occurrence of old_string with new_string."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File to modify"
                },
                "old_string": {
                    "type": "string",
                    "description": "Exact text to replace"
                },
                "new_string": {
                    "type": "string",
                    "description": "Replacement text"
                }
            },
            "required": ["path", "old_string", "new_string"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<String, ToolError> {
        let path = required_str(&args, "path")?;
        let old_string = required_str(&args, "old_string")?;
        let new_string = required_str(&args, "new_string")?;
        let resolved = self.sandbox.resolve(path)?;

        let content = std::fs::read_to_string(&resolved).map_err(|e| {
            ToolError::ExecutionFailed {
                tool: "apply_patch".into(),
                reason: format!("failed to read file: {e}"),
            }
        })?;

        if !content.contains(old_string) {
            return Err(ToolError::ExecutionFailed {
                tool: "apply_patch".into(),
                reason: "old_string not found in file".into(),
            });
        }

        let patched = content.replacen(old_string, new_string, 1);
        std::fs::write(&resolved, patched).map_err(|e| ToolError::ExecutionFailed {
            tool: "apply_patch".into(),
            reason: format!("failed to write file: {e}"),
        })?;

        Ok(format!("Patch applied successfully to {}", resolved.display()))
    }
}

pub struct GrepTool {
    sandbox: Sandbox,
}

impl GrepTool {
    pub fn new(sandbox: Sandbox) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        "Search file contents in the work directory with a regular expression."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Regular expression to search for"
                },
                "path": {
                    "type": "string",
                    "description": "Search root; defaults to the work directory"
                },
                "include": {
                    "type": "string",
                    "description": "Filename glob filter (e.g. *.rs)"
                }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<String, ToolError> {
        let pattern = required_str(&args, "pattern")?;
        let path = args["path"].as_str().filter(|p| !p.is_empty()).unwrap_or(".");
        let include = args["include"].as_str().filter(|p| !p.is_empty()).unwrap_or("*");

        let root = self.sandbox.resolve(path)?;
        let re = Regex::new(pattern)
            .map_err(|e| ToolError::InvalidArguments(format!("invalid pattern: {e}")))?;
        let include_re = glob_to_regex(include)
            .map_err(|e| ToolError::InvalidArguments(format!("invalid include: {e}")))?;

        let mut matches = Vec::new();
        let mut stack = vec![root.clone()];
        'walk: while let Some(dir) = stack.pop() {
            let Ok(entries) = std::fs::read_dir(&dir) else { continue };
            for entry in entries.flatten() {
                let entry_path = entry.path();
                if entry_path.is_dir() {
                    stack.push(entry_path);
                    continue;
                }

                let file_name = entry.file_name().to_string_lossy().into_owned();
                if !include_re.is_match(&file_name) {
                    continue;
                }
                if entry.metadata().map(|m| m.len()).unwrap_or(u64::MAX) > MAX_READ_SIZE {
                    continue;
                }
                let Ok(content) = std::fs::read_to_string(&entry_path) else {
                    continue; // binary or unreadable
                };

                for (line_no, line) in content.lines().enumerate() {
                    if re.is_match(line) {
                        let rel = entry_path
                            .strip_prefix(self.sandbox.work_dir())
                            .or_else(|_| entry_path.strip_prefix(&root))
                            .unwrap_or(&entry_path);
                        matches.push(format!(
                            "{}:{}: {}",
                            rel.display(),
                            line_no + 1,
                            line.trim()
                        ));
                        if matches.len() >= MAX_GREP_HITS {
                            break 'walk;
                        }
                    }
                }
            }
        }

        if matches.is_empty() {
            Ok("No matches found".into())
        } else {
            Ok(matches.join("\n"))
        }
    }
}

/// Convert a filename glob (`*`, `?`) into an anchored regex.
fn glob_to_regex(glob: &str) -> Result<Regex, regex::Error> {
    let mut pattern = String::from("^");
    for c in glob.chars() {
        match c {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            c => pattern.push_str(&regex::escape(&c.to_string())),
        }
    }
    pattern.push('$');
    Regex::new(&pattern)
}

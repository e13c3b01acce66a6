//! The exec/read/write/edit/glob/grep `ToolHandler`s, grounded in
//! `examples/original_source/sdk/python/polos/execution/tools/*.py`.
//!
//! Python caches the lazily-initialized environment in a closure keyed by
//! `root_execution_id` so every tool call within one root execution shares
//! the same sandbox. `SandboxContext` plays that role here: it is built once
//! by `sandbox_tools()` and cloned into every handler that needs it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use polos_agent::ToolHandler;
use polos_providers::ToolDefinition;
use polos_runtime::{ExecutionHandle, WorkflowError};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::environment::ExecutionEnvironment;
use crate::manager::SandboxManager;
use crate::security::{evaluate_allowlist, is_within_restriction};
use crate::types::{
    ExecOptions, ExecResult, ExecSecurity, ExecToolConfig, FileApproval, GlobOptions, GrepOptions, PathRestriction,
    SandboxToolsConfig,
};

/// Shared lazy-environment cache for one `sandbox_tools()` call, keyed by
/// root execution id so tool sub-workflows of the same root reuse one
/// sandbox even though each gets its own `execution_id`.
pub struct SandboxContext {
    manager: Arc<SandboxManager>,
    config: SandboxToolsConfig,
    cache: Mutex<HashMap<String, Arc<dyn ExecutionEnvironment>>>,
}

impl SandboxContext {
    pub fn new(manager: Arc<SandboxManager>, config: SandboxToolsConfig) -> Arc<Self> {
        Arc::new(Self { manager, config, cache: Mutex::new(HashMap::new()) })
    }

    async fn get_env(&self, handle: &ExecutionHandle) -> Result<Arc<dyn ExecutionEnvironment>, WorkflowError> {
        let root_execution_id = handle.context().lineage.root_execution_id.clone();
        let session_id = handle.context().session_id.clone();

        let mut cache = self.cache.lock().await;
        if let Some(env) = cache.get(&root_execution_id) {
            return Ok(env.clone());
        }

        let sandbox = self
            .manager
            .get_or_create_sandbox(self.config.clone(), &root_execution_id, session_id.as_deref())
            .await
            .map_err(|err| WorkflowError::Validation(err.to_string()))?;
        let env = sandbox.get_environment().await.map_err(|err| WorkflowError::Validation(err.to_string()))?;
        cache.insert(root_execution_id, env.clone());
        Ok(env)
    }

    fn path_restriction(&self) -> Option<&str> {
        match self.config.local.as_ref()?.path_restriction.as_ref()? {
            PathRestriction::Dir(dir) => Some(dir.as_str()),
            PathRestriction::Disabled => None,
        }
    }
}

/// Suspends for a yes/no approval decision; `description`/`context_extra`
/// mirror the `_form` payload the original suspends with so an external
/// approval UI renders the same fields.
async fn request_approval(
    handle: &ExecutionHandle,
    tool_name: &str,
    title: &str,
    description: &str,
    context_extra: Value,
) -> Result<(bool, Option<String>), WorkflowError> {
    let approval_id = handle.uuid("_approval_id").await?;
    let response: Value = handle
        .suspend(
            &format!("approve_{tool_name}_{approval_id}"),
            json!({
                "_form": {
                    "title": title,
                    "description": description,
                    "fields": [
                        {"key": "approved", "type": "boolean", "label": "Approve?", "required": true, "default": false},
                        {"key": "feedback", "type": "textarea", "label": "Feedback for the agent (optional)", "required": false},
                    ],
                    "context": context_extra,
                },
                "_source": "sandbox_tool_security",
                "_tool": tool_name,
            }),
            None,
        )
        .await?;

    let data = response.get("data").cloned().unwrap_or(Value::Null);
    let approved = data.get("approved").and_then(Value::as_bool).unwrap_or(false);
    let feedback = data.get("feedback").and_then(Value::as_str).map(str::to_string);
    Ok((approved, feedback))
}

async fn require_path_approval(handle: &ExecutionHandle, tool_name: &str, target_path: &str, restriction: &str) -> Result<(), WorkflowError> {
    let (approved, feedback) = request_approval(
        handle,
        tool_name,
        &format!("{tool_name}: access outside workspace"),
        &format!("The agent wants to {tool_name} a path outside the workspace."),
        json!({"tool": tool_name, "path": target_path, "restriction": restriction}),
    )
    .await?;
    if approved {
        return Ok(());
    }
    let mut message = format!("Access to \"{target_path}\" was rejected by the user.");
    if let Some(feedback) = feedback {
        message.push_str(&format!(" Feedback: {feedback}"));
    }
    Err(WorkflowError::Validation(message))
}

fn resolve_against(cwd: &str, path: &str) -> String {
    crate::security::normalize(&std::path::Path::new(cwd).join(path)).display().to_string()
}

fn rejected_exec_result(command: &str, feedback: Option<&str>) -> Value {
    let mut stderr = format!("Command rejected by user: {command}");
    if let Some(feedback) = feedback {
        stderr.push_str(&format!("\nUser feedback: {feedback}"));
    }
    serde_json::to_value(ExecResult { exit_code: -1, stdout: String::new(), stderr, duration_ms: 0, truncated: false }).unwrap()
}

pub struct ExecTool {
    descriptor: ToolDefinition,
    ctx: Arc<SandboxContext>,
    config: Option<ExecToolConfig>,
}

impl ExecTool {
    pub fn new(ctx: Arc<SandboxContext>, config: Option<ExecToolConfig>) -> Self {
        Self {
            descriptor: ToolDefinition {
                name: "exec".into(),
                description: "Execute a shell command in the sandbox environment. Returns stdout, stderr, and exit code. \
                    Use this for running builds, tests, installing packages, or any shell operation."
                    .into(),
                parameters: json!({
                    "type": "object",
                    "required": ["command"],
                    "properties": {
                        "command": {"type": "string", "description": "The shell command to execute"},
                        "cwd": {"type": "string", "description": "Working directory for the command"},
                        "env": {"type": "object", "additionalProperties": {"type": "string"}},
                        "timeout": {"type": "integer", "description": "Timeout in seconds (default: 300)"},
                    },
                }),
            },
            ctx,
            config,
        }
    }
}

#[async_trait]
impl ToolHandler for ExecTool {
    fn descriptor(&self) -> &ToolDefinition {
        &self.descriptor
    }

    async fn invoke(&self, handle: &ExecutionHandle, arguments: Value) -> Result<Value, WorkflowError> {
        let command = arguments.get("command").and_then(Value::as_str).unwrap_or_default().to_string();
        let env = self.ctx.get_env(handle).await?;

        let security = self.config.as_ref().and_then(|c| c.security);
        match security {
            Some(ExecSecurity::ApprovalAlways) => {
                let (approved, feedback) = request_approval(
                    handle,
                    "exec",
                    "Approve command execution",
                    &format!("The agent wants to run a shell command in the {:?} environment.", env.get_info().kind),
                    json!({"command": command, "cwd": env.get_cwd()}),
                )
                .await?;
                if !approved {
                    return Ok(rejected_exec_result(&command, feedback.as_deref()));
                }
            }
            Some(ExecSecurity::Allowlist) => {
                let allowlist = self.config.as_ref().and_then(|c| c.allowlist.clone()).unwrap_or_default();
                if !evaluate_allowlist(&command, &allowlist) {
                    let (approved, feedback) = request_approval(
                        handle,
                        "exec",
                        "Approve command execution",
                        &format!("The agent wants to run a shell command in the {:?} environment.", env.get_info().kind),
                        json!({"command": command, "cwd": env.get_cwd()}),
                    )
                    .await?;
                    if !approved {
                        return Ok(rejected_exec_result(&command, feedback.as_deref()));
                    }
                }
            }
            Some(ExecSecurity::AllowAlways) | None => {}
        }

        let opts = ExecOptions {
            cwd: arguments.get("cwd").and_then(Value::as_str).map(str::to_string),
            env: arguments
                .get("env")
                .and_then(Value::as_object)
                .map(|m| m.iter().filter_map(|(k, v)| Some((k.clone(), v.as_str()?.to_string()))).collect()),
            timeout_secs: arguments
                .get("timeout")
                .and_then(Value::as_u64)
                .or_else(|| self.config.as_ref().and_then(|c| c.timeout_secs)),
            stdin: None,
        };
        let result = env.exec(&command, opts).await.map_err(|err| WorkflowError::Validation(err.to_string()))?;
        Ok(serde_json::to_value(result).unwrap())
    }
}

pub struct ReadTool {
    descriptor: ToolDefinition,
    ctx: Arc<SandboxContext>,
}

impl ReadTool {
    pub fn new(ctx: Arc<SandboxContext>) -> Self {
        Self {
            descriptor: ToolDefinition {
                name: "read".into(),
                description: "Read the contents of a file. Returns the file content as text. Optionally specify offset \
                    (line number to start from, 0-based) and limit (number of lines)."
                    .into(),
                parameters: json!({
                    "type": "object",
                    "required": ["path"],
                    "properties": {
                        "path": {"type": "string", "description": "Path to the file to read"},
                        "offset": {"type": "integer"},
                        "limit": {"type": "integer"},
                    },
                }),
            },
            ctx,
        }
    }
}

#[async_trait]
impl ToolHandler for ReadTool {
    fn descriptor(&self) -> &ToolDefinition {
        &self.descriptor
    }

    async fn invoke(&self, handle: &ExecutionHandle, arguments: Value) -> Result<Value, WorkflowError> {
        let path = arguments.get("path").and_then(Value::as_str).unwrap_or_default().to_string();
        let env = self.ctx.get_env(handle).await?;

        if let Some(restriction) = self.ctx.path_restriction() {
            let resolved = resolve_against(&env.get_cwd(), &path);
            if !is_within_restriction(std::path::Path::new(&resolved), std::path::Path::new(restriction)) {
                require_path_approval(handle, "read", &resolved, restriction).await?;
            }
        }

        let content = env.read_file(&path).await.map_err(|err| WorkflowError::Validation(err.to_string()))?;
        let content = apply_offset_limit(
            content,
            arguments.get("offset").and_then(Value::as_u64),
            arguments.get("limit").and_then(Value::as_u64),
        );
        Ok(json!({"content": content, "path": path}))
    }
}

fn apply_offset_limit(content: String, offset: Option<u64>, limit: Option<u64>) -> String {
    if offset.is_none() && limit.is_none() {
        return content;
    }
    let lines: Vec<&str> = content.split('\n').collect();
    let start = offset.unwrap_or(0) as usize;
    let end = limit.map(|l| start + l as usize).unwrap_or(lines.len()).min(lines.len());
    if start >= lines.len() {
        return String::new();
    }
    lines[start..end].join("\n")
}

pub struct WriteTool {
    descriptor: ToolDefinition,
    ctx: Arc<SandboxContext>,
    approval: Option<FileApproval>,
}

impl WriteTool {
    pub fn new(ctx: Arc<SandboxContext>, approval: Option<FileApproval>) -> Self {
        Self {
            descriptor: ToolDefinition {
                name: "write".into(),
                description: "Write content to a file. Creates the file if it does not exist, or overwrites it if it does. \
                    Parent directories are created automatically."
                    .into(),
                parameters: json!({
                    "type": "object",
                    "required": ["path", "content"],
                    "properties": {
                        "path": {"type": "string", "description": "Path to the file to write"},
                        "content": {"type": "string", "description": "Content to write to the file"},
                    },
                }),
            },
            ctx,
            approval,
        }
    }
}

#[async_trait]
impl ToolHandler for WriteTool {
    fn descriptor(&self) -> &ToolDefinition {
        &self.descriptor
    }

    async fn invoke(&self, handle: &ExecutionHandle, arguments: Value) -> Result<Value, WorkflowError> {
        let path = arguments.get("path").and_then(Value::as_str).unwrap_or_default().to_string();
        let content = arguments.get("content").and_then(Value::as_str).unwrap_or_default().to_string();
        let env = self.ctx.get_env(handle).await?;

        match self.approval {
            Some(FileApproval::Always) => {
                let (approved, feedback) = request_approval(
                    handle,
                    "write",
                    "Approve file write",
                    &format!("The agent wants to write to \"{path}\"."),
                    json!({"path": path}),
                )
                .await?;
                if !approved {
                    let mut message = format!("Write to \"{path}\" rejected by user.");
                    if let Some(feedback) = feedback {
                        message.push_str(&format!(" Feedback: {feedback}"));
                    }
                    return Err(WorkflowError::Validation(message));
                }
            }
            Some(FileApproval::None) => {}
            None => {
                if let Some(restriction) = self.ctx.path_restriction() {
                    let resolved = resolve_against(&env.get_cwd(), &path);
                    if !is_within_restriction(std::path::Path::new(&resolved), std::path::Path::new(restriction)) {
                        require_path_approval(handle, "write", &resolved, restriction).await?;
                    }
                }
            }
        }

        env.write_file(&path, &content).await.map_err(|err| WorkflowError::Validation(err.to_string()))?;
        Ok(json!({"success": true, "path": path}))
    }
}

pub struct EditTool {
    descriptor: ToolDefinition,
    ctx: Arc<SandboxContext>,
    approval: Option<FileApproval>,
}

impl EditTool {
    pub fn new(ctx: Arc<SandboxContext>, approval: Option<FileApproval>) -> Self {
        Self {
            descriptor: ToolDefinition {
                name: "edit".into(),
                description: "Edit a file by replacing an exact string match. The old_text must match exactly (including \
                    whitespace and indentation). Use this for precise code modifications."
                    .into(),
                parameters: json!({
                    "type": "object",
                    "required": ["path", "old_text", "new_text"],
                    "properties": {
                        "path": {"type": "string", "description": "Path to the file to edit"},
                        "old_text": {"type": "string", "description": "Exact text to find and replace"},
                        "new_text": {"type": "string", "description": "Text to replace the old_text with"},
                    },
                }),
            },
            ctx,
            approval,
        }
    }
}

#[async_trait]
impl ToolHandler for EditTool {
    fn descriptor(&self) -> &ToolDefinition {
        &self.descriptor
    }

    async fn invoke(&self, handle: &ExecutionHandle, arguments: Value) -> Result<Value, WorkflowError> {
        let path = arguments.get("path").and_then(Value::as_str).unwrap_or_default().to_string();
        let old_text = arguments.get("old_text").and_then(Value::as_str).unwrap_or_default();
        let new_text = arguments.get("new_text").and_then(Value::as_str).unwrap_or_default();
        let env = self.ctx.get_env(handle).await?;

        match self.approval {
            Some(FileApproval::Always) => {
                let (approved, feedback) = request_approval(
                    handle,
                    "edit",
                    "Approve file edit",
                    &format!("The agent wants to edit \"{path}\"."),
                    json!({"path": path}),
                )
                .await?;
                if !approved {
                    let mut message = format!("Edit to \"{path}\" rejected by user.");
                    if let Some(feedback) = feedback {
                        message.push_str(&format!(" Feedback: {feedback}"));
                    }
                    return Err(WorkflowError::Validation(message));
                }
            }
            Some(FileApproval::None) => {}
            None => {
                if let Some(restriction) = self.ctx.path_restriction() {
                    let resolved = resolve_against(&env.get_cwd(), &path);
                    if !is_within_restriction(std::path::Path::new(&resolved), std::path::Path::new(restriction)) {
                        require_path_approval(handle, "edit", &resolved, restriction).await?;
                    }
                }
            }
        }

        let content = env.read_file(&path).await.map_err(|err| WorkflowError::Validation(err.to_string()))?;
        if !content.contains(old_text) {
            return Err(WorkflowError::Validation(format!(
                "old_text not found in {path}. Make sure the text matches exactly, including whitespace and indentation."
            )));
        }
        let new_content = content.replacen(old_text, new_text, 1);
        env.write_file(&path, &new_content).await.map_err(|err| WorkflowError::Validation(err.to_string()))?;
        Ok(json!({"success": true, "path": path}))
    }
}

pub struct GlobTool {
    descriptor: ToolDefinition,
    ctx: Arc<SandboxContext>,
}

impl GlobTool {
    pub fn new(ctx: Arc<SandboxContext>) -> Self {
        Self {
            descriptor: ToolDefinition {
                name: "glob".into(),
                description: "Find files matching a glob pattern. Returns a list of file paths. Use this to discover files \
                    in the project structure."
                    .into(),
                parameters: json!({
                    "type": "object",
                    "required": ["pattern"],
                    "properties": {
                        "pattern": {"type": "string", "description": "Glob pattern to match (e.g., \"*.ts\", \"src/**/*.js\")"},
                        "cwd": {"type": "string"},
                        "ignore": {"type": "array", "items": {"type": "string"}},
                    },
                }),
            },
            ctx,
        }
    }
}

#[async_trait]
impl ToolHandler for GlobTool {
    fn descriptor(&self) -> &ToolDefinition {
        &self.descriptor
    }

    async fn invoke(&self, handle: &ExecutionHandle, arguments: Value) -> Result<Value, WorkflowError> {
        let pattern = arguments.get("pattern").and_then(Value::as_str).unwrap_or_default().to_string();
        let cwd = arguments.get("cwd").and_then(Value::as_str).map(str::to_string);
        let env = self.ctx.get_env(handle).await?;

        if let (Some(restriction), Some(cwd)) = (self.ctx.path_restriction(), cwd.as_deref()) {
            let resolved = resolve_against(&env.get_cwd(), cwd);
            if !is_within_restriction(std::path::Path::new(&resolved), std::path::Path::new(restriction)) {
                require_path_approval(handle, "glob", &resolved, restriction).await?;
            }
        }

        let ignore = arguments
            .get("ignore")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect());
        let files = env.glob(&pattern, GlobOptions { cwd, ignore }).await.map_err(|err| WorkflowError::Validation(err.to_string()))?;
        Ok(json!({"files": files}))
    }
}

pub struct GrepTool {
    descriptor: ToolDefinition,
    ctx: Arc<SandboxContext>,
}

impl GrepTool {
    pub fn new(ctx: Arc<SandboxContext>) -> Self {
        Self {
            descriptor: ToolDefinition {
                name: "grep".into(),
                description: "Search file contents for a pattern using grep. Returns matching lines with file paths and line \
                    numbers. Use this to find code patterns, references, or specific text."
                    .into(),
                parameters: json!({
                    "type": "object",
                    "required": ["pattern"],
                    "properties": {
                        "pattern": {"type": "string", "description": "Search pattern (regex supported)"},
                        "cwd": {"type": "string"},
                        "include": {"type": "array", "items": {"type": "string"}},
                        "max_results": {"type": "integer"},
                        "context_lines": {"type": "integer"},
                    },
                }),
            },
            ctx,
        }
    }
}

#[async_trait]
impl ToolHandler for GrepTool {
    fn descriptor(&self) -> &ToolDefinition {
        &self.descriptor
    }

    async fn invoke(&self, handle: &ExecutionHandle, arguments: Value) -> Result<Value, WorkflowError> {
        let pattern = arguments.get("pattern").and_then(Value::as_str).unwrap_or_default().to_string();
        let cwd = arguments.get("cwd").and_then(Value::as_str).map(str::to_string);
        let env = self.ctx.get_env(handle).await?;

        if let (Some(restriction), Some(cwd)) = (self.ctx.path_restriction(), cwd.as_deref()) {
            let resolved = resolve_against(&env.get_cwd(), cwd);
            if !is_within_restriction(std::path::Path::new(&resolved), std::path::Path::new(restriction)) {
                require_path_approval(handle, "grep", &resolved, restriction).await?;
            }
        }

        let include = arguments
            .get("include")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect());
        let opts = GrepOptions {
            cwd,
            include,
            max_results: arguments.get("max_results").and_then(Value::as_u64).map(|v| v as u32),
            context_lines: arguments.get("context_lines").and_then(Value::as_u64).map(|v| v as u32),
        };
        let matches = env.grep(&pattern, opts).await.map_err(|err| WorkflowError::Validation(err.to_string()))?;
        Ok(json!({"matches": matches}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_and_limit_slice_lines() {
        let content = "a\nb\nc\nd".to_string();
        assert_eq!(apply_offset_limit(content.clone(), Some(1), Some(2)), "b\nc");
        assert_eq!(apply_offset_limit(content, None, None), "a\nb\nc\nd");
    }

    #[test]
    fn rejected_result_includes_feedback() {
        let value = rejected_exec_result("rm -rf /", Some("use a safer command"));
        let stderr = value.get("stderr").and_then(Value::as_str).unwrap();
        assert!(stderr.contains("rejected by user"));
        assert!(stderr.contains("use a safer command"));
        assert_eq!(value.get("exit_code").and_then(Value::as_i64), Some(-1));
    }
}

//! Shared configuration and I/O types (§4.8), grounded in
//! `examples/original_source/sdk/python/polos/execution/types.py`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecOptions {
    pub cwd: Option<String>,
    pub env: Option<HashMap<String, String>>,
    pub timeout_secs: Option<u64>,
    pub stdin: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub truncated: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobOptions {
    pub cwd: Option<String>,
    pub ignore: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GrepOptions {
    pub cwd: Option<String>,
    pub include: Option<Vec<String>>,
    pub max_results: Option<u32>,
    pub context_lines: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrepMatch {
    pub path: String,
    pub line: u32,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentKind {
    Local,
    Docker,
    E2b,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentInfo {
    pub kind: EnvironmentKind,
    pub cwd: String,
    pub sandbox_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DockerEnvironmentConfig {
    pub image: String,
    pub workspace_dir: Option<String>,
    pub container_workdir: Option<String>,
    pub env: Option<HashMap<String, String>>,
    pub memory: Option<String>,
    pub cpus: Option<String>,
    pub network: Option<String>,
    pub setup_command: Option<String>,
}

impl DockerEnvironmentConfig {
    pub fn with_image(image: impl Into<String>) -> Self {
        Self { image: image.into(), ..Default::default() }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalEnvironmentConfig {
    pub cwd: Option<String>,
    /// `None` defaults to `cwd` inside a managed sandbox; `Some(false-like)`
    /// is represented by `PathRestriction::Disabled` instead of a sentinel.
    pub path_restriction: Option<PathRestriction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode", content = "dir")]
pub enum PathRestriction {
    Disabled,
    Dir(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecSecurity {
    AllowAlways,
    Allowlist,
    ApprovalAlways,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecToolConfig {
    pub security: Option<ExecSecurity>,
    pub allowlist: Option<Vec<String>>,
    pub timeout_secs: Option<u64>,
    pub max_output_chars: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxScope {
    Execution,
    Session,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileApproval {
    Always,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxTool {
    Exec,
    Read,
    Write,
    Edit,
    Glob,
    Grep,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SandboxToolsConfig {
    pub env: Option<EnvironmentKind>,
    pub scope: Option<SandboxScope>,
    pub id: Option<String>,
    pub idle_destroy_timeout: Option<String>,
    pub tools: Option<Vec<SandboxTool>>,
    pub docker: Option<DockerEnvironmentConfig>,
    pub local: Option<LocalEnvironmentConfig>,
    pub exec: Option<ExecToolConfig>,
    pub file_approval: Option<FileApproval>,
}

impl SandboxToolsConfig {
    pub fn includes(&self, tool: SandboxTool) -> bool {
        match &self.tools {
            Some(tools) => tools.contains(&tool),
            None => true,
        }
    }
}

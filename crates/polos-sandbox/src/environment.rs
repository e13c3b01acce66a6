//! `ExecutionEnvironment` — the backend abstraction local/docker implement,
//! grounded in
//! `examples/original_source/sdk/python/polos/execution/environment.py`.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::SandboxError;
use crate::types::{EnvironmentInfo, ExecOptions, ExecResult, GlobOptions, GrepMatch, GrepOptions};

#[async_trait]
pub trait ExecutionEnvironment: Send + Sync {
    async fn exec(&self, command: &str, opts: ExecOptions) -> Result<ExecResult, SandboxError>;
    async fn read_file(&self, path: &str) -> Result<String, SandboxError>;
    async fn write_file(&self, path: &str, content: &str) -> Result<(), SandboxError>;
    async fn file_exists(&self, path: &str) -> bool;
    async fn glob(&self, pattern: &str, opts: GlobOptions) -> Result<Vec<String>, SandboxError>;
    async fn grep(&self, pattern: &str, opts: GrepOptions) -> Result<Vec<GrepMatch>, SandboxError>;
    async fn destroy(&self) -> Result<(), SandboxError>;
    fn get_cwd(&self) -> String;
    fn get_info(&self) -> EnvironmentInfo;
}

pub(crate) fn build_find_command(cwd: &str, pattern: &str, ignore: &Option<Vec<String>>) -> String {
    let mut command = format!("find {cwd} -type f -name '{pattern}'");
    if let Some(ignores) = ignore {
        for ignore in ignores {
            command.push_str(&format!(" ! -path '{ignore}'"));
        }
    }
    command.push_str(" 2>/dev/null | sort | head -1000");
    command
}

pub(crate) fn build_grep_command(cwd: &str, pattern: &str, opts: &GrepOptions) -> String {
    let max_results = opts.max_results.unwrap_or(100);
    let mut command = String::from("grep -rn");
    if let Some(context) = opts.context_lines {
        command.push_str(&format!(" -C {context}"));
    }
    if let Some(include) = &opts.include {
        for inc in include {
            command.push_str(&format!(" --include='{inc}'"));
        }
    }
    let escaped_pattern = pattern.replace('\'', "'\\''");
    command.push_str(&format!(" -- '{escaped_pattern}' {cwd}"));
    command.push_str(&format!(" 2>/dev/null | head -{max_results}"));
    command
}

pub(crate) fn merge_env_args(env: &Option<HashMap<String, String>>) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(vars) = env {
        for (key, value) in vars {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }
    }
    args
}

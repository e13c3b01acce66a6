//! Local execution environment: runs commands and touches files directly on
//! the host. Grounded in
//! `examples/original_source/sdk/python/polos/execution/local.py`.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::environment::{build_find_command, build_grep_command, ExecutionEnvironment};
use crate::error::SandboxError;
use crate::output::{is_binary, parse_grep_output, strip_ansi, truncate_output};
use crate::security;
use crate::types::{
    EnvironmentInfo, EnvironmentKind, ExecOptions, ExecResult, GlobOptions, GrepMatch, GrepOptions, LocalEnvironmentConfig,
    PathRestriction,
};

const DEFAULT_TIMEOUT_SECS: u64 = 300;
const DEFAULT_MAX_OUTPUT_CHARS: usize = 100_000;

pub struct LocalEnvironment {
    cwd: PathBuf,
    path_restriction: Option<PathBuf>,
    max_output_chars: usize,
}

impl LocalEnvironment {
    pub fn new(config: LocalEnvironmentConfig, max_output_chars: Option<usize>) -> Result<Self, SandboxError> {
        let cwd = config.cwd.map(PathBuf::from).unwrap_or_else(|| std::env::current_dir().unwrap_or_default());
        let path_restriction = match config.path_restriction {
            Some(PathRestriction::Disabled) | None => None,
            Some(PathRestriction::Dir(dir)) => Some(PathBuf::from(dir)),
        };
        Ok(Self { cwd, path_restriction, max_output_chars: max_output_chars.unwrap_or(DEFAULT_MAX_OUTPUT_CHARS) })
    }

    pub async fn initialize(&self) -> Result<(), SandboxError> {
        if !self.cwd.exists() {
            return Err(SandboxError::MissingWorkdir(self.cwd.display().to_string()));
        }
        if !self.cwd.is_dir() {
            return Err(SandboxError::NotADirectory(self.cwd.display().to_string()));
        }
        Ok(())
    }

    fn resolve_path(&self, cwd_override: Option<&str>, p: &str) -> PathBuf {
        let base = cwd_override.map(PathBuf::from).unwrap_or_else(|| self.cwd.clone());
        security::normalize(&base.join(p))
    }

    fn assert_path_safe(&self, resolved: &Path) -> Result<(), SandboxError> {
        let Some(restriction) = &self.path_restriction else { return Ok(()) };
        if !security::is_within_restriction(resolved, restriction) {
            return Err(SandboxError::PathTraversal(resolved.display().to_string()));
        }
        Ok(())
    }

    async fn assert_not_symlink(&self, resolved: &Path) -> Result<(), SandboxError> {
        if self.path_restriction.is_none() {
            return Ok(());
        }
        match tokio::fs::symlink_metadata(resolved).await {
            Ok(meta) if meta.file_type().is_symlink() => Err(SandboxError::SymlinkBlocked(resolved.display().to_string())),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl ExecutionEnvironment for LocalEnvironment {
    async fn exec(&self, command: &str, opts: ExecOptions) -> Result<ExecResult, SandboxError> {
        let cwd = opts.cwd.as_deref().map(|c| self.resolve_path(None, c)).unwrap_or_else(|| self.cwd.clone());
        let timeout = Duration::from_secs(opts.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS));
        let start = Instant::now();

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command).current_dir(&cwd);
        if let Some(env) = &opts.env {
            cmd.envs(env);
        }
        cmd.stdin(std::process::Stdio::piped());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());

        let mut child = cmd.spawn().map_err(SandboxError::Io)?;
        if let Some(stdin_data) = &opts.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                let _ = stdin.write_all(stdin_data.as_bytes()).await;
            }
        } else {
            drop(child.stdin.take());
        }

        let (exit_code, stdout, stderr) = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => (output.status.code().unwrap_or(1), output.stdout, output.stderr),
            Ok(Err(e)) => return Err(SandboxError::Io(e)),
            Err(_) => (137, Vec::new(), b"\n[Process killed: timeout exceeded]".to_vec()),
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let stdout_raw = String::from_utf8_lossy(&stdout);
        let stderr_raw = String::from_utf8_lossy(&stderr);
        let (stdout_clean, truncated) = truncate_output(&strip_ansi(&stdout_raw), Some(self.max_output_chars));
        let (stderr_clean, _) = truncate_output(&strip_ansi(&stderr_raw), Some(self.max_output_chars));

        Ok(ExecResult { exit_code, stdout: stdout_clean, stderr: stderr_clean, duration_ms, truncated })
    }

    async fn read_file(&self, path: &str) -> Result<String, SandboxError> {
        let resolved = self.resolve_path(None, path);
        self.assert_not_symlink(&resolved).await?;
        let data = tokio::fs::read(&resolved).await?;
        if is_binary(&data) {
            return Err(SandboxError::BinaryFile(path.to_string()));
        }
        Ok(String::from_utf8_lossy(&data).into_owned())
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<(), SandboxError> {
        let resolved = self.resolve_path(None, path);
        self.assert_path_safe(&resolved)?;
        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&resolved, content).await?;
        Ok(())
    }

    async fn file_exists(&self, path: &str) -> bool {
        tokio::fs::try_exists(self.resolve_path(None, path)).await.unwrap_or(false)
    }

    async fn glob(&self, pattern: &str, opts: GlobOptions) -> Result<Vec<String>, SandboxError> {
        let cwd = opts.cwd.as_deref().map(|c| self.resolve_path(None, c)).unwrap_or_else(|| self.cwd.clone());
        let command = build_find_command(&cwd.display().to_string(), pattern, &opts.ignore);
        let result = self.exec(&command, ExecOptions::default()).await?;
        Ok(result.stdout.trim().lines().filter(|l| !l.is_empty()).map(str::to_string).collect())
    }

    async fn grep(&self, pattern: &str, opts: GrepOptions) -> Result<Vec<GrepMatch>, SandboxError> {
        let cwd = opts.cwd.as_deref().map(|c| self.resolve_path(None, c)).unwrap_or_else(|| self.cwd.clone());
        let command = build_grep_command(&cwd.display().to_string(), pattern, &opts);
        let result = self.exec(&command, ExecOptions::default()).await?;
        Ok(parse_grep_output(&result.stdout))
    }

    async fn destroy(&self) -> Result<(), SandboxError> {
        Ok(())
    }

    fn get_cwd(&self) -> String {
        self.cwd.display().to_string()
    }

    fn get_info(&self) -> EnvironmentInfo {
        EnvironmentInfo { kind: EnvironmentKind::Local, cwd: self.get_cwd(), sandbox_id: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn initialize_rejects_a_missing_directory() {
        let config = LocalEnvironmentConfig { cwd: Some("/does/not/exist".into()), path_restriction: None };
        let env = LocalEnvironment::new(config, None).unwrap();
        assert!(env.initialize().await.is_err());
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let config = LocalEnvironmentConfig { cwd: Some(dir.path().display().to_string()), path_restriction: None };
        let env = LocalEnvironment::new(config, None).unwrap();
        env.initialize().await.unwrap();
        env.write_file("notes.txt", "hello").await.unwrap();
        assert_eq!(env.read_file("notes.txt").await.unwrap(), "hello");
        assert!(env.file_exists("notes.txt").await);
    }

    #[tokio::test]
    async fn path_restriction_blocks_escape() {
        let dir = tempfile::tempdir().unwrap();
        let config = LocalEnvironmentConfig {
            cwd: Some(dir.path().display().to_string()),
            path_restriction: Some(PathRestriction::Dir(dir.path().display().to_string())),
        };
        let env = LocalEnvironment::new(config, None).unwrap();
        env.initialize().await.unwrap();
        let result = env.write_file("../outside.txt", "nope").await;
        assert!(matches!(result, Err(SandboxError::PathTraversal(_))));
    }

    #[tokio::test]
    async fn exec_runs_a_shell_command() {
        let dir = tempfile::tempdir().unwrap();
        let config = LocalEnvironmentConfig { cwd: Some(dir.path().display().to_string()), path_restriction: None };
        let env = LocalEnvironment::new(config, None).unwrap();
        env.initialize().await.unwrap();
        let result = env.exec("echo hi", ExecOptions::default()).await.unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout.trim(), "hi");
    }
}

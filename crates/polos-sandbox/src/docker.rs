//! Docker execution environment: a persistent container running
//! `sleep infinity`, commands run via `docker exec`, files touched through a
//! bind mount on the host. Grounded in
//! `examples/original_source/sdk/python/polos/execution/docker.py`.
//!
//! Shells out to the `docker` CLI exactly as the original implementation
//! does, rather than talking to the Docker Engine API directly: no crate in
//! this workspace's corpus speaks that API, and the CLI gives the same
//! container-name/label semantics the sweep logic in `manager.rs` depends on.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::environment::{build_find_command, build_grep_command, merge_env_args, ExecutionEnvironment};
use crate::error::SandboxError;
use crate::output::{is_binary, parse_grep_output, strip_ansi, truncate_output};
use crate::types::{DockerEnvironmentConfig, EnvironmentInfo, EnvironmentKind, ExecOptions, ExecResult, GlobOptions, GrepMatch, GrepOptions};

const DEFAULT_CONTAINER_WORKDIR: &str = "/workspace";
const DEFAULT_TIMEOUT_SECS: u64 = 300;
const DEFAULT_MAX_OUTPUT_CHARS: usize = 100_000;
const INIT_TIMEOUT_SECS: u64 = 60;

async fn spawn_command(command: &str, args: &[String], timeout: Duration, stdin: Option<&str>) -> Result<(i32, String, String), SandboxError> {
    let mut cmd = Command::new(command);
    cmd.args(args);
    cmd.stdin(if stdin.is_some() { std::process::Stdio::piped() } else { std::process::Stdio::null() });
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());

    let mut child = cmd.spawn()?;
    if let Some(data) = stdin {
        if let Some(mut pipe) = child.stdin.take() {
            let _ = pipe.write_all(data.as_bytes()).await;
        }
    }

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok((
            output.status.code().unwrap_or(1),
            String::from_utf8_lossy(&output.stdout).into_owned(),
            String::from_utf8_lossy(&output.stderr).into_owned(),
        )),
        Ok(Err(e)) => Err(SandboxError::Io(e)),
        Err(_) => Ok((137, String::new(), "\n[Process killed: timeout exceeded]".to_string())),
    }
}

pub struct DockerEnvironment {
    config: DockerEnvironmentConfig,
    container_workdir: String,
    container_name: String,
    container_id: Mutex<Option<String>>,
    max_output_chars: usize,
}

impl DockerEnvironment {
    pub fn new(config: DockerEnvironmentConfig, max_output_chars: Option<usize>, sandbox_id: &str) -> Self {
        let container_workdir = config.container_workdir.clone().unwrap_or_else(|| DEFAULT_CONTAINER_WORKDIR.to_string());
        let container_name = format!("polos-sandbox-{sandbox_id}");
        Self {
            config,
            container_workdir,
            container_name,
            container_id: Mutex::new(None),
            max_output_chars: max_output_chars.unwrap_or(DEFAULT_MAX_OUTPUT_CHARS),
        }
    }

    pub fn container_name(&self) -> &str {
        &self.container_name
    }

    pub async fn initialize(&self, labels: &HashMap<String, String>) -> Result<(), SandboxError> {
        let workspace_dir = self.config.workspace_dir.clone().unwrap_or_default();
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            self.container_name.clone(),
            "-v".to_string(),
            format!("{workspace_dir}:{}:rw", self.container_workdir),
            "-w".to_string(),
            self.container_workdir.clone(),
        ];

        if let Some(memory) = &self.config.memory {
            args.push("--memory".to_string());
            args.push(memory.clone());
        }
        if let Some(cpus) = &self.config.cpus {
            args.push("--cpus".to_string());
            args.push(cpus.clone());
        }
        args.push("--network".to_string());
        args.push(self.config.network.clone().unwrap_or_else(|| "none".to_string()));

        for (key, value) in labels {
            args.push("--label".to_string());
            args.push(format!("{key}={value}"));
        }
        args.extend(merge_env_args(&self.config.env));

        args.push(self.config.image.clone());
        args.push("sleep".to_string());
        args.push("infinity".to_string());

        let (exit_code, stdout, stderr) = spawn_command("docker", &args, Duration::from_secs(INIT_TIMEOUT_SECS), None).await?;
        if exit_code != 0 {
            return Err(SandboxError::DockerCreate(stderr.trim().to_string()));
        }
        *self.container_id.lock().await = Some(stdout.trim().chars().take(12).collect());

        if let Some(setup) = self.config.setup_command.clone() {
            let result = self.exec(&setup, ExecOptions::default()).await?;
            if result.exit_code != 0 {
                return Err(SandboxError::SetupFailed(result.exit_code, result.stderr.trim().to_string()));
            }
        }
        Ok(())
    }

    async fn assert_initialized(&self) -> Result<(), SandboxError> {
        if self.container_id.lock().await.is_none() {
            return Err(SandboxError::NotInitialized);
        }
        Ok(())
    }

    pub fn to_host_path(&self, container_path: &str) -> Result<PathBuf, SandboxError> {
        let resolved = crate::security::normalize(&Path::new(&self.container_workdir).join(container_path));
        if !resolved.starts_with(&self.container_workdir) {
            return Err(SandboxError::PathTraversal(container_path.to_string()));
        }
        let relative = resolved.strip_prefix(&self.container_workdir).unwrap_or(&resolved);
        let workspace_dir = self.config.workspace_dir.as_deref().unwrap_or_default();
        Ok(Path::new(workspace_dir).join(relative))
    }
}

#[async_trait]
impl ExecutionEnvironment for DockerEnvironment {
    async fn exec(&self, command: &str, opts: ExecOptions) -> Result<ExecResult, SandboxError> {
        self.assert_initialized().await?;

        let mut args = if opts.stdin.is_some() { vec!["exec".to_string(), "-i".to_string()] } else { vec!["exec".to_string()] };
        let cwd = opts.cwd.clone().unwrap_or_else(|| self.container_workdir.clone());
        args.push("-w".to_string());
        args.push(cwd);
        args.extend(merge_env_args(&opts.env));
        args.push(self.container_name.clone());
        args.push("sh".to_string());
        args.push("-c".to_string());
        args.push(command.to_string());

        let timeout = Duration::from_secs(opts.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS));
        let start = Instant::now();
        let (exit_code, stdout, stderr) = spawn_command("docker", &args, timeout, opts.stdin.as_deref()).await?;
        let duration_ms = start.elapsed().as_millis() as u64;

        let (stdout_clean, truncated) = truncate_output(&strip_ansi(&stdout), Some(self.max_output_chars));
        let (stderr_clean, _) = truncate_output(&strip_ansi(&stderr), Some(self.max_output_chars));
        Ok(ExecResult { exit_code, stdout: stdout_clean, stderr: stderr_clean, duration_ms, truncated })
    }

    async fn read_file(&self, path: &str) -> Result<String, SandboxError> {
        let host_path = self.to_host_path(path)?;
        let data = tokio::fs::read(&host_path).await?;
        if is_binary(&data) {
            return Err(SandboxError::BinaryFile(path.to_string()));
        }
        Ok(String::from_utf8_lossy(&data).into_owned())
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<(), SandboxError> {
        let host_path = self.to_host_path(path)?;
        if let Some(parent) = host_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&host_path, content).await?;
        Ok(())
    }

    async fn file_exists(&self, path: &str) -> bool {
        match self.to_host_path(path) {
            Ok(host_path) => tokio::fs::try_exists(host_path).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    async fn glob(&self, pattern: &str, opts: GlobOptions) -> Result<Vec<String>, SandboxError> {
        let cwd = opts.cwd.clone().unwrap_or_else(|| self.container_workdir.clone());
        let command = build_find_command(&cwd, pattern, &opts.ignore);
        let result = self.exec(&command, ExecOptions::default()).await?;
        Ok(result.stdout.trim().lines().filter(|l| !l.is_empty()).map(str::to_string).collect())
    }

    async fn grep(&self, pattern: &str, opts: GrepOptions) -> Result<Vec<GrepMatch>, SandboxError> {
        let cwd = opts.cwd.clone().unwrap_or_else(|| self.container_workdir.clone());
        let command = build_grep_command(&cwd, pattern, &opts);
        let result = self.exec(&command, ExecOptions::default()).await?;
        Ok(parse_grep_output(&result.stdout))
    }

    async fn destroy(&self) -> Result<(), SandboxError> {
        let mut guard = self.container_id.lock().await;
        if guard.is_none() {
            return Ok(());
        }
        let _ = spawn_command("docker", &["rm".to_string(), "-f".to_string(), self.container_name.clone()], Duration::from_secs(30), None).await;
        *guard = None;
        Ok(())
    }

    fn get_cwd(&self) -> String {
        self.container_workdir.clone()
    }

    fn get_info(&self) -> EnvironmentInfo {
        EnvironmentInfo { kind: EnvironmentKind::Docker, cwd: self.container_workdir.clone(), sandbox_id: None }
    }
}

/// True when a docker-exec health-check error indicates the container is
/// gone, per §9: only these two messages trigger a recreate.
pub fn is_dead_container_error(message: &str) -> bool {
    message.contains("No such container") || message.contains("is not running")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dead_container_errors_are_recognized() {
        assert!(is_dead_container_error("Error: No such container: abc123"));
        assert!(is_dead_container_error("container abc is not running"));
        assert!(!is_dead_container_error("connection timed out"));
    }

    #[test]
    fn host_path_rejects_traversal_outside_workdir() {
        let config = DockerEnvironmentConfig { image: "node:20".into(), workspace_dir: Some("/host/ws".into()), ..Default::default() };
        let env = DockerEnvironment::new(config, None, "abc12345");
        assert!(env.to_host_path("../../etc/passwd").is_err());
        assert!(env.to_host_path("src/lib.rs").is_ok());
    }
}

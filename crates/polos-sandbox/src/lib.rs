//! Sandbox manager (C9): execution environments (Docker/local), the manager
//! that owns their lifecycle, and the exec/read/write/edit/glob/grep tool
//! surface agents use to drive them. Grounded in
//! `examples/original_source/sdk/python/polos/execution/`.

pub mod docker;
pub mod duration;
pub mod environment;
pub mod error;
pub mod local;
pub mod manager;
pub mod sandbox;
pub mod security;
pub mod output;
pub mod tools;
pub mod types;

use std::sync::Arc;

use polos_agent::ToolHandler;

pub use environment::ExecutionEnvironment;
pub use error::SandboxError;
pub use manager::SandboxManager;
pub use sandbox::ManagedSandbox;
pub use types::{
    DockerEnvironmentConfig, EnvironmentInfo, EnvironmentKind, ExecOptions, ExecResult, ExecSecurity, ExecToolConfig,
    FileApproval, GlobOptions, GrepMatch, GrepOptions, LocalEnvironmentConfig, PathRestriction, SandboxScope, SandboxTool,
    SandboxToolsConfig,
};

use tools::{EditTool, ExecTool, GlobTool, GrepTool, ReadTool, SandboxContext, WriteTool};

/// Builds the exec/read/write/edit/glob/grep tools for an agent, all sharing
/// one lazily-initialized sandbox per root execution, grounded in
/// `examples/original_source/sdk/python/polos/execution/sandbox_tools.py`.
pub fn sandbox_tools(manager: Arc<SandboxManager>, config: SandboxToolsConfig) -> Result<Vec<Arc<dyn ToolHandler>>, SandboxError> {
    if config.env == Some(EnvironmentKind::E2b) {
        return Err(SandboxError::E2bUnimplemented);
    }

    // Local mode has no container isolation, so exec defaults to requiring
    // approval unless the caller explicitly chose a security mode.
    let exec_config = if config.env == Some(EnvironmentKind::Local) && config.exec.as_ref().and_then(|c| c.security).is_none() {
        let mut exec = config.exec.clone().unwrap_or_default();
        exec.security = Some(ExecSecurity::ApprovalAlways);
        Some(exec)
    } else {
        config.exec.clone()
    };

    let ctx = SandboxContext::new(manager, config.clone());

    let mut tools: Vec<Arc<dyn ToolHandler>> = Vec::new();
    if config.includes(SandboxTool::Exec) {
        tools.push(Arc::new(ExecTool::new(ctx.clone(), exec_config)));
    }
    if config.includes(SandboxTool::Read) {
        tools.push(Arc::new(ReadTool::new(ctx.clone())));
    }
    if config.includes(SandboxTool::Write) {
        tools.push(Arc::new(WriteTool::new(ctx.clone(), config.file_approval)));
    }
    if config.includes(SandboxTool::Edit) {
        tools.push(Arc::new(EditTool::new(ctx.clone(), config.file_approval)));
    }
    if config.includes(SandboxTool::Glob) {
        tools.push(Arc::new(GlobTool::new(ctx.clone())));
    }
    if config.includes(SandboxTool::Grep) {
        tools.push(Arc::new(GrepTool::new(ctx)));
    }
    Ok(tools)
}

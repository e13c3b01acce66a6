//! `SandboxError` — the error surface for environment init, command
//! execution, and file operations, grounded in
//! `examples/original_source/sdk/python/polos/execution/{docker,local}.py`'s
//! `RuntimeError`/`ValueError` raises.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("sandbox {0} has been destroyed")]
    Destroyed(String),

    #[error("sandbox environment not initialized")]
    NotInitialized,

    #[error("failed to create docker container: {0}")]
    DockerCreate(String),

    #[error("sandbox environment initialization failed: {0}")]
    InitFailed(String),

    #[error("docker command failed: {0}")]
    DockerExec(String),

    #[error("setup command failed (exit {0}): {1}")]
    SetupFailed(i32, String),

    #[error("working directory does not exist: {0}")]
    MissingWorkdir(String),

    #[error("working directory is not a directory: {0}")]
    NotADirectory(String),

    #[error("path traversal detected: \"{0}\" resolves outside workspace")]
    PathTraversal(String),

    #[error("symbolic link detected: \"{0}\"; symlinks are blocked when path_restriction is set")]
    SymlinkBlocked(String),

    #[error("cannot read binary file: {0}")]
    BinaryFile(String),

    #[error("old_text not found in {0}")]
    EditNoMatch(String),

    #[error("command rejected by user: {0}")]
    CommandRejected(String),

    #[error("access to \"{0}\" was rejected by the user")]
    AccessRejected(String),

    #[error("session_id is required for session-scoped sandboxes")]
    MissingSessionId,

    #[error("e2b environment is not yet implemented")]
    E2bUnimplemented,

    #[error("unknown environment type: {0}")]
    UnknownEnvironment(String),

    #[error("invalid duration \"{0}\": expected format like \"30m\", \"1h\", \"3d\"")]
    InvalidDuration(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Client(#[from] polos_contracts::ClientError),
}

//! Command execution seams used by post-setup commands.
//!
//! Commands reach a task namespace either through the container runtime's
//! exec protocol, run inside the pause container, or as host processes.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use taskwire_common::{TaskwireError, TaskwireResult};
use tokio::process::Command;

/// Budget for registering an exec with the container runtime.
pub const EXEC_CREATE_TIMEOUT: Duration = Duration::from_secs(60);
/// Budget for starting an exec and waiting for it to finish.
pub const EXEC_START_TIMEOUT: Duration = Duration::from_secs(60);
/// Budget for reading an exec's status.
pub const EXEC_INSPECT_TIMEOUT: Duration = Duration::from_secs(30);

/// What to run inside a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecConfig {
    /// Command and arguments.
    pub cmd: Vec<String>,
    /// Identity to run as.
    pub user: String,
    /// Run in the background instead of attaching.
    pub detach: bool,
}

/// Handle returned by the runtime for a created exec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecHandle {
    /// Runtime assigned exec ID.
    pub id: String,
}

/// Status of an exec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecInspect {
    /// Still running.
    pub running: bool,
    /// Recorded exit code.
    pub exit_code: i64,
}

/// The container runtime's remote command protocol.
#[async_trait]
pub trait ContainerExec: Send + Sync {
    /// Register a command in a container.
    async fn create_exec(
        &self,
        container_id: &str,
        config: &ExecConfig,
        timeout: Duration,
    ) -> TaskwireResult<ExecHandle>;

    /// Start a registered command.
    async fn start_exec(&self, handle: &ExecHandle, timeout: Duration) -> TaskwireResult<()>;

    /// Read a command's status.
    async fn inspect_exec(&self, handle: &ExecHandle, timeout: Duration)
    -> TaskwireResult<ExecInspect>;
}

/// Runs commands as host processes.
#[async_trait]
pub trait HostCommandRunner: Send + Sync {
    /// Run a command to completion.
    async fn run(&self, program: &str, args: &[String], timeout: Duration) -> TaskwireResult<()>;
}

/// [`HostCommandRunner`] backed by `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandRunner;

#[async_trait]
impl HostCommandRunner for SystemCommandRunner {
    async fn run(&self, program: &str, args: &[String], timeout: Duration) -> TaskwireResult<()> {
        let rendered = render(program, args);
        tracing::debug!(command = %rendered, "Running host command");

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TaskwireError::ExecutionFailure {
                command: rendered.clone(),
                message: format!("failed to spawn: {e}"),
            })?;

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| TaskwireError::Timeout {
                operation: "host command".to_string(),
                interface: rendered.clone(),
                after: timeout,
            })??;

        if !output.status.success() {
            return Err(TaskwireError::ExecutionFailure {
                command: rendered,
                message: format!(
                    "exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(())
    }
}

pub(crate) fn render(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

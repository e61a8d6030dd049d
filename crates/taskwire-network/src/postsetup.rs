//! Commands run after the plugins have wired a task namespace.
//!
//! The bridge plugin installs a default route through the task bridge that
//! has to be replaced. Depending on whether the task may reach the instance
//! metadata service, a host route to it is restored or a firewall rule
//! blocks it.

use std::fmt;
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use taskwire_common::{TaskwireError, TaskwireResult};

use crate::config::TaskNetworkConfig;
use crate::exec::{
    ContainerExec, EXEC_CREATE_TIMEOUT, EXEC_INSPECT_TIMEOUT, EXEC_START_TIMEOUT, ExecConfig,
    HostCommandRunner, render,
};
use crate::plugin::PluginResult;

/// Instance metadata service address.
pub const INSTANCE_METADATA_ADDRESS: &str = "169.254.169.254";
/// Route management executable inside the pause container.
pub const ROUTE_EXECUTABLE: &str = "route";
/// Identity post-setup commands run as inside the pause container.
pub const PAUSE_CONTAINER_USER: &str = "ContainerAdministrator";

/// Where a command runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandTarget {
    /// Inside the pause container, through the runtime's exec protocol.
    PauseContainer,
    /// As a host process.
    Host,
}

/// A post-setup command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostSetupCommand {
    /// Drop the default route the bridge plugin installed.
    DeleteDefaultRoute {
        /// Gateway the plugin routed through.
        gateway: IpAddr,
    },
    /// Route metadata traffic through the task's primary gateway.
    AddMetadataRoute {
        /// Task's primary gateway.
        gateway: Ipv4Addr,
    },
    /// Block metadata traffic from the task's primary IP.
    BlockMetadata {
        /// Task's primary IP.
        task_ip: Ipv4Addr,
    },
}

impl PostSetupCommand {
    /// Where the command runs.
    #[must_use]
    pub const fn target(&self) -> CommandTarget {
        match self {
            Self::DeleteDefaultRoute { .. } | Self::AddMetadataRoute { .. } => {
                CommandTarget::PauseContainer
            }
            Self::BlockMetadata { .. } => CommandTarget::Host,
        }
    }

    /// Program and arguments.
    #[must_use]
    pub fn argv(&self) -> (String, Vec<String>) {
        match self {
            Self::DeleteDefaultRoute { gateway } => (
                ROUTE_EXECUTABLE.to_string(),
                strings(&["delete", "0.0.0.0", "MASK", "0.0.0.0", &gateway.to_string()]),
            ),
            Self::AddMetadataRoute { gateway } => (
                ROUTE_EXECUTABLE.to_string(),
                strings(&[
                    "add",
                    INSTANCE_METADATA_ADDRESS,
                    "MASK",
                    "255.255.255.255",
                    &gateway.to_string(),
                ]),
            ),
            Self::BlockMetadata { task_ip } => (
                "cmd".to_string(),
                vec![
                    "/C".to_string(),
                    format!(
                        "netsh advfirewall firewall add rule name=\"Disable IMDS for {task_ip}\" \
                         dir=out localip={task_ip} remoteip={INSTANCE_METADATA_ADDRESS} action=block"
                    ),
                ],
            ),
        }
    }
}

impl fmt::Display for PostSetupCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (program, args) = self.argv();
        f.write_str(&render(&program, &args))
    }
}

fn strings(parts: &[&str]) -> Vec<String> {
    parts.iter().map(ToString::to_string).collect()
}

/// Commands to run for a task, in order.
///
/// # Errors
///
/// Returns [`TaskwireError::MalformedInput`] if the setup result reports no
/// gateway, or the configuration lacks the task primary gateway (metadata
/// allowed) or task primary IP (metadata blocked).
pub fn plan_post_setup_commands(
    config: &TaskNetworkConfig,
    result: &PluginResult,
) -> TaskwireResult<Vec<PostSetupCommand>> {
    let gateway = result.first_gateway().ok_or_else(|| {
        TaskwireError::malformed(format!(
            "setup result for container {} reports no gateway",
            config.container_id
        ))
    })?;
    let mut commands = vec![PostSetupCommand::DeleteDefaultRoute { gateway }];

    if config.block_instance_metadata {
        let task_ip = config.task_primary_ip.ok_or_else(|| {
            TaskwireError::malformed("blocking instance metadata requires the task primary ip")
        })?;
        commands.push(PostSetupCommand::BlockMetadata { task_ip });
    } else {
        let gateway = config.task_primary_gateway.ok_or_else(|| {
            TaskwireError::malformed("instance metadata route requires the task primary gateway")
        })?;
        commands.push(PostSetupCommand::AddMetadataRoute { gateway });
    }
    Ok(commands)
}

/// Per-step budgets for post-setup commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecTimeouts {
    /// Exec create.
    pub create: Duration,
    /// Exec start.
    pub start: Duration,
    /// Exec inspect.
    pub inspect: Duration,
    /// Host commands.
    pub host: Duration,
}

impl Default for ExecTimeouts {
    fn default() -> Self {
        Self {
            create: EXEC_CREATE_TIMEOUT,
            start: EXEC_START_TIMEOUT,
            inspect: EXEC_INSPECT_TIMEOUT,
            host: EXEC_START_TIMEOUT,
        }
    }
}

/// Runs post-setup commands for a task.
#[derive(Clone)]
pub struct PostSetupExecutor {
    exec: Arc<dyn ContainerExec>,
    host: Arc<dyn HostCommandRunner>,
    timeouts: ExecTimeouts,
}

impl fmt::Debug for PostSetupExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostSetupExecutor")
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}

impl PostSetupExecutor {
    /// Create an executor.
    pub fn new(exec: Arc<dyn ContainerExec>, host: Arc<dyn HostCommandRunner>) -> Self {
        Self {
            exec,
            host,
            timeouts: ExecTimeouts::default(),
        }
    }

    /// Override the step budgets.
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: ExecTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Plan and run the post-setup commands for a task.
    ///
    /// Commands run in order; the first failure aborts the rest.
    ///
    /// # Errors
    ///
    /// Returns planning errors, [`TaskwireError::Timeout`] when a step runs
    /// out of time, or [`TaskwireError::ExecutionFailure`] otherwise.
    pub async fn run(
        &self,
        task: &str,
        config: &TaskNetworkConfig,
        result: &PluginResult,
    ) -> TaskwireResult<()> {
        let commands = plan_post_setup_commands(config, result)?;
        for command in &commands {
            tracing::info!(task, command = %command, "Executing command inside pause namespace");
            let outcome = match command.target() {
                CommandTarget::PauseContainer => {
                    self.run_in_container(&config.container_id, command).await
                }
                CommandTarget::Host => {
                    let (program, args) = command.argv();
                    self.host.run(&program, &args, self.timeouts.host).await
                }
            };
            outcome.inspect_err(|e| {
                tracing::error!(task, command = %command, error = %e, "Post-setup command failed");
            })?;
        }
        Ok(())
    }

    async fn run_in_container(
        &self,
        container_id: &str,
        command: &PostSetupCommand,
    ) -> TaskwireResult<()> {
        let rendered = command.to_string();
        let (program, args) = command.argv();
        let config = ExecConfig {
            cmd: std::iter::once(program).chain(args).collect(),
            user: PAUSE_CONTAINER_USER.to_string(),
            detach: false,
        };

        let handle = step(
            "exec create",
            &rendered,
            self.timeouts.create,
            self.exec
                .create_exec(container_id, &config, self.timeouts.create),
        )
        .await?;

        step(
            "exec start",
            &rendered,
            self.timeouts.start,
            self.exec.start_exec(&handle, self.timeouts.start),
        )
        .await?;

        let inspect = step(
            "exec inspect",
            &rendered,
            self.timeouts.inspect,
            self.exec.inspect_exec(&handle, self.timeouts.inspect),
        )
        .await?;

        if inspect.exit_code != 0 {
            return Err(TaskwireError::ExecutionFailure {
                command: rendered,
                message: format!(
                    "exit code {} (running: {})",
                    inspect.exit_code, inspect.running
                ),
            });
        }
        tracing::debug!(exec_id = %handle.id, command = %rendered, "Command completed");
        Ok(())
    }
}

/// Run one exec step under its own budget. Timeouts pass through; other
/// failures are attributed to the command.
async fn step<T, F>(
    operation: &str,
    command: &str,
    budget: Duration,
    future: F,
) -> TaskwireResult<T>
where
    F: Future<Output = TaskwireResult<T>>,
{
    match tokio::time::timeout(budget, future).await {
        Err(_) => Err(TaskwireError::Timeout {
            operation: operation.to_string(),
            interface: command.to_string(),
            after: budget,
        }),
        Ok(Err(e)) if e.is_timeout() => Err(e),
        Ok(Err(e)) => Err(TaskwireError::ExecutionFailure {
            command: command.to_string(),
            message: format!("{operation}: {e}"),
        }),
        Ok(Ok(value)) => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{ExecHandle, ExecInspect};
    use crate::plugin::IpConfig;
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn config(block: bool) -> TaskNetworkConfig {
        TaskNetworkConfig::new("pause-1", "container:pause-1", "10.0.0.0/16".parse().unwrap())
            .with_block_instance_metadata(block)
            .with_task_primary(Ipv4Addr::new(10, 0, 0, 120), Ipv4Addr::new(10, 0, 0, 1))
    }

    fn setup_result() -> PluginResult {
        PluginResult {
            ips: vec![IpConfig {
                address: "172.31.0.2/24".to_string(),
                gateway: Some("172.31.0.1".parse().unwrap()),
                interface: None,
            }],
            ..PluginResult::default()
        }
    }

    #[derive(Default)]
    struct RecordingExec {
        commands: Mutex<Vec<Vec<String>>>,
        users: Mutex<Vec<String>>,
        exit_code: i64,
        running: bool,
        stall_create: bool,
        stall_start: bool,
        stall_inspect: bool,
    }

    #[async_trait]
    impl ContainerExec for RecordingExec {
        async fn create_exec(
            &self,
            _container_id: &str,
            config: &ExecConfig,
            _timeout: Duration,
        ) -> TaskwireResult<ExecHandle> {
            self.commands.lock().unwrap().push(config.cmd.clone());
            self.users.lock().unwrap().push(config.user.clone());
            if self.stall_create {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok(ExecHandle {
                id: "exec-1".to_string(),
            })
        }

        async fn start_exec(&self, _handle: &ExecHandle, _timeout: Duration) -> TaskwireResult<()> {
            if self.stall_start {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok(())
        }

        async fn inspect_exec(
            &self,
            _handle: &ExecHandle,
            _timeout: Duration,
        ) -> TaskwireResult<ExecInspect> {
            if self.stall_inspect {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok(ExecInspect {
                running: self.running,
                exit_code: self.exit_code,
            })
        }
    }

    #[derive(Default)]
    struct RecordingHost {
        commands: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl HostCommandRunner for RecordingHost {
        async fn run(&self, program: &str, args: &[String], _timeout: Duration) -> TaskwireResult<()> {
            self.commands.lock().unwrap().push(render(program, args));
            Ok(())
        }
    }

    #[test]
    fn plan_allows_metadata() {
        let plan = plan_post_setup_commands(&config(false), &setup_result()).unwrap();
        assert_eq!(
            plan,
            [
                PostSetupCommand::DeleteDefaultRoute {
                    gateway: "172.31.0.1".parse().unwrap()
                },
                PostSetupCommand::AddMetadataRoute {
                    gateway: Ipv4Addr::new(10, 0, 0, 1)
                },
            ]
        );
        assert_eq!(
            plan[0].to_string(),
            "route delete 0.0.0.0 MASK 0.0.0.0 172.31.0.1"
        );
        assert_eq!(
            plan[1].to_string(),
            "route add 169.254.169.254 MASK 255.255.255.255 10.0.0.1"
        );
    }

    #[test]
    fn plan_blocks_metadata() {
        let plan = plan_post_setup_commands(&config(true), &setup_result()).unwrap();
        assert_eq!(plan.len(), 2);
        assert!(
            !plan
                .iter()
                .any(|c| matches!(c, PostSetupCommand::AddMetadataRoute { .. }))
        );
        assert_eq!(plan[1].target(), CommandTarget::Host);
        assert!(plan[1].to_string().contains("localip=10.0.0.120"));
    }

    #[test]
    fn plan_needs_gateway() {
        let err = plan_post_setup_commands(&config(false), &PluginResult::default()).unwrap_err();
        assert!(matches!(err, TaskwireError::MalformedInput { .. }));
    }

    #[tokio::test]
    async fn runs_route_commands_in_pause_container() {
        let exec = Arc::new(RecordingExec::default());
        let host = Arc::new(RecordingHost::default());
        let executor = PostSetupExecutor::new(exec.clone(), host.clone());

        executor
            .run("task-1", &config(false), &setup_result())
            .await
            .unwrap();

        let commands = exec.commands.lock().unwrap();
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0][..2], ["route", "delete"]);
        assert_eq!(commands[1][..3], ["route", "add", INSTANCE_METADATA_ADDRESS]);
        assert!(
            exec.users
                .lock()
                .unwrap()
                .iter()
                .all(|u| u == PAUSE_CONTAINER_USER)
        );
        assert!(host.commands.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn firewall_rule_runs_on_host() {
        let exec = Arc::new(RecordingExec::default());
        let host = Arc::new(RecordingHost::default());
        let executor = PostSetupExecutor::new(exec.clone(), host.clone());

        executor
            .run("task-1", &config(true), &setup_result())
            .await
            .unwrap();

        assert_eq!(exec.commands.lock().unwrap().len(), 1);
        let host_commands = host.commands.lock().unwrap();
        assert_eq!(host_commands.len(), 1);
        assert!(host_commands[0].starts_with("cmd /C netsh advfirewall"));
    }

    #[tokio::test]
    async fn non_zero_exit_aborts_remaining_commands() {
        let exec = Arc::new(RecordingExec {
            exit_code: 1,
            ..RecordingExec::default()
        });
        let executor = PostSetupExecutor::new(exec.clone(), Arc::new(RecordingHost::default()));

        let err = executor
            .run("task-1", &config(false), &setup_result())
            .await
            .unwrap_err();

        assert!(matches!(err, TaskwireError::ExecutionFailure { ref command, .. } if command.starts_with("route delete")));
        assert_eq!(exec.commands.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn start_timeout_is_surfaced() {
        let exec = Arc::new(RecordingExec {
            stall_start: true,
            ..RecordingExec::default()
        });
        let executor = PostSetupExecutor::new(exec.clone(), Arc::new(RecordingHost::default()));

        let err = executor
            .run("task-1", &config(false), &setup_result())
            .await
            .unwrap_err();

        assert!(matches!(err, TaskwireError::Timeout { ref operation, .. } if operation == "exec start"));
        assert_eq!(exec.commands.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn running_with_non_zero_exit_fails() {
        let exec = Arc::new(RecordingExec {
            running: true,
            exit_code: 5,
            ..RecordingExec::default()
        });
        let executor = PostSetupExecutor::new(exec.clone(), Arc::new(RecordingHost::default()));

        let err = executor
            .run("task-1", &config(false), &setup_result())
            .await
            .unwrap_err();

        match err {
            TaskwireError::ExecutionFailure { message, .. } => {
                assert_eq!(message, "exit code 5 (running: true)");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(exec.commands.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn create_timeout_is_surfaced() {
        let exec = Arc::new(RecordingExec {
            stall_create: true,
            ..RecordingExec::default()
        });
        let executor = PostSetupExecutor::new(exec.clone(), Arc::new(RecordingHost::default()));

        let err = executor
            .run("task-1", &config(false), &setup_result())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TaskwireError::Timeout { ref operation, after, .. }
                if operation == "exec create" && after == EXEC_CREATE_TIMEOUT
        ));
        assert_eq!(exec.commands.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn inspect_timeout_uses_its_own_budget() {
        let exec = Arc::new(RecordingExec {
            stall_inspect: true,
            ..RecordingExec::default()
        });
        let executor = PostSetupExecutor::new(exec.clone(), Arc::new(RecordingHost::default()))
            .with_timeouts(ExecTimeouts {
                inspect: Duration::from_secs(5),
                ..ExecTimeouts::default()
            });

        let started = tokio::time::Instant::now();
        let err = executor
            .run("task-1", &config(false), &setup_result())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TaskwireError::Timeout { ref operation, after, .. }
                if operation == "exec inspect" && after == Duration::from_secs(5)
        ));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(5) && elapsed < EXEC_INSPECT_TIMEOUT);
    }
}

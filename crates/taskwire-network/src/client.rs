//! Plugin orchestration for task namespaces.
//!
//! [`CniClient`] applies a task's registered plugin configurations in order
//! and tears them down best-effort. Each call shares one deadline across all
//! of its steps. Dropping the returned future cancels the in-flight plugin
//! call; steps that already completed are not rolled back.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use taskwire_common::{PluginEnvironment, TaskwireError, TaskwireResult};
use tokio::time::Instant;

use crate::config::TaskNetworkConfig;
use crate::netconfig::NamedPluginConfig;
use crate::platform::{PlatformNetworking, host_platform};
use crate::plugin::{ExecPluginInvoker, PluginInvoker, PluginResult, RuntimeConf};
use crate::postsetup::PostSetupExecutor;

/// Drives the plugin invocation protocol for task namespaces.
#[derive(Clone)]
pub struct CniClient {
    invoker: Arc<dyn PluginInvoker>,
    platform: Arc<dyn PlatformNetworking>,
}

impl fmt::Debug for CniClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CniClient")
            .field("platform", &self.platform.name())
            .finish_non_exhaustive()
    }
}

impl CniClient {
    /// Create a client from an invoker and a platform strategy.
    pub fn new(invoker: Arc<dyn PluginInvoker>, platform: Arc<dyn PlatformNetworking>) -> Self {
        Self { invoker, platform }
    }

    /// Client running plugin executables, with this host's platform strategy.
    #[must_use]
    pub fn for_host(env: PluginEnvironment) -> Self {
        Self::new(Arc::new(ExecPluginInvoker::new(env)), host_platform())
    }

    /// The platform strategy in use.
    #[must_use]
    pub fn platform(&self) -> &dyn PlatformNetworking {
        self.platform.as_ref()
    }

    /// Apply every registered configuration, in order.
    ///
    /// Stops at the first failure without undoing earlier steps; call
    /// [`Self::cleanup_ns`] for that. Returns the result of the last step.
    ///
    /// # Errors
    ///
    /// Returns [`TaskwireError::Config`] for an empty registry,
    /// [`TaskwireError::Timeout`] when the deadline passes, or
    /// [`TaskwireError::PluginInvocation`] naming the failing interface.
    pub async fn setup_ns(
        &self,
        config: &TaskNetworkConfig,
        timeout: Duration,
    ) -> TaskwireResult<PluginResult> {
        config.validate()?;
        let deadline = Instant::now() + timeout;
        let mut last = PluginResult::default();

        for network in &config.network_configs {
            if Instant::now() >= deadline {
                return Err(timeout_error("ADD", network, timeout));
            }
            let runtime = runtime_conf(config, network);
            tracing::debug!(
                container_id = %config.container_id,
                interface = %network.interface_name,
                plugin = %network.plugin_type,
                network = %network.network_name,
                "Adding network"
            );

            last = invoke_with_deadline(
                "ADD",
                &network.interface_name,
                timeout,
                deadline,
                self.invoker.add_network(network, &runtime),
            )
            .await
            .inspect_err(|e| {
                tracing::error!(
                    container_id = %config.container_id,
                    interface = %network.interface_name,
                    error = %e,
                    "Unable to set up task namespace"
                );
            })?;

            if self.platform.is_bridge_plugin_execution(network) {
                tracing::debug!(
                    container_id = %config.container_id,
                    gateway = ?last.first_gateway(),
                    "Task bridge configured"
                );
            }
        }

        tracing::info!(
            container_id = %config.container_id,
            steps = config.network_configs.len(),
            "Task namespace set up"
        );
        Ok(last)
    }

    /// Remove every registered configuration, in registration order.
    ///
    /// Every step is attempted even after a failure; the last failure is
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns [`TaskwireError::Config`] for an empty registry, otherwise the
    /// last step failure observed.
    pub async fn cleanup_ns(
        &self,
        config: &TaskNetworkConfig,
        timeout: Duration,
    ) -> TaskwireResult<()> {
        config.validate()?;
        let deadline = Instant::now() + timeout;
        let mut last_error = None;

        for network in &config.network_configs {
            let runtime = runtime_conf(config, network);
            tracing::debug!(
                container_id = %config.container_id,
                interface = %network.interface_name,
                plugin = %network.plugin_type,
                "Deleting network"
            );

            let outcome = invoke_with_deadline(
                "DEL",
                &network.interface_name,
                timeout,
                deadline,
                self.invoker.del_network(network, &runtime),
            )
            .await;

            if let Err(e) = outcome {
                tracing::warn!(
                    container_id = %config.container_id,
                    interface = %network.interface_name,
                    error = %e,
                    "Failed to clean up network, continuing"
                );
                last_error = Some(e);
            }
        }

        match last_error {
            Some(e) => Err(e),
            None => {
                tracing::info!(container_id = %config.container_id, "Task namespace cleaned up");
                Ok(())
            }
        }
    }

    /// Return a task's address to the address manager.
    ///
    /// # Errors
    ///
    /// Platform dependent; see [`PlatformNetworking::release_ip_resource`].
    pub async fn release_ip_resource(
        &self,
        config: &TaskNetworkConfig,
        timeout: Duration,
    ) -> TaskwireResult<()> {
        self.platform
            .release_ip_resource(self.invoker.as_ref(), config, timeout)
            .await
    }

    /// Whether this platform needs post-setup commands for the task.
    #[must_use]
    pub fn requires_post_setup(&self, config: &TaskNetworkConfig) -> bool {
        config
            .network_configs
            .iter()
            .any(|network| self.platform.is_bridge_plugin_execution(network))
    }

    /// Run the platform's post-setup commands.
    ///
    /// # Errors
    ///
    /// Platform dependent; see [`PlatformNetworking::run_post_setup_commands`].
    pub async fn run_post_setup_commands(
        &self,
        executor: &PostSetupExecutor,
        task: &str,
        config: &TaskNetworkConfig,
        result: &PluginResult,
    ) -> TaskwireResult<()> {
        self.platform
            .run_post_setup_commands(executor, task, config, result)
            .await
    }

    /// Rendered version of a plugin, or `""` if it reports nothing usable.
    ///
    /// # Errors
    ///
    /// Returns the invoker's error when the plugin cannot be run.
    pub async fn plugin_version(&self, plugin: &str) -> TaskwireResult<String> {
        let raw = self.invoker.version(plugin).await?;
        Ok(self.platform.parse_version(&raw))
    }
}

fn runtime_conf(config: &TaskNetworkConfig, network: &NamedPluginConfig) -> RuntimeConf {
    RuntimeConf {
        container_id: config.container_id.clone(),
        netns: config.container_netns.clone(),
        interface_name: network.interface_name.clone(),
    }
}

fn timeout_error(operation: &str, network: &NamedPluginConfig, budget: Duration) -> TaskwireError {
    TaskwireError::Timeout {
        operation: operation.to_string(),
        interface: network.interface_name.clone(),
        after: budget,
    }
}

/// Await one plugin call against a shared deadline. Timeouts pass through
/// unwrapped; other failures are attributed to the interface.
pub(crate) async fn invoke_with_deadline<T, F>(
    operation: &str,
    interface: &str,
    budget: Duration,
    deadline: Instant,
    call: F,
) -> TaskwireResult<T>
where
    F: Future<Output = TaskwireResult<T>>,
{
    match tokio::time::timeout_at(deadline, call).await {
        Err(_) => Err(TaskwireError::Timeout {
            operation: operation.to_string(),
            interface: interface.to_string(),
            after: budget,
        }),
        Ok(Err(e)) if e.is_timeout() => Err(e),
        Ok(Err(e)) => Err(TaskwireError::PluginInvocation {
            interface: interface.to_string(),
            source: Box::new(e),
        }),
        Ok(Ok(value)) => Ok(value),
    }
}

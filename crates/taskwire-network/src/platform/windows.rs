//! Windows hosts.

use std::time::Duration;

use async_trait::async_trait;
use taskwire_common::TaskwireResult;

use super::PlatformNetworking;
use crate::config::TaskNetworkConfig;
use crate::netconfig::{DEFAULT_BRIDGE_NETWORK_NAME, NamedPluginConfig, VPC_SHARED_ENI_PLUGIN};
use crate::plugin::{PluginInvoker, PluginResult};
use crate::postsetup::PostSetupExecutor;
use crate::version::parse_windows_version;

/// Windows strategy: the host network service manages addresses, and the
/// task bridge needs route fix-ups inside the pause container.
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowsNetworking;

#[async_trait]
impl PlatformNetworking for WindowsNetworking {
    fn name(&self) -> &'static str {
        "windows"
    }

    async fn release_ip_resource(
        &self,
        _invoker: &dyn PluginInvoker,
        _config: &TaskNetworkConfig,
        _timeout: Duration,
    ) -> TaskwireResult<()> {
        Ok(())
    }

    async fn run_post_setup_commands(
        &self,
        executor: &PostSetupExecutor,
        task: &str,
        config: &TaskNetworkConfig,
        result: &PluginResult,
    ) -> TaskwireResult<()> {
        executor.run(task, config, result).await
    }

    fn parse_version(&self, raw: &str) -> String {
        parse_windows_version(raw)
    }

    fn is_bridge_plugin_execution(&self, config: &NamedPluginConfig) -> bool {
        config.plugin_type == VPC_SHARED_ENI_PLUGIN
            && config.network_name == DEFAULT_BRIDGE_NETWORK_NAME
    }
}

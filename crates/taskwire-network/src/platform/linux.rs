//! Linux hosts.

use std::time::Duration;

use async_trait::async_trait;
use taskwire_common::TaskwireResult;

use super::PlatformNetworking;
use crate::client::invoke_with_deadline;
use crate::config::TaskNetworkConfig;
use crate::netconfig::{ECS_BRIDGE_PLUGIN, NamedPluginConfig, build_ipam_config};
use crate::plugin::{PluginInvoker, PluginResult, RuntimeConf};
use crate::postsetup::PostSetupExecutor;
use crate::version::parse_linux_version;

/// Linux strategy: the address manager plugin owns task addresses and the
/// bridge plugin configures routes itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinuxNetworking;

#[async_trait]
impl PlatformNetworking for LinuxNetworking {
    fn name(&self) -> &'static str {
        "linux"
    }

    async fn release_ip_resource(
        &self,
        invoker: &dyn PluginInvoker,
        config: &TaskNetworkConfig,
        timeout: Duration,
    ) -> TaskwireResult<()> {
        let ipam = build_ipam_config(config)?;
        let runtime = RuntimeConf {
            container_id: config.container_id.clone(),
            netns: config.container_netns.clone(),
            interface_name: ipam.interface_name.clone(),
        };

        tracing::debug!(
            id = %config.id,
            address = ?config.ipam_v4_address,
            "Releasing ip resource from address manager"
        );

        let deadline = tokio::time::Instant::now() + timeout;
        invoke_with_deadline(
            "DEL",
            &ipam.interface_name,
            timeout,
            deadline,
            invoker.del_network(&ipam, &runtime),
        )
        .await
    }

    async fn run_post_setup_commands(
        &self,
        _executor: &PostSetupExecutor,
        _task: &str,
        _config: &TaskNetworkConfig,
        _result: &PluginResult,
    ) -> TaskwireResult<()> {
        Ok(())
    }

    fn parse_version(&self, raw: &str) -> String {
        parse_linux_version(raw)
    }

    fn is_bridge_plugin_execution(&self, config: &NamedPluginConfig) -> bool {
        config.plugin_type == ECS_BRIDGE_PLUGIN
    }
}

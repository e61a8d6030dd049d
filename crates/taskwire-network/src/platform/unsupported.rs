//! Hosts without task networking support.

use std::time::Duration;

use async_trait::async_trait;
use taskwire_common::{TaskwireError, TaskwireResult};

use super::PlatformNetworking;
use crate::config::TaskNetworkConfig;
use crate::netconfig::NamedPluginConfig;
use crate::plugin::{PluginInvoker, PluginResult};
use crate::postsetup::PostSetupExecutor;

/// Strategy for hosts that cannot wire task namespaces. Operations fail
/// loudly instead of succeeding silently.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedNetworking;

#[async_trait]
impl PlatformNetworking for UnsupportedNetworking {
    fn name(&self) -> &'static str {
        "unsupported"
    }

    async fn release_ip_resource(
        &self,
        _invoker: &dyn PluginInvoker,
        _config: &TaskNetworkConfig,
        _timeout: Duration,
    ) -> TaskwireResult<()> {
        Err(TaskwireError::UnsupportedPlatform {
            operation: "ip resource release".to_string(),
        })
    }

    async fn run_post_setup_commands(
        &self,
        _executor: &PostSetupExecutor,
        _task: &str,
        _config: &TaskNetworkConfig,
        _result: &PluginResult,
    ) -> TaskwireResult<()> {
        Err(TaskwireError::UnsupportedPlatform {
            operation: "post-setup commands".to_string(),
        })
    }

    fn parse_version(&self, _raw: &str) -> String {
        String::new()
    }

    fn is_bridge_plugin_execution(&self, _config: &NamedPluginConfig) -> bool {
        false
    }
}

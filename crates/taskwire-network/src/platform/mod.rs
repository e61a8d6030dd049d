//! Host platform strategies.
//!
//! Linux and windows hosts wire task namespaces differently: linux plugins
//! finish the job themselves and addresses come from a local address
//! manager, while windows needs follow-up commands inside the pause container
//! and leaves address management to the host network service. The strategy
//! is picked once, when the client is composed.

mod linux;
mod unsupported;
mod windows;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use taskwire_common::TaskwireResult;

use crate::config::TaskNetworkConfig;
use crate::netconfig::NamedPluginConfig;
use crate::plugin::{PluginInvoker, PluginResult};
use crate::postsetup::PostSetupExecutor;

pub use linux::LinuxNetworking;
pub use unsupported::UnsupportedNetworking;
pub use windows::WindowsNetworking;

/// Platform specific parts of task namespace provisioning.
#[async_trait]
pub trait PlatformNetworking: Send + Sync + fmt::Debug {
    /// Platform name, for logs.
    fn name(&self) -> &'static str;

    /// Return a task's address to the address manager.
    async fn release_ip_resource(
        &self,
        invoker: &dyn PluginInvoker,
        config: &TaskNetworkConfig,
        timeout: Duration,
    ) -> TaskwireResult<()>;

    /// Run follow-up commands after a successful setup.
    async fn run_post_setup_commands(
        &self,
        executor: &PostSetupExecutor,
        task: &str,
        config: &TaskNetworkConfig,
        result: &PluginResult,
    ) -> TaskwireResult<()>;

    /// Render a plugin's version document.
    fn parse_version(&self, raw: &str) -> String;

    /// Whether a configuration creates the task bridge.
    fn is_bridge_plugin_execution(&self, config: &NamedPluginConfig) -> bool;
}

/// The strategy for the platform this binary was built for.
#[must_use]
pub fn host_platform() -> Arc<dyn PlatformNetworking> {
    if cfg!(target_os = "linux") {
        Arc::new(LinuxNetworking)
    } else if cfg!(windows) {
        Arc::new(WindowsNetworking)
    } else {
        Arc::new(UnsupportedNetworking)
    }
}

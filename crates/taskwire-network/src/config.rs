//! Per-task network configuration.
//!
//! A [`TaskNetworkConfig`] is built fresh for every setup or cleanup call and
//! carries the ordered list of plugin configurations to apply.

use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use taskwire_common::{TaskwireError, TaskwireResult};

use crate::eni::ElasticInterface;
use crate::netconfig::{self, NamedPluginConfig};

/// Oldest plugin protocol version the builders target by default.
pub const DEFAULT_MIN_SUPPORTED_VERSION: &str = "0.3.0";

/// Everything needed to wire one task's network namespace.
#[derive(Debug, Clone)]
pub struct TaskNetworkConfig {
    /// Task identifier, used by the address manager.
    pub id: String,
    /// Container holding the namespace open.
    pub container_id: String,
    /// Process ID of that container, as reported by the runtime.
    pub container_pid: String,
    /// Namespace reference handed to plugins.
    pub container_netns: String,
    /// Plugin configurations in application order.
    pub network_configs: Vec<NamedPluginConfig>,
    /// Primary IPv4 CIDR of the VPC.
    pub vpc_primary_cidr: Ipv4Network,
    /// Every IPv4 CIDR block of the VPC, primary included.
    pub all_vpc_cidr_blocks: Vec<Ipv4Network>,
    /// Plugin protocol version written into built configurations.
    pub min_supported_version: String,
    /// Block the instance metadata service for the task.
    pub block_instance_metadata: bool,
    /// Task's primary IP, used by post-setup commands.
    pub task_primary_ip: Option<Ipv4Addr>,
    /// Task's primary gateway, used by post-setup commands.
    pub task_primary_gateway: Option<Ipv4Addr>,
    /// Address previously handed out by the address manager.
    pub ipam_v4_address: Option<Ipv4Network>,
}

impl TaskNetworkConfig {
    /// Create a configuration with no plugin configurations registered.
    pub fn new(
        container_id: impl Into<String>,
        container_netns: impl Into<String>,
        vpc_primary_cidr: Ipv4Network,
    ) -> Self {
        Self {
            id: String::new(),
            container_id: container_id.into(),
            container_pid: String::new(),
            container_netns: container_netns.into(),
            network_configs: Vec::new(),
            vpc_primary_cidr,
            all_vpc_cidr_blocks: vec![vpc_primary_cidr],
            min_supported_version: DEFAULT_MIN_SUPPORTED_VERSION.to_string(),
            block_instance_metadata: false,
            task_primary_ip: None,
            task_primary_gateway: None,
            ipam_v4_address: None,
        }
    }

    /// Set the task identifier.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the container process ID.
    #[must_use]
    pub fn with_container_pid(mut self, pid: impl Into<String>) -> Self {
        self.container_pid = pid.into();
        self
    }

    /// Set all VPC CIDR blocks. The primary block is added if missing.
    #[must_use]
    pub fn with_vpc_cidr_blocks(mut self, blocks: Vec<Ipv4Network>) -> Self {
        self.all_vpc_cidr_blocks = blocks;
        if !self.all_vpc_cidr_blocks.contains(&self.vpc_primary_cidr) {
            self.all_vpc_cidr_blocks.insert(0, self.vpc_primary_cidr);
        }
        self
    }

    /// Set the plugin protocol version.
    #[must_use]
    pub fn with_min_supported_version(mut self, version: impl Into<String>) -> Self {
        self.min_supported_version = version.into();
        self
    }

    /// Block or allow instance metadata access.
    #[must_use]
    pub fn with_block_instance_metadata(mut self, block: bool) -> Self {
        self.block_instance_metadata = block;
        self
    }

    /// Set the task's primary IP and gateway.
    #[must_use]
    pub fn with_task_primary(mut self, ip: Ipv4Addr, gateway: Ipv4Addr) -> Self {
        self.task_primary_ip = Some(ip);
        self.task_primary_gateway = Some(gateway);
        self
    }

    /// Set the address to release from the address manager.
    #[must_use]
    pub fn with_ipam_address(mut self, address: Ipv4Network) -> Self {
        self.ipam_v4_address = Some(address);
        self
    }

    /// Append a plugin configuration.
    pub fn push_network_config(&mut self, config: NamedPluginConfig) {
        tracing::debug!(
            container_id = %self.container_id,
            interface = %config.interface_name,
            plugin = %config.plugin_type,
            "Registered plugin configuration"
        );
        self.network_configs.push(config);
    }

    /// Register both bridge configurations for a task ENI: the ENI
    /// attachment first, then the shared task bridge.
    ///
    /// Nothing is registered if the ENI cannot be described.
    ///
    /// # Errors
    ///
    /// Returns [`TaskwireError::MalformedInput`] from the ENI builder.
    pub fn add_task_eni(&mut self, eni: &ElasticInterface) -> TaskwireResult<()> {
        let eni_config = netconfig::build_task_eni_bridge_config(eni, self)?;
        let bridge_config = netconfig::build_task_bridge_config(self)?;
        self.push_network_config(eni_config);
        self.push_network_config(bridge_config);
        Ok(())
    }

    /// Check the registry before it is handed to the plugin protocol.
    ///
    /// # Errors
    ///
    /// Returns [`TaskwireError::Config`] if no configuration is registered
    /// or one has an empty interface name.
    pub fn validate(&self) -> TaskwireResult<()> {
        if self.network_configs.is_empty() {
            return Err(TaskwireError::config(format!(
                "no network configurations registered for container {}",
                self.container_id
            )));
        }
        if let Some(position) = self
            .network_configs
            .iter()
            .position(|c| c.interface_name.is_empty())
        {
            return Err(TaskwireError::config(format!(
                "network configuration {position} for container {} has no interface name",
                self.container_id
            )));
        }
        Ok(())
    }
}

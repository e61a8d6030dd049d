//! Plugin configuration builders.
//!
//! Pure functions turning an elastic interface and a [`TaskNetworkConfig`]
//! into named plugin configurations. Parameters stay typed until
//! [`NamedPluginConfig::to_wire_bytes`] encodes them for a plugin's stdin.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use taskwire_common::{TaskwireError, TaskwireResult};

use crate::config::TaskNetworkConfig;
use crate::eni::ElasticInterface;

/// Plugin that attaches task ENIs and the task bridge.
pub const VPC_SHARED_ENI_PLUGIN: &str = "vpc-shared-eni";
/// Interface and network name of the task ENI bridge.
pub const TASK_ENI_BRIDGE_NETWORK_PREFIX: &str = "task";
/// Interface and network name of the default task bridge.
pub const DEFAULT_BRIDGE_NETWORK_NAME: &str = "nat";
/// Bridge plugin used on linux hosts.
pub const ECS_BRIDGE_PLUGIN: &str = "ecs-bridge";
/// Address management plugin.
pub const ECS_IPAM_PLUGIN: &str = "ecs-ipam";
/// Interface the address manager's addresses are bound to.
pub const DEFAULT_VETH_NAME: &str = "ecs-eth0";
/// Link-local subnet the address manager allocates from.
pub const ECS_SUBNET: &str = "169.254.172.0/22";
/// Task credentials endpoint reached through the address manager's routes.
pub const CREDENTIALS_ENDPOINT_CIDR: &str = "169.254.170.2/32";

/// DNS settings handed to a plugin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dns {
    /// Nameserver addresses, in preference order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nameservers: Vec<String>,
}

/// Which part of the task wiring a bridge configuration sets up.
///
/// Exactly one of `enable_task_eni` and `enable_task_bridge` is set in the
/// configurations built here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEniConfig {
    /// Reserved; never set by the builders.
    #[serde(rename = "noInfra", default)]
    pub no_infra: bool,
    /// Attach the task ENI to the in-namespace bridge.
    #[serde(rename = "enableTaskENI", default)]
    pub enable_task_eni: bool,
    /// Create the shared task bridge.
    #[serde(rename = "enableTaskBridge", default)]
    pub enable_task_bridge: bool,
}

/// Parameters of the shared-ENI bridge plugin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeParameters {
    /// Plugin type.
    #[serde(rename = "type")]
    pub plugin_type: String,
    /// Interface name of the task ENI bridge; only set on the task bridge.
    #[serde(rename = "eniName", default)]
    pub eni_name: String,
    /// Primary ENI address in CIDR form.
    #[serde(rename = "eniIPAddress", default)]
    pub eni_ip_address: String,
    /// Secondary ENI address in CIDR form.
    #[serde(rename = "ipAddress", default)]
    pub secondary_ip_address: String,
    /// Subnet gateway.
    #[serde(rename = "gatewayIPAddress", default)]
    pub gateway_ip_address: String,
    /// ENI MAC address.
    #[serde(rename = "eniMACAddress", default)]
    pub eni_mac_address: String,
    /// DNS settings.
    #[serde(default)]
    pub dns: Dns,
    /// Which wiring to set up.
    #[serde(rename = "taskENIConfig", default)]
    pub task_eni_config: TaskEniConfig,
}

/// A route programmed by the address manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpamRoute {
    /// Destination CIDR.
    pub dst: String,
}

/// Address manager settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpamConfig {
    /// Plugin type.
    #[serde(rename = "type")]
    pub plugin_type: String,
    /// Subnet to allocate from.
    #[serde(rename = "ipv4-subnet")]
    pub ipv4_subnet: String,
    /// Address to allocate or release.
    #[serde(rename = "ipv4-address", default, skip_serializing_if = "String::is_empty")]
    pub ipv4_address: String,
    /// Routes to program.
    #[serde(rename = "ipv4-routes", default)]
    pub ipv4_routes: Vec<IpamRoute>,
    /// Allocation owner.
    #[serde(default)]
    pub id: String,
}

/// Parameters of the address manager plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpamParameters {
    /// Plugin type.
    #[serde(rename = "type")]
    pub plugin_type: String,
    /// Address manager settings.
    pub ipam: IpamConfig,
}

/// Parameters of the plugin types this crate knows how to build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum PluginParameters {
    /// Shared-ENI bridge parameters.
    Bridge(BridgeParameters),
    /// Address manager parameters.
    Ipam(IpamParameters),
}

/// One named plugin configuration in a task's registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedPluginConfig {
    /// Interface the plugin wires.
    pub interface_name: String,
    /// Plugin executable.
    pub plugin_type: String,
    /// Network name handed to the plugin.
    pub network_name: String,
    /// Plugin protocol version.
    pub protocol_version: String,
    /// Plugin specific parameters.
    pub parameters: PluginParameters,
}

impl NamedPluginConfig {
    /// The configuration document a plugin reads from stdin.
    ///
    /// # Errors
    ///
    /// Returns [`TaskwireError::Serialization`] if the parameters do not
    /// encode to a JSON object.
    pub fn to_wire_json(&self) -> TaskwireResult<Value> {
        let mut document = serde_json::to_value(&self.parameters)?;
        let object = document.as_object_mut().ok_or_else(|| {
            TaskwireError::Serialization(format!(
                "parameters for '{}' are not a JSON object",
                self.interface_name
            ))
        })?;
        object.insert(
            "cniVersion".to_string(),
            Value::String(self.protocol_version.clone()),
        );
        object.insert("name".to_string(), Value::String(self.network_name.clone()));
        object
            .entry("type")
            .or_insert_with(|| Value::String(self.plugin_type.clone()));
        Ok(document)
    }

    /// [`Self::to_wire_json`], encoded.
    ///
    /// # Errors
    ///
    /// See [`Self::to_wire_json`].
    pub fn to_wire_bytes(&self) -> TaskwireResult<Vec<u8>> {
        Ok(serde_json::to_vec(&self.to_wire_json()?)?)
    }

    /// Bridge parameters, if this is a bridge configuration.
    #[must_use]
    pub const fn bridge_parameters(&self) -> Option<&BridgeParameters> {
        match &self.parameters {
            PluginParameters::Bridge(bridge) => Some(bridge),
            PluginParameters::Ipam(_) => None,
        }
    }
}

/// Build the configuration attaching a task ENI to the in-namespace bridge.
///
/// # Errors
///
/// Returns [`TaskwireError::MalformedInput`] if the ENI lacks a unique
/// primary address, has no secondary address, or has a malformed subnet
/// gateway, and [`TaskwireError::InvalidAddress`] if no DNS server can be
/// derived from the VPC CIDR.
pub fn build_task_eni_bridge_config(
    eni: &ElasticInterface,
    config: &TaskNetworkConfig,
) -> TaskwireResult<NamedPluginConfig> {
    let primary = eni.primary_ipv4()?;
    let secondary = eni.secondary_ipv4()?;
    let (gateway, prefix) = eni.subnet_gateway()?;
    let nameservers = derive_dns_from_vpc_cidr(IpAddr::V4(config.vpc_primary_cidr.network()))?;

    let parameters = BridgeParameters {
        plugin_type: VPC_SHARED_ENI_PLUGIN.to_string(),
        eni_name: String::new(),
        eni_ip_address: format!("{primary}/{prefix}"),
        secondary_ip_address: format!("{secondary}/{prefix}"),
        gateway_ip_address: gateway.to_string(),
        eni_mac_address: eni.mac_address.clone(),
        dns: Dns { nameservers },
        task_eni_config: TaskEniConfig {
            no_infra: false,
            enable_task_eni: true,
            enable_task_bridge: false,
        },
    };

    tracing::debug!(
        eni = %eni.id,
        eni_ip = %parameters.eni_ip_address,
        secondary_ip = %parameters.secondary_ip_address,
        gateway = %parameters.gateway_ip_address,
        "Built task ENI bridge configuration"
    );

    Ok(NamedPluginConfig {
        interface_name: TASK_ENI_BRIDGE_NETWORK_PREFIX.to_string(),
        plugin_type: VPC_SHARED_ENI_PLUGIN.to_string(),
        network_name: TASK_ENI_BRIDGE_NETWORK_PREFIX.to_string(),
        protocol_version: config.min_supported_version.clone(),
        parameters: PluginParameters::Bridge(parameters),
    })
}

/// Build the configuration creating the shared task bridge.
///
/// # Errors
///
/// Infallible for the configurations this crate builds; the `Result` keeps
/// the signature aligned with the other builders.
pub fn build_task_bridge_config(config: &TaskNetworkConfig) -> TaskwireResult<NamedPluginConfig> {
    let parameters = BridgeParameters {
        plugin_type: VPC_SHARED_ENI_PLUGIN.to_string(),
        eni_name: TASK_ENI_BRIDGE_NETWORK_PREFIX.to_string(),
        task_eni_config: TaskEniConfig {
            no_infra: false,
            enable_task_eni: false,
            enable_task_bridge: true,
        },
        ..BridgeParameters::default()
    };

    Ok(NamedPluginConfig {
        interface_name: DEFAULT_BRIDGE_NETWORK_NAME.to_string(),
        plugin_type: VPC_SHARED_ENI_PLUGIN.to_string(),
        network_name: DEFAULT_BRIDGE_NETWORK_NAME.to_string(),
        protocol_version: config.min_supported_version.clone(),
        parameters: PluginParameters::Bridge(parameters),
    })
}

/// Build the address manager configuration used to release a task's address.
///
/// # Errors
///
/// Returns [`TaskwireError::MalformedInput`] if the configuration carries no
/// address to release.
pub fn build_ipam_config(config: &TaskNetworkConfig) -> TaskwireResult<NamedPluginConfig> {
    let address = config.ipam_v4_address.ok_or_else(|| {
        TaskwireError::malformed(format!(
            "no ipam address recorded for task {}",
            config.id
        ))
    })?;

    let parameters = IpamParameters {
        plugin_type: ECS_IPAM_PLUGIN.to_string(),
        ipam: IpamConfig {
            plugin_type: ECS_IPAM_PLUGIN.to_string(),
            ipv4_subnet: ECS_SUBNET.to_string(),
            ipv4_address: address.to_string(),
            ipv4_routes: vec![IpamRoute {
                dst: CREDENTIALS_ENDPOINT_CIDR.to_string(),
            }],
            id: config.id.clone(),
        },
    };

    Ok(NamedPluginConfig {
        interface_name: DEFAULT_VETH_NAME.to_string(),
        plugin_type: ECS_IPAM_PLUGIN.to_string(),
        network_name: ECS_IPAM_PLUGIN.to_string(),
        protocol_version: config.min_supported_version.clone(),
        parameters: PluginParameters::Ipam(parameters),
    })
}

/// The VPC resolver address for a VPC's primary network address.
///
/// The resolver sits two addresses past the network base.
///
/// # Errors
///
/// Returns [`TaskwireError::InvalidAddress`] for IPv6 input or when the
/// last octet cannot be advanced by two.
pub fn derive_dns_from_vpc_cidr(network: IpAddr) -> TaskwireResult<Vec<String>> {
    let IpAddr::V4(network) = network else {
        return Err(TaskwireError::InvalidAddress {
            address: network.to_string(),
        });
    };
    let mut octets = network.octets();
    octets[3] = octets[3]
        .checked_add(2)
        .ok_or_else(|| TaskwireError::InvalidAddress {
            address: network.to_string(),
        })?;
    Ok(vec![IpAddr::from(octets).to_string()])
}

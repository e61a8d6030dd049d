//! # taskwire-network
//!
//! Task network namespace provisioning through CNI plugins.
//!
//! - [`netconfig`] builds the plugin configurations for a task ENI
//! - [`client`] applies and tears them down through a [`PluginInvoker`]
//! - [`postsetup`] runs follow-up commands inside the pause container
//! - [`platform`] holds the per-host-platform differences
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use taskwire_common::PluginEnvironment;
//! use taskwire_network::{CniClient, ElasticInterface, TaskNetworkConfig};
//!
//! # async fn example(eni: ElasticInterface) -> taskwire_common::TaskwireResult<()> {
//! let client = CniClient::for_host(PluginEnvironment::from_env());
//!
//! let vpc = "10.0.0.0/16".parse().expect("valid cidr");
//! let mut config = TaskNetworkConfig::new("pause-1", "/proc/4242/ns/net", vpc);
//! config.add_task_eni(&eni)?;
//!
//! let result = client.setup_ns(&config, Duration::from_secs(60)).await?;
//! println!("gateway: {:?}", result.first_gateway());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod client;
pub mod config;
pub mod eni;
pub mod exec;
pub mod netconfig;
pub mod platform;
pub mod plugin;
pub mod postsetup;
pub mod version;

pub use client::CniClient;
pub use config::TaskNetworkConfig;
pub use eni::{ElasticInterface, EniIpv4Address};
pub use exec::{ContainerExec, HostCommandRunner, SystemCommandRunner};
pub use netconfig::{
    NamedPluginConfig, PluginParameters, build_ipam_config, build_task_bridge_config,
    build_task_eni_bridge_config, derive_dns_from_vpc_cidr,
};
pub use platform::{PlatformNetworking, host_platform};
pub use plugin::{ExecPluginInvoker, PluginInvoker, PluginResult, RuntimeConf};
pub use postsetup::{PostSetupCommand, PostSetupExecutor, plan_post_setup_commands};

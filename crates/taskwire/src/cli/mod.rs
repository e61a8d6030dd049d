//! CLI command definitions and handlers.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr};
use ipnetwork::Ipv4Network;
use taskwire_common::PluginEnvironment;
use taskwire_network::{CniClient, ElasticInterface, TaskNetworkConfig};

/// Taskwire - task network namespace provisioning
#[derive(Parser)]
#[command(name = "taskwire")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Directory holding the plugin executables
    #[arg(long, global = true)]
    pub plugin_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Describes the task ENI to wire.
#[derive(Args, Debug)]
pub struct EniArgs {
    /// Path to the ENI descriptor (JSON)
    #[arg(long)]
    pub eni: PathBuf,

    /// Primary IPv4 CIDR of the VPC
    #[arg(long)]
    pub vpc_cidr: Ipv4Network,

    /// Plugin protocol version written into configurations
    #[arg(long)]
    pub min_version: Option<String>,
}

/// Identifies the namespace to act on.
#[derive(Args, Debug)]
pub struct NamespaceArgs {
    /// Container holding the namespace open
    #[arg(long)]
    pub container_id: String,

    /// Namespace reference handed to plugins
    #[arg(long)]
    pub netns: String,

    /// Overall deadline in seconds
    #[arg(long, default_value_t = 60)]
    pub timeout: u64,
}

impl NamespaceArgs {
    const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

/// Operator commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Print the plugin configurations built for a task ENI
    Render {
        #[command(flatten)]
        eni: EniArgs,
    },

    /// Wire a task namespace
    Setup {
        #[command(flatten)]
        eni: EniArgs,

        #[command(flatten)]
        namespace: NamespaceArgs,
    },

    /// Tear down a task namespace
    Cleanup {
        #[command(flatten)]
        eni: EniArgs,

        #[command(flatten)]
        namespace: NamespaceArgs,
    },

    /// Return a task address to the address manager
    ReleaseIp {
        /// Task identifier
        #[arg(long)]
        id: String,

        /// Address to release, in CIDR form
        #[arg(long)]
        ipam_address: Ipv4Network,

        /// Primary IPv4 CIDR of the VPC
        #[arg(long)]
        vpc_cidr: Ipv4Network,

        #[command(flatten)]
        namespace: NamespaceArgs,
    },

    /// Show a plugin's version
    Version {
        /// Plugin name
        plugin: String,
    },
}

impl Cli {
    /// Execute the CLI command.
    ///
    /// # Errors
    ///
    /// Returns any input, plugin or output failure.
    pub async fn execute(self) -> Result<()> {
        let mut env = PluginEnvironment::from_env();
        if let Some(dir) = self.plugin_dir {
            env = env.with_plugin_dir(dir);
        }
        let client = CniClient::for_host(env);
        tracing::debug!(?client, "Using plugin client");

        match self.command {
            Commands::Render { eni } => {
                let config = task_config(&eni, "", "")?;
                let documents = config
                    .network_configs
                    .iter()
                    .map(taskwire_network::NamedPluginConfig::to_wire_json)
                    .collect::<Result<Vec<_>, _>>()?;
                println!("{}", serde_json::to_string_pretty(&documents)?);
                Ok(())
            }

            Commands::Setup { eni, namespace } => {
                let config = task_config(&eni, &namespace.container_id, &namespace.netns)?;
                let result = client
                    .setup_ns(&config, namespace.timeout())
                    .await
                    .wrap_err("Failed to set up task namespace")?;

                if client.requires_post_setup(&config) {
                    tracing::info!(
                        platform = client.platform().name(),
                        "Post-setup commands are required; run them from the agent"
                    );
                }
                println!("{}", serde_json::to_string_pretty(&result)?);
                Ok(())
            }

            Commands::Cleanup { eni, namespace } => {
                let config = task_config(&eni, &namespace.container_id, &namespace.netns)?;
                client
                    .cleanup_ns(&config, namespace.timeout())
                    .await
                    .wrap_err("Failed to clean up task namespace")?;

                println!("Namespace for {} cleaned up", namespace.container_id);
                Ok(())
            }

            Commands::ReleaseIp {
                id,
                ipam_address,
                vpc_cidr,
                namespace,
            } => {
                let config = release_config(&id, ipam_address, vpc_cidr, &namespace);

                client
                    .release_ip_resource(&config, namespace.timeout())
                    .await
                    .wrap_err_with(|| format!("Failed to release {ipam_address} for {id}"))?;

                println!("Released {ipam_address} for {id}");
                Ok(())
            }

            Commands::Version { plugin } => {
                let version = client.plugin_version(&plugin).await?;
                if version.is_empty() {
                    tracing::warn!(plugin, "Plugin reported no usable version");
                }
                println!("{version}");
                Ok(())
            }
        }
    }
}

fn task_config(args: &EniArgs, container_id: &str, netns: &str) -> Result<TaskNetworkConfig> {
    let raw = std::fs::read_to_string(&args.eni)
        .wrap_err_with(|| format!("Failed to read {}", args.eni.display()))?;
    let eni: ElasticInterface = serde_json::from_str(&raw)
        .wrap_err_with(|| format!("Invalid ENI descriptor {}", args.eni.display()))?;

    let mut config = TaskNetworkConfig::new(container_id, netns, args.vpc_cidr);
    if let Some(version) = &args.min_version {
        config = config.with_min_supported_version(version.as_str());
    }
    config.add_task_eni(&eni)?;
    Ok(config)
}

fn release_config(
    id: &str,
    ipam_address: Ipv4Network,
    vpc_cidr: Ipv4Network,
    namespace: &NamespaceArgs,
) -> TaskNetworkConfig {
    TaskNetworkConfig::new(
        namespace.container_id.as_str(),
        namespace.netns.as_str(),
        vpc_cidr,
    )
    .with_id(id)
    .with_ipam_address(ipam_address)
}

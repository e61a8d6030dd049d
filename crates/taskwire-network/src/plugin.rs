//! Plugin invocation protocol.
//!
//! [`PluginInvoker`] is the add/delete contract the orchestrator drives.
//! [`ExecPluginInvoker`] implements it by running plugin executables with the
//! configuration document on stdin and the runtime parameters in the
//! environment.

use std::io;
use std::net::IpAddr;
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use taskwire_common::{PluginEnvironment, TaskwireError, TaskwireResult};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::netconfig::{Dns, NamedPluginConfig};

/// Per-invocation runtime parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConf {
    /// Container holding the namespace.
    pub container_id: String,
    /// Namespace reference.
    pub netns: String,
    /// Interface the plugin acts on.
    pub interface_name: String,
}

/// Interface created by a plugin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultInterface {
    /// Interface name.
    pub name: String,
    /// MAC address.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mac: String,
    /// Namespace path, empty for host interfaces.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sandbox: String,
}

/// Address assigned by a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpConfig {
    /// Address in CIDR form.
    pub address: String,
    /// Gateway for the address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<IpAddr>,
    /// Index into [`PluginResult::interfaces`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<usize>,
}

/// Route installed by a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRoute {
    /// Destination CIDR.
    pub dst: String,
    /// Next hop.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gw: Option<IpAddr>,
}

/// Result a plugin reports for an add.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginResult {
    /// Protocol version of the result.
    #[serde(rename = "cniVersion", default)]
    pub cni_version: String,
    /// Interfaces created.
    #[serde(default)]
    pub interfaces: Vec<ResultInterface>,
    /// Addresses assigned, in order.
    #[serde(default)]
    pub ips: Vec<IpConfig>,
    /// Routes installed.
    #[serde(default)]
    pub routes: Vec<ResultRoute>,
    /// DNS settings.
    #[serde(default)]
    pub dns: Dns,
}

impl PluginResult {
    /// Gateway of the first reported address.
    #[must_use]
    pub fn first_gateway(&self) -> Option<IpAddr> {
        self.ips.first().and_then(|ip| ip.gateway)
    }
}

/// Error object a plugin writes to stdout when it fails.
#[derive(Debug, Clone, Deserialize)]
struct PluginErrorReport {
    code: u32,
    msg: String,
    #[serde(default)]
    details: String,
}

/// The add/delete contract for a single piece of namespace wiring.
#[async_trait]
pub trait PluginInvoker: Send + Sync {
    /// Apply a configuration.
    async fn add_network(
        &self,
        config: &NamedPluginConfig,
        runtime: &RuntimeConf,
    ) -> TaskwireResult<PluginResult>;

    /// Remove a configuration.
    async fn del_network(
        &self,
        config: &NamedPluginConfig,
        runtime: &RuntimeConf,
    ) -> TaskwireResult<()>;

    /// Raw self-reported version document of a plugin.
    async fn version(&self, plugin: &str) -> TaskwireResult<String>;
}

/// Runs plugin executables from a plugin directory.
#[derive(Debug, Clone)]
pub struct ExecPluginInvoker {
    env: PluginEnvironment,
}

impl ExecPluginInvoker {
    /// Create an invoker for the given plugin environment.
    #[must_use]
    pub const fn new(env: PluginEnvironment) -> Self {
        Self { env }
    }

    /// The plugin environment in use.
    #[must_use]
    pub const fn environment(&self) -> &PluginEnvironment {
        &self.env
    }

    fn command(&self, plugin: &str) -> TaskwireResult<Command> {
        let path = self.env.plugin_path(plugin);
        if !path.is_file() {
            return Err(TaskwireError::config(format!(
                "plugin '{plugin}' not found at {}",
                path.display()
            )));
        }
        let mut command = Command::new(path);
        command
            .env("VPC_CNI_LOG_FILE", &self.env.log_path)
            .env("VPC_CNI_LOG_LEVEL", &self.env.log_level)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        Ok(command)
    }

    async fn run(
        &self,
        verb: &str,
        config: &NamedPluginConfig,
        runtime: &RuntimeConf,
    ) -> TaskwireResult<Vec<u8>> {
        let document = config.to_wire_bytes()?;
        let mut command = self.command(&config.plugin_type)?;
        command
            .env("CNI_COMMAND", verb)
            .env("CNI_CONTAINERID", &runtime.container_id)
            .env("CNI_NETNS", &runtime.netns)
            .env("CNI_IFNAME", &runtime.interface_name)
            .env("CNI_PATH", &self.env.plugin_dir);

        tracing::debug!(
            verb,
            plugin = %config.plugin_type,
            interface = %runtime.interface_name,
            container_id = %runtime.container_id,
            "Invoking plugin"
        );

        let mut child = command.spawn()?;
        let stdin = child.stdin.take();
        let feed = async move {
            let Some(mut stdin) = stdin else {
                return Ok(());
            };
            match stdin.write_all(&document).await {
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                    tracing::debug!("Plugin exited before reading its configuration");
                    Ok(())
                }
                written => written,
            }
        };
        let (written, output) = tokio::join!(feed, child.wait_with_output());
        let output = output?;

        if output.status.success() {
            written?;
            return Ok(output.stdout);
        }

        let report = serde_json::from_slice::<PluginErrorReport>(&output.stdout).ok();
        Err(match report {
            Some(report) => TaskwireError::PluginReported {
                code: report.code,
                message: if report.details.is_empty() {
                    report.msg
                } else {
                    format!("{}: {}", report.msg, report.details)
                },
            },
            None => TaskwireError::PluginReported {
                code: 0,
                message: format!(
                    "plugin exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            },
        })
    }
}

#[async_trait]
impl PluginInvoker for ExecPluginInvoker {
    async fn add_network(
        &self,
        config: &NamedPluginConfig,
        runtime: &RuntimeConf,
    ) -> TaskwireResult<PluginResult> {
        let stdout = self.run("ADD", config, runtime).await?;
        if stdout.iter().all(u8::is_ascii_whitespace) {
            return Ok(PluginResult::default());
        }
        Ok(serde_json::from_slice(&stdout)?)
    }

    async fn del_network(
        &self,
        config: &NamedPluginConfig,
        runtime: &RuntimeConf,
    ) -> TaskwireResult<()> {
        self.run("DEL", config, runtime).await.map(|_| ())
    }

    async fn version(&self, plugin: &str) -> TaskwireResult<String> {
        let output = self
            .command(plugin)?
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .await?;
        if !output.status.success() {
            return Err(TaskwireError::PluginReported {
                code: 0,
                message: format!("{plugin} --version exited with {}", output.status),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

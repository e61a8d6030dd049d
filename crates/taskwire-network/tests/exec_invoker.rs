//! Runs the executable invoker against shell-script plugins.
#![cfg(unix)]

use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use taskwire_common::{PluginEnvironment, TaskwireError};
use taskwire_network::{
    ElasticInterface, EniIpv4Address, ExecPluginInvoker, NamedPluginConfig, PluginInvoker,
    PluginParameters, RuntimeConf, TaskNetworkConfig,
};
use tempfile::TempDir;

const FAKE_PLUGIN: &str = r#"#!/bin/sh
here="$(dirname "$0")"
if [ "$1" = "--version" ]; then
    echo '{"version":"2018.01.0","dirty":false,"gitShortHash":"0c4f7a2"}'
    exit 0
fi
cat > "$here/stdin.json"
env | grep -E '^(CNI|VPC_CNI)_' > "$here/env.txt"
case "$CNI_COMMAND" in
ADD)
    echo '{"cniVersion":"0.3.0","ips":[{"version":"4","address":"172.31.21.40/20","gateway":"172.31.16.1"}]}'
    ;;
DEL)
    echo '{"code":11,"msg":"device busy","details":"eni-12345678"}'
    exit 1
    ;;
esac
"#;

/// Fails without ever reading its configuration.
const STDIN_IGNORING_PLUGIN: &str = r#"#!/bin/sh
exec 0<&-
echo '{"code":7,"msg":"no such bridge"}'
exit 1
"#;

fn install_plugin(dir: &Path, name: &str) {
    install_script(dir, name, FAKE_PLUGIN);
}

fn install_script(dir: &Path, name: &str, script: &str) {
    let path = dir.join(name);
    fs::write(&path, script).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
}

fn invoker(dir: &TempDir) -> ExecPluginInvoker {
    ExecPluginInvoker::new(
        PluginEnvironment::default()
            .with_plugin_dir(dir.path())
            .with_log_path(dir.path().join("plugin.log"))
            .with_log_level("debug"),
    )
}

fn eni_config() -> NamedPluginConfig {
    let eni = ElasticInterface {
        id: "eni-12345678".to_string(),
        mac_address: "02:7b:64:49:b1:40".to_string(),
        subnet_gateway_cidr: "172.31.16.1/20".to_string(),
        ipv4_addresses: vec![
            EniIpv4Address::primary("172.31.21.40"),
            EniIpv4Address::secondary("172.31.21.41"),
        ],
    };
    let mut config = TaskNetworkConfig::new(
        "containerid12",
        "/proc/4242/ns/net",
        "172.31.0.0/16".parse().unwrap(),
    );
    config.add_task_eni(&eni).unwrap();
    config.network_configs.remove(0)
}

fn runtime(config: &NamedPluginConfig) -> RuntimeConf {
    RuntimeConf {
        container_id: "containerid12".to_string(),
        netns: "/proc/4242/ns/net".to_string(),
        interface_name: config.interface_name.clone(),
    }
}

fn recorded_env(dir: &TempDir) -> HashMap<String, String> {
    fs::read_to_string(dir.path().join("env.txt"))
        .unwrap()
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[tokio::test]
async fn add_passes_protocol_inputs_and_decodes_result() {
    let dir = TempDir::new().unwrap();
    let config = eni_config();
    install_plugin(dir.path(), &config.plugin_type);

    let result = invoker(&dir)
        .add_network(&config, &runtime(&config))
        .await
        .unwrap();
    assert_eq!(result.first_gateway(), Some("172.31.16.1".parse().unwrap()));

    let env = recorded_env(&dir);
    assert_eq!(env["CNI_COMMAND"], "ADD");
    assert_eq!(env["CNI_CONTAINERID"], "containerid12");
    assert_eq!(env["CNI_NETNS"], "/proc/4242/ns/net");
    assert_eq!(env["CNI_IFNAME"], config.interface_name);
    assert_eq!(env["CNI_PATH"], dir.path().display().to_string());
    assert_eq!(env["VPC_CNI_LOG_LEVEL"], "debug");

    let stdin: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(dir.path().join("stdin.json")).unwrap()).unwrap();
    assert_eq!(stdin["cniVersion"], "0.3.0");
    assert_eq!(stdin["name"], config.network_name.as_str());
    assert_eq!(stdin["type"], config.plugin_type.as_str());
}

#[tokio::test]
async fn del_surfaces_plugin_error_object() {
    let dir = TempDir::new().unwrap();
    let config = eni_config();
    install_plugin(dir.path(), &config.plugin_type);

    let err = invoker(&dir)
        .del_network(&config, &runtime(&config))
        .await
        .unwrap_err();

    match err {
        TaskwireError::PluginReported { code, message } => {
            assert_eq!(code, 11);
            assert_eq!(message, "device busy: eni-12345678");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(recorded_env(&dir)["CNI_COMMAND"], "DEL");
}

#[tokio::test]
async fn version_returns_raw_document() {
    let dir = TempDir::new().unwrap();
    install_plugin(dir.path(), "ecs-bridge");

    let raw = invoker(&dir).version("ecs-bridge").await.unwrap();
    let document: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(document["gitShortHash"], "0c4f7a2");
}

#[tokio::test]
async fn plugin_error_survives_unread_configuration() {
    let dir = TempDir::new().unwrap();
    let mut config = eni_config();
    install_script(dir.path(), &config.plugin_type, STDIN_IGNORING_PLUGIN);

    // Larger than a pipe buffer, so the write cannot finish before the
    // plugin exits.
    if let PluginParameters::Bridge(bridge) = &mut config.parameters {
        bridge.dns.nameservers = vec!["172.31.0.2".to_string(); 20_000];
    }

    let err = invoker(&dir)
        .add_network(&config, &runtime(&config))
        .await
        .unwrap_err();

    assert!(matches!(err, TaskwireError::PluginReported { code: 7, .. }));
}

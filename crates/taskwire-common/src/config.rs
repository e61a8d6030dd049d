//! Plugin environment configuration.
//!
//! The plugin directory and plugin log settings are resolved once when the
//! client is composed and handed to whatever launches plugin processes.
//! Nothing is written into this process's own environment.

use std::path::{Path, PathBuf};

/// Environment variable overriding the plugin directory.
pub const PLUGIN_DIR_ENV: &str = "TASKWIRE_PLUGIN_DIR";
/// Environment variable overriding the plugin log file.
pub const PLUGIN_LOG_ENV: &str = "TASKWIRE_PLUGIN_LOG";
/// Environment variable overriding the plugin log level.
pub const PLUGIN_LOG_LEVEL_ENV: &str = "TASKWIRE_PLUGIN_LOG_LEVEL";

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_PROGRAM_DATA: &str = r"C:\ProgramData";

/// Where plugins live and where they should log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginEnvironment {
    /// Directory holding the plugin executables.
    pub plugin_dir: PathBuf,
    /// Log file the VPC plugins write to.
    pub log_path: PathBuf,
    /// Log level exported to plugin processes.
    pub log_level: String,
}

impl Default for PluginEnvironment {
    fn default() -> Self {
        Self::platform_defaults(None)
    }
}

impl PluginEnvironment {
    /// Resolve from the process environment, falling back to platform defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve using an arbitrary variable lookup.
    ///
    /// Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut env = Self::platform_defaults(get("ProgramData").as_deref());

        if let Some(dir) = get(PLUGIN_DIR_ENV) {
            env.plugin_dir = PathBuf::from(dir);
        }
        if let Some(path) = get(PLUGIN_LOG_ENV) {
            env.log_path = PathBuf::from(path);
        }
        if let Some(level) = get(PLUGIN_LOG_LEVEL_ENV) {
            env.log_level = level;
        }

        tracing::debug!(
            plugin_dir = %env.plugin_dir.display(),
            log_path = %env.log_path.display(),
            log_level = %env.log_level,
            "Resolved plugin environment"
        );
        env
    }

    fn platform_defaults(program_data: Option<&str>) -> Self {
        if cfg!(windows) {
            let root = Path::new(program_data.unwrap_or(DEFAULT_PROGRAM_DATA)).join("taskwire");
            Self {
                plugin_dir: root.join("cni"),
                log_path: root.join("log").join("vpc-shared-eni.log"),
                log_level: DEFAULT_LOG_LEVEL.to_string(),
            }
        } else {
            Self {
                plugin_dir: PathBuf::from("/opt/cni/bin"),
                log_path: PathBuf::from("/log/vpc-branch-eni.log"),
                log_level: DEFAULT_LOG_LEVEL.to_string(),
            }
        }
    }

    /// Set the plugin directory.
    #[must_use]
    pub fn with_plugin_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.plugin_dir = dir.into();
        self
    }

    /// Set the plugin log file.
    #[must_use]
    pub fn with_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = path.into();
        self
    }

    /// Set the plugin log level.
    #[must_use]
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Path of a plugin executable.
    #[must_use]
    pub fn plugin_path(&self, plugin: &str) -> PathBuf {
        let path = self.plugin_dir.join(plugin);
        if cfg!(windows) {
            path.with_extension("exe")
        } else {
            path
        }
    }
}

//! Plugin version strings.
//!
//! Plugins print a small JSON document for `--version`. The rendered string
//! is only used for diagnostics, so malformed documents render as `""`.

use serde::Deserialize;

/// Version document printed by linux plugins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LinuxPluginVersion {
    /// Release version.
    #[serde(default)]
    pub version: String,
    /// Built from a tree with uncommitted changes.
    #[serde(default)]
    pub dirty: bool,
    /// Short commit hash.
    #[serde(rename = "gitShortHash", default)]
    pub git_short_hash: String,
}

impl LinuxPluginVersion {
    /// `<hash>-<version>`, prefixed with `@` for dirty builds.
    #[must_use]
    pub fn render(&self) -> String {
        let prefix = if self.dirty { "@" } else { "" };
        format!("{prefix}{}-{}", self.git_short_hash, self.version)
    }
}

/// Version document printed by windows plugins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct WindowsPluginVersion {
    /// Release version.
    #[serde(default)]
    pub version: String,
    /// Short commit hash.
    #[serde(rename = "gitShortHash", default)]
    pub git_short_hash: String,
    /// Build timestamp.
    #[serde(default)]
    pub built: String,
}

impl WindowsPluginVersion {
    /// `<hash>-<version>`.
    #[must_use]
    pub fn render(&self) -> String {
        format!("{}-{}", self.git_short_hash, self.version)
    }
}

/// Render a linux version document.
#[must_use]
pub fn parse_linux_version(raw: &str) -> String {
    decode::<LinuxPluginVersion>(raw).map_or_else(String::new, |v| v.render())
}

/// Render a windows version document.
#[must_use]
pub fn parse_windows_version(raw: &str) -> String {
    decode::<WindowsPluginVersion>(raw).map_or_else(String::new, |v| v.render())
}

fn decode<T: for<'de> Deserialize<'de>>(raw: &str) -> Option<T> {
    serde_json::from_str(raw)
        .inspect_err(|e| tracing::debug!(error = %e, "Unparseable plugin version"))
        .ok()
}

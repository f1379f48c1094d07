use crate::mapping::MappingTable;
use crate::types::DistroId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "PKGCOMPAT_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "/etc/pkgcompat/config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("unsupported config_version: {0}, expected 1")]
    UnsupportedVersion(u32),
    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CompatConfig {
    #[serde(default = "default_config_version")]
    pub config_version: u32,
    #[serde(default)]
    pub daemon: DaemonSection,
    #[serde(default)]
    pub isolation: IsolationSection,
    #[serde(default)]
    pub policy: PolicySection,
    /// Per-distro mapping overrides, merged over each binding's built-in table.
    #[serde(default)]
    pub mapping: BTreeMap<DistroId, MappingTable>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DaemonSection {
    #[serde(default = "default_socket")]
    pub socket: PathBuf,
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_workers")]
    pub workers_per_lane: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct IsolationSection {
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default = "default_compat_root")]
    pub compat_root: PathBuf,
    #[serde(default = "default_launcher")]
    pub launcher: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PolicySection {
    /// Run the dependency-resolution pass before removals as well as installs.
    #[serde(default)]
    pub remove_resolves_deps: bool,
}

fn default_config_version() -> u32 {
    1
}

fn default_socket() -> PathBuf {
    PathBuf::from("/run/pkgcompat/daemon.sock")
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_workers() -> usize {
    2
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("/var/lib/pkgcompat")
}

fn default_compat_root() -> PathBuf {
    PathBuf::from("/compat")
}

fn default_launcher() -> String {
    "chroot".to_owned()
}

impl Default for DaemonSection {
    fn default() -> Self {
        Self {
            socket: default_socket(),
            request_timeout_secs: default_timeout_secs(),
            workers_per_lane: default_workers(),
        }
    }
}

impl Default for IsolationSection {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            compat_root: default_compat_root(),
            launcher: default_launcher(),
        }
    }
}

impl Default for CompatConfig {
    fn default() -> Self {
        Self {
            config_version: default_config_version(),
            daemon: DaemonSection::default(),
            isolation: IsolationSection::default(),
            policy: PolicySection::default(),
            mapping: BTreeMap::new(),
        }
    }
}

impl CompatConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.daemon.request_timeout_secs)
    }

    pub fn mapping_override(&self, distro: &str) -> Option<&MappingTable> {
        self.mapping.get(distro)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.config_version != 1 {
            return Err(ConfigError::UnsupportedVersion(self.config_version));
        }
        if self.daemon.workers_per_lane == 0 {
            return Err(ConfigError::Invalid {
                field: "daemon.workers_per_lane",
                reason: "must be at least 1".to_owned(),
            });
        }
        if self.daemon.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "daemon.request_timeout_secs",
                reason: "must be at least 1".to_owned(),
            });
        }
        if !matches!(self.isolation.launcher.as_str(), "chroot" | "mock") {
            return Err(ConfigError::Invalid {
                field: "isolation.launcher",
                reason: format!(
                    "unknown launcher '{}', expected 'chroot' or 'mock'",
                    self.isolation.launcher
                ),
            });
        }
        Ok(())
    }
}

pub fn parse_config_str(input: &str) -> Result<CompatConfig, ConfigError> {
    let config: CompatConfig = toml::from_str(input)?;
    config.validate()?;
    Ok(config)
}

pub fn parse_config_file(path: impl AsRef<Path>) -> Result<CompatConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config_str(&content)
}

/// Load the configuration from `explicit`, then `$PKGCOMPAT_CONFIG`, then the
/// default path. A missing default file yields the built-in defaults; a missing
/// explicitly named file is an error.
pub fn load_config(explicit: Option<&Path>) -> Result<CompatConfig, ConfigError> {
    if let Some(path) = explicit {
        return parse_config_file(path);
    }
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        return parse_config_file(path);
    }
    let default = Path::new(DEFAULT_CONFIG_PATH);
    if default.exists() {
        parse_config_file(default)
    } else {
        Ok(CompatConfig::default())
    }
}

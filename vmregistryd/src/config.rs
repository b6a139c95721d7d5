use std::path::{Path, PathBuf};
use serde::Deserialize;
use anyhow::{Context, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub hypervisor: HypervisorConfig,
    #[serde(default)]
    pub inventory: InventoryConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HypervisorConfig {
    /// libvirt connection URI, e.g. "qemu:///system"
    pub uri: String,
    #[serde(default = "default_virsh_path")]
    pub virsh_path: PathBuf,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    /// How often the supervisor pings the hypervisor
    #[serde(default = "default_supervisor_interval")]
    pub supervisor_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InventoryConfig {
    #[serde(default = "default_max_concurrent_resolutions")]
    pub max_concurrent_resolutions: usize,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Report one record per interface instead of the primary one only
    #[serde(default)]
    pub report_all_interfaces: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_virsh_path() -> PathBuf {
    PathBuf::from("virsh")
}

fn default_command_timeout() -> u64 {
    10
}

fn default_supervisor_interval() -> u64 {
    15
}

fn default_max_concurrent_resolutions() -> usize {
    8
}

fn default_request_timeout() -> u64 {
    30
}

fn default_listen() -> String {
    "[::]:8080".to_string()
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            max_concurrent_resolutions: default_max_concurrent_resolutions(),
            request_timeout_secs: default_request_timeout(),
            report_all_interfaces: false,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }
}

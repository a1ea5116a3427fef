//! Provisioner Configuration
//!
//! YAML-loadable configuration for the SSH runner, the device provisioner,
//! the topology model, and logging. Every section has defaults so a partial
//! file (or no file at all) is valid.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// =============================================================================
// SSH
// =============================================================================

/// Connection settings for the SSH command runner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    /// Remote user
    pub user: String,
    /// Remote port
    pub port: u16,
    /// Private key passed with `-i`
    pub private_key: Option<PathBuf>,
    /// Connection establishment timeout in seconds
    pub connect_timeout_secs: u64,
    /// ssh client binary
    pub ssh_binary: String,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: "root".to_string(),
            port: 22,
            private_key: None,
            connect_timeout_secs: 10,
            ssh_binary: "ssh".to_string(),
        }
    }
}

// =============================================================================
// Provisioner
// =============================================================================

/// What Teardown does when a remote step fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeardownPolicy {
    /// Log the failure and report success
    #[default]
    BestEffort,
    /// Return the failure to the caller
    Strict,
}

/// Configuration for the device provisioner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionerConfig {
    /// Timeout for each batch of remote commands
    pub command_timeout_secs: u64,
    /// `pvcreate --dataalignment` value
    pub data_alignment: String,
    /// Prefix commands with sudo
    pub use_sudo: bool,
    /// Prefix of every volume group name
    pub vg_prefix: String,
    /// Failure handling for teardown
    pub teardown_policy: TeardownPolicy,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: 5,
            data_alignment: "256K".to_string(),
            use_sudo: true,
            vg_prefix: "vg_".to_string(),
            teardown_policy: TeardownPolicy::BestEffort,
        }
    }
}

impl ProvisionerConfig {
    /// Batch timeout as a Duration
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

// =============================================================================
// Topology
// =============================================================================

/// Configuration for the topology model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    /// Directory under which brick mount points are laid out
    pub brick_root: PathBuf,
    /// Capacity of the lifecycle event channel
    pub event_capacity: usize,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            brick_root: PathBuf::from("/var/lib/heketi/mounts"),
            event_capacity: 1024,
        }
    }
}

// =============================================================================
// Logging
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn, error
    pub level: String,
    /// Output logs as JSON
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// =============================================================================
// Top-level
// =============================================================================

/// Complete provisioner configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ssh: SshConfig,
    pub provisioner: ProvisionerConfig,
    pub topology: TopologyConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load and validate a YAML configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&contents)
    }

    /// Parse and validate a YAML document
    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no component can work with
    pub fn validate(&self) -> Result<()> {
        if self.provisioner.command_timeout_secs == 0 {
            return Err(Error::Configuration(
                "provisioner.command_timeout_secs must be greater than zero".into(),
            ));
        }
        if self.provisioner.data_alignment.trim().is_empty() {
            return Err(Error::Configuration(
                "provisioner.data_alignment must not be empty".into(),
            ));
        }
        if self.provisioner.vg_prefix.chars().any(char::is_whitespace) {
            return Err(Error::Configuration(format!(
                "provisioner.vg_prefix contains whitespace: {:?}",
                self.provisioner.vg_prefix
            )));
        }
        if self.ssh.user.is_empty() {
            return Err(Error::Configuration("ssh.user must not be empty".into()));
        }
        if self.topology.event_capacity == 0 {
            return Err(Error::Configuration(
                "topology.event_capacity must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

//! TOML configuration of the device manager.
//!
//! The file names the hosts to start and the devices each of them carries,
//! plus a few manager settings:
//!
//! ```toml
//! [manager]
//! log_level = "info"
//! listen_address = "127.0.0.1:7400"
//! devhost_binary = "/usr/bin/hdf-devhost"
//! max_restart = 3
//!
//! [[hosts]]
//! host_id = 1
//! host_name = "sample_host"
//!
//! [[hosts.devices]]
//! device_index = 0
//! module_name = "sample_drv"
//! service_name = "sample_service"
//! policy = "public"
//! ```
//!
//! # Serde default values
//!
//! Fields annotated with `#[serde(default = "some_fn")]` use the return value
//! of `some_fn()` when the field is absent from the TOML file, so a file
//! only has to spell out what differs from the defaults.  A missing file
//! yields [`DevmgrConfig::default`]: a manager with no hosts.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use hdf_core::{DeviceDescriptor, DeviceId, DevicePolicy, HostAttr, Preload};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::device_manager::DEFAULT_MAX_RESTART;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// The file parsed but describes an impossible setup.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level manager configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DevmgrConfig {
    #[serde(default)]
    pub manager: ManagerConfig,
    #[serde(default)]
    pub hosts: Vec<HostEntry>,
}

/// Settings of the manager process itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManagerConfig {
    /// `tracing` level used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Address the host listener binds.
    #[serde(default = "default_listen_address")]
    pub listen_address: SocketAddr,
    /// Host binary the installer runs.
    #[serde(default = "default_devhost_binary")]
    pub devhost_binary: PathBuf,
    /// Driver library directory passed to every host.
    #[serde(default = "default_library_dir")]
    pub library_dir: PathBuf,
    /// Consecutive deaths tolerated before a host is given up.
    #[serde(default = "default_max_restart")]
    pub max_restart: u32,
    /// Seconds to wait for a host's reply; 0 waits forever.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

/// One device host and its devices.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostEntry {
    pub host_id: u16,
    pub host_name: String,
    /// Lower values start first.
    #[serde(default = "default_priority")]
    pub priority: u16,
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
}

/// One device node of a host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceEntry {
    pub device_index: u8,
    #[serde(default)]
    pub node_index: u8,
    pub module_name: String,
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub policy: DevicePolicy,
    #[serde(default = "default_priority")]
    pub priority: u16,
    #[serde(default)]
    pub preload: Preload,
    #[serde(default = "default_permission")]
    pub permission: u16,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub match_attribute: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_listen_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 7400))
}
fn default_devhost_binary() -> PathBuf {
    PathBuf::from("hdf-devhost")
}
fn default_library_dir() -> PathBuf {
    PathBuf::from("/usr/lib/hdf/drivers")
}
fn default_max_restart() -> u32 {
    DEFAULT_MAX_RESTART
}
fn default_call_timeout_secs() -> u64 {
    10
}
fn default_priority() -> u16 {
    100
}
fn default_permission() -> u16 {
    0o664
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            listen_address: default_listen_address(),
            devhost_binary: default_devhost_binary(),
            library_dir: default_library_dir(),
            max_restart: default_max_restart(),
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

impl ManagerConfig {
    /// Reply timeout for host calls; `None` when disabled.
    pub fn call_timeout(&self) -> Option<Duration> {
        (self.call_timeout_secs > 0).then(|| Duration::from_secs(self.call_timeout_secs))
    }
}

impl DeviceEntry {
    fn to_descriptor(&self, host_id: u16) -> DeviceDescriptor {
        DeviceDescriptor::new(
            DeviceId::new(host_id, self.device_index, self.node_index),
            &self.module_name,
            &self.service_name,
        )
        .with_policy(self.policy)
        .with_priority(self.priority)
        .with_preload(self.preload)
        .with_permission(self.permission)
        .with_match_attribute(&self.match_attribute)
    }
}

impl DevmgrConfig {
    /// Checks ids are unique and every device is loadable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut host_ids = HashSet::new();
        let mut host_names = HashSet::new();
        let mut services = HashSet::new();
        for host in &self.hosts {
            if !host_ids.insert(host.host_id) {
                return Err(ConfigError::Invalid(format!("duplicate host_id {}", host.host_id)));
            }
            if host.host_name.is_empty() || !host_names.insert(host.host_name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "host {} needs a unique, non-empty host_name",
                    host.host_id
                )));
            }
            let mut nodes = HashSet::new();
            for device in &host.devices {
                let descriptor = device.to_descriptor(host.host_id);
                if !nodes.insert(descriptor.device_id()) {
                    return Err(ConfigError::Invalid(format!(
                        "duplicate device {} in host {}",
                        descriptor.device_id(),
                        host.host_name
                    )));
                }
                if descriptor.validate().is_err() {
                    return Err(ConfigError::Invalid(format!(
                        "device {} of host {} needs a module_name (and a service_name when published)",
                        descriptor.device_id(),
                        host.host_name
                    )));
                }
                if !device.service_name.is_empty() && !services.insert(device.service_name.as_str()) {
                    return Err(ConfigError::Invalid(format!(
                        "service {} is published twice",
                        device.service_name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Host attributes the device manager is built from.
    pub fn host_attrs(&self) -> Vec<HostAttr> {
        self.hosts
            .iter()
            .map(|host| {
                let mut attr = HostAttr::new(host.host_id, &host.host_name);
                attr.priority = host.priority;
                attr.devices = host
                    .devices
                    .iter()
                    .map(|device| device.to_descriptor(host.host_id))
                    .collect();
                attr
            })
            .collect()
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Loads and validates the config at `path`, returning
/// `DevmgrConfig::default()` if the file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// [`ConfigError::Parse`] if the TOML is malformed and
/// [`ConfigError::Invalid`] if validation fails.
pub fn load_config(path: &Path) -> Result<DevmgrConfig, ConfigError> {
    let config = match std::fs::read_to_string(path) {
        Ok(content) => toml::from_str::<DevmgrConfig>(&content)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => DevmgrConfig::default(),
        Err(e) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };
    config.validate()?;
    Ok(config)
}

/// Persists `config` to `path`, creating the parent directory if needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(path: &Path, config: &DevmgrConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

// SPDX-License-Identifier: GPL-3.0-only
//! Daemon configuration
//!
//! Read once at startup from a YAML document. Only `paths.log` and the
//! `devices` list are required; everything else has a default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::actuators::magic_packet;
use crate::error::{DaemonError, Result};

pub const APP_NAME: &str = "gamepad-tv";
pub const CONFIG_FILE: &str = "config.yml";
/// Overrides the config file lookup when set
pub const CONFIG_ENV: &str = "GAMEPAD_TV_CONFIG";
/// One week
const MAX_HEARTBEAT_MINUTES: u64 = 7 * 24 * 60;

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    pub paths: Paths,
    pub devices: Vec<NetworkDevice>,
    /// Name of the entry in `devices` that receives the wake packet
    #[serde(default = "default_wake_device")]
    pub wake_device: String,
    #[serde(default = "default_heartbeat_minutes")]
    pub heartbeat_minutes: u64,
    #[serde(default)]
    pub hotplug: HotplugConfig,
    #[serde(default)]
    pub cec: CecConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Paths {
    pub log: PathBuf,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct NetworkDevice {
    pub name: String,
    pub mac_address: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct HotplugConfig {
    /// Subsystem counted by the census
    pub subsystem: String,
    /// Tag assigned to controllers by udev rules
    pub tag: String,
}

impl Default for HotplugConfig {
    fn default() -> Self {
        Self {
            subsystem: "hidraw".to_string(),
            tag: "controller".to_string(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct CecConfig {
    pub device: PathBuf,
    pub osd_name: String,
    /// Poll the TV after standby the same way power-on does
    pub confirm_standby: bool,
}

impl Default for CecConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from("/dev/cec0"),
            osd_name: APP_NAME.to_string(),
            confirm_standby: false,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    pub command: String,
    pub args: Vec<String>,
    /// Kill the launched client when the daemon shuts down
    pub terminate_on_shutdown: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            command: "moonlight".to_string(),
            args: Vec::new(),
            terminate_on_shutdown: false,
        }
    }
}

fn default_wake_device() -> String {
    "pc".to_string()
}

fn default_heartbeat_minutes() -> u64 {
    30
}

impl Config {
    /// Load and validate the config at `path`
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DaemonError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::parse(&content).map_err(|source| DaemonError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Locate the config file and load it
    pub fn discover() -> Result<(PathBuf, Self)> {
        let candidates = config_candidates();
        let path = candidates
            .iter()
            .find(|p| p.is_file())
            .cloned()
            .ok_or_else(|| {
                let looked: Vec<_> = candidates.iter().map(|p| p.display().to_string()).collect();
                DaemonError::Config(format!("no config file found, looked in: {}", looked.join(", ")))
            })?;
        let config = Self::load(&path)?;
        Ok((path, config))
    }

    pub fn parse(content: &str) -> std::result::Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.paths.log.as_os_str().is_empty() {
            return Err(DaemonError::Config("paths.log must not be empty".to_string()));
        }
        if self.heartbeat_minutes == 0 || self.heartbeat_minutes > MAX_HEARTBEAT_MINUTES {
            return Err(DaemonError::Config(format!(
                "heartbeat_minutes must be between 1 and {}",
                MAX_HEARTBEAT_MINUTES
            )));
        }
        if self.hotplug.tag.is_empty() {
            return Err(DaemonError::Config("hotplug.tag must not be empty".to_string()));
        }
        if self.client.command.is_empty() {
            return Err(DaemonError::Config("client.command must not be empty".to_string()));
        }
        let mac = self.wake_mac()?;
        if let Err(e) = magic_packet(mac) {
            return Err(DaemonError::Config(format!(
                "device '{}' has an invalid mac_address '{}': {}",
                self.wake_device, mac, e
            )));
        }
        Ok(())
    }

    /// Heartbeat log interval; bounded by `validate`
    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_minutes.min(MAX_HEARTBEAT_MINUTES) * 60)
    }

    /// MAC address of the device named by `wake_device`
    ///
    /// The last matching entry wins when a name appears more than once.
    pub fn wake_mac(&self) -> Result<&str> {
        self.devices
            .iter()
            .rev()
            .find(|d| d.name == self.wake_device)
            .map(|d| d.mac_address.as_str())
            .ok_or_else(|| {
                DaemonError::Config(format!("no device named '{}' in devices", self.wake_device))
            })
    }
}

/// Lookup order: env override, user config dir, next to the executable
fn config_candidates() -> Vec<PathBuf> {
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return vec![PathBuf::from(path)];
    }

    let mut candidates = Vec::new();
    if let Some(dir) = dirs::config_dir() {
        candidates.push(dir.join(APP_NAME).join(CONFIG_FILE));
    }
    if let Some(dir) = std::env::current_exe().ok().and_then(|exe| exe.parent().map(Path::to_path_buf)) {
        candidates.push(dir.join(CONFIG_FILE));
    }
    candidates
}

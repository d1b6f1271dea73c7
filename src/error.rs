// SPDX-License-Identifier: GPL-3.0-only
//! Error types for the daemon
//!
//! Startup errors (configuration, device monitor, instance lock) are fatal.
//! Everything raised while handling a hotplug event stays inside that event
//! and is logged by the dispatcher.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Main daemon error type
#[derive(Error, Debug)]
pub enum DaemonError {
    /// Missing, unreadable or invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file could not be parsed
    #[error("Failed to parse config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// udev subscription or enumeration failure
    #[error("Device monitor error: {0}")]
    DeviceMonitor(#[source] std::io::Error),

    /// Display never reported "on" within the power-on deadline
    #[error("Display did not report power on within {0:?}")]
    PowerControlTimeout(Duration),

    /// CEC command failure
    #[error("CEC {operation} failed: {source}")]
    Bus {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// Wake-on-LAN packet could not be sent
    #[error("Failed to send wake packet to {mac}: {reason}")]
    NetworkSend { mac: String, reason: String },

    /// Streaming client could not be spawned
    #[error("Failed to launch `{command}`: {source}")]
    ProcessLaunch {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Another daemon instance holds the lock file
    #[error("Another instance is already running (lock held on {0})")]
    AlreadyRunning(PathBuf),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for DaemonError
pub type Result<T> = std::result::Result<T, DaemonError>;

// SPDX-License-Identifier: GPL-3.0-only
//! Controller census
//!
//! Counts attached controllers by enumerating udev on demand instead of
//! tracking attach/detach deltas, so a missed or reordered event can never
//! leave the count wrong.

use crate::config::HotplugConfig;
use crate::error::{DaemonError, Result};

/// Snapshot query for the number of attached controllers
pub trait Census: Send + Sync {
    fn count(&self) -> Result<usize>;
}

/// Counts devices in one subsystem that carry the controller tag
#[derive(Debug, Clone)]
pub struct UdevCensus {
    subsystem: String,
    tag: String,
}

impl UdevCensus {
    pub fn new(config: &HotplugConfig) -> Self {
        Self {
            subsystem: config.subsystem.clone(),
            tag: config.tag.clone(),
        }
    }

    fn scan(&self) -> std::io::Result<usize> {
        let mut enumerator = udev::Enumerator::new()?;
        enumerator.match_subsystem(&self.subsystem)?;
        enumerator.match_tag(&self.tag)?;
        Ok(enumerator.scan_devices()?.count())
    }
}

impl Census for UdevCensus {
    fn count(&self) -> Result<usize> {
        let count = self.scan().map_err(DaemonError::DeviceMonitor)?;
        debug!(
            "Census: {} device(s) in subsystem '{}' tagged '{}'",
            count, self.subsystem, self.tag
        );
        Ok(count)
    }
}

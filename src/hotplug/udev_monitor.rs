use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::{DeviceAction, DeviceEvent};

/// How long a single poll blocks before re-checking the stop flag
const POLL_TIMEOUT_MS: libc::c_int = 1000;

/// Monitors udev for controller add/remove events
///
/// This runs in a dedicated blocking thread because udev's MonitorSocket is not Send.
/// It uses libc::poll() to wait for events on the udev socket.
pub struct UdevMonitor {
    socket: udev::MonitorSocket,
    tag: String,
}

impl UdevMonitor {
    /// Create a new udev monitor for devices carrying `tag`
    ///
    /// The tag is assigned by a udev rule, which keeps us from waking up for
    /// every unrelated device on the system.
    pub fn new(tag: &str) -> Result<Self, std::io::Error> {
        let socket = udev::MonitorBuilder::new()?.match_tag(tag)?.listen()?;

        Ok(Self {
            socket,
            tag: tag.to_string(),
        })
    }

    /// Run the monitoring loop, calling the callback for each attach/detach
    ///
    /// Blocks until `stop` is set, the callback returns false, or poll fails.
    pub fn run<F>(self, stop: Arc<AtomicBool>, mut callback: F) -> std::io::Result<()>
    where
        F: FnMut(DeviceEvent) -> bool, // Returns true to continue, false to stop
    {
        info!("Hotplug monitoring started (filtering by '{}' tag)", self.tag);

        let fd = self.socket.as_raw_fd();

        while !stop.load(Ordering::SeqCst) {
            let mut poll_fd = libc::pollfd {
                fd,
                events: libc::POLLIN,
                revents: 0,
            };

            let poll_result = unsafe { libc::poll(&mut poll_fd, 1, POLL_TIMEOUT_MS) };

            if poll_result < 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                error!("Poll error: {}", err);
                return Err(err);
            }

            if poll_result == 0 {
                continue;
            }

            for event in self.socket.iter() {
                let device = event
                    .devnode()
                    .unwrap_or_else(|| event.syspath())
                    .display()
                    .to_string();

                let action = match event.event_type() {
                    udev::EventType::Add => DeviceAction::Attach,
                    udev::EventType::Remove => DeviceAction::Detach,
                    other => {
                        debug!("Ignoring udev {:?} event for {}", other, device);
                        continue;
                    }
                };

                debug!("udev event: {:?} {}", action, device);

                if !callback(DeviceEvent { action, device }) {
                    info!("Hotplug monitoring stopped by callback");
                    return Ok(());
                }
            }
        }

        info!("Hotplug monitoring stopped");
        Ok(())
    }
}

//! Controller hotplug detection using udev
//!
//! A dedicated thread listens for tagged udev add/remove events and queues
//! them; the dispatcher hands them to the session orchestrator one at a time.

mod dispatcher;
mod udev_monitor;

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::thread::JoinHandle;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::error::{DaemonError, Result};
use udev_monitor::UdevMonitor;

pub use dispatcher::{EventDispatcher, EventHandler};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceAction {
    Attach,
    Detach,
}

/// One hotplug notification, consumed exactly once
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEvent {
    pub action: DeviceAction,
    /// devnode, or syspath for devices without one
    pub device: String,
}

/// Event source that stops on its own once the shutdown stop flag is set
pub trait Listener: Send + 'static {
    /// Block until the source has stopped
    fn join(self);
}

/// Handle to the listener thread
pub struct HotplugListener {
    thread: JoinHandle<()>,
}

impl HotplugListener {
    /// Start listening for devices tagged `tag`
    ///
    /// Returns once the udev monitor is subscribed, so a permission or
    /// netlink failure surfaces here instead of in the background.
    pub fn spawn(
        tag: &str,
        stop: Arc<AtomicBool>,
    ) -> Result<(Self, UnboundedReceiver<DeviceEvent>)> {
        let (tx, rx) = unbounded_channel();
        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel(1);
        let tag = tag.to_string();

        let thread = std::thread::Builder::new()
            .name("hotplug".to_string())
            .spawn(move || {
                // MonitorSocket is not Send, so it has to be created here
                let monitor = match UdevMonitor::new(&tag) {
                    Ok(m) => {
                        let _ = ready_tx.send(Ok(()));
                        m
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                if let Err(e) = monitor.run(stop, |event| forward(&tx, event)) {
                    error!("Hotplug monitoring failed: {}", e);
                }
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok((Self { thread }, rx)),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(DaemonError::DeviceMonitor(e))
            }
            Err(_) => {
                let _ = thread.join();
                Err(DaemonError::DeviceMonitor(std::io::Error::other(
                    "hotplug thread exited during startup",
                )))
            }
        }
    }

}

impl Listener for HotplugListener {
    /// Wait for the thread to notice its stop flag
    fn join(self) {
        if self.thread.join().is_err() {
            error!("Hotplug thread panicked");
        }
    }
}

/// Queue an event for the dispatcher; false once nobody is listening
fn forward(tx: &UnboundedSender<DeviceEvent>, event: DeviceEvent) -> bool {
    match tx.send(event) {
        Ok(()) => true,
        Err(_) => {
            error!("Hotplug channel closed, stopping monitor");
            false
        }
    }
}

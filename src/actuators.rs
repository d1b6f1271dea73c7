// SPDX-License-Identifier: GPL-3.0-only
//! Fire-and-forget side effects: wake-on-LAN and the streaming client

use std::process::{ExitStatus, Stdio};

use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch};
use wakey::{WakeyError, WolPacket};

use crate::config::ClientConfig;
use crate::error::{DaemonError, Result};

/// Side effects of starting a session, other than TV power
pub trait Actuators: Send + Sync {
    /// Broadcast one magic packet; no reply is expected
    fn wake(&self, mac: &str) -> Result<()>;

    /// Spawn the streaming client without waiting for it
    fn launch_client(&self) -> Result<ClientHandle>;
}

/// A launched streaming client
///
/// The process is owned by a reaper task that waits on it and logs its exit
/// status. The handle only keeps what is needed to ask for termination;
/// dropping it leaves the process running.
#[derive(Debug)]
pub struct ClientHandle {
    command: String,
    pid: Option<u32>,
    kill: Option<oneshot::Sender<()>>,
    exit: watch::Receiver<Option<ExitStatus>>,
}

impl ClientHandle {
    /// Hand `child` to a reaper task; requires a tokio runtime
    fn spawn_reaper(command: String, mut child: Child) -> Self {
        let pid = child.id();
        let (kill_tx, mut kill_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = watch::channel(None);

        let name = command.clone();
        tokio::spawn(async move {
            let finished = tokio::select! {
                status = child.wait() => Some(status),
                Ok(()) = &mut kill_rx => None,
            };
            let status = match finished {
                Some(status) => status,
                None => {
                    if let Err(e) = child.start_kill() {
                        warn!("Failed to kill {}: {}", name, e);
                    }
                    child.wait().await
                }
            };

            match status {
                Ok(status) => {
                    info!("{} (pid {:?}) exited: {}", name, pid, status);
                    exit_tx.send_replace(Some(status));
                }
                Err(e) => error!("Failed to wait for {}: {}", name, e),
            }
        });

        Self {
            command,
            pid,
            kill: Some(kill_tx),
            exit: exit_rx,
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Process id at launch
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Exit status, once the reaper has collected it
    pub fn exit_status(&self) -> Option<ExitStatus> {
        *self.exit.borrow()
    }

    /// Wait until the process has been reaped
    ///
    /// Returns `None` when there is no process or it could not be waited on.
    pub async fn wait(&mut self) -> Option<ExitStatus> {
        match self.exit.wait_for(Option::is_some).await {
            Ok(status) => *status,
            Err(_) => None,
        }
    }

    /// Kill the client and wait for it to be reaped
    pub async fn terminate(&mut self) -> Option<ExitStatus> {
        if let Some(status) = self.exit_status() {
            return Some(status);
        }
        match self.kill.take() {
            // A closed receiver means the reaper already finished
            Some(kill) => {
                let _ = kill.send(());
                self.wait().await
            }
            None => None,
        }
    }

    #[cfg(test)]
    pub(crate) fn without_process(command: &str) -> Self {
        let (_, exit) = watch::channel(None);
        Self {
            command: command.to_string(),
            pid: None,
            kill: None,
            exit,
        }
    }
}

/// Parse a MAC address written as six hex groups separated by ':' or '-'
pub fn magic_packet(mac: &str) -> wakey::Result<WolPacket> {
    let sep = if mac.contains('-') { '-' } else { ':' };
    // wakey collects the groups into a six-slot buffer and panics on more
    if mac.split(sep).count() != 6 {
        return Err(WakeyError::InvalidMacFormat);
    }
    WolPacket::from_string(mac, sep)
}

/// Real network and process actuators
pub struct SystemActuators {
    client: ClientConfig,
}

impl SystemActuators {
    pub fn new(client: ClientConfig) -> Self {
        Self { client }
    }
}

impl Actuators for SystemActuators {
    fn wake(&self, mac: &str) -> Result<()> {
        let network_error = |reason: String| DaemonError::NetworkSend {
            mac: mac.to_string(),
            reason,
        };

        magic_packet(mac)
            .map_err(|e| network_error(e.to_string()))?
            .send_magic()
            .map_err(|e| network_error(e.to_string()))?;
        Ok(())
    }

    fn launch_client(&self) -> Result<ClientHandle> {
        let child = Command::new(&self.client.command)
            .args(&self.client.args)
            .stdin(Stdio::null())
            // Own process group: a Ctrl+C aimed at the daemon must not reach the client
            .process_group(0)
            .spawn()
            .map_err(|source| DaemonError::ProcessLaunch {
                command: self.client.command.clone(),
                source,
            })?;

        Ok(ClientHandle::spawn_reaper(self.client.command.clone(), child))
    }
}

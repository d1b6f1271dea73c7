// SPDX-License-Identifier: GPL-3.0-only
//! Graceful shutdown
//!
//! SIGINT and SIGTERM take the same path: stop the hotplug listener, let the
//! in-flight transition finish or bail out at its next checkpoint, release
//! the CEC session, then exit.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::signal::unix::{Signal, SignalKind, signal};
use tokio::sync::watch;

use crate::actuators::Actuators;
use crate::census::Census;
use crate::hotplug::Listener;
use crate::protocols::DisplayBus;
use crate::session::SessionOrchestrator;

/// Why the daemon is stopping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Signal(&'static str),
    /// The hotplug listener thread exited on its own
    ListenerStopped,
}

impl ShutdownReason {
    pub fn exit_code(&self) -> u8 {
        match self {
            ShutdownReason::Signal(_) => 0,
            ShutdownReason::ListenerStopped => 1,
        }
    }
}

/// Read side of the shutdown flag, cloned into every long-running task
#[derive(Debug, Clone)]
pub struct ShutdownSignal(watch::Receiver<bool>);

impl ShutdownSignal {
    pub fn is_triggered(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once shutdown has been triggered
    pub async fn triggered(&mut self) {
        let closed = self.0.wait_for(|stop| *stop).await.is_err();
        if closed {
            // Coordinator gone without triggering: nothing will ever stop us
            std::future::pending::<()>().await;
        }
    }
}

/// SIGINT/SIGTERM registration
pub struct StopSignals {
    interrupt: Signal,
    terminate: Signal,
}

impl StopSignals {
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    /// Wait for either signal and return its name
    pub async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
        }
    }
}

pub struct ShutdownCoordinator {
    tx: watch::Sender<bool>,
    listener_stop: Arc<AtomicBool>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            tx,
            listener_stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal(self.tx.subscribe())
    }

    /// Stop flag polled by the listener thread between udev reads
    pub fn listener_flag(&self) -> Arc<AtomicBool> {
        self.listener_stop.clone()
    }

    /// Stop accepting hotplug events and cancel in-flight power sequences
    pub fn trigger(&self) {
        self.listener_stop.store(true, Ordering::SeqCst);
        self.tx.send_replace(true);
    }

    /// Release everything once the dispatcher has returned
    pub async fn teardown<L, C, B, A>(
        &self,
        listener: L,
        orchestrator: &mut SessionOrchestrator<C, B, A>,
        terminate_client: bool,
    ) where
        L: Listener,
        C: Census,
        B: DisplayBus,
        A: Actuators,
    {
        self.trigger();

        if tokio::task::spawn_blocking(move || listener.join()).await.is_err() {
            warn!("Failed to join hotplug listener");
        }

        self.release(orchestrator, terminate_client).await;
    }

    /// Release the CEC session and optionally kill the client
    ///
    /// The orchestrator is idle at this point, so the bus is not in use.
    pub async fn release<C, B, A>(
        &self,
        orchestrator: &mut SessionOrchestrator<C, B, A>,
        terminate_client: bool,
    ) where
        C: Census,
        B: DisplayBus,
        A: Actuators,
    {
        if terminate_client {
            if let Some(mut client) = orchestrator.take_client() {
                let pid = client.pid();
                match client.terminate().await {
                    Some(status) => info!("Stopped {} (pid {:?}): {}", client.command(), pid, status),
                    None => debug!("{} had no process left to stop", client.command()),
                }
            }
        }

        match orchestrator.power().release().await {
            Ok(()) => info!("Released CEC session"),
            Err(e) => error!("{}", e),
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

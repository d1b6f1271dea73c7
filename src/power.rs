// SPDX-License-Identifier: GPL-3.0-only
//! TV power control over the display bus
//!
//! `PowerController` owns the bus session exclusively. It is only ever
//! driven from the orchestrator's worker, so it does no locking of its own.

use std::time::Duration;

use crate::error::{DaemonError, Result};
use crate::protocols::{DisplayBus, DisplayPower};
use crate::retry::{PollOutcome, PollPolicy, poll_until};
use crate::shutdown::ShutdownSignal;

/// Resend "on" every second for up to ten seconds
pub const POWER_ON_POLICY: PollPolicy = PollPolicy::new(Duration::from_secs(1), Duration::from_secs(10));
/// Some TVs take a while to actually switch inputs
pub const SOURCE_SETTLE_DELAY: Duration = Duration::from_secs(5);

/// Last known power state of the TV, as far as this daemon can tell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    Unknown,
    Off,
    TransitioningOn,
    On,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerOnOutcome {
    PoweredOn,
    TimedOut,
    /// Shutdown was requested mid-sequence
    Cancelled,
}

pub struct PowerController<B> {
    bus: B,
    state: PowerState,
    shutdown: ShutdownSignal,
    policy: PollPolicy,
    settle_delay: Duration,
    confirm_standby: bool,
}

impl<B: DisplayBus> PowerController<B> {
    pub fn new(bus: B, shutdown: ShutdownSignal) -> Self {
        Self {
            bus,
            state: PowerState::Unknown,
            shutdown,
            policy: POWER_ON_POLICY,
            settle_delay: SOURCE_SETTLE_DELAY,
            confirm_standby: false,
        }
    }

    /// Poll the TV after standby using the power-on policy
    pub fn with_standby_confirmation(mut self, confirm: bool) -> Self {
        self.confirm_standby = confirm;
        self
    }

    pub fn state(&self) -> PowerState {
        self.state
    }

    pub fn power_on_deadline(&self) -> Duration {
        self.policy.deadline
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.is_triggered()
    }

    #[cfg(test)]
    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Claim the bus session; called once at startup
    pub async fn claim(&self) -> Result<()> {
        self.bus
            .claim()
            .await
            .map_err(|source| DaemonError::Bus { operation: "claim", source })
    }

    /// Send "on" until the TV reports on, the deadline passes, or shutdown
    pub async fn power_on(&mut self) -> PowerOnOutcome {
        self.state = PowerState::TransitioningOn;
        let bus = &self.bus;

        let outcome = poll_until(
            self.policy,
            &mut self.shutdown,
            |attempt| async move {
                if let Err(e) = bus.power_on().await {
                    warn!("Power-on command {} failed: {:#}", attempt, e);
                }
            },
            |attempt| async move {
                match bus.power_status().await {
                    Ok(status) => {
                        debug!("TV power status after attempt {}: {:?}", attempt, status);
                        status == DisplayPower::On
                    }
                    Err(e) => {
                        debug!("Power status query {} failed: {:#}", attempt, e);
                        false
                    }
                }
            },
        )
        .await;

        match outcome {
            PollOutcome::Satisfied { attempts } => {
                info!("TV reported on after {} attempt(s)", attempts);
                self.state = PowerState::On;
                PowerOnOutcome::PoweredOn
            }
            PollOutcome::TimedOut { attempts } => {
                error!(
                    "TV still not on after {:?} ({} attempts)",
                    self.policy.deadline, attempts
                );
                self.state = PowerState::Unknown;
                PowerOnOutcome::TimedOut
            }
            PollOutcome::Cancelled { attempts } => {
                info!("Power-on cancelled by shutdown after {} attempt(s)", attempts);
                self.state = PowerState::Unknown;
                PowerOnOutcome::Cancelled
            }
        }
    }

    /// Make this host the active input, then give the TV time to switch
    pub async fn switch_source(&mut self) -> Result<()> {
        if self.shutdown.is_triggered() {
            debug!("Shutting down, not switching the TV input");
            return Ok(());
        }
        self.bus
            .set_active_source()
            .await
            .map_err(|source| DaemonError::Bus { operation: "set active source", source })?;
        debug!("Sent 'set active source' to TV");

        tokio::select! {
            _ = tokio::time::sleep(self.settle_delay) => {}
            _ = self.shutdown.triggered() => debug!("Source settle delay cut short by shutdown"),
        }
        Ok(())
    }

    /// Send a single standby command
    ///
    /// Unconfirmed unless standby confirmation is enabled; even then a TV
    /// that never reports standby only produces a warning.
    pub async fn standby(&mut self) -> Result<()> {
        self.bus
            .standby()
            .await
            .map_err(|source| DaemonError::Bus { operation: "standby", source })?;
        self.state = PowerState::Off;
        info!("Sent standby to TV");

        if self.confirm_standby {
            let bus = &self.bus;
            let outcome = poll_until(
                self.policy,
                &mut self.shutdown,
                |_| async {},
                |_| async move {
                    matches!(bus.power_status().await, Ok(DisplayPower::Standby))
                },
            )
            .await;

            match outcome {
                PollOutcome::Satisfied { attempts } => {
                    debug!("TV confirmed standby after {} poll(s)", attempts)
                }
                PollOutcome::TimedOut { .. } => warn!("TV did not confirm standby"),
                PollOutcome::Cancelled { .. } => {}
            }
        }
        Ok(())
    }

    /// Release the bus session; the controller must not be used afterwards
    pub async fn release(&self) -> Result<()> {
        self.bus
            .release()
            .await
            .map_err(|source| DaemonError::Bus { operation: "release", source })
    }
}

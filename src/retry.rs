// SPDX-License-Identifier: GPL-3.0-only
//! Bounded command-and-poll loop
//!
//! The CEC bus drops frames and acknowledgements often enough that a single
//! command is not reliable. `poll_until` resends a command on a fixed
//! interval and probes for the wanted state after each wait, until the probe
//! succeeds, the deadline passes, or shutdown is requested.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::shutdown::ShutdownSignal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Wait between sending the command and probing
    pub interval: Duration,
    /// No new attempt starts once this much time has elapsed
    pub deadline: Duration,
}

impl PollPolicy {
    pub const fn new(interval: Duration, deadline: Duration) -> Self {
        Self { interval, deadline }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Satisfied { attempts: u32 },
    TimedOut { attempts: u32 },
    Cancelled { attempts: u32 },
}

/// Run `command`, wait `policy.interval`, then `probe`, until `probe` returns
/// true or `policy.deadline` has elapsed.
///
/// Shutdown is checked before each attempt and during each wait.
pub async fn poll_until<C, CF, P, PF>(
    policy: PollPolicy,
    shutdown: &mut ShutdownSignal,
    mut command: C,
    mut probe: P,
) -> PollOutcome
where
    C: FnMut(u32) -> CF,
    CF: Future<Output = ()>,
    P: FnMut(u32) -> PF,
    PF: Future<Output = bool>,
{
    let start = Instant::now();
    let mut attempts = 0;

    while start.elapsed() < policy.deadline {
        if shutdown.is_triggered() {
            return PollOutcome::Cancelled { attempts };
        }

        attempts += 1;
        command(attempts).await;

        tokio::select! {
            _ = tokio::time::sleep(policy.interval) => {}
            _ = shutdown.triggered() => return PollOutcome::Cancelled { attempts },
        }

        if probe(attempts).await {
            return PollOutcome::Satisfied { attempts };
        }
    }

    PollOutcome::TimedOut { attempts }
}

// SPDX-License-Identifier: GPL-3.0-only
//! Display control protocols
//!
//! The TV is driven over HDMI-CEC. `DisplayBus` is the seam between the
//! power controller and whatever talks to the CEC adapter.

pub mod cec_ctl;

use std::future::Future;

use anyhow::Result;

/// Power status as reported by the TV
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayPower {
    On,
    Standby,
    TransitioningToOn,
    TransitioningToStandby,
    Unknown,
}

/// Primitives for exactly one target display (CEC logical address 0)
///
/// Implementations may block on I/O for a short while but must not retry;
/// retries are the power controller's job.
pub trait DisplayBus: Send + Sync {
    /// Take a logical address on the bus as a playback device
    fn claim(&self) -> impl Future<Output = Result<()>> + Send;

    fn power_on(&self) -> impl Future<Output = Result<()>> + Send;

    fn standby(&self) -> impl Future<Output = Result<()>> + Send;

    /// Ask the TV to switch its input to this host
    fn set_active_source(&self) -> impl Future<Output = Result<()>> + Send;

    fn power_status(&self) -> impl Future<Output = Result<DisplayPower>> + Send;

    /// Give up the logical address claimed by `claim`
    fn release(&self) -> impl Future<Output = Result<()>> + Send;
}

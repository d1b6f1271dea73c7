// SPDX-License-Identifier: GPL-3.0-only
//! HDMI-CEC through the kernel CEC framework
//!
//! Drives `/dev/cecN` with the `cec-ctl` tool from v4l-utils. Every call is
//! one short-lived `cec-ctl` process; the adapter keeps the claimed logical
//! address between calls until `release` clears it.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use tokio::process::Command;

use super::{DisplayBus, DisplayPower};

const CEC_CTL: &str = "cec-ctl";
/// Logical address of the TV
const TV: &str = "0";

/// `cec-ctl` backed display bus
pub struct CecCtl {
    device: PathBuf,
    osd_name: String,
}

impl CecCtl {
    pub fn new(device: PathBuf, osd_name: String) -> Self {
        Self { device, osd_name }
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        let output = Command::new(CEC_CTL)
            .arg("-d")
            .arg(&self.device)
            .args(args)
            .output()
            .await
            .with_context(|| format!("failed to run {}", CEC_CTL))?;

        if !output.status.success() {
            bail!(
                "{} {} exited with {}: {}",
                CEC_CTL,
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Our own physical address, needed for ACTIVE_SOURCE
    async fn physical_address(&self) -> Result<String> {
        let status = self.run(&[]).await?;
        parse_physical_address(&status).with_context(|| {
            format!("no valid physical address for {}", self.device.display())
        })
    }
}

impl DisplayBus for CecCtl {
    async fn claim(&self) -> Result<()> {
        self.run(&["--playback", "--osd-name", self.osd_name.as_str()]).await?;
        debug!("Claimed playback device on {}", self.device.display());
        Ok(())
    }

    async fn power_on(&self) -> Result<()> {
        self.run(&["--to", TV, "--image-view-on"]).await?;
        Ok(())
    }

    async fn standby(&self) -> Result<()> {
        self.run(&["--to", TV, "--standby"]).await?;
        Ok(())
    }

    async fn set_active_source(&self) -> Result<()> {
        let address = self.physical_address().await?;
        let arg = format!("phys-addr={}", address);
        self.run(&["--active-source", arg.as_str()]).await?;
        Ok(())
    }

    async fn power_status(&self) -> Result<DisplayPower> {
        let output = self.run(&["--to", TV, "--give-device-power-status"]).await?;
        Ok(parse_power_status(&output))
    }

    async fn release(&self) -> Result<()> {
        self.run(&["--clear"]).await?;
        Ok(())
    }
}

/// Extract `pwr-state` from a GIVE_DEVICE_POWER_STATUS reply
///
/// No reply (TV asleep or bus collision) reads as `Unknown`.
fn parse_power_status(output: &str) -> DisplayPower {
    let state = output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("pwr-state:"))
        .filter_map(|rest| rest.split_whitespace().next())
        .last();

    match state {
        Some("on") => DisplayPower::On,
        Some("standby") => DisplayPower::Standby,
        Some("to-on") => DisplayPower::TransitioningToOn,
        Some("to-standby") => DisplayPower::TransitioningToStandby,
        _ => DisplayPower::Unknown,
    }
}

/// Extract `a.b.c.d` from the adapter status; `f.f.f.f` means not connected
fn parse_physical_address(status: &str) -> Option<String> {
    let address = status
        .lines()
        .find(|line| line.trim_start().starts_with("Physical Address"))?
        .split_once(':')?
        .1
        .trim();

    let nibbles: Vec<&str> = address.split('.').collect();
    let well_formed = nibbles.len() == 4
        && nibbles
            .iter()
            .all(|n| n.len() == 1 && n.chars().all(|c| c.is_ascii_hexdigit()));

    if !well_formed || address.eq_ignore_ascii_case("f.f.f.f") {
        return None;
    }
    Some(address.to_string())
}

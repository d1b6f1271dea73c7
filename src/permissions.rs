use std::fs;
use std::path::{Path, PathBuf};

use crate::config::Config;

const UDEV_RULE_DIRS: [&str; 2] = ["/etc/udev/rules.d", "/usr/lib/udev/rules.d"];

#[derive(Debug, Clone)]
pub struct PermissionCheckResult {
    pub requirements: Vec<PermissionRequirement>,
}

#[derive(Debug, Clone)]
pub struct PermissionRequirement {
    pub name: String,
    pub description: String,
    pub status: RequirementStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequirementStatus {
    Met,
    NotMet,
    NotApplicable,
}

impl PermissionCheckResult {
    pub fn has_issues(&self) -> bool {
        self.requirements.iter().any(|r| r.status == RequirementStatus::NotMet)
    }

    pub fn summary(&self) -> String {
        let not_met: Vec<_> = self.requirements
            .iter()
            .filter(|r| r.status == RequirementStatus::NotMet)
            .collect();

        if not_met.is_empty() {
            let met_count = self.requirements.iter().filter(|r| r.status == RequirementStatus::Met).count();
            format!("All {} requirements met", met_count)
        } else {
            format!("{} requirement(s) not met", not_met.len())
        }
    }

    /// Log unmet requirements; the daemon starts regardless
    pub fn log(&self) {
        for r in &self.requirements {
            match r.status {
                RequirementStatus::NotMet => warn!("{}: {}", r.name, r.description),
                _ => debug!("{}: {}", r.name, r.description),
            }
        }
        if self.has_issues() {
            warn!("Startup checks: {}", self.summary());
        } else {
            info!("Startup checks: {}", self.summary());
        }
    }
}

/// Check what the daemon needs from the host: a CEC adapter it can open,
/// the `cec-ctl` tool, and a udev rule that tags controllers
pub fn check_host(config: &Config) -> PermissionCheckResult {
    let mut requirements = Vec::new();

    // 1. CEC adapters
    let cec_devices = find_cec_devices();
    requirements.push(PermissionRequirement {
        name: "CEC devices".to_string(),
        description: if cec_devices.is_empty() {
            "No /dev/cec* devices found".to_string()
        } else {
            format!("Found {} CEC device(s)", cec_devices.len())
        },
        status: if cec_devices.is_empty() {
            RequirementStatus::NotMet
        } else {
            RequirementStatus::Met
        },
    });

    // 2. Read/write access to the configured adapter
    let device = &config.cec.device;
    requirements.push(PermissionRequirement {
        name: "CEC read/write access".to_string(),
        description: if !device.exists() {
            format!("{} does not exist", device.display())
        } else if can_write(device) {
            format!("Can access {}", device.display())
        } else {
            format!("Cannot open {} (is the user in the video group?)", device.display())
        },
        status: if device.exists() && can_write(device) {
            RequirementStatus::Met
        } else {
            RequirementStatus::NotMet
        },
    });

    // 3. cec-ctl
    requirements.push(tool_requirement("cec-ctl", "install v4l-utils"));

    // 4. udev rule assigning the controller tag
    let tag = &config.hotplug.tag;
    let rule = find_tag_rule(tag, &UDEV_RULE_DIRS.map(PathBuf::from));
    requirements.push(PermissionRequirement {
        name: "udev rules (controller tag)".to_string(),
        description: match &rule {
            Some(path) => format!("'{}' tag assigned in {}", tag, path.display()),
            None => format!("No udev rule assigns the '{}' tag; controllers will not be seen", tag),
        },
        status: if rule.is_some() {
            RequirementStatus::Met
        } else {
            RequirementStatus::NotMet
        },
    });

    // 5. Wake target, purely informational
    requirements.push(PermissionRequirement {
        name: "Wake-on-LAN target".to_string(),
        description: match config.wake_mac() {
            Ok(mac) => format!("{} ({})", config.wake_device, mac),
            Err(_) => "N/A".to_string(),
        },
        status: RequirementStatus::NotApplicable,
    });

    PermissionCheckResult { requirements }
}

/// Find all CEC device files
fn find_cec_devices() -> Vec<PathBuf> {
    (0..16)
        .map(|i| PathBuf::from(format!("/dev/cec{}", i)))
        .filter(|path| path.exists())
        .collect()
}

/// Check if we can write to a device
fn can_write(path: &Path) -> bool {
    fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .is_ok()
}

/// Whether `binary` can be found in PATH
fn tool_requirement(binary: &str, install_hint: &str) -> PermissionRequirement {
    match which::which(binary) {
        Ok(path) => PermissionRequirement {
            name: binary.to_string(),
            description: format!("Found {}", path.display()),
            status: RequirementStatus::Met,
        },
        Err(_) => PermissionRequirement {
            name: binary.to_string(),
            description: format!("{} not found in PATH ({})", binary, install_hint),
            status: RequirementStatus::NotMet,
        },
    }
}

/// First rules file under `dirs` that adds `tag`
fn find_tag_rule(tag: &str, dirs: &[PathBuf]) -> Option<PathBuf> {
    let needle = format!("TAG+=\"{}\"", tag);

    for dir in dirs {
        let Ok(entries) = fs::read_dir(dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "rules") {
                match fs::read_to_string(&path) {
                    Ok(content) if content.contains(&needle) => return Some(path),
                    Ok(_) => {}
                    Err(e) => debug!("Failed to read {}: {}", path.display(), e),
                }
            }
        }
    }

    None
}

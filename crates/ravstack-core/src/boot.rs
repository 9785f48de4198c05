//! Boot device handling.
//!
//! Changing the boot flag of a running VM makes Ravello restart it, and
//! Ironic does not expect a set-boot-device call to power-cycle a node. A
//! change requested while the VM is not stopped is therefore queued as a
//! `[boot: <dev>]` tag in the VM description and applied on the next start.
//! Nothing outside this module touches that tag.

use std::sync::OnceLock;

use anyhow::{Result, bail};
use regex::Regex;

use crate::app::Vm;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootDevice {
    Hd,
    Network,
}

impl BootDevice {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hd => "hd",
            Self::Network => "network",
        }
    }
}

impl std::fmt::Display for BootDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BootDevice {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "hd" => Ok(Self::Hd),
            "network" => Ok(Self::Network),
            other => bail!("invalid boot device `{}` (expected hd or network)", other),
        }
    }
}

fn tag_regex() -> &'static Regex {
    static TAG: OnceLock<Regex> = OnceLock::new();
    TAG.get_or_init(|| Regex::new(r"\[boot: (hd|network)\]").expect("valid boot tag regex"))
}

/// Boot device according to the disk drive's boot flag.
pub fn current(vm: &Vm) -> Result<BootDevice> {
    let disk = vm.disk()?;
    Ok(if disk.boot.unwrap_or(false) {
        BootDevice::Hd
    } else {
        BootDevice::Network
    })
}

pub fn set_current(vm: &mut Vm, device: BootDevice) -> Result<()> {
    vm.disk_mut()?.boot = Some(device == BootDevice::Hd);
    Ok(())
}

/// The queued boot device, if a tag is present.
pub fn pending(vm: &Vm) -> Option<BootDevice> {
    let desc = vm.description.as_deref()?;
    let caps = tag_regex().captures(desc)?;
    caps.get(1).and_then(|m| m.as_str().parse().ok())
}

pub fn set_pending(vm: &mut Vm, device: BootDevice) {
    if pending(vm) == Some(device) {
        return;
    }
    let mut desc = strip_tag(vm.description.as_deref().unwrap_or(""));
    desc.push_str(&format!("[boot: {}]", device));
    vm.description = Some(desc);
}

pub fn clear_pending(vm: &mut Vm) {
    if pending(vm).is_none() {
        return;
    }
    let desc = strip_tag(vm.description.as_deref().unwrap_or(""));
    vm.description = Some(desc);
}

/// The pending device if any, else the current one.
pub fn effective(vm: &Vm) -> Result<BootDevice> {
    match pending(vm) {
        Some(device) => Ok(device),
        None => current(vm),
    }
}

fn strip_tag(desc: &str) -> String {
    match tag_regex().find(desc) {
        Some(m) => format!("{}{}", &desc[..m.start()], &desc[m.end()..]),
        None => desc.to_string(),
    }
}

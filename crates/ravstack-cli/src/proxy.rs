//! The SSH forced-command proxy.
//!
//! Ironic's SSH power driver logs into the undercloud and runs `virsh`
//! command lines. The authorized key forces `ravstack proxy-run`, which
//! finds the original command line in `$SSH_ORIGINAL_COMMAND`, recognizes
//! which virsh operation it is and runs the matching node command.

use std::sync::OnceLock;

use anyhow::{Result, bail};
use ravstack_core::boot::BootDevice;
use ravstack_core::error::UnrecognizedCommand;
use regex::Regex;

pub const COMMAND_ENV: &str = "SSH_ORIGINAL_COMMAND";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VirshCommand {
    /// Connectivity check: `true` does nothing.
    True,
    Start(String),
    Stop(String),
    Reboot(String),
    GetNodeMacs(String),
    ListRunning,
    ListAll,
    GetBootDevice(String),
    SetBootDevice { node: String, device: BootDevice },
}

#[derive(Debug, Clone, Copy)]
enum Shape {
    True,
    Start,
    Stop,
    Reboot,
    GetNodeMacs,
    ListRunning,
    ListAll,
    GetBootDevice,
    SetBootDevice,
}

// Checked in order, first match wins. The list patterns overlap, as do the
// two dumpxml ones, so the order matters.
const PATTERNS: &[(Shape, &str)] = &[
    (Shape::True, r"^true$"),
    (Shape::Start, r" start ([^ ]+)"),
    (Shape::Stop, r" destroy ([^ ]+)"),
    (Shape::Reboot, r" reset ([^ ]+)"),
    (Shape::GetNodeMacs, r" dumpxml ([^ ]+) .*mac"),
    (Shape::ListRunning, r" list --all.*running"),
    (Shape::ListAll, r" list --all"),
    (Shape::GetBootDevice, r" dumpxml ([^ ]+) .*boot"),
    (Shape::SetBootDevice, r#"boot dev=\\"([^\\]+)\\".* edit ([^ ]+)"#),
];

fn patterns() -> &'static [(Shape, Regex)] {
    static COMPILED: OnceLock<Vec<(Shape, Regex)>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        PATTERNS
            .iter()
            .map(|(shape, re)| (*shape, Regex::new(re).expect("valid virsh pattern")))
            .collect()
    })
}

/// Recognize a virsh command line sent by the Ironic SSH power driver.
pub fn parse(command: &str) -> Result<VirshCommand> {
    for (shape, re) in patterns() {
        let Some(caps) = re.captures(command) else {
            continue;
        };
        let group = |i: usize| caps.get(i).map_or(String::new(), |m| m.as_str().to_string());
        let parsed = match shape {
            Shape::True => VirshCommand::True,
            Shape::Start => VirshCommand::Start(group(1)),
            Shape::Stop => VirshCommand::Stop(group(1)),
            Shape::Reboot => VirshCommand::Reboot(group(1)),
            Shape::GetNodeMacs => VirshCommand::GetNodeMacs(group(1)),
            Shape::ListRunning => VirshCommand::ListRunning,
            Shape::ListAll => VirshCommand::ListAll,
            Shape::GetBootDevice => VirshCommand::GetBootDevice(group(1)),
            Shape::SetBootDevice => VirshCommand::SetBootDevice {
                node: group(2),
                device: group(1).parse()?,
            },
        };
        return Ok(parsed);
    }
    Err(UnrecognizedCommand(command.to_string()).into())
}

/// The command line to handle, from the forced-command environment.
pub fn original_command(value: Option<String>) -> Result<String> {
    match value {
        Some(command) => Ok(command),
        None => bail!("This command needs to be run through ssh."),
    }
}

/// Names of running nodes as virsh prints them.
pub fn virsh_name(name: &str) -> String {
    format!("\"{}\"", name)
}

/// MAC addresses as the power driver compares them.
pub fn virsh_mac(mac: &str) -> String {
    mac.replace(':', "")
}

//! Ravello VM lifecycle states and the start/stop decisions taken on them.

use anyhow::{Result, bail};

/// Lifecycle state of a Ravello VM.
///
/// Power state as seen by Ironic: `Stopping` and `Stopped` are off,
/// everything else is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VmState {
    Stopped,
    Starting,
    Started,
    Stopping,
    Restarting,
    Updating,
}

impl VmState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "STOPPED",
            Self::Starting => "STARTING",
            Self::Started => "STARTED",
            Self::Stopping => "STOPPING",
            Self::Restarting => "RESTARTING",
            Self::Updating => "UPDATING",
        }
    }

    pub fn is_powered_on(&self) -> bool {
        !matches!(self, Self::Stopping | Self::Stopped)
    }

    /// States the platform is moving out of on its own.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Starting | Self::Stopping | Self::Restarting)
    }
}

impl std::fmt::Display for VmState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for VmState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "STOPPED" => Self::Stopped,
            "STARTING" => Self::Starting,
            "STARTED" => Self::Started,
            "STOPPING" => Self::Stopping,
            "RESTARTING" => Self::Restarting,
            "UPDATING" => Self::Updating,
            other => bail!("unknown VM state `{}`", other),
        })
    }
}

/// What a power operation should do given the state it just observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerAction {
    /// Already at, or converging to, the goal state.
    Nothing,
    /// The VM is moving the other way; come back later.
    Wait,
    /// Issue the remote call.
    Act,
}

pub fn start_action(state: VmState) -> PowerAction {
    match state {
        VmState::Started | VmState::Starting | VmState::Restarting | VmState::Updating => {
            PowerAction::Nothing
        }
        VmState::Stopping => PowerAction::Wait,
        VmState::Stopped => PowerAction::Act,
    }
}

pub fn stop_action(state: VmState) -> PowerAction {
    match state {
        VmState::Stopped | VmState::Stopping => PowerAction::Nothing,
        VmState::Starting | VmState::Restarting | VmState::Updating => PowerAction::Wait,
        VmState::Started => PowerAction::Act,
    }
}

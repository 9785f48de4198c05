//! Power and boot-device operations on a single node.
//!
//! Each operation runs under [`RetryPolicy::power`]. Every attempt after the
//! first reloads the application, since other actors (the web console,
//! another ravstack) may have changed the VM in between, and decides again
//! from the fresh state.

use anyhow::{Context, Result};
use ravstack_core::app::Scope;
use ravstack_core::boot::{self, BootDevice};
use ravstack_core::error::RetryRequested;
use ravstack_core::retry::{Attempt, RetryPolicy, retry_operation};
use ravstack_core::vm_state::{PowerAction, VmState, start_action, stop_action};
use tracing::{debug, info};

use crate::client;
use crate::session::Session;

fn wait(state: VmState) -> anyhow::Error {
    RetryRequested(format!("Node in state `{}`", state)).into()
}

fn refresh(session: &mut Session<'_>, attempt: &Attempt) -> Result<()> {
    if attempt.is_retry() {
        session.reload()?;
    }
    Ok(())
}

fn vm_id(session: &Session<'_>, name: &str) -> Result<u64> {
    session
        .application
        .vm(name, Scope::Deployment)?
        .id
        .with_context(|| format!("VM `{}` has no id", name))
}

pub fn start(session: &mut Session<'_>, name: &str) -> Result<()> {
    session.ensure_min_runtime()?;
    debug!(node = name, "Starting node");
    let clock = session.clock;
    retry_operation(
        &RetryPolicy::power(),
        &format!("start {}", name),
        clock,
        |attempt| {
            refresh(session, attempt)?;
            start_once(session, name)
        },
    )
}

fn start_once(session: &mut Session<'_>, name: &str) -> Result<()> {
    let vm = session.application.vm(name, Scope::Deployment)?;
    let state = vm.state()?;
    debug!(node = name, %state, "node state");
    match start_action(state) {
        PowerAction::Nothing => return Ok(()),
        PowerAction::Wait => return Err(wait(state)),
        PowerAction::Act => {}
    }

    if let Some(device) = boot::pending(vm) {
        debug!(node = name, %device, "Applying pending boot device");
        let design = session.application.vm_mut(name, Scope::Design)?;
        boot::set_current(design, device)?;
        boot::clear_pending(design);
        session.publish(true)?;
    }

    let app_id = session.application.id;
    client::vm_action(session.api, app_id, vm_id(session, name)?, "start")?;
    info!(node = name, "node started");
    Ok(())
}

pub fn stop(session: &mut Session<'_>, name: &str) -> Result<()> {
    debug!(node = name, "Stopping node");
    let clock = session.clock;
    retry_operation(
        &RetryPolicy::power(),
        &format!("stop {}", name),
        clock,
        |attempt| {
            refresh(session, attempt)?;
            stop_once(session, name)
        },
    )
}

fn stop_once(session: &mut Session<'_>, name: &str) -> Result<()> {
    let state = session.application.vm(name, Scope::Deployment)?.state()?;
    debug!(node = name, %state, "node state");
    match stop_action(state) {
        PowerAction::Nothing => return Ok(()),
        PowerAction::Wait => return Err(wait(state)),
        PowerAction::Act => {}
    }
    let app_id = session.application.id;
    client::vm_action(session.api, app_id, vm_id(session, name)?, "poweroff")?;
    info!(node = name, "node stopped");
    Ok(())
}

/// Stop, then start from freshly loaded state.
pub fn reboot(session: &mut Session<'_>, name: &str) -> Result<()> {
    stop(session, name)?;
    session.reload()?;
    start(session, name)
}

/// The boot device the node will use on its next start.
pub fn boot_device(session: &Session<'_>, name: &str) -> Result<BootDevice> {
    boot::effective(session.application.vm(name, Scope::Deployment)?)
}

/// Change the boot device. A change for a running VM is queued and
/// applied by the next [`start`].
pub fn set_boot_device(session: &mut Session<'_>, name: &str, device: BootDevice) -> Result<()> {
    debug!(node = name, %device, "Setting boot device");
    let clock = session.clock;
    retry_operation(
        &RetryPolicy::power(),
        &format!("set boot device {}", name),
        clock,
        |attempt| {
            refresh(session, attempt)?;
            set_boot_device_once(session, name, device)
        },
    )
}

fn set_boot_device_once(session: &mut Session<'_>, name: &str, device: BootDevice) -> Result<()> {
    let vm = session.application.vm(name, Scope::Deployment)?;
    let state = vm.state()?;
    if state.is_transient() {
        return Err(wait(state));
    }
    if boot::effective(vm)? == device {
        debug!(node = name, %device, "Boot device already set");
        return Ok(());
    }
    let current = boot::current(vm)?;

    let design = session.application.vm_mut(name, Scope::Design)?;
    if current == device {
        debug!(node = name, "Clearing next boot device");
        boot::clear_pending(design);
    } else if state == VmState::Stopped {
        debug!(node = name, %device, "Setting current boot device");
        boot::set_current(design, device)?;
        boot::clear_pending(design);
    } else {
        debug!(node = name, %device, "Setting next boot device");
        boot::set_pending(design, device);
    }
    session.publish(true)
}

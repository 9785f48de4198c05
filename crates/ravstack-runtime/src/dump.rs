//! Inventory file and `/etc/ethers` output.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result, bail};
use ravstack_core::app::Vm;
use ravstack_core::inventory::{self, Inventory};
use tracing::{debug, warn};

use crate::shell;

pub const ETHERS_FILE: &str = "/etc/ethers";

/// The private key the Ironic conductor uses to reach the proxy.
pub fn read_private_key(home: &Path, key_name: &str) -> Result<String> {
    let path = home.join(".ssh").join(key_name);
    if !path.is_file() {
        bail!("`~/.ssh/{}` does not exist.", key_name);
    }
    std::fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))
}

pub fn write_inventory(path: &Path, inventory: &Inventory) -> Result<()> {
    let text = inventory.render()?;
    std::fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))?;
    debug!(path = %path.display(), nodes = inventory.nodes.len(), "wrote nodes file");
    Ok(())
}

/// The inventory file at `path`, or `None` when there is none.
pub fn read_inventory(path: &Path) -> Result<Option<Inventory>> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(Inventory::parse(&text).with_context(|| {
            format!("Invalid nodes file {}", path.display())
        })?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}

/// Install `/etc/ethers` for the managed nodes and restart dnsmasq so the
/// access network hands out the addresses ravstack assigned. Returns the
/// number of entries written, or `None` when sudo is not available.
pub fn write_ethers(nodes: &[Vm]) -> Result<Option<usize>> {
    if !shell::can_run_sudo() {
        warn!("no sudo access, not writing {}", ETHERS_FILE);
        return Ok(None);
    }
    let entries = inventory::ethers(nodes);

    let mut tmp = tempfile::Builder::new()
        .prefix("ravstack-ethers-")
        .tempfile()
        .context("Failed to create temp file")?;
    tmp.write_all(inventory::render_ethers(&entries).as_bytes())
        .context("Failed to write ethers entries")?;
    let tmp = tmp.into_temp_path();
    let tmp_name = tmp.to_string_lossy().into_owned();

    if let Err(err) = install_ethers(&tmp_name) {
        // Root owns the file by now, so the temp path cannot remove it.
        if let Err(cleanup) = shell::run_sudo(&["rm", "-f", &tmp_name]) {
            warn!(error = %cleanup, "failed to remove {}", tmp_name);
        }
        return Err(err);
    }
    shell::run_sudo(&["systemctl", "restart", "dnsmasq"])?;
    debug!(entries = entries.len(), "installed {}", ETHERS_FILE);
    Ok(Some(entries.len()))
}

fn install_ethers(tmp_name: &str) -> Result<()> {
    shell::run_sudo(&["chown", "0:0", tmp_name])?;
    shell::run_sudo(&["chmod", "644", tmp_name])?;
    if shell::selinux_enabled() {
        shell::run_sudo(&["chcon", "--reference", "/etc/hosts", tmp_name])?;
    }
    shell::run_sudo(&["mv", tmp_name, ETHERS_FILE])
}

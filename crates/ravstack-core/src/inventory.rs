//! Node list derivation and the Ironic inventory file.
//!
//! Nodes are the VMs of an application that have a static address on their
//! first network connection, ordered by that address. By convention the
//! first node is the controller (the undercloud) and the rest are managed
//! by Ironic.

use std::sync::OnceLock;

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::app::{Application, NetworkConnection, Scope, Vm};

/// Deployment-scope VMs that qualify as nodes, sorted by the numeric value
/// of their first connection's IP.
pub fn derive_nodes(app: &Application) -> Vec<Vm> {
    let mut nodes: Vec<(u32, Vm)> = app
        .vms(Scope::Deployment)
        .iter()
        .filter_map(|vm| {
            let mut vm = vm.clone();
            vm.network_connections.sort_by_key(NetworkConnection::sort_key);
            let (ip, _) = vm.network_connections.first()?.static_config()?.addrs().ok()?;
            Some((u32::from(ip), vm))
        })
        .collect();
    nodes.sort_by_key(|(ip, _)| *ip);
    nodes.into_iter().map(|(_, vm)| vm).collect()
}

/// Managed nodes (everything after the controller).
pub fn managed(nodes: &[Vm]) -> &[Vm] {
    nodes.get(1..).unwrap_or(&[])
}

/// Managed nodes Ironic should see as powered on. A state ravstack does not
/// know counts as on.
pub fn running(nodes: &[Vm]) -> impl Iterator<Item = &Vm> {
    managed(nodes)
        .iter()
        .filter(|vm| vm.state().map(|s| s.is_powered_on()).unwrap_or(true))
}

/// `node<N>` with N one above the highest `node<digits>` name in use.
pub fn next_node_name<'a>(names: impl IntoIterator<Item = &'a str>) -> Result<String> {
    static SEQNO: OnceLock<Regex> = OnceLock::new();
    let re = SEQNO.get_or_init(|| Regex::new(r"^node([0-9]+)").expect("valid node name regex"));
    let max = names
        .into_iter()
        .filter_map(|name| re.captures(name))
        .filter_map(|caps| caps[1].parse::<u64>().ok())
        .max()
        .unwrap_or(0);
    let next = max
        .checked_add(1)
        .ok_or_else(|| anyhow!("No node number left after `node{}`", max))?;
    Ok(format!("node{}", next))
}

/// One entry of the inventory file read by `openstack baremetal import`.
/// Fields are declared in sorted order; the file is written that way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryEntry {
    pub arch: String,
    pub cpu: String,
    pub disk: String,
    #[serde(default)]
    pub mac: Vec<String>,
    pub memory: String,
    pub name: String,
    pub pm_addr: String,
    pub pm_password: String,
    pub pm_type: String,
    pub pm_user: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    pub nodes: Vec<InventoryEntry>,
}

impl InventoryEntry {
    pub fn from_vm(vm: &Vm, pm_user: &str, pm_password: &str) -> Result<Self> {
        let cpus = vm
            .num_cpus
            .with_context(|| format!("VM `{}` has no CPU count", vm.name))?;
        let memory = vm
            .memory_size
            .as_ref()
            .with_context(|| format!("VM `{}` has no memory size", vm.name))?
            .convert("MB")?;
        let disk = vm
            .hard_drives
            .first()
            .and_then(|d| d.size.as_ref())
            .with_context(|| format!("VM `{}` has no disk size", vm.name))?
            .convert("GB")?;
        Ok(Self {
            arch: "x86_64".to_string(),
            cpu: cpus.to_string(),
            disk: disk.to_string(),
            mac: vm.macs(),
            memory: memory.to_string(),
            name: vm.name.clone(),
            pm_addr: "localhost".to_string(),
            pm_password: pm_password.to_string(),
            pm_type: "pxe_ssh".to_string(),
            pm_user: pm_user.to_string(),
        })
    }
}

impl Inventory {
    /// Inventory for the managed nodes of `nodes`.
    pub fn build(nodes: &[Vm], pm_user: &str, pm_password: &str) -> Result<Self> {
        let nodes = managed(nodes)
            .iter()
            .map(|vm| InventoryEntry::from_vm(vm, pm_user, pm_password))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { nodes })
    }

    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("Failed to parse nodes file")
    }

    /// Sorted keys, two-space indent.
    pub fn render(&self) -> Result<String> {
        // Going through Value sorts map keys regardless of field order.
        let value = serde_json::to_value(self)?;
        Ok(serde_json::to_string_pretty(&value)?)
    }

    pub fn macs_of(&self, name: &str) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|n| n.name == name)
            .flat_map(|n| n.mac.iter().cloned())
            .collect()
    }
}

/// `(mac, ip)` pairs for `/etc/ethers`, so dnsmasq hands managed nodes the
/// addresses assigned to them.
pub fn ethers(nodes: &[Vm]) -> Vec<(String, String)> {
    managed(nodes)
        .iter()
        .flat_map(|vm| vm.network_connections.iter())
        .filter_map(|conn| Some((conn.mac()?.to_string(), conn.ip()?.to_string())))
        .collect()
}

pub fn render_ethers(entries: &[(String, String)]) -> String {
    entries
        .iter()
        .map(|(mac, ip)| format!("{} {}\n", mac, ip))
        .collect()
}

//! `node-create`: new managed nodes added to the application design.

use anyhow::{Result, anyhow, bail};
use ravstack_core::app::Scope;
use ravstack_core::inventory::next_node_name;
use ravstack_core::network::{NodeRequest, allocate_node};
use tracing::{debug, info};

use crate::client;
use crate::session::Session;

/// Size and number of nodes for `node-create`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateOptions {
    pub cpus: u32,
    pub memory_mb: u64,
    pub disk_gb: u64,
    pub count: u32,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            cpus: 2,
            memory_mb: 8192,
            disk_gb: 60,
            count: 1,
        }
    }
}

/// Add `count` nodes to the design and publish them without starting them.
/// Returns the new node names.
pub fn create_nodes(session: &mut Session<'_>, options: &CreateOptions) -> Result<Vec<String>> {
    if options.count == 0 {
        bail!("Illegal value for --count: {}", options.count);
    }
    let iso_name = session.config.require("ravello", "pxe_iso")?;
    let iso_image_id = client::find_disk_image(session.api, iso_name)?
        .ok_or_else(|| anyhow!("PXE ISO `{}` not found.", iso_name))?;
    debug!(iso = iso_name, id = iso_image_id, "using PXE ISO");

    let mut names: Vec<String> = [Scope::Design, Scope::Deployment]
        .into_iter()
        .flat_map(|scope| session.application.vms(scope))
        .map(|vm| vm.name.clone())
        .collect();
    let mut nodes = session.nodes();
    let mut created = Vec::new();

    for _ in 0..options.count {
        let name = next_node_name(names.iter().map(String::as_str))?;
        let request = NodeRequest {
            name: name.clone(),
            cpus: options.cpus,
            memory_mb: options.memory_mb,
            disk_gb: options.disk_gb,
            iso_image_id,
        };
        let vm = allocate_node(&nodes, &session.application, &request)?;
        debug!(node = %name, ips = ?vm.network_connections.iter().filter_map(|c| c.ip()).collect::<Vec<_>>(), "allocated node");
        session.application.vms_mut(Scope::Design).push(vm.clone());
        nodes.push(vm);
        names.push(name.clone());
        created.push(name);
    }

    session.ensure_min_runtime()?;
    session.publish(false)?;
    info!(count = created.len(), nodes = %created.join(", "), "created nodes");
    Ok(created)
}

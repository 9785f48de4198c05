//! Static IP allocation and node descriptors for `node-create`.
//!
//! A new node is connected to every subnet the controller node is on, using
//! an address above every other address in use on that subnet anywhere in
//! the application (design and deployment). There is no lock: two
//! concurrent creators may pick the same address, and the platform's
//! version check makes one of them fail.

use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use anyhow::Result;
use serde_json::json;
use tracing::debug;

use crate::app::{
    Application, CpuId, Device, DriveType, HardDrive, IpConfig, NetworkConnection, Scope, Size,
    StaticIpConfig, SuppliedService, Vm,
};
use crate::error::AllocationError;

/// CPUID leaves that expose AMD SVM to the guest so it can run nested VMs.
pub const SVM_CPU_IDS: [(&str, &str); 5] = [
    ("0", "0000000768747541444d416369746e65"),
    ("1", "000006fb00000800c0802000078bfbfd"),
    ("8000000a", "00000001000000400000000000000089"),
    ("80000000", "8000000a000000000000000000000000"),
    ("80000001", "00000000000000000000001520100800"),
];

pub fn svm_cpu_ids() -> Vec<CpuId> {
    SVM_CPU_IDS
        .iter()
        .map(|(index, value)| CpuId {
            index: index.to_string(),
            value: value.to_string(),
        })
        .collect()
}

/// Resources for a node to be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRequest {
    pub name: String,
    pub cpus: u32,
    pub memory_mb: u64,
    pub disk_gb: u64,
    /// Disk image id of the PXE boot ISO.
    pub iso_image_id: u64,
}

/// All static IPs in the application on `subnet`/`mask`, from both scopes.
pub fn find_all_ips(app: &Application, subnet: Ipv4Addr, mask: Ipv4Addr) -> BTreeSet<Ipv4Addr> {
    let subnet = u32::from(subnet);
    let mut found = BTreeSet::new();
    for scope in [Scope::Deployment, Scope::Design] {
        for vm in app.vms(scope) {
            for conn in &vm.network_connections {
                let Some(cfg) = conn.static_config() else {
                    continue;
                };
                let (ip, vm_mask) = match cfg.addrs() {
                    Ok(addrs) => addrs,
                    Err(e) => {
                        debug!(vm = %vm.name, error = %e, "skipping unparsable address");
                        continue;
                    }
                };
                if vm_mask == mask && u32::from(ip) & u32::from(mask) == subnet {
                    found.insert(ip);
                }
            }
        }
    }
    found
}

/// Offset from the highest used address. A gap is left after the
/// controller for addresses assigned by hand.
pub fn ip_delta(existing_nodes: usize) -> u32 {
    if existing_nodes > 1 { 1 } else { 10 }
}

/// Next free address on the subnet of `template`.
pub fn next_ip(app: &Application, template: &NetworkConnection, delta: u32) -> Result<Ipv4Addr> {
    let cfg = template
        .static_config()
        .ok_or_else(|| AllocationError::NotStatic(template.label()))?;
    let (ip, mask) = cfg.addrs()?;
    let mask_bits = u32::from(mask);
    let subnet = u32::from(ip) & mask_bits;

    let used = find_all_ips(app, Ipv4Addr::from(subnet), mask);
    // The template's own address is always in use, even if the document
    // passed in does not contain the template VM.
    let max_ip = used.last().copied().unwrap_or(ip).max(ip);

    let exhausted = || AllocationError::Exhausted(template.label());
    let new_ip = u32::from(max_ip).checked_add(delta).ok_or_else(exhausted)?;
    if new_ip & mask_bits != subnet || new_ip | mask_bits == u32::MAX {
        return Err(exhausted().into());
    }
    Ok(Ipv4Addr::from(new_ip))
}

/// Build the descriptor for a new node, modelled on `nodes[0]` (the
/// controller). `nodes` is the current node list; its length selects the
/// address gap (see [`ip_delta`]).
pub fn allocate_node(nodes: &[Vm], app: &Application, request: &NodeRequest) -> Result<Vm> {
    let controller = nodes.first().ok_or(AllocationError::NoConnections)?;
    if controller.network_connections.is_empty() {
        return Err(AllocationError::NoConnections.into());
    }
    let delta = ip_delta(nodes.len());

    let mut connections = Vec::with_capacity(controller.network_connections.len());
    for conn in &controller.network_connections {
        let new_ip = next_ip(app, conn, delta)?;
        connections.push(clone_connection(conn, new_ip));
    }

    // ssh goes on the connection matching the controller's ssh service,
    // else on the first one.
    let ssh_index = controller
        .service("22")
        .and_then(|svc| svc.ip.as_deref())
        .and_then(|ip| {
            controller
                .network_connections
                .iter()
                .position(|c| c.ip() == Some(ip))
        })
        .unwrap_or(0);
    let mgmt_ip = connections[ssh_index]
        .static_config()
        .and_then(|c| c.ip.clone());

    let mut extra = serde_json::Map::new();
    extra.insert("os".to_string(), json!("linux_manuel"));
    extra.insert("baseVmId".to_string(), json!(0));
    extra.insert("stopTimeOut".to_string(), json!(180));

    Ok(Vm {
        id: None,
        name: request.name.clone(),
        description: Some("Node created by ravstack.".to_string()),
        state: None,
        num_cpus: Some(request.cpus),
        memory_size: Some(Size::new(request.memory_mb, "MB")),
        hard_drives: vec![
            HardDrive {
                index: Some(1),
                drive_type: DriveType::Disk,
                name: Some("sda".to_string()),
                boot: Some(true),
                controller: Some("virtio".to_string()),
                size: Some(Size::new(request.disk_gb, "GB")),
                base_disk_image_id: None,
                extra: Default::default(),
            },
            HardDrive {
                index: Some(2),
                drive_type: DriveType::Cdrom,
                name: Some("cdrom".to_string()),
                boot: None,
                controller: Some("IDE".to_string()),
                size: None,
                base_disk_image_id: Some(request.iso_image_id),
                extra: Default::default(),
            },
        ],
        network_connections: connections,
        supplied_services: vec![SuppliedService {
            name: "ssh".to_string(),
            port_range: "22".to_string(),
            protocol: Some("TCP".to_string()),
            external: Some(true),
            ip: mgmt_ip,
            extra: Default::default(),
        }],
        cpu_ids: svm_cpu_ids(),
        extra,
    })
}

fn clone_connection(template: &NetworkConnection, ip: Ipv4Addr) -> NetworkConnection {
    let ip_config = template.ip_config.as_ref();
    let mut static_cfg = template
        .static_config()
        .cloned()
        .unwrap_or_else(StaticIpConfig::default);
    static_cfg.ip = Some(ip.to_string());
    NetworkConnection {
        name: template.name.clone(),
        device: Device {
            index: template.device.index,
            device_type: template.device.device_type.clone(),
            mac: None,
            generated_mac: None,
            use_automatic_mac: Some(true),
            extra: Default::default(),
        },
        ip_config: Some(IpConfig {
            static_ip_config: Some(static_cfg),
            auto_ip_config: None,
            has_public_ip: ip_config.and_then(|c| c.has_public_ip),
            external_access_state: ip_config.and_then(|c| c.external_access_state.clone()),
            extra: Default::default(),
        }),
        extra: Default::default(),
    }
}

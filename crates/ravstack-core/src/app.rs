//! Typed view of a Ravello application document.
//!
//! Only the fields ravstack reads or writes are modelled. Every struct keeps
//! the rest of the document in a flattened `extra` map so that a document
//! can be fetched, edited and `PUT` back without dropping anything the
//! platform sent.

use std::net::Ipv4Addr;

use anyhow::{Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::vm_state::VmState;

/// Which of the two parallel VM collections of an application to look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// The editable blueprint.
    Design,
    /// The live, running instantiation.
    Deployment,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    /// Server-side document version used for optimistic concurrency.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub design: Option<VmSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<VmSet>,
    /// Epoch milliseconds at which the platform will stop the application.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_stop_time: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmSet {
    #[serde(default)]
    pub vms: Vec<Vm>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Application {
    pub fn vms(&self, scope: Scope) -> &[Vm] {
        let set = match scope {
            Scope::Design => &self.design,
            Scope::Deployment => &self.deployment,
        };
        set.as_ref().map(|s| s.vms.as_slice()).unwrap_or(&[])
    }

    pub fn vms_mut(&mut self, scope: Scope) -> &mut Vec<Vm> {
        let set = match scope {
            Scope::Design => &mut self.design,
            Scope::Deployment => &mut self.deployment,
        };
        &mut set.get_or_insert_with(VmSet::default).vms
    }

    /// Look up a VM by name.
    pub fn vm(&self, name: &str, scope: Scope) -> Result<&Vm> {
        self.vms(scope)
            .iter()
            .find(|vm| vm.name == name)
            .ok_or_else(|| anyhow!("Application `{}` unknown vm `{}`.", self.name, name))
    }

    pub fn vm_mut(&mut self, name: &str, scope: Scope) -> Result<&mut Vm> {
        let app_name = self.name.clone();
        self.vms_mut(scope)
            .iter_mut()
            .find(|vm| vm.name == name)
            .ok_or_else(|| anyhow!("Application `{}` unknown vm `{}`.", app_name, name))
    }

    /// Sort every VM's connections by device index. The first connection is
    /// assumed to be the access network everywhere else in ravstack.
    pub fn sort_connections(&mut self) {
        for scope in [Scope::Design, Scope::Deployment] {
            for vm in self.vms_mut(scope) {
                vm.network_connections.sort_by_key(NetworkConnection::sort_key);
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vm {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Raw lifecycle state as sent by the platform; see [`Vm::state`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_cpus: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_size: Option<Size>,
    #[serde(default)]
    pub hard_drives: Vec<HardDrive>,
    #[serde(default)]
    pub network_connections: Vec<NetworkConnection>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supplied_services: Vec<SuppliedService>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cpu_ids: Vec<CpuId>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Vm {
    pub fn state(&self) -> Result<VmState> {
        match &self.state {
            Some(s) => s.parse(),
            None => bail!("VM `{}` has no state", self.name),
        }
    }

    /// The first `DISK` type drive. Its boot flag is the current boot device.
    pub fn disk(&self) -> Result<&HardDrive> {
        self.hard_drives
            .iter()
            .find(|d| d.drive_type == DriveType::Disk)
            .ok_or_else(|| anyhow!("VM {} does not have a DISK", self.name))
    }

    pub fn disk_mut(&mut self) -> Result<&mut HardDrive> {
        let name = self.name.clone();
        self.hard_drives
            .iter_mut()
            .find(|d| d.drive_type == DriveType::Disk)
            .ok_or_else(|| anyhow!("VM {} does not have a DISK", name))
    }

    /// The supplied service declared for `port`, if any.
    pub fn service(&self, port: &str) -> Option<&SuppliedService> {
        self.supplied_services.iter().find(|s| s.port_range == port)
    }

    pub fn macs(&self) -> Vec<String> {
        self.network_connections
            .iter()
            .filter_map(|c| c.mac().map(str::to_string))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub value: u64,
    pub unit: String,
}

impl Size {
    pub fn new(value: u64, unit: &str) -> Self {
        Self {
            value,
            unit: unit.to_string(),
        }
    }

    /// Convert to another unit, truncating like integer division.
    pub fn convert(&self, unit: &str) -> Result<u64> {
        let from = unit_factor(&self.unit)?;
        let to = unit_factor(unit)?;
        Ok(self.value * from / to)
    }
}

fn unit_factor(unit: &str) -> Result<u64> {
    Ok(match unit {
        "BYTE" => 1,
        "KB" => 1 << 10,
        "MB" => 1 << 20,
        "GB" => 1 << 30,
        "TB" => 1 << 40,
        other => bail!("unknown size unit `{}`", other),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DriveType {
    Disk,
    Cdrom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HardDrive {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    #[serde(rename = "type")]
    pub drive_type: DriveType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boot: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<Size>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_disk_image_id: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConnection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Device::is_unset")]
    pub device: Device,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_config: Option<IpConfig>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl NetworkConnection {
    /// Name used in operator messages; falls back to the device index.
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => match self.device.index {
                Some(index) => format!("#{}", index),
                None => "#?".to_string(),
            },
        }
    }

    /// Device index for ordering; connections without one sort last.
    pub fn sort_key(&self) -> u32 {
        self.device.index.unwrap_or(u32::MAX)
    }

    /// Static configuration, only when both `ip` and `mask` are present.
    pub fn static_config(&self) -> Option<&StaticIpConfig> {
        self.ip_config
            .as_ref()
            .and_then(|c| c.static_ip_config.as_ref())
            .filter(|s| s.ip.is_some() && s.mask.is_some())
    }

    /// The primary IP: static if configured, else the allocated (or
    /// reserved) automatic address.
    pub fn ip(&self) -> Option<&str> {
        let cfg = self.ip_config.as_ref()?;
        if let Some(st) = &cfg.static_ip_config {
            return st.ip.as_deref();
        }
        let auto = cfg.auto_ip_config.as_ref()?;
        auto.allocated_ip
            .as_deref()
            .or(auto.reserved_ip.as_deref())
    }

    pub fn mac(&self) -> Option<&str> {
        self.device
            .mac
            .as_deref()
            .or(self.device.generated_mac.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_mac: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_automatic_mac: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Device {
    fn is_unset(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_ip_config: Option<StaticIpConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_ip_config: Option<AutoIpConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_public_ip: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_access_state: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticIpConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StaticIpConfig {
    /// `(ip, mask)` parsed as IPv4 addresses.
    pub fn addrs(&self) -> Result<(Ipv4Addr, Ipv4Addr)> {
        let ip = self.ip.as_deref().ok_or_else(|| anyhow!("static config has no ip"))?;
        let mask = self
            .mask
            .as_deref()
            .ok_or_else(|| anyhow!("static config has no mask"))?;
        Ok((parse_ip(ip)?, parse_ip(mask)?))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoIpConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reserved_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocated_ip: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuppliedService {
    #[serde(default)]
    pub name: String,
    pub port_range: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuId {
    pub index: String,
    pub value: String,
}

pub fn parse_ip(s: &str) -> Result<Ipv4Addr> {
    s.parse()
        .map_err(|_| anyhow!("invalid IPv4 address `{}`", s))
}

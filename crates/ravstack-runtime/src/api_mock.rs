//! In-memory stand-in for the Ravello API, used by tests.
//!
//! Keeps one application document and implements the handful of endpoints
//! ravstack calls, including the version check on `PUT` and the VM state
//! changes caused by `start` and `poweroff`. Every call is recorded.

use std::cell::RefCell;

use anyhow::Result;
use ravstack_core::app::{Application, Scope};
use ravstack_core::error::ApiError;
use reqwest::Method;
use serde_json::{Value, json};

type GetHook = Box<dyn FnMut(&mut Application, usize)>;

pub struct MockRavello {
    inner: RefCell<Inner>,
}

struct Inner {
    app: Application,
    images: Vec<Value>,
    calls: Vec<String>,
    failures: Vec<(String, u16)>,
    settle_on_get: bool,
    on_get: Option<GetHook>,
    gets: usize,
}

fn vm_json(id: u64, name: &str, ip: &str, state: &str) -> Value {
    json!({
        "id": id,
        "name": name,
        "description": format!("{} node", name),
        "state": state,
        "numCpus": 2,
        "memorySize": {"value": 8, "unit": "GB"},
        "hardDrives": [
            {"index": 1, "type": "DISK", "name": "sda", "boot": true,
             "controller": "virtio", "size": {"value": 60, "unit": "GB"}}
        ],
        "networkConnections": [
            {"name": "eth0",
             "device": {"index": 0, "deviceType": "virtio", "mac": format!("2c:c2:60:00:00:{:02x}", id)},
             "ipConfig": {"staticIpConfig": {"ip": ip, "mask": "255.255.255.0"}}}
        ],
        "suppliedServices": [
            {"name": "ssh", "portRange": "22", "protocol": "TCP", "external": true, "ip": ip}
        ]
    })
}

/// `tripleo` (id 1): controller 10.0.0.1 started, node1 10.0.0.11 stopped,
/// node2 10.0.0.12 started.
pub fn sample_app() -> Application {
    let deployed = vec![
        vm_json(10, "controller", "10.0.0.1", "STARTED"),
        vm_json(11, "node1", "10.0.0.11", "STOPPED"),
        vm_json(12, "node2", "10.0.0.12", "STARTED"),
    ];
    let design: Vec<Value> = deployed
        .iter()
        .cloned()
        .map(|mut vm| {
            if let Some(obj) = vm.as_object_mut() {
                obj.remove("state");
            }
            vm
        })
        .collect();
    serde_json::from_value(json!({
        "id": 1,
        "name": "tripleo",
        "version": 1,
        "design": {"vms": design},
        "deployment": {"vms": deployed, "totalActiveVms": 2}
    }))
    .expect("sample application parses")
}

fn settled(state: &str) -> &str {
    match state {
        "STARTING" | "RESTARTING" | "UPDATING" => "STARTED",
        "STOPPING" => "STOPPED",
        other => other,
    }
}

fn not_found(line: &str) -> anyhow::Error {
    ApiError::new(404, format!("Client Error: 404 Not Found for `{}`.", line)).into()
}

fn conflict(line: &str) -> anyhow::Error {
    ApiError::new(409, format!("Client Error: 409 Conflict for `{}`.", line)).into()
}

impl MockRavello {
    pub fn new(app: Application) -> Self {
        Self {
            inner: RefCell::new(Inner {
                app,
                images: vec![json!({"id": 500, "name": "ipxe.iso"})],
                calls: Vec::new(),
                failures: Vec::new(),
                settle_on_get: false,
                on_get: None,
                gets: 0,
            }),
        }
    }

    pub fn sample() -> Self {
        Self::new(sample_app())
    }

    /// Transient VM states reach their end state on the next application
    /// `GET`, as if the platform finished the action in between.
    pub fn with_settle(self) -> Self {
        self.inner.borrow_mut().settle_on_get = true;
        self
    }

    /// Make the next call starting with `prefix` (`"PUT /applications/1"`)
    /// fail with `status`.
    pub fn fail_next(&self, prefix: &str, status: u16) {
        self.inner
            .borrow_mut()
            .failures
            .push((prefix.to_string(), status));
    }

    /// Run `hook` on every application `GET`, before the document is
    /// returned. The second argument counts the GETs so far, from 1.
    pub fn on_get(&self, hook: impl FnMut(&mut Application, usize) + 'static) {
        self.inner.borrow_mut().on_get = Some(Box::new(hook));
    }

    pub fn set_state(&self, vm: &str, state: &str) {
        set_state(&mut self.inner.borrow_mut().app, vm, state);
    }

    /// Simulate another writer updating the application.
    pub fn bump_version(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.app.version = Some(inner.app.version.unwrap_or(0) + 1);
    }

    pub fn app(&self) -> Application {
        self.inner.borrow().app.clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.inner.borrow().calls.clone()
    }

    /// Every recorded call except GETs.
    pub fn mutating_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| !c.starts_with("GET "))
            .collect()
    }
}

pub fn set_state(app: &mut Application, vm: &str, state: &str) {
    if let Some(vm) = app
        .vms_mut(Scope::Deployment)
        .iter_mut()
        .find(|v| v.name == vm)
    {
        vm.state = Some(state.to_string());
    }
}

impl Inner {
    fn check_id(&self, id: &str, line: &str) -> Result<()> {
        if id.parse::<u64>().ok() == Some(self.app.id) {
            Ok(())
        } else {
            Err(not_found(line))
        }
    }

    fn document(&self) -> Result<Option<Value>> {
        Ok(Some(serde_json::to_value(&self.app)?))
    }

    fn get(&mut self) -> Result<Option<Value>> {
        self.gets += 1;
        if let Some(mut hook) = self.on_get.take() {
            hook(&mut self.app, self.gets);
            self.on_get = Some(hook);
        }
        if self.settle_on_get {
            for vm in self.app.vms_mut(Scope::Deployment) {
                if let Some(state) = vm.state.as_deref() {
                    vm.state = Some(settled(state).to_string());
                }
            }
        }
        self.document()
    }

    fn put(&mut self, body: Option<&Value>, line: &str) -> Result<Option<Value>> {
        let body = body.cloned().unwrap_or(Value::Null);
        let mut update: Application = serde_json::from_value(body)?;
        if update.version != self.app.version {
            return Err(conflict(line));
        }
        let mut next_id = self
            .app
            .vms(Scope::Design)
            .iter()
            .chain(self.app.vms(Scope::Deployment))
            .filter_map(|vm| vm.id)
            .max()
            .unwrap_or(0);
        for vm in update.vms_mut(Scope::Design) {
            if vm.id.is_none() {
                next_id += 1;
                vm.id = Some(next_id);
            }
        }
        self.app.design = update.design;
        self.app.version = Some(self.app.version.unwrap_or(0) + 1);
        self.document()
    }

    fn publish(&mut self, start_draft_vms: bool) -> Result<Option<Value>> {
        let design = self.app.vms(Scope::Design).to_vec();
        let deployed = self.app.vms_mut(Scope::Deployment);
        for vm in design {
            match deployed.iter_mut().find(|d| d.name == vm.name) {
                Some(live) => {
                    live.description = vm.description.clone();
                    live.hard_drives = vm.hard_drives.clone();
                }
                None => {
                    let state = if start_draft_vms { "STARTING" } else { "STOPPED" };
                    let mut live = vm.clone();
                    live.state = Some(state.to_string());
                    deployed.push(live);
                }
            }
        }
        Ok(None)
    }

    fn vm_action(&mut self, vm_id: &str, action: &str, line: &str) -> Result<Option<Value>> {
        let vm = self
            .app
            .vms_mut(Scope::Deployment)
            .iter_mut()
            .find(|vm| vm.id.map(|id| id.to_string()).as_deref() == Some(vm_id))
            .ok_or_else(|| not_found(line))?;
        let next = match (action, vm.state.as_deref()) {
            ("start", Some("STOPPED")) => "STARTING",
            ("poweroff", Some("STARTED")) => "STOPPING",
            ("start" | "poweroff", _) => return Err(conflict(line)),
            _ => return Err(not_found(line)),
        };
        vm.state = Some(next.to_string());
        Ok(None)
    }
}

impl crate::client::RavelloApi for MockRavello {
    fn call(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Option<Value>> {
        let mut inner = self.inner.borrow_mut();
        let line = format!("{} {}", method, path);
        inner.calls.push(line.clone());
        if let Some(pos) = inner
            .failures
            .iter()
            .position(|(prefix, _)| line.starts_with(prefix.as_str()))
        {
            let (_, status) = inner.failures.remove(pos);
            return Err(ApiError::new(status, format!("Mock Error: {} for `{}`.", status, line)).into());
        }

        let (route, query) = path.split_once('?').unwrap_or((path, ""));
        let parts: Vec<&str> = route.trim_start_matches('/').split('/').collect();
        match (method.as_str(), parts.as_slice()) {
            ("POST", ["applications", "filter"]) => {
                let wanted = body
                    .and_then(|b| b.pointer("/criteria/0/operand"))
                    .and_then(Value::as_str);
                let found = if wanted == Some(inner.app.name.as_str()) {
                    json!([{"id": inner.app.id, "name": inner.app.name}])
                } else {
                    json!([])
                };
                Ok(Some(found))
            }
            ("GET", ["applications", id]) => {
                inner.check_id(id, &line)?;
                inner.get()
            }
            ("PUT", ["applications", id]) => {
                inner.check_id(id, &line)?;
                inner.put(body, &line)
            }
            ("POST", ["applications", id, "publishUpdates"]) => {
                inner.check_id(id, &line)?;
                inner.publish(query != "startAllDraftVms=false")
            }
            ("POST", ["applications", id, "setExpiration"]) => {
                inner.check_id(id, &line)?;
                Ok(None)
            }
            ("POST", ["applications", id, "vms", vm_id, action]) => {
                inner.check_id(id, &line)?;
                inner.vm_action(vm_id, action, &line)
            }
            ("GET", ["diskImages"]) => Ok(Some(Value::Array(inner.images.clone()))),
            _ => Err(not_found(&line)),
        }
    }
}

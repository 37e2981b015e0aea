//! In-memory control plane.
//!
//! Behaves like the real plane where the reconciliation core cares: it
//! omits attributes at their default value, reports booleans as `0`/`1`,
//! keeps disk sizes out of reach of configuration pushes, refuses to shrink
//! disks, answers "already in state" for redundant power changes and hands
//! out task handles that stay pending for a configurable number of polls.
//! Every call is recorded so tests can assert on the exact sequence.

use crate::backend::ControlPlane;
use crate::error::{Error, Result};
use crate::types::{
    DiskSize, TASK_OK, TaskId, TaskState, VmConfig, VmKind, VmRef, VmStatus,
};
use devices::{Attributes, DeviceCollection, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Kind of call, used to inject failures and count calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    FindByName,
    FindNode,
    Locate,
    UsedIds,
    Create,
    Clone,
    UpdateConfig,
    ResizeDisk,
    Start,
    Stop,
    Delete,
    Status,
    Config,
    ForwardedPort,
    TaskStatus,
}

impl Op {
    /// Whether calls of this kind change remote state.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Op::Create
                | Op::Clone
                | Op::UpdateConfig
                | Op::ResizeDisk
                | Op::Start
                | Op::Stop
                | Op::Delete
        )
    }
}

/// A recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    FindByName(String),
    FindNode(String),
    Locate(u32),
    UsedIds,
    Create(u32),
    Clone { source: u32, target: u32 },
    UpdateConfig(u32),
    ResizeDisk { vmid: u32, disk: String, size: String },
    Start(u32),
    Stop(u32),
    Delete(u32),
    Status(u32),
    Config(u32),
    ForwardedPort(u32),
    TaskStatus(String),
}

impl Call {
    pub fn op(&self) -> Op {
        match self {
            Call::FindByName(_) => Op::FindByName,
            Call::FindNode(_) => Op::FindNode,
            Call::Locate(_) => Op::Locate,
            Call::UsedIds => Op::UsedIds,
            Call::Create(_) => Op::Create,
            Call::Clone { .. } => Op::Clone,
            Call::UpdateConfig(_) => Op::UpdateConfig,
            Call::ResizeDisk { .. } => Op::ResizeDisk,
            Call::Start(_) => Op::Start,
            Call::Stop(_) => Op::Stop,
            Call::Delete(_) => Op::Delete,
            Call::Status(_) => Op::Status,
            Call::Config(_) => Op::Config,
            Call::ForwardedPort(_) => Op::ForwardedPort,
            Call::TaskStatus(_) => Op::TaskStatus,
        }
    }
}

/// A guest held by the in-memory plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Guest {
    pub vm: VmRef,
    pub status: VmStatus,
    /// Configuration in wire form (defaults omitted, booleans as integers)
    pub config: VmConfig,
}

#[derive(Debug)]
struct Task {
    remaining_polls: u32,
    exit_status: String,
}

#[derive(Debug, Default)]
struct State {
    nodes: BTreeSet<String>,
    guests: BTreeMap<u32, Guest>,
    tasks: HashMap<String, Task>,
    next_task: u64,
    calls: Vec<Call>,
    failures: HashMap<Op, Error>,
    forwarded_ports: BTreeMap<u32, u16>,
}

impl State {
    /// Record a call and fail it if a failure was injected for its kind.
    fn record(&mut self, call: Call) -> Result<()> {
        let op = call.op();
        self.calls.push(call);
        match self.failures.get(&op) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn guest(&self, vm: &VmRef) -> Result<&Guest> {
        self.guests
            .get(&vm.vmid)
            .ok_or_else(|| Error::not_found(format!("{} {}", vm.kind, vm.vmid)))
    }

    fn guest_mut(&mut self, vm: &VmRef) -> Result<&mut Guest> {
        self.guests
            .get_mut(&vm.vmid)
            .ok_or_else(|| Error::not_found(format!("{} {}", vm.kind, vm.vmid)))
    }

    fn require_node(&self, node: &str) -> Result<()> {
        if self.nodes.contains(node) {
            Ok(())
        } else {
            Err(Error::not_found(format!("node '{node}'")))
        }
    }
}

/// In-memory implementation of [`ControlPlane`].
#[derive(Debug)]
pub struct MemoryPlane {
    state: Mutex<State>,
    task_polls: u32,
    task_handles: bool,
    task_exit_status: String,
}

impl Default for MemoryPlane {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPlane {
    /// Create an empty plane with no nodes.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            task_polls: 0,
            task_handles: true,
            task_exit_status: TASK_OK.to_string(),
        }
    }

    /// Add a node.
    pub fn with_node(mut self, node: &str) -> Self {
        self.state_mut().nodes.insert(node.to_string());
        self
    }

    /// Number of polls a task reports `Running` before it finishes.
    pub fn with_task_polls(mut self, polls: u32) -> Self {
        self.task_polls = polls;
        self
    }

    /// Return no task handles from mutations.
    pub fn without_task_handles(mut self) -> Self {
        self.task_handles = false;
        self
    }

    /// Exit status every task finishes with.
    pub fn with_task_exit_status(mut self, status: &str) -> Self {
        self.task_exit_status = status.to_string();
        self
    }

    /// Seed a guest. The configuration is stored in wire form.
    pub fn with_guest(mut self, vm: VmRef, status: VmStatus, config: VmConfig) -> Self {
        let state = self.state_mut();
        state.nodes.insert(vm.node.clone());
        state.guests.insert(
            vm.vmid,
            Guest {
                vm,
                status,
                config: to_wire(&config),
            },
        );
        self
    }

    fn state_mut(&mut self) -> &mut State {
        self.state.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of a guest.
    pub fn guest(&self, vmid: u32) -> Option<Guest> {
        self.lock().guests.get(&vmid).cloned()
    }

    /// Number of guests.
    pub fn guest_count(&self) -> usize {
        self.lock().guests.len()
    }

    /// Overwrite a guest's power state out of band.
    pub fn set_status(&self, vmid: u32, status: VmStatus) {
        if let Some(guest) = self.lock().guests.get_mut(&vmid) {
            guest.status = status;
        }
    }

    /// Overwrite a guest's wire configuration out of band.
    pub fn set_wire_config(&self, vmid: u32, config: VmConfig) {
        if let Some(guest) = self.lock().guests.get_mut(&vmid) {
            guest.config = config;
        }
    }

    /// Fix the forwarded SSH port of a guest.
    pub fn set_forwarded_port(&self, vmid: u32, port: u16) {
        self.lock().forwarded_ports.insert(vmid, port);
    }

    /// Fail every call of kind `op` with `error` until cleared.
    pub fn fail_on(&self, op: Op, error: Error) {
        self.lock().failures.insert(op, error);
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// All recorded calls, oldest first.
    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Number of recorded calls of kind `op`.
    pub fn count(&self, op: Op) -> usize {
        self.lock().calls.iter().filter(|c| c.op() == op).count()
    }

    /// Number of recorded calls that change remote state.
    pub fn mutation_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.op().is_mutation())
            .count()
    }

    fn spawn_task(&self, state: &mut State, node: &str, kind: &str) -> Option<TaskId> {
        if !self.task_handles {
            return None;
        }
        state.next_task += 1;
        let id = format!("UPID:{node}:{:08X}:{kind}", state.next_task);
        state.tasks.insert(
            id.clone(),
            Task {
                remaining_polls: self.task_polls,
                exit_status: self.task_exit_status.clone(),
            },
        );
        Some(TaskId(id))
    }
}

/// Convert a configuration to the form the plane reports back.
fn to_wire(config: &VmConfig) -> VmConfig {
    let mut wire = VmConfig::new(config.name.clone());
    wire.attributes = wire_attributes(&config.attributes);
    for (name, collection) in &config.devices {
        let mut converted = DeviceCollection::new();
        for (id, attrs) in collection.iter() {
            converted.insert(id, wire_attributes(attrs));
        }
        if !converted.is_empty() {
            wire.devices.insert(name.clone(), converted);
        }
    }
    wire
}

fn wire_attributes(attrs: &Attributes) -> Attributes {
    attrs
        .iter()
        .filter_map(|(key, value)| {
            let wire = match value {
                Value::Bool(true) => Value::Int(1),
                Value::Bool(false) => return None,
                Value::Str(s) if s.is_empty() => return None,
                other => other.clone(),
            };
            Some((key.clone(), wire))
        })
        .collect()
}

/// Map a disk name (`virtio0`, `rootfs`, `mp2`) to its collection and slot.
fn disk_location(disk: &str) -> Result<(&'static str, Option<String>, u32)> {
    let split = disk.find(|c: char| c.is_ascii_digit()).unwrap_or(disk.len());
    let (prefix, digits) = disk.split_at(split);
    let slot = if digits.is_empty() {
        0
    } else {
        digits
            .parse()
            .map_err(|_| Error::not_found(format!("disk '{disk}'")))?
    };

    Ok(match prefix {
        "rootfs" => ("rootfs", None, slot),
        "mp" => ("mp", None, slot),
        bus => ("disk", Some(bus.to_string()), slot),
    })
}

impl ControlPlane for MemoryPlane {
    fn find_by_name(&self, name: &str) -> Result<Option<VmRef>> {
        let mut state = self.lock();
        state.record(Call::FindByName(name.to_string()))?;
        Ok(state
            .guests
            .values()
            .find(|g| g.config.name == name)
            .map(|g| g.vm.clone()))
    }

    fn find_node(&self, node: &str) -> Result<String> {
        let mut state = self.lock();
        state.record(Call::FindNode(node.to_string()))?;
        state.require_node(node)?;
        Ok(node.to_string())
    }

    fn locate(&self, vmid: u32) -> Result<Option<VmRef>> {
        let mut state = self.lock();
        state.record(Call::Locate(vmid))?;
        Ok(state.guests.get(&vmid).map(|g| g.vm.clone()))
    }

    fn used_ids(&self) -> Result<BTreeSet<u32>> {
        let mut state = self.lock();
        state.record(Call::UsedIds)?;
        Ok(state.guests.keys().copied().collect())
    }

    fn create(&self, vm: &VmRef, config: &VmConfig) -> Result<Option<TaskId>> {
        let mut state = self.lock();
        state.record(Call::Create(vm.vmid))?;
        state.require_node(&vm.node)?;
        if state.guests.contains_key(&vm.vmid) {
            return Err(Error::Rejected {
                message: format!("VM {} already exists", vm.vmid),
            });
        }
        state.guests.insert(
            vm.vmid,
            Guest {
                vm: vm.clone(),
                status: VmStatus::Stopped,
                config: to_wire(config),
            },
        );
        let kind = match vm.kind {
            VmKind::Qemu => "qmcreate",
            VmKind::Lxc => "vzcreate",
        };
        Ok(self.spawn_task(&mut state, &vm.node, kind))
    }

    fn clone_guest(&self, source: &VmRef, target: &VmRef, name: &str) -> Result<Option<TaskId>> {
        let mut state = self.lock();
        state.record(Call::Clone {
            source: source.vmid,
            target: target.vmid,
        })?;
        state.require_node(&target.node)?;
        let original = state.guest(source)?.clone();
        if original.vm.kind != target.kind {
            return Err(Error::Rejected {
                message: format!(
                    "cannot clone {} {} into a {}",
                    original.vm.kind, source.vmid, target.kind
                ),
            });
        }
        if state.guests.contains_key(&target.vmid) {
            return Err(Error::Rejected {
                message: format!("VM {} already exists", target.vmid),
            });
        }
        let mut config = original.config;
        config.name = name.to_string();
        state.guests.insert(
            target.vmid,
            Guest {
                vm: target.clone(),
                status: VmStatus::Stopped,
                config,
            },
        );
        Ok(self.spawn_task(&mut state, &target.node, "qmclone"))
    }

    fn update_config(&self, vm: &VmRef, config: &VmConfig) -> Result<Option<TaskId>> {
        let mut state = self.lock();
        state.record(Call::UpdateConfig(vm.vmid))?;
        let guest = state.guest_mut(vm)?;

        let mut wire = to_wire(config);
        // Sizes change only through resize_disk
        for (name, collection) in &mut wire.devices {
            let Some(current) = guest.config.devices.get(name) else {
                continue;
            };
            let ids: Vec<u32> = collection.ids().collect();
            for id in ids {
                let old_size = current.get(id).and_then(|a| a.get("size")).cloned();
                if let (Some(size), Some(attrs)) = (old_size, collection.get_mut(id)) {
                    attrs.insert("size".to_string(), size);
                }
            }
        }
        guest.config = wire;

        let node = vm.node.clone();
        Ok(self.spawn_task(&mut state, &node, "qmconfig"))
    }

    fn resize_disk(&self, vm: &VmRef, disk: &str, size: &str) -> Result<Option<TaskId>> {
        let mut state = self.lock();
        state.record(Call::ResizeDisk {
            vmid: vm.vmid,
            disk: disk.to_string(),
            size: size.to_string(),
        })?;
        let (collection, bus, slot) = disk_location(disk)?;
        let guest = state.guest_mut(vm)?;

        let attrs = guest
            .config
            .devices
            .get_mut(collection)
            .and_then(|c| c.get_mut(slot))
            .filter(|attrs| match &bus {
                Some(bus) => attrs.get("type").and_then(Value::as_str) == Some(bus.as_str()),
                None => true,
            })
            .ok_or_else(|| Error::not_found(format!("disk '{disk}'")))?;

        let current: DiskSize = attrs
            .get("size")
            .and_then(Value::as_str)
            .unwrap_or("0")
            .parse()
            .map_err(Error::InvalidResponse)?;
        let wanted = match size.strip_prefix('+') {
            Some(delta) => {
                let delta: DiskSize = delta.parse().map_err(|e| Error::Rejected { message: e })?;
                DiskSize::from_bytes(current.bytes() + delta.bytes())
            }
            None => size.parse().map_err(|e| Error::Rejected { message: e })?,
        };
        if wanted < current {
            return Err(Error::Rejected {
                message: format!("shrinking disk '{disk}' is not supported"),
            });
        }
        attrs.insert("size".to_string(), Value::Str(wanted.to_string()));

        let node = vm.node.clone();
        Ok(self.spawn_task(&mut state, &node, "resize"))
    }

    fn start(&self, vm: &VmRef) -> Result<Option<TaskId>> {
        let mut state = self.lock();
        state.record(Call::Start(vm.vmid))?;
        let guest = state.guest_mut(vm)?;
        if guest.status == VmStatus::Running {
            return Err(Error::AlreadyInState {
                vmid: vm.vmid,
                message: "already running".to_string(),
            });
        }
        guest.status = VmStatus::Running;
        let node = vm.node.clone();
        Ok(self.spawn_task(&mut state, &node, "qmstart"))
    }

    fn stop(&self, vm: &VmRef) -> Result<Option<TaskId>> {
        let mut state = self.lock();
        state.record(Call::Stop(vm.vmid))?;
        let guest = state.guest_mut(vm)?;
        if guest.status == VmStatus::Stopped {
            return Err(Error::AlreadyInState {
                vmid: vm.vmid,
                message: "not running".to_string(),
            });
        }
        guest.status = VmStatus::Stopped;
        let node = vm.node.clone();
        Ok(self.spawn_task(&mut state, &node, "qmstop"))
    }

    fn delete(&self, vm: &VmRef) -> Result<Option<TaskId>> {
        let mut state = self.lock();
        state.record(Call::Delete(vm.vmid))?;
        if state.guest(vm)?.status == VmStatus::Running {
            return Err(Error::Rejected {
                message: format!("VM {} is running - stop it first", vm.vmid),
            });
        }
        state.guests.remove(&vm.vmid);
        state.forwarded_ports.remove(&vm.vmid);
        Ok(self.spawn_task(&mut state, &vm.node, "qmdestroy"))
    }

    fn status(&self, vm: &VmRef) -> Result<VmStatus> {
        let mut state = self.lock();
        state.record(Call::Status(vm.vmid))?;
        Ok(state.guest(vm)?.status)
    }

    fn config(&self, vm: &VmRef) -> Result<VmConfig> {
        let mut state = self.lock();
        state.record(Call::Config(vm.vmid))?;
        Ok(state.guest(vm)?.config.clone())
    }

    fn forwarded_port(&self, vm: &VmRef) -> Result<u16> {
        let mut state = self.lock();
        state.record(Call::ForwardedPort(vm.vmid))?;
        state.guest(vm)?;
        let default = 22000 + (vm.vmid % 10000) as u16;
        Ok(*state.forwarded_ports.get(&vm.vmid).unwrap_or(&default))
    }

    fn task_status(&self, task: &TaskId) -> Result<TaskState> {
        let mut state = self.lock();
        state.record(Call::TaskStatus(task.0.clone()))?;
        let entry = state
            .tasks
            .get_mut(&task.0)
            .ok_or_else(|| Error::not_found(format!("task {task}")))?;
        if entry.remaining_polls > 0 {
            entry.remaining_polls -= 1;
            return Ok(TaskState::Running);
        }
        Ok(TaskState::Stopped {
            exit_status: entry.exit_status.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devices::DeviceSlot;

    fn plane() -> MemoryPlane {
        MemoryPlane::new().with_node("pve1").with_node("pve2")
    }

    fn disk_config(size: &str) -> VmConfig {
        let mut config = VmConfig::new("web");
        config.set("onboot", true);
        config.set("protection", false);
        config.set("description", "");
        config.set_devices(
            "disk",
            vec![
                DeviceSlot::new(0, Attributes::new())
                    .with("type", "virtio")
                    .with("size", size)
                    .with("backup", false),
            ]
            .into_iter()
            .collect::<DeviceCollection>(),
        );
        config
    }

    #[test]
    fn test_create_stores_wire_form() {
        let plane = plane();
        let vm = VmRef::new(100, "pve1", VmKind::Qemu);
        plane.create(&vm, &disk_config("10G")).unwrap();

        let config = plane.config(&vm).unwrap();
        assert_eq!(config.get("onboot"), Some(&Value::Int(1)));
        assert!(config.get("protection").is_none());
        assert!(config.get("description").is_none());
        let disk = config.devices("disk");
        assert!(!disk.get(0).unwrap().contains_key("backup"));
    }

    #[test]
    fn test_create_duplicate_rejected() {
        let plane = plane();
        let vm = VmRef::new(100, "pve1", VmKind::Qemu);
        plane.create(&vm, &VmConfig::new("a")).unwrap();
        let err = plane.create(&vm, &VmConfig::new("b")).unwrap_err();
        assert!(matches!(err, Error::Rejected { .. }));
    }

    #[test]
    fn test_create_on_unknown_node() {
        let plane = plane();
        let vm = VmRef::new(100, "pve9", VmKind::Qemu);
        let err = plane.create(&vm, &VmConfig::new("a")).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn test_update_config_keeps_disk_size() {
        let plane = plane();
        let vm = VmRef::new(100, "pve1", VmKind::Qemu);
        plane.create(&vm, &disk_config("10G")).unwrap();
        plane.update_config(&vm, &disk_config("50G")).unwrap();

        let disk = plane.config(&vm).unwrap().devices("disk");
        assert_eq!(disk.get(0).unwrap()["size"], Value::from("10G"));
    }

    #[test]
    fn test_resize_grows_and_refuses_shrink() {
        let plane = plane();
        let vm = VmRef::new(100, "pve1", VmKind::Qemu);
        plane.create(&vm, &disk_config("10G")).unwrap();

        plane.resize_disk(&vm, "virtio0", "20G").unwrap();
        let disk = plane.config(&vm).unwrap().devices("disk");
        assert_eq!(disk.get(0).unwrap()["size"], Value::from("20G"));

        let err = plane.resize_disk(&vm, "virtio0", "5G").unwrap_err();
        assert!(matches!(err, Error::Rejected { .. }));

        plane.resize_disk(&vm, "virtio0", "+1G").unwrap();
        let disk = plane.config(&vm).unwrap().devices("disk");
        assert_eq!(disk.get(0).unwrap()["size"], Value::from("21G"));
    }

    #[test]
    fn test_resize_unknown_disk() {
        let plane = plane();
        let vm = VmRef::new(100, "pve1", VmKind::Qemu);
        plane.create(&vm, &disk_config("10G")).unwrap();
        assert!(matches!(
            plane.resize_disk(&vm, "scsi0", "20G"),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn test_power_changes_report_already_in_state() {
        let plane = plane();
        let vm = VmRef::new(100, "pve1", VmKind::Lxc);
        plane.create(&vm, &VmConfig::new("ct")).unwrap();

        let err = plane.stop(&vm).unwrap_err();
        assert!(err.is_ignorable());

        plane.start(&vm).unwrap();
        assert!(plane.start(&vm).unwrap_err().is_ignorable());
        assert!(matches!(plane.delete(&vm), Err(Error::Rejected { .. })));
    }

    #[test]
    fn test_clone_copies_config_and_renames() {
        let plane = plane();
        let template = VmRef::new(9000, "pve1", VmKind::Qemu);
        plane.create(&template, &disk_config("8G")).unwrap();

        let target = VmRef::new(101, "pve2", VmKind::Qemu);
        plane.clone_guest(&template, &target, "web-2").unwrap();

        let guest = plane.guest(101).unwrap();
        assert_eq!(guest.config.name, "web-2");
        assert_eq!(guest.vm.node, "pve2");
        assert_eq!(
            guest.config.devices("disk").get(0).unwrap()["size"],
            Value::from("8G")
        );
    }

    #[test]
    fn test_failure_injection_and_call_log() {
        let plane = plane();
        plane.fail_on(
            Op::UsedIds,
            Error::Network {
                message: "connection reset".to_string(),
            },
        );
        assert!(plane.used_ids().unwrap_err().is_retryable());
        plane.clear_failures();
        assert!(plane.used_ids().unwrap().is_empty());
        assert_eq!(plane.count(Op::UsedIds), 2);
        assert_eq!(plane.mutation_count(), 0);
    }

    #[test]
    fn test_tasks_pending_then_finished() {
        let plane = plane().with_task_polls(1);
        let vm = VmRef::new(100, "pve1", VmKind::Qemu);
        let task = plane.create(&vm, &VmConfig::new("a")).unwrap().unwrap();
        assert_eq!(plane.task_status(&task).unwrap(), TaskState::Running);
        assert!(plane.task_status(&task).unwrap().is_finished());
    }

    #[test]
    fn test_without_task_handles() {
        let plane = plane().without_task_handles();
        let vm = VmRef::new(100, "pve1", VmKind::Qemu);
        assert!(plane.create(&vm, &VmConfig::new("a")).unwrap().is_none());
    }
}

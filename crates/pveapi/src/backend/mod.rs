//! Backend abstraction for control-plane operations.
//!
//! The [`ControlPlane`] trait defines the calls the reconciliation core
//! consumes, allowing for different implementations (an HTTP API client,
//! the in-memory plane used in tests).

pub mod memory;

use crate::error::Result;
use crate::types::{TaskId, TaskState, VmConfig, VmRef, VmStatus};
use std::collections::BTreeSet;

/// Control-plane operations.
///
/// Mutating calls return the handle of the asynchronous task they started,
/// or `None` when the plane gives no handle (the change may still be in
/// flight). Implementations must be safe to share between threads; they
/// are not required to be safe under concurrent mutation of the same
/// cluster, which is why callers serialize mutating sequences.
pub trait ControlPlane: Send + Sync {
    /// Find a guest by name across all nodes.
    fn find_by_name(&self, name: &str) -> Result<Option<VmRef>>;

    /// Check that a node exists and return its canonical name.
    fn find_node(&self, node: &str) -> Result<String>;

    /// Resolve where a guest id currently lives and what kind it is.
    fn locate(&self, vmid: u32) -> Result<Option<VmRef>>;

    /// All guest ids currently assigned, across every node.
    fn used_ids(&self) -> Result<BTreeSet<u32>>;

    /// Create a guest from a template or installation image.
    fn create(&self, vm: &VmRef, config: &VmConfig) -> Result<Option<TaskId>>;

    /// Clone `source` into a new guest `target` named `name`.
    fn clone_guest(&self, source: &VmRef, target: &VmRef, name: &str) -> Result<Option<TaskId>>;

    /// Push configuration to an existing guest.
    fn update_config(&self, vm: &VmRef, config: &VmConfig) -> Result<Option<TaskId>>;

    /// Grow a disk (e.g. `virtio0`, `rootfs`, `mp1`) to `size`.
    fn resize_disk(&self, vm: &VmRef, disk: &str, size: &str) -> Result<Option<TaskId>>;

    fn start(&self, vm: &VmRef) -> Result<Option<TaskId>>;

    fn stop(&self, vm: &VmRef) -> Result<Option<TaskId>>;

    fn delete(&self, vm: &VmRef) -> Result<Option<TaskId>>;

    /// Current power state.
    fn status(&self, vm: &VmRef) -> Result<VmStatus>;

    /// Current configuration. Attributes at their default value are omitted.
    fn config(&self, vm: &VmRef) -> Result<VmConfig>;

    /// Host port forwarded to the guest's SSH port (user-mode networking).
    fn forwarded_port(&self, vm: &VmRef) -> Result<u16>;

    /// State of an asynchronous task.
    fn task_status(&self, task: &TaskId) -> Result<TaskState>;

    /// Check whether a guest id is assigned.
    fn exists(&self, vmid: u32) -> Result<bool> {
        Ok(self.locate(vmid)?.is_some())
    }
}

//! # pveapi
//!
//! Boundary between the reconciliation core and a Proxmox VE style
//! virtualization control plane.
//!
//! This crate provides:
//! - The [`ControlPlane`] trait: the calls the core consumes
//! - Wire-level types (guest references, configuration, task handles)
//! - Categorized errors, so "already stopped" can be told from a failure
//! - Bounded task polling with exponential backoff
//! - [`MemoryPlane`], an in-memory plane with failure injection
//!
//! ## Example
//!
//! ```
//! use pveapi::{ControlPlane, MemoryPlane, PollConfig, VmConfig, VmKind, VmRef, poll};
//!
//! let plane = MemoryPlane::new().with_node("pve").with_task_polls(1);
//! let vm = VmRef::new(100, "pve", VmKind::Qemu);
//!
//! let task = plane.create(&vm, &VmConfig::new("web")).unwrap();
//! if let Some(task) = task {
//!     poll::wait_for_task(&plane, &task, &PollConfig::immediate(), None).unwrap();
//! }
//! assert!(plane.exists(100).unwrap());
//! ```

#![warn(clippy::all)]

pub mod backend;
pub mod error;
pub mod poll;
pub mod types;

pub use backend::ControlPlane;
pub use backend::memory::{Call, MemoryPlane, Op};
pub use error::{Error, ErrorCategory, Result};
pub use types::{
    DiskSize, PollConfig, TASK_OK, TaskId, TaskState, VmConfig, VmKind, VmRef, VmStatus,
};

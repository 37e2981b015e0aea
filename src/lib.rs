//! # vmconverge
//!
//! Reconciliation core for virtual machines and containers on a Proxmox VE
//! style control plane. A declarative engine hands over a desired guest
//! model; this crate creates, reads, updates and deletes the guest so the
//! plane converges to it.
//!
//! This crate provides:
//! - [`ResourceId`]: the `node/kind/vmid` identity handed back to the engine
//! - [`Session`]: serialized access to the plane for mutating sequences
//! - [`allocate`]: the next free guest id in a configured range
//! - [`QemuSpec`] and [`LxcSpec`]: declared guest models
//! - [`Orchestrator`]: the create/read/update/delete sequences
//! - [`ProviderConfig`]: provider settings from TOML and the environment
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use pveapi::{MemoryPlane, PollConfig};
//! use vmconverge::{Orchestrator, ProviderConfig, QemuSpec, Session, SettleConfig};
//!
//! let plane = Arc::new(MemoryPlane::new().with_node("pve"));
//! let provider = ProviderConfig {
//!     settle: SettleConfig::from(&PollConfig::immediate()),
//!     ..ProviderConfig::default()
//! };
//! let orchestrator = Orchestrator::new(Arc::new(Session::new(plane)), provider);
//!
//! let spec = QemuSpec {
//!     iso: "local:iso/debian-12.iso".to_string(),
//!     ssh_forward_ip: "192.0.2.1".to_string(),
//!     ..QemuSpec::new("web", "pve")
//! };
//! let applied = orchestrator.create(&spec).unwrap();
//! assert_eq!(applied.id.to_string(), "pve/qemu/101");
//!
//! orchestrator.delete(&applied.id).unwrap();
//! assert!(orchestrator.read(&applied.id, &spec).unwrap().is_none());
//! ```

#![warn(clippy::all)]

pub mod allocator;
pub mod config;
pub mod connection;
pub mod error;
pub mod identity;
pub mod lifecycle;
pub mod preprovision;
pub mod resource;
pub mod session;
pub mod settle;

pub use allocator::{IdRange, allocate};
pub use config::{PreprovisionPolicy, ProviderConfig, SettleConfig};
pub use connection::ConnectionInfo;
pub use error::{Error, Failed, Result};
pub use identity::ResourceId;
pub use lifecycle::{Applied, Observed, Orchestrator};
pub use preprovision::{LogPreprovision, NoPreprovision, Preprovisioner};
pub use resource::{ConnectionTarget, CreateStrategy, GuestSpec, LxcSpec, PowerState, QemuSpec};
pub use session::{Mutation, Observer, Session};

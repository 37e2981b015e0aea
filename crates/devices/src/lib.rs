//! # Devices
//!
//! Slot-keyed device collections for virtual guests.
//!
//! A guest owns several collections of sub-resources (disks, network
//! interfaces, mount points). Each collection is keyed by a small integer
//! slot id and every slot carries a map of scalar attributes.
//!
//! The control plane that owns the live state does not echo attributes that
//! sit at their default value, and it reports booleans as `0`/`1`. This crate
//! merges a declared collection with a live one so that re-reading unchanged
//! remote state never produces a diff.
//!
//! ## Core Concepts
//!
//! - **Value**: a tagged scalar (`Str`, `Int`, `Bool`)
//! - **DeviceSlot**: slot id plus its attributes
//! - **DeviceCollection**: slots keyed by slot id
//! - **DeviceSchema**: the recognized attributes of one collection kind
//! - **merge**: declared + live -> reconciled collection
//!
//! ## Example
//!
//! ```
//! use devices::{merge, Attributes, DeviceCollection, Value};
//!
//! let mut declared = DeviceCollection::new();
//! declared.insert(0, Attributes::from([
//!     ("volume".to_string(), Value::from("local:10")),
//!     ("acl".to_string(), Value::Bool(false)),
//! ]));
//!
//! let mut live = DeviceCollection::new();
//! live.insert(0, Attributes::from([
//!     ("volume".to_string(), Value::from("local:10")),
//!     ("acl".to_string(), Value::Int(1)),
//! ]));
//!
//! let merged = merge(&declared, &live);
//! assert_eq!(merged.get(0).unwrap()["acl"], Value::Bool(true));
//! ```

pub mod collection;
pub mod error;
pub mod keyed;
pub mod merge;
pub mod schema;
pub mod value;

pub use collection::{Attributes, DeviceCollection, DeviceSlot};
pub use error::{Error, Result};
pub use keyed::{from_keyed_map, to_keyed_map, SLOT_ID_KEY};
pub use merge::merge;
pub use schema::{DeviceSchema, Field};
pub use value::{coerce_bool, Value, ValueKind};

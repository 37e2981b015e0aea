//! Declared guest models.
//!
//! A declared model is what the declarative engine hands over on create and
//! update, and what read hands back after looking at the plane. Each guest
//! kind implements [`GuestSpec`], which is everything the lifecycle
//! orchestrator needs to know about it.

pub mod lxc;
pub mod qemu;

pub use lxc::LxcSpec;
pub use qemu::QemuSpec;

use crate::error::{Error, Result};
use devices::{Attributes, DeviceSchema, from_keyed_map, merge, to_keyed_map};
use pveapi::{VmConfig, VmKind, VmStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Declared power state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    #[default]
    Running,
    Stopped,
}

impl PowerState {
    /// Status the plane reports once this state is reached.
    pub fn status(&self) -> VmStatus {
        match self {
            PowerState::Running => VmStatus::Running,
            PowerState::Stopped => VmStatus::Stopped,
        }
    }

    /// Declared state matching an observed status, if any.
    pub fn from_status(status: VmStatus) -> Option<Self> {
        match status {
            VmStatus::Running => Some(PowerState::Running),
            VmStatus::Stopped => Some(PowerState::Stopped),
            VmStatus::Paused => None,
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.status())
    }
}

/// How a new guest comes into existence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateStrategy {
    /// From an installation image or container template
    Template(String),
    /// By cloning the named guest
    Clone(String),
}

impl CreateStrategy {
    /// Pick the strategy from the declared template and clone source.
    ///
    /// Exactly one of them must be set.
    pub fn select(template_field: &str, template: &str, clone: &str) -> Result<Self> {
        match (template.is_empty(), clone.is_empty()) {
            (false, true) => Ok(Self::Template(template.to_string())),
            (true, false) => Ok(Self::Clone(clone.to_string())),
            (false, false) => Err(Error::StrategyConflict(format!(
                "only one of {template_field} and clone may be set"
            ))),
            (true, true) => Err(Error::StrategyConflict(format!(
                "either {template_field} or clone must be set"
            ))),
        }
    }
}

/// Where to reach a guest over SSH.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionTarget {
    /// The guest is reachable at a known address
    Direct { host: String, port: u16 },
    /// The plane forwards a host port to the guest; ask it which
    Forwarded { host: String },
}

/// A declared guest of one kind.
pub trait GuestSpec: Clone + Default + fmt::Debug + Send + Sync {
    /// Kind of guest this model describes
    const KIND: VmKind;

    fn name(&self) -> &str;

    fn target_node(&self) -> &str;

    /// Validate the template/clone choice. Called before any remote call.
    fn strategy(&self) -> Result<CreateStrategy>;

    fn power(&self) -> PowerState;

    /// Whether this guest may take over an existing one with the same name
    fn force_create(&self) -> bool;

    /// Whether this guest wants the pre-provisioning hook
    fn preprovision(&self) -> bool {
        true
    }

    fn ssh_user(&self) -> &str;

    fn ssh_private_key(&self) -> &str;

    /// Configuration to push to the plane.
    fn to_config(&self) -> Result<VmConfig>;

    /// Sizes of the disks in `config`, keyed by the name used to resize them.
    fn disk_sizes(config: &VmConfig) -> BTreeMap<String, String>;

    fn connection_target(&self) -> Result<ConnectionTarget>;

    /// Rebuild the declared model from a fresh snapshot of the guest.
    fn refresh(&self, node: &str, live: &VmConfig, status: VmStatus) -> Result<Self>;
}

/// Convert a declared collection into its normalized slot-keyed form.
pub(crate) fn declared_devices(
    schema: &DeviceSchema,
    elements: &[Attributes],
) -> Result<devices::DeviceCollection> {
    Ok(schema.normalize(&from_keyed_map(elements)?)?)
}

/// Merge a declared collection with the one the plane reported.
///
/// With nothing declared (an imported guest) every live slot is surfaced.
pub(crate) fn refresh_devices(
    schema: &DeviceSchema,
    elements: &[Attributes],
    live: &VmConfig,
) -> Result<Vec<Attributes>> {
    let declared = from_keyed_map(elements)?;
    let live = live.devices(schema.name());

    let merged = if declared.is_empty() {
        schema.merge(&declared, &live)?
    } else {
        merge(&schema.normalize(&declared)?, &live)
    };
    Ok(to_keyed_map(&merged))
}

/// Keep the declared value when the plane reports nothing for it.
pub(crate) fn live_or(live: &VmConfig, key: &str, declared: &str) -> String {
    if live.get(key).is_some() {
        live.str_attr(key)
    } else {
        declared.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_requires_exactly_one_source() {
        assert_eq!(
            CreateStrategy::select("iso", "local:iso/debian.iso", "").unwrap(),
            CreateStrategy::Template("local:iso/debian.iso".to_string())
        );
        assert_eq!(
            CreateStrategy::select("iso", "", "debian-template").unwrap(),
            CreateStrategy::Clone("debian-template".to_string())
        );
        assert!(matches!(
            CreateStrategy::select("iso", "a", "b"),
            Err(Error::StrategyConflict(_))
        ));
        assert!(matches!(
            CreateStrategy::select("ostemplate", "", ""),
            Err(Error::StrategyConflict(_))
        ));
    }

    #[test]
    fn test_power_state_round_trip_through_status() {
        assert_eq!(PowerState::default(), PowerState::Running);
        for state in [PowerState::Running, PowerState::Stopped] {
            assert_eq!(PowerState::from_status(state.status()), Some(state));
        }
        assert_eq!(PowerState::from_status(VmStatus::Paused), None);
    }
}

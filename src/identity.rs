//! Resource identity tokens.
//!
//! A guest is identified towards the declarative engine by the token
//! `node/kind/vmid`, e.g. `pve1/qemu/142`.

use crate::error::Error;
use pveapi::{VmKind, VmRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identity of a managed guest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceId {
    pub node: String,
    pub kind: VmKind,
    pub vmid: u32,
}

impl ResourceId {
    pub fn new(node: impl Into<String>, kind: VmKind, vmid: u32) -> Self {
        Self {
            node: node.into(),
            kind,
            vmid,
        }
    }

    /// Encode as `node/kind/vmid`.
    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// Decode a `node/kind/vmid` token.
    pub fn decode(token: &str) -> Result<Self, Error> {
        let parse_error = |reason: &str| Error::IdentityParse {
            token: token.to_string(),
            reason: reason.to_string(),
        };

        let fields: Vec<&str> = token.split('/').collect();
        let [node, kind, vmid] = fields.as_slice() else {
            return Err(parse_error("expected node/kind/vmid"));
        };

        if node.is_empty() {
            return Err(parse_error("empty node"));
        }
        let kind = VmKind::from_name(kind).ok_or_else(|| parse_error("kind must be qemu or lxc"))?;
        if vmid.is_empty() || !vmid.bytes().all(|b| b.is_ascii_digit()) {
            return Err(parse_error("vmid is not a decimal integer"));
        }
        let vmid = vmid
            .parse()
            .map_err(|_| parse_error("vmid is out of range"))?;

        Ok(Self::new(*node, kind, vmid))
    }

    /// Reference to the guest on the control plane.
    pub fn vm_ref(&self) -> VmRef {
        VmRef::new(self.vmid, self.node.clone(), self.kind)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.node, self.kind, self.vmid)
    }
}

impl FromStr for ResourceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

impl TryFrom<String> for ResourceId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::decode(&value)
    }
}

impl From<ResourceId> for String {
    fn from(id: ResourceId) -> Self {
        id.encode()
    }
}

impl From<&VmRef> for ResourceId {
    fn from(vm: &VmRef) -> Self {
        Self::new(vm.node.clone(), vm.kind, vm.vmid)
    }
}

//! Error types for the reconciliation core.

use crate::identity::ResourceId;
use pveapi::VmRef;
use thiserror::Error;

/// Errors returned by lifecycle operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A guest with the declared name already exists and cannot be recycled
    #[error("a guest named '{name}' already exists ({existing})")]
    DuplicateResource {
        /// Declared name
        name: String,
        /// The guest holding that name
        existing: VmRef,
    },

    /// No unused guest id left in the configured range
    #[error("no free guest id above {floor} and up to {ceiling}")]
    AllocationExhausted { floor: u32, ceiling: u32 },

    /// An identity token that does not decode
    #[error("invalid resource id '{token}': {reason}")]
    IdentityParse { token: String, reason: String },

    /// Both or neither of template and clone source were declared
    #[error("{0}")]
    StrategyConflict(String),

    /// A control-plane call failed; the remote error is kept as is
    #[error(transparent)]
    Remote(#[from] pveapi::Error),

    /// Declared input the core cannot interpret
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A device collection could not be converted
    #[error(transparent)]
    Devices(#[from] devices::Error),

    /// The pre-provisioning hook failed
    #[error("pre-provisioning {id} failed: {source:#}")]
    Preprovision {
        id: ResourceId,
        #[source]
        source: anyhow::Error,
    },

    /// Provider configuration could not be read or parsed
    #[error("provider configuration: {0:#}")]
    Config(anyhow::Error),
}

impl Error {
    /// Whether the error came from the control plane.
    pub fn is_remote(&self) -> bool {
        matches!(self, Error::Remote(_))
    }

    /// The underlying control-plane error, if any.
    pub fn remote(&self) -> Option<&pveapi::Error> {
        match self {
            Error::Remote(err) => Some(err),
            _ => None,
        }
    }
}

/// A failed create.
///
/// `identity` is `None` when nothing was created remotely. Otherwise it names
/// the partially configured guest, which is kept so a retry can pick it up.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct Failed {
    pub identity: Option<ResourceId>,
    pub error: Error,
}

impl Failed {
    /// Failure before any guest existed remotely.
    pub fn nothing_created(error: impl Into<Error>) -> Self {
        Self {
            identity: None,
            error: error.into(),
        }
    }
}

/// Result type for the reconciliation core.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use pveapi::VmKind;

    #[test]
    fn test_remote_error_is_wrapped_verbatim() {
        let remote = pveapi::Error::Rejected {
            message: "VM 101 already exists".to_string(),
        };
        let err: Error = remote.clone().into();
        assert!(err.is_remote());
        assert_eq!(err.remote(), Some(&remote));
        assert_eq!(err.to_string(), remote.to_string());
    }

    #[test]
    fn test_duplicate_message_names_holder() {
        let err = Error::DuplicateResource {
            name: "web".to_string(),
            existing: VmRef::new(120, "pve2", VmKind::Qemu),
        };
        assert_eq!(
            err.to_string(),
            "a guest named 'web' already exists (qemu 120 on pve2)"
        );
    }

    #[test]
    fn test_failed_keeps_identity() {
        let id: ResourceId = "pve/qemu/101".parse().unwrap();
        let failed = Failed {
            identity: Some(id.clone()),
            error: Error::InvalidConfig("bad".to_string()),
        };
        assert_eq!(failed.identity, Some(id));
        assert!(Failed::nothing_created(Error::StrategyConflict("x".into()))
            .identity
            .is_none());
    }
}

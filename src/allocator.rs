//! Guest id allocation.

use crate::error::{Error, Result};
use crate::session::Mutation;
use serde::{Deserialize, Serialize};

/// Range guest ids are allocated from: above `floor`, up to `ceiling`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdRange {
    /// Ids at or below this are reserved
    pub floor: u32,
    /// Highest id handed out
    pub ceiling: u32,
}

impl Default for IdRange {
    fn default() -> Self {
        Self {
            floor: 100,
            ceiling: 999_999_999,
        }
    }
}

/// Pick the smallest unused guest id in `range`.
///
/// Taking the [`Mutation`] guard ties the scan to the lock, so the id stays
/// free until the caller's create call within the same sequence.
pub fn allocate(plane: &Mutation<'_>, range: &IdRange) -> Result<u32> {
    let used = plane.used_ids()?;

    let exhausted = || Error::AllocationExhausted {
        floor: range.floor,
        ceiling: range.ceiling,
    };

    let start = range.floor.checked_add(1).ok_or_else(exhausted)?;
    let vmid = (start..=range.ceiling)
        .find(|id| !used.contains(id))
        .ok_or_else(exhausted)?;

    log::debug!("allocated guest id {vmid} ({} ids in use)", used.len());
    Ok(vmid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;
    use pveapi::{MemoryPlane, VmConfig, VmKind, VmRef, VmStatus};
    use std::sync::Arc;

    fn session_with(ids: &[u32]) -> Session {
        let mut plane = MemoryPlane::new().with_node("pve");
        for &id in ids {
            plane = plane.with_guest(
                VmRef::new(id, "pve", VmKind::Qemu),
                VmStatus::Stopped,
                VmConfig::new(format!("vm{id}")),
            );
        }
        Session::new(Arc::new(plane))
    }

    #[test]
    fn test_allocate_first_above_floor() {
        let session = session_with(&[]);
        let m = session.begin();
        assert_eq!(allocate(&m, &IdRange::default()).unwrap(), 101);
    }

    #[test]
    fn test_allocate_fills_gaps() {
        let session = session_with(&[50, 101, 102, 104]);
        let m = session.begin();
        assert_eq!(allocate(&m, &IdRange::default()).unwrap(), 103);
    }

    #[test]
    fn test_allocate_sees_ids_created_under_the_guard() {
        let session = session_with(&[100, 101, 103]);
        let m = session.begin();

        let mut allocated = Vec::new();
        for name in ["a", "b"] {
            let vmid = allocate(&m, &IdRange::default()).unwrap();
            let vm = VmRef::new(vmid, "pve", VmKind::Qemu);
            m.create(&vm, &VmConfig::new(name)).unwrap();
            allocated.push(vmid);
        }
        assert_eq!(allocated, vec![102, 104]);
    }

    #[test]
    fn test_allocate_ignores_reserved_ids() {
        let session = session_with(&[1, 100]);
        let m = session.begin();
        let range = IdRange {
            floor: 0,
            ceiling: 200,
        };
        assert_eq!(allocate(&m, &range).unwrap(), 2);
    }

    #[test]
    fn test_allocate_exhausted() {
        let session = session_with(&[101, 102, 103]);
        let m = session.begin();
        let range = IdRange {
            floor: 100,
            ceiling: 103,
        };
        assert!(matches!(
            allocate(&m, &range),
            Err(Error::AllocationExhausted {
                floor: 100,
                ceiling: 103
            })
        ));
    }

    #[test]
    fn test_allocate_empty_range() {
        let session = session_with(&[]);
        let m = session.begin();
        let range = IdRange {
            floor: u32::MAX,
            ceiling: u32::MAX,
        };
        assert!(allocate(&m, &range).is_err());
    }

    #[test]
    fn test_range_defaults_from_toml() {
        let range: IdRange = toml::from_str("floor = 1000").unwrap();
        assert_eq!(range.floor, 1000);
        assert_eq!(range.ceiling, 999_999_999);
    }
}

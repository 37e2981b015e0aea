//! Growing disks to their declared size.

use super::Orchestrator;
use crate::error::{Error, Result};
use crate::resource::GuestSpec;
use crate::session::Mutation;
use pveapi::{DiskSize, VmConfig, VmRef};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// A disk that has to grow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskGrowth {
    /// Name the plane resizes it by (`virtio0`, `rootfs`, `mp1`)
    pub disk: String,
    pub from: DiskSize,
    pub to: DiskSize,
}

/// Compare declared disk sizes with the observed ones.
///
/// Disks the plane does not report are skipped, and a declared size below
/// the observed one is logged and left alone: disks never shrink.
pub fn plan_growth(
    declared: &BTreeMap<String, String>,
    observed: &BTreeMap<String, String>,
) -> Result<Vec<DiskGrowth>> {
    let mut plan = Vec::new();

    for (disk, wanted) in declared {
        let Some(current) = observed.get(disk) else {
            log::debug!("disk {disk} not reported by the plane, not resizing");
            continue;
        };

        let to: DiskSize = wanted
            .parse()
            .map_err(|e| Error::InvalidConfig(format!("disk {disk}: {e}")))?;
        let from: DiskSize = current.parse().map_err(pveapi::Error::InvalidResponse)?;

        match to.cmp(&from) {
            Ordering::Greater => plan.push(DiskGrowth {
                disk: disk.clone(),
                from,
                to,
            }),
            Ordering::Less => log::warn!("disk {disk} is {from}, not shrinking it to {to}"),
            Ordering::Equal => {}
        }
    }

    Ok(plan)
}

impl Orchestrator {
    /// Grow every disk of `vm` that is smaller than declared in `config`.
    ///
    /// Returns how many disks were resized.
    pub(super) fn grow_disks<S: GuestSpec>(
        &self,
        plane: &Mutation<'_>,
        vm: &VmRef,
        config: &VmConfig,
    ) -> Result<usize> {
        let declared = S::disk_sizes(config);
        if declared.is_empty() {
            return Ok(0);
        }

        let observed = S::disk_sizes(&plane.config(vm)?);
        let plan = plan_growth(&declared, &observed)?;

        for growth in &plan {
            log::info!(
                "growing {} of {vm} from {} to {}",
                growth.disk,
                growth.from,
                growth.to
            );
            let task = plane.resize_disk(vm, &growth.disk, &growth.to.to_string())?;
            self.settle(plane, task, &format!("resize of {}", growth.disk))?;
        }

        Ok(plan.len())
    }
}

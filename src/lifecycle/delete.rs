use super::Orchestrator;
use crate::error::Result;
use crate::identity::ResourceId;
use crate::settle::settle_power;
use pveapi::VmStatus;

impl Orchestrator {
    /// Stop and destroy a guest.
    ///
    /// Stop is always sent; a guest that is already stopped answers with a
    /// no-op.
    ///
    /// A guest that is already gone, or whose id now belongs to a guest of
    /// another kind, counts as deleted.
    pub fn delete(&self, id: &ResourceId) -> Result<()> {
        let plane = self.session.begin();

        let vm = match plane.locate(id.vmid)? {
            Some(vm) if vm.kind == id.kind => vm,
            Some(other) => {
                log::warn!("{id} is gone, not touching {other}");
                return Ok(());
            }
            None => {
                log::info!("{id} already deleted");
                return Ok(());
            }
        };

        match plane.stop(&vm) {
            Ok(task) => settle_power(&*plane, &vm, task.as_ref(), VmStatus::Stopped, &self.poll)?,
            Err(err) if err.is_ignorable() => log::debug!("{vm}: {err}"),
            Err(err) => return Err(err.into()),
        }

        let task = plane.delete(&vm)?;
        self.settle(&plane, task, &format!("deletion of {vm}"))?;
        log::info!("deleted {vm}");
        Ok(())
    }
}

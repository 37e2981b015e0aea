use super::{Applied, Orchestrator};
use crate::error::Result;
use crate::identity::ResourceId;
use crate::resource::GuestSpec;

impl Orchestrator {
    /// Push the declared model to an existing guest.
    ///
    /// Disks grow but never shrink, and the declared power state is applied
    /// last. A guest that moved to another node is updated where it is.
    pub fn update<S: GuestSpec>(&self, id: &ResourceId, spec: &S) -> Result<Applied<S>> {
        let config = spec.to_config()?;

        let plane = self.session.begin();
        let vm = self.locate_existing(&plane, id)?;

        log::info!("updating {vm}");
        let task = plane.update_config(&vm, &config)?;
        self.settle(&plane, task, &format!("reconfiguration of {vm}"))?;

        self.grow_disks::<S>(&plane, &vm, &config)?;
        self.apply_power(&plane, &vm, spec.power())?;
        let (live, status) = self.snapshot(&plane, &vm)?;
        drop(plane);

        self.finish(
            &vm,
            spec,
            &live,
            status,
            self.provider.preprovision.runs_on_update(),
        )
    }
}

use super::{Applied, Orchestrator};
use crate::allocator::allocate;
use crate::error::{Error, Failed, Result};
use crate::identity::ResourceId;
use crate::resource::{CreateStrategy, GuestSpec, PowerState};
use crate::session::Mutation;
use pveapi::{VmConfig, VmRef};

impl Orchestrator {
    /// Create the declared guest, or recycle an existing one with its name.
    ///
    /// On failure, [`Failed::identity`] names the guest if it was already
    /// accepted by the plane; that partial guest is left in place.
    pub fn create<S: GuestSpec>(&self, spec: &S) -> std::result::Result<Applied<S>, Failed> {
        let mut identity = None;
        self.try_create(spec, &mut identity).map_err(|error| {
            match &identity {
                Some(id) => log::warn!("creating {id} failed part way: {error}"),
                None => log::warn!("creating '{}' failed: {error}", spec.name()),
            }
            Failed { identity, error }
        })
    }

    fn try_create<S: GuestSpec>(
        &self,
        spec: &S,
        identity: &mut Option<ResourceId>,
    ) -> Result<Applied<S>> {
        let strategy = spec.strategy()?;
        let config = spec.to_config()?;
        let name = spec.name();

        let plane = self.session.begin();
        let node = plane.find_node(spec.target_node())?;

        let vm = match plane.find_by_name(name)? {
            Some(existing) => {
                self.check_recyclable(spec, &node, &existing)?;
                *identity = Some(ResourceId::from(&existing));
                self.recycle(&plane, &existing, &config)?;
                existing
            }
            None => {
                let vmid = allocate(&plane, &self.provider.id_range)?;
                let vm = VmRef::new(vmid, node, S::KIND);
                self.provision(&plane, &vm, name, &strategy, &config, identity)?;
                vm
            }
        };

        self.grow_disks::<S>(&plane, &vm, &config)?;
        self.apply_power(&plane, &vm, spec.power())?;
        let (live, status) = self.snapshot(&plane, &vm)?;
        drop(plane);

        let applied = self.finish(
            &vm,
            spec,
            &live,
            status,
            self.provider.preprovision.runs_on_create(),
        )?;
        log::info!("created {}", applied.id);
        Ok(applied)
    }

    /// A guest holding the declared name may be taken over only when it
    /// sits on the target node, has the same kind, and recycling is allowed.
    fn check_recyclable<S: GuestSpec>(&self, spec: &S, node: &str, existing: &VmRef) -> Result<()> {
        let allowed = self.provider.recycle_existing || spec.force_create();
        if existing.node == node && existing.kind == S::KIND && allowed {
            return Ok(());
        }

        log::debug!(
            "'{}' is taken by {existing} (target node {node}, recycling allowed: {allowed})",
            spec.name()
        );
        Err(Error::DuplicateResource {
            name: spec.name().to_string(),
            existing: existing.clone(),
        })
    }

    fn recycle(&self, plane: &Mutation<'_>, vm: &VmRef, config: &VmConfig) -> Result<()> {
        log::info!("recycling {vm} for '{}'", config.name);
        self.apply_power(plane, vm, PowerState::Stopped)?;
        let task = plane.update_config(vm, config)?;
        self.settle(plane, task, &format!("reconfiguration of {vm}"))
    }

    /// Bring a new guest into existence and push its configuration.
    fn provision(
        &self,
        plane: &Mutation<'_>,
        vm: &VmRef,
        name: &str,
        strategy: &CreateStrategy,
        config: &VmConfig,
        identity: &mut Option<ResourceId>,
    ) -> Result<()> {
        match strategy {
            CreateStrategy::Template(template) => {
                log::info!("creating {vm} '{name}' from {template}");
                let task = plane.create(vm, config)?;
                *identity = Some(ResourceId::from(vm));
                self.settle(plane, task, &format!("creation of {vm}"))
            }
            CreateStrategy::Clone(source) => {
                let source_vm = plane
                    .find_by_name(source)?
                    .ok_or_else(|| pveapi::Error::not_found(format!("clone source '{source}'")))?;

                log::info!("cloning {source_vm} into {vm} '{name}'");
                let task = plane.clone_guest(&source_vm, vm, name)?;
                *identity = Some(ResourceId::from(vm));
                self.settle(plane, task, &format!("clone of {source_vm}"))?;

                let task = plane.update_config(vm, config)?;
                self.settle(plane, task, &format!("configuration of {vm}"))
            }
        }
    }
}

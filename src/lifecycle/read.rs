use super::{Observed, Orchestrator};
use crate::error::Result;
use crate::identity::ResourceId;
use crate::resource::GuestSpec;

impl Orchestrator {
    /// Refresh `prior` from the plane.
    ///
    /// Returns `None` when the guest no longer exists, or when its id now
    /// belongs to a guest of another kind. The returned identity follows
    /// the guest if it migrated to another node.
    pub fn read<S: GuestSpec>(&self, id: &ResourceId, prior: &S) -> Result<Option<Observed<S>>> {
        let plane = self.session.begin();

        let Some(vm) = plane.locate(id.vmid)? else {
            log::info!("{id} no longer exists");
            return Ok(None);
        };
        if vm.kind != S::KIND {
            log::warn!("{id} is gone, its id now belongs to {vm}");
            return Ok(None);
        }

        let (live, status) = self.snapshot(&plane, &vm)?;
        drop(plane);

        if vm.node != id.node {
            log::info!("{id} moved to node {}", vm.node);
        }

        let spec = prior.refresh(&vm.node, &live, status)?;
        Ok(Some(Observed {
            id: ResourceId::from(&vm),
            spec,
        }))
    }

    /// Read a guest nothing is known about yet, keeping every live device.
    pub fn import<S: GuestSpec>(&self, id: &ResourceId) -> Result<Option<Observed<S>>> {
        log::debug!("importing {id}");
        self.read(id, &S::default())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use crate::identity::ResourceId;
    use crate::resource::{LxcSpec, PowerState, QemuSpec};
    use devices::{DeviceSlot, SLOT_ID_KEY, Value};
    use pveapi::{MemoryPlane, Op, VmConfig, VmKind, VmRef, VmStatus};

    fn id(token: &str) -> ResourceId {
        token.parse().unwrap()
    }

    #[test]
    fn test_read_after_create_is_stable() {
        let (_, orch) = orchestrator(MemoryPlane::new().with_node("pve"));
        let declared = qemu("web", "pve");
        let applied = orch.create(&declared).unwrap();

        let observed = orch.read(&applied.id, &declared).unwrap().unwrap();
        assert_eq!(observed.id, applied.id);
        assert_eq!(observed.spec, applied.spec);
        assert_eq!(observed.spec.memory, declared.memory);

        // Reading again from the refreshed model changes nothing
        let again = orch.read(&observed.id, &observed.spec).unwrap().unwrap();
        assert_eq!(again, observed);
    }

    #[test]
    fn test_read_missing_guest() {
        let (plane, orch) = orchestrator(MemoryPlane::new().with_node("pve"));
        assert!(orch.read(&id("pve/qemu/404"), &qemu("web", "pve")).unwrap().is_none());
        assert_eq!(plane.mutation_count(), 0);
    }

    #[test]
    fn test_read_id_reused_by_other_kind() {
        let vm = VmRef::new(130, "pve", VmKind::Lxc);
        let (_, orch) = orchestrator(MemoryPlane::new().with_guest(
            vm,
            VmStatus::Running,
            VmConfig::new("ct"),
        ));
        assert!(orch.read(&id("pve/qemu/130"), &qemu("web", "pve")).unwrap().is_none());
    }

    #[test]
    fn test_read_follows_migration() {
        let vm = VmRef::new(130, "pve2", VmKind::Qemu);
        let (_, orch) = orchestrator(MemoryPlane::new().with_guest(
            vm,
            VmStatus::Stopped,
            VmConfig::new("web"),
        ));

        let observed = orch
            .read(&id("pve1/qemu/130"), &qemu("web", "pve1"))
            .unwrap()
            .unwrap();
        assert_eq!(observed.id.to_string(), "pve2/qemu/130");
        assert_eq!(observed.spec.target_node, "pve2");
        assert_eq!(observed.spec.status, PowerState::Stopped);
    }

    #[test]
    fn test_read_reports_drift() {
        let (plane, orch) = orchestrator(MemoryPlane::new().with_node("pve"));
        let declared = qemu("web", "pve");
        let applied = orch.create(&declared).unwrap();

        let mut wire = plane.guest(applied.id.vmid).unwrap().config;
        wire.set("memory", 8192i64);
        plane.set_wire_config(applied.id.vmid, wire);
        plane.set_status(applied.id.vmid, VmStatus::Stopped);

        let observed = orch.read(&applied.id, &declared).unwrap().unwrap();
        assert_eq!(observed.spec.memory, 8192);
        assert_eq!(observed.spec.status, PowerState::Stopped);
    }

    #[test]
    fn test_import_surfaces_live_devices() {
        let vm = VmRef::new(140, "pve", VmKind::Lxc);
        let mut wire = VmConfig::new("ct");
        wire.set_devices(
            "net",
            [
                DeviceSlot::new(0, Default::default())
                    .with("name", "eth0")
                    .with("bridge", "vmbr0"),
                DeviceSlot::new(3, Default::default())
                    .with("name", "eth3")
                    .with("bridge", "vmbr1"),
            ]
            .into_iter()
            .collect(),
        );
        let (plane, orch) = orchestrator(MemoryPlane::new().with_guest(
            vm,
            VmStatus::Running,
            wire,
        ));

        let observed = orch.import::<LxcSpec>(&id("pve/lxc/140")).unwrap().unwrap();
        assert_eq!(observed.spec.hostname, "ct");
        assert_eq!(observed.spec.net.len(), 2);
        assert_eq!(observed.spec.net[1].get(SLOT_ID_KEY), Some(&Value::Int(3)));
        assert_eq!(plane.count(Op::Config), 1);
    }

    #[test]
    fn test_import_unknown_guest() {
        let (_, orch) = orchestrator(MemoryPlane::new());
        assert!(orch.import::<QemuSpec>(&id("pve/qemu/100")).unwrap().is_none());
    }
}

//! Lifecycle orchestration: create, read, update and delete of guests.
//!
//! Every mutating sequence runs under one [`Mutation`] guard, and each
//! asynchronous mutation is followed by the settle barrier before the next
//! step. Connection resolution and pre-provisioning happen after the guard
//! is released.

mod create;
mod delete;
mod read;
mod resize;
mod update;

pub use resize::{DiskGrowth, plan_growth};

use crate::config::ProviderConfig;
use crate::connection::ConnectionInfo;
use crate::error::{Error, Result};
use crate::identity::ResourceId;
use crate::preprovision::{NoPreprovision, Preprovisioner};
use crate::resource::{GuestSpec, PowerState};
use crate::session::{Mutation, Session};
use crate::settle::{settle, settle_power};
use pveapi::{PollConfig, TaskId, VmConfig, VmRef, VmStatus};
use std::sync::Arc;

/// Outcome of a successful create or update.
#[derive(Debug, Clone)]
pub struct Applied<S> {
    /// Identity re-encoded from where the guest lives now
    pub id: ResourceId,
    /// Declared model refreshed from the plane
    pub spec: S,
    pub connection: ConnectionInfo,
}

/// Outcome of a read.
#[derive(Debug, Clone, PartialEq)]
pub struct Observed<S> {
    pub id: ResourceId,
    pub spec: S,
}

/// Drives guests through their lifecycle.
pub struct Orchestrator {
    session: Arc<Session>,
    provider: ProviderConfig,
    poll: PollConfig,
    preprovisioner: Box<dyn Preprovisioner>,
}

impl Orchestrator {
    pub fn new(session: Arc<Session>, provider: ProviderConfig) -> Self {
        let poll = provider.poll_config();
        Self {
            session,
            provider,
            poll,
            preprovisioner: Box::new(NoPreprovision),
        }
    }

    /// Use `preprovisioner` for guests that ask for pre-provisioning.
    pub fn with_preprovisioner(mut self, preprovisioner: impl Preprovisioner + 'static) -> Self {
        self.preprovisioner = Box::new(preprovisioner);
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn provider(&self) -> &ProviderConfig {
        &self.provider
    }

    fn settle(&self, plane: &Mutation<'_>, task: Option<TaskId>, what: &str) -> Result<()> {
        settle(&**plane, task.as_ref(), &self.poll, what)
    }

    /// Bring the guest to the declared power state.
    ///
    /// An "already in that state" answer from the plane counts as success.
    fn apply_power(&self, plane: &Mutation<'_>, vm: &VmRef, desired: PowerState) -> Result<()> {
        let current = plane.status(vm)?;
        if current == desired.status() {
            log::debug!("{vm} already {current}");
            return Ok(());
        }

        log::info!("{vm} is {current}, making it {desired}");
        let outcome = match desired {
            PowerState::Running => plane.start(vm),
            PowerState::Stopped => plane.stop(vm),
        };
        match outcome {
            Ok(task) => settle_power(&**plane, vm, task.as_ref(), desired.status(), &self.poll),
            Err(err) if err.is_ignorable() => {
                log::debug!("{vm}: {err}");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Find a guest that must exist, checking it still has the expected kind.
    fn locate_existing(&self, plane: &Mutation<'_>, id: &ResourceId) -> Result<VmRef> {
        match plane.locate(id.vmid)? {
            Some(vm) if vm.kind == id.kind => Ok(vm),
            _ => Err(pveapi::Error::not_found(format!("{} {}", id.kind, id.vmid)).into()),
        }
    }

    /// Configuration and power state as the plane reports them now.
    fn snapshot(&self, plane: &Mutation<'_>, vm: &VmRef) -> Result<(VmConfig, VmStatus)> {
        Ok((plane.config(vm)?, plane.status(vm)?))
    }

    fn run_preprovision(&self, id: &ResourceId, connection: &ConnectionInfo) -> Result<()> {
        log::info!("pre-provisioning {id}");
        self.preprovisioner
            .preprovision(id, connection)
            .map_err(|source| Error::Preprovision {
                id: id.clone(),
                source,
            })
    }

    /// Resolve the connection and run the hook if `wanted`.
    fn finish<S: GuestSpec>(
        &self,
        vm: &VmRef,
        declared: &S,
        live: &VmConfig,
        status: VmStatus,
        wanted: bool,
    ) -> Result<Applied<S>> {
        let id = ResourceId::from(vm);
        let connection =
            crate::connection::resolve(self.session.observe(), vm, declared, &self.provider)?;

        if wanted && declared.preprovision() {
            self.run_preprovision(&id, &connection)?;
        }

        let spec = declared.refresh(&vm.node, live, status)?;
        Ok(Applied {
            id,
            spec,
            connection,
        })
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("session", &self.session)
            .field("provider", &self.provider.api_url)
            .finish_non_exhaustive()
    }
}

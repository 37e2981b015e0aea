//! Serialized access to the control plane.
//!
//! The plane is not safe under concurrent mutating calls from one client,
//! so every mutating sequence runs while holding a [`Mutation`] guard
//! obtained from [`Session::begin`]. The guard releases the lock when it is
//! dropped, on every exit path. Read-only lookups made after the
//! configuration is applied go through [`Session::observe`] and never take
//! the lock.

use pveapi::{ControlPlane, Result, VmConfig, VmRef, VmStatus};
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

/// Shared handle to the control plane.
pub struct Session {
    plane: Arc<dyn ControlPlane>,
    lock: Mutex<()>,
}

impl Session {
    pub fn new(plane: Arc<dyn ControlPlane>) -> Self {
        Self {
            plane,
            lock: Mutex::new(()),
        }
    }

    /// Block until no other mutating sequence runs, then start one.
    ///
    /// The lock is not reentrant: a thread holding a [`Mutation`] must not
    /// call `begin` again.
    pub fn begin(&self) -> Mutation<'_> {
        // A panic while holding the lock leaves nothing to repair
        let guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        log::trace!("mutation lock acquired");
        Mutation {
            _guard: guard,
            plane: self.plane.as_ref(),
        }
    }

    /// Whether a mutating sequence is currently running.
    pub fn is_busy(&self) -> bool {
        matches!(self.lock.try_lock(), Err(TryLockError::WouldBlock))
    }

    /// Read-only access that does not take the lock.
    pub fn observe(&self) -> Observer<'_> {
        Observer {
            plane: self.plane.as_ref(),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("busy", &self.is_busy())
            .finish_non_exhaustive()
    }
}

/// Exclusive access to the plane for one mutating sequence.
pub struct Mutation<'a> {
    _guard: MutexGuard<'a, ()>,
    plane: &'a (dyn ControlPlane + 'static),
}

impl Deref for Mutation<'_> {
    type Target = dyn ControlPlane;

    fn deref(&self) -> &Self::Target {
        self.plane
    }
}

impl Drop for Mutation<'_> {
    fn drop(&mut self) {
        log::trace!("mutation lock released");
    }
}

/// Non-mutating queries, usable without the lock.
#[derive(Clone, Copy)]
pub struct Observer<'a> {
    plane: &'a (dyn ControlPlane + 'static),
}

impl Observer<'_> {
    pub fn locate(&self, vmid: u32) -> Result<Option<VmRef>> {
        self.plane.locate(vmid)
    }

    pub fn status(&self, vm: &VmRef) -> Result<VmStatus> {
        self.plane.status(vm)
    }

    pub fn config(&self, vm: &VmRef) -> Result<VmConfig> {
        self.plane.config(vm)
    }

    pub fn forwarded_port(&self, vm: &VmRef) -> Result<u16> {
        self.plane.forwarded_port(vm)
    }
}

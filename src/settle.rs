//! Settle barrier run after every asynchronous mutation.
//!
//! With a task handle the barrier polls the task until it finishes. Without
//! one it falls back to a fixed delay.

use crate::error::Result;
use pveapi::poll::{self, LogCallback};
use pveapi::{ControlPlane, PollConfig, TaskId, VmRef, VmStatus};
use std::thread;

/// Wait for the effect of a mutation described by `what`.
pub fn settle(
    plane: &dyn ControlPlane,
    task: Option<&TaskId>,
    config: &PollConfig,
    what: &str,
) -> Result<()> {
    match task {
        Some(task) => {
            log::debug!("waiting for {what} ({task})");
            poll::wait_for_task(plane, task, config, Some(&LogCallback))?;
        }
        None => {
            log::debug!(
                "no task handle for {what}, sleeping {:?}",
                config.fallback_delay
            );
            thread::sleep(config.fallback_delay);
        }
    }
    Ok(())
}

/// Wait for a power transition: the task, then the reported status.
pub fn settle_power(
    plane: &dyn ControlPlane,
    vm: &VmRef,
    task: Option<&TaskId>,
    wanted: VmStatus,
    config: &PollConfig,
) -> Result<()> {
    settle(plane, task, config, &format!("{vm} to become {wanted}"))?;
    poll::wait_for_status(plane, vm, wanted, config, Some(&LogCallback))?;
    Ok(())
}

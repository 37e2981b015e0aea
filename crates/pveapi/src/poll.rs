//! Bounded polling with exponential backoff.
//!
//! The plane executes most mutations asynchronously. Instead of sleeping a
//! fixed amount after each call, the caller polls a convergence check until
//! it passes or the wait budget is spent.

use crate::backend::ControlPlane;
use crate::error::{Error, Result};
use crate::types::{PollConfig, TASK_OK, TaskId, TaskState, VmRef, VmStatus};
use std::thread;
use std::time::Duration;

/// Callback trait for polling progress notifications.
pub trait PollCallback {
    /// Called before sleeping between two checks.
    ///
    /// # Arguments
    /// * `what` - Description of what is being waited for
    /// * `attempt` - Number of checks done so far (1-indexed)
    /// * `waited` - Time already spent waiting
    /// * `delay` - Time until the next check
    fn on_wait(&self, what: &str, attempt: u32, waited: Duration, delay: Duration);
}

/// Callback that logs each wait at debug level.
pub struct LogCallback;

impl PollCallback for LogCallback {
    fn on_wait(&self, what: &str, attempt: u32, waited: Duration, delay: Duration) {
        log::debug!(
            "waiting for {what}: check {attempt} pending after {waited:?}, next in {delay:?}"
        );
    }
}

/// Poll `check` until it returns `true`.
///
/// Sleeps between checks with exponential backoff. Time is accounted as the
/// sum of the delays slept, and the last delay is cut short so the total
/// never exceeds `config.max_wait`. Errors from `check` abort the wait.
pub fn wait_until<F>(
    config: &PollConfig,
    what: &str,
    callback: Option<&dyn PollCallback>,
    mut check: F,
) -> Result<()>
where
    F: FnMut() -> Result<bool>,
{
    let mut waited = Duration::ZERO;
    let mut attempt: u32 = 0;

    loop {
        if check()? {
            return Ok(());
        }

        if waited >= config.max_wait {
            return Err(Error::Timeout {
                operation: what.to_string(),
                waited,
            });
        }

        let delay = config
            .delay_for_attempt(attempt)
            .min(config.max_wait - waited);
        attempt = attempt.saturating_add(1);

        if let Some(cb) = callback {
            cb.on_wait(what, attempt, waited, delay);
        }

        thread::sleep(delay);
        waited += delay;
    }
}

/// Wait for an asynchronous task to finish successfully.
///
/// A task that stops with an exit status other than `OK` is an error.
pub fn wait_for_task(
    plane: &dyn ControlPlane,
    task: &TaskId,
    config: &PollConfig,
    callback: Option<&dyn PollCallback>,
) -> Result<()> {
    let what = format!("task {task}");
    let mut outcome: Option<String> = None;

    wait_until(config, &what, callback, || match plane.task_status(task)? {
        TaskState::Running => Ok(false),
        TaskState::Stopped { exit_status } => {
            outcome = Some(exit_status);
            Ok(true)
        }
    })?;

    match outcome {
        Some(status) if status == TASK_OK => Ok(()),
        Some(exit_status) => Err(Error::TaskFailed {
            task: task.clone(),
            exit_status,
        }),
        None => Err(Error::InvalidResponse(format!("no exit status for {task}"))),
    }
}

/// Wait for a guest to report the given power state.
pub fn wait_for_status(
    plane: &dyn ControlPlane,
    vm: &VmRef,
    wanted: VmStatus,
    config: &PollConfig,
    callback: Option<&dyn PollCallback>,
) -> Result<()> {
    let what = format!("{vm} to be {wanted}");
    wait_until(config, &what, callback, || Ok(plane.status(vm)? == wanted))
}

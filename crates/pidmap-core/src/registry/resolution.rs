//! Background resolution tasks.
//!
//! Tasks run on the registry's runtime, hold a worker permit for the length
//! of the probe, and write back through [`Shared::install`], which only
//! touches entries that are still present.

use super::Shared;
use crate::cancel::CancellationToken;
use crate::error::PidmapError;
use crate::probe::{self, ProbeOutcome};
use dashmap::mapref::entry::Entry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, warn};

/// Handle to one in-flight legacy resolution.
#[derive(Debug, Clone)]
pub(crate) struct PendingResolution {
    /// Distinguishes this task from a later one for the same application id.
    pub(crate) id: u64,
    pub(crate) token: CancellationToken,
}

impl PendingResolution {
    pub(crate) fn new(shared: &Shared) -> Self {
        Self {
            id: shared.next_task_id.fetch_add(1, Ordering::Relaxed),
            token: CancellationToken::new(),
        }
    }
}

impl Shared {
    /// Store `application_id` on the live entry for `pid`.
    ///
    /// No-op if the pid was evicted or the task was cancelled. The
    /// cancellation check happens while the entry is locked, so it is
    /// ordered against `refresh()` cancelling the task.
    fn install(&self, pid: u32, application_id: &str, token: Option<&CancellationToken>) -> bool {
        let Some(mut process) = self.by_pid.get_mut(&pid) else {
            debug!("Discarding {} for evicted pid {}", application_id, pid);
            return false;
        };
        let live = self
            .shutdown
            .check()
            .and_then(|()| token.map_or(Ok(()), CancellationToken::check));
        if let Err(cancelled) = live {
            debug!("Discarding {} for pid {}: {}", application_id, pid, cancelled);
            return false;
        }
        if process.set_application_id(application_id) {
            debug!("Resolved pid {} -> {}", pid, application_id);
        }
        true
    }
}

/// Counts a direct task against its pid in `Shared::direct_in_flight` for as
/// long as the task (or its unstarted future) is alive.
struct InFlight {
    shared: Arc<Shared>,
    pid: u32,
}

impl InFlight {
    fn register(shared: &Arc<Shared>, pid: u32) -> Self {
        *shared.direct_in_flight.entry(pid).or_insert(0) += 1;
        Self {
            shared: Arc::clone(shared),
            pid,
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if let Entry::Occupied(mut entry) = self.shared.direct_in_flight.entry(self.pid) {
            *entry.get_mut() -= 1;
            if *entry.get() == 0 {
                entry.remove();
            }
        }
    }
}

/// Log a swallowed probe failure; transient ones are expected to clear up.
fn log_failure(subject: impl std::fmt::Display, error: &PidmapError) {
    if error.is_retryable() {
        warn!("Failed to resolve {}, will retry on a later call: {}", subject, error);
    } else {
        debug!("Could not resolve {}: {}", subject, error);
    }
}

/// Resolve the owner of `pid` from its kernel status (API 26+).
pub(crate) fn spawn_direct(shared: &Arc<Shared>, runtime: &Handle, pid: u32) {
    let in_flight = InFlight::register(shared, pid);
    let shared = Arc::clone(shared);
    runtime.spawn(async move {
        let _in_flight = in_flight;
        let resolve = async {
            let Ok(_permit) = shared.permits.acquire().await else {
                return ProbeOutcome::Empty;
            };
            probe::direct_application_id(&*shared.probe, pid, shared.probe_timeout).await
        };

        let outcome = tokio::select! {
            _ = shared.shutdown.cancelled() => return,
            outcome = resolve => outcome,
        };

        match outcome {
            ProbeOutcome::Resolved(application_id) => {
                shared.install(pid, &application_id, None);
            }
            ProbeOutcome::Empty => debug!("No owner found for pid {}", pid),
            ProbeOutcome::Failed(e) => log_failure(format_args!("pid {}", pid), &e),
        }
    });
}

/// Find the pids owned by `application_id` through its run-as identity.
///
/// Removes its own `pending` entry when done, unless a newer task has
/// already replaced it.
pub(crate) fn spawn_legacy(
    shared: &Arc<Shared>,
    runtime: &Handle,
    application_id: String,
    pending: PendingResolution,
) {
    let shared = Arc::clone(shared);
    runtime.spawn(async move {
        let resolve = async {
            let Ok(_permit) = shared.permits.acquire().await else {
                return ProbeOutcome::Empty;
            };
            probe::legacy_pids(&*shared.probe, &application_id, shared.probe_timeout).await
        };

        let outcome = tokio::select! {
            _ = pending.token.cancelled() => None,
            _ = shared.shutdown.cancelled() => None,
            outcome = resolve => Some(outcome),
        };

        match outcome {
            Some(ProbeOutcome::Resolved(pids)) => {
                let installed = pids
                    .iter()
                    .filter(|&&pid| shared.install(pid, &application_id, Some(&pending.token)))
                    .count();
                debug!(
                    "{}: probe reported {} pids, {} still live",
                    application_id,
                    pids.len(),
                    installed
                );
            }
            Some(ProbeOutcome::Empty) => debug!("No running process found for {}", application_id),
            Some(ProbeOutcome::Failed(e)) => log_failure(&application_id, &e),
            None => debug!("Resolution of {} cancelled", application_id),
        }

        shared
            .pending
            .remove_if(&application_id, |_, current| current.id == pending.id);
    });
}

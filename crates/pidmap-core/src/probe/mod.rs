//! Shell probes that discover who owns a process.
//!
//! Two strategies:
//! - **Direct** ([`direct_application_id`]): pid -> owner uid -> first package
//!   owned by that uid. Needs API 26+.
//! - **Legacy** ([`legacy_pids`]): package -> pids, by running a pipeline under
//!   the package's own `run-as` identity.
//!
//! Probe failures never escape as errors; they are folded into a
//! [`ProbeOutcome`] so a resolution task can log and move on.

pub mod commands;
pub mod parse;

use crate::device::ShellProbe;
use crate::error::{PidmapError, Result};
use std::time::Duration;
use tracing::debug;

/// Result of one probe round-trip.
#[derive(Debug)]
pub enum ProbeOutcome<T> {
    /// The probe produced a usable answer.
    Resolved(T),
    /// The probe ran but produced nothing usable.
    Empty,
    /// Transport failure, timeout or rejected command.
    Failed(PidmapError),
}

impl<T> ProbeOutcome<T> {
    /// Chain a parse step onto a successful probe.
    pub fn and_then<U>(self, f: impl FnOnce(T) -> Option<U>) -> ProbeOutcome<U> {
        match self {
            ProbeOutcome::Resolved(value) => f(value).map_or(ProbeOutcome::Empty, ProbeOutcome::Resolved),
            ProbeOutcome::Empty => ProbeOutcome::Empty,
            ProbeOutcome::Failed(e) => ProbeOutcome::Failed(e),
        }
    }
}

impl ProbeOutcome<String> {
    fn from_output(output: Result<String>) -> Self {
        match output {
            Ok(text) if text.trim().is_empty() => ProbeOutcome::Empty,
            Ok(text) => ProbeOutcome::Resolved(text),
            Err(e) => ProbeOutcome::Failed(e),
        }
    }
}

/// Run one command with a timeout and classify the output.
pub async fn run(probe: &dyn ShellProbe, command: &str, timeout: Duration) -> ProbeOutcome<String> {
    debug!("Probing: {}", command);
    match tokio::time::timeout(timeout, probe.execute(command)).await {
        Ok(output) => ProbeOutcome::from_output(output),
        Err(_) => ProbeOutcome::Failed(PidmapError::Timeout(timeout)),
    }
}

/// Resolve the application identifier that owns `pid`.
///
/// The first package listed for the owner uid is taken as authoritative.
pub async fn direct_application_id(
    probe: &dyn ShellProbe,
    pid: u32,
    timeout: Duration,
) -> ProbeOutcome<String> {
    let uid = match run(probe, &commands::status_command(pid), timeout)
        .await
        .and_then(|status| parse::parse_uid_from_status(&status))
    {
        ProbeOutcome::Resolved(uid) => uid,
        ProbeOutcome::Empty => return ProbeOutcome::Empty,
        ProbeOutcome::Failed(e) => return ProbeOutcome::Failed(e),
    };

    run(probe, &commands::packages_for_uid_command(uid), timeout)
        .await
        .and_then(|packages| parse::parse_first_package(&packages))
}

/// Find the pids of managed-runtime processes owned by `application_id`.
pub async fn legacy_pids(
    probe: &dyn ShellProbe,
    application_id: &str,
    timeout: Duration,
) -> ProbeOutcome<Vec<u32>> {
    let command = match commands::legacy_pids_command(application_id) {
        Ok(command) => command,
        Err(e) => return ProbeOutcome::Failed(e),
    };

    run(probe, &command, timeout).await.and_then(|output| {
        let pids = parse::parse_pids(&output);
        (!pids.is_empty()).then_some(pids)
    })
}

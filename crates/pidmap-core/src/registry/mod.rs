//! Application-identity registry for one device.
//!
//! # Consistency model
//!
//! - `refresh()` is the single writer of the process *topology*: only it
//!   inserts and removes pids. Calls are serialized by an internal mutex.
//! - Resolution tasks only ever update an entry that is still present
//!   (`get_mut`, never `insert`), so a late result cannot resurrect an
//!   evicted pid.
//! - `find()` readers take short per-shard read locks and clone matching
//!   records out; they never wait on a probe.
//!
//! # Example
//!
//! ```rust,ignore
//! let registry = ProcessRegistry::new(transport, probe, RegistryConfig::default())?;
//! registry.refresh()?;
//! for process in registry.find("com.example.app") {
//!     println!("{} -> {:?}", process.pid(), process.application_id());
//! }
//! ```

mod process;
mod resolution;

pub use process::Process;

use crate::cancel::CancellationToken;
use crate::config::RegistryConfig;
use crate::device::{ClientRef, DeviceTransport, ShellProbe};
use crate::error::{PidmapError, Result};
use crate::probe::commands;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use resolution::PendingResolution;
use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::{debug, info};

/// State shared between the registry and its background resolution tasks.
pub(crate) struct Shared {
    /// Source of truth for what is running now.
    by_pid: DashMap<u32, Process>,
    /// In-flight legacy resolutions keyed by the application id searched for.
    pending: DashMap<String, PendingResolution>,
    /// Number of live direct tasks per pid.
    direct_in_flight: DashMap<u32, usize>,
    probe: Arc<dyn ShellProbe>,
    /// Bounds the number of probes running at once.
    permits: Semaphore,
    probe_timeout: Duration,
    shutdown: CancellationToken,
    next_task_id: AtomicU64,
}

/// Maps a device's live processes to the applications that own them.
pub struct ProcessRegistry {
    transport: Arc<dyn DeviceTransport>,
    shared: Arc<Shared>,
    runtime: Handle,
    legacy: bool,
    refresh_lock: Mutex<()>,
}

impl ProcessRegistry {
    /// Create a registry that schedules resolution on the current tokio runtime.
    pub fn new(
        transport: Arc<dyn DeviceTransport>,
        probe: Arc<dyn ShellProbe>,
        config: RegistryConfig,
    ) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| PidmapError::Config {
            message: "ProcessRegistry::new must be called within a tokio runtime".to_string(),
        })?;
        Self::with_runtime(transport, probe, config, runtime)
    }

    /// Create a registry that schedules resolution on `runtime`.
    pub fn with_runtime(
        transport: Arc<dyn DeviceTransport>,
        probe: Arc<dyn ShellProbe>,
        config: RegistryConfig,
        runtime: Handle,
    ) -> Result<Self> {
        config.validate()?;
        let legacy = config.is_legacy(transport.api_level());
        info!(
            "Process registry for {} (API level {}, {} resolution)",
            transport.serial(),
            transport.api_level(),
            if legacy { "legacy" } else { "direct" }
        );

        Ok(Self {
            transport,
            shared: Arc::new(Shared {
                by_pid: DashMap::new(),
                pending: DashMap::new(),
                direct_in_flight: DashMap::new(),
                probe,
                permits: Semaphore::new(config.max_concurrent_probes),
                probe_timeout: config.probe_timeout(),
                shutdown: CancellationToken::new(),
                next_task_id: AtomicU64::new(0),
            }),
            runtime,
            legacy,
            refresh_lock: Mutex::new(()),
        })
    }

    /// Whether this device resolves identities backward from application ids.
    pub fn is_legacy(&self) -> bool {
        self.legacy
    }

    /// Reconcile the registry with the transport's current live-client list.
    ///
    /// Stale pids are evicted, surviving pids get their handle swapped in
    /// place, and new pids are inserted unresolved. On direct devices every
    /// new pid gets a resolution task; on legacy devices any new pid cancels
    /// all pending legacy resolutions instead.
    ///
    /// Fails only if the transport snapshot itself fails, in which case the
    /// registry is left untouched.
    pub fn refresh(&self) -> Result<()> {
        let _writer = self
            .refresh_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let snapshot: HashMap<u32, ClientRef> = self
            .transport
            .clients()?
            .into_iter()
            .map(|client| (client.pid(), client))
            .collect();

        let removed: Vec<u32> = self
            .shared
            .by_pid
            .iter()
            .map(|entry| *entry.key())
            .filter(|pid| !snapshot.contains_key(pid))
            .collect();
        let has_added = snapshot
            .keys()
            .any(|pid| !self.shared.by_pid.contains_key(pid));

        // Cancel before touching the map: a legacy task that already passed its
        // cancellation check wrote against the old topology, which the
        // removals below then reconcile.
        if self.legacy && has_added {
            self.cancel_pending();
        }

        for pid in &removed {
            self.shared.by_pid.remove(pid);
        }

        let mut added = Vec::new();
        let mut replaced = 0usize;
        for (pid, client) in snapshot {
            match self.shared.by_pid.entry(pid) {
                Entry::Occupied(mut entry) => {
                    if entry.get_mut().replace_client(client) {
                        replaced += 1;
                    }
                }
                Entry::Vacant(entry) => {
                    entry.insert(Process::new(pid, client));
                    added.push(pid);
                }
            }
        }

        if !added.is_empty() || !removed.is_empty() {
            info!(
                "{}: {} processes added, {} removed, {} handles replaced",
                self.transport.serial(),
                added.len(),
                removed.len(),
                replaced
            );
        } else if replaced > 0 {
            debug!("{}: {} handles replaced", self.transport.serial(), replaced);
        }

        if !self.legacy {
            for pid in added {
                resolution::spawn_direct(&self.shared, &self.runtime, pid);
            }
        }
        Ok(())
    }

    /// Processes currently known to belong to `application_id`, by pid.
    ///
    /// Never blocks on the device. On a legacy device an empty result also
    /// starts (or joins) a background probe for `application_id`; call again
    /// later to see what it found.
    pub fn find(&self, application_id: &str) -> Vec<Process> {
        let mut found: Vec<Process> = self
            .shared
            .by_pid
            .iter()
            .filter(|entry| entry.application_id() == Some(application_id))
            .map(|entry| entry.value().clone())
            .collect();

        if found.is_empty() && self.legacy {
            self.ensure_legacy_resolution(application_id);
        }

        found.sort_by_key(Process::pid);
        found
    }

    /// Like [`find`](Self::find), but when nothing is resolved yet, falls back
    /// to unresolved processes whose transport description equals the query.
    ///
    /// The description is usually the package name, so this is a best-effort
    /// answer until resolution lands.
    pub fn find_with_name_fallback(&self, application_id: &str) -> Vec<Process> {
        let found = self.find(application_id);
        if !found.is_empty() {
            return found;
        }

        let mut guessed: Vec<Process> = self
            .shared
            .by_pid
            .iter()
            .filter(|entry| {
                !entry.is_resolved() && entry.description().as_deref() == Some(application_id)
            })
            .map(|entry| entry.value().clone())
            .collect();
        guessed.sort_by_key(Process::pid);
        guessed
    }

    /// The record currently stored for `pid`.
    pub fn get(&self, pid: u32) -> Option<Process> {
        self.shared.by_pid.get(&pid).map(|entry| entry.value().clone())
    }

    /// Snapshot of every known process, by pid.
    pub fn processes(&self) -> Vec<Process> {
        let mut processes: Vec<Process> = self
            .shared
            .by_pid
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        processes.sort_by_key(Process::pid);
        processes
    }

    pub fn len(&self) -> usize {
        self.shared.by_pid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.by_pid.is_empty()
    }

    /// Number of legacy resolutions currently in flight.
    pub fn pending_resolution_count(&self) -> usize {
        self.shared.pending.len()
    }

    /// Schedule direct resolution again for every still-unresolved process
    /// that has no resolution task running.
    ///
    /// No-op on legacy devices, where resolution is driven by `find()`.
    /// Returns the number of tasks scheduled.
    pub fn retry_unresolved(&self) -> usize {
        if self.legacy {
            return 0;
        }

        let unresolved: Vec<u32> = self
            .shared
            .by_pid
            .iter()
            .filter(|entry| !entry.is_resolved())
            .map(|entry| *entry.key())
            .filter(|pid| !self.shared.direct_in_flight.contains_key(pid))
            .collect();
        for &pid in &unresolved {
            resolution::spawn_direct(&self.shared, &self.runtime, pid);
        }
        debug!("Retrying resolution for {} processes", unresolved.len());
        unresolved.len()
    }

    /// Cancel every outstanding resolution task. Results still in flight are
    /// discarded. Also runs on drop.
    pub fn shutdown(&self) {
        self.shared.shutdown.cancel();
        self.cancel_pending();
    }

    fn cancel_pending(&self) {
        let mut cancelled = 0usize;
        self.shared.pending.retain(|_, pending| {
            pending.token.cancel();
            cancelled += 1;
            false
        });
        if cancelled > 0 {
            debug!("Cancelled {} pending legacy resolutions", cancelled);
        }
    }

    /// Start a legacy probe for `application_id` unless one is already running.
    fn ensure_legacy_resolution(&self, application_id: &str) {
        if self.shared.shutdown.is_cancelled() {
            return;
        }
        if !commands::is_valid_application_id(application_id) {
            debug!("Not probing for malformed application id {:?}", application_id);
            return;
        }

        let mut started = None;
        self.shared
            .pending
            .entry(application_id.to_string())
            .or_insert_with(|| {
                let pending = PendingResolution::new(&self.shared);
                started = Some(pending.clone());
                pending
            });

        if let Some(pending) = started {
            resolution::spawn_legacy(&self.shared, &self.runtime, application_id.to_string(), pending);
        }
    }
}

impl Drop for ProcessRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

//! Serialized dispatch of device events into `refresh()`.
//!
//! Every device callback goes through one queue drained by one task, so
//! refreshes for a device never overlap and each one sees the effect of the
//! previous one. Bursts of events are coalesced into a single refresh.

use crate::registry::ProcessRegistry;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const EVENT_QUEUE_CAPACITY: usize = 16;

/// Something changed on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    /// The transport's live-client list changed.
    ClientListChanged,
}

/// Cloneable sender side of a [`DeviceMonitor`] queue.
#[derive(Debug, Clone)]
pub struct DeviceEvents {
    tx: mpsc::Sender<DeviceEvent>,
}

impl DeviceEvents {
    /// Queue a refresh. Returns false once the monitor has stopped.
    pub fn client_list_changed(&self) -> bool {
        match self.tx.try_send(DeviceEvent::ClientListChanged) {
            Ok(()) => true,
            // A full queue already holds a refresh that will see this change.
            Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Owns the single task that runs `refresh()` for one registry.
pub struct DeviceMonitor {
    events: DeviceEvents,
    task: JoinHandle<usize>,
}

impl DeviceMonitor {
    /// Start the dispatch task on the current tokio runtime.
    pub fn spawn(registry: Arc<ProcessRegistry>) -> Self {
        let (tx, mut rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);

        let task = tokio::spawn(async move {
            let mut refreshes = 0usize;
            while let Some(event) = rx.recv().await {
                let mut coalesced = 0usize;
                while rx.try_recv().is_ok() {
                    coalesced += 1;
                }
                debug!("Dispatching {:?} (+{} coalesced)", event, coalesced);

                // A failed snapshot means no structural change this cycle.
                if let Err(e) = registry.refresh() {
                    warn!("Refresh failed, keeping previous process list: {}", e);
                    continue;
                }
                refreshes += 1;
            }
            refreshes
        });

        Self {
            events: DeviceEvents { tx },
            task,
        }
    }

    /// A sender that device callbacks can use to request a refresh.
    pub fn events(&self) -> DeviceEvents {
        self.events.clone()
    }

    /// Stop accepting events, drain the queue and wait for the task.
    ///
    /// Returns the number of successful refreshes. Other clones of
    /// [`DeviceEvents`] must be dropped first or this waits for them.
    pub async fn shutdown(self) -> usize {
        drop(self.events);
        match self.task.await {
            Ok(refreshes) => refreshes,
            Err(e) => {
                warn!("Device monitor task failed: {}", e);
                0
            }
        }
    }
}

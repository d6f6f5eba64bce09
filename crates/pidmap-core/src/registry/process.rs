//! The per-pid process record.

use crate::device::{same_client, ClientRef};
use tracing::warn;

/// One live process on the device and, once known, the application that owns it.
#[derive(Debug, Clone)]
pub struct Process {
    pid: u32,
    client: ClientRef,
    application_id: Option<String>,
}

impl Process {
    pub(crate) fn new(pid: u32, client: ClientRef) -> Self {
        Self {
            pid,
            client,
            application_id: None,
        }
    }

    /// Process id on the device.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// The transport's live handle for this process.
    pub fn client(&self) -> &ClientRef {
        &self.client
    }

    /// Resolved application identifier, if resolution has landed.
    pub fn application_id(&self) -> Option<&str> {
        self.application_id.as_deref()
    }

    pub fn is_resolved(&self) -> bool {
        self.application_id.is_some()
    }

    /// Transport-level name of the client handle.
    pub fn description(&self) -> Option<String> {
        self.client.description()
    }

    /// Swap in a new handle for the same pid. The resolved identifier is kept.
    ///
    /// Returns true if the handle actually changed.
    pub(crate) fn replace_client(&mut self, client: ClientRef) -> bool {
        if same_client(&self.client, &client) {
            return false;
        }
        self.client = client;
        true
    }

    /// Record the owning application. Last write wins.
    ///
    /// Returns true if the stored value changed.
    pub(crate) fn set_application_id(&mut self, application_id: &str) -> bool {
        match self.application_id.as_deref() {
            Some(current) if current == application_id => false,
            Some(current) => {
                // Two resolutions disagreed; usually a pid reused between probes.
                warn!(
                    "pid {} re-resolved from {} to {}",
                    self.pid, current, application_id
                );
                self.application_id = Some(application_id.to_string());
                true
            }
            None => {
                self.application_id = Some(application_id.to_string());
                true
            }
        }
    }
}

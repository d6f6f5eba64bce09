//! Device collaborator boundary.
//!
//! The registry never talks to a device directly. It reads live-client
//! snapshots through a [`DeviceTransport`] and runs resolution commands
//! through a [`ShellProbe`]. The [`adb`] module provides implementations of
//! both backed by the `adb` executable.

pub mod adb;

use crate::error::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// A live process handle owned by the device transport.
///
/// The registry keeps a non-owning clone of the handle and swaps it in place
/// when the transport reports a new handle for the same pid.
pub trait ClientHandle: Send + Sync + fmt::Debug {
    /// Process id on the device.
    fn pid(&self) -> u32;

    /// Transport-level descriptive name, often (not always) the package name.
    fn description(&self) -> Option<String>;
}

/// Shared reference to a transport-owned client handle.
pub type ClientRef = Arc<dyn ClientHandle>;

/// Returns true if both references point at the same handle allocation.
pub fn same_client(a: &ClientRef, b: &ClientRef) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Source of live-process snapshots for one device.
pub trait DeviceTransport: Send + Sync {
    /// Device serial number.
    fn serial(&self) -> &str;

    /// Platform API level, used to pick the resolution strategy.
    fn api_level(&self) -> u32;

    /// The transport's current live-client list.
    ///
    /// Must not block on device I/O; implementations serve a cached view.
    fn clients(&self) -> Result<Vec<ClientRef>>;
}

/// Runs a shell command on a device and captures its standard output.
///
/// Latency is unbounded; callers must never invoke this from a
/// latency-sensitive thread.
#[async_trait]
pub trait ShellProbe: Send + Sync {
    async fn execute(&self, command: &str) -> Result<String>;
}

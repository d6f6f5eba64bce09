//! pidmap core - maps a device's running processes to the applications that own them.
//!
//! A [`ProcessRegistry`] mirrors a device's live-process list (fed by
//! [`ProcessRegistry::refresh`]) and answers "which processes belong to this
//! application?" through [`ProcessRegistry::find`] without ever waiting on
//! the device. Ownership is discovered in the background by shell probes:
//!
//! - **Direct** (API 26+): each new pid's owner uid is read from
//!   `/proc/<pid>/status` and mapped to the first package owned by that uid.
//! - **Legacy**: `find()` for an unknown application runs a `run-as` pipeline
//!   that reports the application's managed-runtime pids.
//!
//! # Example
//!
//! ```rust,no_run
//! use pidmap_core::device::adb::{AdbDevice, AdbShell};
//! use pidmap_core::{DeviceMonitor, ProcessRegistry, RegistryConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> pidmap_core::Result<()> {
//!     let config = RegistryConfig::default();
//!     let shell = Arc::new(AdbShell::new("adb", "emulator-5554"));
//!     let device = Arc::new(AdbDevice::connect(shell.clone(), config.probe_timeout()).await?);
//!     device.poll().await?;
//!
//!     let registry = Arc::new(ProcessRegistry::new(device, shell, config)?);
//!     let monitor = DeviceMonitor::spawn(registry.clone());
//!     monitor.events().client_list_changed();
//!
//!     // Later, from any thread:
//!     for process in registry.find("com.example.app") {
//!         println!("pid {}", process.pid());
//!     }
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod config;
pub mod device;
pub mod error;
pub mod monitor;
pub mod probe;
pub mod registry;

pub use cancel::{CancellationToken, CancelledError};
pub use config::{ProbeConfig, RegistryConfig};
pub use device::{ClientHandle, ClientRef, DeviceTransport, ShellProbe};
pub use error::{PidmapError, Result};
pub use monitor::{DeviceEvent, DeviceEvents, DeviceMonitor};
pub use probe::ProbeOutcome;
pub use registry::{Process, ProcessRegistry};

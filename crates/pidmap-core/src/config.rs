//! Centralized configuration for pidmap.
//!
//! Fixed probe vocabulary lives in [`ProbeConfig`]; tunables for one registry
//! instance live in [`RegistryConfig`].

use crate::error::{PidmapError, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Shell probe vocabulary and protocol constants.
pub struct ProbeConfig;

impl ProbeConfig {
    /// First API level with direct pid -> owner-uid introspection (Android O).
    pub const FIRST_DIRECT_API_LEVEL: u32 = 26;

    // Direct probe commands
    pub const PROC_ROOT: &'static str = "/proc";
    pub const PACKAGES_FOR_UID_COMMAND: &'static str = "cmd package list packages --uid";

    // Line prefixes
    pub const UID_LINE_PREFIX: &'static str = "Uid:";
    pub const PACKAGE_LINE_PREFIX: &'static str = "package:";
    pub const PROCESS_TABLE_HEADER_PREFIX: &'static str = "idx";
    pub const LEGACY_PROCESS_TABLE_HEADER_PREFIX: &'static str = "USER";

    /// Managed-runtime launcher binaries a legacy app process execs from.
    pub const APP_PROCESS_LAUNCHERS: [&'static str; 3] = [
        "/system/bin/app_process",
        "/system/bin/app_process32",
        "/system/bin/app_process64",
    ];

    /// Emits the live process table as `idx pid uid name` rows. Needs the
    /// toybox `ps` that ships from Android O.
    pub const PROCESS_TABLE_COMMAND: &'static str = "echo idx PID UID NAME; \
         ps -A -o PID=,UID=,NAME= | { i=0; while read -r line; do i=$((i+1)); echo \"$i $line\"; done; }";

    /// Pre-O toolbox `ps`: lists every process with a `USER PID ... NAME` header.
    pub const LEGACY_PROCESS_TABLE_COMMAND: &'static str = "ps";

    // Android uid layout
    pub const PER_USER_UID_RANGE: u32 = 100_000;
    pub const FIRST_APPLICATION_UID: u32 = 10_000;
    pub const FIRST_ISOLATED_UID: u32 = 99_000;

    /// Fixed system user names as printed by `ps`.
    pub const SYSTEM_USER_IDS: [(&'static str, u32); 12] = [
        ("root", 0),
        ("system", 1000),
        ("radio", 1001),
        ("bluetooth", 1002),
        ("graphics", 1003),
        ("audio", 1005),
        ("camera", 1006),
        ("media", 1013),
        ("keystore", 1017),
        ("drm", 1019),
        ("shell", 2000),
        ("nobody", 9999),
    ];

    pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);
    pub const DEFAULT_MAX_CONCURRENT_PROBES: usize = 4;
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
}

/// Configuration for one [`ProcessRegistry`](crate::ProcessRegistry).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Upper bound on probes running at the same time.
    pub max_concurrent_probes: usize,
    /// Per-command probe timeout in milliseconds.
    pub probe_timeout_ms: u64,
    /// Force the legacy (run-as) resolution path on or off.
    ///
    /// When `None`, the device's API level decides.
    pub legacy: Option<bool>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_concurrent_probes: ProbeConfig::DEFAULT_MAX_CONCURRENT_PROBES,
            probe_timeout_ms: ProbeConfig::DEFAULT_PROBE_TIMEOUT.as_millis() as u64,
            legacy: None,
        }
    }
}

impl RegistryConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the worker pool size.
    pub fn with_max_concurrent_probes(mut self, probes: usize) -> Self {
        self.max_concurrent_probes = probes;
        self
    }

    /// Set the per-command probe timeout.
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Force the legacy resolution path on or off.
    pub fn with_legacy(mut self, legacy: bool) -> Self {
        self.legacy = Some(legacy);
        self
    }

    /// Probe timeout as a [`Duration`].
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Decide whether a device at `api_level` uses the legacy path.
    pub fn is_legacy(&self, api_level: u32) -> bool {
        self.legacy
            .unwrap_or(api_level < ProbeConfig::FIRST_DIRECT_API_LEVEL)
    }

    /// Reject values that would stall resolution entirely.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_probes == 0 {
            return Err(PidmapError::Config {
                message: "max_concurrent_probes must be at least 1".to_string(),
            });
        }
        if self.probe_timeout_ms == 0 {
            return Err(PidmapError::Config {
                message: "probe_timeout_ms must be greater than 0".to_string(),
            });
        }
        Ok(())
    }

    /// Load and validate a JSON config file. Missing fields take defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| PidmapError::Config {
            message: format!("Failed to read {}: {}", path.display(), e),
        })?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }
}

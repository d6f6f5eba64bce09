//! `adb`-backed device collaborators.
//!
//! [`AdbShell`] runs probe commands through `adb -s <serial> shell`.
//! [`AdbDevice`] polls the device's process table through that shell and
//! serves the last parsed snapshot as its live-client list.

use super::{ClientHandle, ClientRef, DeviceTransport, ShellProbe};
use crate::cancel::CancellationToken;
use crate::config::ProbeConfig;
use crate::error::{PidmapError, Result};
use crate::monitor::DeviceEvents;
use crate::probe::{self, parse, ProbeOutcome};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Runs shell commands on one device through the `adb` executable.
#[derive(Debug, Clone)]
pub struct AdbShell {
    adb: PathBuf,
    serial: String,
}

impl AdbShell {
    /// Create a shell for `serial` using the given `adb` executable.
    pub fn new(adb: impl Into<PathBuf>, serial: impl Into<String>) -> Self {
        Self {
            adb: adb.into(),
            serial: serial.into(),
        }
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }
}

#[async_trait]
impl ShellProbe for AdbShell {
    async fn execute(&self, command: &str) -> Result<String> {
        let output = Command::new(&self.adb)
            .args(["-s", self.serial.as_str(), "shell", command])
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| PidmapError::Transport {
                message: format!("Failed to run {}: {}", self.adb.display(), e),
            })?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if stderr.contains("not found") && stderr.contains(&self.serial) {
            return Err(PidmapError::DeviceDisconnected {
                serial: self.serial.clone(),
            });
        }
        Err(PidmapError::CommandFailed {
            command: command.to_string(),
            status: output.status.code(),
            stderr,
        })
    }
}

/// A process observed in the device's process table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellClient {
    pub pid: u32,
    pub uid: Option<u32>,
    pub name: String,
}

impl ClientHandle for ShellClient {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn description(&self) -> Option<String> {
        Some(self.name.clone())
    }
}

/// Device transport that polls the process table over a shell.
pub struct AdbDevice {
    shell: Arc<dyn ShellProbe>,
    serial: String,
    api_level: u32,
    probe_timeout: Duration,
    snapshot: RwLock<HashMap<u32, Arc<ShellClient>>>,
}

impl AdbDevice {
    /// Query the device's API level and build an (empty) transport.
    ///
    /// Call [`poll`](Self::poll) to load the first snapshot.
    pub async fn connect(shell: Arc<AdbShell>, probe_timeout: Duration) -> Result<Self> {
        let api_level = match probe::run(&*shell, "getprop ro.build.version.sdk", probe_timeout).await {
            ProbeOutcome::Resolved(output) => output
                .trim()
                .parse::<u32>()
                .map_err(|_| PidmapError::parse("API level", output.trim()))?,
            ProbeOutcome::Empty => {
                return Err(PidmapError::parse("API level", ""));
            }
            ProbeOutcome::Failed(e) => return Err(e),
        };

        info!("Connected to {} (API level {})", shell.serial(), api_level);
        let serial = shell.serial().to_string();
        Ok(Self::new(serial, shell, api_level, probe_timeout))
    }

    /// Build a transport for a device whose API level is already known.
    pub fn new(
        serial: impl Into<String>,
        shell: Arc<dyn ShellProbe>,
        api_level: u32,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            shell,
            serial: serial.into(),
            api_level,
            probe_timeout,
            snapshot: RwLock::new(HashMap::new()),
        }
    }

    /// Pre-O devices only have the toolbox `ps`.
    fn has_toolbox_ps(&self) -> bool {
        self.api_level < ProbeConfig::FIRST_DIRECT_API_LEVEL
    }

    /// Re-read the process table and return whether the live set changed.
    ///
    /// Handles for processes whose pid and name are unchanged are kept, so
    /// an unchanged process keeps its handle identity across polls. A table
    /// without a single process row is an error and leaves the snapshot as
    /// it was.
    pub async fn poll(&self) -> Result<bool> {
        let command = if self.has_toolbox_ps() {
            ProbeConfig::LEGACY_PROCESS_TABLE_COMMAND
        } else {
            ProbeConfig::PROCESS_TABLE_COMMAND
        };

        let rows = match probe::run(&*self.shell, command, self.probe_timeout).await {
            ProbeOutcome::Resolved(output) if self.has_toolbox_ps() => {
                parse::parse_legacy_process_table(&output)
            }
            ProbeOutcome::Resolved(output) => parse::parse_process_table(&output),
            ProbeOutcome::Empty => Vec::new(),
            ProbeOutcome::Failed(e) => return Err(e),
        };

        // init is always running, so no rows means `ps` itself failed.
        if rows.is_empty() {
            return Err(PidmapError::Transport {
                message: format!("{}: process table has no rows", self.serial),
            });
        }
        self.apply_rows(rows)
    }

    fn apply_rows(&self, rows: Vec<parse::ProcessRow>) -> Result<bool> {
        let mut snapshot = self
            .snapshot
            .write()
            .map_err(|_| PidmapError::Other("process snapshot lock poisoned".to_string()))?;

        let mut next = HashMap::with_capacity(rows.len());
        let mut changed = false;
        for row in rows {
            let client = match snapshot.get(&row.pid) {
                Some(existing) if existing.name == row.name && existing.uid == row.uid => existing.clone(),
                _ => {
                    changed = true;
                    Arc::new(ShellClient {
                        pid: row.pid,
                        uid: row.uid,
                        name: row.name,
                    })
                }
            };
            next.insert(client.pid, client);
        }
        changed |= snapshot.keys().any(|pid| !next.contains_key(pid));

        if changed {
            debug!("{}: process table now has {} entries", self.serial, next.len());
        }
        *snapshot = next;
        Ok(changed)
    }
}

impl DeviceTransport for AdbDevice {
    fn serial(&self) -> &str {
        &self.serial
    }

    fn api_level(&self) -> u32 {
        self.api_level
    }

    fn clients(&self) -> Result<Vec<ClientRef>> {
        let snapshot = self
            .snapshot
            .read()
            .map_err(|_| PidmapError::Other("process snapshot lock poisoned".to_string()))?;
        Ok(snapshot
            .values()
            .map(|client| client.clone() as ClientRef)
            .collect())
    }
}

/// Poll `device` every `interval` and emit a device event whenever the live
/// process set changes. Stops when `token` is cancelled or the event queue
/// closes.
pub fn watch(
    device: Arc<AdbDevice>,
    events: DeviceEvents,
    interval: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match device.poll().await {
                Ok(true) => {
                    if !events.client_list_changed() {
                        debug!("Event queue closed, stopping poller for {}", device.serial());
                        break;
                    }
                }
                Ok(false) => {}
                Err(e) => warn!("Failed to poll {}: {}", device.serial(), e),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parse::ProcessRow;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Answers each call with the next queued output and records the command.
    #[derive(Default)]
    struct QueuedShell {
        outputs: Mutex<VecDeque<Result<String>>>,
        commands: Mutex<Vec<String>>,
    }

    impl QueuedShell {
        fn with_outputs(outputs: &[&str]) -> Arc<Self> {
            let shell = Self::default();
            shell
                .outputs
                .lock()
                .unwrap()
                .extend(outputs.iter().map(|output| Ok(output.to_string())));
            Arc::new(shell)
        }
    }

    #[async_trait]
    impl ShellProbe for QueuedShell {
        async fn execute(&self, command: &str) -> Result<String> {
            self.commands.lock().unwrap().push(command.to_string());
            self.outputs
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(PidmapError::Other("no output queued".to_string())))
        }
    }

    const DIRECT_TABLE: &str = "idx PID UID NAME\n1 1 0 init\n2 4242 10123 com.example.app\n";
    const LEGACY_TABLE: &str = "USER     PID   PPID  VSIZE  RSS     WCHAN    PC         NAME\n\
        root      1     0     8904   784   ffffffff 00000000 S /init\n\
        u0_a123   4242  198   998877 41000 ffffffff 00000000 S com.example.app\n";

    fn row(pid: u32, uid: u32, name: &str) -> ProcessRow {
        ProcessRow { pid, uid: Some(uid), name: name.to_string() }
    }

    fn device() -> AdbDevice {
        AdbDevice::new(
            "emulator-5554",
            Arc::new(AdbShell::new("adb", "emulator-5554")),
            30,
            Duration::from_secs(1),
        )
    }

    fn scripted_device(shell: &Arc<QueuedShell>, api_level: u32) -> AdbDevice {
        AdbDevice::new("emulator-5554", shell.clone(), api_level, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_poll_with_header_only_keeps_snapshot() {
        let shell = QueuedShell::with_outputs(&[DIRECT_TABLE, "idx PID UID NAME\n"]);
        let device = scripted_device(&shell, 30);

        assert!(device.poll().await.unwrap());
        assert_eq!(device.clients().unwrap().len(), 2);

        // `ps` failed after the header was echoed.
        let err = device.poll().await.unwrap_err();
        assert!(matches!(err, PidmapError::Transport { .. }));
        assert_eq!(device.clients().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_poll_with_no_output_keeps_snapshot() {
        let shell = QueuedShell::with_outputs(&[DIRECT_TABLE, ""]);
        let device = scripted_device(&shell, 30);

        device.poll().await.unwrap();
        assert!(device.poll().await.is_err());
        assert_eq!(device.clients().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_poll_uses_toybox_table_on_current_devices() {
        let shell = QueuedShell::with_outputs(&[DIRECT_TABLE, DIRECT_TABLE]);
        let device = scripted_device(&shell, 30);

        assert!(device.poll().await.unwrap());
        assert!(!device.poll().await.unwrap());
        assert_eq!(
            shell.commands.lock().unwrap().as_slice(),
            [ProbeConfig::PROCESS_TABLE_COMMAND, ProbeConfig::PROCESS_TABLE_COMMAND]
        );
    }

    #[tokio::test]
    async fn test_poll_uses_plain_ps_on_legacy_devices() {
        let shell = QueuedShell::with_outputs(&[LEGACY_TABLE]);
        let device = scripted_device(&shell, 23);

        assert!(device.poll().await.unwrap());
        assert_eq!(
            shell.commands.lock().unwrap().as_slice(),
            [ProbeConfig::LEGACY_PROCESS_TABLE_COMMAND]
        );

        let mut clients = device.clients().unwrap();
        clients.sort_by_key(|client| client.pid());
        assert_eq!(clients.len(), 2);
        assert_eq!(clients[1].pid(), 4242);
        assert_eq!(clients[1].description().as_deref(), Some("com.example.app"));
    }

    #[tokio::test]
    async fn test_poll_rejects_legacy_ps_error_output() {
        let shell = QueuedShell::with_outputs(&["bad pid '-A'\n"]);
        let device = scripted_device(&shell, 23);

        assert!(device.poll().await.is_err());
        assert!(device.clients().unwrap().is_empty());
    }

    #[test]
    fn test_apply_rows_reports_changes() {
        let device = device();
        assert!(device.apply_rows(vec![row(100, 10100, "com.a"), row(200, 10200, "com.b")]).unwrap());
        assert!(!device.apply_rows(vec![row(200, 10200, "com.b"), row(100, 10100, "com.a")]).unwrap());
        assert!(device.apply_rows(vec![row(100, 10100, "com.a")]).unwrap());
        assert_eq!(device.clients().unwrap().len(), 1);
    }

    #[test]
    fn test_unchanged_process_keeps_handle() {
        let device = device();
        device.apply_rows(vec![row(100, 10100, "com.a")]).unwrap();
        let before = device.clients().unwrap().pop().unwrap();

        device.apply_rows(vec![row(100, 10100, "com.a"), row(300, 0, "sh")]).unwrap();
        let after = device
            .clients()
            .unwrap()
            .into_iter()
            .find(|c| c.pid() == 100)
            .unwrap();
        assert!(crate::device::same_client(&before, &after));

        device.apply_rows(vec![row(100, 10100, "com.a:remote")]).unwrap();
        let replaced = device.clients().unwrap().pop().unwrap();
        assert!(!crate::device::same_client(&before, &replaced));
        assert_eq!(replaced.description().as_deref(), Some("com.a:remote"));
    }

    #[test]
    fn test_transport_metadata() {
        let device = device();
        assert_eq!(device.serial(), "emulator-5554");
        assert_eq!(device.api_level(), 30);
        assert!(device.clients().unwrap().is_empty());
    }
}

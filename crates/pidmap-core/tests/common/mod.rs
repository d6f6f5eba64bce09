//! Scripted device doubles shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use pidmap_core::probe::commands;
use pidmap_core::{ClientHandle, ClientRef, DeviceTransport, PidmapError, Result, ShellProbe};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

pub const LEGACY_API_LEVEL: u32 = 23;
pub const DIRECT_API_LEVEL: u32 = 30;

#[derive(Debug)]
pub struct FakeClient {
    pub pid: u32,
    pub name: String,
    pub generation: u64,
}

impl ClientHandle for FakeClient {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn description(&self) -> Option<String> {
        Some(self.name.clone())
    }
}

/// In-memory transport whose live set is replaced wholesale by the test.
///
/// Every `set_*` call hands out fresh handles, so surviving pids always see
/// a handle change.
pub struct FakeTransport {
    api_level: u32,
    clients: Mutex<Vec<ClientRef>>,
    generation: AtomicU64,
    fail: AtomicBool,
}

impl FakeTransport {
    pub fn new(api_level: u32) -> Arc<Self> {
        Arc::new(Self {
            api_level,
            clients: Mutex::new(Vec::new()),
            generation: AtomicU64::new(0),
            fail: AtomicBool::new(false),
        })
    }

    pub fn set_pids(&self, pids: &[u32]) {
        let clients: Vec<(u32, String)> = pids.iter().map(|&pid| (pid, format!("proc-{pid}"))).collect();
        self.set_named(clients);
    }

    pub fn set_clients(&self, clients: &[(u32, &str)]) {
        self.set_named(clients.iter().map(|&(pid, name)| (pid, name.to_string())).collect());
    }

    fn set_named(&self, clients: Vec<(u32, String)>) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.clients.lock().unwrap() = clients
            .into_iter()
            .map(|(pid, name)| Arc::new(FakeClient { pid, name, generation }) as ClientRef)
            .collect();
    }

    pub fn fail_snapshots(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl DeviceTransport for FakeTransport {
    fn serial(&self) -> &str {
        "fake-device"
    }

    fn api_level(&self) -> u32 {
        self.api_level
    }

    fn clients(&self) -> Result<Vec<ClientRef>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PidmapError::DeviceDisconnected {
                serial: "fake-device".to_string(),
            });
        }
        Ok(self.clients.lock().unwrap().clone())
    }
}

/// Shell probe answering from a command -> output table.
///
/// Unknown commands fail like a rejected shell command. A gated probe holds
/// every call until [`release`](Self::release).
pub struct ScriptedProbe {
    replies: Mutex<HashMap<String, String>>,
    calls: Mutex<Vec<String>>,
    gate: Semaphore,
}

impl ScriptedProbe {
    pub fn new() -> Arc<Self> {
        let probe = Self::gated();
        probe.release();
        probe
    }

    pub fn gated() -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            gate: Semaphore::new(0),
        })
    }

    /// Let every held and future call through.
    pub fn release(&self) {
        self.gate.close();
    }

    pub fn reply(&self, command: impl Into<String>, output: &str) {
        self.replies
            .lock()
            .unwrap()
            .insert(command.into(), output.to_string());
    }

    /// Script a direct resolution: `pid` is owned by `uid`, which owns `package`.
    pub fn reply_direct(&self, pid: u32, uid: u32, package: &str) {
        self.reply(
            commands::status_command(pid),
            &format!("Name:\t{package}\nPid:\t{pid}\nUid:\t{uid}\t{uid}\t{uid}\t{uid}\n"),
        );
        self.reply(
            commands::packages_for_uid_command(uid),
            &format!("package:{package} uid:{uid}\n"),
        );
    }

    /// Script a legacy resolution: `application_id` reports `pids`.
    pub fn reply_legacy(&self, application_id: &str, pids: &[u32]) {
        let output: String = pids.iter().map(|pid| format!("{pid}\n")).collect();
        self.reply(legacy_command(application_id), &output);
    }

    pub fn calls_to(&self, command: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.as_str() == command)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ShellProbe for ScriptedProbe {
    async fn execute(&self, command: &str) -> Result<String> {
        self.calls.lock().unwrap().push(command.to_string());
        // Resolves with an error once the gate is closed.
        let _ = self.gate.acquire().await;

        self.replies
            .lock()
            .unwrap()
            .get(command)
            .cloned()
            .ok_or_else(|| PidmapError::CommandFailed {
                command: command.to_string(),
                status: Some(1),
                stderr: "inaccessible or not found".to_string(),
            })
    }
}

pub fn legacy_command(application_id: &str) -> String {
    commands::legacy_pids_command(application_id).unwrap()
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Give background tasks a moment to (not) do something.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

//! Parsers for shell probe output.
//!
//! Every parser is line-oriented and lenient: a malformed line is skipped,
//! never fatal. An output with no valid line parses to "nothing".

use crate::config::ProbeConfig;
use tracing::debug;

/// One live process read from a process table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRow {
    pub pid: u32,
    /// `None` when the table only named the owner and the name has no
    /// well-known uid.
    pub uid: Option<u32>,
    pub name: String,
}

/// Extract the real uid from `/proc/<pid>/status` output.
///
/// Matches the first line whose leading token is `Uid:` and reads the second
/// whitespace-delimited token.
pub fn parse_uid_from_status(output: &str) -> Option<u32> {
    output.lines().find_map(|line| {
        let mut tokens = line.split_whitespace();
        if tokens.next() != Some(ProbeConfig::UID_LINE_PREFIX) {
            return None;
        }
        match tokens.next().map(str::parse::<u32>) {
            Some(Ok(uid)) => Some(uid),
            _ => {
                debug!("Skipping malformed status line: {:?}", line);
                None
            }
        }
    })
}

/// First application identifier from `cmd package list packages` output.
///
/// Lines look like `package:com.example.app uid:10123`; anything without the
/// `package:` prefix is skipped.
pub fn parse_first_package(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let rest = line.trim().strip_prefix(ProbeConfig::PACKAGE_LINE_PREFIX)?;
        rest.split_whitespace().next().map(str::to_string)
    })
}

/// Decimal pids, one per line, in output order without duplicates.
pub fn parse_pids(output: &str) -> Vec<u32> {
    let mut pids = Vec::new();
    for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        match line.parse::<u32>() {
            Ok(pid) if !pids.contains(&pid) => pids.push(pid),
            Ok(_) => {}
            Err(_) => debug!("Skipping non-numeric pid line: {:?}", line),
        }
    }
    pids
}

/// Parse the process table emitted by [`ProbeConfig::PROCESS_TABLE_COMMAND`].
///
/// The `idx` header row is skipped; remaining rows are read positionally as
/// `idx pid uid name`.
pub fn parse_process_table(output: &str) -> Vec<ProcessRow> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.starts_with(ProbeConfig::PROCESS_TABLE_HEADER_PREFIX))
        .filter_map(|line| {
            let row = parse_process_row(line);
            if row.is_none() {
                debug!("Skipping malformed process row: {:?}", line);
            }
            row
        })
        .collect()
}

fn parse_process_row(line: &str) -> Option<ProcessRow> {
    let mut columns = line.split_whitespace();
    columns.next()?.parse::<u32>().ok()?;
    let pid = columns.next()?.parse().ok()?;
    let uid = Some(columns.next()?.parse().ok()?);
    let name = columns.next()?.to_string();
    Some(ProcessRow { pid, uid, name })
}

/// Parse plain `ps` output from a pre-O (toolbox) device.
///
/// The header row locates the `PID` column; the owner is the first column
/// and the process name the last. Rows before the header are ignored.
pub fn parse_legacy_process_table(output: &str) -> Vec<ProcessRow> {
    let mut lines = output.lines().map(str::trim).filter(|line| !line.is_empty());
    let Some(pid_column) = lines.by_ref().find_map(|line| {
        let mut header = line.split_whitespace();
        if header.next() != Some(ProbeConfig::LEGACY_PROCESS_TABLE_HEADER_PREFIX) {
            return None;
        }
        header.position(|column| column == "PID").map(|i| i + 1)
    }) else {
        debug!("No header in legacy process table");
        return Vec::new();
    };

    lines
        .filter_map(|line| {
            let row = parse_legacy_process_row(line, pid_column);
            if row.is_none() {
                debug!("Skipping malformed process row: {:?}", line);
            }
            row
        })
        .collect()
}

fn parse_legacy_process_row(line: &str, pid_column: usize) -> Option<ProcessRow> {
    let columns: Vec<&str> = line.split_whitespace().collect();
    if columns.len() <= pid_column {
        return None;
    }
    let pid = columns[pid_column].parse().ok()?;
    let name = columns.last()?.to_string();
    Some(ProcessRow {
        pid,
        uid: uid_for_user_name(columns[0]),
        name,
    })
}

/// Map an Android user name as printed by `ps` to its uid.
///
/// Handles numeric names, per-user app ids (`u0_a52`, `u10_i3`) and the
/// fixed system ids; anything else is unknown.
pub fn uid_for_user_name(user: &str) -> Option<u32> {
    if let Ok(uid) = user.parse() {
        return Some(uid);
    }

    if let Some((user_id, app)) = user.strip_prefix('u').and_then(|rest| rest.split_once('_')) {
        let user_id: u32 = user_id.parse().ok()?;
        let (base, app_id) = match app.split_at_checked(1)? {
            ("a", id) => (ProbeConfig::FIRST_APPLICATION_UID, id),
            ("i", id) => (ProbeConfig::FIRST_ISOLATED_UID, id),
            _ => return None,
        };
        let app_id: u32 = app_id.parse().ok()?;
        return Some(user_id * ProbeConfig::PER_USER_UID_RANGE + base + app_id);
    }

    ProbeConfig::SYSTEM_USER_IDS
        .iter()
        .find(|(name, _)| *name == user)
        .map(|&(_, uid)| uid)
}

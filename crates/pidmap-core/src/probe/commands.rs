//! Shell command builders for the resolution probes.

use crate::config::ProbeConfig;
use crate::error::{PidmapError, Result};

/// Reads the kernel status record of a process (contains the `Uid:` line).
pub fn status_command(pid: u32) -> String {
    format!("cat {}/{}/status", ProbeConfig::PROC_ROOT, pid)
}

/// Lists installed packages owned by a uid.
pub fn packages_for_uid_command(uid: u32) -> String {
    format!("{} {}", ProbeConfig::PACKAGES_FOR_UID_COMMAND, uid)
}

/// Legacy pipeline: runs as the application's own uid and prints each pid
/// owned by that uid whose executable is a managed-runtime launcher.
///
/// Uids are read from the `Uid:` line of `/proc/<pid>/status` with shell
/// builtins; the only external tool used is `readlink`. Pre-M toolbox
/// builds may lack `id -u` and `stat -c`.
///
/// Fails if `application_id` is not a plain package name, so the identifier
/// can be embedded in the command without quoting.
pub fn legacy_pids_command(application_id: &str) -> Result<String> {
    if !is_valid_application_id(application_id) {
        return Err(PidmapError::Validation {
            field: "application_id",
            message: format!("{:?} is not a package name", application_id),
        });
    }

    let launchers = ProbeConfig::APP_PROCESS_LAUNCHERS.join("|");
    Ok(format!(
        "run-as {app} sh -c '\
         owner() {{ o=; while read -r k v _; do [ \"$k\" = {uid_prefix} ] && o=$v && break; done; echo $o; }}; \
         uid=$(owner < /proc/self/status); \
         for p in {proc}/[0-9]*; do \
         [ \"$(owner 2>/dev/null < $p/status)\" = \"$uid\" ] || continue; \
         case \"$(readlink $p/exe 2>/dev/null)\" in {launchers}) echo ${{p#{proc}/}};; esac; \
         done'",
        app = application_id,
        uid_prefix = ProbeConfig::UID_LINE_PREFIX,
        proc = ProbeConfig::PROC_ROOT,
        launchers = launchers,
    ))
}

/// Package names are dot-separated segments of ASCII letters, digits and `_`.
pub fn is_valid_application_id(application_id: &str) -> bool {
    !application_id.is_empty()
        && application_id.split('.').all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_commands() {
        assert_eq!(status_command(300), "cat /proc/300/status");
        assert_eq!(
            packages_for_uid_command(10123),
            "cmd package list packages --uid 10123"
        );
    }

    #[test]
    fn test_legacy_command_embeds_app_and_launchers() {
        let command = legacy_pids_command("com.example.app").unwrap();
        assert!(command.starts_with("run-as com.example.app sh -c '"));
        assert!(command.contains("/system/bin/app_process|/system/bin/app_process32|/system/bin/app_process64)"));
        assert!(command.contains("echo ${p#/proc/}"));
        assert!(command.ends_with("done'"));
    }

    #[test]
    fn test_legacy_command_reads_uids_from_proc_status() {
        let command = legacy_pids_command("com.example.app").unwrap();
        assert!(command.contains("< /proc/self/status"));
        assert!(command.contains("= Uid: ]"));
        assert!(!command.contains("id -u"));
        assert!(!command.contains("stat -c"));
    }

    #[test]
    fn test_legacy_command_rejects_shell_syntax() {
        assert!(legacy_pids_command("com.example.app; reboot").is_err());
        assert!(legacy_pids_command("com.example.'app").is_err());
        assert!(legacy_pids_command("").is_err());
    }

    #[test]
    fn test_is_valid_application_id() {
        assert!(is_valid_application_id("com.example.app"));
        assert!(is_valid_application_id("com.example.my_app2"));
        assert!(!is_valid_application_id("com..example"));
        assert!(!is_valid_application_id(".com.example"));
        assert!(!is_valid_application_id("com.example.app:remote"));
        assert!(!is_valid_application_id("com example"));
    }
}

//! Pre-flight checks for mbsniff
//!
//! Validates that every target exists and that this process is allowed to
//! ptrace it before any tracer thread is started.

#![allow(unsafe_code)] // geteuid() requires unsafe

use anyhow::{bail, Result};
use std::path::Path;

use crate::domain::Pid;

const PTRACE_SCOPE_PATH: &str = "/proc/sys/kernel/yama/ptrace_scope";

/// Run all pre-flight checks for the given targets
pub fn run_preflight_checks(pids: &[Pid]) -> Result<()> {
    for &pid in pids {
        check_process_exists(pid)?;
    }
    check_ptrace_permission()
}

/// Check if the target process exists
pub fn check_process_exists(pid: Pid) -> Result<()> {
    let proc_path = format!("/proc/{}", pid.0);
    if !Path::new(&proc_path).exists() {
        bail!(
            "Process {} not found.\n\n\
             Is the process still running? Check with: ps -p {}",
            pid.0,
            pid.0
        );
    }
    Ok(())
}

/// Check that the Yama LSM (if present) lets us attach to non-children
fn check_ptrace_permission() -> Result<()> {
    if unsafe { libc::geteuid() } == 0 {
        return Ok(());
    }

    // No Yama: classic ptrace rules (same uid) apply
    let Ok(scope) = std::fs::read_to_string(PTRACE_SCOPE_PATH) else {
        return Ok(());
    };

    check_ptrace_scope(scope.trim())
}

fn check_ptrace_scope(scope: &str) -> Result<()> {
    match scope {
        "0" => Ok(()),
        "1" => bail!(
            "Permission denied: {PTRACE_SCOPE_PATH} is 1, only descendants can be traced.\n\n\
             Run with: sudo mbsniff ...\n\
             or relax it with: echo 0 | sudo tee {PTRACE_SCOPE_PATH}"
        ),
        "2" => bail!(
            "Permission denied: {PTRACE_SCOPE_PATH} is 2, tracing requires CAP_SYS_PTRACE.\n\n\
             Run with: sudo mbsniff ..."
        ),
        "3" => bail!("Permission denied: {PTRACE_SCOPE_PATH} is 3, ptrace attach is disabled until reboot"),
        // Unknown future values: let attach report the real error
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_not_found() {
        let result = check_process_exists(Pid(999_999_999));
        assert!(result.is_err());
        let err = result.unwrap_err().to_string();
        assert!(err.contains("not found"));
    }

    #[test]
    #[allow(clippy::cast_possible_wrap)]
    fn test_own_process_exists() {
        assert!(check_process_exists(Pid(std::process::id() as i32)).is_ok());
    }

    #[test]
    fn test_ptrace_scope_values() {
        assert!(check_ptrace_scope("0").is_ok());
        assert!(check_ptrace_scope("7").is_ok());
        let err = check_ptrace_scope("1").unwrap_err().to_string();
        assert!(err.starts_with("Permission denied"));
        assert!(check_ptrace_scope("2").is_err());
        assert!(check_ptrace_scope("3").is_err());
    }
}

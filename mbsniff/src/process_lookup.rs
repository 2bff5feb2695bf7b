//! Resolve trace targets given as a PID or a process name.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

use crate::domain::Pid;

/// Result of process lookup.
#[derive(Debug)]
pub struct ProcessInfo {
    pub pid: Pid,
    pub command: String,
}

/// Turn a command-line target into a PID.
///
/// Numeric arguments are taken as PIDs; anything else is looked up by name.
///
/// # Errors
/// Returns an error if a name matches no process or more than one.
pub fn resolve_target(target: &str) -> Result<Pid> {
    if let Ok(pid) = target.parse::<i32>() {
        return Ok(Pid(pid));
    }

    let info = find_process_by_name(target)?;
    log::debug!("Detected PID of process {target}: {}", info.pid);
    Ok(info.pid)
}

/// Find a process by name.
///
/// Searches `/proc` for processes whose command name (from `/proc/<pid>/stat`)
/// or executable basename (from `/proc/<pid>/exe`) equals `name`.
///
/// # Errors
/// - No processes found
/// - Multiple processes found (ambiguous)
pub fn find_process_by_name(name: &str) -> Result<ProcessInfo> {
    let mut matches: Vec<ProcessInfo> = Vec::new();

    let proc_dir = fs::read_dir("/proc").context("Failed to read /proc")?;

    for entry in proc_dir.flatten() {
        let file_name = entry.file_name();
        let Ok(pid) = file_name.to_string_lossy().parse::<i32>() else {
            continue;
        };

        let Ok(stat_content) = fs::read_to_string(format!("/proc/{pid}/stat")) else {
            continue;
        };

        let Ok(command) = extract_comm(&stat_content) else {
            continue;
        };

        // Kernel threads and foreign processes may hide their exe link.
        let exe_path = fs::read_link(format!("/proc/{pid}/exe")).ok();

        if is_match(&command, exe_path.as_deref(), name) {
            matches.push(ProcessInfo { pid: Pid(pid), command });
        }
    }

    match matches.len() {
        0 => bail!(
            "No process matching '{name}' found.\n\
             Check running processes with: ps aux | grep {name}"
        ),
        1 => Ok(matches.remove(0)),
        _ => {
            let list: Vec<String> =
                matches.iter().map(|m| format!("  {} ({})", m.pid.0, m.command)).collect();
            bail!(
                "Multiple processes match '{name}':\n{}\n\n\
                 Specify the PID explicitly instead",
                list.join("\n")
            )
        }
    }
}

/// Extract command name from `/proc/<pid>/stat`.
/// Format: "pid (comm) state ..."
fn extract_comm(stat_line: &str) -> Result<String> {
    let open = stat_line.find('(').context("Invalid stat format")?;
    let close = stat_line.rfind(')').context("Invalid stat format")?;
    if open >= close {
        bail!("Invalid stat format");
    }
    Ok(stat_line[open + 1..close].to_string())
}

fn is_match(command: &str, exe_path: Option<&Path>, name: &str) -> bool {
    let exe_basename = exe_path.and_then(|p| p.file_name()).and_then(|n| n.to_str());
    command == name || exe_basename == Some(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_comm() {
        let stat = "1234 (LGEssSystem) S 1 1234 1234 0 -1 4194304";
        assert_eq!(extract_comm(stat).unwrap(), "LGEssSystem");
    }

    #[test]
    fn test_extract_comm_with_parens() {
        let stat = "1234 (app (v2)) S 1 1234";
        assert_eq!(extract_comm(stat).unwrap(), "app (v2)");
    }

    #[test]
    fn test_is_match_exact_only() {
        let exe = Path::new("/usr/bin/pcs-daemon");
        assert!(is_match("pcs-daemon", Some(exe), "pcs-daemon"));
        assert!(is_match("pcsd", Some(exe), "pcs-daemon"));
        assert!(is_match("pcsd", None, "pcsd"));
        assert!(!is_match("pcs-daemon", Some(exe), "pcs"));
    }

    #[test]
    fn test_numeric_target_is_pid() {
        assert_eq!(resolve_target("4321").unwrap(), Pid(4321));
    }

    #[test]
    fn test_unknown_name() {
        let err = resolve_target("no-such-process-name-xyz").unwrap_err();
        assert!(err.to_string().contains("No process matching"));
    }
}

// SPDX-License-Identifier: GPL-3.0-only

//! Processes holding a device, mountpoint or file open
//!
//! Used only to explain why an unmount is slow or fails. A process matches
//! when one of its file descriptors resolves to the path (or lies beneath it
//! for a directory), or when its cwd or root lies beneath a directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use procfs::process::{FDTarget, Process};

use crate::{Result, SysError};

/// What a holding process looks like, for the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HolderInfo {
    pub pid: i32,
    pub command: String,
    pub cwd: Option<PathBuf>,
    pub username: String,
    pub open_files: Vec<PathBuf>,
}

#[async_trait]
pub trait HolderInspector: Send + Sync {
    /// PIDs holding `path` open. Fails with [`SysError::Inspect`] when the
    /// process table cannot be read at all.
    async fn holders_of(&self, path: &Path) -> Result<Vec<i32>>;

    /// Details of one process, or `None` if it is gone or unreadable.
    async fn describe(&self, pid: i32) -> Option<HolderInfo>;
}

/// Inspector reading `/proc` through the `procfs` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcfsInspector;

#[async_trait]
impl HolderInspector for ProcfsInspector {
    async fn holders_of(&self, path: &Path) -> Result<Vec<i32>> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || find_holders(&path))
            .await
            .map_err(|e| SysError::Inspect(format!("inspection task failed: {e}")))?
    }

    async fn describe(&self, pid: i32) -> Option<HolderInfo> {
        tokio::task::spawn_blocking(move || describe_process(pid))
            .await
            .ok()
            .flatten()
    }
}

fn find_holders(path: &Path) -> Result<Vec<i32>> {
    // Device nodes under /dev/mapper are symlinks to /dev/dm-N, which is what
    // the fd table shows.
    let target = match std::fs::canonicalize(path) {
        Ok(target) => target,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("{} does not exist", path.display());
            return Ok(Vec::new());
        }
        Err(e) => {
            return Err(SysError::Inspect(format!(
                "cannot resolve {}: {e}",
                path.display()
            )));
        }
    };
    let is_dir = target.is_dir();

    let processes = procfs::process::all_processes()
        .map_err(|e| SysError::Inspect(format!("cannot enumerate processes: {e}")))?;

    let mut pids = Vec::new();
    for process in processes {
        // Vanished between listing and reading.
        let Ok(process) = process else {
            continue;
        };

        if holds(&process, &target, is_dir) {
            pids.push(process.pid());
        }
    }

    tracing::debug!("{} process(es) hold {}", pids.len(), target.display());
    Ok(pids)
}

fn holds(process: &Process, target: &Path, is_dir: bool) -> bool {
    let matches = |candidate: &Path| {
        if is_dir {
            candidate.starts_with(target)
        } else {
            candidate == target
        }
    };

    if is_dir {
        let cwd_or_root = [process.cwd(), process.root()];
        if cwd_or_root.iter().flatten().any(|p| matches(p.as_path())) {
            return true;
        }
    }

    open_paths(process).iter().any(|p| matches(p.as_path()))
}

fn open_paths(process: &Process) -> Vec<PathBuf> {
    let Ok(fds) = process.fd() else {
        return Vec::new();
    };

    fds.flatten()
        .filter_map(|fd| match fd.target {
            FDTarget::Path(path) => Some(path),
            _ => None,
        })
        .collect()
}

fn describe_process(pid: i32) -> Option<HolderInfo> {
    let process = Process::new(pid).ok()?;
    let uid_map = build_uid_map();

    Some(HolderInfo {
        pid,
        command: extract_command(&process),
        cwd: process.cwd().ok(),
        username: extract_username(&process, &uid_map),
        open_files: open_paths(&process),
    })
}

fn extract_command(process: &Process) -> String {
    if let Ok(cmdline) = process.cmdline()
        && !cmdline.is_empty()
    {
        return cmdline.join(" ");
    }

    if let Ok(stat) = process.stat() {
        return stat.comm;
    }

    format!("<PID {}>", process.pid())
}

fn extract_username(process: &Process, uid_map: &HashMap<u32, String>) -> String {
    match process.status() {
        Ok(status) => uid_map
            .get(&status.ruid)
            .cloned()
            .unwrap_or_else(|| status.ruid.to_string()),
        Err(_) => "?".to_string(),
    }
}

fn build_uid_map() -> HashMap<u32, String> {
    match std::fs::read_to_string("/etc/passwd") {
        Ok(passwd) => parse_passwd(&passwd),
        Err(e) => {
            tracing::warn!("Failed to read /etc/passwd for UID map: {e}");
            HashMap::new()
        }
    }
}

fn parse_passwd(passwd: &str) -> HashMap<u32, String> {
    passwd
        .lines()
        .filter_map(|line| {
            let mut fields = line.split(':');
            let name = fields.next()?;
            let uid = fields.nth(1)?.parse().ok()?;
            Some((uid, name.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    #[test]
    fn parses_passwd_entries() {
        let map = parse_passwd("root:x:0:0:root:/root:/bin/bash\nbroken\nnobody:x:65534:65534::/:/bin/false\n");
        assert_eq!(map.get(&0).map(String::as_str), Some("root"));
        assert_eq!(map.get(&65534).map(String::as_str), Some("nobody"));
        assert_eq!(map.len(), 2);
    }

    #[tokio::test]
    async fn finds_own_process_holding_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("held");
        let _file = File::create(&file_path).unwrap();

        let me = std::process::id() as i32;
        let inspector = ProcfsInspector;

        let by_dir = inspector.holders_of(dir.path()).await.unwrap();
        assert!(by_dir.contains(&me));

        let by_file = inspector.holders_of(&file_path).await.unwrap();
        assert!(by_file.contains(&me));
    }

    #[tokio::test]
    async fn missing_path_has_no_holders() {
        let holders = ProcfsInspector
            .holders_of(Path::new("/nonexistent/mount/point/12345"))
            .await
            .unwrap();
        assert!(holders.is_empty());
    }

    #[tokio::test]
    async fn unresolvable_path_is_an_inspection_failure() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        std::os::unix::fs::symlink(&b, &a).unwrap();
        std::os::unix::fs::symlink(&a, &b).unwrap();

        let err = ProcfsInspector.holders_of(&a).await.unwrap_err();
        assert!(matches!(err, SysError::Inspect(ref msg) if msg.contains("cannot resolve")));
    }

    #[tokio::test]
    async fn describes_own_process() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("held");
        let _file = File::create(&file_path).unwrap();

        let me = std::process::id() as i32;
        let info = ProcfsInspector.describe(me).await.unwrap();
        assert_eq!(info.pid, me);
        assert!(!info.command.is_empty());
        let canonical = std::fs::canonicalize(&file_path).unwrap();
        assert!(info.open_files.contains(&canonical));
    }
}

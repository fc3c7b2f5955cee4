// SPDX-License-Identifier: GPL-3.0-only

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::{Result, SysError};

const MOUNTINFO: &str = "/proc/self/mountinfo";

/// Read-only view of the kernel mount table.
#[async_trait]
pub trait MountTable: Send + Sync {
    /// Whether `path` is currently a mountpoint.
    async fn is_mounted(&self, path: &Path) -> Result<bool>;
}

/// Mount table backed by `/proc/self/mountinfo`, re-read on every call.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcMountTable;

#[async_trait]
impl MountTable for ProcMountTable {
    async fn is_mounted(&self, path: &Path) -> Result<bool> {
        let mount_info = tokio::fs::read_to_string(MOUNTINFO)
            .await
            .map_err(|e| SysError::io(MOUNTINFO, e))?;
        let mount_points = parse_mount_points(&mount_info)?;
        Ok(mount_points.contains(&normalize(path)))
    }
}

/// Drop trailing separators so `/mnt/vg-a/` and `/mnt/vg-a` compare equal.
fn normalize(path: &Path) -> PathBuf {
    path.components().collect()
}

/// Mount points listed in a mountinfo table.
pub fn parse_mount_points(input: &str) -> Result<BTreeSet<PathBuf>> {
    let mut mount_points = BTreeSet::new();

    for line in input.lines().filter(|line| !line.trim().is_empty()) {
        let (left, _) = line
            .split_once(" - ")
            .ok_or_else(|| SysError::parse(MOUNTINFO, format!("invalid line: {line}")))?;

        let mount_point = left
            .split_whitespace()
            .nth(4)
            .ok_or_else(|| SysError::parse(MOUNTINFO, format!("invalid line: {line}")))?;

        mount_points.insert(PathBuf::from(unescape_mount_field(mount_point)));
    }

    Ok(mount_points)
}

/// Undo the kernel's octal escaping (`\040` for a space).
fn unescape_mount_field(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut output = Vec::with_capacity(bytes.len());
    let mut index = 0;

    while index < bytes.len() {
        if bytes[index] == b'\\'
            && index + 3 < bytes.len()
            && bytes[index + 1..index + 4].iter().all(u8::is_ascii_digit)
            && let Ok(num) = u8::from_str_radix(&value[index + 1..index + 4], 8)
        {
            output.push(num);
            index += 4;
            continue;
        }

        output.push(bytes[index]);
        index += 1;
    }

    String::from_utf8_lossy(&output).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "36 25 8:2 / / rw,relatime - ext4 /dev/nvme0n1p2 rw\n\
        37 25 0:5 / /proc rw,nosuid - proc proc rw\n\
        120 36 253:3 / /mnt/schains-vol-a rw,relatime - btrfs /dev/mapper/schains-vol--a rw\n\
        121 36 253:4 / /mnt/with\\040space rw - btrfs /dev/mapper/schains-x rw\n";

    #[test]
    fn parses_mount_points() {
        let mounts = parse_mount_points(SAMPLE).unwrap();
        assert!(mounts.contains(Path::new("/")));
        assert!(mounts.contains(Path::new("/proc")));
        assert!(mounts.contains(Path::new("/mnt/schains-vol-a")));
        assert!(mounts.contains(Path::new("/mnt/with space")));
        assert_eq!(mounts.len(), 4);
    }

    #[test]
    fn rejects_truncated_lines() {
        let err = parse_mount_points("36 25 8:2 /\n").unwrap_err();
        assert!(matches!(err, SysError::Parse { .. }));
    }

    #[test]
    fn normalizes_trailing_separator() {
        assert_eq!(
            normalize(Path::new("/mnt/schains-vol-a/")),
            PathBuf::from("/mnt/schains-vol-a")
        );
    }

    #[tokio::test]
    async fn root_is_mounted_on_this_host() {
        let table = ProcMountTable;
        assert!(table.is_mounted(Path::new("/")).await.unwrap());

        let dir = tempfile::tempdir().unwrap();
        assert!(!table.is_mounted(dir.path()).await.unwrap());
    }
}

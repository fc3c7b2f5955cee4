// SPDX-License-Identifier: GPL-3.0-only

//! Command lines for LVM, filesystem and mount tooling, and parsers for
//! their output.
//!
//! Output formats of external tools are only interpreted here.

use std::path::Path;

use crate::exec::Cmd;
use crate::{Result, SysError};

/// Programs the daemon shells out to.
pub const REQUIRED_TOOLS: &[&str] = &[
    "pvs", "pvcreate", "pvremove", "vgs", "vgcreate", "vgremove", "vgchange", "lvs", "lvscan",
    "lvcreate", "lvremove", "mkfs.btrfs", "mount", "umount", "findmnt", "blockdev",
];

/// Filesystem every volume is formatted with.
pub const FILESYSTEM_MKFS: &str = "mkfs.btrfs";

/// Tools from [`REQUIRED_TOOLS`] that are not on `PATH`.
pub fn missing_tools() -> Vec<&'static str> {
    REQUIRED_TOOLS
        .iter()
        .copied()
        .filter(|tool| which::which(tool).is_err())
        .collect()
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

pub fn list_physical_volumes() -> Cmd {
    Cmd::new("pvs").args(["--noheadings", "-o", "pv_name"])
}

pub fn create_physical_volume(device: &str) -> Cmd {
    Cmd::new("pvcreate").args([device, "-y"])
}

pub fn remove_physical_volume(device: &str) -> Cmd {
    Cmd::new("pvremove").args([device, "-y"])
}

pub fn list_volume_groups() -> Cmd {
    Cmd::new("vgs").args(["--noheadings", "-o", "vg_name"])
}

pub fn group_physical_volume(group: &str) -> Cmd {
    Cmd::new("vgs").args(["--noheadings", "-o", "pv_name", group])
}

pub fn create_volume_group(group: &str, device: &str) -> Cmd {
    Cmd::new("vgcreate").args([group, device])
}

pub fn remove_volume_group(group: &str) -> Cmd {
    Cmd::new("vgremove").args([group, "-y"])
}

pub fn activate_volume_group(group: &str) -> Cmd {
    Cmd::new("vgchange").args(["-ay", group])
}

pub fn scan_logical_volumes() -> Cmd {
    Cmd::new("lvscan")
}

pub fn list_logical_volumes(group: &str) -> Cmd {
    Cmd::new("lvs").args([
        "--noheadings".to_string(),
        "-o".to_string(),
        "lv_name".to_string(),
        "-S".to_string(),
        format!("vg_name={group}"),
    ])
}

/// `size` must already be normalised with [`normalize_size`].
pub fn create_logical_volume(name: &str, size: &str, group: &str) -> Cmd {
    Cmd::new("lvcreate").args(["-L", size, "-n", name, group])
}

pub fn remove_logical_volume(device: &Path) -> Cmd {
    Cmd::new("lvremove").args(["-f".to_string(), path_arg(device)])
}

pub fn format_btrfs(device: &Path) -> Cmd {
    Cmd::new(FILESYSTEM_MKFS).args(["-f".to_string(), path_arg(device)])
}

pub fn mount(device: &Path, mountpoint: &Path) -> Cmd {
    Cmd::new("mount").args([path_arg(device), path_arg(mountpoint)])
}

pub fn unmount(device: &Path) -> Cmd {
    Cmd::new("umount").arg(path_arg(device))
}

/// Mount target of `device`; exits 1 with no output when it is not mounted.
pub fn find_mount_target(device: &Path) -> Cmd {
    Cmd::new("findmnt").args([
        "--source".to_string(),
        path_arg(device),
        "--output".to_string(),
        "TARGET".to_string(),
        "--noheadings".to_string(),
    ])
}

pub fn block_device_size(device: &str) -> Cmd {
    Cmd::new("blockdev").args(["--getsize64", device])
}

/// Open files on the filesystem of `device`, for the diagnostics log.
pub fn list_open_files(device: &Path) -> Cmd {
    Cmd::new("lsof").args(["+f".to_string(), "--".to_string(), path_arg(device)])
}

/// Normalise a requested size for `lvcreate -L`.
///
/// Accepts a byte count optionally followed by one unit letter (`k m g t p
/// e`, any case) and an optional trailing `b`. Returns `None` for anything
/// else. The result always ends in `b`, e.g. `250m` becomes `250mb` and
/// `209715200` becomes `209715200b`.
pub fn normalize_size(size: &str) -> Option<String> {
    let trimmed = size.trim();
    let without_b = trimmed
        .strip_suffix('b')
        .or_else(|| trimmed.strip_suffix('B'))
        .unwrap_or(trimmed);

    let digits_end = without_b
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(without_b.len());
    let (digits, unit) = without_b.split_at(digits_end);
    if digits.is_empty() {
        return None;
    }

    match unit.chars().collect::<Vec<_>>().as_slice() {
        [] => {}
        [unit] if "kmgtpe".contains(unit.to_ascii_lowercase()) => {}
        _ => return None,
    }

    Some(format!("{without_b}b"))
}

/// One name per line, as printed by `pvs`/`vgs`/`lvs` with `--noheadings`.
pub fn parse_name_column(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LvScanRow {
    pub group: String,
    pub volume: String,
    pub active: bool,
}

/// Parse `lvscan` output.
///
/// Lines look like `  inactive          '/dev/vg0/data' [256.00 MiB] inherit`;
/// a role word (`Original`, `Snapshot`) may precede the path.
pub fn parse_lvscan(output: &str) -> Result<Vec<LvScanRow>> {
    let mut rows = Vec::new();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let mut tokens = line.split_whitespace();
        let status = tokens
            .next()
            .ok_or_else(|| SysError::parse("lvscan", format!("empty line: {line}")))?;
        let quoted = tokens
            .find(|token| token.starts_with('\''))
            .ok_or_else(|| SysError::parse("lvscan", format!("no device path in: {line}")))?;

        let path = quoted.trim_matches('\'');
        let relative = path
            .strip_prefix("/dev/")
            .ok_or_else(|| SysError::parse("lvscan", format!("unexpected device path: {path}")))?;
        let (group, volume) = relative
            .split_once('/')
            .filter(|(group, volume)| !group.is_empty() && !volume.is_empty())
            .ok_or_else(|| SysError::parse("lvscan", format!("unexpected device path: {path}")))?;

        rows.push(LvScanRow {
            group: group.to_string(),
            volume: volume.to_string(),
            active: status.eq_ignore_ascii_case("active"),
        });
    }

    Ok(rows)
}

/// Names of the inactive volumes of `group`.
pub fn inactive_volumes(rows: &[LvScanRow], group: &str) -> Vec<String> {
    rows.iter()
        .filter(|row| row.group == group && !row.active)
        .map(|row| row.volume.clone())
        .collect()
}

/// First mount target printed by [`find_mount_target`].
pub fn parse_mount_target(output: &str) -> Option<String> {
    parse_name_column(output).into_iter().next()
}

pub fn parse_block_size(output: &str) -> Result<u64> {
    let value = output.trim();
    value
        .parse()
        .map_err(|_| SysError::parse("blockdev --getsize64", format!("not a size: {value:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const LVSCAN: &str = "  ACTIVE            '/dev/schains/vol-a' [252.00 MiB] inherit\n  inactive          '/dev/schains/vol_b' [300.00 MiB] inherit\n  inactive          '/dev/other/root' [10.00 GiB] inherit\n  ACTIVE   Original '/dev/schains/base' [1.00 GiB] inherit\n";

    #[test]
    fn parses_lvscan_rows() {
        let rows = parse_lvscan(LVSCAN).unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(
            rows[0],
            LvScanRow {
                group: "schains".to_string(),
                volume: "vol-a".to_string(),
                active: true,
            }
        );
        assert_eq!(rows[3].volume, "base");
        assert!(rows[3].active);
    }

    #[test]
    fn inactive_volumes_only_from_requested_group() {
        let rows = parse_lvscan(LVSCAN).unwrap();
        assert_eq!(inactive_volumes(&rows, "schains"), vec!["vol_b".to_string()]);
        assert_eq!(inactive_volumes(&rows, "other"), vec!["root".to_string()]);
        assert!(inactive_volumes(&rows, "missing").is_empty());
    }

    #[test]
    fn empty_lvscan_output_is_no_volumes() {
        assert!(parse_lvscan("").unwrap().is_empty());
        assert!(parse_lvscan("\n  \n").unwrap().is_empty());
    }

    #[test]
    fn garbage_lvscan_output_is_a_parse_error() {
        let err = parse_lvscan("  WARNING: something odd\n").unwrap_err();
        assert!(matches!(err, SysError::Parse { .. }));

        let err = parse_lvscan("  ACTIVE '/dev/only-group' [1 MiB] inherit\n").unwrap_err();
        assert!(matches!(err, SysError::Parse { .. }));
    }

    #[test]
    fn normalizes_sizes() {
        assert_eq!(normalize_size("250m").as_deref(), Some("250mb"));
        assert_eq!(normalize_size("300M").as_deref(), Some("300Mb"));
        assert_eq!(normalize_size("256mb").as_deref(), Some("256mb"));
        assert_eq!(normalize_size("209715200").as_deref(), Some("209715200b"));
        assert_eq!(normalize_size(" 1g ").as_deref(), Some("1gb"));
        assert_eq!(normalize_size("1024b").as_deref(), Some("1024b"));
    }

    #[test]
    fn rejects_malformed_sizes() {
        for size in ["", "b", "m", "ten", "10x", "10mm", "-5m", "1.5g"] {
            assert_eq!(normalize_size(size), None, "{size}");
        }
    }

    #[test]
    fn parses_name_columns() {
        assert_eq!(
            parse_name_column("  /dev/sdb\n  /dev/sdc  \n\n"),
            vec!["/dev/sdb".to_string(), "/dev/sdc".to_string()]
        );
        assert!(parse_name_column("").is_empty());
    }

    #[test]
    fn builds_lvs_selection_for_group() {
        assert_eq!(
            list_logical_volumes("schains").to_string(),
            "lvs --noheadings -o lv_name -S vg_name=schains"
        );
        assert_eq!(
            find_mount_target(Path::new("/dev/mapper/schains-vol--a")).to_string(),
            "findmnt --source /dev/mapper/schains-vol--a --output TARGET --noheadings"
        );
    }

    #[test]
    fn parses_block_size() {
        assert_eq!(parse_block_size("1000204886016\n").unwrap(), 1_000_204_886_016);
        assert!(parse_block_size("n/a").is_err());
        assert_eq!(
            parse_mount_target("/mnt/schains-vol-a\n").as_deref(),
            Some("/mnt/schains-vol-a")
        );
    }
}

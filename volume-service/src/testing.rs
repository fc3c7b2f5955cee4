// SPDX-License-Identifier: GPL-3.0-only

//! In-memory host for engine tests
//!
//! [`FakeHost`] answers LVM, mount and inspection calls from a small model
//! of physical volumes, groups, logical volumes and mounts. Mountpoint
//! directories and filestorage links are real files in a temp dir.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;
use tracing::Span;
use volume_sys::naming::escape_component;
use volume_sys::{
    Backoff, Cmd, CommandOutput, CommandRunner, HolderInfo, HolderInspector, MountTable, SysError,
    VolumeNaming,
};

use crate::config::EngineConfig;
use crate::engine::{Engine, Host};

pub const DEVICE: &str = "/dev/sdb";
pub const GROUP: &str = "schains";
pub const SHARED: &str = "shared-space";
pub const DEVICE_SIZE: u64 = 1_000_204_886_016;

/// Programs that change group or mount state and must never overlap.
const MUTATING: &[&str] = &[
    "pvcreate", "pvremove", "vgcreate", "vgremove", "vgchange", "lvcreate", "lvremove", "mount",
    "umount",
];

struct Failure {
    stderr: String,
    remaining: Option<u32>,
}

#[derive(Default)]
struct State {
    physical_volumes: BTreeSet<String>,
    groups: BTreeMap<String, String>,
    /// (group, volume) -> active
    volumes: BTreeMap<(String, String), bool>,
    /// mountpoint -> device
    mounts: BTreeMap<PathBuf, String>,
    commands: Vec<(String, String)>,
    failures: HashMap<String, Failure>,
    overrides: HashMap<String, String>,
    inspect_fails: bool,
    inspected: Vec<PathBuf>,
    in_flight: usize,
    max_in_flight: usize,
}

#[derive(Default)]
pub struct FakeHost {
    state: Mutex<State>,
}

impl FakeHost {
    pub fn as_host(self: &Arc<Self>) -> Host {
        Host {
            runner: self.clone(),
            mounts: self.clone(),
            holders: self.clone(),
            backoff: Backoff::immediate(),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn add_physical_volume(&self, device: &str) {
        self.state().physical_volumes.insert(device.to_string());
    }

    pub fn add_group(&self, group: &str, device: &str) {
        let mut state = self.state();
        state.physical_volumes.insert(device.to_string());
        state.groups.insert(group.to_string(), device.to_string());
    }

    pub fn add_volume(&self, group: &str, volume: &str) {
        self.state()
            .volumes
            .insert((group.to_string(), volume.to_string()), true);
    }

    pub fn deactivate(&self, volume: &str) {
        for ((_, name), active) in self.state().volumes.iter_mut() {
            if name == volume {
                *active = false;
            }
        }
    }

    /// Fail every run of `program`.
    pub fn fail(&self, program: &str, stderr: &str) {
        self.set_failure(program, stderr, None);
    }

    /// Fail the next `times` runs of `program`.
    pub fn fail_times(&self, program: &str, stderr: &str, times: u32) {
        self.set_failure(program, stderr, Some(times));
    }

    fn set_failure(&self, program: &str, stderr: &str, remaining: Option<u32>) {
        self.state().failures.insert(
            program.to_string(),
            Failure {
                stderr: stderr.to_string(),
                remaining,
            },
        );
    }

    /// Answer `program` with `stdout` instead of the model.
    pub fn override_output(&self, program: &str, stdout: &str) {
        self.state()
            .overrides
            .insert(program.to_string(), stdout.to_string());
    }

    pub fn fail_inspection(&self) {
        self.state().inspect_fails = true;
    }

    pub fn inspected_paths(&self) -> Vec<PathBuf> {
        self.state().inspected.clone()
    }

    pub fn count(&self, program: &str) -> usize {
        self.state()
            .commands
            .iter()
            .filter(|(p, _)| p == program)
            .count()
    }

    pub fn ran(&self, command_line: &str) -> bool {
        self.state()
            .commands
            .iter()
            .any(|(_, rendered)| rendered == command_line)
    }

    pub fn max_concurrent_mutations(&self) -> usize {
        self.state().max_in_flight
    }
}

#[async_trait]
impl CommandRunner for FakeHost {
    async fn run(&self, command: &Cmd) -> std::io::Result<CommandOutput> {
        let mutating = MUTATING.contains(&command.program());
        {
            let mut state = self.state();
            state
                .commands
                .push((command.program().to_string(), command.to_string()));
            if mutating {
                state.in_flight += 1;
                state.max_in_flight = state.max_in_flight.max(state.in_flight);
            }
        }

        // Give other tasks a chance to start a command meanwhile.
        if mutating {
            for _ in 0..3 {
                tokio::task::yield_now().await;
            }
        }

        let mut state = self.state();
        let output = state.execute(command);
        if mutating {
            state.in_flight -= 1;
        }
        Ok(output)
    }
}

#[async_trait]
impl MountTable for FakeHost {
    async fn is_mounted(&self, path: &Path) -> volume_sys::Result<bool> {
        Ok(self.state().mounts.contains_key(&normalize(path)))
    }
}

#[async_trait]
impl HolderInspector for FakeHost {
    async fn holders_of(&self, path: &Path) -> volume_sys::Result<Vec<i32>> {
        let mut state = self.state();
        state.inspected.push(path.to_path_buf());
        if state.inspect_fails {
            return Err(SysError::Inspect("process table unavailable".to_string()));
        }
        Ok(Vec::new())
    }

    async fn describe(&self, _pid: i32) -> Option<HolderInfo> {
        None
    }
}

fn normalize(path: &Path) -> PathBuf {
    path.components().collect()
}

fn ok(stdout: impl Into<String>) -> CommandOutput {
    CommandOutput {
        code: Some(0),
        stdout: stdout.into(),
        stderr: String::new(),
    }
}

fn failed(code: i32, stderr: impl Into<String>) -> CommandOutput {
    CommandOutput {
        code: Some(code),
        stdout: String::new(),
        stderr: stderr.into(),
    }
}

fn column<'a>(names: impl IntoIterator<Item = &'a String>) -> String {
    names.into_iter().map(|name| format!("  {name}\n")).collect()
}

fn device_of(group: &str, volume: &str) -> String {
    format!(
        "/dev/mapper/{}-{}",
        escape_component(group),
        escape_component(volume)
    )
}

impl State {
    fn execute(&mut self, command: &Cmd) -> CommandOutput {
        let program = command.program();

        if let Some(failure) = self.failures.get_mut(program)
            && failure.remaining != Some(0)
        {
            if let Some(remaining) = failure.remaining.as_mut() {
                *remaining -= 1;
            }
            return failed(5, failure.stderr.clone());
        }

        if let Some(stdout) = self.overrides.get(program) {
            return ok(stdout.clone());
        }

        let args: Vec<&str> = command.arguments().iter().map(String::as_str).collect();
        match (program, args.as_slice()) {
            ("pvs", _) => ok(column(&self.physical_volumes)),
            ("pvcreate", [device, "-y"]) => {
                if self.physical_volumes.insert(device.to_string()) {
                    ok("")
                } else {
                    failed(5, format!("Physical volume '{device}' already exists"))
                }
            }
            ("pvremove", [device, "-y"]) => {
                if self.physical_volumes.remove(*device) {
                    ok("")
                } else {
                    failed(5, format!("No PV found on device {device}"))
                }
            }
            ("vgs", ["--noheadings", "-o", "vg_name"]) => ok(column(self.groups.keys())),
            ("vgs", ["--noheadings", "-o", "pv_name", group]) => match self.groups.get(*group) {
                Some(device) => ok(format!("  {device}\n")),
                None => failed(5, format!("Volume group \"{group}\" not found")),
            },
            ("vgcreate", [group, device]) => {
                if !self.physical_volumes.contains(*device) {
                    failed(5, format!("Device {device} not found"))
                } else if self.groups.contains_key(*group) {
                    failed(5, format!("A volume group called {group} already exists"))
                } else {
                    self.groups.insert(group.to_string(), device.to_string());
                    ok("")
                }
            }
            ("vgchange", ["-ay", group]) => {
                for ((g, _), active) in self.volumes.iter_mut() {
                    if g == group {
                        *active = true;
                    }
                }
                ok("")
            }
            ("vgremove", [group, "-y"]) => {
                if self.groups.remove(*group).is_some() {
                    self.volumes.retain(|(g, _), _| g != group);
                    ok("")
                } else {
                    failed(5, format!("Volume group \"{group}\" not found"))
                }
            }
            ("lvs", ["--noheadings", "-o", "lv_name", "-S", selection]) => {
                let group = selection.strip_prefix("vg_name=").unwrap_or_default();
                let names: Vec<&String> = self
                    .volumes
                    .keys()
                    .filter(|(g, _)| g == group)
                    .map(|(_, name)| name)
                    .collect();
                ok(column(names))
            }
            ("lvscan", []) => ok(self
                .volumes
                .iter()
                .map(|((group, name), active)| {
                    let status = if *active { "ACTIVE" } else { "inactive" };
                    format!("  {status:<18}'/dev/{group}/{name}' [256.00 MiB] inherit\n")
                })
                .collect::<String>()),
            ("lvcreate", ["-L", _size, "-n", name, group]) => {
                if !self.groups.contains_key(*group) {
                    return failed(5, format!("Volume group \"{group}\" not found"));
                }
                let key = (group.to_string(), name.to_string());
                if self.volumes.contains_key(&key) {
                    return failed(5, format!("Logical Volume \"{name}\" already exists"));
                }
                self.volumes.insert(key, true);
                ok(format!("  Logical volume \"{name}\" created.\n"))
            }
            ("lvremove", ["-f", device]) => match self.volume_at(device) {
                Some(key) => {
                    self.volumes.remove(&key);
                    ok("")
                }
                None => failed(5, format!("Failed to find logical volume \"{device}\"")),
            },
            ("mkfs.btrfs", ["-f", device]) => match self.volume_at(device) {
                Some(_) => ok("btrfs-progs\n"),
                None => failed(1, format!("ERROR: '{device}' is not a block device")),
            },
            ("mount", [device, mountpoint]) => {
                let mountpoint = normalize(Path::new(mountpoint));
                if self.volume_at(device).is_none() {
                    failed(32, format!("mount: special device {device} does not exist"))
                } else if !mountpoint.is_dir() {
                    failed(32, format!("mount: mount point {} does not exist", mountpoint.display()))
                } else if self.mounts.contains_key(&mountpoint) {
                    failed(32, format!("mount: {} already mounted", mountpoint.display()))
                } else {
                    self.mounts.insert(mountpoint, device.to_string());
                    ok("")
                }
            }
            ("umount", [device]) => {
                let mounted = self
                    .mounts
                    .iter()
                    .find(|(_, d)| d.as_str() == *device)
                    .map(|(mountpoint, _)| mountpoint.clone());
                match mounted {
                    Some(mountpoint) => {
                        self.mounts.remove(&mountpoint);
                        ok("")
                    }
                    None => failed(32, format!("umount: {device}: not mounted")),
                }
            }
            ("findmnt", ["--source", device, ..]) => {
                match self.mounts.iter().find(|(_, d)| d.as_str() == *device) {
                    Some((mountpoint, _)) => ok(format!("{}\n", mountpoint.display())),
                    None => CommandOutput {
                        code: Some(1),
                        ..CommandOutput::default()
                    },
                }
            }
            ("blockdev", ["--getsize64", device]) => {
                if self.physical_volumes.contains(*device) {
                    ok(format!("{DEVICE_SIZE}\n"))
                } else {
                    failed(1, format!("blockdev: cannot open {device}"))
                }
            }
            ("lsof", _) => CommandOutput {
                code: Some(1),
                ..CommandOutput::default()
            },
            _ => failed(127, format!("{program}: unexpected invocation")),
        }
    }

    fn volume_at(&self, device: &str) -> Option<(String, String)> {
        self.volumes
            .keys()
            .find(|(group, name)| device_of(group, name) == device)
            .cloned()
    }
}

/// An engine over a [`FakeHost`] rooted in a temp dir.
pub struct Fixture {
    _dir: TempDir,
    pub host: Arc<FakeHost>,
    pub engine: Arc<Engine>,
}

impl Fixture {
    /// Host with the configured group already on its device.
    pub fn new() -> Self {
        let fx = Self::empty();
        fx.host.add_group(GROUP, DEVICE);
        fx
    }

    /// Host with no LVM state at all.
    pub fn empty() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            physical_volume: DEVICE.to_string(),
            volume_group: GROUP.to_string(),
            mount_base: dir.path().join("mnt"),
            filestorage_dir: dir.path().join("filestorage"),
            shared_volumes: BTreeSet::from([SHARED.to_string()]),
        };

        let host = Arc::new(FakeHost::default());
        let engine = Arc::new(Engine::new(config, host.as_host(), Span::none()));
        Self {
            _dir: dir,
            host,
            engine,
        }
    }

    pub fn naming(&self) -> &VolumeNaming {
        self.engine.volumes().naming()
    }

    pub fn mount_base(&self) -> &Path {
        self.naming().mount_base()
    }
}

// SPDX-License-Identifier: GPL-3.0-only

//! Device and path names derived from a logical volume name
//!
//! Device-mapper joins the group and volume names with a single `-`, so any
//! `-` inside either name is written as `--`. Getting this wrong produces a
//! path that silently does not exist.

use std::path::{Path, PathBuf};

pub const DEVICE_MAPPER_DIR: &str = "/dev/mapper";

/// Directory inside a mounted volume that the filestorage link points at.
pub const FILESTORAGE_SUBDIR: &str = "filestorage";

/// Double every `-` the way device-mapper does.
pub fn escape_component(component: &str) -> String {
    component.replace('-', "--")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeNaming {
    volume_group: String,
    mount_base: PathBuf,
    filestorage_dir: PathBuf,
}

impl VolumeNaming {
    pub fn new(
        volume_group: impl Into<String>,
        mount_base: impl Into<PathBuf>,
        filestorage_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            volume_group: volume_group.into(),
            mount_base: mount_base.into(),
            filestorage_dir: filestorage_dir.into(),
        }
    }

    pub fn volume_group(&self) -> &str {
        &self.volume_group
    }

    pub fn mount_base(&self) -> &Path {
        &self.mount_base
    }

    /// Name the block-device layer reports for the volume (`lsblk`, `dmsetup`).
    pub fn dm_name(&self, volume: &str) -> String {
        format!(
            "{}-{}",
            escape_component(&self.volume_group),
            escape_component(volume)
        )
    }

    pub fn device_path(&self, volume: &str) -> PathBuf {
        Path::new(DEVICE_MAPPER_DIR).join(self.dm_name(volume))
    }

    pub fn mountpoint(&self, volume: &str) -> PathBuf {
        self.mount_base
            .join(format!("{}-{}", self.volume_group, volume))
    }

    pub fn filestorage_link(&self, volume: &str) -> PathBuf {
        self.filestorage_dir.join(volume)
    }

    pub fn filestorage_target(&self, volume: &str) -> PathBuf {
        self.mountpoint(volume).join(FILESTORAGE_SUBDIR)
    }
}

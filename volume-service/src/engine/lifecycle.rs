// SPDX-License-Identifier: GPL-3.0-only

//! Create, mount, unmount and remove individual logical volumes
//!
//! Volume state is never cached: every operation asks LVM and the kernel
//! mount table. Commands that change group or mount state run under the
//! serialization lock; formatting and queries run outside it.

use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{Span, error, info, instrument, warn};
use volume_sys::{Budget, CommandExecutor, MountTable, VolumeNaming, lvm_tools};

use super::diagnostics::Diagnostics;
use super::lock::SerializationLock;
use crate::error::{Result, ServiceError};

pub struct VolumeManager {
    exec: Arc<CommandExecutor>,
    mounts: Arc<dyn MountTable>,
    diagnostics: Diagnostics,
    lock: SerializationLock,
    naming: VolumeNaming,
    shared: BTreeSet<String>,
    span: Span,
}

impl VolumeManager {
    pub fn new(
        exec: Arc<CommandExecutor>,
        mounts: Arc<dyn MountTable>,
        diagnostics: Diagnostics,
        lock: SerializationLock,
        naming: VolumeNaming,
        shared: BTreeSet<String>,
        span: Span,
    ) -> Self {
        Self {
            exec,
            mounts,
            diagnostics,
            lock,
            naming,
            shared,
            span,
        }
    }

    pub fn naming(&self) -> &VolumeNaming {
        &self.naming
    }

    pub fn is_shared(&self, name: &str) -> bool {
        self.shared.contains(name)
    }

    /// Allocate `name` with `size` and format it.
    ///
    /// A volume whose format fails is removed again before the format error
    /// is returned.
    #[instrument(parent = &self.span, skip(self))]
    pub async fn create(&self, name: &str, size: &str) -> Result<()> {
        validate_name(name)?;
        let size = lvm_tools::normalize_size(size)
            .ok_or_else(|| ServiceError::InvalidArgument(format!("size {size:?}")))?;

        {
            let _token = self.lock.acquire("lvcreate").await;
            self.exec
                .run(
                    &lvm_tools::create_logical_volume(name, &size, self.naming.volume_group()),
                    Budget::DEFAULT,
                )
                .await?;
        }

        let device = self.naming.device_path(name);
        if let Err(format_err) = self
            .exec
            .run(&lvm_tools::format_btrfs(&device), Budget::ONCE)
            .await
        {
            error!("Formatting {} failed, removing volume {name}", device.display());
            self.destroy(name).await?;
            return Err(format_err.into());
        }

        info!("Volume {name} created with size {size}");
        Ok(())
    }

    /// Delete `name`, unmounting it first. Shared volumes are left alone.
    #[instrument(parent = &self.span, skip(self))]
    pub async fn remove(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        if self.is_shared(name) {
            warn!("Volume {name} is shared, not removing it");
            return Ok(());
        }
        self.destroy(name).await
    }

    async fn destroy(&self, name: &str) -> Result<()> {
        let mountpoint = self.naming.mountpoint(name);
        if self.mounts.is_mounted(&mountpoint).await? {
            self.unmount_volume(name, true).await?;
        }

        {
            let _token = self.lock.acquire("lvremove").await;
            self.exec
                .run(
                    &lvm_tools::remove_logical_volume(&self.naming.device_path(name)),
                    Budget::DEFAULT,
                )
                .await?;
        }

        match tokio::fs::remove_dir(&mountpoint).await {
            Ok(()) => info!("Mountpoint {} removed", mountpoint.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(ServiceError::io(mountpoint, e)),
        }

        info!("Volume {name} removed");
        Ok(())
    }

    /// Mount `name` at its mountpoint and return the mountpoint.
    ///
    /// A shared volume is mounted once and reused. Any other volume that is
    /// already mounted is remounted. `tracked` volumes get a filestorage link.
    #[instrument(parent = &self.span, skip(self))]
    pub async fn mount(&self, name: &str, tracked: bool) -> Result<PathBuf> {
        validate_name(name)?;
        let mountpoint = self.naming.mountpoint(name);
        let device = self.naming.device_path(name);

        if self.is_shared(name) {
            let _token = self.lock.acquire("mount shared").await;
            if self.mounts.is_mounted(&mountpoint).await? {
                info!("Shared volume {name} is already mounted");
                return Ok(mountpoint);
            }
            self.mount_device(&device, &mountpoint).await?;
            info!("Shared volume {name} mounted at {}", mountpoint.display());
            return Ok(mountpoint);
        }

        if self.mounts.is_mounted(&mountpoint).await? {
            warn!("Volume {name} is already mounted, remounting");
            self.unmount_volume(name, tracked).await?;
        }

        {
            let _token = self.lock.acquire("mount").await;
            self.mount_device(&device, &mountpoint).await?;
        }

        if tracked && let Err(link_err) = self.link_filestorage(name).await {
            error!("Linking filestorage for {name} failed, unmounting");
            let _token = self.lock.acquire("umount after link failure").await;
            match self
                .exec
                .run(&lvm_tools::unmount(&device), Budget::UNMOUNT)
                .await
            {
                Ok(_) => {
                    if let Err(e) = tokio::fs::remove_dir(&mountpoint).await {
                        warn!("Removing {} after link failure failed: {e}", mountpoint.display());
                    }
                }
                Err(e) => warn!("Unmounting {name} after link failure failed: {e}"),
            }
            return Err(link_err);
        }

        info!("Volume {name} mounted at {}", mountpoint.display());
        Ok(mountpoint)
    }

    /// Create the mountpoint and mount `device` on it. A mountpoint created
    /// here is removed again when the mount fails. Caller holds the lock.
    async fn mount_device(&self, device: &Path, mountpoint: &Path) -> Result<()> {
        let existed = tokio::fs::try_exists(mountpoint)
            .await
            .map_err(|e| ServiceError::io(mountpoint, e))?;
        create_dir(mountpoint).await?;

        let Err(mount_err) = self
            .exec
            .run(&lvm_tools::mount(device, mountpoint), Budget::DEFAULT)
            .await
        else {
            return Ok(());
        };

        if !existed {
            error!(
                "Mounting {} failed, removing mountpoint {}",
                device.display(),
                mountpoint.display()
            );
            tokio::fs::remove_dir(mountpoint)
                .await
                .map_err(|e| ServiceError::io(mountpoint, e))?;
        }
        Err(mount_err.into())
    }

    /// Unmount `name`. Shared volumes stay mounted.
    #[instrument(parent = &self.span, skip(self))]
    pub async fn unmount(&self, name: &str, tracked: bool) -> Result<()> {
        validate_name(name)?;
        if self.is_shared(name) {
            warn!("Volume {name} is shared, not unmounting it");
            return Ok(());
        }
        self.unmount_volume(name, tracked).await
    }

    async fn unmount_volume(&self, name: &str, tracked: bool) -> Result<()> {
        self.diagnostics.log_busy_resources(name).await;

        {
            let _token = self.lock.acquire("umount").await;
            self.exec
                .run(
                    &lvm_tools::unmount(&self.naming.device_path(name)),
                    Budget::UNMOUNT,
                )
                .await?;
        }

        if tracked {
            let link = self.naming.filestorage_link(name);
            match tokio::fs::remove_file(&link).await {
                Ok(()) => info!("Filestorage link {} removed", link.display()),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    info!("Filestorage link {} did not exist", link.display());
                }
                Err(e) => return Err(ServiceError::io(link, e)),
            }
        }

        info!("Volume {name} unmounted");
        Ok(())
    }

    /// Where `name` is mounted.
    pub async fn path(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        let command = lvm_tools::find_mount_target(&self.naming.device_path(name));
        let output = self.exec.probe(&command).await?;

        if output.success() {
            return lvm_tools::parse_mount_target(&output.stdout)
                .map(PathBuf::from)
                .ok_or_else(|| not_mounted(name));
        }

        if output.code == Some(1) && output.stdout.trim().is_empty() {
            return Err(not_mounted(name));
        }

        Err(ServiceError::CommandFailed {
            command: command.to_string(),
            code: output.code,
            stderr: output.stderr.trim().to_string(),
        })
    }

    /// `Some(name)` if the volume exists.
    pub async fn get(&self, name: &str) -> Result<Option<String>> {
        validate_name(name)?;
        Ok(self
            .volumes()
            .await?
            .into_iter()
            .find(|volume| volume == name))
    }

    pub async fn volumes(&self) -> Result<Vec<String>> {
        let out = self
            .exec
            .run(
                &lvm_tools::list_logical_volumes(self.naming.volume_group()),
                Budget::DEFAULT,
            )
            .await?;
        Ok(lvm_tools::parse_name_column(&out))
    }

    async fn link_filestorage(&self, name: &str) -> Result<()> {
        let link = self.naming.filestorage_link(name);
        let target = self.naming.filestorage_target(name);

        if let Some(parent) = link.parent() {
            create_dir(parent).await?;
        }

        // A link left behind by a crash would make symlink() fail.
        if tokio::fs::symlink_metadata(&link).await.is_ok() {
            warn!("Replacing stale filestorage link {}", link.display());
            tokio::fs::remove_file(&link)
                .await
                .map_err(|e| ServiceError::io(&link, e))?;
        }

        tokio::fs::symlink(&target, &link)
            .await
            .map_err(|e| ServiceError::io(&link, e))?;
        info!("Filestorage link {} -> {}", link.display(), target.display());
        Ok(())
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') {
        return Err(ServiceError::InvalidArgument(format!(
            "volume name {name:?}"
        )));
    }
    Ok(())
}

fn not_mounted(name: &str) -> ServiceError {
    ServiceError::NotFound(format!("Volume {name} is not mounted"))
}

async fn create_dir(path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| ServiceError::io(path, e))
}

// SPDX-License-Identifier: GPL-3.0-only

//! The single physical volume and volume group the plugin allocates from

use std::sync::Arc;

use tracing::{Span, info, instrument, warn};
use volume_sys::{Budget, CommandExecutor, lvm_tools};

use super::lock::SerializationLock;
use crate::error::Result;

pub struct VolumeGroupManager {
    exec: Arc<CommandExecutor>,
    lock: SerializationLock,
    span: Span,
}

impl VolumeGroupManager {
    pub fn new(exec: Arc<CommandExecutor>, lock: SerializationLock, span: Span) -> Self {
        Self { exec, lock, span }
    }

    pub async fn physical_volumes(&self) -> Result<Vec<String>> {
        let out = self
            .exec
            .run(&lvm_tools::list_physical_volumes(), Budget::DEFAULT)
            .await?;
        Ok(lvm_tools::parse_name_column(&out))
    }

    pub async fn volume_groups(&self) -> Result<Vec<String>> {
        let out = self
            .exec
            .run(&lvm_tools::list_volume_groups(), Budget::DEFAULT)
            .await?;
        Ok(lvm_tools::parse_name_column(&out))
    }

    /// Logical volumes of `group`; empty when the group does not exist.
    pub async fn logical_volumes(&self, group: &str) -> Result<Vec<String>> {
        let out = self
            .exec
            .run(&lvm_tools::list_logical_volumes(group), Budget::DEFAULT)
            .await?;
        Ok(lvm_tools::parse_name_column(&out))
    }

    #[instrument(parent = &self.span, skip(self))]
    pub async fn ensure_physical_volume(&self, device: &str) -> Result<()> {
        if self.physical_volumes().await?.iter().any(|pv| pv == device) {
            warn!("Physical volume {device} already exists");
            return Ok(());
        }

        let _token = self.lock.acquire("pvcreate").await;
        self.exec
            .run(&lvm_tools::create_physical_volume(device), Budget::DEFAULT)
            .await?;
        info!("Physical volume {device} created");
        Ok(())
    }

    /// Create `group` on `device` if it is missing, otherwise make sure it
    /// is active.
    #[instrument(parent = &self.span, skip(self))]
    pub async fn ensure_volume_group(&self, group: &str, device: &str) -> Result<()> {
        if self.volume_groups().await?.iter().any(|vg| vg == group) {
            return self.ensure_group_active(group).await;
        }

        self.ensure_physical_volume(device).await?;

        let _token = self.lock.acquire("vgcreate").await;
        self.exec
            .run(&lvm_tools::create_volume_group(group, device), Budget::DEFAULT)
            .await?;
        info!("Volume group {group} created on {device}");
        Ok(())
    }

    /// Activate `group` when any of its volumes is reported inactive.
    pub async fn ensure_group_active(&self, group: &str) -> Result<()> {
        let inactive = self.get_inactive_volumes(group).await?;
        if inactive.is_empty() {
            return Ok(());
        }

        warn!(
            "Volume group {group} has inactive volumes: {}",
            inactive.join(", ")
        );
        self.activate_group(group).await
    }

    pub async fn activate_group(&self, group: &str) -> Result<()> {
        let _token = self.lock.acquire("vgchange").await;
        self.exec
            .run(&lvm_tools::activate_volume_group(group), Budget::DEFAULT)
            .await?;
        info!("Volume group {group} activated");
        Ok(())
    }

    pub async fn get_inactive_volumes(&self, group: &str) -> Result<Vec<String>> {
        let out = self
            .exec
            .run(&lvm_tools::scan_logical_volumes(), Budget::DEFAULT)
            .await?;
        let rows = lvm_tools::parse_lvscan(&out)?;
        Ok(lvm_tools::inactive_volumes(&rows, group))
    }

    /// Device `group` lives on, or `None` when the group does not exist.
    pub async fn physical_volume_from_group(&self, group: &str) -> Result<Option<String>> {
        if !self.volume_groups().await?.iter().any(|vg| vg == group) {
            return Ok(None);
        }

        let out = self
            .exec
            .run(&lvm_tools::group_physical_volume(group), Budget::DEFAULT)
            .await?;
        Ok(lvm_tools::parse_name_column(&out).into_iter().next())
    }

    #[instrument(parent = &self.span, skip(self))]
    pub async fn remove_volume_group(&self, group: &str) -> Result<()> {
        if !self.volume_groups().await?.iter().any(|vg| vg == group) {
            return Ok(());
        }

        let _token = self.lock.acquire("vgremove").await;
        self.exec
            .run(&lvm_tools::remove_volume_group(group), Budget::DEFAULT)
            .await?;
        info!("Volume group {group} removed");
        Ok(())
    }

    #[instrument(parent = &self.span, skip(self))]
    pub async fn remove_physical_volume(&self, device: &str) -> Result<()> {
        if !self.physical_volumes().await?.iter().any(|pv| pv == device) {
            return Ok(());
        }

        let _token = self.lock.acquire("pvremove").await;
        self.exec
            .run(&lvm_tools::remove_physical_volume(device), Budget::DEFAULT)
            .await?;
        info!("Physical volume {device} removed");
        Ok(())
    }

    /// Size of `device` in bytes.
    pub async fn block_device_size(&self, device: &str) -> Result<u64> {
        let out = self
            .exec
            .run(&lvm_tools::block_device_size(device), Budget::ONCE)
            .await?;
        Ok(lvm_tools::parse_block_size(&out)?)
    }
}

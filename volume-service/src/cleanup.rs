// SPDX-License-Identifier: GPL-3.0-only

//! Installation cleanup
//!
//! Before the plugin is installed on `block_device`, a volume group of the
//! same name left on another device must go. A group that still holds
//! volumes on another device is never touched.

use tracing::info;

use crate::engine::VolumeGroupManager;
use crate::error::{Result, ServiceError};

#[derive(Debug)]
pub enum CleanupOutcome {
    Finished,
    /// The group exists elsewhere and still has volumes.
    InvalidEnvironment(String),
    Failed(ServiceError),
}

impl CleanupOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            CleanupOutcome::Finished => 0,
            CleanupOutcome::InvalidEnvironment(_) => 1,
            CleanupOutcome::Failed(_) => 2,
        }
    }
}

/// The group is usable on `block_device`, or can be discarded.
pub async fn environment_valid(
    groups: &VolumeGroupManager,
    block_device: &str,
    group: &str,
) -> Result<bool> {
    if groups.physical_volume_from_group(group).await?.as_deref() == Some(block_device) {
        return Ok(true);
    }
    Ok(groups.logical_volumes(group).await?.is_empty())
}

pub async fn cleanup_needed(
    groups: &VolumeGroupManager,
    block_device: &str,
    group: &str,
) -> Result<bool> {
    Ok(match groups.physical_volume_from_group(group).await? {
        Some(device) => device != block_device,
        None => false,
    })
}

async fn remove_artifacts(groups: &VolumeGroupManager, group: &str) -> Result<()> {
    let device = groups.physical_volume_from_group(group).await?;
    groups.remove_volume_group(group).await?;
    if let Some(device) = device {
        groups.remove_physical_volume(&device).await?;
    }
    Ok(())
}

pub async fn run(groups: &VolumeGroupManager, block_device: &str, group: &str) -> CleanupOutcome {
    match environment_valid(groups, block_device, group).await {
        Ok(true) => {}
        Ok(false) => {
            return CleanupOutcome::InvalidEnvironment(format!(
                "Volume group {group} exists with volumes"
            ));
        }
        Err(e) => return CleanupOutcome::Failed(e),
    }

    match cleanup_needed(groups, block_device, group).await {
        Ok(true) => {
            info!("Removing volume group {group} left on another device");
            if let Err(e) = remove_artifacts(groups, group).await {
                return CleanupOutcome::Failed(e);
            }
        }
        Ok(false) => {}
        Err(e) => return CleanupOutcome::Failed(e),
    }

    CleanupOutcome::Finished
}

// SPDX-License-Identifier: GPL-3.0-only

//! Volume lifecycle engine
//!
//! [`Engine`] wires one command executor, one serialization lock and the
//! host views into the group and volume managers. Everything the engine
//! touches on the host comes in through [`Host`].

pub mod diagnostics;
pub mod group;
pub mod lifecycle;
pub mod lock;

use std::sync::Arc;

use tracing::Span;
use volume_sys::{
    Backoff, CommandExecutor, CommandRunner, HolderInspector, MountTable, ProcMountTable,
    ProcfsInspector, SystemRunner, VolumeNaming,
};

use crate::config::EngineConfig;
use crate::error::Result;

pub use diagnostics::Diagnostics;
pub use group::VolumeGroupManager;
pub use lifecycle::VolumeManager;
pub use lock::SerializationLock;

/// Host access used by the engine.
#[derive(Clone)]
pub struct Host {
    pub runner: Arc<dyn CommandRunner>,
    pub mounts: Arc<dyn MountTable>,
    pub holders: Arc<dyn HolderInspector>,
    pub backoff: Backoff,
}

impl Host {
    /// The local machine, with one-second backoff units.
    pub fn system() -> Self {
        Self {
            runner: Arc::new(SystemRunner),
            mounts: Arc::new(ProcMountTable),
            holders: Arc::new(ProcfsInspector),
            backoff: Backoff::seconds(),
        }
    }

    pub fn executor(&self, span: Span) -> Arc<CommandExecutor> {
        Arc::new(CommandExecutor::new(self.runner.clone(), self.backoff, span))
    }
}

pub struct Engine {
    config: EngineConfig,
    groups: VolumeGroupManager,
    volumes: VolumeManager,
}

impl Engine {
    pub fn new(config: EngineConfig, host: Host, span: Span) -> Self {
        let lock = SerializationLock::new();
        let exec = host.executor(span.clone());
        let naming = VolumeNaming::new(
            config.volume_group.clone(),
            config.mount_base.clone(),
            config.filestorage_dir.clone(),
        );

        let groups = VolumeGroupManager::new(
            exec.clone(),
            lock.clone(),
            tracing::info_span!(parent: &span, "group", group = %config.volume_group),
        );

        let diagnostics = Diagnostics::new(
            exec.clone(),
            host.holders.clone(),
            naming.clone(),
            span.clone(),
        );

        let volumes = VolumeManager::new(
            exec,
            host.mounts.clone(),
            diagnostics,
            lock,
            naming,
            config.shared_volumes.clone(),
            tracing::info_span!(parent: &span, "volumes"),
        );

        Self {
            config,
            groups,
            volumes,
        }
    }

    pub fn system(config: EngineConfig) -> Self {
        Self::new(config, Host::system(), tracing::info_span!("engine"))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn groups(&self) -> &VolumeGroupManager {
        &self.groups
    }

    pub fn volumes(&self) -> &VolumeManager {
        &self.volumes
    }

    /// Make sure the configured group exists on the configured device and
    /// is active.
    pub async fn ensure_volume_group(&self) -> Result<()> {
        self.groups
            .ensure_volume_group(&self.config.volume_group, &self.config.physical_volume)
            .await
    }
}

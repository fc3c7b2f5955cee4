// SPDX-License-Identifier: GPL-3.0-only

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::join_all;
use tracing::{Instrument, Span, info, warn};
use volume_sys::{CommandExecutor, HolderInspector, VolumeNaming, lvm_tools};

/// Logs who keeps a volume busy before it is unmounted. Never fails.
pub struct Diagnostics {
    exec: Arc<CommandExecutor>,
    holders: Arc<dyn HolderInspector>,
    naming: VolumeNaming,
    span: Span,
}

impl Diagnostics {
    pub fn new(
        exec: Arc<CommandExecutor>,
        holders: Arc<dyn HolderInspector>,
        naming: VolumeNaming,
        span: Span,
    ) -> Self {
        Self {
            exec,
            holders,
            naming,
            span,
        }
    }

    pub async fn log_busy_resources(&self, name: &str) {
        let span = tracing::info_span!(parent: &self.span, "busy_resources", volume = name);
        self.log_busy_resources_inner(name).instrument(span).await
    }

    async fn log_busy_resources_inner(&self, name: &str) {
        let device = self.naming.device_path(name);
        let mountpoint = self.naming.mountpoint(name);

        let mut paths = vec![device.clone(), mountpoint.clone()];
        if let Some(entry) = first_entry(&mountpoint).await {
            paths.push(entry);
        }

        let lookups = paths.iter().map(|path| self.log_holders(path));
        join_all(lookups).await;

        match self.exec.probe(&lvm_tools::list_open_files(&device)).await {
            Ok(output) if !output.stdout.trim().is_empty() => {
                info!("Open files on {}:\n{}", device.display(), output.stdout.trim_end());
            }
            Ok(_) => info!("No open files reported on {}", device.display()),
            Err(e) => warn!("Could not list open files on {}: {e}", device.display()),
        }
    }

    async fn log_holders(&self, path: &Path) {
        let pids = match self.holders.holders_of(path).await {
            Ok(pids) => pids,
            Err(e) => {
                warn!("Could not inspect holders of {}: {e}", path.display());
                return;
            }
        };

        if pids.is_empty() {
            info!("{} is not held by any process", path.display());
            return;
        }

        info!("{} is held by pids {pids:?}", path.display());
        for pid in pids {
            match self.holders.describe(pid).await {
                Some(holder) => info!(
                    "pid {} ({}) user {} cwd {:?} open files {:?}",
                    holder.pid, holder.command, holder.username, holder.cwd, holder.open_files
                ),
                None => info!("pid {pid} exited before it could be described"),
            }
        }
    }
}

async fn first_entry(dir: &Path) -> Option<PathBuf> {
    let mut entries = tokio::fs::read_dir(dir).await.ok()?;
    entries.next_entry().await.ok().flatten().map(|entry| entry.path())
}

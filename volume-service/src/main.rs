// SPDX-License-Identifier: GPL-3.0-only

//! Docker LVM volume plugin daemon
//!
//! Serves the Docker volume plugin protocol on a local TCP port and maps
//! every volume onto a btrfs-formatted LVM logical volume. Also carries the
//! one-shot `cleanup` and `activate` commands used during installation.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

mod cleanup;
mod config;
mod engine;
mod error;
mod health;
mod http;
mod logging;
#[cfg(test)]
mod testing;

use config::{Cli, Command, EngineArgs, ServeArgs};
use engine::{Engine, Host, SerializationLock, VolumeGroupManager};

#[tokio::main]
async fn main() -> Result<()> {
    load_env_file();
    let cli = Cli::parse();
    let _log_guard = logging::init(&cli.log_dir);

    tracing::info!(
        "Starting docker-lvm-plugin v{}",
        env!("CARGO_PKG_VERSION")
    );

    if unsafe { libc::geteuid() } != 0 {
        tracing::error!("docker-lvm-plugin must run as root");
        anyhow::bail!("docker-lvm-plugin must run with root privileges");
    }

    match cli.command.unwrap_or_else(|| Command::Serve(ServeArgs::from_env())) {
        Command::Serve(args) => serve(&cli.engine, args).await,
        Command::Cleanup {
            block_device,
            volume_group,
        } => cleanup(&block_device, &volume_group).await,
        Command::Activate { group } => activate(&cli.engine, group.as_deref()).await,
    }
}

/// Settings from the env file are only defaults: variables already set win.
fn load_env_file() {
    let path = std::env::var_os(config::ENV_FILE_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(config::DEFAULT_ENV_FILE));

    if path.exists()
        && let Err(e) = dotenvy::from_path(&path)
    {
        eprintln!(
            "docker-lvm-plugin: failed to load {}: {e}",
            path.display()
        );
    }
}

async fn serve(engine_args: &EngineArgs, args: ServeArgs) -> Result<()> {
    let config = engine_args.validate()?;
    let addr = args.address()?;

    let missing = volume_sys::lvm_tools::missing_tools();
    if !missing.is_empty() {
        tracing::error!("Required tools not found: {}", missing.join(", "));
        anyhow::bail!("Required tools not found: {}", missing.join(", "));
    }

    tracing::info!(
        "Volume group {} on {}, mountpoints under {}",
        config.volume_group,
        config.physical_volume,
        config.mount_base.display()
    );

    let engine = Arc::new(Engine::system(config));
    engine.ensure_volume_group().await?;

    let health = args
        .health_interval()
        .map(|interval| health::spawn(engine.clone(), interval));

    let result = http::serve(http::AppState::new(engine, args.default_size), addr).await;

    if let Some(task) = health {
        task.abort();
    }
    result
}

async fn cleanup(block_device: &str, volume_group: &str) -> Result<()> {
    let span = tracing::info_span!("cleanup", group = volume_group);
    let groups =
        VolumeGroupManager::new(Host::system().executor(span.clone()), SerializationLock::new(), span);

    let outcome = cleanup::run(&groups, block_device, volume_group).await;
    match &outcome {
        cleanup::CleanupOutcome::Finished => println!("Volume group cleanup finished"),
        cleanup::CleanupOutcome::InvalidEnvironment(reason) => {
            eprintln!("Plugin cannot be installed on {block_device}: {reason}");
        }
        cleanup::CleanupOutcome::Failed(e) => eprintln!("Cleaning failed with error: {e}"),
    }

    let code = outcome.exit_code();
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

async fn activate(engine_args: &EngineArgs, group: Option<&str>) -> Result<()> {
    let config = engine_args.validate_for_group(group)?;
    let engine = Engine::system(config);
    engine.ensure_volume_group().await?;
    tracing::info!("Volume group {} is active", engine.config().volume_group);
    Ok(())
}

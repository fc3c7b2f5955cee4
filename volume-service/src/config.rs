// SPDX-License-Identifier: GPL-3.0-only

//! Command line and environment configuration
//!
//! Every flag falls back to the environment variable the plugin has always
//! been configured with, so an env file loaded before parsing keeps working.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::error::{Result, ServiceError};

pub const ENV_FILE_VAR: &str = "LVM_PLUGIN_ENV_FILE";
pub const DEFAULT_ENV_FILE: &str = "/etc/docker-lvm-plugin/lvm-environment";

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 7373;
pub const DEFAULT_SIZE: &str = "256m";
pub const DEFAULT_HEALTH_INTERVAL_SECS: u64 = 180;
pub const DEFAULT_SHARED_VOLUME: &str = "shared-space";

#[derive(Debug, Parser)]
#[command(name = "docker-lvm-plugin")]
#[command(about = "Docker volume plugin backed by LVM logical volumes")]
#[command(version)]
pub struct Cli {
    #[command(flatten)]
    pub engine: EngineArgs,

    /// Directory for the rolling log file.
    #[arg(
        long,
        global = true,
        env = "LVM_PLUGIN_LOG_DIR",
        default_value = "/var/log/docker-lvm-plugin"
    )]
    pub log_dir: PathBuf,

    /// Defaults to `serve`.
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serve the plugin API.
    Serve(ServeArgs),

    /// Remove a leftover volume group that sits on another block device.
    Cleanup {
        block_device: String,
        volume_group: String,
    },

    /// Make sure the volume group exists and is active, then exit.
    Activate {
        /// Group to activate instead of the configured one.
        group: Option<String>,
    },
}

/// Settings shared by every subcommand that touches volumes.
#[derive(Debug, Clone, Args)]
pub struct EngineArgs {
    /// Block device holding the volume group.
    #[arg(long, global = true, env = "PHYSICAL_VOLUME")]
    pub physical_volume: Option<String>,

    #[arg(long, global = true, env = "VOLUME_GROUP")]
    pub volume_group: Option<String>,

    /// Base directory for volume mountpoints.
    #[arg(long, global = true, env = "MNT_DIR", default_value = "/mnt/")]
    pub mount_dir: PathBuf,

    /// Directory holding one filestorage link per tracked mounted volume.
    #[arg(
        long,
        global = true,
        env = "FILESTORAGE_MAPPING",
        default_value = "/var/lib/lvm-plugin/filestorage"
    )]
    pub filestorage_dir: PathBuf,

    /// Volumes mounted once and shared by all consumers.
    #[arg(
        long = "shared-volume",
        global = true,
        env = "SHARED_VOLUMES",
        value_delimiter = ',',
        default_value = DEFAULT_SHARED_VOLUME
    )]
    pub shared_volumes: Vec<String>,
}

#[derive(Debug, Clone, Parser)]
pub struct ServeArgs {
    #[arg(long, env = "LVM_PLUGIN_HOST", default_value = DEFAULT_HOST)]
    pub host: String,

    #[arg(long, env = "LVM_PLUGIN_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Size used when a create request carries none.
    #[arg(long, env = "LVM_PLUGIN_DEFAULT_SIZE", default_value = DEFAULT_SIZE)]
    pub default_size: String,

    /// Seconds between background volume group checks; 0 disables them.
    #[arg(long, env = "LVM_PLUGIN_HEALTH_INTERVAL", default_value_t = DEFAULT_HEALTH_INTERVAL_SECS)]
    pub health_interval_secs: u64,
}

impl ServeArgs {
    /// Serve settings when no subcommand was given: environment, then defaults.
    pub fn from_env() -> Self {
        ServeArgs::parse_from(["serve"])
    }

    pub fn address(&self) -> Result<SocketAddr> {
        let addr = format!("{}:{}", self.host, self.port);
        addr.parse()
            .map_err(|e| ServiceError::PreconditionViolation(format!("Invalid listen address {addr}: {e}")))
    }

    pub fn health_interval(&self) -> Option<Duration> {
        (self.health_interval_secs > 0).then(|| Duration::from_secs(self.health_interval_secs))
    }
}

/// Validated engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub physical_volume: String,
    pub volume_group: String,
    pub mount_base: PathBuf,
    pub filestorage_dir: PathBuf,
    pub shared_volumes: BTreeSet<String>,
}

impl EngineArgs {
    /// Fail fast when the device or group is missing.
    pub fn validate(&self) -> Result<EngineConfig> {
        let physical_volume = required(self.physical_volume.as_deref(), "PHYSICAL_VOLUME")?;
        let volume_group = required(self.volume_group.as_deref(), "VOLUME_GROUP")?;

        if volume_group.contains('/') {
            return Err(ServiceError::PreconditionViolation(format!(
                "VOLUME_GROUP must be a plain name, got {volume_group}"
            )));
        }

        let shared_volumes = self
            .shared_volumes
            .iter()
            .map(|name| name.trim())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();

        Ok(EngineConfig {
            physical_volume,
            volume_group,
            mount_base: self.mount_dir.clone(),
            filestorage_dir: self.filestorage_dir.clone(),
            shared_volumes,
        })
    }

    /// Same as [`validate`](Self::validate) with the group replaced.
    pub fn validate_for_group(&self, group: Option<&str>) -> Result<EngineConfig> {
        match group {
            Some(group) => EngineArgs {
                volume_group: Some(group.to_string()),
                ..self.clone()
            }
            .validate(),
            None => self.validate(),
        }
    }
}

fn required(value: Option<&str>, variable: &str) -> Result<String> {
    match value.map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value.to_string()),
        _ => Err(ServiceError::PreconditionViolation(format!(
            "{variable} is not set"
        ))),
    }
}

// SPDX-License-Identifier: GPL-3.0-only

//! Low-level system operations for the LVM volume plugin
//!
//! This crate owns every contact with the host:
//! - Running external commands with bounded retries
//! - Building LVM, mount and filesystem command lines and parsing their output
//! - Reading the kernel mount table
//! - Enumerating processes that hold a device or path open
//!
//! Nothing here keeps state between calls; the daemon re-queries the host on
//! every request.

pub mod error;
pub mod exec;
pub mod holders;
pub mod lvm_tools;
pub mod mounts;
pub mod naming;

pub use error::{Result, SysError};
pub use exec::{Backoff, Budget, Cmd, CommandExecutor, CommandOutput, CommandRunner, SystemRunner};
pub use holders::{HolderInfo, HolderInspector, ProcfsInspector};
pub use mounts::{MountTable, ProcMountTable};
pub use naming::VolumeNaming;

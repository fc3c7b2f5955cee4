// SPDX-License-Identifier: GPL-3.0-only

//! Shared types for the LVM volume plugin
//!
//! Wire messages of the Docker volume plugin protocol and the error kinds the
//! daemon reports through it.

pub mod error;
pub mod plugin;

pub use error::{ErrorKind, PluginFailure};
pub use plugin::*;

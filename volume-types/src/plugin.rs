// SPDX-License-Identifier: GPL-3.0-only

//! Docker volume plugin protocol messages
//!
//! Field names follow the Docker plugin API, which uses PascalCase keys and
//! reports failures through an `Err` string on every reply.

use serde::{Deserialize, Serialize};

/// Driver name advertised to Docker in `Plugin.Activate`.
pub const VOLUME_DRIVER: &str = "VolumeDriver";

/// Request carrying only a volume name (Remove, Path, Get).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameRequest {
    #[serde(rename = "Name")]
    pub name: String,
}

/// `VolumeDriver.Create` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRequest {
    #[serde(rename = "Name")]
    pub name: String,

    /// Driver options passed with `docker volume create -o`; Docker sends
    /// `null` when none were given.
    #[serde(rename = "Opts", default)]
    pub opts: Option<CreateOptions>,
}

impl CreateRequest {
    /// Requested size, if any was given.
    pub fn size(&self) -> Option<&str> {
        self.opts
            .as_ref()
            .and_then(|opts| opts.size.as_deref())
            .filter(|size| !size.trim().is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOptions {
    #[serde(default)]
    pub size: Option<String>,
}

/// `VolumeDriver.Mount` / `VolumeDriver.Unmount` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountRequest {
    #[serde(rename = "Name")]
    pub name: String,

    /// Caller id Docker attaches to mount/unmount pairs.
    #[serde(rename = "ID", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Whether the volume keeps a filestorage link while mounted.
    #[serde(rename = "is_schain", default, skip_serializing_if = "Option::is_none")]
    pub tracked: Option<bool>,
}

impl MountRequest {
    pub fn is_tracked(&self) -> bool {
        self.tracked.unwrap_or(true)
    }
}

/// `physical-volume-size` request; the configured device is used when no
/// name is given.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSizeRequest {
    #[serde(rename = "Name", default)]
    pub name: Option<String>,
}

/// Successful reply: the operation body plus an empty `Err`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reply<T> {
    #[serde(flatten)]
    pub body: T,

    #[serde(rename = "Err")]
    pub err: String,
}

impl<T> Reply<T> {
    pub fn ok(body: T) -> Self {
        Self {
            body,
            err: String::new(),
        }
    }
}

/// Failed reply: only the `Err` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReply {
    #[serde(rename = "Err")]
    pub err: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Empty {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Implements {
    pub implements: Vec<String>,
}

impl Default for Implements {
    fn default() -> Self {
        Self {
            implements: vec![VOLUME_DRIVER.to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MountpointBody {
    pub mountpoint: String,
}

/// A volume as listed to Docker. The status map is always empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VolumeEntry {
    pub name: String,
    pub status: serde_json::Map<String, serde_json::Value>,
}

impl VolumeEntry {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: serde_json::Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct VolumeBody {
    pub volume: VolumeEntry,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct VolumesBody {
    pub volumes: Vec<VolumeEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Capabilities {
    pub scope: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CapabilitiesBody {
    pub capabilities: Capabilities,
}

impl Default for CapabilitiesBody {
    fn default() -> Self {
        Self {
            capabilities: Capabilities {
                scope: "global".to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceSizeBody {
    pub name: String,
    pub size: u64,
}

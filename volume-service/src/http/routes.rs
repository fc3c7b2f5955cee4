// SPDX-License-Identifier: GPL-3.0-only

//! Docker volume plugin handlers
//!
//! Each operation runs in its own task so a client that disconnects midway
//! cannot cancel a half-finished lifecycle step.

use std::future::Future;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{FromRequest, Request, State};
use serde::de::DeserializeOwned;
use tracing::warn;
use volume_types::{
    CapabilitiesBody, CreateRequest, DeviceSizeBody, DeviceSizeRequest, Empty, Implements,
    MountRequest, MountpointBody, NameRequest, Reply, VolumeBody, VolumeEntry, VolumesBody,
};

use super::AppState;
use super::error::ApiError;
use crate::error::ServiceError;

/// JSON request body whatever the content type; an empty body reads as `{}`.
pub struct PluginBody<T>(pub T);

impl<T, S> FromRequest<S> for PluginBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|e| ApiError::bad_request(format!("Malformed request body: {e}")))?;

        let body: &[u8] = if bytes.iter().all(u8::is_ascii_whitespace) {
            b"{}"
        } else {
            &bytes
        };

        serde_json::from_slice(body)
            .map(PluginBody)
            .map_err(|e| ApiError::bad_request(format!("Malformed request body: {e}")))
    }
}

/// Run `operation` to completion in a separate task.
pub(super) async fn detached<F, T>(operation: F) -> Result<T, ApiError>
where
    F: Future<Output = Result<T, ServiceError>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(operation)
        .await
        .map_err(ApiError::task_failed)?
        .map_err(ApiError::from)
}

type PluginReply<T> = Result<Json<Reply<T>>, ApiError>;

fn reply<T>(body: T) -> PluginReply<T> {
    Ok(Json(Reply::ok(body)))
}

pub(super) async fn index() -> Json<Reply<Empty>> {
    Json(Reply::ok(Empty {}))
}

pub(super) async fn activate() -> Json<Reply<Implements>> {
    Json(Reply::ok(Implements::default()))
}

pub(super) async fn capabilities() -> Json<Reply<CapabilitiesBody>> {
    Json(Reply::ok(CapabilitiesBody::default()))
}

pub(super) async fn create(
    State(state): State<AppState>,
    PluginBody(request): PluginBody<CreateRequest>,
) -> PluginReply<Empty> {
    let size = request
        .size()
        .unwrap_or(state.default_size.as_str())
        .to_string();
    let engine = state.engine.clone();
    detached(async move { engine.volumes().create(&request.name, &size).await }).await?;
    reply(Empty {})
}

pub(super) async fn remove(
    State(state): State<AppState>,
    PluginBody(request): PluginBody<NameRequest>,
) -> PluginReply<Empty> {
    let engine = state.engine.clone();
    detached(async move { engine.volumes().remove(&request.name).await }).await?;
    reply(Empty {})
}

pub(super) async fn mount(
    State(state): State<AppState>,
    PluginBody(request): PluginBody<MountRequest>,
) -> PluginReply<MountpointBody> {
    let engine = state.engine.clone();
    let mountpoint = detached(async move {
        engine
            .volumes()
            .mount(&request.name, request.is_tracked())
            .await
    })
    .await?;
    reply(MountpointBody {
        mountpoint: mountpoint.to_string_lossy().into_owned(),
    })
}

pub(super) async fn unmount(
    State(state): State<AppState>,
    PluginBody(request): PluginBody<MountRequest>,
) -> PluginReply<Empty> {
    let engine = state.engine.clone();
    detached(async move {
        engine
            .volumes()
            .unmount(&request.name, request.is_tracked())
            .await
    })
    .await?;
    reply(Empty {})
}

pub(super) async fn path(
    State(state): State<AppState>,
    PluginBody(request): PluginBody<NameRequest>,
) -> PluginReply<MountpointBody> {
    let engine = state.engine.clone();
    let mountpoint = detached(async move { engine.volumes().path(&request.name).await }).await?;
    reply(MountpointBody {
        mountpoint: mountpoint.to_string_lossy().into_owned(),
    })
}

pub(super) async fn get(
    State(state): State<AppState>,
    PluginBody(request): PluginBody<NameRequest>,
) -> PluginReply<VolumeBody> {
    let engine = state.engine.clone();
    let found = detached(async move {
        engine
            .volumes()
            .get(&request.name)
            .await?
            .ok_or_else(|| ServiceError::NotFound("No such volume".to_string()))
    })
    .await?;
    reply(VolumeBody {
        volume: VolumeEntry::named(found),
    })
}

pub(super) async fn list(State(state): State<AppState>) -> PluginReply<VolumesBody> {
    let engine = state.engine.clone();
    let names = detached(async move { engine.volumes().volumes().await }).await?;
    reply(VolumesBody {
        volumes: names.into_iter().map(VolumeEntry::named).collect(),
    })
}

pub(super) async fn device_size(
    State(state): State<AppState>,
    PluginBody(request): PluginBody<DeviceSizeRequest>,
) -> PluginReply<DeviceSizeBody> {
    let name = request
        .name
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| state.engine.config().physical_volume.clone());

    let engine = state.engine.clone();
    let device = name.clone();
    let size = detached(async move { engine.groups().block_device_size(&device).await })
        .await
        .map_err(|e| {
            warn!("Size of {name} unavailable: {e:?}");
            ApiError::bad_request("No such volume")
        })?;

    reply(DeviceSizeBody { name, size })
}

// ── Registry and pipeline refresh ──
//
// Fetches the five registries and the assist pipeline list. Area,
// device, and entity registries are required; floors and labels are
// optional because older servers do not expose them. Results that
// arrive after a context reset are discarded.

use hasync_api::Request;
use serde::de::DeserializeOwned;

use super::context::SyncContext;
use crate::error::CoreError;
use crate::model::{Area, Device, EntityEntry, Floor, Label, PipelineList, RegistryRecord, Snapshot, index_by_id};
use crate::transport::Transport;

async fn fetch<T, R>(transport: &T, request: Request) -> Result<R, CoreError>
where
    T: Transport,
    R: DeserializeOwned,
{
    let kind = request.kind.clone();
    let value = transport
        .request(request)
        .await
        .map_err(|e| CoreError::fetch(&kind, e))?;
    serde_json::from_value(value)
        .map_err(|e| CoreError::Internal(format!("Malformed '{kind}' result: {e}")))
}

async fn fetch_registry<T, R>(transport: &T, request: Request) -> Result<Snapshot<R>, CoreError>
where
    T: Transport,
    R: DeserializeOwned + RegistryRecord,
{
    fetch::<T, Vec<R>>(transport, request).await.map(index_by_id)
}

impl SyncContext {
    /// Fetch all registries and replace the held snapshots.
    ///
    /// Required registries are replaced together only if all three
    /// arrive; a failure leaves every previous snapshot in place.
    pub async fn refresh_registries<T: Transport>(&self, transport: &T) -> Result<(), CoreError> {
        let epoch = self.epoch();
        let (areas, devices, entities, floors, labels) = tokio::join!(
            fetch_registry::<T, Area>(transport, Request::area_registry()),
            fetch_registry::<T, Device>(transport, Request::device_registry()),
            fetch_registry::<T, EntityEntry>(transport, Request::entity_registry()),
            fetch_registry::<T, Floor>(transport, Request::floor_registry()),
            fetch_registry::<T, Label>(transport, Request::label_registry()),
        );

        let (areas, devices, entities) = (areas?, devices?, entities?);
        if !self.is_current(epoch) {
            tracing::debug!("registries fetched for a reset context, discarding");
            return Err(CoreError::Disconnected);
        }
        tracing::debug!(
            areas = areas.len(),
            devices = devices.len(),
            entities = entities.len(),
            "registries fetched"
        );
        self.set_areas(areas);
        self.set_devices(devices);
        self.set_entities(entities);

        match floors {
            Ok(floors) => self.set_floors(floors),
            Err(e) => tracing::warn!(error = %e, "floor registry unavailable"),
        }
        match labels {
            Ok(labels) => self.set_labels(labels),
            Err(e) => tracing::warn!(error = %e, "label registry unavailable"),
        }
        Ok(())
    }

    /// Fetch the assist pipeline list and resolve the selection.
    pub async fn refresh_pipelines<T: Transport>(&self, transport: &T) -> Result<(), CoreError> {
        let epoch = self.epoch();
        let list: PipelineList = fetch(transport, Request::pipelines()).await?;
        if !self.is_current(epoch) {
            return Err(CoreError::Disconnected);
        }
        tracing::debug!(
            pipelines = list.pipelines.len(),
            preferred = ?list.preferred_pipeline,
            "pipelines fetched"
        );
        self.set_pipelines(list);
        Ok(())
    }
}

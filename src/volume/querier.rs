//! Volume lookup, used when importing an existing volume

use crate::domain::ports::StorageApiRef;
use crate::error::{Error, Result};
use crate::volume::{find_volume, resolve_vstore, workload_field, Protocol, VolumeHandle};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Parameters of a query request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryVolumeModel {
    pub protocol: Protocol,
    pub name: String,
    #[serde(default)]
    pub vstore_name: Option<String>,
    /// Expected workload type; checked against the volume when set
    #[serde(default)]
    pub workload_type: Option<String>,
}

pub struct Querier {
    api: StorageApiRef,
    model: QueryVolumeModel,
}

impl Querier {
    pub fn new(api: StorageApiRef, model: QueryVolumeModel) -> Self {
        Self { api, model }
    }

    pub async fn query(&self) -> Result<VolumeHandle> {
        let vstore_id = resolve_vstore(&self.api, self.model.vstore_name.as_deref()).await?;
        let volume = find_volume(&self.api, self.model.protocol, &self.model.name, &vstore_id)
            .await?
            .ok_or_else(|| Error::NotFound {
                kind: "volume".into(),
                name: self.model.name.clone(),
            })?;

        if let Some(workload) = self.model.workload_type.as_deref().filter(|w| !w.is_empty()) {
            let expected = self
                .api
                .get_application_type_by_name(workload)
                .await?
                .ok_or_else(|| Error::NotFound {
                    kind: "workload type".into(),
                    name: workload.into(),
                })?;
            let actual = volume.get_string_or_default(workload_field(self.model.protocol))?;
            if actual != expected.id() {
                return Err(Error::Validation(format!(
                    "volume {} has workload type id {:?}, but {} has id {}",
                    self.model.name,
                    actual,
                    workload,
                    expected.id()
                )));
            }
        }

        debug!(volume = %self.model.name, id = %volume.id(), "Queried volume");
        VolumeHandle::from_object(self.model.protocol, &volume)
    }
}

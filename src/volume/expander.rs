//! Volume expansion

use crate::domain::object::StorageObject;
use crate::domain::ports::StorageApiRef;
use crate::error::{Error, Result};
use crate::transaction::Transaction;
use crate::volume::{find_volume, resolve_vstore, Protocol};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

/// Parameters of an expand request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpandVolumeModel {
    pub protocol: Protocol,
    pub name: String,
    #[serde(default)]
    pub vstore_name: Option<String>,
    /// New capacity in 512-byte sectors
    pub capacity: i64,
}

/// Grow a filesystem or LUN. Shrinking is refused.
pub struct Expander {
    api: StorageApiRef,
    model: ExpandVolumeModel,
    vstore_id: String,
    target: Option<StorageObject>,
    /// Set when the volume already has the requested size
    unchanged: bool,
}

impl Expander {
    pub fn new(api: StorageApiRef, model: ExpandVolumeModel) -> Self {
        Self {
            api,
            model,
            vstore_id: String::new(),
            target: None,
            unchanged: false,
        }
    }

    pub async fn expand(mut self) -> Result<()> {
        let mut tx: Transaction<Expander> = Transaction::new(format!("expand volume {}", self.model.name));
        tx.then("look up volume", |e: &mut Expander| e.lookup().boxed())
            .then("check pool", |e: &mut Expander| e.check_pool().boxed())
            .then("update capacity", |e: &mut Expander| e.update_capacity().boxed());
        tx.commit(&mut self).await
    }

    fn target(&self) -> Result<&StorageObject> {
        self.target.as_ref().ok_or_else(|| Error::NotFound {
            kind: "volume".into(),
            name: self.model.name.clone(),
        })
    }

    async fn lookup(&mut self) -> Result<()> {
        self.vstore_id = resolve_vstore(&self.api, self.model.vstore_name.as_deref()).await?;
        self.target = find_volume(&self.api, self.model.protocol, &self.model.name, &self.vstore_id).await?;

        let current = self.target()?.get_i64("CAPACITY")?;
        if self.model.capacity < current {
            return Err(Error::Validation(format!(
                "cannot shrink volume {} from {} to {}",
                self.model.name, current, self.model.capacity
            )));
        }
        self.unchanged = self.model.capacity == current;
        Ok(())
    }

    async fn check_pool(&mut self) -> Result<()> {
        if self.unchanged {
            return Ok(());
        }
        let pool_name = self.target()?.get_string_or_default("PARENTNAME")?;
        if self.api.get_pool_by_name(&pool_name).await?.is_none() {
            return Err(Error::NotFound {
                kind: "storage pool".into(),
                name: pool_name,
            });
        }
        Ok(())
    }

    async fn update_capacity(&mut self) -> Result<()> {
        if self.unchanged {
            info!(volume = %self.model.name, capacity = self.model.capacity, "Volume already has requested size");
            return Ok(());
        }
        let id = self.target()?.id();
        if self.model.protocol.is_filesystem() {
            self.api
                .update_filesystem(&id, json!({ "CAPACITY": self.model.capacity }))
                .await?;
        } else {
            self.api.extend_lun(&id, self.model.capacity).await?;
        }
        info!(volume = %self.model.name, capacity = self.model.capacity, "Expanded volume");
        Ok(())
    }
}

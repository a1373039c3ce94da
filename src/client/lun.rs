//! LUN facade

use crate::client::rest::{with_vstore, RestClient};
use crate::domain::object::StorageObject;
use crate::domain::ports::{Created, LunApi, LunParams};
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::Method;
use serde_json::json;
use tracing::info;

#[async_trait]
impl LunApi for RestClient {
    async fn get_lun_by_name(&self, name: &str, vstore_id: &str) -> Result<Option<StorageObject>> {
        self.get_by_name(&format!("Get lun {}", name), "/lun", name, vstore_id)
            .await
    }

    async fn get_lun_by_id(&self, id: &str) -> Result<Option<StorageObject>> {
        self.get_object(&format!("Get lun by id {}", id), &format!("/lun/{}", id))
            .await
    }

    async fn create_lun(&self, params: &LunParams) -> Result<Created> {
        let mut body = json!({
            "NAME": params.name,
            "PARENTID": params.parent_id,
            "CAPACITY": params.capacity,
            "ALLOCTYPE": params.alloc_type,
            "DESCRIPTION": params.description,
        });
        if let Some(workload) = params.workload_type_id.as_deref() {
            body["WORKLOADTYPEID"] = json!(workload);
        }
        let body = with_vstore(body, &params.vstore_id);

        match self
            .create_object(&format!("Create lun {}", params.name), "/lun", body)
            .await?
        {
            Some(lun) => {
                info!(name = %params.name, id = %lun.id(), "Created lun");
                Ok(Created::New(lun))
            }
            None => self
                .get_lun_by_name(&params.name, &params.vstore_id)
                .await?
                .map(Created::Existing)
                .ok_or_else(|| Error::NotFound {
                    kind: "lun".into(),
                    name: params.name.clone(),
                }),
        }
    }

    async fn extend_lun(&self, id: &str, capacity: i64) -> Result<()> {
        self.update(
            &format!("Extend lun {}", id),
            Method::PUT,
            "/lun/expand",
            json!({ "ID": id, "CAPACITY": capacity }),
        )
        .await
    }

    async fn delete_lun(&self, id: &str) -> Result<()> {
        self.delete(&format!("Delete lun {}", id), &format!("/lun/{}", id), None)
            .await
    }
}

//! Filesystem facade

use crate::client::rest::{with_vstore, RestClient};
use crate::domain::object::StorageObject;
use crate::domain::ports::{CloneFilesystemParams, Created, FilesystemApi, FilesystemParams};
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::info;

#[async_trait]
impl FilesystemApi for RestClient {
    async fn get_filesystem_by_name(&self, name: &str, vstore_id: &str) -> Result<Option<StorageObject>> {
        self.get_by_name(&format!("Get filesystem {}", name), "/filesystem", name, vstore_id)
            .await
    }

    async fn get_filesystem_by_id(&self, id: &str) -> Result<Option<StorageObject>> {
        self.get_object(&format!("Get filesystem by id {}", id), &format!("/filesystem/{}", id))
            .await
    }

    async fn create_filesystem(&self, params: &FilesystemParams) -> Result<Created> {
        let mut body = json!({
            "NAME": params.name,
            "PARENTID": params.parent_id,
            "CAPACITY": params.capacity,
            "DESCRIPTION": params.description,
            "ALLOCTYPE": params.alloc_type,
        });
        if let Some(workload) = params.workload_type_id.as_deref() {
            body["workloadTypeId"] = json!(workload);
        }
        let body = with_vstore(body, &params.vstore_id);

        let operation = format!("Create filesystem {}", params.name);
        match self.create_object(&operation, "/filesystem", body).await? {
            Some(fs) => {
                info!(name = %params.name, id = %fs.id(), "Created filesystem");
                Ok(Created::New(fs))
            }
            None => self
                .existing_filesystem(&params.name, &params.vstore_id)
                .await
                .map(Created::Existing),
        }
    }

    async fn update_filesystem(&self, id: &str, fields: Value) -> Result<()> {
        let mut body = fields;
        body["ID"] = json!(id);
        self.update(
            &format!("Update filesystem {}", id),
            Method::PUT,
            &format!("/filesystem/{}", id),
            body,
        )
        .await
    }

    async fn delete_filesystem(&self, id: &str, vstore_id: &str) -> Result<()> {
        let body = with_vstore(json!({ "ID": id }), vstore_id);
        self.delete(&format!("Delete filesystem {}", id), "/filesystem", Some(body))
            .await
    }

    async fn clone_filesystem(&self, params: &CloneFilesystemParams) -> Result<Created> {
        let body = with_vstore(
            json!({
                "NAME": params.name,
                "PARENTFILESYSTEMID": params.parent_filesystem_id,
                "ALLOCTYPE": params.alloc_type,
                "DESCRIPTION": params.description,
            }),
            &params.vstore_id,
        );

        let operation = format!("Clone filesystem {} from {}", params.name, params.parent_filesystem_id);
        match self.create_object(&operation, "/filesystem", body).await? {
            Some(fs) => Ok(Created::New(fs)),
            None => self
                .existing_filesystem(&params.name, &params.vstore_id)
                .await
                .map(Created::Existing),
        }
    }

    async fn split_clone_filesystem(&self, id: &str, split_speed: u32, vstore_id: &str) -> Result<()> {
        let body = with_vstore(
            json!({
                "ID": id,
                "SPLITENABLE": true,
                "SPLITSPEED": split_speed,
            }),
            vstore_id,
        );
        self.update(
            &format!("Split clone filesystem {}", id),
            Method::PUT,
            "/filesystem_split_switch",
            body,
        )
        .await
    }

    async fn stop_split_clone_filesystem(&self, id: &str, vstore_id: &str) -> Result<()> {
        let body = with_vstore(json!({ "ID": id, "SPLITENABLE": false }), vstore_id);
        self.update(
            &format!("Stop split clone filesystem {}", id),
            Method::PUT,
            "/filesystem_split_switch",
            body,
        )
        .await
    }
}

impl RestClient {
    /// Fetch the object that made a create report "already exists"
    async fn existing_filesystem(&self, name: &str, vstore_id: &str) -> Result<StorageObject> {
        info!(name, "Filesystem already exists, reusing it");
        self.get_filesystem_by_name(name, vstore_id)
            .await?
            .ok_or_else(|| Error::NotFound {
                kind: "filesystem".into(),
                name: name.into(),
            })
    }
}

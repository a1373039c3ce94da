//! Pool, vstore, workload type and system facade

use crate::client::rest::RestClient;
use crate::domain::object::StorageObject;
use crate::domain::ports::ResourceApi;
use crate::error::{Error, Result};
use async_trait::async_trait;

#[async_trait]
impl ResourceApi for RestClient {
    async fn get_pool_by_name(&self, name: &str) -> Result<Option<StorageObject>> {
        self.get_by_name(&format!("Get pool {}", name), "/storagepool", name, "")
            .await
    }

    async fn get_vstore_by_name(&self, name: &str) -> Result<Option<StorageObject>> {
        self.get_by_name(&format!("Get vstore {}", name), "/vstore", name, "")
            .await
    }

    async fn get_application_type_by_name(&self, name: &str) -> Result<Option<StorageObject>> {
        self.get_by_name(&format!("Get workload type {}", name), "/workload_type", name, "")
            .await
    }

    async fn get_system(&self) -> Result<StorageObject> {
        self.get_object("Get system info", "/system/")
            .await?
            .ok_or_else(|| Error::Protocol("system info response carries no object".into()))
    }
}

//! NFS and DataTurbo share facades

use crate::client::rest::{filter, vstore_param, with_vstore, RestClient};
use crate::domain::object::StorageObject;
use crate::domain::ports::{
    Created, DtfsShareApi, DtfsShareParams, NfsShareAccessParams, NfsShareApi, NfsShareParams,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::Method;
use serde_json::json;
use tracing::info;

// =============================================================================
// NFS
// =============================================================================

#[async_trait]
impl NfsShareApi for RestClient {
    async fn get_nfs_share_by_path(&self, path: &str, vstore_id: &str) -> Result<Option<StorageObject>> {
        let query = vstore_param(
            &format!("/NFSHARE?{}&range=[0-100]", filter("SHAREPATH", path)),
            vstore_id,
        );
        self.get_first_matching(&format!("Get nfs share {}", path), &query, "SHAREPATH", path)
            .await
    }

    async fn create_nfs_share(&self, params: &NfsShareParams) -> Result<Created> {
        let body = with_vstore(
            json!({
                "SHAREPATH": params.share_path,
                "FSID": params.fs_id,
                "DESCRIPTION": params.description,
            }),
            &params.vstore_id,
        );

        let operation = format!("Create nfs share {}", params.share_path);
        match self.create_object(&operation, "/NFSHARE", body).await? {
            Some(share) => {
                info!(path = %params.share_path, id = %share.id(), "Created nfs share");
                Ok(Created::New(share))
            }
            None => self
                .get_nfs_share_by_path(&params.share_path, &params.vstore_id)
                .await?
                .map(Created::Existing)
                .ok_or_else(|| Error::NotFound {
                    kind: "nfs share".into(),
                    name: params.share_path.clone(),
                }),
        }
    }

    async fn delete_nfs_share(&self, id: &str, vstore_id: &str) -> Result<()> {
        let body = with_vstore(json!({}), vstore_id);
        self.delete(&format!("Delete nfs share {}", id), &format!("/NFSHARE/{}", id), Some(body))
            .await
    }

    async fn get_nfs_share_access(
        &self,
        share_id: &str,
        client: &str,
        vstore_id: &str,
    ) -> Result<Option<StorageObject>> {
        let query = vstore_param(&format!("/NFS_SHARE_AUTH_CLIENT?PARENTID={}", share_id), vstore_id);
        let clients = self
            .get_batch_objs(&format!("Get nfs share {} clients", share_id), &query)
            .await?;
        for obj in clients {
            if obj.get_string_or_default("NAME")? == client {
                return Ok(Some(obj));
            }
        }
        Ok(None)
    }

    async fn allow_nfs_share_access(&self, params: &NfsShareAccessParams) -> Result<()> {
        let body = with_vstore(
            json!({
                "NAME": params.name,
                "PARENTID": params.share_id,
                "ACCESSVAL": params.access_val,
                "SYNC": 0,
                "ALLSQUASH": params.all_squash,
                "ROOTSQUASH": params.root_squash,
            }),
            &params.vstore_id,
        );
        self.associate(
            &format!("Allow nfs share {} access for {}", params.share_id, params.name),
            Method::POST,
            "/NFS_SHARE_AUTH_CLIENT",
            body,
        )
        .await
    }
}

// =============================================================================
// DataTurbo
// =============================================================================

#[async_trait]
impl DtfsShareApi for RestClient {
    async fn get_dtfs_share_by_name(&self, name: &str, vstore_id: &str) -> Result<Option<StorageObject>> {
        self.get_by_name(&format!("Get dtfs share {}", name), "/dtfs_share", name, vstore_id)
            .await
    }

    async fn create_dtfs_share(&self, params: &DtfsShareParams) -> Result<Created> {
        let body = with_vstore(
            json!({
                "NAME": params.name,
                "sharePath": format!("/{}/", params.name),
                "fsId": params.fs_id,
                "description": params.description,
            }),
            &params.vstore_id,
        );

        let operation = format!("Create dtfs share {}", params.name);
        match self.create_object(&operation, "/dtfs_share", body).await? {
            Some(share) => Ok(Created::New(share)),
            None => self
                .get_dtfs_share_by_name(&params.name, &params.vstore_id)
                .await?
                .map(Created::Existing)
                .ok_or_else(|| Error::NotFound {
                    kind: "dtfs share".into(),
                    name: params.name.clone(),
                }),
        }
    }

    async fn delete_dtfs_share(&self, id: &str, vstore_id: &str) -> Result<()> {
        let body = with_vstore(json!({ "ID": id }), vstore_id);
        self.delete(&format!("Delete dtfs share {}", id), "/dtfs_share", Some(body))
            .await
    }

    async fn add_dtfs_share_auth_user(&self, share_id: &str, user: &str, vstore_id: &str) -> Result<()> {
        let body = with_vstore(
            json!({
                "PARENTID": share_id,
                "NAME": user,
                "PERMISSION": 1,
            }),
            vstore_id,
        );
        self.associate(
            &format!("Add dtfs share {} user {}", share_id, user),
            Method::POST,
            "/dtfs_auth_user",
            body,
        )
        .await
    }
}

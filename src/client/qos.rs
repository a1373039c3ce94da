//! QoS policy facade
//!
//! Policies are created per object. A policy reports the objects it covers
//! in `FSLIST` / `LUNLIST`, which the array encodes as a JSON string
//! (`"[\"12\",\"13\"]"`).

use crate::client::rest::{filter, vstore_param, with_vstore, RestClient};
use crate::domain::object::StorageObject;
use crate::domain::ports::{Created, QosApi, QosCreateParams, QosObjectType};
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{info, warn};

/// I/O priority the object must carry before a lower-bound policy applies
pub const IO_PRIORITY_HIGH: i64 = 3;

/// Objects covered by a policy
pub fn qos_members(policy: &StorageObject, object_type: QosObjectType) -> Result<Vec<String>> {
    let field = object_type.list_field();
    match policy.raw(field) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect()),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(Vec::new()),
        Some(Value::String(s)) => serde_json::from_str::<Vec<String>>(s).map_err(|_| Error::Decode {
            field: field.into(),
            expected: "JSON list of IDs",
            found: s.clone(),
        }),
        Some(_) => Err(Error::Decode {
            field: field.into(),
            expected: "JSON list of IDs",
            found: "non-list value".into(),
        }),
    }
}

fn object_path(object_type: QosObjectType, object_id: &str) -> String {
    match object_type {
        QosObjectType::Filesystem => format!("/filesystem/{}", object_id),
        QosObjectType::Lun => format!("/lun/{}", object_id),
    }
}

#[async_trait]
impl QosApi for RestClient {
    async fn create_qos(&self, params: &QosCreateParams) -> Result<Created> {
        if params.params.has_lower_bound() {
            self.update(
                &format!("Raise io priority of {} {}", params.object_type, params.object_id),
                Method::PUT,
                &object_path(params.object_type, &params.object_id),
                json!({ "ID": params.object_id, "IOPRIORITY": IO_PRIORITY_HIGH }),
            )
            .await?;
        }

        let mut body = json!({
            "NAME": params.name,
            "DESCRIPTION": "Created from CSI",
            "SCHEDULEPOLICY": 1,
            "SCHEDULESTARTTIME": 1410969600,
            "STARTTIME": "00:00",
            "DURATION": 86400,
        });
        body[params.object_type.list_field()] = json!([params.object_id]);
        if let Some(map) = body.as_object_mut() {
            map.extend(params.params.to_fields());
        }
        let body = with_vstore(body, &params.vstore_id);

        let operation = format!("Create qos {}", params.name);
        let created = match self.create_object(&operation, "/ioclass", body).await? {
            Some(qos) => Created::New(qos),
            None => {
                let query = vstore_param(
                    &format!("/ioclass?{}", filter("NAME", &params.name)),
                    &params.vstore_id,
                );
                let existing = self
                    .get_first_matching(&operation, &query, "NAME", &params.name)
                    .await?
                    .ok_or_else(|| Error::NotFound {
                        kind: "qos".into(),
                        name: params.name.clone(),
                    })?;
                Created::Existing(existing)
            }
        };

        let qos = created.object();
        if qos.get_string_or_default("ENABLESTATUS")? != "true" {
            if let Err(e) = self.activate_qos(&qos.id(), &params.vstore_id).await {
                // A policy found by name belongs to whoever created it
                if created.is_new() {
                    warn!(qos = %qos.id(), error = %e, "Activate qos failed, deleting it");
                    if let Err(cleanup) = self.delete_qos(&qos.id(), &params.vstore_id).await {
                        warn!(qos = %qos.id(), error = %cleanup, "Delete inactive qos failed");
                    }
                }
                return Err(e);
            }
        }

        info!(qos = %qos.id(), object = %params.object_id, new = created.is_new(), "Created qos");
        Ok(created)
    }

    async fn get_qos_by_id(&self, id: &str, vstore_id: &str) -> Result<Option<StorageObject>> {
        self.get_object(
            &format!("Get qos {}", id),
            &vstore_param(&format!("/ioclass/{}", id), vstore_id),
        )
        .await
    }

    async fn activate_qos(&self, id: &str, vstore_id: &str) -> Result<()> {
        let body = with_vstore(json!({ "ID": id, "ENABLESTATUS": true }), vstore_id);
        self.update(&format!("Activate qos {}", id), Method::PUT, "/ioclass/active", body)
            .await
    }

    async fn deactivate_qos(&self, id: &str, vstore_id: &str) -> Result<()> {
        let body = with_vstore(json!({ "ID": id, "ENABLESTATUS": false }), vstore_id);
        self.update(&format!("Deactivate qos {}", id), Method::PUT, "/ioclass/active", body)
            .await
    }

    async fn delete_qos(&self, id: &str, vstore_id: &str) -> Result<()> {
        let body = with_vstore(json!({}), vstore_id);
        self.delete(&format!("Delete qos {}", id), &format!("/ioclass/{}", id), Some(body))
            .await
    }

    async fn remove_qos_object(
        &self,
        id: &str,
        object_type: QosObjectType,
        object_id: &str,
        vstore_id: &str,
    ) -> Result<()> {
        let Some(policy) = self.get_qos_by_id(id, vstore_id).await? else {
            return Ok(());
        };
        let remaining: Vec<String> = qos_members(&policy, object_type)?
            .into_iter()
            .filter(|member| member != object_id)
            .collect();

        let mut body = with_vstore(json!({ "ID": id }), vstore_id);
        body[object_type.list_field()] = json!(remaining);
        self.update(
            &format!("Remove {} {} from qos {}", object_type, object_id, id),
            Method::PUT,
            &format!("/ioclass/{}", id),
            body,
        )
        .await
    }
}

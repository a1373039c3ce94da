//! Host, group, mapping view and initiator facade

use crate::client::rest::RestClient;
use crate::domain::object::StorageObject;
use crate::domain::ports::{HostApi, InitiatorKind, IscsiTarget, MappingMember};
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::info;

/// Object type codes used by association endpoints
const TYPE_HOST: i64 = 21;
const TYPE_LUN: i64 = 11;
const TYPE_HOSTGROUP: i64 = 14;
const TYPE_LUNGROUP: i64 = 256;

/// `INITIATOR_TYPE` of FC initiators in host link queries
const FC_INITIATOR_TYPE: i64 = 223;

fn initiator_collection(kind: InitiatorKind) -> &'static str {
    match kind {
        InitiatorKind::Iscsi => "/iscsi_initiator",
        InitiatorKind::Fc => "/fc_initiator",
        InitiatorKind::Roce => "/NVMe_over_RoCE_initiator",
    }
}

fn member_type(member: MappingMember) -> i64 {
    match member {
        MappingMember::HostGroup => TYPE_HOSTGROUP,
        MappingMember::LunGroup => TYPE_LUNGROUP,
    }
}

/// Parse an iSCSI target port ID such as
/// `0+iqn.2006-08.com.huawei:oceanstor:2100::20400:192.168.1.10,t,0x0101`
pub fn parse_iscsi_target(id: &str) -> Option<IscsiTarget> {
    let (_, rest) = id.split_once('+')?;
    let rest = rest.split(",t,").next()?;
    let (iqn_part, portal) = rest.rsplit_once(':')?;
    let iqn = iqn_part.split("::").next()?;
    if iqn.is_empty() || portal.is_empty() {
        return None;
    }
    Some(IscsiTarget {
        portal: portal.to_string(),
        iqn: iqn.to_string(),
    })
}

impl RestClient {
    async fn get_or_fetch(&self, kind: &str, collection: &str, name: &str) -> Result<StorageObject> {
        let operation = format!("Create {} {}", kind, name);
        let body = if collection == "/host" {
            json!({ "NAME": name, "OPERATIONSYSTEM": 0 })
        } else {
            json!({ "NAME": name })
        };
        if let Some(obj) = self.create_object(&operation, collection, body).await? {
            info!(kind, name, id = %obj.id(), "Created object");
            return Ok(obj);
        }
        self.get_by_name(&operation, collection, name, "")
            .await?
            .ok_or_else(|| Error::NotFound {
                kind: kind.into(),
                name: name.into(),
            })
    }
}

#[async_trait]
impl HostApi for RestClient {
    async fn get_host_by_name(&self, name: &str) -> Result<Option<StorageObject>> {
        self.get_by_name(&format!("Get host {}", name), "/host", name, "")
            .await
    }

    async fn create_host(&self, name: &str) -> Result<StorageObject> {
        self.get_or_fetch("host", "/host", name).await
    }

    async fn get_hostgroup_by_name(&self, name: &str) -> Result<Option<StorageObject>> {
        self.get_by_name(&format!("Get hostgroup {}", name), "/hostgroup", name, "")
            .await
    }

    async fn create_hostgroup(&self, name: &str) -> Result<StorageObject> {
        self.get_or_fetch("hostgroup", "/hostgroup", name).await
    }

    async fn get_hostgroups_of_host(&self, host_id: &str) -> Result<Vec<StorageObject>> {
        self.get_list(
            &format!("Get hostgroups of host {}", host_id),
            &format!(
                "/hostgroup/associate?ASSOCIATEOBJTYPE={}&ASSOCIATEOBJID={}",
                TYPE_HOST, host_id
            ),
        )
        .await
    }

    async fn add_host_to_hostgroup(&self, host_id: &str, hostgroup_id: &str) -> Result<()> {
        self.associate(
            &format!("Add host {} to hostgroup {}", host_id, hostgroup_id),
            Method::POST,
            "/hostgroup/associate",
            json!({
                "ID": hostgroup_id,
                "ASSOCIATEOBJTYPE": TYPE_HOST,
                "ASSOCIATEOBJID": host_id,
            }),
        )
        .await
    }

    async fn get_lungroup_by_name(&self, name: &str) -> Result<Option<StorageObject>> {
        self.get_by_name(&format!("Get lungroup {}", name), "/lungroup", name, "")
            .await
    }

    async fn create_lungroup(&self, name: &str) -> Result<StorageObject> {
        self.get_or_fetch("lungroup", "/lungroup", name).await
    }

    async fn get_lungroups_of_lun(&self, lun_id: &str) -> Result<Vec<StorageObject>> {
        self.get_list(
            &format!("Get lungroups of lun {}", lun_id),
            &format!(
                "/lungroup/associate?ASSOCIATEOBJTYPE={}&ASSOCIATEOBJID={}",
                TYPE_LUN, lun_id
            ),
        )
        .await
    }

    async fn add_lun_to_lungroup(&self, lun_id: &str, lungroup_id: &str) -> Result<()> {
        self.associate(
            &format!("Add lun {} to lungroup {}", lun_id, lungroup_id),
            Method::POST,
            "/lungroup/associate",
            json!({
                "ID": lungroup_id,
                "ASSOCIATEOBJTYPE": TYPE_LUN,
                "ASSOCIATEOBJID": lun_id,
            }),
        )
        .await
    }

    async fn remove_lun_from_lungroup(&self, lun_id: &str, lungroup_id: &str) -> Result<()> {
        self.delete(
            &format!("Remove lun {} from lungroup {}", lun_id, lungroup_id),
            &format!(
                "/lungroup/associate?ID={}&ASSOCIATEOBJTYPE={}&ASSOCIATEOBJID={}",
                lungroup_id, TYPE_LUN, lun_id
            ),
            None,
        )
        .await
    }

    async fn get_mapping_by_name(&self, name: &str) -> Result<Option<StorageObject>> {
        self.get_by_name(&format!("Get mapping {}", name), "/mappingview", name, "")
            .await
    }

    async fn create_mapping(&self, name: &str) -> Result<StorageObject> {
        self.get_or_fetch("mapping", "/mappingview", name).await
    }

    async fn get_mappings_of(&self, member: MappingMember, member_id: &str) -> Result<Vec<StorageObject>> {
        self.get_list(
            &format!("Get mappings of {:?} {}", member, member_id),
            &format!(
                "/mappingview/associate?ASSOCIATEOBJTYPE={}&ASSOCIATEOBJID={}",
                member_type(member),
                member_id
            ),
        )
        .await
    }

    async fn add_to_mapping(&self, mapping_id: &str, member: MappingMember, member_id: &str) -> Result<()> {
        self.associate(
            &format!("Add {:?} {} to mapping {}", member, member_id, mapping_id),
            Method::PUT,
            "/mappingview/create_associate",
            json!({
                "ID": mapping_id,
                "ASSOCIATEOBJTYPE": member_type(member),
                "ASSOCIATEOBJID": member_id,
            }),
        )
        .await
    }

    async fn get_initiator(&self, kind: InitiatorKind, id: &str) -> Result<Option<StorageObject>> {
        self.get_object(
            &format!("Get {} initiator {}", kind, id),
            &format!("{}/{}", initiator_collection(kind), urlencoding::encode(id)),
        )
        .await
    }

    async fn add_initiator(&self, kind: InitiatorKind, id: &str) -> Result<StorageObject> {
        let operation = format!("Add {} initiator {}", kind, id);
        if let Some(initiator) = self
            .create_object(&operation, initiator_collection(kind), json!({ "ID": id }))
            .await?
        {
            return Ok(initiator);
        }
        self.get_initiator(kind, id).await?.ok_or_else(|| Error::NotFound {
            kind: format!("{} initiator", kind),
            name: id.into(),
        })
    }

    async fn add_initiator_to_host(&self, kind: InitiatorKind, id: &str, host_id: &str) -> Result<()> {
        self.associate(
            &format!("Add {} initiator {} to host {}", kind, id, host_id),
            Method::PUT,
            &format!("{}/{}", initiator_collection(kind), urlencoding::encode(id)),
            json!({
                "ID": id,
                "PARENTTYPE": TYPE_HOST,
                "PARENTID": host_id,
            }),
        )
        .await
    }

    async fn update_initiator(&self, kind: InitiatorKind, id: &str, fields: Value) -> Result<()> {
        let mut body = fields;
        body["ID"] = json!(id);
        self.update(
            &format!("Update {} initiator {}", kind, id),
            Method::PUT,
            &format!("{}/{}", initiator_collection(kind), urlencoding::encode(id)),
            body,
        )
        .await
    }

    async fn get_iscsi_targets(&self) -> Result<Vec<IscsiTarget>> {
        let ports = self.get_list("Get iSCSI target ports", "/iscsi_tgt_port").await?;
        let mut targets = Vec::with_capacity(ports.len());
        for port in ports {
            let id = port.id();
            match parse_iscsi_target(&id) {
                Some(target) => targets.push(target),
                None => {
                    return Err(Error::Decode {
                        field: "ID".into(),
                        expected: "iSCSI target port ID",
                        found: id,
                    })
                }
            }
        }
        Ok(targets)
    }

    async fn get_fc_target_wwns(&self, initiator_wwn: &str) -> Result<Vec<String>> {
        let links = self
            .get_list(
                &format!("Get FC host links of {}", initiator_wwn),
                &format!(
                    "/host_link?INITIATOR_TYPE={}&INITIATOR_PORT_WWN={}",
                    FC_INITIATOR_TYPE, initiator_wwn
                ),
            )
            .await?;
        let mut wwns = Vec::with_capacity(links.len());
        for link in links {
            let wwn = link.get_string("TARGET_PORT_WWN")?;
            if !wwns.contains(&wwn) {
                wwns.push(wwn);
            }
        }
        Ok(wwns)
    }

    async fn get_host_lun_id(&self, host_id: &str, lun_id: &str) -> Result<String> {
        let luns = self
            .get_list(
                &format!("Get host lun id of lun {}", lun_id),
                &format!(
                    "/lun/associate?TYPE={}&ASSOCIATEOBJTYPE={}&ASSOCIATEOBJID={}",
                    TYPE_LUN, TYPE_HOST, host_id
                ),
            )
            .await?;

        for lun in luns {
            if lun.id() != lun_id {
                continue;
            }
            let metadata = lun.get_string("ASSOCIATEMETADATA")?;
            let parsed: Value = serde_json::from_str(&metadata).map_err(|_| Error::Decode {
                field: "ASSOCIATEMETADATA".into(),
                expected: "JSON object",
                found: metadata.clone(),
            })?;
            return match parsed.get("HostLUNID") {
                Some(Value::Number(n)) => Ok(n.to_string()),
                Some(Value::String(s)) => Ok(s.clone()),
                _ => Err(Error::Decode {
                    field: "HostLUNID".into(),
                    expected: "integer",
                    found: metadata,
                }),
            };
        }

        Err(Error::NotFound {
            kind: "host lun".into(),
            name: format!("{} on host {}", lun_id, host_id),
        })
    }
}

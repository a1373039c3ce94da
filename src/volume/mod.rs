//! Volume Lifecycle Workflows
//!
//! One workflow object per operation. Each builds a [`Transaction`] whose
//! steps share the workflow's state, so IDs discovered by early steps are
//! visible to later steps and to the compensations.
//!
//! [`Transaction`]: crate::transaction::Transaction

pub mod creator;
pub mod deleter;
pub mod expander;
pub mod querier;

pub use creator::Creator;
pub use deleter::Deleter;
pub use expander::{ExpandVolumeModel, Expander};
pub use querier::{Querier, QueryVolumeModel};

use crate::domain::object::StorageObject;
use crate::domain::ports::{QosObjectType, StorageApiRef};
use crate::error::{Error, Result};
use crate::qos::ProductFamily;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

// =============================================================================
// Protocol
// =============================================================================

/// Access protocol of a volume; fixes the workflow's step plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Nfs,
    #[serde(alias = "dtfs")]
    DataTurbo,
    Block,
}

impl Protocol {
    pub fn is_filesystem(&self) -> bool {
        matches!(self, Protocol::Nfs | Protocol::DataTurbo)
    }

    pub fn qos_object_type(&self) -> QosObjectType {
        if self.is_filesystem() {
            QosObjectType::Filesystem
        } else {
            QosObjectType::Lun
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Nfs => write!(f, "nfs"),
            Protocol::DataTurbo => write!(f, "dataturbo"),
            Protocol::Block => write!(f, "block"),
        }
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "nfs" => Ok(Protocol::Nfs),
            "dataturbo" | "dtfs" => Ok(Protocol::DataTurbo),
            "block" | "san" => Ok(Protocol::Block),
            other => Err(Error::Validation(format!("unsupported protocol: {}", other))),
        }
    }
}

// =============================================================================
// Settings and Models
// =============================================================================

/// Per-backend knobs shared by all workflows
#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    pub product: ProductFamily,
    /// Interval between clone split status polls
    pub clone_poll_interval: Duration,
    /// Give up waiting for a clone split after this long
    pub clone_split_timeout: Duration,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            product: ProductFamily::DoradoV6,
            clone_poll_interval: Duration::from_secs(5),
            clone_split_timeout: Duration::from_secs(6 * 60 * 60),
        }
    }
}

/// Parameters of a create request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateVolumeModel {
    pub protocol: Protocol,
    pub name: String,
    pub pool_name: String,
    /// Capacity in 512-byte sectors
    pub capacity: i64,
    pub vstore_name: Option<String>,
    pub description: String,
    /// 0 = thick, 1 = thin
    pub alloc_type: i64,
    /// NFS clients granted access
    pub auth_clients: Vec<String>,
    /// 0 = read-only, 1 = read-write
    pub access_val: i64,
    /// 0 = all_squash, 1 = no_all_squash
    pub all_squash: i64,
    /// 0 = root_squash, 1 = no_root_squash
    pub root_squash: i64,
    /// DataTurbo users granted access
    pub auth_users: Vec<String>,
    /// QoS policy as JSON, e.g. `{"MAXIOPS": 1000}`
    pub qos: Option<String>,
    pub workload_type: Option<String>,
    /// Clone from this filesystem instead of creating an empty one
    pub clone_from: Option<String>,
    /// Split the clone from its parent and wait for completion
    pub split_clone: bool,
    /// 1 (low) .. 4 (highest)
    pub split_speed: u32,
}

impl Default for CreateVolumeModel {
    fn default() -> Self {
        Self {
            protocol: Protocol::Nfs,
            name: String::new(),
            pool_name: String::new(),
            capacity: 0,
            vstore_name: None,
            description: String::new(),
            alloc_type: 1,
            auth_clients: Vec::new(),
            access_val: 1,
            all_squash: 1,
            root_squash: 1,
            auth_users: Vec::new(),
            qos: None,
            workload_type: None,
            clone_from: None,
            split_clone: false,
            split_speed: 2,
        }
    }
}

/// Identifies an existing volume for delete/expand/query
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeRef {
    pub protocol: Protocol,
    pub name: String,
    #[serde(default)]
    pub vstore_name: Option<String>,
}

/// Result of a create or query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeHandle {
    pub name: String,
    pub id: String,
    pub protocol: Protocol,
    pub capacity: i64,
    pub share_path: Option<String>,
    pub qos_id: Option<String>,
    pub wwn: Option<String>,
}

impl VolumeHandle {
    pub fn volume_name(&self) -> &str {
        &self.name
    }

    pub(crate) fn from_object(protocol: Protocol, obj: &StorageObject) -> Result<Self> {
        let qos_id = obj.get_string_or_default("IOCLASSID")?;
        let wwn = obj.get_string_or_default("WWN")?;
        Ok(Self {
            name: obj.name(),
            id: obj.id(),
            protocol,
            capacity: obj.get_i64("CAPACITY")?,
            share_path: (protocol == Protocol::Nfs).then(|| share_path(&obj.name())),
            qos_id: (!qos_id.is_empty()).then_some(qos_id),
            wwn: (!wwn.is_empty()).then_some(wwn),
        })
    }
}

/// NFS export path of a filesystem
pub fn share_path(name: &str) -> String {
    format!("/{}/", name)
}

/// Field holding the workload type id of a filesystem or LUN
pub(crate) fn workload_field(protocol: Protocol) -> &'static str {
    if protocol.is_filesystem() {
        "workloadTypeId"
    } else {
        "WORKLOADTYPEID"
    }
}

// =============================================================================
// Shared lookups
// =============================================================================

/// Resolve an optional vstore name to its ID; empty for the system vstore
pub(crate) async fn resolve_vstore(api: &StorageApiRef, vstore_name: Option<&str>) -> Result<String> {
    match vstore_name {
        None | Some("") => Ok(String::new()),
        Some(name) => api
            .get_vstore_by_name(name)
            .await?
            .map(|vstore| vstore.id())
            .ok_or_else(|| Error::NotFound {
                kind: "vstore".into(),
                name: name.into(),
            }),
    }
}

/// Look up the base object (filesystem or LUN) of a volume
pub(crate) async fn find_volume(
    api: &StorageApiRef,
    protocol: Protocol,
    name: &str,
    vstore_id: &str,
) -> Result<Option<StorageObject>> {
    if protocol.is_filesystem() {
        api.get_filesystem_by_name(name, vstore_id).await
    } else {
        api.get_lun_by_name(name, vstore_id).await
    }
}

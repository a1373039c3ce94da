//! Domain Ports - Capability traits over the storage array
//!
//! Every workflow talks to the array through these narrow, per-family
//! traits. [`crate::client::RestClient`] implements them against the REST
//! API; tests implement them with an in-memory array.
//!
//! Conventions shared by all families:
//! - lookups return `Ok(None)` when the object does not exist
//! - creates are idempotent: "already exists" yields the existing object,
//!   reported as [`Created::Existing`] so callers never compensate it
//! - deletes are idempotent: "not found" yields `Ok(())`
//! - an empty `vstore_id` addresses the system vstore

use crate::domain::object::StorageObject;
use crate::error::Result;
use crate::qos::QosParameters;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

// =============================================================================
// Create outcome
// =============================================================================

/// Outcome of an idempotent create
#[derive(Debug, Clone, PartialEq)]
pub enum Created {
    /// This call made the object
    New(StorageObject),
    /// The array answered "already exists"; this is the object found by name
    Existing(StorageObject),
}

impl Created {
    pub fn is_new(&self) -> bool {
        matches!(self, Created::New(_))
    }

    pub fn object(&self) -> &StorageObject {
        match self {
            Created::New(obj) | Created::Existing(obj) => obj,
        }
    }

    pub fn into_object(self) -> StorageObject {
        match self {
            Created::New(obj) | Created::Existing(obj) => obj,
        }
    }
}

// =============================================================================
// Filesystem
// =============================================================================

/// Parameters for creating a filesystem
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilesystemParams {
    pub name: String,
    /// Storage pool ID
    pub parent_id: String,
    /// Capacity in 512-byte sectors
    pub capacity: i64,
    pub vstore_id: String,
    pub description: String,
    /// 0 = thick, 1 = thin
    pub alloc_type: i64,
    pub workload_type_id: Option<String>,
}

/// Parameters for cloning a filesystem from a parent
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CloneFilesystemParams {
    pub name: String,
    pub parent_filesystem_id: String,
    pub vstore_id: String,
    pub description: String,
    pub alloc_type: i64,
}

#[async_trait]
pub trait FilesystemApi: Send + Sync {
    async fn get_filesystem_by_name(&self, name: &str, vstore_id: &str) -> Result<Option<StorageObject>>;

    async fn get_filesystem_by_id(&self, id: &str) -> Result<Option<StorageObject>>;

    async fn create_filesystem(&self, params: &FilesystemParams) -> Result<Created>;

    async fn update_filesystem(&self, id: &str, fields: Value) -> Result<()>;

    async fn delete_filesystem(&self, id: &str, vstore_id: &str) -> Result<()>;

    async fn clone_filesystem(&self, params: &CloneFilesystemParams) -> Result<Created>;

    /// Start splitting a clone from its parent
    async fn split_clone_filesystem(&self, id: &str, split_speed: u32, vstore_id: &str) -> Result<()>;

    async fn stop_split_clone_filesystem(&self, id: &str, vstore_id: &str) -> Result<()>;
}

// =============================================================================
// NFS shares
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NfsShareParams {
    pub share_path: String,
    pub fs_id: String,
    pub description: String,
    pub vstore_id: String,
}

/// One authorized client of an NFS share
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NfsShareAccessParams {
    pub share_id: String,
    /// Client IP, subnet or host name
    pub name: String,
    /// 0 = read-only, 1 = read-write
    pub access_val: i64,
    /// 0 = all_squash, 1 = no_all_squash
    pub all_squash: i64,
    /// 0 = root_squash, 1 = no_root_squash
    pub root_squash: i64,
    pub vstore_id: String,
}

#[async_trait]
pub trait NfsShareApi: Send + Sync {
    async fn get_nfs_share_by_path(&self, path: &str, vstore_id: &str) -> Result<Option<StorageObject>>;

    async fn create_nfs_share(&self, params: &NfsShareParams) -> Result<Created>;

    async fn delete_nfs_share(&self, id: &str, vstore_id: &str) -> Result<()>;

    async fn get_nfs_share_access(
        &self,
        share_id: &str,
        client: &str,
        vstore_id: &str,
    ) -> Result<Option<StorageObject>>;

    async fn allow_nfs_share_access(&self, params: &NfsShareAccessParams) -> Result<()>;
}

// =============================================================================
// DataTurbo (DTFS) shares
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DtfsShareParams {
    pub name: String,
    pub fs_id: String,
    pub description: String,
    pub vstore_id: String,
}

#[async_trait]
pub trait DtfsShareApi: Send + Sync {
    async fn get_dtfs_share_by_name(&self, name: &str, vstore_id: &str) -> Result<Option<StorageObject>>;

    async fn create_dtfs_share(&self, params: &DtfsShareParams) -> Result<Created>;

    async fn delete_dtfs_share(&self, id: &str, vstore_id: &str) -> Result<()>;

    async fn add_dtfs_share_auth_user(&self, share_id: &str, user: &str, vstore_id: &str) -> Result<()>;
}

// =============================================================================
// QoS
// =============================================================================

/// Kind of object a QoS policy is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QosObjectType {
    Filesystem,
    Lun,
}

impl QosObjectType {
    /// Field of the QoS policy that lists attached objects
    pub fn list_field(&self) -> &'static str {
        match self {
            QosObjectType::Filesystem => "FSLIST",
            QosObjectType::Lun => "LUNLIST",
        }
    }
}

impl std::fmt::Display for QosObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QosObjectType::Filesystem => write!(f, "filesystem"),
            QosObjectType::Lun => write!(f, "lun"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QosCreateParams {
    pub name: String,
    pub object_type: QosObjectType,
    pub object_id: String,
    pub params: QosParameters,
    pub vstore_id: String,
}

#[async_trait]
pub trait QosApi: Send + Sync {
    /// Create a policy for one object.
    ///
    /// Raises the object's I/O priority first when a lower bound or latency
    /// target is requested, and activates the policy if it comes up disabled.
    async fn create_qos(&self, params: &QosCreateParams) -> Result<Created>;

    async fn get_qos_by_id(&self, id: &str, vstore_id: &str) -> Result<Option<StorageObject>>;

    async fn activate_qos(&self, id: &str, vstore_id: &str) -> Result<()>;

    async fn deactivate_qos(&self, id: &str, vstore_id: &str) -> Result<()>;

    async fn delete_qos(&self, id: &str, vstore_id: &str) -> Result<()>;

    /// Detach one object from a policy shared with other objects
    async fn remove_qos_object(
        &self,
        id: &str,
        object_type: QosObjectType,
        object_id: &str,
        vstore_id: &str,
    ) -> Result<()>;
}

// =============================================================================
// LUN
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LunParams {
    pub name: String,
    pub parent_id: String,
    /// Capacity in 512-byte sectors
    pub capacity: i64,
    pub alloc_type: i64,
    pub description: String,
    pub workload_type_id: Option<String>,
    pub vstore_id: String,
}

#[async_trait]
pub trait LunApi: Send + Sync {
    async fn get_lun_by_name(&self, name: &str, vstore_id: &str) -> Result<Option<StorageObject>>;

    async fn get_lun_by_id(&self, id: &str) -> Result<Option<StorageObject>>;

    async fn create_lun(&self, params: &LunParams) -> Result<Created>;

    async fn extend_lun(&self, id: &str, capacity: i64) -> Result<()>;

    async fn delete_lun(&self, id: &str) -> Result<()>;
}

// =============================================================================
// Hosts, groups, mappings and initiators
// =============================================================================

/// Initiator families known to the array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitiatorKind {
    Iscsi,
    Fc,
    Roce,
}

impl std::fmt::Display for InitiatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InitiatorKind::Iscsi => write!(f, "iSCSI"),
            InitiatorKind::Fc => write!(f, "FC"),
            InitiatorKind::Roce => write!(f, "RoCE"),
        }
    }
}

/// Group types that can be members of a mapping view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MappingMember {
    HostGroup,
    LunGroup,
}

/// An iSCSI target portal and the IQN it serves
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IscsiTarget {
    pub portal: String,
    pub iqn: String,
}

#[async_trait]
pub trait HostApi: Send + Sync {
    async fn get_host_by_name(&self, name: &str) -> Result<Option<StorageObject>>;

    async fn create_host(&self, name: &str) -> Result<StorageObject>;

    async fn get_hostgroup_by_name(&self, name: &str) -> Result<Option<StorageObject>>;

    async fn create_hostgroup(&self, name: &str) -> Result<StorageObject>;

    /// Host groups the host currently belongs to
    async fn get_hostgroups_of_host(&self, host_id: &str) -> Result<Vec<StorageObject>>;

    async fn add_host_to_hostgroup(&self, host_id: &str, hostgroup_id: &str) -> Result<()>;

    async fn get_lungroup_by_name(&self, name: &str) -> Result<Option<StorageObject>>;

    async fn create_lungroup(&self, name: &str) -> Result<StorageObject>;

    /// LUN groups the LUN currently belongs to
    async fn get_lungroups_of_lun(&self, lun_id: &str) -> Result<Vec<StorageObject>>;

    async fn add_lun_to_lungroup(&self, lun_id: &str, lungroup_id: &str) -> Result<()>;

    async fn remove_lun_from_lungroup(&self, lun_id: &str, lungroup_id: &str) -> Result<()>;

    async fn get_mapping_by_name(&self, name: &str) -> Result<Option<StorageObject>>;

    async fn create_mapping(&self, name: &str) -> Result<StorageObject>;

    /// Mapping views a host group or LUN group belongs to
    async fn get_mappings_of(&self, member: MappingMember, member_id: &str) -> Result<Vec<StorageObject>>;

    async fn add_to_mapping(&self, mapping_id: &str, member: MappingMember, member_id: &str) -> Result<()>;

    async fn get_initiator(&self, kind: InitiatorKind, id: &str) -> Result<Option<StorageObject>>;

    async fn add_initiator(&self, kind: InitiatorKind, id: &str) -> Result<StorageObject>;

    async fn add_initiator_to_host(&self, kind: InitiatorKind, id: &str, host_id: &str) -> Result<()>;

    async fn update_initiator(&self, kind: InitiatorKind, id: &str, fields: Value) -> Result<()>;

    async fn get_iscsi_targets(&self) -> Result<Vec<IscsiTarget>>;

    /// Target WWNs reachable from one host initiator
    async fn get_fc_target_wwns(&self, initiator_wwn: &str) -> Result<Vec<String>>;

    async fn get_host_lun_id(&self, host_id: &str, lun_id: &str) -> Result<String>;
}

// =============================================================================
// Pools, vstores, workload types, system
// =============================================================================

#[async_trait]
pub trait ResourceApi: Send + Sync {
    async fn get_pool_by_name(&self, name: &str) -> Result<Option<StorageObject>>;

    async fn get_vstore_by_name(&self, name: &str) -> Result<Option<StorageObject>>;

    async fn get_application_type_by_name(&self, name: &str) -> Result<Option<StorageObject>>;

    async fn get_system(&self) -> Result<StorageObject>;
}

// =============================================================================
// HyperMetro / remote replication pairs
// =============================================================================

#[async_trait]
pub trait PairApi: Send + Sync {
    async fn get_hypermetro_pairs_of(&self, local_object_id: &str) -> Result<Vec<StorageObject>>;

    async fn split_hypermetro_pair(&self, id: &str) -> Result<()>;

    async fn delete_hypermetro_pair(&self, id: &str) -> Result<()>;

    async fn get_replication_pairs_of(&self, local_object_id: &str) -> Result<Vec<StorageObject>>;

    async fn split_replication_pair(&self, id: &str) -> Result<()>;

    async fn delete_replication_pair(&self, id: &str) -> Result<()>;
}

// =============================================================================
// Combined port
// =============================================================================

/// Everything a workflow may need from one backend
pub trait StorageApi:
    FilesystemApi + NfsShareApi + DtfsShareApi + QosApi + LunApi + HostApi + ResourceApi + PairApi
{
}

impl<T> StorageApi for T where
    T: FilesystemApi + NfsShareApi + DtfsShareApi + QosApi + LunApi + HostApi + ResourceApi + PairApi
{
}

pub type StorageApiRef = Arc<dyn StorageApi>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_object_list_field() {
        assert_eq!(QosObjectType::Filesystem.list_field(), "FSLIST");
        assert_eq!(QosObjectType::Lun.list_field(), "LUNLIST");
        assert_eq!(format!("{}", QosObjectType::Lun), "lun");
    }

    #[test]
    fn test_created_outcome() {
        let obj = StorageObject::from_pairs([("ID", "7")]);
        assert!(Created::New(obj.clone()).is_new());
        assert!(!Created::Existing(obj.clone()).is_new());
        assert_eq!(Created::Existing(obj).into_object().id(), "7");
    }

    #[test]
    fn test_initiator_kind_display() {
        assert_eq!(format!("{}", InitiatorKind::Iscsi), "iSCSI");
        assert_eq!(format!("{}", InitiatorKind::Fc), "FC");
        assert_eq!(format!("{}", InitiatorKind::Roce), "RoCE");
    }
}

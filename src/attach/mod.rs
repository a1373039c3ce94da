//! Attachment Manager
//!
//! Builds the host to LUN visibility path on the array:
//!
//! ```text
//!   initiator(s) ──> host ──> host group ──┐
//!                                          ├──> mapping view
//!                  LUN ──> LUN group ──────┘
//! ```
//!
//! Every object is looked up before it is created and every association
//! is checked before it is made, so attaching twice is harmless. An
//! association to a different host or group is a conflict and is never
//! rewritten.

pub mod manager;

pub use manager::AttachManager;

use crate::config::AluaConfig;
use crate::domain::ports::{InitiatorKind, IscsiTarget};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Longest host, group and mapping name the array accepts
pub const MAX_OBJECT_NAME_LEN: usize = 31;

const GROUP_PREFIX: &str = "k8s_";

// =============================================================================
// Protocol
// =============================================================================

/// Host attachment protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachProtocol {
    Iscsi,
    Fc,
    #[serde(alias = "fc-nvme")]
    FcNvme,
    Roce,
}

impl AttachProtocol {
    /// Initiator collection used by this protocol
    pub fn initiator_kind(&self) -> InitiatorKind {
        match self {
            AttachProtocol::Iscsi => InitiatorKind::Iscsi,
            AttachProtocol::Fc | AttachProtocol::FcNvme => InitiatorKind::Fc,
            AttachProtocol::Roce => InitiatorKind::Roce,
        }
    }

    fn supports_alua(&self) -> bool {
        matches!(self, AttachProtocol::Iscsi | AttachProtocol::Fc)
    }
}

impl std::fmt::Display for AttachProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttachProtocol::Iscsi => write!(f, "iscsi"),
            AttachProtocol::Fc => write!(f, "fc"),
            AttachProtocol::FcNvme => write!(f, "fcnvme"),
            AttachProtocol::Roce => write!(f, "roce"),
        }
    }
}

impl FromStr for AttachProtocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "iscsi" => Ok(AttachProtocol::Iscsi),
            "fc" => Ok(AttachProtocol::Fc),
            "fcnvme" | "fc-nvme" => Ok(AttachProtocol::FcNvme),
            "roce" => Ok(AttachProtocol::Roce),
            other => Err(Error::Validation(format!("unsupported attach protocol: {}", other))),
        }
    }
}

// =============================================================================
// Naming
// =============================================================================

fn truncate(name: &str) -> String {
    name.chars().take(MAX_OBJECT_NAME_LEN).collect()
}

/// Host object name for a node
pub fn derive_host_name(node_name: &str) -> String {
    truncate(node_name)
}

/// Host group, LUN group and mapping view name for a host
pub fn group_name(host_name: &str) -> String {
    truncate(&format!("{}{}", GROUP_PREFIX, host_name))
}

// =============================================================================
// Parameters and Results
// =============================================================================

/// What the node side knows about itself
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachParams {
    /// Node name; the host object name is derived from it
    pub node_name: String,
    pub protocol: AttachProtocol,
    /// IQN, WWNs or NQN of the node
    pub initiators: Vec<String>,
    /// iSCSI: restrict to these portals (empty means all).
    /// RoCE: the target addresses to use.
    #[serde(default)]
    pub portals: Vec<String>,
    #[serde(default)]
    pub alua: Option<AluaConfig>,
    #[serde(default)]
    pub vstore_name: Option<String>,
}

impl AttachParams {
    pub fn host_name(&self) -> String {
        derive_host_name(&self.node_name)
    }

    /// ALUA fields to set on bound initiators, if any apply to this protocol
    pub(crate) fn alua_fields(&self) -> Option<serde_json::Value> {
        if !self.protocol.supports_alua() {
            return None;
        }
        self.alua.as_ref().and_then(AluaConfig::to_fields)
    }
}

/// Discovered targets a node connects to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Targets {
    Iscsi(Vec<IscsiTarget>),
    /// Target port WWNs
    Fc(Vec<String>),
    /// Target addresses
    Roce(Vec<String>),
}

/// Everything the node side needs to reach a mapped LUN
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingProperties {
    pub protocol: Option<AttachProtocol>,
    pub lun_wwn: String,
    pub target_portals: Vec<String>,
    pub target_iqns: Vec<String>,
    pub target_wwns: Vec<String>,
    /// One entry per target path
    pub host_lun_ids: Vec<String>,
}

/// Build mapping properties: the host LUN id is the same on every path,
/// so it is repeated once per target.
pub fn get_mapping_properties(
    protocol: AttachProtocol,
    lun_wwn: &str,
    host_lun_id: &str,
    targets: &Targets,
) -> MappingProperties {
    let mut props = MappingProperties {
        protocol: Some(protocol),
        lun_wwn: lun_wwn.to_string(),
        ..Default::default()
    };
    let paths = match targets {
        Targets::Iscsi(targets) => {
            props.target_portals = targets.iter().map(|t| t.portal.clone()).collect();
            props.target_iqns = targets.iter().map(|t| t.iqn.clone()).collect();
            targets.len()
        }
        Targets::Fc(wwns) => {
            props.target_wwns = wwns.clone();
            wwns.len()
        }
        Targets::Roce(portals) => {
            props.target_portals = portals.clone();
            portals.len()
        }
    };
    props.host_lun_ids = vec![host_lun_id.to_string(); paths];
    props
}

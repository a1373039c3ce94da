//! OceanStor CSI Core - Volume Orchestration
//!
//! Transactional create/delete/expand/query of volumes and host attachment
//! against Huawei OceanStor and Dorado arrays over their REST API.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                    CLI / CSI controller request handlers                     │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────┐  ┌─────────────────────────────┐  │
//! │  │        Volume Workflows             │  │     Attachment Manager      │  │
//! │  │  Creator / Deleter / Expander /     │  │  host, groups, mapping,     │  │
//! │  │  Querier                            │  │  initiators                 │  │
//! │  └──────────────────┬──────────────────┘  └──────────────┬──────────────┘  │
//! │                     └──────────────┬─────────────────────┘                  │
//! │                        ┌───────────┴───────────┐                            │
//! │                        │  Transaction Engine   │                            │
//! │                        │ (ordered steps with   │                            │
//! │                        │  reverse compensation)│                            │
//! │                        └───────────┬───────────┘                            │
//! ├────────────────────────────────────┼────────────────────────────────────────┤
//! │                      Resource facades (port traits)                          │
//! │   filesystem · share · qos · lun · host · resource · pair                    │
//! ├────────────────────────────────────┼────────────────────────────────────────┤
//! │                       Bounded REST call layer                                │
//! │   login / relogin · busy retry · pagination · per-backend semaphore          │
//! └────────────────────────────────────┼────────────────────────────────────────┘
//!                                      ▼
//!                              OceanStor REST API
//! ```
//!
//! # Modules
//!
//! - [`transaction`]: Ordered steps with reverse-order compensation
//! - [`client`]: REST call layer and per-resource facades
//! - [`domain`]: Loosely typed storage objects and the facade traits
//! - [`qos`]: QoS parameter extraction and per-product validation
//! - [`volume`]: Create, delete, expand and query workflows
//! - [`attach`]: Controller attach and detach
//! - [`config`]: YAML driver configuration
//! - [`error`]: Error types and handling

pub mod attach;
pub mod client;
pub mod config;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod qos;
pub mod transaction;
pub mod volume;

#[cfg(test)]
pub mod testing;

// Re-export commonly used types
pub use attach::{
    derive_host_name, get_mapping_properties, AttachManager, AttachParams, AttachProtocol,
    MappingProperties, Targets,
};

pub use client::{BackendConnectionPool, RestClient, RestClientConfig, RetryPolicy};

pub use config::{AluaConfig, BackendConfig, DriverConfig};

pub use domain::{StorageApi, StorageApiRef, StorageObject};

pub use error::{Error, ErrorKind, Result};

pub use qos::{validate_qos_parameters, ProductFamily, QosParameters};

pub use transaction::{RollbackReport, Transaction};

pub use volume::{
    CreateVolumeModel, Creator, Deleter, ExpandVolumeModel, Expander, Protocol, Querier,
    QueryVolumeModel, VolumeHandle, VolumeRef, WorkflowSettings,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

//! Storage array client
//!
//! [`RestClient`] is the bounded call layer. The per-family facades
//! (`filesystem`, `share`, `qos`, `lun`, `host`, `resource`, `pair`)
//! implement the port traits from [`crate::domain::ports`] on top of it and
//! turn the array's error codes into idempotent results or bounded retries.

pub mod codes;
pub mod filesystem;
pub mod host;
pub mod lun;
pub mod pair;
pub mod pool;
pub mod qos;
pub mod resource;
pub mod rest;
pub mod share;
pub mod transport;

pub use pool::{BackendConnectionPool, CallPermit};
pub use qos::qos_members;
pub use rest::{ResponseEnvelope, RestClient, RestClientConfig, RetryPolicy};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};

//! Driver Configuration
//!
//! Backends are described in a YAML file:
//!
//! ```yaml
//! maxTotalRequests: 200
//! backends:
//!   - name: array-a
//!     urls: ["https://10.0.0.1:8088", "https://10.0.0.2:8088"]
//!     user: admin
//!     passwordEnv: ARRAY_A_PASSWORD
//!     product: DoradoV6
//!     maxClientThreads: 30
//!     protocol: iscsi
//!     portals: ["192.168.1.10"]
//! ```

use crate::attach::AttachProtocol;
use crate::client::pool::{BackendConnectionPool, DEFAULT_MAX_TOTAL_REQUESTS};
use crate::client::rest::{RestClient, RestClientConfig, RetryPolicy, DEFAULT_RETRY_TIMES};
use crate::client::transport::ReqwestTransport;
use crate::error::{Error, Result};
use crate::qos::ProductFamily;
use crate::volume::WorkflowSettings;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

// =============================================================================
// Driver Configuration
// =============================================================================

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverConfig {
    /// Process-wide ceiling on in-flight backend calls
    #[serde(default = "default_max_total_requests")]
    pub max_total_requests: usize,
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
}

fn default_max_total_requests() -> usize {
    DEFAULT_MAX_TOTAL_REQUESTS
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            max_total_requests: DEFAULT_MAX_TOTAL_REQUESTS,
            backends: Vec::new(),
        }
    }
}

impl DriverConfig {
    /// Load and validate a YAML config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config: DriverConfig = serde_yaml::from_str(&contents).map_err(|e| {
            Error::Configuration(format!("failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        info!(path = %path.display(), backends = config.backends.len(), "Loaded configuration");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_total_requests == 0 {
            return Err(Error::Configuration("maxTotalRequests must be positive".into()));
        }
        for (i, backend) in self.backends.iter().enumerate() {
            backend.validate()?;
            if self.backends[..i].iter().any(|b| b.name == backend.name) {
                return Err(Error::Configuration(format!(
                    "backend {} is configured twice",
                    backend.name
                )));
            }
        }
        Ok(())
    }

    pub fn backend(&self, name: &str) -> Result<&BackendConfig> {
        self.backends
            .iter()
            .find(|b| b.name == name)
            .ok_or_else(|| Error::Configuration(format!("backend {} is not configured", name)))
    }
}

// =============================================================================
// Backend Configuration
// =============================================================================

/// ALUA hints applied to host initiators
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AluaConfig {
    pub multipath_type: Option<i64>,
    pub failover_mode: Option<i64>,
    pub special_mode_type: Option<i64>,
    pub path_type: Option<i64>,
}

impl AluaConfig {
    /// Initiator fields for the configured hints, `None` when nothing is set
    pub fn to_fields(&self) -> Option<Value> {
        let pairs = [
            ("MULTIPATHTYPE", self.multipath_type),
            ("FAILOVERMODE", self.failover_mode),
            ("SPECIALMODETYPE", self.special_mode_type),
            ("PATHTYPE", self.path_type),
        ];
        let mut fields = serde_json::Map::new();
        for (key, value) in pairs {
            if let Some(v) = value {
                fields.insert(key.to_string(), json!(v));
            }
        }
        if fields.is_empty() {
            None
        } else {
            Some(Value::Object(fields))
        }
    }
}

/// One storage array
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    pub name: String,
    pub urls: Vec<String>,
    pub user: String,
    #[serde(default)]
    pub password: Option<String>,
    /// Environment variable holding the password
    #[serde(default)]
    pub password_env: Option<String>,
    #[serde(default)]
    pub vstore_name: Option<String>,
    pub product: ProductFamily,
    #[serde(default)]
    pub max_client_threads: Option<usize>,
    #[serde(default)]
    pub protocol: Option<AttachProtocol>,
    /// iSCSI portals to use; empty means every discovered portal
    #[serde(default)]
    pub portals: Vec<String>,
    #[serde(default)]
    pub alua: Option<AluaConfig>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_busy_retry_interval_ms")]
    pub busy_retry_interval_ms: u64,
    #[serde(default = "default_busy_retry_times")]
    pub busy_retry_times: u32,
    #[serde(default)]
    pub insecure_skip_verify: bool,
    #[serde(default = "default_clone_split_timeout_secs")]
    pub clone_split_timeout_secs: u64,
    #[serde(default = "default_clone_poll_interval_secs")]
    pub clone_poll_interval_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_busy_retry_interval_ms() -> u64 {
    5000
}

fn default_busy_retry_times() -> u32 {
    DEFAULT_RETRY_TIMES
}

fn default_clone_split_timeout_secs() -> u64 {
    6 * 60 * 60
}

fn default_clone_poll_interval_secs() -> u64 {
    5
}

impl BackendConfig {
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Configuration("backend name must not be empty".into()));
        }
        if self.urls.is_empty() {
            return Err(Error::Configuration(format!(
                "backend {} has no urls",
                self.name
            )));
        }
        if self.password.is_none() && self.password_env.is_none() {
            return Err(Error::Configuration(format!(
                "backend {} needs password or passwordEnv",
                self.name
            )));
        }
        if self.busy_retry_times == 0 {
            return Err(Error::Configuration(format!(
                "backend {} busyRetryTimes must be positive",
                self.name
            )));
        }
        Ok(())
    }

    /// Resolve the password, preferring the environment variable
    pub fn resolve_password(&self) -> Result<String> {
        if let Some(var) = self.password_env.as_deref() {
            return std::env::var(var).map_err(|_| {
                Error::Configuration(format!(
                    "backend {} password variable {} is not set",
                    self.name, var
                ))
            });
        }
        self.password.clone().ok_or_else(|| {
            Error::Configuration(format!("backend {} has no password", self.name))
        })
    }

    pub fn rest_config(&self) -> Result<RestClientConfig> {
        Ok(RestClientConfig {
            backend: self.name.clone(),
            urls: self.urls.clone(),
            user: self.user.clone(),
            password: self.resolve_password()?,
            vstore_name: self.vstore_name.clone(),
            product: self.product,
            retry: RetryPolicy {
                interval: Duration::from_millis(self.busy_retry_interval_ms),
                times: self.busy_retry_times,
            },
        })
    }

    pub fn workflow_settings(&self) -> WorkflowSettings {
        WorkflowSettings {
            product: self.product,
            clone_poll_interval: Duration::from_secs(self.clone_poll_interval_secs),
            clone_split_timeout: Duration::from_secs(self.clone_split_timeout_secs),
        }
    }

    /// Register the backend in the pool and build its client
    pub fn connect(&self, pool: &Arc<BackendConnectionPool>) -> Result<RestClient> {
        pool.register(&self.name, self.max_client_threads);
        let transport = ReqwestTransport::new(
            Duration::from_secs(self.request_timeout_secs),
            self.insecure_skip_verify,
        )?;
        Ok(RestClient::new(self.rest_config()?, Arc::new(transport), Arc::clone(pool)))
    }
}

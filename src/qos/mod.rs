//! QoS Parameter Sets
//!
//! A QoS request arrives as a JSON string from the storage class
//! (`{"MAXIOPS": 1000, "LATENCY": 0.5}`). It is decoded, converted to
//! integers, checked against a per-product range table and only then handed
//! to the array.

pub mod params;
pub mod validators;

pub use params::*;
pub use validators::*;

use crate::error::Error;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::str::FromStr;

// =============================================================================
// Product Family
// =============================================================================

/// Array product family, which decides the QoS rules that apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProductFamily {
    V3,
    V5,
    Dorado,
    #[serde(alias = "A600")]
    DoradoV6,
    V6,
}

impl ProductFamily {
    /// Latency is configured in milliseconds but the array takes microseconds
    pub fn scales_latency(&self) -> bool {
        matches!(self, ProductFamily::DoradoV6)
    }

    /// Whether upper and lower limits may be combined in one policy
    pub fn allows_both_bounds(&self) -> bool {
        matches!(self, ProductFamily::DoradoV6 | ProductFamily::V6)
    }

    /// Whether lower limits (MIN*, LATENCY) are supported at all
    pub fn supports_lower_bounds(&self) -> bool {
        !matches!(self, ProductFamily::Dorado)
    }

    /// Whether IOTYPE must be given explicitly
    pub fn requires_io_type(&self) -> bool {
        matches!(self, ProductFamily::V3 | ProductFamily::V5)
    }
}

impl std::fmt::Display for ProductFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProductFamily::V3 => write!(f, "V3"),
            ProductFamily::V5 => write!(f, "V5"),
            ProductFamily::Dorado => write!(f, "Dorado"),
            ProductFamily::DoradoV6 => write!(f, "DoradoV6"),
            ProductFamily::V6 => write!(f, "V6"),
        }
    }
}

impl FromStr for ProductFamily {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "v3" => Ok(ProductFamily::V3),
            "v5" => Ok(ProductFamily::V5),
            "dorado" => Ok(ProductFamily::Dorado),
            "doradov6" | "a600" => Ok(ProductFamily::DoradoV6),
            "v6" => Ok(ProductFamily::V6),
            other => Err(Error::Configuration(format!(
                "unsupported product family: {}",
                other
            ))),
        }
    }
}

// =============================================================================
// Validated Parameters
// =============================================================================

pub const MAX_BANDWIDTH: &str = "MAXBANDWIDTH";
pub const MIN_BANDWIDTH: &str = "MINBANDWIDTH";
pub const MAX_IOPS: &str = "MAXIOPS";
pub const MIN_IOPS: &str = "MINIOPS";
pub const LATENCY: &str = "LATENCY";
pub const IO_TYPE: &str = "IOTYPE";

/// Upper-limit parameters
pub const UPPER_LIMITS: [&str; 2] = [MAX_BANDWIDTH, MAX_IOPS];

/// Lower-limit parameters; requesting any of them raises the object's I/O priority
pub const LOWER_LIMITS: [&str; 3] = [MIN_BANDWIDTH, MIN_IOPS, LATENCY];

/// A validated QoS parameter set, ready to be sent to the array
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QosParameters(BTreeMap<String, i64>);

impl QosParameters {
    pub fn get(&self, key: &str) -> Option<i64> {
        self.0.get(key).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &i64)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn has_lower_bound(&self) -> bool {
        LOWER_LIMITS.iter().any(|k| self.0.contains_key(*k))
    }

    pub fn has_upper_bound(&self) -> bool {
        UPPER_LIMITS.iter().any(|k| self.0.contains_key(*k))
    }

    /// Request body fields for the policy
    pub fn to_fields(&self) -> Map<String, Value> {
        self.0
            .iter()
            .map(|(k, v)| (k.clone(), Value::from(*v)))
            .collect()
    }

    pub(crate) fn from_validated(values: BTreeMap<String, i64>) -> Self {
        Self(values)
    }
}

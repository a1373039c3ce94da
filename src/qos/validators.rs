//! Per-product QoS range validators

use crate::error::{Error, Result};
use crate::qos::{
    ProductFamily, IO_TYPE, LATENCY, LOWER_LIMITS, MAX_BANDWIDTH, MAX_IOPS, MIN_BANDWIDTH,
    MIN_IOPS, UPPER_LIMITS,
};
use std::collections::BTreeMap;

/// Allowed values for one parameter
#[derive(Debug, Clone, Copy)]
enum Rule {
    Range(i64, i64),
    OneOf(&'static [i64]),
}

impl Rule {
    fn check(&self, key: &str, value: i64) -> Result<()> {
        let ok = match self {
            Rule::Range(min, max) => (*min..=*max).contains(&value),
            Rule::OneOf(allowed) => allowed.contains(&value),
        };
        if ok {
            return Ok(());
        }
        let expected = match self {
            Rule::Range(min, max) => format!("[{}, {}]", min, max),
            Rule::OneOf(allowed) => format!("{:?}", allowed),
        };
        Err(Error::Validation(format!(
            "QoS parameter {} value {} is out of range, expected {}",
            key, value, expected
        )))
    }
}

const BANDWIDTH: Rule = Rule::Range(1, 999_999_999);
const IOPS: Rule = Rule::Range(100, 999_999_999);
const IO_TYPES: Rule = Rule::OneOf(&[0, 1, 2]);

fn rules(product: ProductFamily) -> &'static [(&'static str, Rule)] {
    match product {
        ProductFamily::V3 | ProductFamily::V5 | ProductFamily::V6 => &[
            (MAX_BANDWIDTH, BANDWIDTH),
            (MIN_BANDWIDTH, BANDWIDTH),
            (MAX_IOPS, IOPS),
            (MIN_IOPS, IOPS),
            (LATENCY, Rule::Range(1, 2000)),
            (IO_TYPE, IO_TYPES),
        ],
        ProductFamily::Dorado => &[
            (MAX_BANDWIDTH, BANDWIDTH),
            (MAX_IOPS, IOPS),
            (IO_TYPE, IO_TYPES),
        ],
        ProductFamily::DoradoV6 => &[
            (MAX_BANDWIDTH, BANDWIDTH),
            (MIN_BANDWIDTH, BANDWIDTH),
            (MAX_IOPS, IOPS),
            (MIN_IOPS, IOPS),
            // microseconds, after conversion
            (LATENCY, Rule::OneOf(&[500, 1500])),
            (IO_TYPE, IO_TYPES),
        ],
    }
}

/// Check an integer parameter set against the rules of one product family
pub fn check_qos_parameters(product: ProductFamily, values: &BTreeMap<String, i64>) -> Result<()> {
    let table = rules(product);

    for key in values.keys() {
        let known = table.iter().any(|(name, _)| *name == key.as_str());
        if !known {
            if product == ProductFamily::Dorado && LOWER_LIMITS.contains(&key.as_str()) {
                return Err(Error::Validation(format!(
                    "QoS parameter {} is not supported on {}",
                    key, product
                )));
            }
            return Err(Error::Validation(format!("QoS parameter {} is not supported", key)));
        }
    }

    let has_upper = UPPER_LIMITS.iter().any(|k| values.contains_key(*k));
    let has_lower = LOWER_LIMITS.iter().any(|k| values.contains_key(*k));
    if !has_upper && !has_lower {
        return Err(Error::Validation(format!(
            "QoS config must contain at least one of {:?}",
            [MAX_BANDWIDTH, MIN_BANDWIDTH, MAX_IOPS, MIN_IOPS, LATENCY]
        )));
    }

    if has_upper && has_lower && !product.allows_both_bounds() {
        return Err(Error::Validation(format!(
            "cannot specify both lower and upper limits on {}",
            product
        )));
    }

    for (key, rule) in table {
        if let Some(value) = values.get(*key) {
            rule.check(key, *value)?;
        }
    }

    if product.requires_io_type() && !values.contains_key(IO_TYPE) {
        return Err(Error::Validation(format!("{} must be set on {}", IO_TYPE, product)));
    }

    Ok(())
}

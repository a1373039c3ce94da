//! QoS parameter extraction and conversion

use crate::error::{Error, Result};
use crate::qos::{validators, ProductFamily, QosParameters, LATENCY};
use serde_json::Value;
use std::collections::BTreeMap;

/// Decode the QoS JSON string and apply product-specific unit conversions.
///
/// For DoradoV6 the `LATENCY` value is given in milliseconds and converted
/// to microseconds here, before any range validation.
pub fn extract_qos_parameters(product: ProductFamily, qos_config: &str) -> Result<BTreeMap<String, f64>> {
    let raw: BTreeMap<String, Value> = serde_json::from_str(qos_config).map_err(|e| {
        Error::Validation(format!("decode QoS config {} error: {}", qos_config, e))
    })?;

    let mut params = BTreeMap::new();
    for (key, value) in raw {
        let number = value.as_f64().ok_or_else(|| {
            Error::Validation(format!("QoS parameter {} has non-numeric value {}", key, value))
        })?;
        params.insert(key, number);
    }

    if product.scales_latency() {
        if let Some(latency) = params.get_mut(LATENCY) {
            *latency *= 1000.0;
        }
    }

    Ok(params)
}

/// Convert every value to an integer, rejecting fractional values
pub fn convert_qos_parameters_value_to_int(params: BTreeMap<String, f64>) -> Result<BTreeMap<String, i64>> {
    let mut converted = BTreeMap::new();
    for (key, value) in params {
        if !value.is_finite() || value.fract() != 0.0 {
            return Err(Error::Validation(format!(
                "QoS parameter {} has invalid value {}, must be a whole number",
                key, value
            )));
        }
        converted.insert(key, value as i64);
    }
    Ok(converted)
}

/// Full pipeline: decode, convert, validate against the product's rules
pub fn validate_qos_parameters(product: ProductFamily, qos_config: &str) -> Result<QosParameters> {
    let extracted = extract_qos_parameters(product, qos_config)?;
    let values = convert_qos_parameters_value_to_int(extracted)?;
    validators::check_qos_parameters(product, &values)?;
    Ok(QosParameters::from_validated(values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qos::{MAX_IOPS, MIN_IOPS};
    use assert_matches::assert_matches;

    #[test]
    fn test_latency_converted_to_microseconds() {
        let params = extract_qos_parameters(ProductFamily::DoradoV6, r#"{"LATENCY": 0.5}"#).unwrap();
        assert_eq!(params[LATENCY], 500.0);

        let validated = validate_qos_parameters(ProductFamily::DoradoV6, r#"{"LATENCY": 0.5}"#).unwrap();
        assert_eq!(validated.get(LATENCY), Some(500));
    }

    #[test]
    fn test_latency_untouched_on_v5() {
        let params = extract_qos_parameters(ProductFamily::V5, r#"{"LATENCY": 5}"#).unwrap();
        assert_eq!(params[LATENCY], 5.0);
    }

    #[test]
    fn test_fractional_value_rejected() {
        let mut params = BTreeMap::new();
        params.insert(MAX_IOPS.to_string(), 100.5);
        let err = convert_qos_parameters_value_to_int(params).unwrap_err();
        assert!(err.to_string().contains("whole number"));
    }

    #[test]
    fn test_both_bounds_by_product() {
        let config = r#"{"MAXIOPS": 1000, "MINIOPS": 500, "IOTYPE": 2}"#;

        let params = validate_qos_parameters(ProductFamily::DoradoV6, config).unwrap();
        assert_eq!(params.get(MAX_IOPS), Some(1000));
        assert_eq!(params.get(MIN_IOPS), Some(500));

        let err = validate_qos_parameters(ProductFamily::V3, config).unwrap_err();
        assert_matches!(err, Error::Validation(ref msg) if msg.contains("cannot specify both lower and upper limits"));
    }

    #[test]
    fn test_malformed_json_is_validation_error() {
        let err = validate_qos_parameters(ProductFamily::V5, "{MAXIOPS:").unwrap_err();
        assert_matches!(err, Error::Validation(_));

        let err = validate_qos_parameters(ProductFamily::V5, r#"{"MAXIOPS": "fast"}"#).unwrap_err();
        assert_matches!(err, Error::Validation(ref msg) if msg.contains("MAXIOPS"));
    }
}

use std::{sync::Arc, time::SystemTime};

use crate::{catalog::Definition, error::BridgeError};

/// One decoded observation of a catalog definition.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricValue {
    pub definition: Arc<Definition>,
    pub value: f64,
    pub timestamp: SystemTime,
}

impl MetricValue {
    pub fn new(definition: Arc<Definition>, value: f64, timestamp: SystemTime) -> Self {
        Self {
            definition,
            value,
            timestamp,
        }
    }

    pub fn name(&self) -> &str {
        &self.definition.metric
    }

    /// Plain text payload, integral values keep their `.0`.
    pub fn payload(&self) -> String {
        format_value(self.value)
    }
}

pub fn format_value(value: f64) -> String {
    format!("{value:?}")
}

/// Pairs each raw register float with the definition at the same position.
///
/// Every value shares the single capture `timestamp` of the read. A length
/// mismatch means the block and the catalog disagree, so nothing is returned.
pub fn decode(
    definitions: &[Arc<Definition>],
    raw_values: &[f32],
    timestamp: SystemTime,
) -> Result<Vec<MetricValue>, BridgeError> {
    if raw_values.len() != definitions.len() {
        return Err(BridgeError::DecodeLength {
            expected: definitions.len(),
            actual: raw_values.len(),
        });
    }

    Ok(definitions
        .iter()
        .zip(raw_values)
        .map(|(definition, raw)| MetricValue::new(definition.clone(), f64::from(*raw), timestamp))
        .collect())
}

use std::{collections::HashMap, sync::Arc, time::SystemTime};

use tokio::sync::Mutex;

use crate::{
    catalog::{Definition, MetricKind},
    error::BridgeError,
    metric::MetricValue,
};

/// Running totals of `total_increasing` definitions, keyed by metric name.
///
/// Each increment holds the lock while adding and taking the snapshot, so a
/// total can only grow and concurrent increments never lose a delta.
#[derive(Debug, Default)]
pub struct Counters {
    totals: Mutex<HashMap<String, f64>>,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn increment(
        &self,
        definition: &Arc<Definition>,
        delta: f64,
    ) -> Result<MetricValue, BridgeError> {
        if definition.kind != MetricKind::TotalIncreasing {
            return Err(BridgeError::NotACounter {
                metric: definition.metric.clone(),
                kind: definition.kind.to_string(),
            });
        }

        let mut totals = self.totals.lock().await;
        let total = totals.entry(definition.metric.clone()).or_insert(0.0);
        *total += delta;
        Ok(MetricValue::new(
            definition.clone(),
            *total,
            SystemTime::now(),
        ))
    }

    /// Increments by one, used for event counts.
    pub async fn increment_one(
        &self,
        definition: &Arc<Definition>,
    ) -> Result<MetricValue, BridgeError> {
        self.increment(definition, 1.0).await
    }

    pub async fn total(&self, metric: &str) -> Option<f64> {
        self.totals.lock().await.get(metric).copied()
    }
}

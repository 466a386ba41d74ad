use std::{collections::HashMap, time::SystemTime};

use tokio::sync::RwLock;

use crate::metric::MetricValue;

/// Last known state of a metric.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub metric: MetricValue,
    pub discovery_announced_at: Option<SystemTime>,
}

/// Last-value store keyed by metric name.
///
/// Holds one slot per metric and is never cleared, so its size is bounded by
/// the catalog plus the operational counters.
#[derive(Debug, Default)]
pub struct MetricCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MetricCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `metric` as the latest value of its name, keeping side state.
    pub async fn update(&self, metric: MetricValue) {
        let mut entries = self.entries.write().await;
        match entries.get_mut(metric.name()) {
            Some(entry) => entry.metric = metric,
            None => {
                entries.insert(
                    metric.name().to_string(),
                    CacheEntry {
                        metric,
                        discovery_announced_at: None,
                    },
                );
            }
        }
    }

    pub async fn get(&self, metric: &str) -> Option<CacheEntry> {
        self.entries.read().await.get(metric).cloned()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Marks the discovery announcement of `metric` as done.
    ///
    /// Returns `true` only for the caller that set the marker; a metric that
    /// was never cached cannot be claimed.
    pub async fn claim_discovery(&self, metric: &str) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get_mut(metric) {
            Some(entry) if entry.discovery_announced_at.is_none() => {
                entry.discovery_announced_at = Some(SystemTime::now());
                true
            }
            _ => false,
        }
    }

    /// Drops the announcement marker so the next cycle announces again.
    pub async fn release_discovery(&self, metric: &str) {
        if let Some(entry) = self.entries.write().await.get_mut(metric) {
            entry.discovery_announced_at = None;
        }
    }
}

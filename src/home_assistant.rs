use serde_derive::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::{
    catalog::Definition, error::PublishError, metric::MetricValue, metric_cache::MetricCache,
    publisher::Publisher,
};

const NODE_ID: &str = "janitza";

/// Flat sink: every metric is published as plain text under its own topic.
pub struct HomeAssistantSink {
    publisher: Arc<dyn Publisher>,
    prefix: String,
    discovery_prefix: Option<String>,
}

impl HomeAssistantSink {
    pub fn new(publisher: Arc<dyn Publisher>, prefix: impl Into<String>) -> Self {
        Self {
            publisher,
            prefix: prefix.into(),
            discovery_prefix: None,
        }
    }

    /// Enables discovery announcements under `discovery_prefix`.
    pub fn with_discovery(mut self, discovery_prefix: impl Into<String>) -> Self {
        self.discovery_prefix = Some(discovery_prefix.into());
        self
    }

    pub fn state_topic(&self, definition: &Definition) -> Option<String> {
        definition
            .route
            .flat_topic()
            .map(|topic| format!("{}{}", self.prefix, topic))
    }

    /// Publishes the raw value of `metric`. Returns whether a message was sent.
    pub async fn publish(&self, metric: &MetricValue) -> Result<bool, PublishError> {
        let Some(topic) = self.state_topic(&metric.definition) else {
            return Ok(false);
        };
        self.publisher.publish(&topic, metric.payload()).await?;
        Ok(true)
    }

    /// Announces the metric once per process, before its state is published.
    ///
    /// The marker lives in the cache, so the metric has to be cached first. A
    /// failed announcement is retried on the next call.
    pub async fn announce(
        &self,
        metric: &MetricValue,
        cache: &MetricCache,
    ) -> Result<bool, PublishError> {
        let Some(discovery_prefix) = &self.discovery_prefix else {
            return Ok(false);
        };
        let definition = &metric.definition;
        let (Some(unit), Some(device_class), Some(state_topic)) = (
            definition.unit.as_deref(),
            definition.discovery_class.as_deref(),
            self.state_topic(definition),
        ) else {
            return Ok(false);
        };
        if !cache.claim_discovery(&definition.metric).await {
            return Ok(false);
        }

        let config = DiscoveryConfig {
            name: definition.display_name(),
            unique_id: format!("{NODE_ID}_{}", definition.metric),
            state_topic,
            unit_of_measurement: unit,
            device_class,
            state_class: definition.kind.as_str(),
            device: DiscoveryDevice {
                identifiers: [NODE_ID],
                name: "Janitza",
                manufacturer: "Janitza",
            },
        };
        let topic = format!(
            "{discovery_prefix}sensor/{NODE_ID}/{}/config",
            definition.metric
        );

        let sent = match serde_json::to_string(&config) {
            Ok(payload) => self.publisher.announce(&topic, payload).await,
            Err(e) => Err(e.into()),
        };
        match sent {
            Ok(()) => {
                info!("Announced {} at {topic}", definition.metric);
                Ok(true)
            }
            Err(e) => {
                cache.release_discovery(&definition.metric).await;
                Err(e)
            }
        }
    }

    /// Discovery and state publish for one metric.
    ///
    /// Publish failures stay local to this sink and are only logged.
    pub async fn handle(&self, metric: &MetricValue, cache: &MetricCache) {
        if let Err(e) = self.announce(metric, cache).await {
            warn!("Discovery of {} failed: {e}", metric.name());
        }
        if let Err(e) = self.publish(metric).await {
            warn!("Publishing {} failed: {e}", metric.name());
        }
    }
}

#[derive(Debug, Serialize)]
struct DiscoveryConfig<'a> {
    name: String,
    unique_id: String,
    state_topic: String,
    unit_of_measurement: &'a str,
    device_class: &'a str,
    state_class: &'a str,
    device: DiscoveryDevice<'a>,
}

#[derive(Debug, Serialize)]
struct DiscoveryDevice<'a> {
    identifiers: [&'a str; 1],
    name: &'a str,
    manufacturer: &'a str,
}

#[cfg(test)]
mod test_flat_sink {
    use super::*;
    use crate::{
        catalog::{Catalog, RegisterRow},
        publisher::MemoryPublisher,
    };
    use std::time::SystemTime;

    fn metric(row: RegisterRow, value: f64) -> MetricValue {
        let definition = Arc::new(Definition::from_row(&row).unwrap());
        MetricValue::new(definition, value, SystemTime::now())
    }

    #[tokio::test]
    async fn test_publishes_plain_value() {
        let publisher = Arc::new(MemoryPublisher::new());
        let sink = HomeAssistantSink::new(publisher.clone(), "janitza-ruby/");
        let voltage = metric(
            ("voltage_l1_n", "V", "measurement", "voltage", "Ac/L1/Voltage", &["grid.L1.voltage", "grid.voltage"]),
            230.5,
        );

        assert!(sink.publish(&voltage).await.unwrap());

        let messages = publisher.messages().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].topic, "janitza-ruby/Ac/L1/Voltage");
        assert_eq!(messages[0].payload, "230.5");
    }

    #[tokio::test]
    async fn test_strips_flat_only_marker() {
        let publisher = Arc::new(MemoryPublisher::new());
        let sink = HomeAssistantSink::new(publisher.clone(), "meter/");
        let apparent = metric(
            ("apparent_power_l1", "VA", "measurement", "apparent_power", "-Ac/L1/ApparentPower", &[]),
            100.0,
        );

        assert!(sink.publish(&apparent).await.unwrap());

        let messages = publisher.messages().await;
        assert_eq!(messages[0].topic, "meter/Ac/L1/ApparentPower");
        assert_eq!(messages[0].payload, "100.0");
    }

    #[tokio::test]
    async fn test_skips_unrouted_metric() {
        let publisher = Arc::new(MemoryPublisher::new());
        let sink = HomeAssistantSink::new(publisher.clone(), "meter/");
        let rotation = metric(("rotation_field", "-", "measurement", "-", "-", &[]), 1.0);

        assert!(!sink.publish(&rotation).await.unwrap());
        assert!(publisher.messages().await.is_empty());
    }

    #[tokio::test]
    async fn test_discovery_announced_once() {
        let publisher = Arc::new(MemoryPublisher::new());
        let cache = MetricCache::new();
        let sink =
            HomeAssistantSink::new(publisher.clone(), "meter/").with_discovery("homeassistant/");
        let catalog = Catalog::janitza().unwrap();
        let voltage = MetricValue::new(catalog.definitions()[0].clone(), 230.5, SystemTime::now());

        cache.update(voltage.clone()).await;
        sink.handle(&voltage, &cache).await;
        sink.handle(&voltage, &cache).await;

        let config_topic = "homeassistant/sensor/janitza/voltage_l1_n/config";
        let announcements = publisher.messages_for(config_topic).await;
        assert_eq!(announcements.len(), 1);
        assert!(announcements[0].retained);

        let config: serde_json::Value = serde_json::from_str(&announcements[0].payload).unwrap();
        assert_eq!(config["name"], "VoltageL1N");
        assert_eq!(config["unique_id"], "janitza_voltage_l1_n");
        assert_eq!(config["state_topic"], "meter/Ac/L1/Voltage");
        assert_eq!(config["unit_of_measurement"], "V");
        assert_eq!(config["device_class"], "voltage");
        assert_eq!(config["state_class"], "measurement");
        assert_eq!(config["device"]["identifiers"][0], "janitza");

        assert_eq!(publisher.messages_for("meter/Ac/L1/Voltage").await.len(), 2);
    }

    #[tokio::test]
    async fn test_no_discovery_without_unit_or_class() {
        let publisher = Arc::new(MemoryPublisher::new());
        let cache = MetricCache::new();
        let sink =
            HomeAssistantSink::new(publisher.clone(), "meter/").with_discovery("homeassistant/");
        let power_factor = metric(
            ("power_factor_l1", "-", "measurement", "power_factor", "-Ac/L1/PowerFactor", &[]),
            0.98,
        );

        cache.update(power_factor.clone()).await;
        assert!(!sink.announce(&power_factor, &cache).await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_discovery_is_retried() {
        let publisher = Arc::new(MemoryPublisher::failing());
        let cache = MetricCache::new();
        let sink = HomeAssistantSink::new(publisher, "meter/").with_discovery("homeassistant/");
        let catalog = Catalog::janitza().unwrap();
        let voltage = MetricValue::new(catalog.definitions()[0].clone(), 230.5, SystemTime::now());

        cache.update(voltage.clone()).await;
        assert!(sink.announce(&voltage, &cache).await.is_err());
        // Failure released the claim
        assert!(cache.claim_discovery("voltage_l1_n").await);
    }
}

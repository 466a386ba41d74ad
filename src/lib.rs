//! Janitza Bridge Library
//!
//! Polls the measurement registers of a Janitza UMG power meter over Modbus TCP
//! at a fixed cadence and republishes the readings to a home-automation MQTT
//! broker (one topic per metric) and to an energy-management grid topic (one
//! nested document per cycle).

pub mod catalog;
pub mod collector;
pub mod config;
pub mod counters;
pub mod error;
pub mod home_assistant;
pub mod janitza_reader;
pub mod metric;
pub mod metric_cache;
pub mod mqtt_publisher;
pub mod publisher;
pub mod transformer;
pub mod venus_grid;

// Re-export commonly used types for easier access
pub use catalog::{Catalog, Definition, MetricKind, TopicRoute};
pub use collector::{Collector, CycleReport, TARGET_CYCLE};
pub use config::{BridgeConfig, MqttEndpoint, VenusMode};
pub use counters::Counters;
pub use error::{BridgeError, PublishError};
pub use home_assistant::HomeAssistantSink;
pub use janitza_reader::{JanitzaReader, RegisterSource};
pub use metric::MetricValue;
pub use metric_cache::MetricCache;
pub use publisher::{MemoryPublisher, Publisher};
pub use venus_grid::{GridAggregate, VenusGridSink};

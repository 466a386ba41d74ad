use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{trace, warn};

use crate::{
    config::VenusMode,
    error::PublishError,
    metric::{format_value, MetricValue},
    publisher::Publisher,
    transformer::Transformer,
};

const ROOT_GROUP: &str = "grid";
const PHASE_GROUPS: [&str; 3] = ["L1", "L2", "L3"];

/// Nested grid document assembled during one cycle.
///
/// The first value written to a path sticks; later writes to the same path
/// in the same cycle are ignored.
#[derive(Debug, Clone, PartialEq)]
pub struct GridAggregate {
    root: Map<String, Value>,
}

impl GridAggregate {
    /// Fresh document with the grid group and its three phase groups.
    pub fn new() -> Self {
        let phases = PHASE_GROUPS
            .iter()
            .map(|phase| (phase.to_string(), Value::Object(Map::new())))
            .collect();
        let mut root = Map::new();
        root.insert(ROOT_GROUP.to_string(), Value::Object(phases));
        Self { root }
    }

    /// Writes `value` at the dotted `path` unless the slot already holds one.
    ///
    /// Missing intermediate groups are created. Returns whether the value was
    /// stored.
    pub fn insert_if_absent(&mut self, path: &str, value: f64) -> bool {
        let mut segments: Vec<&str> = path.split('.').collect();
        let Some(leaf) = segments.pop() else {
            return false;
        };

        let mut group = &mut self.root;
        for segment in segments {
            let slot = group
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            match slot {
                Value::Object(next) => group = next,
                _ => {
                    warn!("Grid path {path} crosses the value at {segment}");
                    return false;
                }
            }
        }

        if group.contains_key(leaf) {
            return false;
        }
        // Non-finite readings have no JSON form
        let value = serde_json::Number::from_f64(value).map_or(Value::Null, Value::Number);
        group.insert(leaf.to_string(), value);
        true
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let mut current = self.root.get(segments.next()?)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    pub fn to_json(&self) -> Result<String, PublishError> {
        Ok(serde_json::to_string(&self.root)?)
    }
}

impl Default for GridAggregate {
    fn default() -> Self {
        Self::new()
    }
}

/// Aggregating sink feeding the energy-management grid data.
pub struct VenusGridSink {
    publisher: Arc<dyn Publisher>,
    mode: VenusMode,
    grid_topic: String,
    prefix: String,
    transformer: Transformer,
}

impl VenusGridSink {
    pub fn new(
        publisher: Arc<dyn Publisher>,
        mode: VenusMode,
        grid_topic: impl Into<String>,
    ) -> Self {
        Self {
            publisher,
            mode,
            grid_topic: grid_topic.into(),
            prefix: String::new(),
            transformer: Transformer::venus(),
        }
    }

    /// Topic prefix for per-metric publishes.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_transformer(mut self, transformer: Transformer) -> Self {
        self.transformer = transformer;
        self
    }

    /// Adds `metric` to the cycle's aggregate and returns its transformed value.
    ///
    /// Metrics whose topic carries the flat-only marker, or no topic at all,
    /// are left out and yield `None`. Never touches the network.
    pub fn contribute(&self, metric: &MetricValue, aggregate: &mut GridAggregate) -> Option<f64> {
        let definition = &metric.definition;
        if definition.route.aggregate_topic().is_none() {
            return None;
        }

        let value = self.transformer.transform(&definition.metric, metric.value);
        if self.mode == VenusMode::DbusGrid {
            for path in &definition.aggregate_paths {
                if !aggregate.insert_if_absent(path, value) {
                    trace!("{path} already set, skipping {}", definition.metric);
                }
            }
        }
        Some(value)
    }

    /// Per-metric publish of a transformed value, only active in `DbusMqtt` mode.
    pub async fn publish_metric(&self, metric: &MetricValue, value: f64) -> Result<bool, PublishError> {
        if self.mode != VenusMode::DbusMqtt {
            return Ok(false);
        }
        let Some(topic) = metric.definition.route.aggregate_topic() else {
            return Ok(false);
        };
        self.publisher
            .publish(&format!("{}{topic}", self.prefix), format_value(value))
            .await?;
        Ok(true)
    }

    /// Publishes the finished aggregate once, only in `DbusGrid` mode.
    ///
    /// Takes the aggregate by value: nothing can write to it after this point.
    pub async fn emit(&self, aggregate: GridAggregate) -> Result<bool, PublishError> {
        if self.mode != VenusMode::DbusGrid {
            return Ok(false);
        }
        self.publisher
            .publish(&self.grid_topic, aggregate.to_json()?)
            .await?;
        Ok(true)
    }
}

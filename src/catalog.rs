use std::{collections::HashSet, fmt, sync::Arc};

use crate::error::BridgeError;

/// First holding register of the measurement block on the Janitza UMG.
pub const BASE_REGISTER: u16 = 19000;

/// How a metric behaves over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Measurement,
    TotalIncreasing,
}

impl MetricKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "measurement" => Some(Self::Measurement),
            "total_increasing" => Some(Self::TotalIncreasing),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Measurement => "measurement",
            Self::TotalIncreasing => "total_increasing",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a metric may be published, derived from its raw topic column.
///
/// `-` means nowhere, `-Topic` means the flat sink only, and a bare `Topic`
/// is published to both sinks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicRoute {
    Never,
    FlatOnly(String),
    Everywhere(String),
}

impl TopicRoute {
    pub fn parse(raw: &str) -> Self {
        match raw.strip_prefix('-') {
            Some("") => Self::Never,
            Some(topic) => Self::FlatOnly(topic.to_string()),
            None => Self::Everywhere(raw.to_string()),
        }
    }

    /// Topic used by the flat sink, with any leading marker stripped.
    pub fn flat_topic(&self) -> Option<&str> {
        match self {
            Self::Never => None,
            Self::FlatOnly(topic) | Self::Everywhere(topic) => Some(topic),
        }
    }

    /// Topic used by the aggregating sink; only unmarked topics qualify.
    pub fn aggregate_topic(&self) -> Option<&str> {
        match self {
            Self::Everywhere(topic) => Some(topic),
            _ => None,
        }
    }
}

/// Static description of one monitored quantity.
#[derive(Debug, Clone, PartialEq)]
pub struct Definition {
    pub metric: String,
    pub unit: Option<String>,
    pub kind: MetricKind,
    pub discovery_class: Option<String>,
    pub route: TopicRoute,
    pub aggregate_paths: Vec<String>,
}

impl Definition {
    /// Builds a definition from the raw table columns, where `-` marks an
    /// absent unit or discovery class.
    pub fn from_row(row: &RegisterRow) -> Result<Self, BridgeError> {
        let (metric, unit, kind, discovery_class, topic, aggregate_paths) = *row;
        if metric.is_empty() {
            return Err(BridgeError::Catalog("empty metric name".to_string()));
        }
        let kind = MetricKind::parse(kind).ok_or_else(|| {
            BridgeError::Catalog(format!("type {kind:?} of {metric} is invalid"))
        })?;
        if let Some(path) = aggregate_paths
            .iter()
            .find(|path| path.split('.').any(str::is_empty))
        {
            return Err(BridgeError::Catalog(format!(
                "aggregate path {path:?} of {metric} has an empty segment"
            )));
        }

        Ok(Self {
            metric: metric.to_string(),
            unit: dash_as_none(unit),
            kind,
            discovery_class: dash_as_none(discovery_class),
            route: TopicRoute::parse(topic),
            aggregate_paths: aggregate_paths.iter().map(|p| p.to_string()).collect(),
        })
    }

    /// CamelCase display name, `voltage_l1_n` becomes `VoltageL1N`.
    pub fn display_name(&self) -> String {
        self.metric
            .split('_')
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect(),
                    None => String::new(),
                }
            })
            .collect()
    }
}

fn dash_as_none(raw: &str) -> Option<String> {
    if raw == "-" || raw.is_empty() {
        None
    } else {
        Some(raw.to_string())
    }
}

/// metric, unit, type, discovery class, topic, aggregate paths
pub type RegisterRow = (
    &'static str,
    &'static str,
    &'static str,
    &'static str,
    &'static str,
    &'static [&'static str],
);

// Order follows the device register map starting at BASE_REGISTER, one f32 per row.
#[rustfmt::skip]
const JANITZA_REGISTERS: &[RegisterRow] = &[
    ("voltage_l1_n", "V", "measurement", "voltage", "Ac/L1/Voltage", &["grid.L1.voltage", "grid.voltage"]),
    ("voltage_l2_n", "V", "measurement", "voltage", "Ac/L2/Voltage", &["grid.L2.voltage"]),
    ("voltage_l3_n", "V", "measurement", "voltage", "Ac/L3/Voltage", &["grid.L3.voltage"]),

    ("voltage_l1_l2", "V", "measurement", "voltage", "-Ac/L1-L2/Voltage", &[]),
    ("voltage_l2_l3", "V", "measurement", "voltage", "-Ac/L2-L3/Voltage", &[]),
    ("voltage_l1_l3", "V", "measurement", "voltage", "-Ac/L1-L3/Voltage", &[]),

    ("current_l1", "A", "measurement", "current", "Ac/L1/Current", &["grid.L1.current"]),
    ("current_l2", "A", "measurement", "current", "Ac/L2/Current", &["grid.L2.current"]),
    ("current_l3", "A", "measurement", "current", "Ac/L3/Current", &["grid.L3.current"]),
    ("current_total", "A", "measurement", "current", "Ac/Current", &["grid.current"]),

    ("real_power_l1", "W", "measurement", "power", "Ac/L1/Power", &["grid.L1.power"]),
    ("real_power_l2", "W", "measurement", "power", "Ac/L2/Power", &["grid.L2.power"]),
    ("real_power_l3", "W", "measurement", "power", "Ac/L3/Power", &["grid.L3.power"]),
    ("real_power_total", "W", "measurement", "power", "Ac/Power", &["grid.power"]),

    ("apparent_power_l1", "VA", "measurement", "apparent_power", "-Ac/L1/ApparentPower", &[]),
    ("apparent_power_l2", "VA", "measurement", "apparent_power", "-Ac/L2/ApparentPower", &[]),
    ("apparent_power_l3", "VA", "measurement", "apparent_power", "-Ac/L3/ApparentPower", &[]),
    ("apparent_power_total", "VA", "measurement", "apparent_power", "-Ac/ApparentPower", &[]),

    ("reactive_power_l1", "var", "measurement", "reactive_power", "-Ac/L1/ReactivePower", &[]),
    ("reactive_power_l2", "var", "measurement", "reactive_power", "-Ac/L2/ReactivePower", &[]),
    ("reactive_power_l3", "var", "measurement", "reactive_power", "-Ac/L3/ReactivePower", &[]),
    ("reactive_power_total", "var", "measurement", "reactive_power", "-Ac/ReactivePower", &[]),

    ("power_factor_l1", "-", "measurement", "power_factor", "-Ac/L1/PowerFactor", &[]),
    ("power_factor_l2", "-", "measurement", "power_factor", "-Ac/L2/PowerFactor", &[]),
    ("power_factor_l3", "-", "measurement", "power_factor", "-Ac/L3/PowerFactor", &[]),

    ("frequency", "Hz", "measurement", "frequency", "Ac/Frequency", &["grid.L1.frequency", "grid.L2.frequency", "grid.L3.frequency"]),

    ("rotation_field", "-", "measurement", "-", "-", &[]),

    ("real_energy_l1_total", "Wh", "total_increasing", "energy", "-Ac/L1/Energy", &[]),
    ("real_energy_l2_total", "Wh", "total_increasing", "energy", "-Ac/L2/Energy", &[]),
    ("real_energy_l3_total", "Wh", "total_increasing", "energy", "-Ac/L3/Energy", &[]),
    ("real_energy_total", "Wh", "total_increasing", "energy", "-Ac/Energy", &[]),

    ("real_energy_l1_consumed_total", "Wh", "total_increasing", "energy", "Ac/L1/Energy/Reverse", &["grid.L1.energy_reverse"]),
    ("real_energy_l2_consumed_total", "Wh", "total_increasing", "energy", "Ac/L2/Energy/Reverse", &["grid.L2.energy_reverse"]),
    ("real_energy_l3_consumed_total", "Wh", "total_increasing", "energy", "Ac/L3/Energy/Reverse", &["grid.L3.energy_reverse"]),
    ("real_energy_consumed_total", "Wh", "total_increasing", "energy", "Ac/Energy/Reverse", &["grid.energy_reverse"]),

    ("real_energy_l1_delivered_total", "Wh", "total_increasing", "energy", "Ac/L1/Energy/Forward", &["grid.L1.energy_forward"]),
    ("real_energy_l2_delivered_total", "Wh", "total_increasing", "energy", "Ac/L2/Energy/Forward", &["grid.L2.energy_forward"]),
    ("real_energy_l3_delivered_total", "Wh", "total_increasing", "energy", "Ac/L3/Energy/Forward", &["grid.L3.energy_forward"]),
    ("real_energy_delivered_total", "Wh", "total_increasing", "energy", "Ac/Energy/Forward", &["grid.energy_forward"]),
];

pub const CYCLE_SECONDS_METRIC: &str = "collecting_registers_seconds_total";
pub const CYCLE_COUNT_METRIC: &str = "collecting_registers_count_total";

#[rustfmt::skip]
const OPERATIONAL_METRICS: &[RegisterRow] = &[
    (CYCLE_SECONDS_METRIC, "s", "total_increasing", "-", "-Collector/Seconds", &[]),
    (CYCLE_COUNT_METRIC, "-", "total_increasing", "-", "-Collector/Count", &[]),
];

/// Ordered, immutable list of register definitions.
///
/// Position `i` in the catalog interprets the `i`-th float of the register
/// block, so the order has to match the device map exactly.
#[derive(Debug, Clone)]
pub struct Catalog {
    definitions: Vec<Arc<Definition>>,
}

impl Catalog {
    /// The Janitza UMG measurement block.
    pub fn janitza() -> Result<Self, BridgeError> {
        Self::from_rows(JANITZA_REGISTERS)
    }

    pub fn from_rows(rows: &[RegisterRow]) -> Result<Self, BridgeError> {
        let definitions = rows
            .iter()
            .map(Definition::from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_definitions(definitions)
    }

    pub fn from_definitions(definitions: Vec<Definition>) -> Result<Self, BridgeError> {
        let mut seen = HashSet::new();
        for definition in &definitions {
            if !seen.insert(definition.metric.as_str()) {
                return Err(BridgeError::Catalog(format!(
                    "metric {} is defined twice",
                    definition.metric
                )));
            }
        }
        Ok(Self {
            definitions: definitions.into_iter().map(Arc::new).collect(),
        })
    }

    pub fn definitions(&self) -> &[Arc<Definition>] {
        &self.definitions
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Number of 16 bit registers covering the whole catalog.
    pub fn register_count(&self) -> usize {
        self.definitions.len() * 2
    }
}

/// Definitions of the two counters synthesized from collector timing.
pub fn operational_definitions() -> Result<(Arc<Definition>, Arc<Definition>), BridgeError> {
    let seconds = Definition::from_row(&OPERATIONAL_METRICS[0])?;
    let count = Definition::from_row(&OPERATIONAL_METRICS[1])?;
    Ok((Arc::new(seconds), Arc::new(count)))
}

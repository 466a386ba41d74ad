use regex::Regex;

use crate::error::BridgeError;

/// Metric names a transform applies to.
#[derive(Debug, Clone)]
pub enum NamePattern {
    Exact(&'static str),
    Prefix(&'static str),
    Matching(Regex),
}

impl NamePattern {
    /// Pattern from a regular expression, matched anywhere in the name
    /// unless anchored.
    pub fn regex(pattern: &str) -> Result<Self, BridgeError> {
        Regex::new(pattern).map(Self::Matching).map_err(|e| {
            BridgeError::Configuration(format!("invalid metric pattern {pattern:?}: {e}"))
        })
    }

    pub fn matches(&self, metric: &str) -> bool {
        match self {
            Self::Exact(name) => metric == *name,
            Self::Prefix(prefix) => metric.starts_with(prefix),
            Self::Matching(regex) => regex.is_match(metric),
        }
    }
}

pub type Rewrite = fn(f64) -> f64;

/// Ordered value rewrites applied on the way into the grid aggregate.
///
/// The first matching pattern wins; unmatched metrics pass through as is.
#[derive(Debug, Clone)]
pub struct Transformer {
    rules: Vec<(NamePattern, Rewrite)>,
}

impl Transformer {
    pub fn new(rules: Vec<(NamePattern, Rewrite)>) -> Self {
        Self { rules }
    }

    /// Identity table.
    pub fn passthrough() -> Self {
        Self::new(Vec::new())
    }

    /// Energy registers count Wh, the grid aggregate expects kWh.
    pub fn venus() -> Self {
        Self::new(vec![(
            NamePattern::Prefix("real_energy_"),
            watt_hours_to_kilo as Rewrite,
        )])
    }

    pub fn transform(&self, metric: &str, value: f64) -> f64 {
        self.rules
            .iter()
            .find(|(pattern, _)| pattern.matches(metric))
            .map_or(value, |(_, rewrite)| rewrite(value))
    }
}

pub fn watt_hours_to_kilo(value: f64) -> f64 {
    value / 1000.0
}

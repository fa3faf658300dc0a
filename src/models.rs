//! Data models for the report watcher.
//!
//! This module contains the core data structures shared by the pipeline:
//! normalized rows, day-scoped snapshots, and the alert decisions produced
//! by the delta engine.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Canonical name of the leads/conversions counter.
pub const LEADS: &str = "leads";
/// Canonical name of the sales counter.
pub const SALES: &str = "sales";
/// Canonical name of the revenue metric.
pub const REVENUE: &str = "revenue";
/// Canonical name of the cost/spend metric.
pub const COST: &str = "cost";

/// One dimension-keyed observation of metrics.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    /// Deterministic concatenation of the key dimensions.
    pub key: String,
    /// Dimension name to trimmed string value.
    pub dimensions: BTreeMap<String, String>,
    /// Metric name to numeric value.
    pub metrics: BTreeMap<String, f64>,
}

impl Row {
    /// Creates an empty row for the given key.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }

    /// Builder-style dimension setter.
    #[cfg(test)]
    pub fn with_dimension(mut self, name: &str, value: &str) -> Self {
        self.dimensions.insert(name.to_string(), value.to_string());
        self
    }

    /// Builder-style metric setter.
    #[cfg(test)]
    pub fn with_metric(mut self, name: &str, value: f64) -> Self {
        self.metrics.insert(name.to_string(), value);
        self
    }

    /// Returns a metric value, treating an absent metric as zero.
    pub fn metric(&self, name: &str) -> f64 {
        self.metrics.get(name).copied().unwrap_or(0.0)
    }

    /// Returns a dimension value, treating an absent dimension as empty.
    #[cfg(test)]
    pub fn dimension(&self, name: &str) -> &str {
        self.dimensions.get(name).map(String::as_str).unwrap_or("")
    }

    /// Flattens the row into its persisted field map.
    fn to_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        for (name, value) in &self.dimensions {
            fields.insert(name.clone(), Value::String(value.clone()));
        }
        for (name, value) in &self.metrics {
            fields.insert(name.clone(), Value::from(*value));
        }
        fields
    }

    /// Rebuilds a row from its persisted field map.
    ///
    /// Strings are dimensions and numbers are metrics; anything else is dropped.
    fn from_fields(key: String, fields: Map<String, Value>) -> Self {
        let mut row = Row::new(key);
        for (name, value) in fields {
            match value {
                Value::String(s) => {
                    row.dimensions.insert(name, s);
                }
                Value::Number(n) => {
                    row.metrics.insert(name, n.as_f64().unwrap_or(0.0));
                }
                _ => {}
            }
        }
        row
    }
}

/// Keyed row state for one calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "PersistedSnapshot", into = "PersistedSnapshot")]
pub struct Snapshot {
    /// Calendar date (`YYYY-MM-DD`) in the reference timezone.
    pub date: String,
    /// Last-seen row per key.
    pub rows: BTreeMap<String, Row>,
}

/// Wire shape: `{"date": "...", "rows": {"<key>": {<fields>}}}`.
#[derive(Serialize, Deserialize)]
struct PersistedSnapshot {
    date: String,
    #[serde(default)]
    rows: BTreeMap<String, Map<String, Value>>,
}

impl From<PersistedSnapshot> for Snapshot {
    fn from(persisted: PersistedSnapshot) -> Self {
        let rows = persisted
            .rows
            .into_iter()
            .map(|(key, fields)| (key.clone(), Row::from_fields(key, fields)))
            .collect();
        Self {
            date: persisted.date,
            rows,
        }
    }
}

impl From<Snapshot> for PersistedSnapshot {
    fn from(snapshot: Snapshot) -> Self {
        let rows = snapshot
            .rows
            .iter()
            .map(|(key, row)| (key.clone(), row.to_fields()))
            .collect();
        Self {
            date: snapshot.date,
            rows,
        }
    }
}

impl Snapshot {
    /// Creates an empty snapshot for the given date.
    pub fn empty(date: impl Into<String>) -> Self {
        Self {
            date: date.into(),
            rows: BTreeMap::new(),
        }
    }

    /// Builds a snapshot from rows; a later row replaces an earlier one with the same key.
    pub fn from_rows(date: impl Into<String>, rows: impl IntoIterator<Item = Row>) -> Self {
        Self {
            date: date.into(),
            rows: rows.into_iter().map(|r| (r.key.clone(), r)).collect(),
        }
    }

    /// Whether this snapshot belongs to the given day.
    pub fn is_for(&self, today: &str) -> bool {
        self.date == today
    }

    /// Whether a baseline with rows already exists for the given day.
    pub fn has_baseline_for(&self, today: &str) -> bool {
        self.is_for(today) && !self.rows.is_empty()
    }

    /// Serializes to the persisted JSON representation.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parses the persisted JSON representation.
    pub fn from_json(content: &str) -> serde_json::Result<Self> {
        serde_json::from_str(content)
    }
}

/// Alert category, in output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MetricKind {
    Spend,
    Leads,
    Sales,
}

impl MetricKind {
    /// All kinds in output order.
    pub const ALL: [MetricKind; 3] = [MetricKind::Spend, MetricKind::Leads, MetricKind::Sales];

    /// Canonical metric name backing this kind.
    pub fn metric_name(&self) -> &'static str {
        match self {
            MetricKind::Spend => COST,
            MetricKind::Leads => LEADS,
            MetricKind::Sales => SALES,
        }
    }

    /// Returns an emoji marker for the kind.
    pub fn emoji(&self) -> &'static str {
        match self {
            MetricKind::Spend => "🟥",
            MetricKind::Leads => "🟩",
            MetricKind::Sales => "🟦",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricKind::Spend => write!(f, "SPEND"),
            MetricKind::Leads => write!(f, "LEAD"),
            MetricKind::Sales => write!(f, "SALE"),
        }
    }
}

/// Which spend movements are alert-worthy.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum SpendDirection {
    /// Only increases
    Up,
    /// Only decreases
    Down,
    /// Either direction (default)
    #[default]
    Both,
}

impl SpendDirection {
    /// Whether a delta passes this policy at the given noise floor.
    pub fn admits(&self, delta: f64, epsilon: f64) -> bool {
        match self {
            SpendDirection::Up => delta > epsilon,
            SpendDirection::Down => delta < -epsilon,
            SpendDirection::Both => delta.abs() > epsilon,
        }
    }
}

/// When to notify about a fetch that produced no rows.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum EmptyFetchPolicy {
    /// Never notify
    Never,
    /// Notify only while today has no baseline yet (default)
    #[default]
    UntilBaseline,
    /// Notify on every empty fetch
    Always,
}

impl EmptyFetchPolicy {
    /// Whether an empty fetch should be reported given the prior snapshot.
    pub fn should_notify(&self, previous: &Snapshot, today: &str) -> bool {
        match self {
            EmptyFetchPolicy::Never => false,
            EmptyFetchPolicy::UntilBaseline => !previous.has_baseline_for(today),
            EmptyFetchPolicy::Always => true,
        }
    }
}

/// One alert-worthy metric movement.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    /// Row key the decision belongs to.
    pub key: String,
    /// Alert category.
    pub kind: MetricKind,
    /// Dimension values of the row, for rendering.
    pub dimensions: BTreeMap<String, String>,
    /// Prior value (zero for a newly seen key).
    pub old: f64,
    /// Current clamped value.
    pub new: f64,
    /// `new - old`.
    pub delta: f64,
    /// The key was not present in the prior snapshot.
    pub from_zero: bool,
    /// Revenue movement accompanying a sale.
    pub revenue_delta: Option<f64>,
    /// Percent change for spend.
    pub percent: Option<f64>,
}

/// Which branch of the daily state machine a run took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// New day: rows stored as the reference point, no alerts.
    Baseline,
    /// Same day: rows compared against the prior snapshot.
    Compare,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Baseline => write!(f, "baseline"),
            RunMode::Compare => write!(f, "compare"),
        }
    }
}

/// Output of one delta evaluation.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub mode: RunMode,
    /// Ordered decisions: spend, then leads, then sales.
    pub decisions: Vec<Decision>,
    /// Snapshot to persist for this run.
    pub snapshot: Snapshot,
}

impl Evaluation {
    /// Number of decisions of the given kind.
    pub fn count(&self, kind: MetricKind) -> usize {
        self.decisions.iter().filter(|d| d.kind == kind).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_row() -> Row {
        Row::new("camp|UA|ext|cr1")
            .with_dimension("campaign", "camp")
            .with_dimension("country", "UA")
            .with_dimension("external_id", "ext")
            .with_dimension("creative_id", "cr1")
            .with_metric(LEADS, 4.0)
            .with_metric(REVENUE, 12.5)
    }

    #[test]
    fn test_snapshot_roundtrip_preserves_rows() {
        let snapshot = Snapshot::from_rows("2024-05-01", vec![sample_row(), Row::new("other")]);
        let json = snapshot.to_json().unwrap();
        let restored = Snapshot::from_json(&json).unwrap();

        assert_eq!(restored, snapshot);
        assert_eq!(restored.rows.len(), 2);
        assert_eq!(restored.rows["camp|UA|ext|cr1"].metric(REVENUE), 12.5);
    }

    #[test]
    fn test_persisted_shape_is_flat() {
        let snapshot = Snapshot::from_rows("2024-05-01", vec![sample_row()]);
        let value: Value = serde_json::from_str(&snapshot.to_json().unwrap()).unwrap();

        assert_eq!(value["date"], "2024-05-01");
        let row = &value["rows"]["camp|UA|ext|cr1"];
        assert_eq!(row["country"], "UA");
        assert_eq!(row["leads"], 4.0);
    }

    #[test]
    fn test_numeric_looking_dimension_stays_string() {
        let row = Row::new("k").with_dimension("external_id", "12345");
        let snapshot = Snapshot::from_rows("2024-05-01", vec![row]);
        let restored = Snapshot::from_json(&snapshot.to_json().unwrap()).unwrap();

        assert_eq!(restored.rows["k"].dimension("external_id"), "12345");
        assert!(restored.rows["k"].metrics.is_empty());
    }

    #[test]
    fn test_missing_rows_field_defaults_empty() {
        let snapshot = Snapshot::from_json(r#"{"date": "2024-05-01"}"#).unwrap();
        assert!(snapshot.rows.is_empty());
        assert!(Snapshot::from_json(r#"{"rows": {}}"#).is_err());
    }

    #[test]
    fn test_metric_kind_order() {
        assert!(MetricKind::Spend < MetricKind::Leads);
        assert!(MetricKind::Leads < MetricKind::Sales);
        assert_eq!(MetricKind::Sales.metric_name(), SALES);
        assert_eq!(MetricKind::Leads.to_string(), "LEAD");
    }

    #[test]
    fn test_spend_direction_admits() {
        assert!(SpendDirection::Up.admits(1.0, 0.01));
        assert!(!SpendDirection::Up.admits(-1.0, 0.01));
        assert!(SpendDirection::Down.admits(-1.0, 0.01));
        assert!(!SpendDirection::Down.admits(1.0, 0.01));
        assert!(SpendDirection::Both.admits(-1.0, 0.01));
        assert!(!SpendDirection::Both.admits(0.005, 0.01));
    }

    #[test]
    fn test_empty_fetch_policy() {
        let today = "2024-05-02";
        let stale = Snapshot::from_rows("2024-05-01", vec![sample_row()]);
        let fresh = Snapshot::from_rows(today, vec![sample_row()]);

        assert!(EmptyFetchPolicy::UntilBaseline.should_notify(&stale, today));
        assert!(EmptyFetchPolicy::UntilBaseline.should_notify(&Snapshot::empty(today), today));
        assert!(!EmptyFetchPolicy::UntilBaseline.should_notify(&fresh, today));
        assert!(!EmptyFetchPolicy::Never.should_notify(&stale, today));
        assert!(EmptyFetchPolicy::Always.should_notify(&fresh, today));
    }
}

//! Row normalizer for raw report captures.
//!
//! Report payloads arrive in several shapes: records with nested
//! `dimensions`/`metrics` objects, flat records, or positional rows under a
//! `columns` header. Each record is run through a decoder chain and turned
//! into a canonical [`Row`], or dropped when it carries no usable dimensions.

use crate::config::RowsConfig;
use crate::models::Row;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

/// Configuration for row normalization.
#[derive(Debug, Clone)]
pub struct NormalizerConfig {
    /// Dimension names, in key order.
    pub key_dimensions: Vec<String>,
    /// Dimensions that must be non-empty.
    pub required_dimensions: Vec<String>,
    /// Separator between key parts.
    pub key_separator: String,
    /// Canonical metric name to source field aliases.
    pub metrics: BTreeMap<String, Vec<String>>,
}

impl From<&RowsConfig> for NormalizerConfig {
    fn from(config: &RowsConfig) -> Self {
        Self {
            key_dimensions: config.key_dimensions.clone(),
            required_dimensions: config.required_dimensions.clone(),
            key_separator: config.key_separator.clone(),
            metrics: config.metrics.clone(),
        }
    }
}

/// A raw record once its shape has been recognised.
#[derive(Debug)]
enum RecordView<'a> {
    /// `{"dimensions": {...}, "metrics": {...}, ...}`
    Nested {
        dimensions: &'a Map<String, Value>,
        metrics: Option<&'a Map<String, Value>>,
        top: &'a Map<String, Value>,
    },
    /// `{"campaign": ..., "conversions": ...}`
    Flat(&'a Map<String, Value>),
    /// `["Spring", "UA", 3, ...]` with column headers from the payload.
    Tabular {
        columns: &'a [String],
        values: &'a [Value],
    },
}

impl<'a> RecordView<'a> {
    fn dimension(&self, name: &str) -> Option<&'a Value> {
        match *self {
            RecordView::Nested {
                dimensions, top, ..
            } => dimensions.get(name).or_else(|| top.get(name)),
            RecordView::Flat(map) => map.get(name),
            RecordView::Tabular { .. } => self.positional(name),
        }
    }

    fn metric(&self, name: &str) -> Option<&'a Value> {
        match *self {
            RecordView::Nested { metrics, top, .. } => metrics
                .and_then(|m| m.get(name))
                .or_else(|| top.get(name)),
            RecordView::Flat(map) => map.get(name),
            RecordView::Tabular { .. } => self.positional(name),
        }
    }

    fn positional(&self, name: &str) -> Option<&'a Value> {
        match *self {
            RecordView::Tabular { columns, values } => columns
                .iter()
                .position(|c| c == name)
                .and_then(|i| values.get(i)),
            _ => None,
        }
    }
}

type Decoder = for<'a> fn(&'a Value, Option<&'a [String]>) -> Option<RecordView<'a>>;

/// Tried in order; the first decoder that recognises the record wins.
const DECODERS: [Decoder; 3] = [decode_nested, decode_flat, decode_tabular];

fn decode_nested<'a>(record: &'a Value, _: Option<&'a [String]>) -> Option<RecordView<'a>> {
    let top = record.as_object()?;
    let dimensions = top.get("dimensions")?.as_object()?;
    let metrics = top.get("metrics").and_then(Value::as_object);
    Some(RecordView::Nested {
        dimensions,
        metrics,
        top,
    })
}

fn decode_flat<'a>(record: &'a Value, _: Option<&'a [String]>) -> Option<RecordView<'a>> {
    record.as_object().map(RecordView::Flat)
}

fn decode_tabular<'a>(
    record: &'a Value,
    columns: Option<&'a [String]>,
) -> Option<RecordView<'a>> {
    let values = record.as_array()?;
    let columns = columns?;
    Some(RecordView::Tabular {
        columns,
        values: values.as_slice(),
    })
}

/// Converts raw report captures into canonical rows.
#[derive(Debug, Clone)]
pub struct RowNormalizer {
    config: NormalizerConfig,
}

impl RowNormalizer {
    /// Create a normalizer for the given row shape.
    pub fn new(config: NormalizerConfig) -> Self {
        Self { config }
    }

    /// Normalize every record of every captured payload.
    pub fn normalize_payloads(&self, payloads: &[Value]) -> Vec<Row> {
        payloads
            .iter()
            .flat_map(|p| self.normalize_payload(p))
            .collect()
    }

    /// Normalize the records of one captured payload.
    ///
    /// Payloads without a recognisable row list yield nothing.
    pub fn normalize_payload(&self, payload: &Value) -> Vec<Row> {
        let Some((columns, records)) = split_payload(payload) else {
            debug!("Ignoring payload without rows");
            return Vec::new();
        };

        let rows: Vec<Row> = records
            .iter()
            .filter_map(|record| self.normalize(record, columns.as_deref()))
            .collect();

        debug!(
            "Normalized {} of {} records from payload",
            rows.len(),
            records.len()
        );
        rows
    }

    /// Normalize one record, or `None` when it is unparseable or has no usable dimensions.
    pub fn normalize(&self, record: &Value, columns: Option<&[String]>) -> Option<Row> {
        let view = DECODERS.iter().find_map(|decode| decode(record, columns))?;

        let mut dimensions = BTreeMap::new();
        let mut parts = Vec::with_capacity(self.config.key_dimensions.len());
        for name in &self.config.key_dimensions {
            let value = view.dimension(name).map(coerce_string).unwrap_or_default();
            parts.push(value.clone());
            dimensions.insert(name.clone(), value);
        }

        if parts.iter().all(String::is_empty) {
            return None;
        }
        if self
            .config
            .required_dimensions
            .iter()
            .any(|name| dimensions.get(name).map_or(true, String::is_empty))
        {
            return None;
        }

        let metrics = self
            .config
            .metrics
            .iter()
            .map(|(name, aliases)| {
                let value = aliases
                    .iter()
                    .map(|alias| view.metric(alias).map(coerce_number).unwrap_or(0.0))
                    .find(|v| *v != 0.0)
                    .unwrap_or(0.0);
                (name.clone(), value)
            })
            .collect();

        Some(Row {
            key: parts.join(&self.config.key_separator),
            dimensions,
            metrics,
        })
    }
}

/// Split a payload into optional column headers and its record list.
fn split_payload(payload: &Value) -> Option<(Option<Vec<String>>, &[Value])> {
    match payload {
        Value::Array(records) => Some((None, records.as_slice())),
        Value::Object(map) => {
            let records = map.get("rows")?.as_array()?;
            let columns = map
                .get("columns")
                .or_else(|| map.get("headers"))
                .and_then(Value::as_array)
                .map(|cols| cols.iter().map(column_name).collect());
            Some((columns, records.as_slice()))
        }
        _ => None,
    }
}

/// Column headers are either plain names or `{"name": ...}` objects.
fn column_name(column: &Value) -> String {
    match column {
        Value::Object(map) => map.get("name").map(coerce_string).unwrap_or_default(),
        other => coerce_string(other),
    }
}

/// Dimension coercion: trimmed text, numbers stringified, everything else empty.
fn coerce_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

/// Metric coercion: numbers and numeric strings parse, everything else is zero.
fn coerce_number(value: &Value) -> f64 {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite()).unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{COST, LEADS, REVENUE, SALES};
    use serde_json::json;

    fn normalizer() -> RowNormalizer {
        RowNormalizer::new(NormalizerConfig::from(&RowsConfig::default()))
    }

    fn fixture(content: &str) -> Value {
        serde_json::from_str(content).unwrap()
    }

    #[test]
    fn test_nested_capture() {
        let payload = fixture(include_str!("../../fixtures/nested_capture.json"));
        let rows = normalizer().normalize_payload(&payload);

        assert_eq!(rows.len(), 2);

        let first = &rows[0];
        assert_eq!(first.key, "Spring Promo|UA|ext-1|cr-10");
        assert_eq!(first.metric(LEADS), 5.0);
        assert_eq!(first.metric(SALES), 1.0);
        // deposit_revenue is zero, so sale_revenue wins
        assert_eq!(first.metric(REVENUE), 10.5);
        assert_eq!(first.metric(COST), 12.25);

        let second = &rows[1];
        assert_eq!(second.key, "Spring Promo|PL|42|");
        assert_eq!(second.dimension("campaign"), "Spring Promo");
        assert_eq!(second.dimension("creative_id"), "");
        assert_eq!(second.metric(LEADS), 2.0);
        assert_eq!(second.metric(COST), 0.0);
    }

    #[test]
    fn test_tabular_capture() {
        let payload = fixture(include_str!("../../fixtures/tabular_capture.json"));
        let rows = normalizer().normalize_payload(&payload);

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].metric(REVENUE), 25.0);
        assert_eq!(rows[2].key, "Autumn|DE|ext-7|cr-2");
        assert_eq!(rows[2].metric(LEADS), 7.0);
        assert_eq!(rows[2].metric(SALES), 0.0);
        assert_eq!(rows[2].metric(COST), 3.1);
    }

    #[test]
    fn test_top_level_array_of_records() {
        let payload = json!([
            {"campaign": "A", "country": "UA", "leads": 1},
            "garbage",
            {"campaign": "B", "leads": "x"}
        ]);
        let rows = normalizer().normalize_payload(&payload);

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].key, "A|UA||");
        assert_eq!(rows[1].metric(LEADS), 0.0);
    }

    #[test]
    fn test_payload_without_rows_is_ignored() {
        let rows = normalizer().normalize_payloads(&[json!({"status": "ok"}), json!(42)]);
        assert!(rows.is_empty());
    }

    #[test]
    fn test_record_without_dimensions_is_dropped() {
        let n = normalizer();
        assert!(n.normalize(&json!({"conversions": 3}), None).is_none());
        assert!(n.normalize(&json!([1, 2, 3]), None).is_none());
        // country alone is not enough when campaign is required
        assert!(n
            .normalize(&json!({"country": "UA", "conversions": 3}), None)
            .is_none());
    }

    #[test]
    fn test_any_dimension_suffices_without_required() {
        let mut config = NormalizerConfig::from(&RowsConfig::default());
        config.required_dimensions.clear();
        let n = RowNormalizer::new(config);

        let row = n
            .normalize(&json!({"country": " UA ", "conversions": 3}), None)
            .unwrap();
        assert_eq!(row.key, "|UA||");
        assert_eq!(row.dimension("campaign"), "");
    }

    #[test]
    fn test_custom_key_dimensions_and_separator() {
        let config = NormalizerConfig {
            key_dimensions: vec!["sub_id".to_string(), "campaign".to_string()],
            required_dimensions: vec![],
            key_separator: "::".to_string(),
            metrics: [(LEADS.to_string(), vec!["leads".to_string()])]
                .into_iter()
                .collect(),
        };
        let row = RowNormalizer::new(config)
            .normalize(&json!({"campaign": "A", "sub_id": 7, "leads": 2.0}), None)
            .unwrap();

        assert_eq!(row.key, "7::A");
        assert_eq!(row.metrics.len(), 1);
    }

    #[test]
    fn test_column_objects() {
        let payload = json!({
            "headers": [{"name": "campaign"}, {"name": "conversions"}],
            "rows": [["A", 9]]
        });
        let rows = normalizer().normalize_payload(&payload);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].metric(LEADS), 9.0);
    }

    #[test]
    fn test_coerce_number() {
        assert_eq!(coerce_number(&json!(" 3.5 ")), 3.5);
        assert_eq!(coerce_number(&json!("NaN")), 0.0);
        assert_eq!(coerce_number(&json!(null)), 0.0);
        assert_eq!(coerce_number(&json!(true)), 0.0);
        assert_eq!(coerce_number(&json!(7)), 7.0);
    }
}

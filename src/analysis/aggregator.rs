//! Row aggregation within a single run.
//!
//! The report source can hand over several partial captures of the same
//! report. Rows sharing a key are collapsed into one whose metrics are the
//! per-metric maximum across the duplicates.

use crate::models::Row;
use std::collections::HashMap;
use tracing::debug;

/// Collapse rows sharing a key. Metrics merge by maximum; dimensions come from
/// the first row seen for the key.
pub fn aggregate_rows(rows: Vec<Row>) -> Vec<Row> {
    let total = rows.len();
    let mut merged: HashMap<String, Row> = HashMap::with_capacity(total);

    for row in rows {
        match merged.get_mut(&row.key) {
            Some(existing) => merge_max(existing, &row),
            None => {
                merged.insert(row.key.clone(), row);
            }
        }
    }

    debug!("Aggregated {} rows into {} keys", total, merged.len());
    merged.into_values().collect()
}

/// Raise every metric of `into` to at least the value seen in `other`.
fn merge_max(into: &mut Row, other: &Row) {
    for (name, value) in &other.metrics {
        into.metrics
            .entry(name.clone())
            .and_modify(|current| *current = current.max(*value))
            .or_insert(*value);
    }
}

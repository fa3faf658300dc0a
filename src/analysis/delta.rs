//! Delta engine.
//!
//! Compares freshly fetched rows with the prior snapshot and decides which
//! metric movements are worth an alert. A run is either a baseline (the
//! prior snapshot belongs to another day) or a comparison (same day).

use crate::config::ThresholdConfig;
use crate::models::{
    Decision, Evaluation, MetricKind, Row, RunMode, Snapshot, SpendDirection, COST, REVENUE,
};
use std::collections::HashMap;
use tracing::{debug, info};

/// Thresholds and policies for delta evaluation.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Downward slack accepted before a value is clamped back to its prior.
    pub tolerance: f64,
    pub leads_epsilon: f64,
    pub sales_epsilon: f64,
    pub spend_epsilon: f64,
    pub revenue_epsilon: f64,
    pub spend_direction: SpendDirection,
    /// Whether spend is held monotonic like the counters.
    pub clamp_spend: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from(&ThresholdConfig::default())
    }
}

impl From<&ThresholdConfig> for EngineConfig {
    fn from(config: &ThresholdConfig) -> Self {
        Self {
            tolerance: config.tolerance,
            leads_epsilon: config.leads_epsilon,
            sales_epsilon: config.sales_epsilon,
            spend_epsilon: config.spend_epsilon,
            revenue_epsilon: config.revenue_epsilon,
            spend_direction: config.spend_direction,
            clamp_spend: config.clamp_spend,
        }
    }
}

impl EngineConfig {
    /// Noise floor for the given alert kind.
    pub fn epsilon(&self, kind: MetricKind) -> f64 {
        match kind {
            MetricKind::Spend => self.spend_epsilon,
            MetricKind::Leads => self.leads_epsilon,
            MetricKind::Sales => self.sales_epsilon,
        }
    }
}

/// Monotonic clamp: accept the observation unless it dropped more than
/// `tolerance` below the prior, in which case keep the prior.
pub fn clamp(observed: f64, prior: f64, tolerance: f64) -> f64 {
    if observed >= prior - tolerance {
        observed
    } else {
        prior
    }
}

/// Percent change of a spend movement.
///
/// A zero prior has no meaningful ratio, so any real movement counts as 100%.
pub fn percent_change(old: f64, delta: f64, epsilon: f64) -> f64 {
    if old.abs() > epsilon {
        delta.abs() / old.abs() * 100.0
    } else if delta.abs() > epsilon {
        100.0
    } else {
        0.0
    }
}

/// Stateless comparison of fetched rows against a prior snapshot.
#[derive(Debug, Clone, Default)]
pub struct DeltaEngine {
    config: EngineConfig,
}

impl DeltaEngine {
    /// Create an engine with the given thresholds.
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Evaluate one run.
    ///
    /// `rows` must already be aggregated (one row per key).
    pub fn evaluate(&self, previous: &Snapshot, rows: Vec<Row>, today: &str) -> Evaluation {
        if !previous.is_for(today) {
            info!(
                "New day ({} -> {}), storing {} rows as baseline",
                previous.date,
                today,
                rows.len()
            );
            return Evaluation {
                mode: RunMode::Baseline,
                decisions: Vec::new(),
                snapshot: Snapshot::from_rows(today, rows),
            };
        }

        // Keys missing from this fetch keep their last-seen row.
        let mut snapshot = previous.clone();
        let mut decisions = Vec::new();

        for row in rows {
            let prior = previous.rows.get(&row.key);
            let current = match prior {
                Some(prior) => self.clamp_row(row, prior),
                None => row,
            };

            debug!(
                "Row {} prior={} metrics={:?}",
                current.key,
                prior.is_some(),
                current.metrics
            );

            for kind in MetricKind::ALL {
                if let Some(decision) = self.decide(kind, prior, &current) {
                    debug!(
                        "{} alert for {}: {} -> {}",
                        kind, decision.key, decision.old, decision.new
                    );
                    decisions.push(decision);
                }
            }

            snapshot.rows.insert(current.key.clone(), current);
        }

        let decisions = order_decisions(decisions);
        info!(
            "Compared against snapshot of {}: {} decisions",
            previous.date,
            decisions.len()
        );

        Evaluation {
            mode: RunMode::Compare,
            decisions,
            snapshot,
        }
    }

    /// Clamp every monotonic metric of `row` against `prior`.
    fn clamp_row(&self, mut row: Row, prior: &Row) -> Row {
        let tolerance = self.config.tolerance;

        for (name, value) in row.metrics.iter_mut() {
            if !self.is_monotonic(name) {
                continue;
            }
            let clamped = clamp(*value, prior.metric(name), tolerance);
            if clamped != *value {
                debug!(
                    "Clamped {} of {} from {} back to {}",
                    name, row.key, value, clamped
                );
            }
            *value = clamped;
        }

        // A metric the source stopped reporting keeps its prior value.
        for (name, value) in &prior.metrics {
            if self.is_monotonic(name) && !row.metrics.contains_key(name) {
                row.metrics.insert(name.clone(), *value);
            }
        }

        row
    }

    fn is_monotonic(&self, metric: &str) -> bool {
        metric != COST || self.config.clamp_spend
    }

    /// Build the decision for one metric kind, if the movement is alert-worthy.
    fn decide(&self, kind: MetricKind, prior: Option<&Row>, current: &Row) -> Option<Decision> {
        let name = kind.metric_name();
        let old = prior.map_or(0.0, |p| p.metric(name));
        let new = current.metric(name);
        let delta = new - old;
        let epsilon = self.config.epsilon(kind);

        let worthy = match kind {
            MetricKind::Spend => self.config.spend_direction.admits(delta, epsilon),
            MetricKind::Leads | MetricKind::Sales => delta > epsilon,
        };
        if !worthy {
            return None;
        }

        let revenue_delta = match kind {
            MetricKind::Sales => {
                let old_revenue = prior.map_or(0.0, |p| p.metric(REVENUE));
                let d = current.metric(REVENUE) - old_revenue;
                (d.abs() > self.config.revenue_epsilon).then_some(d)
            }
            _ => None,
        };
        let percent = match kind {
            MetricKind::Spend => Some(percent_change(old, delta, epsilon)),
            _ => None,
        };

        Some(Decision {
            key: current.key.clone(),
            kind,
            dimensions: current.dimensions.clone(),
            old,
            new,
            delta,
            from_zero: prior.is_none(),
            revenue_delta,
            percent,
        })
    }
}

/// Group by kind (spend, leads, sales) and order by key inside each group.
/// Spend keeps only the largest-magnitude movement per key.
fn order_decisions(decisions: Vec<Decision>) -> Vec<Decision> {
    let mut spend: HashMap<String, Decision> = HashMap::new();
    let mut ordered = Vec::with_capacity(decisions.len());

    for decision in decisions {
        if decision.kind != MetricKind::Spend {
            ordered.push(decision);
            continue;
        }
        match spend.get(&decision.key) {
            Some(kept) if kept.delta.abs() >= decision.delta.abs() => {}
            _ => {
                spend.insert(decision.key.clone(), decision);
            }
        }
    }

    ordered.extend(spend.into_values());
    ordered.sort_by(|a, b| a.kind.cmp(&b.kind).then_with(|| a.key.cmp(&b.key)));
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LEADS, SALES};

    const TODAY: &str = "2024-05-02";

    fn engine() -> DeltaEngine {
        DeltaEngine::default()
    }

    fn row(key: &str) -> Row {
        Row::new(key).with_dimension("campaign", key)
    }

    fn snapshot(date: &str, rows: Vec<Row>) -> Snapshot {
        Snapshot::from_rows(date, rows)
    }

    fn decisions_of(eval: &Evaluation, kind: MetricKind) -> Vec<&Decision> {
        eval.decisions.iter().filter(|d| d.kind == kind).collect()
    }

    #[test]
    fn test_leads_and_sale_with_revenue() {
        let previous = snapshot(
            TODAY,
            vec![row("A").with_metric(LEADS, 2.0).with_metric(SALES, 0.0)],
        );
        let fetched = vec![row("A")
            .with_metric(LEADS, 5.0)
            .with_metric(SALES, 1.0)
            .with_metric(REVENUE, 10.0)];

        let eval = engine().evaluate(&previous, fetched, TODAY);

        assert_eq!(eval.mode, RunMode::Compare);
        assert_eq!(eval.decisions.len(), 2);

        let lead = &eval.decisions[0];
        assert_eq!(lead.kind, MetricKind::Leads);
        assert_eq!((lead.old, lead.new), (2.0, 5.0));
        assert!(!lead.from_zero);

        let sale = &eval.decisions[1];
        assert_eq!(sale.kind, MetricKind::Sales);
        assert_eq!((sale.old, sale.new), (0.0, 1.0));
        assert_eq!(sale.revenue_delta, Some(10.0));
    }

    #[test]
    fn test_new_key_alerts_from_zero() {
        let previous = snapshot(TODAY, vec![row("A").with_metric(LEADS, 1.0)]);
        let fetched = vec![row("A").with_metric(LEADS, 1.0), row("B").with_metric(LEADS, 3.0)];

        let eval = engine().evaluate(&previous, fetched, TODAY);

        assert_eq!(eval.decisions.len(), 1);
        let d = &eval.decisions[0];
        assert_eq!(d.key, "B");
        assert!(d.from_zero);
        assert_eq!((d.old, d.new, d.delta), (0.0, 3.0, 3.0));
        assert_eq!(eval.snapshot.rows["B"].metric(LEADS), 3.0);
    }

    #[test]
    fn test_spend_jitter_is_clamped_and_silent() {
        let previous = snapshot(TODAY, vec![row("C").with_metric(COST, 50.0)]);
        let fetched = vec![row("C").with_metric(COST, 49.995)];

        let eval = engine().evaluate(&previous, fetched, TODAY);

        assert!(eval.decisions.is_empty());
        assert_eq!(eval.snapshot.rows["C"].metric(COST), 50.0);
    }

    #[test]
    fn test_regression_never_alerts_nor_shrinks_baseline() {
        let previous = snapshot(
            TODAY,
            vec![row("A").with_metric(LEADS, 9.0).with_metric(SALES, 3.0)],
        );
        let fetched = vec![row("A").with_metric(LEADS, 4.0).with_metric(SALES, 3.0)];

        let eval = engine().evaluate(&previous, fetched, TODAY);

        assert!(eval.decisions.is_empty());
        assert_eq!(eval.snapshot.rows["A"].metric(LEADS), 9.0);

        // Recovering to the old level is not news either.
        let again = vec![row("A").with_metric(LEADS, 9.0).with_metric(SALES, 3.0)];
        assert!(engine()
            .evaluate(&eval.snapshot, again, TODAY)
            .decisions
            .is_empty());
    }

    #[test]
    fn test_baseline_on_new_day() {
        let previous = snapshot("2024-05-01", vec![row("A").with_metric(LEADS, 1.0)]);
        let fetched = vec![row("A").with_metric(LEADS, 7.0), row("B").with_metric(SALES, 2.0)];

        let eval = engine().evaluate(&previous, fetched.clone(), TODAY);

        assert_eq!(eval.mode, RunMode::Baseline);
        assert!(eval.decisions.is_empty());
        assert_eq!(eval.snapshot, Snapshot::from_rows(TODAY, fetched));
    }

    #[test]
    fn test_rerun_is_idempotent() {
        let previous = snapshot(TODAY, vec![row("A").with_metric(LEADS, 2.0)]);
        let fetched = vec![row("A").with_metric(LEADS, 5.0).with_metric(COST, 3.0)];

        let first = engine().evaluate(&previous, fetched.clone(), TODAY);
        assert_eq!(first.decisions.len(), 2);

        let second = engine().evaluate(&first.snapshot, fetched, TODAY);
        assert!(second.decisions.is_empty());
        assert_eq!(second.snapshot, first.snapshot);
    }

    #[test]
    fn test_unseen_keys_are_carried_forward() {
        let previous = snapshot(
            TODAY,
            vec![row("A").with_metric(LEADS, 2.0), row("B").with_metric(LEADS, 4.0)],
        );
        let eval = engine().evaluate(&previous, vec![row("A").with_metric(LEADS, 2.0)], TODAY);

        assert_eq!(eval.snapshot.rows.len(), 2);
        assert_eq!(eval.snapshot.rows["B"].metric(LEADS), 4.0);
    }

    #[test]
    fn test_spend_direction_policy() {
        let previous = snapshot(TODAY, vec![row("A").with_metric(COST, 10.0)]);
        let up = vec![row("A").with_metric(COST, 12.0)];

        let mut config = EngineConfig {
            spend_direction: SpendDirection::Down,
            ..EngineConfig::default()
        };
        let eval = DeltaEngine::new(config.clone()).evaluate(&previous, up.clone(), TODAY);
        assert!(eval.decisions.is_empty());

        config.spend_direction = SpendDirection::Up;
        let eval = DeltaEngine::new(config.clone()).evaluate(&previous, up, TODAY);
        let spend = decisions_of(&eval, MetricKind::Spend);
        assert_eq!(spend.len(), 1);
        assert_eq!(spend[0].delta, 2.0);
        assert_eq!(spend[0].percent, Some(20.0));

        // With spend clamping off, decreases become visible to `down`.
        config.spend_direction = SpendDirection::Down;
        config.clamp_spend = false;
        let down = vec![row("A").with_metric(COST, 8.0)];
        let eval = DeltaEngine::new(config).evaluate(&previous, down, TODAY);
        let spend = decisions_of(&eval, MetricKind::Spend);
        assert_eq!(spend.len(), 1);
        assert_eq!(spend[0].delta, -2.0);
        assert_eq!(eval.snapshot.rows["A"].metric(COST), 8.0);
    }

    #[test]
    fn test_epsilon_is_per_metric() {
        let config = EngineConfig {
            spend_epsilon: 1.0,
            ..EngineConfig::default()
        };
        let previous = snapshot(
            TODAY,
            vec![row("A").with_metric(COST, 10.0).with_metric(LEADS, 1.0)],
        );
        let fetched = vec![row("A").with_metric(COST, 10.5).with_metric(LEADS, 2.0)];

        let eval = DeltaEngine::new(config).evaluate(&previous, fetched, TODAY);

        assert_eq!(eval.decisions.len(), 1);
        assert_eq!(eval.decisions[0].kind, MetricKind::Leads);
    }

    #[test]
    fn test_count_delta_equal_to_epsilon_is_noise() {
        let config = EngineConfig {
            leads_epsilon: 1.0,
            sales_epsilon: 1.0,
            ..EngineConfig::default()
        };
        let previous = snapshot(
            TODAY,
            vec![row("A").with_metric(LEADS, 2.0).with_metric(SALES, 4.0)],
        );

        let at_epsilon = vec![row("A").with_metric(LEADS, 3.0).with_metric(SALES, 5.0)];
        let eval = DeltaEngine::new(config.clone()).evaluate(&previous, at_epsilon, TODAY);
        assert!(eval.decisions.is_empty());

        let above = vec![row("A").with_metric(LEADS, 3.5).with_metric(SALES, 5.0)];
        let eval = DeltaEngine::new(config).evaluate(&previous, above, TODAY);
        assert_eq!(eval.decisions.len(), 1);
        assert_eq!(eval.decisions[0].kind, MetricKind::Leads);
    }

    #[test]
    fn test_spend_delta_equal_to_epsilon_is_noise() {
        let config = EngineConfig {
            spend_epsilon: 0.5,
            clamp_spend: false,
            ..EngineConfig::default()
        };
        let previous = snapshot(TODAY, vec![row("A").with_metric(COST, 10.0)]);

        for cost in [10.5, 9.5] {
            let fetched = vec![row("A").with_metric(COST, cost)];
            let eval = DeltaEngine::new(config.clone()).evaluate(&previous, fetched, TODAY);
            assert!(eval.decisions.is_empty(), "cost {} should not alert", cost);
        }

        let fetched = vec![row("A").with_metric(COST, 11.0)];
        let eval = DeltaEngine::new(config).evaluate(&previous, fetched, TODAY);
        assert_eq!(eval.count(MetricKind::Spend), 1);
    }

    #[test]
    fn test_sale_without_revenue_change() {
        let previous = snapshot(
            TODAY,
            vec![row("A").with_metric(SALES, 1.0).with_metric(REVENUE, 5.0)],
        );
        let fetched = vec![row("A").with_metric(SALES, 2.0).with_metric(REVENUE, 5.0)];

        let eval = engine().evaluate(&previous, fetched, TODAY);
        assert_eq!(eval.decisions[0].revenue_delta, None);
    }

    #[test]
    fn test_output_grouped_spend_leads_sales() {
        let previous = snapshot(TODAY, vec![]);
        let fetched = vec![
            row("b").with_metric(SALES, 1.0).with_metric(LEADS, 1.0),
            row("a").with_metric(COST, 2.0).with_metric(SALES, 1.0),
        ];

        let eval = engine().evaluate(&previous, fetched, TODAY);
        let order: Vec<(MetricKind, &str)> = eval
            .decisions
            .iter()
            .map(|d| (d.kind, d.key.as_str()))
            .collect();

        assert_eq!(
            order,
            vec![
                (MetricKind::Spend, "a"),
                (MetricKind::Leads, "b"),
                (MetricKind::Sales, "a"),
                (MetricKind::Sales, "b"),
            ]
        );
    }

    #[test]
    fn test_spend_keeps_largest_per_key() {
        let spend = |delta: f64| Decision {
            key: "a".to_string(),
            kind: MetricKind::Spend,
            dimensions: Default::default(),
            old: 0.0,
            new: delta,
            delta,
            from_zero: true,
            revenue_delta: None,
            percent: Some(100.0),
        };
        let lead = Decision {
            kind: MetricKind::Leads,
            ..spend(1.0)
        };

        let ordered = order_decisions(vec![spend(2.0), spend(-5.0), lead.clone(), spend(3.0)]);

        assert_eq!(ordered.len(), 2);
        assert_eq!(ordered[0].delta, -5.0);
        assert_eq!(ordered[1], lead);
    }

    #[test]
    fn test_clamp_properties() {
        let t = 1e-6;
        for (observed, prior) in [(5.0, 3.0), (3.0, 3.0), (2.0, 3.0), (3.0 - 1e-7, 3.0)] {
            let c = clamp(observed, prior, t);
            assert!(c >= prior - t);
            if observed >= prior {
                assert_eq!(c, observed);
            }
        }
        assert_eq!(clamp(49.995, 50.0, t), 50.0);
    }

    #[test]
    fn test_percent_change() {
        assert_eq!(percent_change(50.0, 25.0, 0.01), 50.0);
        assert_eq!(percent_change(-50.0, -25.0, 0.01), 50.0);
        assert_eq!(percent_change(0.0, 4.0, 0.01), 100.0);
        assert_eq!(percent_change(0.0, 0.001, 0.01), 0.0);
    }
}

//! One watcher run: fetch, normalize, aggregate, compare, persist, notify.
//!
//! Runs are strictly sequential and assume no other run touches the same
//! state concurrently; two overlapping runs can overwrite each other's save.

use crate::analysis::{aggregate_rows, DeltaEngine};
use crate::models::{EmptyFetchPolicy, MetricKind, RunMode};
use crate::normalize::RowNormalizer;
use crate::report::{no_data_message, AlertComposer, Notifier};
use crate::source::ReportSource;
use crate::store::SnapshotStore;
use anyhow::{Context, Result};
use tracing::{info, warn};

/// Everything a run needs, wired up front.
pub struct Pipeline {
    pub source: Box<dyn ReportSource>,
    pub normalizer: RowNormalizer,
    pub engine: DeltaEngine,
    pub store: SnapshotStore,
    pub composer: AlertComposer,
    pub notifier: Box<dyn Notifier>,
    pub on_empty: EmptyFetchPolicy,
    /// Write the new snapshot. Off for dry runs.
    pub persist: bool,
}

/// What a run did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    /// `None` when the fetch produced no rows and nothing was compared.
    pub mode: Option<RunMode>,
    pub rows: usize,
    pub spend: usize,
    pub leads: usize,
    pub sales: usize,
    pub messages: usize,
    pub saved: bool,
}

impl Pipeline {
    /// Execute one run for the given day.
    ///
    /// Only a failed snapshot save is an error; in that case no alerts are sent.
    pub async fn run(&self, today: &str) -> Result<RunSummary> {
        let previous = self.store.load(today).await;

        let payloads = match self.source.fetch().await {
            Ok(payloads) => payloads,
            Err(e) => {
                warn!("Fetch from {} failed: {:#}", self.source.describe(), e);
                Vec::new()
            }
        };

        let rows = aggregate_rows(self.normalizer.normalize_payloads(&payloads));
        info!(
            "Fetched {} payloads, {} distinct rows",
            payloads.len(),
            rows.len()
        );

        if rows.is_empty() {
            warn!("No data from {}", self.source.describe());
            let messages = if self.on_empty.should_notify(&previous, today) {
                self.composer
                    .send_text(self.notifier.as_ref(), &no_data_message(today))
                    .await
            } else {
                info!("Snapshot for {} already has rows, not reporting empty fetch", today);
                0
            };
            return Ok(RunSummary {
                messages,
                ..Default::default()
            });
        }

        let row_count = rows.len();
        let evaluation = self.engine.evaluate(&previous, rows, today);

        let saved = if self.persist {
            self.store
                .save(&evaluation.snapshot)
                .await
                .context("Failed to save snapshot, alerts withheld")?;
            true
        } else {
            info!("Dry run: snapshot not saved");
            false
        };

        let messages = self
            .composer
            .deliver(self.notifier.as_ref(), &evaluation.decisions)
            .await;

        Ok(RunSummary {
            mode: Some(evaluation.mode),
            rows: row_count,
            spend: evaluation.count(MetricKind::Spend),
            leads: evaluation.count(MetricKind::Leads),
            sales: evaluation.count(MetricKind::Sales),
            messages,
            saved,
        })
    }
}

//! Alert message composition.
//!
//! Turns the delta engine's decisions into stacked text blocks (spend, then
//! leads, then sales) and hands the result to a [`Notifier`].

use super::notifier::Notifier;
use crate::models::{Decision, MetricKind};
use tracing::{info, warn};

/// Configuration for alert rendering.
#[derive(Debug, Clone)]
pub struct ComposerConfig {
    /// Dimensions shown on the second line of each block, in order.
    pub display_dimensions: Vec<String>,
    /// Longest message the channel accepts, in characters.
    pub max_message_len: usize,
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            display_dimensions: vec![
                "campaign".to_string(),
                "country".to_string(),
                "creative_id".to_string(),
            ],
            max_message_len: 4096,
        }
    }
}

/// Renders decisions and submits them.
#[derive(Debug, Clone, Default)]
pub struct AlertComposer {
    config: ComposerConfig,
}

impl AlertComposer {
    pub fn new(config: ComposerConfig) -> Self {
        Self { config }
    }

    /// Compose the message body, or `None` when there is nothing to say.
    pub fn compose(&self, decisions: &[Decision]) -> Option<String> {
        if decisions.is_empty() {
            return None;
        }

        let mut ordered: Vec<&Decision> = decisions.iter().collect();
        ordered.sort_by_key(|d| d.kind);

        let blocks: Vec<String> = ordered.iter().map(|d| self.render_block(d)).collect();
        Some(blocks.join("\n\n"))
    }

    /// Render one decision as a text block.
    pub fn render_block(&self, decision: &Decision) -> String {
        let mut block = format!("{} {}", decision.kind.emoji(), decision.kind);
        if decision.from_zero {
            block.push_str(" (new)");
        }
        block.push('\n');
        block.push_str(&self.describe_row(decision));
        block.push('\n');

        match decision.kind {
            MetricKind::Spend => {
                block.push_str(&format!(
                    "{} → {} ({:+.2}, {}{:.1}%)",
                    format_money(decision.old),
                    format_money(decision.new),
                    decision.delta,
                    if decision.delta < 0.0 { "-" } else { "+" },
                    decision.percent.unwrap_or(0.0)
                ));
            }
            MetricKind::Leads | MetricKind::Sales => {
                block.push_str(&format!(
                    "{} → {}",
                    format_count(decision.old),
                    format_count(decision.new)
                ));
            }
        }

        if let Some(revenue) = decision.revenue_delta {
            block.push_str(&format!("\nrevenue {:+.2}", revenue));
        }

        block
    }

    /// Dimension line, skipping empty values.
    fn describe_row(&self, decision: &Decision) -> String {
        let parts: Vec<&str> = self
            .config
            .display_dimensions
            .iter()
            .filter_map(|name| decision.dimensions.get(name))
            .map(String::as_str)
            .filter(|v| !v.is_empty())
            .collect();

        if parts.is_empty() {
            decision.key.clone()
        } else {
            parts.join(" | ")
        }
    }

    /// Split a body into messages no longer than the channel limit, cutting
    /// only between blocks. An oversized single block is truncated.
    pub fn split_messages(&self, body: &str) -> Vec<String> {
        let limit = self.config.max_message_len.max(1);
        let mut messages = Vec::new();
        let mut current = String::new();

        for block in body.split("\n\n") {
            let block = truncate_chars(block, limit);
            let needed = if current.is_empty() {
                block.chars().count()
            } else {
                current.chars().count() + 2 + block.chars().count()
            };

            if needed > limit && !current.is_empty() {
                messages.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(&block);
        }

        if !current.is_empty() {
            messages.push(current);
        }
        messages
    }

    /// Compose and deliver. Delivery failures are logged, never retried or
    /// propagated. Returns the number of messages delivered.
    pub async fn deliver(&self, notifier: &dyn Notifier, decisions: &[Decision]) -> usize {
        let Some(body) = self.compose(decisions) else {
            info!("No alerts triggered");
            return 0;
        };
        self.send_text(notifier, &body).await
    }

    /// Deliver arbitrary text (e.g. a no-data notice) with the same policy.
    pub async fn send_text(&self, notifier: &dyn Notifier, body: &str) -> usize {
        let mut delivered = 0;
        for message in self.split_messages(body) {
            match notifier.send(&message).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!("Failed to notify via {}: {}", notifier.describe(), e),
            }
        }
        info!("Delivered {} message(s) via {}", delivered, notifier.describe());
        delivered
    }
}

/// Notice sent when the source produced no rows.
pub fn no_data_message(today: &str) -> String {
    format!("⚠️ NO DATA FROM REPORT SOURCE\n{}", today)
}

/// Counts render without decimals when integral.
fn format_count(value: f64) -> String {
    if (value - value.round()).abs() < 1e-9 {
        format!("{}", value.round() as i64)
    } else {
        format!("{:.2}", value)
    }
}

fn format_money(value: f64) -> String {
    format!("{:.2}", value)
}

fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

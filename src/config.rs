//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.reportwatch.toml` files.

use crate::models::{EmptyFetchPolicy, SpendDirection, COST, LEADS, REVENUE, SALES};
use anyhow::{Context, Result};
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Default config file name looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = ".reportwatch.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Report source settings.
    #[serde(default)]
    pub source: SourceConfig,

    /// Persisted state settings.
    #[serde(default)]
    pub state: StateConfig,

    /// Notification channel settings.
    #[serde(default)]
    pub notifier: NotifierConfig,

    /// Row shape settings.
    #[serde(default)]
    pub rows: RowsConfig,

    /// Delta thresholds.
    #[serde(default)]
    pub thresholds: ThresholdConfig,

    /// Run policies.
    #[serde(default)]
    pub policy: PolicyConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// UTC offset of the reference timezone that defines the day boundary.
    #[serde(default = "default_tz_offset")]
    pub tz_offset: String,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            tz_offset: default_tz_offset(),
            verbose: false,
        }
    }
}

fn default_tz_offset() -> String {
    "+02:00".to_string()
}

/// Where report payloads come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Captured payloads dumped to a JSON file
    #[default]
    File,
    /// JSON report endpoint
    Http,
}

/// Report source settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub kind: SourceKind,

    /// Capture file path for the file source.
    #[serde(default = "default_source_path")]
    pub path: String,

    /// Report URL for the http source.
    #[serde(default)]
    pub url: Option<String>,

    /// Environment variable holding a bearer token for the http source.
    #[serde(default)]
    pub token_env: Option<String>,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::File,
            path: default_source_path(),
            url: None,
            token_env: None,
            timeout_seconds: default_timeout(),
        }
    }
}

fn default_source_path() -> String {
    "captures.json".to_string()
}

fn default_timeout() -> u64 {
    20
}

/// Which key/blob store keeps the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    /// One file per key in a local directory
    #[default]
    File,
    /// A GitHub gist, one gist file per key
    Gist,
}

/// Persisted state settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    #[serde(default)]
    pub backend: StateBackend,

    /// Directory for the file backend.
    #[serde(default = "default_state_dir")]
    pub dir: String,

    /// Blob name the snapshot is stored under.
    #[serde(default = "default_state_key")]
    pub key: String,

    /// Gist id for the gist backend.
    #[serde(default)]
    pub gist_id: Option<String>,

    /// Environment variable holding the gist token.
    #[serde(default = "default_gist_token_env")]
    pub token_env: String,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            backend: StateBackend::File,
            dir: default_state_dir(),
            key: default_state_key(),
            gist_id: None,
            token_env: default_gist_token_env(),
            timeout_seconds: default_timeout(),
        }
    }
}

fn default_state_dir() -> String {
    ".reportwatch".to_string()
}

fn default_state_key() -> String {
    "reportwatch_state.json".to_string()
}

fn default_gist_token_env() -> String {
    "GIST_TOKEN".to_string()
}

/// Notification channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifierKind {
    /// Telegram Bot API
    #[default]
    Telegram,
    /// Print to standard output
    Stdout,
}

/// Notification channel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    #[serde(default)]
    pub kind: NotifierKind,

    /// Environment variable holding the bot token.
    #[serde(default = "default_bot_token_env")]
    pub token_env: String,

    /// Target chat id. Without one, messages go to stdout.
    #[serde(default)]
    pub chat_id: Option<String>,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Longest single message the channel accepts.
    #[serde(default = "default_max_message_len")]
    pub max_message_len: usize,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            kind: NotifierKind::Telegram,
            token_env: default_bot_token_env(),
            chat_id: None,
            timeout_seconds: default_timeout(),
            max_message_len: default_max_message_len(),
        }
    }
}

fn default_bot_token_env() -> String {
    "TELEGRAM_BOT_TOKEN".to_string()
}

fn default_max_message_len() -> usize {
    4096
}

/// Row shape settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowsConfig {
    /// Dimension names, in the order used to build the row key.
    #[serde(default = "default_key_dimensions")]
    pub key_dimensions: Vec<String>,

    /// Dimensions that must be non-empty for a record to be kept.
    #[serde(default = "default_required_dimensions")]
    pub required_dimensions: Vec<String>,

    /// Dimensions shown in alert blocks. Empty means all key dimensions.
    #[serde(default = "default_display_dimensions")]
    pub display_dimensions: Vec<String>,

    /// Separator placed between dimension values in the key.
    #[serde(default = "default_key_separator")]
    pub key_separator: String,

    /// Canonical metric name to source field aliases, first non-zero wins.
    #[serde(default = "default_metrics")]
    pub metrics: BTreeMap<String, Vec<String>>,
}

impl Default for RowsConfig {
    fn default() -> Self {
        Self {
            key_dimensions: default_key_dimensions(),
            required_dimensions: default_required_dimensions(),
            display_dimensions: default_display_dimensions(),
            key_separator: default_key_separator(),
            metrics: default_metrics(),
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_key_dimensions() -> Vec<String> {
    strings(&["campaign", "country", "external_id", "creative_id"])
}

fn default_required_dimensions() -> Vec<String> {
    strings(&["campaign"])
}

fn default_display_dimensions() -> Vec<String> {
    strings(&["campaign", "country", "creative_id"])
}

fn default_key_separator() -> String {
    "|".to_string()
}

fn default_metrics() -> BTreeMap<String, Vec<String>> {
    let mut metrics = BTreeMap::new();
    metrics.insert(LEADS.to_string(), strings(&["conversions", "leads"]));
    metrics.insert(SALES.to_string(), strings(&["sales"]));
    metrics.insert(
        REVENUE.to_string(),
        strings(&["deposit_revenue", "sale_revenue", "revenue"]),
    );
    metrics.insert(COST.to_string(), strings(&["cost", "spend"]));
    metrics
}

/// Delta thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdConfig {
    /// Downward slack absorbed as floating-point noise before clamping.
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,

    #[serde(default = "default_count_epsilon")]
    pub leads_epsilon: f64,

    #[serde(default = "default_count_epsilon")]
    pub sales_epsilon: f64,

    #[serde(default = "default_money_epsilon")]
    pub spend_epsilon: f64,

    #[serde(default = "default_money_epsilon")]
    pub revenue_epsilon: f64,

    /// Which spend movements alert.
    #[serde(default)]
    pub spend_direction: SpendDirection,

    /// Apply monotonic clamping to spend. Disable to let `down` alerts fire.
    #[serde(default = "default_true")]
    pub clamp_spend: bool,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            tolerance: default_tolerance(),
            leads_epsilon: default_count_epsilon(),
            sales_epsilon: default_count_epsilon(),
            spend_epsilon: default_money_epsilon(),
            revenue_epsilon: default_money_epsilon(),
            spend_direction: SpendDirection::Both,
            clamp_spend: true,
        }
    }
}

fn default_tolerance() -> f64 {
    1e-6
}

fn default_count_epsilon() -> f64 {
    1e-4
}

fn default_money_epsilon() -> f64 {
    0.01
}

fn default_true() -> bool {
    true
}

/// Run policies.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Whether to notify when a fetch returns no rows.
    #[serde(default)]
    pub on_empty: EmptyFetchPolicy,
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(DEFAULT_CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings, but only
    /// when they were explicitly provided.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref input) = args.input {
            self.source.kind = SourceKind::File;
            self.source.path = input.display().to_string();
        }
        if let Some(ref url) = args.source_url {
            self.source.kind = SourceKind::Http;
            self.source.url = Some(url.clone());
        }

        if let Some(ref dir) = args.state_dir {
            self.state.backend = StateBackend::File;
            self.state.dir = dir.display().to_string();
        }

        if let Some(ref offset) = args.tz_offset {
            self.general.tz_offset = offset.clone();
        }
        if let Some(direction) = args.direction {
            self.thresholds.spend_direction = direction;
        }
        if let Some(policy) = args.on_empty {
            self.policy.on_empty = policy;
        }

        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Parsed reference timezone offset.
    pub fn reference_offset(&self) -> Result<FixedOffset> {
        parse_utc_offset(&self.general.tz_offset)
    }

    /// Check cross-field constraints that serde defaults cannot express.
    pub fn validate(&self) -> Result<()> {
        self.reference_offset()?;

        if self.rows.key_dimensions.is_empty() {
            anyhow::bail!("rows.key_dimensions must name at least one dimension");
        }
        for required in &self.rows.required_dimensions {
            if !self.rows.key_dimensions.contains(required) {
                anyhow::bail!(
                    "rows.required_dimensions entry '{}' is not a key dimension",
                    required
                );
            }
        }

        let t = &self.thresholds;
        for (name, value) in [
            ("tolerance", t.tolerance),
            ("leads_epsilon", t.leads_epsilon),
            ("sales_epsilon", t.sales_epsilon),
            ("spend_epsilon", t.spend_epsilon),
            ("revenue_epsilon", t.revenue_epsilon),
        ] {
            if !value.is_finite() || value < 0.0 {
                anyhow::bail!("thresholds.{} must be a non-negative number", name);
            }
        }

        if self.state.backend == StateBackend::Gist && self.state.gist_id.is_none() {
            anyhow::bail!("state.gist_id is required for the gist backend");
        }
        if self.source.kind == SourceKind::Http && self.source.url.is_none() {
            anyhow::bail!("source.url is required for the http source");
        }

        Ok(())
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

/// Parse a `±HH:MM` (or `Z`) UTC offset.
pub fn parse_utc_offset(raw: &str) -> Result<FixedOffset> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("z") || raw.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0).context("invalid UTC offset");
    }

    let (sign, rest) = if let Some(rest) = raw.strip_prefix('+') {
        (1, rest)
    } else if let Some(rest) = raw.strip_prefix('-') {
        (-1, rest)
    } else {
        anyhow::bail!("UTC offset must start with '+' or '-': {}", raw);
    };

    let (hours, minutes) = rest.split_once(':').unwrap_or((rest, "0"));
    let hours: i32 = hours
        .parse()
        .with_context(|| format!("Invalid offset hours: {}", raw))?;
    let minutes: i32 = minutes
        .parse()
        .with_context(|| format!("Invalid offset minutes: {}", raw))?;

    if hours > 14 || minutes > 59 {
        anyhow::bail!("UTC offset out of range: {}", raw);
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
        .with_context(|| format!("UTC offset out of range: {}", raw))
}

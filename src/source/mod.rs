//! Report sources.
//!
//! A source hands over the raw payloads captured for one run. Several
//! partial captures of the same report are normal; unrelated payloads are
//! filtered out later by the normalizer.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// Supplier of raw report payloads.
#[async_trait]
pub trait ReportSource: Send + Sync {
    /// Fetch the payloads captured for this run.
    async fn fetch(&self) -> Result<Vec<Value>>;

    /// Human-readable source description for logs.
    fn describe(&self) -> String;
}

/// Reads captured payloads from a file.
///
/// The file holds one payload, a JSON array of payloads, or one payload per
/// line (JSON lines).
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ReportSource for FileSource {
    async fn fetch(&self) -> Result<Vec<Value>> {
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read captures from {}", self.path.display()))?;
        let payloads = parse_captures(&content)
            .with_context(|| format!("Failed to parse captures in {}", self.path.display()))?;
        info!(
            "Read {} payloads from {}",
            payloads.len(),
            self.path.display()
        );
        Ok(payloads)
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}

/// Split a capture dump into payloads.
///
/// A top-level array counts as a list of payloads only when its items are
/// themselves payloads (objects carrying `rows`); otherwise it is a single
/// payload of bare records.
pub fn parse_captures(content: &str) -> Result<Vec<Value>> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(match value {
            Value::Array(items) if items.iter().any(is_payload) => items,
            other => vec![other],
        });
    }

    let mut payloads = Vec::new();
    for (i, line) in trimmed.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(line)
            .with_context(|| format!("Invalid JSON on line {}", i + 1))?;
        payloads.push(value);
    }
    Ok(payloads)
}

fn is_payload(value: &Value) -> bool {
    value.get("rows").is_some_and(Value::is_array)
}

/// HTTP report source configuration.
#[derive(Debug, Clone)]
pub struct HttpSourceConfig {
    pub url: String,
    pub token: Option<String>,
    pub timeout_seconds: u64,
}

/// Fetches a JSON report from a URL.
pub struct HttpSource {
    config: HttpSourceConfig,
    http_client: reqwest::Client,
}

impl HttpSource {
    pub fn new(config: HttpSourceConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            config,
            http_client,
        })
    }
}

#[async_trait]
impl ReportSource for HttpSource {
    async fn fetch(&self) -> Result<Vec<Value>> {
        let mut request = self.http_client.get(&self.config.url);
        if let Some(ref token) = self.config.token {
            request = request.bearer_auth(token);
        }

        debug!("Requesting report from {}", self.config.url);
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                anyhow::anyhow!(
                    "Report request timed out after {}s",
                    self.config.timeout_seconds
                )
            } else if e.is_connect() {
                anyhow::anyhow!("Cannot connect to report source at {}", self.config.url)
            } else {
                anyhow::anyhow!("Failed to send report request: {}", e)
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Report source error {}: {}", status, body));
        }

        let content = response
            .text()
            .await
            .context("Failed to read report response")?;
        parse_captures(&content)
    }

    fn describe(&self) -> String {
        format!("url {}", self.config.url)
    }
}

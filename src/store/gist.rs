//! GitHub gist backed state store.
//!
//! Each key is a file inside one gist. Reads use `GET /gists/{id}`; writes
//! `PATCH` the single file, leaving the gist's other files alone.

use super::{StateStore, StoreError};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

const GITHUB_API: &str = "https://api.github.com";

/// Gist state store configuration.
#[derive(Debug, Clone)]
pub struct GistConfig {
    pub gist_id: String,
    pub token: String,
    pub timeout_seconds: u64,
    pub api_base: String,
}

/// Stores each key as a file of a GitHub gist.
pub struct GistStateStore {
    config: GistConfig,
    http_client: reqwest::Client,
}

impl GistStateStore {
    pub fn new(config: GistConfig) -> Result<Self, StoreError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(concat!("reportwatch/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            config,
            http_client,
        })
    }

    fn url(&self) -> String {
        format!(
            "{}/gists/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.gist_id
        )
    }

    async fn fetch_raw(&self, raw_url: &str) -> Result<String, StoreError> {
        let response = self
            .http_client
            .get(raw_url)
            .bearer_auth(&self.config.token)
            .send()
            .await?;
        check_status(response).await?.text().await.map_err(Into::into)
    }
}

impl Default for GistConfig {
    fn default() -> Self {
        Self {
            gist_id: String::new(),
            token: String::new(),
            timeout_seconds: 20,
            api_base: GITHUB_API.to_string(),
        }
    }
}

/// Where to find a gist file's content.
#[derive(Debug, PartialEq)]
enum GistFile {
    Inline(String),
    /// Large files come back truncated and must be fetched from `raw_url`.
    Truncated(String),
    Missing,
}

fn locate_file(gist: &Value, key: &str) -> GistFile {
    let Some(file) = gist.get("files").and_then(|f| f.get(key)) else {
        return GistFile::Missing;
    };

    let truncated = file
        .get("truncated")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let raw_url = file.get("raw_url").and_then(Value::as_str);

    match (truncated, raw_url, file.get("content").and_then(Value::as_str)) {
        (true, Some(url), _) => GistFile::Truncated(url.to_string()),
        (_, _, Some(content)) => GistFile::Inline(content.to_string()),
        _ => GistFile::Missing,
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(StoreError::Status { status, body })
}

#[async_trait]
impl StateStore for GistStateStore {
    async fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        let response = self
            .http_client
            .get(self.url())
            .bearer_auth(&self.config.token)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await?;
        let gist: Value = check_status(response).await?.json().await?;

        match locate_file(&gist, key) {
            GistFile::Inline(content) => Ok(Some(content)),
            GistFile::Truncated(raw_url) => {
                debug!("Gist file {} is truncated, fetching raw content", key);
                self.fetch_raw(&raw_url).await.map(Some)
            }
            GistFile::Missing => Ok(None),
        }
    }

    async fn write(&self, key: &str, blob: &str) -> Result<(), StoreError> {
        let body = json!({ "files": { key: { "content": blob } } });
        let response = self
            .http_client
            .patch(self.url())
            .bearer_auth(&self.config.token)
            .header("Accept", "application/vnd.github+json")
            .json(&body)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("gist {}", self.config.gist_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locate_inline_file() {
        let gist = json!({"files": {"state.json": {"content": "{\"date\":\"2024-05-01\"}"}}});
        assert_eq!(
            locate_file(&gist, "state.json"),
            GistFile::Inline("{\"date\":\"2024-05-01\"}".to_string())
        );
    }

    #[test]
    fn test_locate_truncated_file() {
        let gist = json!({"files": {"state.json": {
            "content": "{\"date\":",
            "truncated": true,
            "raw_url": "https://gist.githubusercontent.com/raw/state.json"
        }}});
        assert_eq!(
            locate_file(&gist, "state.json"),
            GistFile::Truncated("https://gist.githubusercontent.com/raw/state.json".to_string())
        );
    }

    #[test]
    fn test_locate_missing_file() {
        let gist = json!({"files": {"other.json": {"content": "{}"}}});
        assert_eq!(locate_file(&gist, "state.json"), GistFile::Missing);
        assert_eq!(locate_file(&json!({}), "state.json"), GistFile::Missing);
    }

    #[test]
    fn test_url_trims_trailing_slash() {
        let store = GistStateStore::new(GistConfig {
            gist_id: "abc123".to_string(),
            api_base: "https://ghe.example/api/v3/".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(store.url(), "https://ghe.example/api/v3/gists/abc123");
    }
}

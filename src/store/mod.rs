//! Snapshot persistence.
//!
//! The snapshot lives in a key/blob [`StateStore`]. [`SnapshotStore`] owns
//! its lifecycle: loading never fails a run (a missing or broken snapshot
//! becomes an empty one for today), while saving reports every error.

pub mod file;
pub mod gist;

pub use file::FileStateStore;
pub use gist::GistStateStore;

use crate::models::Snapshot;
use async_trait::async_trait;
use tracing::{debug, info, warn};

/// Errors raised by state backends.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Local filesystem failure
    #[error("state I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// Transport-level HTTP failure
    #[error("state request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Backend answered with a non-success status
    #[error("state backend returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Snapshot could not be encoded
    #[error("state encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    /// Backend is not usable as configured
    #[error("state backend misconfigured: {0}")]
    Config(String),
}

/// A simple key to blob store.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Read the blob stored under `key`. `Ok(None)` when nothing is stored yet.
    async fn read(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Replace the blob stored under `key`.
    async fn write(&self, key: &str, blob: &str) -> Result<(), StoreError>;

    /// Human-readable backend description for logs.
    fn describe(&self) -> String;
}

/// Loads and saves the day-scoped snapshot through a [`StateStore`].
pub struct SnapshotStore {
    store: Box<dyn StateStore>,
    key: String,
}

impl SnapshotStore {
    /// Create an adapter storing the snapshot under `key`.
    pub fn new(store: Box<dyn StateStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    /// Load the prior snapshot.
    ///
    /// Any failure yields an empty snapshot dated `today`: the run compares
    /// against nothing and every fetched row counts as new.
    pub async fn load(&self, today: &str) -> Snapshot {
        match self.store.read(&self.key).await {
            Ok(Some(content)) => match Snapshot::from_json(&content) {
                Ok(snapshot) => {
                    info!(
                        "Loaded snapshot of {} with {} rows from {}",
                        snapshot.date,
                        snapshot.rows.len(),
                        self.store.describe()
                    );
                    snapshot
                }
                Err(e) => {
                    warn!("Stored snapshot is malformed, starting empty: {}", e);
                    Snapshot::empty(today)
                }
            },
            Ok(None) => {
                info!("No stored snapshot in {}, starting empty", self.store.describe());
                Snapshot::empty(today)
            }
            Err(e) => {
                warn!("Failed to read snapshot, starting empty: {}", e);
                Snapshot::empty(today)
            }
        }
    }

    /// Persist the snapshot. Errors propagate.
    pub async fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let blob = snapshot.to_json()?;
        self.store.write(&self.key, &blob).await?;
        debug!(
            "Saved snapshot of {} ({} rows, {} bytes)",
            snapshot.date,
            snapshot.rows.len(),
            blob.len()
        );
        Ok(())
    }
}

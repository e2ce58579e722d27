//! Persistence layer.
//!
//! The engine pushes an `EngineSnapshot` to a `SnapshotSink` after every
//! successful mutation. `JsonFileStore` is the file-backed sink: it saves
//! the snapshot as pretty JSON and can load it back.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::provider::ProviderSummary;
use crate::strategy::StrategyKind;
use crate::types::Receipt;

/// Default snapshot file path.
pub const DEFAULT_STATE_FILE: &str = "hashrent_state.json";

/// Plain-data view of the engine. Carries no credentials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub taken_at: DateTime<Utc>,
    pub providers: Vec<ProviderSummary>,
    pub strategies: Vec<StrategyKind>,
    pub receipts: Vec<Receipt>,
}

impl EngineSnapshot {
    pub fn pool_count(&self) -> usize {
        self.providers.iter().map(|p| p.pools.len()).sum()
    }
}

/// Receives snapshots from the engine.
pub trait SnapshotSink: Send + Sync {
    fn persist(&self, snapshot: &EngineSnapshot) -> Result<()>;
}

/// Snapshot store backed by a JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl Default for JsonFileStore {
    fn default() -> Self {
        Self::new(DEFAULT_STATE_FILE)
    }
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, snapshot: &EngineSnapshot) -> Result<()> {
        let json = serde_json::to_string_pretty(snapshot)
            .context("Failed to serialise engine snapshot")?;

        std::fs::write(&self.path, &json)
            .with_context(|| format!("Failed to write snapshot to {}", self.path.display()))?;

        debug!(
            path = %self.path.display(),
            providers = snapshot.providers.len(),
            receipts = snapshot.receipts.len(),
            "Snapshot saved"
        );
        Ok(())
    }

    /// Load the last snapshot. Returns None if the file doesn't exist.
    pub fn load(&self) -> Result<Option<EngineSnapshot>> {
        if !self.path.exists() {
            info!(path = %self.path.display(), "No saved snapshot found");
            return Ok(None);
        }

        let json = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read snapshot from {}", self.path.display()))?;

        let snapshot: EngineSnapshot = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse snapshot from {}", self.path.display()))?;

        info!(
            path = %self.path.display(),
            providers = snapshot.providers.len(),
            pools = snapshot.pool_count(),
            receipts = snapshot.receipts.len(),
            "Snapshot loaded from disk"
        );
        Ok(Some(snapshot))
    }

    pub fn delete(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)
                .with_context(|| format!("Failed to delete snapshot file {}", self.path.display()))?;
        }
        Ok(())
    }
}

impl SnapshotSink for JsonFileStore {
    fn persist(&self, snapshot: &EngineSnapshot) -> Result<()> {
        self.save(snapshot)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

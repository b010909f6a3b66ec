//! Circuit state storage.
//!
//! # Responsibilities
//! - Hold `CircuitData` per circuit name
//! - Let deployments plug in a shared backing store
//! - Snapshot the in-memory store to disk and back
//!
//! # Design Decisions
//! - The breaker does `get` then `set` with no lock in between. Concurrent
//!   calls on one circuit can lose counter updates; thresholds are
//!   heuristics, not exact counts. A store that needs exact counting must
//!   provide its own atomicity.
//! - The default store lives as long as the process

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted state of one circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CircuitData {
    pub state: CircuitState,
    pub failures: u32,
    pub successes: u32,
    /// Milliseconds since the Unix epoch.
    pub last_failure_at: u64,
}

/// Errors raised by a circuit store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("circuit store unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Key-value storage for circuit state, keyed by circuit name.
#[async_trait]
pub trait CircuitStore: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<CircuitData>, StoreError>;
    async fn set(&self, name: &str, data: CircuitData) -> Result<(), StoreError>;
}

/// Process-local store backed by a `DashMap`.
#[derive(Clone, Default)]
pub struct InMemoryCircuitStore {
    inner: Arc<DashMap<String, CircuitData>>,
    persistence_path: Option<PathBuf>,
}

impl InMemoryCircuitStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that `save_to_file` writes to `path`.
    pub fn with_persistence(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
            persistence_path: Some(path.into()),
        }
    }

    /// Load a snapshot if the file exists; later saves go to the same file.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let store = Self::with_persistence(path);
        if path.exists() {
            let reader = BufReader::new(File::open(path)?);
            let map: HashMap<String, CircuitData> = serde_json::from_reader(reader)?;
            for (name, data) in map {
                store.inner.insert(name, data);
            }
            tracing::info!(circuits = store.inner.len(), path = ?path, "Loaded circuit snapshot");
        }
        Ok(store)
    }

    /// Write a snapshot. No-op without a persistence path.
    pub fn save_to_file(&self) -> Result<(), StoreError> {
        if let Some(path) = &self.persistence_path {
            let writer = BufWriter::new(File::create(path)?);
            let map: HashMap<String, CircuitData> = self
                .inner
                .iter()
                .map(|r| (r.key().clone(), *r.value()))
                .collect();
            serde_json::to_writer(writer, &map)?;
            tracing::info!(circuits = map.len(), path = ?path, "Saved circuit snapshot");
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Names of every circuit seen so far, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }
}

#[async_trait]
impl CircuitStore for InMemoryCircuitStore {
    async fn get(&self, name: &str) -> Result<Option<CircuitData>, StoreError> {
        Ok(self.inner.get(name).map(|r| *r.value()))
    }

    async fn set(&self, name: &str, data: CircuitData) -> Result<(), StoreError> {
        self.inner.insert(name.to_string(), data);
        Ok(())
    }
}

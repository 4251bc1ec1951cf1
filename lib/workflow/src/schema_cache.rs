//! Cross-request cache of inferred output schemas.
//!
//! Entries are keyed by `(workflow, node)` and carry a fingerprint of
//! everything the schema depends on. A lookup with a different fingerprint
//! is a miss, so stale entries never leak out even before
//! [`SchemaCache::invalidate_workflow`] runs.

use conduit_core::{DataSchema, NodeId, WorkflowId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Settings for [`SchemaCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaCacheConfig {
    /// How long an entry stays valid.
    #[serde(with = "seconds", rename = "ttl_seconds")]
    pub ttl: Duration,
    /// Upper bound on cached entries; the oldest entry is evicted first.
    pub max_entries: usize,
}

impl Default for SchemaCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            max_entries: 1000,
        }
    }
}

mod seconds {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// Counters describing cache effectiveness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub evictions: u64,
    pub entries: usize,
}

#[derive(Debug)]
struct Entry {
    fingerprint: u64,
    schema: DataSchema,
    inserted_at: Instant,
}

/// Thread-safe schema cache shared by all inference passes.
#[derive(Debug)]
pub struct SchemaCache {
    config: SchemaCacheConfig,
    entries: Mutex<HashMap<(WorkflowId, NodeId), Entry>>,
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    evictions: AtomicU64,
}

impl Default for SchemaCache {
    fn default() -> Self {
        Self::new(SchemaCacheConfig::default())
    }
}

impl SchemaCache {
    #[must_use]
    pub fn new(config: SchemaCacheConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(WorkflowId, NodeId), Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the cached schema if it is fresh and was computed from the
    /// same inputs.
    pub fn get(&self, workflow_id: WorkflowId, node_id: &NodeId, fingerprint: u64) -> Option<DataSchema> {
        let mut entries = self.lock();
        let key = (workflow_id, node_id.clone());

        let expired = entries
            .get(&key)
            .is_some_and(|entry| entry.inserted_at.elapsed() >= self.config.ttl);
        if expired {
            entries.remove(&key);
        }

        let found = entries
            .get(&key)
            .filter(|entry| entry.fingerprint == fingerprint)
            .map(|entry| entry.schema.clone());

        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Stores a schema, evicting the oldest entry when full.
    pub fn set(&self, workflow_id: WorkflowId, node_id: &NodeId, fingerprint: u64, schema: DataSchema) {
        if self.config.max_entries == 0 {
            return;
        }
        let mut entries = self.lock();
        let key = (workflow_id, node_id.clone());

        if !entries.contains_key(&key) && entries.len() >= self.config.max_entries {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.inserted_at)
                .map(|(key, _)| key.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }

        entries.insert(
            key,
            Entry {
                fingerprint,
                schema,
                inserted_at: Instant::now(),
            },
        );
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    /// Drops every entry belonging to a workflow.
    pub fn invalidate_workflow(&self, workflow_id: WorkflowId) {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|(wf, _), _| *wf != workflow_id);
        tracing::debug!(
            workflow_id = %workflow_id,
            removed = before - entries.len(),
            "Invalidated cached schemas"
        );
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.lock().clear();
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.lock().len(),
        }
    }
}

//! Declarative store for Autoscaler objects
//!
//! The reconcile core only ever reads an object and writes back its status.
//! [`InMemoryStore`] backs the controller binary (seeded from a manifest)
//! and the tests.

use crate::error::{Error, Result};
use crate::models::{Autoscaler, ObjectRef};
use async_trait::async_trait;
use dashmap::DashMap;
use std::path::Path;
use tracing::{debug, info};

#[async_trait]
pub trait AutoscalerStore: Send + Sync {
    /// Fetch an Autoscaler; [`Error::NotFound`] if it does not exist
    async fn get(&self, key: &ObjectRef) -> Result<Autoscaler>;

    /// Replace the status sub-resource of an existing Autoscaler
    async fn update_status(&self, autoscaler: &Autoscaler) -> Result<()>;

    /// Identities of every Autoscaler currently stored
    async fn list(&self) -> Result<Vec<ObjectRef>>;
}

/// Concurrent in-memory store
#[derive(Default)]
pub struct InMemoryStore {
    objects: DashMap<ObjectRef, Autoscaler>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON array of Autoscaler objects
    pub fn from_manifest(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Store(format!("failed to read manifest {}: {}", path.display(), e))
        })?;
        let autoscalers: Vec<Autoscaler> = serde_json::from_str(&content)?;

        let store = Self::new();
        for autoscaler in autoscalers {
            store.insert(autoscaler);
        }
        info!(path = %path.display(), autoscalers = store.len(), "Loaded autoscaler manifest");
        Ok(store)
    }

    /// Insert or replace an Autoscaler, spec and status included
    pub fn insert(&self, autoscaler: Autoscaler) {
        debug!(autoscaler = %autoscaler.metadata, "Storing autoscaler");
        self.objects.insert(autoscaler.metadata.clone(), autoscaler);
    }

    pub fn remove(&self, key: &ObjectRef) -> Option<Autoscaler> {
        self.objects.remove(key).map(|(_, v)| v)
    }

    /// Snapshot of every stored object, sorted by identity
    pub fn snapshot(&self) -> Vec<Autoscaler> {
        let mut all: Vec<Autoscaler> = self.objects.iter().map(|r| r.value().clone()).collect();
        all.sort_by(|a, b| a.metadata.cmp(&b.metadata));
        all
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl AutoscalerStore for InMemoryStore {
    async fn get(&self, key: &ObjectRef) -> Result<Autoscaler> {
        self.objects
            .get(key)
            .map(|r| r.value().clone())
            .ok_or_else(|| Error::NotFound(key.clone()))
    }

    async fn update_status(&self, autoscaler: &Autoscaler) -> Result<()> {
        let mut entry = self
            .objects
            .get_mut(&autoscaler.metadata)
            .ok_or_else(|| Error::NotFound(autoscaler.metadata.clone()))?;
        entry.status = autoscaler.status.clone();
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ObjectRef>> {
        let mut keys: Vec<ObjectRef> = self.objects.iter().map(|r| r.key().clone()).collect();
        keys.sort();
        Ok(keys)
    }
}

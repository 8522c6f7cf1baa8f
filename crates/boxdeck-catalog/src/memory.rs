use crate::{CatalogSource, SourceError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

/// In-memory catalog keyed by entry name.
///
/// Entries are stored raw so callers can seed deliberately malformed manifests.
/// A source can be flipped offline to simulate an unreachable catalog.
pub struct MemorySource {
    name: String,
    entries: Mutex<BTreeMap<String, Value>>,
    offline: AtomicBool,
}

impl MemorySource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Mutex::new(BTreeMap::new()),
            offline: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn with_entry(self, name: &str, entry: Value) -> Self {
        self.insert(name, entry);
        self
    }

    pub fn insert(&self, name: &str, entry: Value) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_owned(), entry);
    }

    pub fn remove(&self, name: &str) -> Option<Value> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), SourceError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(SourceError::Unavailable(format!(
                "catalog '{}' is offline",
                self.name
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, name: &str) -> Result<Option<Value>, SourceError> {
        self.check_online()?;
        Ok(self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned())
    }

    async fn list(&self) -> Result<Vec<Value>, SourceError> {
        self.check_online()?;
        Ok(self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect())
    }
}

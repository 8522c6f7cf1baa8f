use crate::{CatalogError, CatalogSource, SourceError};
use boxdeck_schema::{parse_manifest_value, ComponentKind, ManifestError, ManifestRecord};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Resolves manifests by querying catalog sources in priority order.
///
/// The first source that returns a schema-valid entry wins; definitions from
/// different sources are never merged. Nothing is retried here: a transient
/// outage surfaces as [`CatalogError::SourceUnavailable`] and the caller
/// decides whether to try again.
pub struct CatalogResolver {
    sources: Vec<Arc<dyn CatalogSource>>,
    cache_ttl: Option<Duration>,
    cache: Mutex<HashMap<String, (Instant, ManifestRecord)>>,
}

impl CatalogResolver {
    pub fn new(sources: Vec<Arc<dyn CatalogSource>>) -> Self {
        Self {
            sources,
            cache_ttl: None,
            cache: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    /// Resolve a single manifest by component name.
    ///
    /// When sources disagree the outcome is ranked: a valid hit, then
    /// `Invalid` (some source had an entry but none normalized), then
    /// `SourceUnavailable` (every source unreachable), then `NotFound`.
    pub async fn resolve(&self, name: &str) -> Result<ManifestRecord, CatalogError> {
        if let Some(record) = self.cached(name) {
            debug!("manifest cache hit for '{name}'");
            return Ok(record);
        }

        let mut invalid = Vec::new();
        let mut unavailable = Vec::new();

        for source in &self.sources {
            let entry = match source.fetch(name).await {
                Ok(Some(entry)) => entry,
                Ok(None) => {
                    debug!("catalog '{}' has no entry for '{name}'", source.name());
                    continue;
                }
                Err(SourceError::Unavailable(reason)) => {
                    warn!("catalog '{}' unavailable: {reason}", source.name());
                    unavailable.push(format!("{}: {reason}", source.name()));
                    continue;
                }
                Err(SourceError::Malformed(reason)) => {
                    warn!("catalog '{}' returned a malformed entry for '{name}': {reason}", source.name());
                    invalid.push(format!("{}: {reason}", source.name()));
                    continue;
                }
            };

            match normalize_entry(entry) {
                Ok(record) if record.name == name => {
                    let record = record.with_source(source.name());
                    self.store(name, &record);
                    return Ok(record);
                }
                Ok(record) => {
                    warn!(
                        "catalog '{}' answered '{name}' with a manifest named '{}'",
                        source.name(),
                        record.name
                    );
                    invalid.push(format!(
                        "{}: entry declares name '{}'",
                        source.name(),
                        record.name
                    ));
                }
                Err(e) => {
                    warn!("catalog '{}' has an invalid manifest for '{name}': {e}", source.name());
                    invalid.push(format!("{}: {e}", source.name()));
                }
            }
        }

        if !invalid.is_empty() {
            return Err(CatalogError::Invalid {
                name: name.to_owned(),
                reason: invalid.join("; "),
            });
        }
        if !self.sources.is_empty() && unavailable.len() == self.sources.len() {
            return Err(CatalogError::SourceUnavailable(unavailable.join("; ")));
        }
        Err(CatalogError::NotFound(name.to_owned()))
    }

    /// Enumerate every valid manifest across all sources, optionally filtered by kind.
    ///
    /// Malformed entries and unreachable sources are skipped and logged; the
    /// call only fails when no source could be reached at all. A name offered
    /// by several sources resolves to the highest-priority valid entry.
    pub async fn list(
        &self,
        kind: Option<ComponentKind>,
    ) -> Result<Vec<ManifestRecord>, CatalogError> {
        let mut records: BTreeMap<String, ManifestRecord> = BTreeMap::new();
        let mut unavailable = Vec::new();

        for source in &self.sources {
            let entries = match source.list().await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("skipping catalog '{}' in listing: {e}", source.name());
                    unavailable.push(format!("{}: {e}", source.name()));
                    continue;
                }
            };

            for entry in entries {
                match normalize_entry(entry) {
                    Ok(record) => {
                        records
                            .entry(record.name.to_string())
                            .or_insert_with(|| record.with_source(source.name()));
                    }
                    Err(e) => {
                        warn!("skipping malformed manifest from '{}': {e}", source.name());
                    }
                }
            }
        }

        if !self.sources.is_empty() && unavailable.len() == self.sources.len() {
            return Err(CatalogError::SourceUnavailable(unavailable.join("; ")));
        }

        Ok(records
            .into_values()
            .filter(|r| kind.map_or(true, |k| r.kind == k))
            .collect())
    }

    fn cached(&self, name: &str) -> Option<ManifestRecord> {
        let ttl = self.cache_ttl?;
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        match cache.get(name) {
            Some((at, record)) if at.elapsed() < ttl => Some(record.clone()),
            Some(_) => {
                cache.remove(name);
                None
            }
            None => None,
        }
    }

    fn store(&self, name: &str, record: &ManifestRecord) {
        if self.cache_ttl.is_none() {
            return;
        }
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_owned(), (Instant::now(), record.clone()));
    }
}

fn normalize_entry(entry: Value) -> Result<ManifestRecord, ManifestError> {
    parse_manifest_value(entry)?.normalize()
}

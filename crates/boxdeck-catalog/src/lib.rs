//! Manifest catalog sources and the priority-ordered resolver for boxdeck.
//!
//! A catalog source is any request/reply endpoint that hands out raw manifest
//! entries by name or as a listing: an in-memory table, a directory of JSON
//! files, or a remote HTTP catalog. The [`CatalogResolver`] queries sources in
//! their configured priority order and normalizes whatever they return into a
//! [`boxdeck_schema::ManifestRecord`].

pub mod config;
pub mod directory;
pub mod http;
pub mod memory;
pub mod resolver;

pub use config::{CatalogConfig, SourceConfig};
pub use directory::DirectorySource;
pub use http::HttpSource;
pub use memory::MemorySource;
pub use resolver::CatalogResolver;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("manifest not found: {0}")]
    NotFound(String),
    #[error("invalid manifest '{name}': {reason}")]
    Invalid { name: String, reason: String },
    #[error("all catalog sources unavailable: {0}")]
    SourceUnavailable(String),
}

#[derive(Debug, Error)]
pub enum SourceError {
    /// Transient: the source could not be reached or refused to answer.
    #[error("source unavailable: {0}")]
    Unavailable(String),
    /// The source answered, but the entry is not a JSON document.
    #[error("malformed catalog entry: {0}")]
    Malformed(String),
}

/// Trait for catalog backends.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Stable name used in logs and stamped on resolved records.
    fn name(&self) -> &str;

    /// Fetch the raw entry for `name`. `Ok(None)` means the source has no such entry.
    async fn fetch(&self, name: &str) -> Result<Option<Value>, SourceError>;

    /// Enumerate every raw entry the source currently offers.
    async fn list(&self) -> Result<Vec<Value>, SourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_name_the_component() {
        let err = CatalogError::Invalid {
            name: "weather-app".to_owned(),
            reason: "image must not be empty".to_owned(),
        };
        assert_eq!(
            err.to_string(),
            "invalid manifest 'weather-app': image must not be empty"
        );
        assert_eq!(
            CatalogError::NotFound("weather-app".to_owned()).to_string(),
            "manifest not found: weather-app"
        );
    }
}

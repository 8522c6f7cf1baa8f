use crate::{CatalogResolver, CatalogSource, DirectorySource, HttpSource};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// `[catalog]` section: sources in priority order plus an optional resolve cache.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CatalogConfig {
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    /// Cache resolved manifests for this many seconds. Absent or zero disables caching.
    #[serde(default)]
    pub cache_ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    Directory {
        #[serde(default)]
        name: Option<String>,
        path: PathBuf,
    },
    Http {
        #[serde(default)]
        name: Option<String>,
        url: String,
        #[serde(default)]
        auth_token: Option<String>,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
}

fn default_timeout_secs() -> u64 {
    10
}

impl SourceConfig {
    pub fn build(&self) -> Arc<dyn CatalogSource> {
        match self {
            SourceConfig::Directory { name, path } => {
                let name = name.clone().unwrap_or_else(|| path.display().to_string());
                Arc::new(DirectorySource::new(name, path.clone()))
            }
            SourceConfig::Http {
                name,
                url,
                auth_token,
                timeout_secs,
            } => {
                let name = name.clone().unwrap_or_else(|| url.clone());
                let source = HttpSource::new(name, url, Duration::from_secs(*timeout_secs));
                match auth_token {
                    Some(token) => Arc::new(source.with_token(token)),
                    None => Arc::new(source),
                }
            }
        }
    }
}

impl CatalogConfig {
    pub fn build_resolver(&self) -> CatalogResolver {
        let sources = self.sources.iter().map(SourceConfig::build).collect();
        let resolver = CatalogResolver::new(sources);
        match self.cache_ttl_secs {
            Some(secs) if secs > 0 => resolver.with_cache_ttl(Duration::from_secs(secs)),
            _ => resolver,
        }
    }
}

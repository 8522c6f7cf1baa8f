use crate::{CatalogSource, SourceError};
use async_trait::async_trait;
use serde_json::Value;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Local manifest store: one `<name>.json` document per component.
pub struct DirectorySource {
    name: String,
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, name: &str) -> Option<PathBuf> {
        // Component names are single path segments.
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return None;
        }
        Some(self.root.join(format!("{name}.json")))
    }

    fn unavailable(&self, e: &std::io::Error) -> SourceError {
        SourceError::Unavailable(format!("{}: {e}", self.root.display()))
    }
}

#[async_trait]
impl CatalogSource for DirectorySource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, name: &str) -> Result<Option<Value>, SourceError> {
        if !tokio::fs::try_exists(&self.root).await.unwrap_or(false) {
            return Err(SourceError::Unavailable(format!(
                "manifest directory {} does not exist",
                self.root.display()
            )));
        }
        let Some(path) = self.entry_path(name) else {
            debug!("rejecting non-path-safe manifest name '{name}'");
            return Ok(None);
        };

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.unavailable(&e)),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| SourceError::Malformed(format!("{}: {e}", path.display())))
    }

    async fn list(&self) -> Result<Vec<Value>, SourceError> {
        let mut dir = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| self.unavailable(&e))?;

        let mut paths = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(|e| self.unavailable(&e))? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut out = Vec::with_capacity(paths.len());
        for path in paths {
            let parsed = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| e.to_string())
                .and_then(|c| serde_json::from_str::<Value>(&c).map_err(|e| e.to_string()));
            match parsed {
                Ok(value) => out.push(value),
                Err(e) => warn!("skipping unreadable manifest {}: {e}", path.display()),
            }
        }
        Ok(out)
    }
}

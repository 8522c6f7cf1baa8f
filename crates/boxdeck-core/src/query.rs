use crate::{CoreError, OperationLog, OrchestrationOperation};
use boxdeck_catalog::CatalogResolver;
use boxdeck_schema::{ComponentKind, ComponentStatus, DataSourceDescriptor, ManifestRecord};
use boxdeck_status::StatusAggregator;
use serde::Serialize;
use std::sync::Arc;

/// A catalog manifest joined with the live status of the component it describes.
#[derive(Debug, Clone, Serialize)]
pub struct AppStoreEntry {
    pub manifest: ManifestRecord,
    pub status: ComponentStatus,
}

/// Read-only views over the catalog, the status map and the operation log.
///
/// Nothing here retries or mutates; every call reads fresh state.
#[derive(Clone)]
pub struct QueryFacade {
    resolver: Arc<CatalogResolver>,
    status: StatusAggregator,
    operations: OperationLog,
}

impl QueryFacade {
    pub fn new(
        resolver: Arc<CatalogResolver>,
        status: StatusAggregator,
        operations: OperationLog,
    ) -> Self {
        Self {
            resolver,
            status,
            operations,
        }
    }

    pub async fn app_store(
        &self,
        kind: Option<ComponentKind>,
    ) -> Result<Vec<AppStoreEntry>, CoreError> {
        let manifests = self.resolver.list(kind).await?;
        let snapshot = self.status.snapshot();
        Ok(manifests
            .into_iter()
            .map(|manifest| {
                let status = snapshot.get(&manifest.name);
                AppStoreEntry { manifest, status }
            })
            .collect())
    }

    pub async fn drivers(&self) -> Result<Vec<AppStoreEntry>, CoreError> {
        self.app_store(Some(ComponentKind::Driver)).await
    }

    pub fn data_sources(&self) -> Vec<DataSourceDescriptor> {
        self.status.data_sources()
    }

    /// Every observed component, sorted by name.
    pub fn container_status(&self) -> Vec<ComponentStatus> {
        self.status.snapshot().into_statuses()
    }

    pub async fn manifest(&self, name: &str) -> Result<ManifestRecord, CoreError> {
        Ok(self.resolver.resolve(name).await?)
    }

    pub fn operations(&self) -> Vec<OrchestrationOperation> {
        self.operations.list()
    }
}

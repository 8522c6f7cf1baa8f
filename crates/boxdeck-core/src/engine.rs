use crate::{
    Config, ContainerManager, ContainerManagerConfig, CoreError, HttpContainerManager,
    MockContainerManager, Orchestrator, QueryFacade,
};
use boxdeck_catalog::CatalogResolver;
use boxdeck_schema::{ComponentKind, ComponentStatus, ManifestRecord};
use boxdeck_status::{FeedEvent, Snapshot, StatusAggregator};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

/// Capacity of each feed channel.
const FEED_BUFFER: usize = 256;

/// The assembled management plane: resolver, status aggregator, orchestrator
/// and query façade sharing one configuration.
///
/// Must be created inside a tokio runtime; construction spawns the liveness
/// sweeper and the `http` feed task.
pub struct Engine {
    resolver: Arc<CatalogResolver>,
    status: StatusAggregator,
    orchestrator: Orchestrator,
    query: QueryFacade,
    http_feed: mpsc::Sender<FeedEvent>,
    tasks: Vec<JoinHandle<()>>,
}

impl Engine {
    /// Build an engine around an already constructed container manager.
    pub fn new(config: &Config, manager: Arc<dyn ContainerManager>) -> Self {
        let resolver = Arc::new(config.catalog.build_resolver());
        info!(
            "catalog sources: {}",
            resolver.source_names().join(", ")
        );

        let status = StatusAggregator::new(config.status.liveness_window());
        let orchestrator = Orchestrator::new(
            Arc::clone(&resolver),
            manager,
            status.clone(),
            &config.orchestrator,
        );
        let query = QueryFacade::new(
            Arc::clone(&resolver),
            status.clone(),
            orchestrator.operations().clone(),
        );

        let (http_feed, http_rx) = mpsc::channel(FEED_BUFFER);
        let tasks = vec![
            status.spawn_liveness_sweeper(config.status.sweep_interval()),
            status.spawn_feed("http", http_rx),
        ];

        Self {
            resolver,
            status,
            orchestrator,
            query,
            http_feed,
            tasks,
        }
    }

    /// Build an engine with the container manager named in `[container_manager]`.
    pub fn from_config(config: &Config) -> Self {
        match &config.container_manager {
            ContainerManagerConfig::Mock { phase_delay_ms } => {
                let (tx, rx) = mpsc::channel(FEED_BUFFER);
                let manager = MockContainerManager::new(tx)
                    .with_phase_delay(Duration::from_millis(*phase_delay_ms));
                info!("using simulated container manager");
                let mut engine = Self::new(config, Arc::new(manager));
                let feed = engine.subscribe_feed("container-manager", rx);
                engine.tasks.push(feed);
                engine
            }
            ContainerManagerConfig::Http { url, auth_token } => {
                let manager =
                    HttpContainerManager::new(url, config.orchestrator.request_timeout());
                let manager = match auth_token {
                    Some(token) => manager.with_token(token),
                    None => manager,
                };
                info!("using container manager at {url}");
                Self::new(config, Arc::new(manager))
            }
        }
    }

    /// Attach another status feed. Its task ends when every sender is dropped.
    pub fn subscribe_feed(&self, name: &str, events: mpsc::Receiver<FeedEvent>) -> JoinHandle<()> {
        self.status.spawn_feed(name, events)
    }

    /// Sender side of the built-in `http` feed.
    pub fn http_feed(&self) -> mpsc::Sender<FeedEvent> {
        self.http_feed.clone()
    }

    pub fn status(&self) -> &StatusAggregator {
        &self.status
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn query(&self) -> &QueryFacade {
        &self.query
    }

    pub async fn resolve_manifest(&self, name: &str) -> Result<ManifestRecord, CoreError> {
        Ok(self.resolver.resolve(name).await?)
    }

    pub async fn list_manifests(
        &self,
        kind: Option<ComponentKind>,
    ) -> Result<Vec<ManifestRecord>, CoreError> {
        Ok(self.resolver.list(kind).await?)
    }

    pub fn snapshot_status(&self) -> Snapshot {
        self.status.snapshot()
    }

    pub async fn install(&self, name: &str) -> Result<ComponentStatus, CoreError> {
        self.orchestrator.install(name).await
    }

    pub async fn uninstall(&self, name: &str) -> Result<ComponentStatus, CoreError> {
        self.orchestrator.uninstall(name).await
    }

    pub async fn restart(&self, name: &str) -> Result<ComponentStatus, CoreError> {
        self.orchestrator.restart(name).await
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

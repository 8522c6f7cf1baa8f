use crate::{
    ContainerManager, CoreError, ManagerError, OperationGuard, OperationKind, OperationLocks,
    OperationLog, OperationStep, OperationTracker, OrchestratorConfig, RestartPhase,
};
use boxdeck_catalog::{CatalogError, CatalogResolver};
use boxdeck_schema::{ComponentState, ComponentStatus, HealthSignal, ManifestRecord};
use boxdeck_status::StatusAggregator;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Drives install, uninstall and restart.
///
/// Every operation follows the same shape: read the desired spec from the
/// catalog, submit a request to the container manager, then wait on the
/// status aggregator until the feeds confirm the component converged. A
/// request being accepted is never taken as success on its own.
pub struct Orchestrator {
    resolver: Arc<CatalogResolver>,
    manager: Arc<dyn ContainerManager>,
    status: StatusAggregator,
    locks: OperationLocks,
    operations: OperationLog,
    request_timeout: Duration,
    install_timeout: Duration,
    uninstall_timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        resolver: Arc<CatalogResolver>,
        manager: Arc<dyn ContainerManager>,
        status: StatusAggregator,
        config: &OrchestratorConfig,
    ) -> Self {
        Self {
            resolver,
            manager,
            status,
            locks: OperationLocks::new(),
            operations: OperationLog::new(config.archive_len),
            request_timeout: config.request_timeout(),
            install_timeout: config.install_timeout(),
            uninstall_timeout: config.uninstall_timeout(),
        }
    }

    pub fn locks(&self) -> &OperationLocks {
        &self.locks
    }

    pub fn operations(&self) -> &OperationLog {
        &self.operations
    }

    fn acquire(&self, name: &str) -> Result<Arc<OperationGuard>, CoreError> {
        self.locks.try_acquire(name).map(Arc::new).ok_or_else(|| {
            debug!("'{name}' is busy");
            CoreError::Busy(name.to_owned())
        })
    }

    /// Install `name` and wait until it is `running`.
    ///
    /// A component that is already running (or degraded) is left alone and
    /// reported as installed.
    pub async fn install(&self, name: &str) -> Result<ComponentStatus, CoreError> {
        let guard = self.acquire(name)?;
        let tracker = self.operations.begin(OperationKind::Install, name);
        info!("installing '{name}' (operation {})", tracker.id());

        let result = self.run_install(&guard, &tracker, name, None).await;
        log_result(OperationKind::Install, name, &result);
        tracker.finish(&result);
        result
    }

    /// Uninstall `name` and wait until it is `stopped`.
    pub async fn uninstall(&self, name: &str) -> Result<ComponentStatus, CoreError> {
        let guard = self.acquire(name)?;
        let tracker = self.operations.begin(OperationKind::Uninstall, name);
        info!("uninstalling '{name}' (operation {})", tracker.id());

        let result = self.run_uninstall(&guard, &tracker, name).await;
        log_result(OperationKind::Uninstall, name, &result);
        tracker.finish(&result);
        result
    }

    /// Uninstall then reinstall `name` from the manifest revision current at
    /// the start of the restart.
    ///
    /// If the uninstall half does not converge the install half is not
    /// attempted. Either failure is reported as
    /// [`CoreError::RestartIncomplete`] naming the phase.
    pub async fn restart(&self, name: &str) -> Result<ComponentStatus, CoreError> {
        let guard = self.acquire(name)?;
        let tracker = self.operations.begin(OperationKind::Restart, name);
        info!("restarting '{name}' (operation {})", tracker.id());

        let result = self.run_restart(&guard, &tracker, name).await;
        log_result(OperationKind::Restart, name, &result);
        tracker.finish(&result);
        result
    }

    async fn run_restart(
        &self,
        guard: &Arc<OperationGuard>,
        tracker: &OperationTracker,
        name: &str,
    ) -> Result<ComponentStatus, CoreError> {
        if !self.status.is_known(name) {
            return Err(CoreError::NotFound(name.to_owned()));
        }

        tracker.step(OperationStep::Resolving);
        let pinned = match self.resolver.resolve(name).await {
            Ok(record) => record,
            Err(CatalogError::NotFound(_) | CatalogError::Invalid { .. }) => {
                info!("no resolvable manifest for '{name}', leaving it as is");
                return Ok(self.status.status(name));
            }
            Err(e) => return Err(e.into()),
        };
        debug!("pinned '{name}' at revision {}", pinned.revision);

        self.run_uninstall(guard, tracker, name)
            .await
            .map_err(|e| incomplete(name, RestartPhase::Uninstall, e))?;

        self.run_install(guard, tracker, name, Some(pinned))
            .await
            .map_err(|e| incomplete(name, RestartPhase::Install, e))
    }

    async fn run_install(
        &self,
        guard: &Arc<OperationGuard>,
        tracker: &OperationTracker,
        name: &str,
        pinned: Option<ManifestRecord>,
    ) -> Result<ComponentStatus, CoreError> {
        let current = self.status.status(name);
        if current.state.is_active() {
            info!("'{name}' is already {}, nothing to install", current.state);
            return Ok(current);
        }

        tracker.step(OperationStep::Resolving);
        let record = match pinned {
            Some(record) => record,
            None => self.resolver.resolve(name).await?,
        };

        let generation = self.status.status(name).generation;
        tracker.step(OperationStep::Submitting);
        let manager = Arc::clone(&self.manager);
        let owned = name.to_owned();
        self.submit(guard, OperationKind::Install, name, async move {
            manager.create(&owned, &record).await
        })
        .await?
        .map_err(|e| match e {
            ManagerError::Rejected(reason) => CoreError::InstallFailed {
                name: name.to_owned(),
                reason,
            },
            ManagerError::Unavailable(reason) => CoreError::SourceUnavailable(reason),
        })?;

        tracker.step(OperationStep::Converging);
        let status = self
            .status
            .wait_for_state_after(
                name,
                &[ComponentState::Running, ComponentState::Failed],
                generation,
                self.install_timeout,
            )
            .await;

        match status.state {
            ComponentState::Running if status.generation > generation => Ok(status),
            ComponentState::Failed if status.generation > generation => {
                tracker.step(OperationStep::CleaningUp);
                self.cleanup_failed_install(guard, name).await;
                Err(CoreError::InstallFailed {
                    name: name.to_owned(),
                    reason: failure_reason(&status),
                })
            }
            state => Err(CoreError::TimedOut {
                name: name.to_owned(),
                operation: OperationKind::Install,
                state,
            }),
        }
    }

    async fn run_uninstall(
        &self,
        guard: &Arc<OperationGuard>,
        tracker: &OperationTracker,
        name: &str,
    ) -> Result<ComponentStatus, CoreError> {
        let current = self.status.status(name);
        if !current.is_observed() {
            return Err(CoreError::NotFound(name.to_owned()));
        }
        if current.state == ComponentState::Stopped {
            info!("'{name}' is already stopped, nothing to uninstall");
            return Ok(current);
        }

        let generation = current.generation;
        tracker.step(OperationStep::Submitting);
        let manager = Arc::clone(&self.manager);
        let owned = name.to_owned();
        self.submit(guard, OperationKind::Uninstall, name, async move {
            manager.delete(&owned).await
        })
        .await?
        .map_err(|e| match e {
            ManagerError::Rejected(reason) => CoreError::UninstallFailed {
                name: name.to_owned(),
                reason,
            },
            ManagerError::Unavailable(reason) => CoreError::SourceUnavailable(reason),
        })?;

        tracker.step(OperationStep::Converging);
        let status = self
            .status
            .wait_for_state_after(
                name,
                &[ComponentState::Stopped, ComponentState::Failed],
                generation,
                self.uninstall_timeout,
            )
            .await;

        match status.state {
            ComponentState::Stopped => Ok(status),
            ComponentState::Failed if status.generation > generation => {
                Err(CoreError::UninstallFailed {
                    name: name.to_owned(),
                    reason: failure_reason(&status),
                })
            }
            state => Err(CoreError::TimedOut {
                name: name.to_owned(),
                operation: OperationKind::Uninstall,
                state,
            }),
        }
    }

    /// Best effort: a failed install should not leave a half-created container behind.
    async fn cleanup_failed_install(&self, guard: &Arc<OperationGuard>, name: &str) {
        let manager = Arc::clone(&self.manager);
        let owned = name.to_owned();
        let result = self
            .submit(guard, OperationKind::Uninstall, name, async move {
                manager.delete(&owned).await
            })
            .await;
        match result {
            Ok(Ok(())) => debug!("requested cleanup of failed install of '{name}'"),
            Ok(Err(e)) => warn!("cleanup of failed install of '{name}' refused: {e}"),
            Err(e) => warn!("cleanup of failed install of '{name}' did not complete: {e}"),
        }
    }

    /// Run one container manager request as a detached task, waiting at most
    /// the request timeout for its answer.
    ///
    /// The task holds its own clone of the operation guard and always runs the
    /// request to completion, so the component stays locked until the request
    /// has actually finished even if the caller stops waiting for it.
    async fn submit<F>(
        &self,
        guard: &Arc<OperationGuard>,
        operation: OperationKind,
        name: &str,
        request: F,
    ) -> Result<Result<(), ManagerError>, CoreError>
    where
        F: Future<Output = Result<(), ManagerError>> + Send + 'static,
    {
        let held = Arc::clone(guard);
        let owned = name.to_owned();
        let mut task = tokio::spawn(async move {
            let result = request.await;
            debug!("container manager request for '{owned}' completed");
            drop(held);
            result
        });

        let timeout = self.request_timeout;
        match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(result)) => Ok(result),
            Err(_) => {
                warn!(
                    "container manager did not answer {operation} of '{name}' within {}s",
                    timeout.as_secs()
                );
                Err(CoreError::TimedOut {
                    name: name.to_owned(),
                    operation,
                    state: self.status.status(name).state,
                })
            }
            Ok(Err(e)) if e.is_cancelled() => Err(CoreError::Cancelled {
                name: name.to_owned(),
                operation,
            }),
            Ok(Err(e)) => Err(CoreError::Internal(format!(
                "container manager request for '{name}' panicked: {e}"
            ))),
        }
    }
}

fn incomplete(name: &str, phase: RestartPhase, source: CoreError) -> CoreError {
    CoreError::RestartIncomplete {
        name: name.to_owned(),
        phase,
        source: Box::new(source),
    }
}

fn failure_reason(status: &ComponentStatus) -> String {
    match &status.health {
        Some(HealthSignal::Unhealthy { reason }) => reason.clone(),
        _ => format!("component reported {}", status.state),
    }
}

fn log_result(operation: OperationKind, name: &str, result: &Result<ComponentStatus, CoreError>) {
    match result {
        Ok(status) => info!("{operation} of '{name}' finished: {}", status.state),
        Err(e) => warn!("{operation} of '{name}' failed: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MockAction, MockContainerManager, MockOutcome};
    use boxdeck_catalog::{CatalogSource, MemorySource};
    use boxdeck_status::{ContainerPhase, FeedEvent};
    use chrono::Utc;
    use serde_json::json;
    use tokio::sync::mpsc;

    struct Fixture {
        orchestrator: Orchestrator,
        manager: Arc<MockContainerManager>,
        status: StatusAggregator,
        catalog: Arc<MemorySource>,
    }

    fn fixture() -> Fixture {
        let catalog = Arc::new(MemorySource::new("memory").with_entry(
            "weather-app",
            json!({
                "schema_version": 2,
                "name": "weather-app",
                "kind": "app",
                "version": "1.0.0",
                "image": "registry.local/weather-app:1.0.0"
            }),
        ));
        let resolver = Arc::new(CatalogResolver::new(vec![
            Arc::clone(&catalog) as Arc<dyn CatalogSource>
        ]));
        let status = StatusAggregator::new(Duration::from_secs(30));
        let (tx, rx) = mpsc::channel(64);
        status.spawn_feed("container-manager", rx);
        let manager = Arc::new(MockContainerManager::new(tx));
        let config = OrchestratorConfig {
            request_timeout_secs: 5,
            install_timeout_secs: 10,
            uninstall_timeout_secs: 10,
            archive_len: 10,
        };
        let orchestrator = Orchestrator::new(resolver, manager.clone(), status.clone(), &config);
        Fixture {
            orchestrator,
            manager,
            status,
            catalog,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn install_waits_for_running() {
        let f = fixture();
        let status = f.orchestrator.install("weather-app").await.unwrap();
        assert_eq!(status.state, ComponentState::Running);
        assert_eq!(f.manager.count(MockAction::Create, "weather-app"), 1);
        assert!(!f.orchestrator.locks().is_held("weather-app"));
    }

    #[tokio::test(start_paused = true)]
    async fn install_of_running_component_submits_nothing() {
        let f = fixture();
        f.orchestrator.install("weather-app").await.unwrap();
        let status = f.orchestrator.install("weather-app").await.unwrap();
        assert_eq!(status.state, ComponentState::Running);
        assert_eq!(f.manager.count(MockAction::Create, "weather-app"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_install_cleans_up() {
        let f = fixture();
        f.manager.script(
            "weather-app",
            MockAction::Create,
            MockOutcome::Fail("image pull failed".to_owned()),
        );

        let err = f.orchestrator.install("weather-app").await.unwrap_err();
        assert!(
            matches!(&err, CoreError::InstallFailed { reason, .. } if reason == "image pull failed")
        );
        assert_eq!(f.manager.count(MockAction::Delete, "weather-app"), 1);

        let status = f
            .status
            .wait_for_state("weather-app", &[ComponentState::Stopped], Duration::from_secs(5))
            .await;
        assert_eq!(status.state, ComponentState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_install_times_out_and_leaves_status() {
        let f = fixture();
        f.manager
            .script("weather-app", MockAction::Create, MockOutcome::Silent);

        let err = f.orchestrator.install("weather-app").await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::TimedOut {
                state: ComponentState::Installing,
                ..
            }
        ));
        assert_eq!(f.status.status("weather-app").state, ComponentState::Installing);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_create_is_install_failure() {
        let f = fixture();
        f.manager.script(
            "weather-app",
            MockAction::Create,
            MockOutcome::Reject("quota exceeded".to_owned()),
        );
        let err = f.orchestrator.install("weather-app").await.unwrap_err();
        assert!(matches!(err, CoreError::InstallFailed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn install_of_unknown_manifest_is_not_found() {
        let f = fixture();
        let err = f.orchestrator.install("nope").await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
        assert!(f.manager.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn uninstall_of_never_seen_component_is_not_found() {
        let f = fixture();
        let err = f.orchestrator.uninstall("weather-app").await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn uninstall_failure_is_reported() {
        let f = fixture();
        f.orchestrator.install("weather-app").await.unwrap();
        f.manager.script(
            "weather-app",
            MockAction::Delete,
            MockOutcome::Fail("volume busy".to_owned()),
        );
        let err = f.orchestrator.uninstall("weather-app").await.unwrap_err();
        assert!(matches!(err, CoreError::UninstallFailed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn restart_installs_pinned_revision_after_uninstall() {
        let f = fixture();
        f.orchestrator.install("weather-app").await.unwrap();

        let status = f.orchestrator.restart("weather-app").await.unwrap();
        assert_eq!(status.state, ComponentState::Running);
        assert_eq!(f.manager.count(MockAction::Delete, "weather-app"), 1);
        assert_eq!(f.manager.count(MockAction::Create, "weather-app"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_without_manifest_is_a_no_op() {
        let f = fixture();
        f.status.apply(FeedEvent::container(
            "weather-app",
            Utc::now(),
            ContainerPhase::Started,
        ));
        f.catalog.remove("weather-app");

        let status = f.orchestrator.restart("weather-app").await.unwrap();
        assert_eq!(status.state, ComponentState::Running);
        assert!(f.manager.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn restart_with_failed_install_phase_is_partial() {
        let f = fixture();
        f.orchestrator.install("weather-app").await.unwrap();
        f.manager.script(
            "weather-app",
            MockAction::Create,
            MockOutcome::Fail("crash loop".to_owned()),
        );

        let err = f.orchestrator.restart("weather-app").await.unwrap_err();
        let (phase, inner) = err.phase_error().unwrap();
        assert_eq!(phase, RestartPhase::Install);
        assert!(matches!(inner, CoreError::InstallFailed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_request_keeps_lock_after_caller_gives_up() {
        let (tx, rx) = mpsc::channel(64);
        let f = fixture();
        f.status.spawn_feed("slow", rx);
        let slow = Arc::new(MockContainerManager::new(tx).with_latency(Duration::from_secs(3)));
        let resolver = Arc::new(CatalogResolver::new(vec![
            Arc::clone(&f.catalog) as Arc<dyn CatalogSource>
        ]));
        let orchestrator =
            Orchestrator::new(resolver, slow.clone(), f.status.clone(), &OrchestratorConfig::default());

        let abandoned =
            tokio::time::timeout(Duration::from_secs(1), orchestrator.install("weather-app")).await;
        assert!(abandoned.is_err());
        assert!(orchestrator.locks().is_held("weather-app"));
        assert!(matches!(
            orchestrator.restart("weather-app").await,
            Err(CoreError::Busy(_))
        ));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!orchestrator.locks().is_held("weather-app"));
        assert_eq!(slow.count(MockAction::Create, "weather-app"), 1);

        let ops = orchestrator.operations().list();
        assert!(ops.iter().any(|op| matches!(
            op.outcome,
            Some(crate::OperationOutcome::Failed {
                kind: crate::ErrorKind::Cancelled,
                ..
            })
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn request_timeout_keeps_lock_until_request_completes() {
        let (tx, rx) = mpsc::channel(64);
        let f = fixture();
        f.status.spawn_feed("slow", rx);
        let slow = Arc::new(MockContainerManager::new(tx).with_latency(Duration::from_secs(10)));
        let resolver = Arc::new(CatalogResolver::new(vec![
            Arc::clone(&f.catalog) as Arc<dyn CatalogSource>
        ]));
        let config = OrchestratorConfig {
            request_timeout_secs: 5,
            ..OrchestratorConfig::default()
        };
        let orchestrator = Orchestrator::new(resolver, slow.clone(), f.status.clone(), &config);

        let err = orchestrator.install("weather-app").await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::TimedOut {
                operation: OperationKind::Install,
                ..
            }
        ));
        assert!(orchestrator.locks().is_held("weather-app"));
        assert!(matches!(
            orchestrator.install("weather-app").await,
            Err(CoreError::Busy(_))
        ));

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(slow.count(MockAction::Create, "weather-app"), 1);
        assert!(!orchestrator.locks().is_held("weather-app"));
    }
}

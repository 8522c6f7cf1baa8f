use crate::{ContainerManager, ManagerError};
use async_trait::async_trait;
use boxdeck_schema::{ComponentName, ManifestRecord};
use boxdeck_status::{ContainerPhase, FeedEvent};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockAction {
    Create,
    Delete,
}

/// How the simulated container behaves after a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOutcome {
    /// Reaches `started` (create) or `stopped` (delete).
    Converge,
    /// Reports `failed` with the given reason.
    Fail(String),
    /// Accepts the request and reports only the first phase.
    Silent,
    /// Refuses the request outright.
    Reject(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockRequest {
    pub action: MockAction,
    pub name: ComponentName,
}

#[derive(Default)]
struct MockState {
    scripts: HashMap<(ComponentName, MockAction), MockOutcome>,
    requests: Vec<MockRequest>,
}

/// In-process container manager that reports simulated lifecycle events into a feed.
///
/// Every accepted request spawns a task that publishes the matching container
/// phases, `phase_delay` apart, on the sender handed to [`new`](Self::new).
/// Outcomes default to [`MockOutcome::Converge`] and can be scripted per
/// component and action.
pub struct MockContainerManager {
    feed: mpsc::Sender<FeedEvent>,
    phase_delay: Duration,
    latency: Duration,
    state: Mutex<MockState>,
}

impl MockContainerManager {
    pub fn new(feed: mpsc::Sender<FeedEvent>) -> Self {
        Self {
            feed,
            phase_delay: Duration::from_millis(200),
            latency: Duration::ZERO,
            state: Mutex::new(MockState::default()),
        }
    }

    #[must_use]
    pub fn with_phase_delay(mut self, delay: Duration) -> Self {
        self.phase_delay = delay;
        self
    }

    /// Hold every request this long before accepting it.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn script(&self, name: &str, action: MockAction, outcome: MockOutcome) {
        self.lock()
            .scripts
            .insert((ComponentName::new(name), action), outcome);
    }

    pub fn requests(&self) -> Vec<MockRequest> {
        self.lock().requests.clone()
    }

    pub fn count(&self, action: MockAction, name: &str) -> usize {
        self.lock()
            .requests
            .iter()
            .filter(|r| r.action == action && r.name == name)
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn accept(&self, action: MockAction, name: &str) -> Result<(), ManagerError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let outcome = {
            let mut state = self.lock();
            state.requests.push(MockRequest {
                action,
                name: ComponentName::new(name),
            });
            state
                .scripts
                .get(&(ComponentName::new(name), action))
                .cloned()
                .unwrap_or(MockOutcome::Converge)
        };

        let (first, last) = match action {
            MockAction::Create => (ContainerPhase::Creating, ContainerPhase::Started),
            MockAction::Delete => (ContainerPhase::Stopping, ContainerPhase::Stopped),
        };
        let last = match outcome {
            MockOutcome::Reject(reason) => return Err(ManagerError::Rejected(reason)),
            MockOutcome::Converge => Some(last),
            MockOutcome::Fail(reason) => Some(ContainerPhase::Failed { reason }),
            MockOutcome::Silent => None,
        };

        let feed = self.feed.clone();
        let delay = self.phase_delay;
        let name = ComponentName::new(name);
        tokio::spawn(async move {
            for phase in std::iter::once(first).chain(last) {
                tokio::time::sleep(delay).await;
                debug!("mock container '{name}': {phase:?}");
                let event = FeedEvent::container(name.clone(), Utc::now(), phase);
                if feed.send(event).await.is_err() {
                    break;
                }
            }
        });
        Ok(())
    }
}

#[async_trait]
impl ContainerManager for MockContainerManager {
    async fn create(&self, name: &str, _manifest: &ManifestRecord) -> Result<(), ManagerError> {
        self.accept(MockAction::Create, name).await
    }

    async fn delete(&self, name: &str) -> Result<(), ManagerError> {
        self.accept(MockAction::Delete, name).await
    }
}

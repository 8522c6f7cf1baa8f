use crate::feed::{ContainerPhase, FeedEvent, FeedPayload};
use crate::lifecycle::validate_transition;
use boxdeck_schema::{
    ComponentName, ComponentState, ComponentStatus, DataSourceDescriptor, HealthSignal,
    StatusSource, Topic,
};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// What happened to a feed event handed to [`StatusAggregator::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// Older than the newest update already recorded for the component.
    Stale,
    /// Proposed a transition outside the lifecycle table. The newest such
    /// event is held back and retried once older events catch the component
    /// up to it.
    Rejected,
}

struct Entry {
    status: ComponentStatus,
    last_seen: Instant,
    held: Option<FeedEvent>,
}

#[derive(Default)]
struct Inner {
    components: HashMap<ComponentName, Entry>,
    data_sources: BTreeMap<(ComponentName, Topic), DataSourceDescriptor>,
}

struct Shared {
    inner: Mutex<Inner>,
    /// Bumped after every applied update; `wait_for_state` subscribes to it.
    changes: watch::Sender<u64>,
    liveness_window: Duration,
}

/// Single owner of the merged component status map.
///
/// Cloning is cheap and every clone observes the same state. All access goes
/// through one mutex; readers always receive owned copies so a concurrent feed
/// update can never change data a caller is still looking at.
#[derive(Clone)]
pub struct StatusAggregator {
    shared: Arc<Shared>,
}

/// Point-in-time copy of every component status.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct Snapshot {
    components: BTreeMap<ComponentName, ComponentStatus>,
}

impl Snapshot {
    /// Status for `name`; never-observed names read as `unknown`.
    pub fn get(&self, name: &str) -> ComponentStatus {
        self.components
            .get(name)
            .cloned()
            .unwrap_or_else(|| ComponentStatus::unknown(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.components.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ComponentStatus> {
        self.components.values()
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn into_statuses(self) -> Vec<ComponentStatus> {
        self.components.into_values().collect()
    }
}

impl StatusAggregator {
    pub fn new(liveness_window: Duration) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner::default()),
                changes,
                liveness_window,
            }),
        }
    }

    pub fn liveness_window(&self) -> Duration {
        self.shared.liveness_window
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.shared
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        self.shared.changes.send_modify(|g| *g = g.wrapping_add(1));
    }

    /// Merge one feed event into the status map.
    ///
    /// Per component, updates apply in timestamp order: an event older than the
    /// newest one already applied is discarded rather than overwriting it. A
    /// newer event that the lifecycle table refuses is held until the events
    /// that arrived late fill the gap, then applied on top of them.
    pub fn apply(&self, event: FeedEvent) -> ApplyOutcome {
        let outcome = {
            let mut inner = self.lock();
            apply_locked(&mut inner, event)
        };
        if outcome == ApplyOutcome::Applied {
            self.notify();
        }
        outcome
    }

    /// Owned copy of one component's status; `unknown` if never observed.
    pub fn status(&self, name: &str) -> ComponentStatus {
        self.lock()
            .components
            .get(name)
            .map_or_else(|| ComponentStatus::unknown(name), |e| e.status.clone())
    }

    /// Whether any feed has ever reported on `name`.
    pub fn is_known(&self, name: &str) -> bool {
        self.lock()
            .components
            .get(name)
            .is_some_and(|e| e.status.is_observed())
    }

    pub fn snapshot(&self) -> Snapshot {
        let inner = self.lock();
        Snapshot {
            components: inner
                .components
                .iter()
                .map(|(name, entry)| (name.clone(), entry.status.clone()))
                .collect(),
        }
    }

    pub fn data_sources(&self) -> Vec<DataSourceDescriptor> {
        self.lock().data_sources.values().cloned().collect()
    }

    /// Suspend until `name` reaches one of `targets` or `timeout` elapses.
    ///
    /// Returns the last-known status either way; callers compare its state
    /// against `targets` to tell convergence from a lapsed wait.
    pub async fn wait_for_state(
        &self,
        name: &str,
        targets: &[ComponentState],
        timeout: Duration,
    ) -> ComponentStatus {
        self.wait_until(name, targets, None, timeout).await
    }

    /// Like [`wait_for_state`](Self::wait_for_state), but only statuses produced
    /// after `generation` count as convergence.
    pub async fn wait_for_state_after(
        &self,
        name: &str,
        targets: &[ComponentState],
        generation: u64,
        timeout: Duration,
    ) -> ComponentStatus {
        self.wait_until(name, targets, Some(generation), timeout)
            .await
    }

    async fn wait_until(
        &self,
        name: &str,
        targets: &[ComponentState],
        after: Option<u64>,
        timeout: Duration,
    ) -> ComponentStatus {
        let deadline = Instant::now() + timeout;
        let mut changes = self.shared.changes.subscribe();
        loop {
            // Mark the current version seen before reading, so an update landing
            // between the read and the await still wakes us.
            changes.borrow_and_update();
            let status = self.status(name);
            let fresh = after.map_or(true, |g| status.generation > g);
            if fresh && targets.contains(&status.state) {
                return status;
            }
            match tokio::time::timeout_at(deadline, changes.changed()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) | Err(_) => return self.status(name),
            }
        }
    }

    /// Demote every `running` component silent for longer than the liveness
    /// window to `degraded`. Returns how many were demoted.
    ///
    /// The demotion keeps the component's `updated_at`, so any feed event newer
    /// than the last one applied still wins afterwards.
    pub fn sweep_stale(&self) -> usize {
        let window = self.shared.liveness_window;
        let now = Instant::now();
        let mut demoted = 0;
        {
            let mut inner = self.lock();
            for entry in inner.components.values_mut() {
                if entry.status.state == ComponentState::Running
                    && now.duration_since(entry.last_seen) > window
                {
                    info!(
                        "no status update for '{}' in {}s, demoting to degraded",
                        entry.status.name,
                        window.as_secs()
                    );
                    entry.status.state = ComponentState::Degraded;
                    entry.status.source = Some(StatusSource::Liveness);
                    entry.status.generation += 1;
                    demoted += 1;
                }
            }
        }
        if demoted > 0 {
            self.notify();
        }
        demoted
    }

    /// Run [`sweep_stale`](Self::sweep_stale) every `interval` until the last
    /// aggregator handle is dropped.
    pub fn spawn_liveness_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let shared = Arc::downgrade(&self.shared);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(shared) = shared.upgrade() else {
                    debug!("status aggregator dropped, stopping liveness sweeper");
                    break;
                };
                StatusAggregator { shared }.sweep_stale();
            }
        })
    }
}

fn apply_locked(inner: &mut Inner, event: FeedEvent) -> ApplyOutcome {
    let name = event.component.clone();
    let outcome = apply_event(inner, event);
    if outcome == ApplyOutcome::Applied {
        retry_held(inner, &name);
    }
    outcome
}

fn retry_held(inner: &mut Inner, name: &ComponentName) {
    let Some(entry) = inner.components.get_mut(name) else {
        return;
    };
    let Some(held) = entry.held.take() else {
        return;
    };
    let current = entry.status.state;
    if validate_transition(current, held.next_state(current)).is_ok() {
        debug!("applying held {} event for '{name}'", held.source());
        apply_event(inner, held);
    } else {
        entry.held = Some(held);
    }
}

fn apply_event(inner: &mut Inner, event: FeedEvent) -> ApplyOutcome {
    let entry = inner
        .components
        .entry(event.component.clone())
        .or_insert_with(|| Entry {
            status: ComponentStatus::unknown(event.component.clone()),
            last_seen: Instant::now(),
            held: None,
        });

    // Stale and rejected events do not count as liveness.
    if let Some(newest) = entry.status.updated_at {
        if event.timestamp < newest {
            debug!(
                "discarding stale {} event for '{}' ({} < {newest})",
                event.source(),
                event.component,
                event.timestamp
            );
            return ApplyOutcome::Stale;
        }
    }
    if entry
        .held
        .as_ref()
        .is_some_and(|held| event.timestamp >= held.timestamp)
    {
        entry.held = None;
    }

    let current = entry.status.state;
    let next = event.next_state(current);
    if let Err(e) = validate_transition(current, next) {
        warn!("holding back {} event for '{}': {e}", event.source(), event.component);
        if entry.held.is_none() {
            entry.held = Some(event);
        }
        return ApplyOutcome::Rejected;
    }

    if current != next {
        debug!("'{}': {current} -> {next} ({})", event.component, event.source());
    }
    entry.status.state = next;
    entry.status.updated_at = Some(event.timestamp);
    entry.status.source = Some(event.source());
    entry.status.generation += 1;
    entry.last_seen = Instant::now();

    match event.payload {
        FeedPayload::Health { signal } => {
            entry.status.health = Some(signal);
        }
        FeedPayload::Container { phase } => {
            if let ContainerPhase::Failed { reason } = &phase {
                entry.status.health = Some(HealthSignal::Unhealthy {
                    reason: reason.clone(),
                });
            }
            if phase == ContainerPhase::Removed {
                inner
                    .data_sources
                    .retain(|(component, _), _| *component != event.component);
            }
        }
        FeedPayload::DataSourceRegistered {
            topic,
            content_type,
            direction,
            endpoint,
        } => {
            let descriptor = DataSourceDescriptor {
                topic,
                component: event.component,
                content_type,
                direction,
                endpoint,
            };
            inner.data_sources.insert(descriptor.key(), descriptor);
        }
        FeedPayload::DataSourceRemoved { topic } => {
            inner.data_sources.remove(&(event.component, topic));
        }
    }

    ApplyOutcome::Applied
}

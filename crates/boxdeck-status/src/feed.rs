use crate::StatusAggregator;
use boxdeck_schema::{ComponentName, ComponentState, Direction, HealthSignal, StatusSource, Topic};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// One message from a status feed, tagged with its component and origin timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedEvent {
    pub component: ComponentName,
    pub timestamp: DateTime<Utc>,
    pub payload: FeedPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeedPayload {
    Health {
        signal: HealthSignal,
    },
    Container {
        phase: ContainerPhase,
    },
    DataSourceRegistered {
        topic: Topic,
        content_type: String,
        direction: Direction,
        endpoint: String,
    },
    DataSourceRemoved {
        topic: Topic,
    },
}

/// Lifecycle phases reported by the container manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum ContainerPhase {
    Creating,
    Started,
    Stopping,
    Stopped,
    Removed,
    Failed { reason: String },
}

impl FeedEvent {
    pub fn new(
        component: impl Into<ComponentName>,
        timestamp: DateTime<Utc>,
        payload: FeedPayload,
    ) -> Self {
        Self {
            component: component.into(),
            timestamp,
            payload,
        }
    }

    pub fn health(
        component: impl Into<ComponentName>,
        timestamp: DateTime<Utc>,
        signal: HealthSignal,
    ) -> Self {
        Self::new(component, timestamp, FeedPayload::Health { signal })
    }

    pub fn container(
        component: impl Into<ComponentName>,
        timestamp: DateTime<Utc>,
        phase: ContainerPhase,
    ) -> Self {
        Self::new(component, timestamp, FeedPayload::Container { phase })
    }

    pub fn source(&self) -> StatusSource {
        match self.payload {
            FeedPayload::Health { .. } => StatusSource::Health,
            FeedPayload::Container { .. } => StatusSource::Container,
            FeedPayload::DataSourceRegistered { .. } | FeedPayload::DataSourceRemoved { .. } => {
                StatusSource::DataSource
            }
        }
    }

    /// The lifecycle state this event proposes, given the component's current state.
    pub fn next_state(&self, current: ComponentState) -> ComponentState {
        use ComponentState::{Degraded, Failed, Installing, Running, Stopped, Stopping, Unknown};

        match &self.payload {
            FeedPayload::Health {
                signal: HealthSignal::Healthy,
            } => match current {
                Unknown | Installing | Degraded => Running,
                other => other,
            },
            FeedPayload::Health {
                signal: HealthSignal::Unhealthy { .. },
            } => match current {
                Running => Degraded,
                other => other,
            },
            FeedPayload::Container { phase } => match phase {
                ContainerPhase::Creating => Installing,
                ContainerPhase::Started => Running,
                ContainerPhase::Stopping => Stopping,
                ContainerPhase::Stopped | ContainerPhase::Removed => Stopped,
                ContainerPhase::Failed { .. } => Failed,
            },
            FeedPayload::DataSourceRegistered { .. } | FeedPayload::DataSourceRemoved { .. } => {
                current
            }
        }
    }
}

impl StatusAggregator {
    /// Run one background task that applies every event from `events` until the
    /// publishing side closes the channel.
    pub fn spawn_feed(&self, feed: &str, mut events: mpsc::Receiver<FeedEvent>) -> JoinHandle<()> {
        let aggregator = self.clone();
        let feed = feed.to_owned();
        tokio::spawn(async move {
            info!("status feed '{feed}' subscribed");
            while let Some(event) = events.recv().await {
                let outcome = aggregator.apply(event);
                debug!("feed '{feed}': {outcome:?}");
            }
            info!("status feed '{feed}' closed");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ComponentState::{Degraded, Failed, Installing, Running, Stopped, Stopping, Unknown};

    fn at() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn container_phases_map_to_states() {
        let cases = [
            (ContainerPhase::Creating, Installing),
            (ContainerPhase::Started, Running),
            (ContainerPhase::Stopping, Stopping),
            (ContainerPhase::Stopped, Stopped),
            (ContainerPhase::Removed, Stopped),
            (
                ContainerPhase::Failed {
                    reason: "exit 1".to_owned(),
                },
                Failed,
            ),
        ];
        for (phase, expected) in cases {
            let event = FeedEvent::container("c", at(), phase);
            assert_eq!(event.next_state(Unknown), expected);
        }
    }

    #[test]
    fn health_pings_only_move_live_states() {
        let healthy = FeedEvent::health("c", at(), HealthSignal::Healthy);
        assert_eq!(healthy.next_state(Installing), Running);
        assert_eq!(healthy.next_state(Degraded), Running);
        assert_eq!(healthy.next_state(Stopped), Stopped);

        let unhealthy = FeedEvent::health(
            "c",
            at(),
            HealthSignal::Unhealthy {
                reason: "probe failed".to_owned(),
            },
        );
        assert_eq!(unhealthy.next_state(Running), Degraded);
        assert_eq!(unhealthy.next_state(Stopping), Stopping);
    }

    #[test]
    fn wire_format_is_tagged() {
        let event = FeedEvent::container(
            "weather-app",
            at(),
            ContainerPhase::Failed {
                reason: "oom".to_owned(),
            },
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["component"], "weather-app");
        assert_eq!(json["payload"]["kind"], "container");
        assert_eq!(json["payload"]["phase"]["phase"], "failed");
        assert_eq!(json["payload"]["phase"]["reason"], "oom");

        let back: FeedEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn data_source_events_keep_state() {
        let event = FeedEvent::new(
            "c",
            at(),
            FeedPayload::DataSourceRemoved {
                topic: Topic::new("t"),
            },
        );
        assert_eq!(event.next_state(Running), Running);
        assert_eq!(event.source(), StatusSource::DataSource);
    }
}

use crate::normalize::Direction;
use crate::types::{ComponentName, Topic};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentState {
    Unknown,
    Installing,
    Running,
    Degraded,
    Stopping,
    Stopped,
    Failed,
}

impl ComponentState {
    /// Running or degraded: the container is up, whatever its health.
    pub fn is_active(self) -> bool {
        matches!(self, ComponentState::Running | ComponentState::Degraded)
    }
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentState::Unknown => write!(f, "unknown"),
            ComponentState::Installing => write!(f, "installing"),
            ComponentState::Running => write!(f, "running"),
            ComponentState::Degraded => write!(f, "degraded"),
            ComponentState::Stopping => write!(f, "stopping"),
            ComponentState::Stopped => write!(f, "stopped"),
            ComponentState::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HealthSignal {
    Healthy,
    Unhealthy { reason: String },
}

/// Which feed produced the update a status currently reflects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusSource {
    Health,
    Container,
    DataSource,
    Liveness,
}

impl fmt::Display for StatusSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusSource::Health => write!(f, "health"),
            StatusSource::Container => write!(f, "container"),
            StatusSource::DataSource => write!(f, "data_source"),
            StatusSource::Liveness => write!(f, "liveness"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentStatus {
    pub name: ComponentName,
    pub state: ComponentState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthSignal>,
    /// Timestamp of the newest feed event applied. `None` until first observed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<StatusSource>,
    /// Incremented on every applied update; zero means never observed.
    #[serde(default)]
    pub generation: u64,
}

impl ComponentStatus {
    pub fn unknown(name: impl Into<ComponentName>) -> Self {
        Self {
            name: name.into(),
            state: ComponentState::Unknown,
            health: None,
            updated_at: None,
            source: None,
            generation: 0,
        }
    }

    pub fn is_observed(&self) -> bool {
        self.generation > 0
    }
}

/// A topic a component has registered with the platform's data-flow layer.
///
/// Unique per `(component, topic)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSourceDescriptor {
    pub topic: Topic,
    pub component: ComponentName,
    pub content_type: String,
    pub direction: Direction,
    pub endpoint: String,
}

impl DataSourceDescriptor {
    pub fn key(&self) -> (ComponentName, Topic) {
        (self.component.clone(), self.topic.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_status_is_unobserved() {
        let status = ComponentStatus::unknown("weather-app");
        assert_eq!(status.state, ComponentState::Unknown);
        assert!(!status.is_observed());
    }

    #[test]
    fn state_serializes_snake_case() {
        let json = serde_json::to_string(&ComponentState::Degraded).unwrap();
        assert_eq!(json, "\"degraded\"");
        assert_eq!(ComponentState::Stopping.to_string(), "stopping");
    }

    #[test]
    fn health_signal_is_tagged() {
        let json = serde_json::to_value(HealthSignal::Unhealthy {
            reason: "probe timeout".to_owned(),
        })
        .unwrap();
        assert_eq!(json["status"], "unhealthy");
        assert_eq!(json["reason"], "probe timeout");
    }

    #[test]
    fn active_states() {
        assert!(ComponentState::Running.is_active());
        assert!(ComponentState::Degraded.is_active());
        assert!(!ComponentState::Installing.is_active());
        assert!(!ComponentState::Stopped.is_active());
    }
}

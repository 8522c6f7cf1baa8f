//! Status aggregation for boxdeck.
//!
//! Several feeds report on the same components independently: service health
//! pings, container manager lifecycle events, and data-source registrations.
//! The [`StatusAggregator`] merges them into one `ComponentStatus` per name,
//! applying updates last-write-wins on the feed timestamp, enforcing the
//! lifecycle transition table, and demoting silent components to `degraded`
//! once their liveness window lapses.

pub mod aggregator;
pub mod config;
pub mod feed;
pub mod lifecycle;

pub use aggregator::{ApplyOutcome, Snapshot, StatusAggregator};
pub use config::StatusConfig;
pub use feed::{ContainerPhase, FeedEvent, FeedPayload};
pub use lifecycle::validate_transition;

use boxdeck_schema::ComponentState;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition {
        from: ComponentState,
        to: ComponentState,
    },
}

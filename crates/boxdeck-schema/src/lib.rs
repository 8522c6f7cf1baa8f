//! Manifest schemas, normalization, and the component status model for boxdeck.
//!
//! This crate defines the data layer shared by every other crate: catalog
//! manifest parsing for each supported schema (`RawManifest`), the canonical
//! `ManifestRecord` they all normalize into, the `ComponentStatus` and
//! `DataSourceDescriptor` records maintained by the status aggregator, and
//! string newtypes for component names, revisions and topics.

pub mod manifest;
pub mod normalize;
pub mod status;
pub mod types;

pub use manifest::{
    parse_manifest_str, parse_manifest_value, BoxdeckManifest, DataboxManifest, ManifestError,
    RawManifest,
};
pub use normalize::{
    ComponentKind, DataSourceBinding, Direction, ManifestRecord, ResourceRequirements,
};
pub use status::{
    ComponentState, ComponentStatus, DataSourceDescriptor, HealthSignal, StatusSource,
};
pub use types::{ComponentName, Revision, Topic};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to parse manifest: {0}")]
    ParseJson(#[from] serde_json::Error),
    #[error("manifest is not a JSON object")]
    NotAnObject,
    #[error("unrecognised manifest schema: expected a 'manifest-version' or 'schema_version' tag")]
    UnknownSchema,
    #[error("ambiguous manifest schema: both 'manifest-version' and 'schema_version' are present")]
    AmbiguousSchema,
    #[error("unsupported manifest-version: {0}, expected 1")]
    UnsupportedDataboxVersion(u64),
    #[error("unsupported schema_version: {0}, expected 2")]
    UnsupportedSchemaVersion(u64),
    #[error("{0} must not be empty")]
    EmptyField(&'static str),
    #[error("unknown component kind '{0}', expected 'app' or 'driver'")]
    UnknownKind(String),
    #[error("unknown binding direction '{0}', expected 'produced' or 'consumed'")]
    UnknownDirection(String),
    #[error("duplicate {direction} binding for topic '{topic}'")]
    DuplicateBinding { topic: String, direction: String },
    #[error("resource limit {0} must be greater than zero")]
    ZeroResourceLimit(&'static str),
}

/// A manifest as published by a catalog source, before normalization.
///
/// Each variant is one catalog schema; the tag that selects it is checked
/// before any field is read so an unrecognised shape is rejected outright.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawManifest {
    Databox(DataboxManifest),
    Boxdeck(BoxdeckManifest),
}

/// Legacy platform manifest (`"manifest-version": 1`, kebab-case keys).
///
/// Producers attach arbitrary extra metadata (licence, tags, homepage ...),
/// so unknown fields are tolerated here.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct DataboxManifest {
    pub manifest_version: u64,
    pub name: String,
    pub databox_type: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub docker_image: Option<String>,
    #[serde(default)]
    pub docker_image_tag: Option<String>,
    #[serde(default)]
    pub resource_requirements: DataboxResources,
    #[serde(default)]
    pub datasources: Vec<DataboxDatasource>,
    #[serde(default)]
    pub export_datasources: Vec<DataboxExport>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct DataboxResources {
    #[serde(default)]
    pub store: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct DataboxDatasource {
    pub clientid: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct DataboxExport {
    pub clientid: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

/// Native manifest schema (`"schema_version": 2`).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BoxdeckManifest {
    pub schema_version: u64,
    pub name: String,
    pub kind: String,
    pub version: String,
    #[serde(default)]
    pub revision: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub image: String,
    #[serde(default)]
    pub resources: ResourcesSection,
    #[serde(default)]
    pub bindings: Vec<BindingSection>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ResourcesSection {
    #[serde(default)]
    pub cpu_shares: Option<u64>,
    #[serde(default)]
    pub memory_limit_mb: Option<u64>,
    #[serde(default)]
    pub store: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BindingSection {
    pub topic: String,
    pub direction: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
}

fn default_content_type() -> String {
    "application/json".to_owned()
}

const DATABOX_TAG: &str = "manifest-version";
const BOXDECK_TAG: &str = "schema_version";

/// Pick the schema adapter for a raw catalog entry and deserialize it.
pub fn parse_manifest_value(value: Value) -> Result<RawManifest, ManifestError> {
    let Some(object) = value.as_object() else {
        return Err(ManifestError::NotAnObject);
    };

    match (object.get(DATABOX_TAG), object.get(BOXDECK_TAG)) {
        (Some(_), Some(_)) => Err(ManifestError::AmbiguousSchema),
        (Some(tag), None) => match tag.as_u64() {
            Some(1) => Ok(RawManifest::Databox(serde_json::from_value(value)?)),
            Some(other) => Err(ManifestError::UnsupportedDataboxVersion(other)),
            None => Err(ManifestError::UnknownSchema),
        },
        (None, Some(tag)) => match tag.as_u64() {
            Some(2) => Ok(RawManifest::Boxdeck(serde_json::from_value(value)?)),
            Some(other) => Err(ManifestError::UnsupportedSchemaVersion(other)),
            None => Err(ManifestError::UnknownSchema),
        },
        (None, None) => Err(ManifestError::UnknownSchema),
    }
}

pub fn parse_manifest_str(input: &str) -> Result<RawManifest, ManifestError> {
    parse_manifest_value(serde_json::from_str(input)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_databox_manifest() {
        let input = r#"{
            "manifest-version": 1,
            "name": "weather-app",
            "databox-type": "app",
            "version": "0.3.0",
            "description": "Shows the local forecast",
            "licence": "MIT",
            "tags": ["weather"],
            "resource-requirements": { "store": "core-store" },
            "datasources": [
                { "clientid": "TEMPERATURE", "type": "weather-temperature", "required": true }
            ]
        }"#;
        let RawManifest::Databox(m) = parse_manifest_str(input).expect("should parse") else {
            panic!("expected databox schema");
        };
        assert_eq!(m.name, "weather-app");
        assert_eq!(m.databox_type, "app");
        assert_eq!(m.resource_requirements.store.as_deref(), Some("core-store"));
        assert_eq!(m.datasources.len(), 1);
        assert!(m.datasources[0].required);
    }

    #[test]
    fn parses_boxdeck_manifest() {
        let value = json!({
            "schema_version": 2,
            "name": "driver-os-monitor",
            "kind": "driver",
            "version": "1.0.0",
            "image": "registry.local/driver-os-monitor:1.0.0",
            "resources": { "memory_limit_mb": 128 },
            "bindings": [{ "topic": "loadavg1", "direction": "produced" }]
        });
        let RawManifest::Boxdeck(m) = parse_manifest_value(value).expect("should parse") else {
            panic!("expected boxdeck schema");
        };
        assert_eq!(m.kind, "driver");
        assert_eq!(m.resources.memory_limit_mb, Some(128));
        assert_eq!(m.bindings[0].content_type, "application/json");
    }

    #[test]
    fn rejects_untagged_manifest() {
        let value = json!({ "name": "weather-app", "kind": "app" });
        assert!(matches!(
            parse_manifest_value(value),
            Err(ManifestError::UnknownSchema)
        ));
    }

    #[test]
    fn rejects_ambiguous_manifest() {
        let value = json!({ "manifest-version": 1, "schema_version": 2, "name": "x" });
        assert!(matches!(
            parse_manifest_value(value),
            Err(ManifestError::AmbiguousSchema)
        ));
    }

    #[test]
    fn rejects_unsupported_versions() {
        assert!(matches!(
            parse_manifest_value(json!({ "manifest-version": 3 })),
            Err(ManifestError::UnsupportedDataboxVersion(3))
        ));
        assert!(matches!(
            parse_manifest_value(json!({ "schema_version": 1 })),
            Err(ManifestError::UnsupportedSchemaVersion(1))
        ));
    }

    #[test]
    fn rejects_unknown_fields_in_native_schema() {
        let value = json!({
            "schema_version": 2,
            "name": "weather-app",
            "kind": "app",
            "version": "1",
            "image": "weather",
            "privileged": true
        });
        assert!(matches!(
            parse_manifest_value(value),
            Err(ManifestError::ParseJson(_))
        ));
    }

    #[test]
    fn rejects_missing_required_field() {
        let value = json!({ "manifest-version": 1, "name": "weather-app" });
        assert!(parse_manifest_value(value).is_err());
    }

    #[test]
    fn rejects_non_object() {
        assert!(matches!(
            parse_manifest_value(json!(["weather-app"])),
            Err(ManifestError::NotAnObject)
        ));
    }
}

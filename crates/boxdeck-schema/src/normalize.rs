use crate::manifest::{BoxdeckManifest, DataboxManifest, ManifestError, RawManifest};
use crate::types::{ComponentName, Revision, Topic};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    App,
    Driver,
}

impl ComponentKind {
    pub fn parse(s: &str) -> Result<Self, ManifestError> {
        match s.trim().to_lowercase().as_str() {
            "app" => Ok(Self::App),
            "driver" => Ok(Self::Driver),
            _ => Err(ManifestError::UnknownKind(s.to_owned())),
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentKind::App => write!(f, "app"),
            ComponentKind::Driver => write!(f, "driver"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Produced,
    Consumed,
}

impl Direction {
    pub fn parse(s: &str) -> Result<Self, ManifestError> {
        match s.trim().to_lowercase().as_str() {
            "produced" => Ok(Self::Produced),
            "consumed" => Ok(Self::Consumed),
            _ => Err(ManifestError::UnknownDirection(s.to_owned())),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Produced => write!(f, "produced"),
            Direction::Consumed => write!(f, "consumed"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceRequirements {
    pub cpu_shares: Option<u64>,
    pub memory_limit_mb: Option<u64>,
    pub store: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DataSourceBinding {
    pub topic: Topic,
    pub direction: Direction,
    pub content_type: String,
}

/// Canonical, schema-independent representation of a catalog manifest.
///
/// Bindings are sorted by topic then direction, strings are trimmed, and the
/// revision token is always populated: either the one the producer declared or
/// a content digest, so two equal manifests always carry the same revision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestRecord {
    pub name: ComponentName,
    pub kind: ComponentKind,
    pub version: String,
    pub revision: Revision,
    pub description: Option<String>,
    pub image: String,
    pub resources: ResourceRequirements,
    pub bindings: Vec<DataSourceBinding>,
    /// Catalog source the record was resolved from. Empty until a resolver stamps it.
    #[serde(default)]
    pub source: String,
}

/// The content that feeds the revision digest. Excludes `revision` and `source`.
#[derive(Serialize)]
struct RevisionContent<'a> {
    name: &'a ComponentName,
    kind: ComponentKind,
    version: &'a str,
    description: Option<&'a str>,
    image: &'a str,
    resources: &'a ResourceRequirements,
    bindings: &'a [DataSourceBinding],
}

impl ManifestRecord {
    pub fn canonical_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn consumes(&self) -> impl Iterator<Item = &DataSourceBinding> {
        self.bindings
            .iter()
            .filter(|b| b.direction == Direction::Consumed)
    }

    pub fn produces(&self) -> impl Iterator<Item = &DataSourceBinding> {
        self.bindings
            .iter()
            .filter(|b| b.direction == Direction::Produced)
    }
}

impl RawManifest {
    /// Normalize the manifest: validate fields, sort bindings, resolve defaults.
    pub fn normalize(&self) -> Result<ManifestRecord, ManifestError> {
        match self {
            RawManifest::Databox(m) => normalize_databox(m),
            RawManifest::Boxdeck(m) => normalize_boxdeck(m),
        }
    }
}

fn normalize_databox(m: &DataboxManifest) -> Result<ManifestRecord, ManifestError> {
    let name = required("name", &m.name)?;
    let kind = ComponentKind::parse(&m.databox_type)?;

    let image = match m.docker_image.as_deref().map(str::trim) {
        Some(image) if !image.is_empty() => image.to_owned(),
        _ => name.clone(),
    };
    let tag = m
        .docker_image_tag
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or("latest");

    let mut bindings = Vec::with_capacity(m.datasources.len() + m.export_datasources.len());
    for ds in &m.datasources {
        bindings.push(DataSourceBinding {
            topic: Topic::new(required("datasource clientid", &ds.clientid)?),
            direction: Direction::Consumed,
            content_type: required("datasource type", &ds.kind)?,
        });
    }
    for export in &m.export_datasources {
        bindings.push(DataSourceBinding {
            topic: Topic::new(required("export-datasource clientid", &export.clientid)?),
            direction: Direction::Produced,
            content_type: export
                .kind
                .as_deref()
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .unwrap_or("application/json")
                .to_owned(),
        });
    }

    finish(
        name,
        kind,
        m.version.as_deref().map_or("0.0.0", str::trim).to_owned(),
        None,
        m.description.clone(),
        format!("{image}:{tag}"),
        ResourceRequirements {
            cpu_shares: None,
            memory_limit_mb: None,
            store: optional(m.resource_requirements.store.as_deref()),
        },
        bindings,
    )
}

fn normalize_boxdeck(m: &BoxdeckManifest) -> Result<ManifestRecord, ManifestError> {
    let name = required("name", &m.name)?;
    let kind = ComponentKind::parse(&m.kind)?;
    let version = required("version", &m.version)?;
    let image = required("image", &m.image)?;

    if m.resources.cpu_shares == Some(0) {
        return Err(ManifestError::ZeroResourceLimit("cpu_shares"));
    }
    if m.resources.memory_limit_mb == Some(0) {
        return Err(ManifestError::ZeroResourceLimit("memory_limit_mb"));
    }

    let mut bindings = Vec::with_capacity(m.bindings.len());
    for b in &m.bindings {
        bindings.push(DataSourceBinding {
            topic: Topic::new(required("binding topic", &b.topic)?),
            direction: Direction::parse(&b.direction)?,
            content_type: required("binding content_type", &b.content_type)?,
        });
    }

    finish(
        name,
        kind,
        version,
        optional(m.revision.as_deref()),
        m.description.clone(),
        image,
        ResourceRequirements {
            cpu_shares: m.resources.cpu_shares,
            memory_limit_mb: m.resources.memory_limit_mb,
            store: optional(m.resources.store.as_deref()),
        },
        bindings,
    )
}

#[allow(clippy::too_many_arguments)]
fn finish(
    name: String,
    kind: ComponentKind,
    version: String,
    declared_revision: Option<String>,
    description: Option<String>,
    image: String,
    resources: ResourceRequirements,
    mut bindings: Vec<DataSourceBinding>,
) -> Result<ManifestRecord, ManifestError> {
    bindings.sort_by(|a, b| (&a.topic, a.direction).cmp(&(&b.topic, b.direction)));
    if let Some(dup) = bindings
        .windows(2)
        .find(|w| w[0].topic == w[1].topic && w[0].direction == w[1].direction)
    {
        return Err(ManifestError::DuplicateBinding {
            topic: dup[0].topic.to_string(),
            direction: dup[0].direction.to_string(),
        });
    }

    let name = ComponentName::new(name);
    let description = description
        .map(|d| d.trim().to_owned())
        .filter(|d| !d.is_empty());

    let revision = match declared_revision {
        Some(r) => Revision::new(r),
        None => content_revision(&RevisionContent {
            name: &name,
            kind,
            version: &version,
            description: description.as_deref(),
            image: &image,
            resources: &resources,
            bindings: &bindings,
        })?,
    };

    Ok(ManifestRecord {
        name,
        kind,
        version,
        revision,
        description,
        image,
        resources,
        bindings,
        source: String::new(),
    })
}

fn content_revision(content: &RevisionContent<'_>) -> Result<Revision, ManifestError> {
    let json = serde_json::to_string(content)?;
    let hex = blake3::hash(json.as_bytes()).to_hex();
    Ok(Revision::new(&hex[..16]))
}

fn required(field: &'static str, value: &str) -> Result<String, ManifestError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ManifestError::EmptyField(field));
    }
    Ok(trimmed.to_owned())
}

fn optional(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToOwned::to_owned)
}

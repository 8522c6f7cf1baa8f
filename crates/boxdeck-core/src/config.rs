use boxdeck_catalog::CatalogConfig;
use boxdeck_status::StatusConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level `boxdeck.toml`. Every section is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub status: StatusConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub container_manager: ContainerManagerConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(input)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn default_bind() -> String {
    "127.0.0.1".to_owned()
}

fn default_port() -> u16 {
    8080
}

/// `[orchestrator]` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct OrchestratorConfig {
    /// Bound on a single container manager request.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// How long an install waits for `running` or `failed`.
    #[serde(default = "default_install_timeout_secs")]
    pub install_timeout_secs: u64,
    /// How long an uninstall waits for `stopped`.
    #[serde(default = "default_uninstall_timeout_secs")]
    pub uninstall_timeout_secs: u64,
    /// Finished operations kept for `operations()`.
    #[serde(default = "default_archive_len")]
    pub archive_len: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            install_timeout_secs: default_install_timeout_secs(),
            uninstall_timeout_secs: default_uninstall_timeout_secs(),
            archive_len: default_archive_len(),
        }
    }
}

impl OrchestratorConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.install_timeout_secs)
    }

    pub fn uninstall_timeout(&self) -> Duration {
        Duration::from_secs(self.uninstall_timeout_secs)
    }
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_install_timeout_secs() -> u64 {
    120
}

fn default_uninstall_timeout_secs() -> u64 {
    60
}

fn default_archive_len() -> usize {
    100
}

/// `[container_manager]` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContainerManagerConfig {
    /// Simulated manager reporting into the `container-manager` feed.
    Mock {
        #[serde(default = "default_phase_delay_ms")]
        phase_delay_ms: u64,
    },
    Http {
        url: String,
        #[serde(default)]
        auth_token: Option<String>,
    },
}

impl Default for ContainerManagerConfig {
    fn default() -> Self {
        ContainerManagerConfig::Mock {
            phase_delay_ms: default_phase_delay_ms(),
        }
    }
}

fn default_phase_delay_ms() -> u64 {
    200
}

#[cfg(test)]
mod tests {
    use super::*;
    use boxdeck_catalog::SourceConfig;

    #[test]
    fn empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.server.addr(), "127.0.0.1:8080");
        assert_eq!(config.orchestrator.install_timeout(), Duration::from_secs(120));
        assert!(matches!(
            config.container_manager,
            ContainerManagerConfig::Mock { phase_delay_ms: 200 }
        ));
    }

    #[test]
    fn full_config_parses() {
        let config = Config::parse(
            r#"
[server]
bind = "0.0.0.0"
port = 9090

[catalog]
cache_ttl_secs = 30

[[catalog.sources]]
type = "directory"
name = "local"
path = "/var/lib/boxdeck/manifests"

[[catalog.sources]]
type = "http"
url = "https://store.example.com"
auth_token = "secret"

[status]
liveness_window_secs = 45

[orchestrator]
install_timeout_secs = 300
archive_len = 10

[container_manager]
type = "http"
url = "http://container-manager:8080"
"#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9090);
        assert_eq!(config.catalog.sources.len(), 2);
        assert!(matches!(
            &config.catalog.sources[0],
            SourceConfig::Directory { name: Some(n), .. } if n == "local"
        ));
        assert_eq!(config.status.liveness_window_secs, 45);
        assert_eq!(config.status.sweep_interval_secs, 5);
        assert_eq!(config.orchestrator.install_timeout_secs, 300);
        assert_eq!(config.orchestrator.uninstall_timeout_secs, 60);
        assert_eq!(
            config.container_manager,
            ContainerManagerConfig::Http {
                url: "http://container-manager:8080".to_owned(),
                auth_token: None,
            }
        );
    }

    #[test]
    fn unknown_section_is_rejected() {
        assert!(matches!(
            Config::parse("[metrics]\nenabled = true\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(&dir.path().join("boxdeck.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}

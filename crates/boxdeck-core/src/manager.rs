use async_trait::async_trait;
use boxdeck_schema::ManifestRecord;
use serde::Serialize;
use std::io::Read;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManagerError {
    /// The container manager refused the request; retrying will not help.
    #[error("request rejected: {0}")]
    Rejected(String),
    /// The container manager could not be reached or failed transiently.
    #[error("container manager unavailable: {0}")]
    Unavailable(String),
}

/// The external service that creates and deletes component containers.
///
/// Both calls return once the request is accepted. Completion is only ever
/// observed through the status feeds.
#[async_trait]
pub trait ContainerManager: Send + Sync {
    async fn create(&self, name: &str, manifest: &ManifestRecord) -> Result<(), ManagerError>;

    async fn delete(&self, name: &str) -> Result<(), ManagerError>;
}

#[derive(Serialize)]
struct CreateRequest<'a> {
    name: &'a str,
    manifest: &'a ManifestRecord,
}

#[derive(Serialize)]
struct DeleteRequest<'a> {
    name: &'a str,
}

/// Container manager reached over HTTP.
///
/// Expects:
/// - `POST /create` with `{"name": ..., "manifest": {...}}`
/// - `POST /delete` with `{"name": ...}`
///
/// Any 2xx is acceptance, 4xx a rejection, everything else unavailability.
pub struct HttpContainerManager {
    url: String,
    auth_token: Option<String>,
    agent: ureq::Agent,
}

impl HttpContainerManager {
    /// `timeout` is the agent's global timeout and the only bound on a
    /// request once it is on the wire. The orchestrator stops waiting after
    /// its own request timeout but keeps the component locked until the
    /// blocking call here returns, so a request never outlives `timeout`
    /// plus connection teardown.
    pub fn new(url: &str, timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        Self {
            url: url.trim_end_matches('/').to_owned(),
            auth_token: None,
            agent,
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: &str) -> Self {
        self.auth_token = Some(token.to_owned());
        self
    }

    async fn post(&self, path: &str, body: Vec<u8>) -> Result<(), ManagerError> {
        let agent = self.agent.clone();
        let url = format!("{}/{path}", self.url);
        let token = self.auth_token.clone();
        tokio::task::spawn_blocking(move || do_post(&agent, &url, token.as_deref(), &body))
            .await
            .map_err(|e| ManagerError::Unavailable(format!("request task failed: {e}")))?
    }
}

fn do_post(
    agent: &ureq::Agent,
    url: &str,
    token: Option<&str>,
    body: &[u8],
) -> Result<(), ManagerError> {
    tracing::debug!("POST {url} ({} bytes)", body.len());
    let mut req = agent.post(url).header("Content-Type", "application/json");
    if let Some(token) = token {
        req = req.header("Authorization", &format!("Bearer {token}"));
    }
    let resp = match req.send(body) {
        Ok(r) => r,
        Err(ureq::Error::StatusCode(code)) if (400..500).contains(&code) => {
            return Err(ManagerError::Rejected(format!("HTTP {code} for {url}")));
        }
        Err(ureq::Error::StatusCode(code)) => {
            return Err(ManagerError::Unavailable(format!("HTTP {code} for {url}")));
        }
        Err(e) => return Err(ManagerError::Unavailable(e.to_string())),
    };

    let code = resp.status().as_u16();
    if (200..300).contains(&code) {
        return Ok(());
    }
    let mut reason = String::new();
    let _ = resp.into_body().into_reader().read_to_string(&mut reason);
    if (400..500).contains(&code) {
        Err(ManagerError::Rejected(format!("HTTP {code}: {}", reason.trim())))
    } else {
        Err(ManagerError::Unavailable(format!("HTTP {code}: {}", reason.trim())))
    }
}

#[async_trait]
impl ContainerManager for HttpContainerManager {
    async fn create(&self, name: &str, manifest: &ManifestRecord) -> Result<(), ManagerError> {
        let body = serde_json::to_vec(&CreateRequest { name, manifest })
            .map_err(|e| ManagerError::Rejected(format!("unserializable manifest: {e}")))?;
        self.post("create", body).await
    }

    async fn delete(&self, name: &str) -> Result<(), ManagerError> {
        let body = serde_json::to_vec(&DeleteRequest { name })
            .map_err(|e| ManagerError::Rejected(e.to_string()))?;
        self.post("delete", body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boxdeck_schema::parse_manifest_str;
    use std::collections::HashMap;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::sync::{Arc, Mutex};

    /// Answers every request on a path with a fixed status code and records the bodies.
    struct MockManager {
        url: String,
        bodies: Arc<Mutex<Vec<(String, serde_json::Value)>>>,
        _handle: std::thread::JoinHandle<()>,
    }

    impl MockManager {
        fn start(codes: HashMap<&'static str, u16>) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let url = format!("http://{}", listener.local_addr().unwrap());
            let bodies = Arc::new(Mutex::new(Vec::new()));
            let captured = Arc::clone(&bodies);

            let handle = std::thread::spawn(move || {
                for stream in listener.incoming() {
                    let Ok(mut stream) = stream else { break };
                    let mut reader = BufReader::new(stream.try_clone().unwrap());
                    let mut request_line = String::new();
                    if reader.read_line(&mut request_line).is_err() {
                        continue;
                    }
                    let path = request_line
                        .split_whitespace()
                        .nth(1)
                        .unwrap_or("/")
                        .to_owned();

                    let mut content_length = 0;
                    loop {
                        let mut line = String::new();
                        if reader.read_line(&mut line).is_err() || line.trim().is_empty() {
                            break;
                        }
                        if let Some((k, v)) = line.trim().split_once(':') {
                            if k.trim().eq_ignore_ascii_case("content-length") {
                                content_length = v.trim().parse().unwrap_or(0);
                            }
                        }
                    }
                    let mut body = vec![0; content_length];
                    if reader.read_exact(&mut body).is_err() {
                        continue;
                    }
                    let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
                    captured.lock().unwrap().push((path.clone(), json));

                    let code = codes.get(path.as_str()).copied().unwrap_or(404);
                    let response = format!(
                        "HTTP/1.1 {code} X\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok"
                    );
                    let _ = stream.write_all(response.as_bytes());
                }
            });

            Self {
                url,
                bodies,
                _handle: handle,
            }
        }
    }

    fn record() -> ManifestRecord {
        parse_manifest_str(
            r#"{"schema_version": 2, "name": "weather-app", "kind": "app",
                "version": "1.0.0", "image": "registry.local/weather-app:1.0.0"}"#,
        )
        .unwrap()
        .normalize()
        .unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn create_posts_name_and_manifest() {
        let server = MockManager::start(HashMap::from([("/create", 202)]));
        let manager = HttpContainerManager::new(&server.url, Duration::from_secs(5));

        manager.create("weather-app", &record()).await.unwrap();

        let bodies = server.bodies.lock().unwrap();
        assert_eq!(bodies[0].0, "/create");
        assert_eq!(bodies[0].1["name"], "weather-app");
        assert_eq!(bodies[0].1["manifest"]["image"], "registry.local/weather-app:1.0.0");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn client_error_is_rejection() {
        let server = MockManager::start(HashMap::from([("/delete", 409)]));
        let manager = HttpContainerManager::new(&server.url, Duration::from_secs(5));
        assert!(matches!(
            manager.delete("weather-app").await,
            Err(ManagerError::Rejected(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn server_error_is_unavailable() {
        let server = MockManager::start(HashMap::from([("/delete", 503)]));
        let manager = HttpContainerManager::new(&server.url, Duration::from_secs(5));
        assert!(matches!(
            manager.delete("weather-app").await,
            Err(ManagerError::Unavailable(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unreachable_manager_is_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);
        let manager = HttpContainerManager::new(&url, Duration::from_secs(2));
        assert!(matches!(
            manager.create("weather-app", &record()).await,
            Err(ManagerError::Unavailable(_))
        ));
    }
}

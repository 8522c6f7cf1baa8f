use crate::{CatalogSource, SourceError};
use async_trait::async_trait;
use serde_json::Value;
use std::io::Read;
use std::time::Duration;

/// Remote catalog reached over HTTP.
///
/// Expects a simple REST API:
/// - `GET /manifests/<name>`: one raw manifest (404 when absent)
/// - `GET /manifests`: JSON array of raw manifests
///
/// ureq is blocking, so every request runs on tokio's blocking pool.
pub struct HttpSource {
    name: String,
    url: String,
    auth_token: Option<String>,
    agent: ureq::Agent,
}

impl HttpSource {
    pub fn new(name: impl Into<String>, url: &str, timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        Self {
            name: name.into(),
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

    async fn get(&self, url: String) -> Result<Option<Vec<u8>>, SourceError> {
        let agent = self.agent.clone();
        let token = self.auth_token.clone();
        tokio::task::spawn_blocking(move || do_get(&agent, &url, token.as_deref()))
            .await
            .map_err(|e| SourceError::Unavailable(format!("catalog request task failed: {e}")))?
    }
}

fn do_get(agent: &ureq::Agent, url: &str, token: Option<&str>) -> Result<Option<Vec<u8>>, SourceError> {
    tracing::debug!("GET {url}");
    let mut req = agent.get(url).header("Accept", "application/json");
    if let Some(token) = token {
        req = req.header("Authorization", &format!("Bearer {token}"));
    }
    let resp = match req.call() {
        Ok(r) => r,
        Err(ureq::Error::StatusCode(404)) => return Ok(None),
        Err(ureq::Error::StatusCode(code)) => {
            return Err(SourceError::Unavailable(format!("HTTP {code} for {url}")));
        }
        Err(e) => return Err(SourceError::Unavailable(e.to_string())),
    };

    let code = resp.status().as_u16();
    if code == 404 {
        return Ok(None);
    }
    if code >= 400 {
        return Err(SourceError::Unavailable(format!("HTTP {code} for {url}")));
    }

    let mut reader = resp.into_body().into_reader();
    let mut body = Vec::new();
    reader
        .read_to_end(&mut body)
        .map_err(|e| SourceError::Unavailable(e.to_string()))?;
    Ok(Some(body))
}

#[async_trait]
impl CatalogSource for HttpSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, name: &str) -> Result<Option<Value>, SourceError> {
        let url = format!("{}/manifests/{name}", self.url);
        let Some(body) = self.get(url).await? else {
            return Ok(None);
        };
        serde_json::from_slice(&body)
            .map(Some)
            .map_err(|e| SourceError::Malformed(e.to_string()))
    }

    async fn list(&self) -> Result<Vec<Value>, SourceError> {
        let url = format!("{}/manifests", self.url);
        let Some(body) = self.get(url).await? else {
            return Ok(Vec::new());
        };
        serde_json::from_slice(&body).map_err(|e| SourceError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::sync::{Arc, Mutex};

    /// Minimal catalog server: serves canned bodies by path, records request headers.
    struct MockCatalog {
        url: String,
        requests: Arc<Mutex<Vec<HashMap<String, String>>>>,
        _handle: std::thread::JoinHandle<()>,
    }

    impl MockCatalog {
        fn start(routes: HashMap<String, (u16, String)>) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let url = format!("http://{}", listener.local_addr().unwrap());
            let requests = Arc::new(Mutex::new(Vec::new()));
            let captured = Arc::clone(&requests);

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

                    let mut headers = HashMap::new();
                    loop {
                        let mut line = String::new();
                        if reader.read_line(&mut line).is_err() || line.trim().is_empty() {
                            break;
                        }
                        if let Some((k, v)) = line.trim().split_once(':') {
                            headers.insert(k.trim().to_lowercase(), v.trim().to_owned());
                        }
                    }
                    captured.lock().unwrap().push(headers);

                    let (code, body) = routes
                        .get(&path)
                        .cloned()
                        .unwrap_or((404, "not found".to_owned()));
                    let response = format!(
                        "HTTP/1.1 {code} X\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = stream.write_all(response.as_bytes());
                }
            });

            Self {
                url,
                requests,
                _handle: handle,
            }
        }
    }

    fn routes(entries: &[(&str, u16, &str)]) -> HashMap<String, (u16, String)> {
        entries
            .iter()
            .map(|(p, c, b)| ((*p).to_owned(), (*c, (*b).to_owned())))
            .collect()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn fetches_entry_and_sends_token() {
        let server = MockCatalog::start(routes(&[(
            "/manifests/weather-app",
            200,
            r#"{"name":"weather-app"}"#,
        )]));
        let source = HttpSource::new("remote", &server.url, Duration::from_secs(5))
            .with_token("s3cret");

        let entry = source.fetch("weather-app").await.unwrap().unwrap();
        assert_eq!(entry["name"], "weather-app");

        let requests = server.requests.lock().unwrap();
        assert_eq!(
            requests[0].get("authorization").map(String::as_str),
            Some("Bearer s3cret")
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_entry_is_none() {
        let server = MockCatalog::start(HashMap::new());
        let source = HttpSource::new("remote", &server.url, Duration::from_secs(5));
        assert!(source.fetch("weather-app").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn server_error_is_unavailable() {
        let server = MockCatalog::start(routes(&[("/manifests", 503, "down")]));
        let source = HttpSource::new("remote", &server.url, Duration::from_secs(5));
        assert!(matches!(source.list().await, Err(SourceError::Unavailable(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn non_json_body_is_malformed() {
        let server = MockCatalog::start(routes(&[("/manifests/x", 200, "<html>")]));
        let source = HttpSource::new("remote", &server.url, Duration::from_secs(5));
        assert!(matches!(
            source.fetch("x").await,
            Err(SourceError::Malformed(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unreachable_host_is_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);
        let source = HttpSource::new("remote", &url, Duration::from_secs(2));
        assert!(matches!(source.list().await, Err(SourceError::Unavailable(_))));
    }

    #[test]
    fn strips_trailing_slash() {
        let source = HttpSource::new("remote", "http://catalog.local/", Duration::from_secs(1));
        assert_eq!(source.url, "http://catalog.local");
    }
}

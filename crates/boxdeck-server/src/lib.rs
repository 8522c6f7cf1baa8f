//! HTTP transport for the boxdeck management plane.
//!
//! A thin layer over [`boxdeck_core::Engine`]: every request is decoded,
//! handed to the query façade or the orchestrator, and the result encoded as
//! JSON. tiny_http is blocking, so each request runs on its own thread and
//! bridges into the tokio runtime with [`Handle::block_on`].
//!
//! Routes:
//! - `GET  /status`: liveness probe, answers `active`
//! - `GET  /ui/api/appStore`: manifests joined with status (`?kind=app|driver`)
//! - `GET  /ui/api/containerStatus`: every observed component status
//!   (`/ui/api/containerStatus2` is an alias kept for older UIs)
//! - `GET  /ui/api/dataSources`: registered data-source descriptors
//! - `POST /ui/api/drivers`: app store view restricted to drivers
//! - `GET  /ui/api/manifest/<name>`: one resolved manifest
//! - `POST /ui/api/install`, `/uninstall`, `/restart`: body `{"name": ...}`
//! - `GET  /ui/api/operations`: in-flight and archived operations
//! - `POST /ui/api/feed`: one status feed event
//!
//! The [`TestServer`] helper starts a server on a random port for integration testing.

use boxdeck_core::{Config, CoreError, Engine, ErrorKind, RestartPhase};
use boxdeck_schema::{ComponentKind, ComponentStatus};
use boxdeck_status::FeedEvent;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tiny_http::{Header, Method, Response, Server, StatusCode};
use tokio::runtime::{Handle, Runtime};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("config error: {0}")]
    Config(#[from] boxdeck_core::ConfigError),
    #[error("failed to start runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error("failed to bind {addr}: {reason}")]
    Bind { addr: String, reason: String },
}

/// Shared request context: the engine plus the runtime it lives on.
pub struct App {
    engine: Arc<Engine>,
    runtime: Handle,
}

impl App {
    pub fn new(engine: Arc<Engine>, runtime: Handle) -> Self {
        Self { engine, runtime }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }
}

/// A fully formed response, independent of the HTTP library.
#[derive(Debug)]
pub struct Reply {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorKind,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    phase: Option<RestartPhase>,
}

#[derive(Deserialize)]
struct NameRequest {
    name: String,
}

impl Reply {
    fn text(status: u16, text: &str) -> Self {
        Self {
            status,
            content_type: "text/plain; charset=utf-8",
            body: text.as_bytes().to_vec(),
        }
    }

    fn json<T: Serialize>(status: u16, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self {
                status,
                content_type: "application/json",
                body,
            },
            Err(e) => Self::error(&CoreError::Internal(format!("serialization failed: {e}"))),
        }
    }

    fn error(err: &CoreError) -> Self {
        let body = ErrorBody {
            error: err.kind(),
            message: err.to_string(),
            phase: err.phase_error().map(|(phase, _)| phase),
        };
        let body = serde_json::to_vec(&body).unwrap_or_default();
        Self {
            status: http_status(err),
            content_type: "application/json",
            body,
        }
    }

    fn invalid(message: &str) -> Self {
        Self::error(&CoreError::Invalid {
            name: String::new(),
            reason: message.to_owned(),
        })
    }

    fn not_found(path: &str) -> Self {
        Self::error(&CoreError::NotFound(path.to_owned()))
    }

    fn method_not_allowed() -> Self {
        Self::text(405, "method not allowed")
    }

    fn from_result<T: Serialize>(result: Result<T, CoreError>) -> Self {
        match result {
            Ok(value) => Self::json(200, &value),
            Err(e) => Self::error(&e),
        }
    }
}

/// HTTP status for an error. A partial restart answers with its phase error's status.
pub fn http_status(err: &CoreError) -> u16 {
    if let Some((_, inner)) = err.phase_error() {
        return http_status(inner);
    }
    match err.kind() {
        ErrorKind::NotFound => 404,
        ErrorKind::Invalid => 400,
        ErrorKind::Busy => 409,
        ErrorKind::SourceUnavailable => 503,
        ErrorKind::TimedOut | ErrorKind::Cancelled => 504,
        ErrorKind::InstallFailed | ErrorKind::UninstallFailed => 502,
        ErrorKind::Partial | ErrorKind::Internal => 500,
    }
}

const MANIFEST_PREFIX: &str = "/ui/api/manifest/";

const ROUTES: &[&str] = &[
    "/status",
    "/ui/api/appStore",
    "/ui/api/containerStatus",
    "/ui/api/containerStatus2",
    "/ui/api/dataSources",
    "/ui/api/drivers",
    "/ui/api/install",
    "/ui/api/uninstall",
    "/ui/api/restart",
    "/ui/api/operations",
    "/ui/api/feed",
];

#[derive(Clone, Copy)]
enum Lifecycle {
    Install,
    Uninstall,
    Restart,
}

fn parse_kind(query: &str) -> Result<Option<ComponentKind>, Reply> {
    for pair in query.split('&') {
        if let Some(value) = pair.strip_prefix("kind=") {
            return ComponentKind::parse(value)
                .map(Some)
                .map_err(|e| Reply::invalid(&e.to_string()));
        }
    }
    Ok(None)
}

fn lifecycle(app: &App, body: &[u8], op: Lifecycle) -> Reply {
    let request: NameRequest = match serde_json::from_slice(body) {
        Ok(r) => r,
        Err(e) => return Reply::invalid(&format!("expected {{\"name\": ...}}: {e}")),
    };
    if request.name.trim().is_empty() {
        return Reply::invalid("name must not be empty");
    }
    let orchestrator = app.engine.orchestrator();
    let result: Result<ComponentStatus, CoreError> = app.block_on(async {
        match op {
            Lifecycle::Install => orchestrator.install(&request.name).await,
            Lifecycle::Uninstall => orchestrator.uninstall(&request.name).await,
            Lifecycle::Restart => orchestrator.restart(&request.name).await,
        }
    });
    Reply::from_result(result)
}

fn ingest(app: &App, body: &[u8]) -> Reply {
    let event: FeedEvent = match serde_json::from_slice(body) {
        Ok(e) => e,
        Err(e) => return Reply::invalid(&format!("malformed feed event: {e}")),
    };
    debug!("feed event for '{}' via http", event.component);
    let feed = app.engine.http_feed();
    match app.block_on(feed.send(event)) {
        Ok(()) => Reply::json(202, &serde_json::json!({ "accepted": true })),
        Err(_) => Reply::error(&CoreError::Internal("http feed is closed".to_owned())),
    }
}

/// Dispatch one request to its handler. `url` may carry a query string.
pub fn route(app: &App, method: &Method, url: &str, body: &[u8]) -> Reply {
    let (path, query) = url.split_once('?').unwrap_or((url, ""));
    let query_facade = app.engine.query();

    match (method, path) {
        (Method::Get, "/status") => Reply::text(200, "active"),
        (Method::Get, "/ui/api/appStore") => match parse_kind(query) {
            Ok(kind) => Reply::from_result(app.block_on(query_facade.app_store(kind))),
            Err(reply) => reply,
        },
        (Method::Get, "/ui/api/containerStatus" | "/ui/api/containerStatus2") => {
            Reply::json(200, &query_facade.container_status())
        }
        (Method::Get, "/ui/api/dataSources") => Reply::json(200, &query_facade.data_sources()),
        (Method::Post, "/ui/api/drivers") => {
            Reply::from_result(app.block_on(query_facade.drivers()))
        }
        (Method::Get, "/ui/api/operations") => Reply::json(200, &query_facade.operations()),
        (Method::Post, "/ui/api/install") => lifecycle(app, body, Lifecycle::Install),
        (Method::Post, "/ui/api/uninstall") => lifecycle(app, body, Lifecycle::Uninstall),
        (Method::Post, "/ui/api/restart") => lifecycle(app, body, Lifecycle::Restart),
        (Method::Post, "/ui/api/feed") => ingest(app, body),
        (Method::Get, p) if p.starts_with(MANIFEST_PREFIX) => {
            let name = &p[MANIFEST_PREFIX.len()..];
            if name.is_empty() || name.contains('/') {
                return Reply::not_found(p);
            }
            Reply::from_result(app.block_on(query_facade.manifest(name)))
        }
        (_, p) if ROUTES.contains(&p) || p.starts_with(MANIFEST_PREFIX) => {
            Reply::method_not_allowed()
        }
        (_, p) => Reply::not_found(p),
    }
}

fn read_body(req: &mut tiny_http::Request) -> Option<Vec<u8>> {
    let mut body = Vec::new();
    if req.as_reader().read_to_end(&mut body).is_ok() {
        Some(body)
    } else {
        None
    }
}

/// Handle a single HTTP request, dispatching to the appropriate route handler.
pub fn handle_request(app: &App, mut req: tiny_http::Request) {
    let method = req.method().clone();
    let url = req.url().to_owned();
    debug!("{method} {url}");

    let reply = match read_body(&mut req) {
        Some(body) => route(app, &method, &url, &body),
        None => Reply::invalid("unreadable request body"),
    };
    if reply.status >= 500 {
        warn!("{method} {url} -> {}", reply.status);
    }

    let mut response = Response::from_data(reply.body).with_status_code(StatusCode(reply.status));
    if let Ok(header) = Header::from_bytes("Content-Type", reply.content_type) {
        response = response.with_header(header);
    }
    let _ = req.respond(response);
}

fn serve(server: &Server, app: &Arc<App>) {
    for request in server.incoming_requests() {
        let app = Arc::clone(app);
        std::thread::spawn(move || handle_request(&app, request));
    }
}

/// Start the server loop, blocking the current thread.
pub fn run_server(app: &Arc<App>, addr: &str) -> Result<(), ServerError> {
    let server = Server::http(addr).map_err(|e| ServerError::Bind {
        addr: addr.to_owned(),
        reason: e.to_string(),
    })?;
    info!("listening on {addr}");
    serve(&server, app);
    Ok(())
}

/// Build the multi-threaded runtime the engine and request handlers share.
pub fn build_runtime() -> Result<Runtime, ServerError> {
    Ok(tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("boxdeck-worker")
        .build()?)
}

/// A test helper that starts a boxdeck server on a random port in a background thread.
///
/// The server listens on `127.0.0.1:{port}` with its own runtime and an
/// engine built from the given config. Dropping the `TestServer` stops the
/// accept loop.
pub struct TestServer {
    pub url: String,
    pub port: u16,
    app: Arc<App>,
    server: Arc<Server>,
    _runtime: Runtime,
    _handle: std::thread::JoinHandle<()>,
}

impl TestServer {
    pub fn start(config: &Config) -> Result<Self, ServerError> {
        let runtime = build_runtime()?;
        let engine = {
            let _enter = runtime.enter();
            Engine::from_config(config)
        };
        let app = Arc::new(App::new(Arc::new(engine), runtime.handle().clone()));

        let server = Server::http("127.0.0.1:0").map_err(|e| ServerError::Bind {
            addr: "127.0.0.1:0".to_owned(),
            reason: e.to_string(),
        })?;
        let server = Arc::new(server);
        let port = server
            .server_addr()
            .to_ip()
            .map(|addr| addr.port())
            .ok_or_else(|| ServerError::Bind {
                addr: "127.0.0.1:0".to_owned(),
                reason: "not an IP listener".to_owned(),
            })?;
        let url = format!("http://127.0.0.1:{port}");

        let srv = Arc::clone(&server);
        let loop_app = Arc::clone(&app);
        let handle = std::thread::spawn(move || serve(&srv, &loop_app));

        Ok(Self {
            url,
            port,
            app,
            server,
            _runtime: runtime,
            _handle: handle,
        })
    }

    pub fn engine(&self) -> &Engine {
        self.app.engine()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server.unblock();
    }
}

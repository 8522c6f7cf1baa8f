use boxdeck_core::{Config, ContainerManagerConfig, Engine};
use boxdeck_server::{build_runtime, run_server, App, ServerError};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "boxdeck-server", about = "boxdeck management plane server")]
struct Cli {
    /// Path to boxdeck.toml. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Port to listen on, overriding `[server] port`.
    #[arg(long)]
    port: Option<u16>,

    /// Address to bind, overriding `[server] bind`.
    #[arg(long)]
    bind: Option<String>,

    /// Use the simulated container manager regardless of the config.
    #[arg(long)]
    mock_manager: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), ServerError> {
    let mut config = match &cli.config {
        Some(path) => {
            info!("loading config from {}", path.display());
            Config::load(path)?
        }
        None => Config::default(),
    };
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }
    if cli.mock_manager {
        config.container_manager = ContainerManagerConfig::default();
    }

    let runtime = build_runtime()?;
    let engine = {
        let _enter = runtime.enter();
        Engine::from_config(&config)
    };
    let app = Arc::new(App::new(Arc::new(engine), runtime.handle().clone()));

    let addr = config.server.addr();
    info!("starting boxdeck-server on {addr}");
    run_server(&app, &addr)
}

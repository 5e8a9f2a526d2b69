use std::io::{self, BufRead};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use bevy_ecs::world::World;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use webgate_core::{
    build_gateway_runtime, dispatch, load_gateway_config, CommandBridge, CommandRequest,
    EventBuffer, EventBufferLayer, HttpServer, SysinfoProbe, SystemActor, SystemClock,
    WorkError,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Access-gated admin gateway for the host process")]
struct Cli {
    /// JSON config file; overrides WEBGATE_CONFIG_PATH
    #[arg(long)]
    config: Option<PathBuf>,
    /// Address the HTTP surface listens on
    #[arg(long)]
    bind: Option<SocketAddr>,
    /// Directory holding the authorization list and the audit log
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut config, source) =
        load_gateway_config(cli.config.as_deref()).context("loading gateway config")?;

    let events = Arc::new(EventBuffer::new(config.logs.event_buffer_capacity));
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(EventBufferLayer::new(Arc::clone(&events)))
        .init();

    match &source {
        Some(path) => info!(
            target: "webgate::config",
            path = %path.display(),
            "gateway_config.loaded=file"
        ),
        None => info!(target: "webgate::config", "gateway_config.loaded=builtin"),
    }

    if let Some(bind) = cli.bind {
        config.http.bind = bind;
    }
    if let Some(data_dir) = cli.data_dir {
        config.storage.data_dir = data_dir;
    }

    let dashboard = match &config.http.dashboard_path {
        Some(path) => Some(
            std::fs::read_to_string(path)
                .with_context(|| format!("reading dashboard from {}", path.display()))?,
        ),
        None => None,
    };

    let runtime = build_gateway_runtime(
        &config,
        Arc::new(SystemClock),
        events,
        Some(Arc::new(SysinfoProbe::new())),
        dashboard,
    );
    if runtime.store.is_empty() {
        warn!(
            target: "webgate::gateway",
            "no authorized addresses; use `webmanager add <ip> <days>` on the console"
        );
    }

    let http = HttpServer::start(
        config.http.bind,
        config.http.workers,
        config.http.max_body_bytes,
        Arc::clone(&runtime.gateway),
    )
    .context("starting http server")?;

    spawn_console_reader(runtime.bridge.clone())?;

    info!(
        target: "webgate::host",
        bind = %http.local_addr(),
        data_dir = %config.storage.data_dir.display(),
        "webgate server ready"
    );

    // The host loop owns the world and runs on this thread until `stop`.
    runtime.host.run();

    http.shutdown();
    info!(target: "webgate::host", "webgate server stopped");
    Ok(())
}

/// Read console lines from stdin and run each one on the host thread.
fn spawn_console_reader(bridge: CommandBridge<World>) -> Result<()> {
    thread::Builder::new()
        .name("webgate-console".into())
        .spawn(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(err) => {
                        warn!(target: "webgate::console", error = %err, "console.read_failed");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                let result = bridge.submit(CommandRequest::new(move |world: &mut World| {
                    dispatch(world, &SystemActor::HOST_CONSOLE, &line).map_err(WorkError::from)
                }));
                if result.success {
                    if !result.output.is_empty() {
                        println!("{}", result.output);
                    }
                } else {
                    println!("error: {}", result.error_message());
                }
            }
        })
        .context("spawning console reader")?;
    Ok(())
}

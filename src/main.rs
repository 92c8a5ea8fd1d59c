mod answer;
mod codec;
mod config;
mod engine;
mod error;
mod overrides;
mod server;
mod upstream;

use std::future::Future;
use std::io;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Settings, load_config};
use crate::engine::Engine;
use crate::server::Server;

#[derive(Parser, Debug)]
#[command(author, version, about = "DNS proxy that answers overridden names locally", long_about = None)]
struct Args {
    /// Configuration file (JSON)
    #[arg(short = 'f', long = "config", default_value = "config.json")]
    config: PathBuf,
    /// Enable debug logging
    #[arg(long = "debug", default_value_t = false)]
    debug: bool,
    /// Emit logs as JSON lines
    #[arg(long = "json-logs", default_value_t = false)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.debug, args.json_logs);

    let cfg = load_config(&args.config).context("load config")?;
    let settings = Settings::from_config(cfg).context("compile config")?;
    if settings.overrides.is_empty() {
        warn!("no override records configured, every query will be forwarded");
    }

    let engine = Engine::new(&settings);
    let server = Server::bind(&settings, engine).context("start udp listener")?;

    info!(
        bind = %server.local_addr()?,
        upstream = %settings.upstream,
        records = settings.overrides.len(),
        upstream_timeout_ms = settings.upstream_timeout.as_millis() as u64,
        max_inflight = settings.max_inflight,
        "dns proxy started"
    );

    tokio::select! {
        res = server.run() => res,
        _ = wait_for_shutdown(tokio::signal::ctrl_c()) => Ok(()),
    }
}

/// Resolves once the stop signal arrives. If the signal handler cannot be
/// installed the proxy keeps serving and this never resolves.
async fn wait_for_shutdown(signal: impl Future<Output = io::Result<()>>) {
    match signal.await {
        Ok(()) => info!("shutdown signal received"),
        Err(err) => {
            warn!(error = %err, "failed to listen for ctrl-c, serving until killed");
            std::future::pending::<()>().await;
        }
    }
}

fn init_tracing(debug: bool, json: bool) {
    let level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(fmt::layer().json().with_target(false)).init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_ansi(false))
            .init();
    }
}

//! sharecast-server binary: signaling WebSocket plus HTTP room discovery.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use sharecast_common::ShareError;
use sharecast_config::{validation, ShareConfig};
use sharecast_server::transport::wait_for_death;
use sharecast_server::{connection, http, registry};
use sharecast_server::{ConnectionIndex, InMemoryEngine, MediaEngine, SessionCoordinator};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sharecast-server", about = "Screen-share signaling and SFU coordination server")]
struct Args {
    /// Config file (default: platform config dir).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Signaling port, overriding the config file.
    #[arg(short, long)]
    port: Option<u16>,

    /// HTTP discovery port, overriding the config file.
    #[arg(long)]
    http_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), ShareError> {
    let args = Args::parse();
    let config = load_config(&args)?;

    let filter = EnvFilter::try_from_env("SHARECAST_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| config.logging.filter.as_str().into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let engine = Arc::new(InMemoryEngine::from_config(&config.media));

    // The engine dying is fatal: give in-flight work a moment, then exit.
    let health = engine.health();
    let grace = Duration::from_millis(config.engine.death_grace_ms);
    tokio::spawn(async move {
        let reason = wait_for_death(health).await;
        tracing::error!(reason = %reason, grace_ms = grace.as_millis() as u64, "Media engine died, exiting");
        tokio::time::sleep(grace).await;
        std::process::exit(1);
    });

    let registry = registry::shared();
    let coordinator = Arc::new(SessionCoordinator::new(
        registry.clone(),
        ConnectionIndex::new(),
        engine,
    ));

    if config.http.enabled {
        let addr = format!("{}:{}", config.signaling.bind, config.http.port);
        let listener = TcpListener::bind(&addr).await?;
        let router = http::build_router(registry, &config.http.cors_origin);
        tracing::info!("HTTP discovery listening on {}", addr);
        tokio::spawn(async move {
            if let Err(e) = http::serve(listener, router).await {
                tracing::error!(error = %e, "HTTP server stopped");
            }
        });
    }

    let addr = format!("{}:{}", config.signaling.bind, config.signaling.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("sharecast-server listening on {}", addr);

    connection::serve(
        listener,
        coordinator,
        config.signaling.channel_capacity as usize,
    )
    .await;
    Ok(())
}

fn load_config(args: &Args) -> Result<ShareConfig, ShareError> {
    let mut config = match &args.config {
        Some(path) => sharecast_config::load_from_path(path)?,
        None => sharecast_config::load_default()?,
    };
    if let Some(port) = args.port {
        config.signaling.port = port;
    }
    if let Some(port) = args.http_port {
        config.http.port = port;
    }
    validation::validate(&config)?;
    Ok(config)
}

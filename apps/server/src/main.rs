pub mod config;
pub mod web;

use anyhow::{Context, Result};
use clap::Parser;
use climate_protocol::command::UdpController;
use climate_protocol::report_listener::ReportListener;
use climate_scheduler::service::ClimateService;
use climate_scheduler::store::SqliteStore;
use climate_scheduler::time_source::SystemClock;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ServerConfig;

const REPORT_QUEUE: usize = 256;

#[derive(Parser, Debug)]
#[command(name = "climate-server")]
#[command(about = "Schedule-driven climate zone controller")]
#[command(version)]
struct Args {
    /// Config file path.
    #[arg(short, long, env = "CLIMATE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level, overridden by RUST_LOG.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// HTTP bind address, overrides `[web] bind`.
    #[arg(long, env = "CLIMATE_BIND")]
    bind: Option<String>,

    /// SQLite database, overrides `[store] path`.
    #[arg(long, env = "CLIMATE_DB")]
    db: Option<PathBuf>,
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    let mut config = ServerConfig::load(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.web.bind = bind;
    }
    if let Some(db) = args.db {
        config.store.path = db;
    }

    let store = Arc::new(
        SqliteStore::open(&config.store.path)
            .with_context(|| format!("Failed to open database {}", config.store.path.display()))?,
    );
    let endpoints = config.devices.endpoints()?;
    if endpoints.is_empty() {
        warn!("no device endpoints configured, every zone command will fail");
    }
    let controller = Arc::new(UdpController::new(endpoints));
    let device_zones: Vec<_> = controller.zones().collect();
    let service = Arc::new(
        ClimateService::open(config.climate.clone(), store, controller, Arc::new(SystemClock))
            .await
            .context("Failed to start climate service")?,
    );

    let cancel = CancellationToken::new();
    let (report_tx, report_rx) = mpsc::channel(REPORT_QUEUE);

    let scheduler = tokio::spawn(service.scheduler().run(cancel.child_token()));
    let reconciler = tokio::spawn(
        service
            .reconciler()
            .with_device_zones(device_zones)
            .run(report_rx, cancel.child_token()),
    );
    let listener = {
        let bind = config.devices.report_bind.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = ReportListener::new(report_tx).main_loop(&bind, cancel.child_token()).await {
                error!(error = %e, "device report listener failed, shutting down");
                cancel.cancel();
            }
        })
    };

    let app = web::router(service.clone());
    let tcp = tokio::net::TcpListener::bind(&config.web.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.web.bind))?;
    info!(addr = %config.web.bind, "web server listening");

    let shutdown = cancel.clone();
    axum::serve(tcp, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = shutdown_signal() => {}
                _ = shutdown.cancelled() => {}
            }
            shutdown.cancel();
        })
        .await
        .context("web server failed")?;

    cancel.cancel();
    for (name, task) in [("scheduler", scheduler), ("reconciler", reconciler), ("listener", listener)] {
        if let Err(e) = task.await {
            error!(task = name, error = %e, "task panicked");
        }
    }
    info!("climate server stopped");
    Ok(())
}

//! ride-api server binary.
//!
//! Wires the orchestrator to in-memory collaborators, spawns the dispatch
//! worker and the periodic sweep, and serves the HTTP surface until SIGINT
//! or SIGTERM. Queued events are drained before exit.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use ride_api::config::ServerArgs;
use ride_api::AppState;
use ride_orchestrator::{Collaborators, Orchestrator, SystemClock};
use tracing_subscriber::EnvFilter;

/// How long shutdown waits for the dispatch worker to drain.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ServerArgs::parse();
    init_tracing(args.json_logs);

    let config = args
        .orchestrator_config()
        .context("loading orchestrator configuration")?;
    let prometheus = PrometheusBuilder::new()
        .install_recorder()
        .context("installing Prometheus recorder")?;

    let (orchestrator, worker) =
        Orchestrator::new(config, Arc::new(SystemClock), Collaborators::in_memory());
    let orchestrator = Arc::new(orchestrator);
    let settings = orchestrator.config();
    tracing::info!(
        sweep_interval_secs = settings.sweep_interval_secs,
        auto_cancel_expired_wait = settings.auto_cancel_expired_wait,
        max_retries = settings.retry.max_retries,
        "orchestrator configured"
    );
    let worker_task = tokio::spawn(worker.run());
    let sweep_task = tokio::spawn(Arc::clone(&orchestrator).sweep_loop());

    let state = AppState::with_config(orchestrator, args.app_config()).with_prometheus(prometheus);
    let app = ride_api::app(state);

    let addr = args.listen_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "ride-api listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    // The router and the sweep hold the last queue handles; once both are
    // gone the worker finishes what is queued and returns.
    sweep_task.abort();
    let _ = sweep_task.await;
    if tokio::time::timeout(DRAIN_TIMEOUT, worker_task).await.is_err() {
        tracing::warn!("dispatch worker did not drain before the timeout");
    }
    tracing::info!("ride-api stopped");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.with_target(false).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received");
}

//! `widmate serve` – run the HTTP service until SIGINT/SIGTERM.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::mpsc;
use widmate_core::config::ServiceConfig;
use widmate_core::extractor::{Extractor, YtDlp};
use widmate_core::job_db::{spawn_persistence_worker, JobDb};
use widmate_core::jobs::JobStore;
use widmate_core::retry::RetryPolicy;
use widmate_core::runner::JobRunner;
use widmate_core::updater::UpdateScheduler;

use crate::api;
use crate::rate_limit::RateLimiter;
use crate::state::AppState;
use crate::stats::HostStats;

const PERSIST_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
const JOB_ABORT_GRACE: Duration = Duration::from_secs(10);

/// Command-line values that take precedence over `config.toml`.
#[derive(Debug, Default)]
pub struct ServeOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub download_dir: Option<PathBuf>,
}

pub async fn run_serve(mut cfg: ServiceConfig, overrides: ServeOverrides) -> Result<()> {
    if let Some(host) = overrides.host {
        cfg.server.host = host;
    }
    if let Some(port) = overrides.port {
        cfg.server.port = port;
    }
    if overrides.download_dir.is_some() {
        cfg.download_dir = overrides.download_dir;
    }

    let download_dir = cfg.resolve_download_dir()?;
    tokio::fs::create_dir_all(&download_dir)
        .await
        .with_context(|| format!("create download directory {}", download_dir.display()))?;

    let db = JobDb::open_default().await?;
    let previous = db.load_jobs().await?;
    let (journal, rx) = mpsc::unbounded_channel();
    let persist = spawn_persistence_worker(db, rx);
    let store = Arc::new(JobStore::with_journal(journal));
    let interrupted = store.restore(previous);
    tracing::info!(jobs = store.len(), interrupted, "job store restored");

    let extractor: Arc<dyn Extractor> = Arc::new(YtDlp::new(&cfg.extractor.binary));
    let runner = JobRunner::new(
        store.clone(),
        extractor.clone(),
        download_dir.clone(),
        cfg.max_concurrent_jobs,
    );

    let retry = cfg
        .retry
        .as_ref()
        .map(RetryPolicy::from)
        .unwrap_or_default();
    let updater = Arc::new(UpdateScheduler::from_config(&cfg.updater, retry)?);
    updater.start();

    let state = Arc::new(AppState {
        store: store.clone(),
        runner: runner.clone(),
        extractor,
        updater: updater.clone(),
        limiter: RateLimiter::new(cfg.rate_limits.clone()),
        download_dir,
        stats: HostStats::new(),
    });
    let app = api::create_router(state);

    let addr = format!("{}:{}", cfg.server.host, cfg.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    tracing::info!(addr = %listener.local_addr()?, "widmate listening");
    println!("listening on {}", listener.local_addr()?);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("http server")?;

    runner.shutdown(JOB_ABORT_GRACE).await;
    updater.stop().await;
    // The worker exits once every store handle is gone; in-flight jobs may still hold one.
    drop(runner);
    drop(store);
    match tokio::time::timeout(PERSIST_DRAIN_TIMEOUT, persist).await {
        Ok(Err(e)) => tracing::warn!(error = %e, "persistence worker ended abnormally"),
        Err(_) => tracing::warn!("persistence worker still busy at exit; pending writes dropped"),
        Ok(Ok(())) => {}
    }
    tracing::info!("widmate stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutting down");
}
